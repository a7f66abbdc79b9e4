//! Handling of messages/frames

use crate::id::{self, IdFields};
use core::cmp::min;
use embedded_can::{Frame, Id};

/// Maximum payload of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

const SID_MASK: u32 = 0x7ff;
const TIMESTAMP_POS: u32 = 16;
const DLC_MASK: u32 = 0xf;
const RTR: u32 = 1 << 9;
const EID_POS: u32 = 10;
const IDE: u32 = 1 << 28;

/// Message buffer in the peripheral's representation
///
/// The layout is shared by transmit and receive FIFOs. Received messages
/// additionally carry the timestamp in the upper half of the `SID` word.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub(crate) sid: u32,
    pub(crate) eid: u32,
    pub(crate) data: [u8; MAX_DATA_LEN],
}

impl RawMessage {
    /// Returns the CAN identifier of the message
    pub fn id(&self) -> Id {
        id::decode(IdFields {
            sid: (self.sid & SID_MASK) as u16,
            eid: (self.eid >> EID_POS) & id::EID_LOW_MASK,
            extended: self.is_extended(),
        })
    }

    /// Data length code
    pub fn dlc(&self) -> u8 {
        (self.eid & DLC_MASK) as u8
    }

    /// Data length in bytes
    ///
    /// Codes above 8 are interpreted as 8.
    pub fn len(&self) -> usize {
        min(self.dlc().into(), MAX_DATA_LEN)
    }

    /// Check if the frame uses an extended (29-bit) ID
    pub fn is_extended(&self) -> bool {
        self.eid & IDE != 0
    }

    /// Remote Transmission Request
    pub fn is_remote_frame(&self) -> bool {
        self.eid & RTR != 0
    }

    /// Data field
    pub fn data(&self) -> &[u8] {
        if self.is_remote_frame() {
            &[]
        } else {
            &self.data[..self.len()]
        }
    }

    /// Timestamp counter value captured on reception
    pub fn timestamp(&self) -> u16 {
        (self.sid >> TIMESTAMP_POS) as u16
    }
}

/// Selects the type of the frame along with its payload.
#[derive(Copy, Clone, Debug)]
pub enum FrameType<'a> {
    /// Data frame. Payloads longer than 8 bytes are truncated to 8.
    Data(&'a [u8]),
    /// Requests transmission of the identified frame. Sent with a data
    /// length code of 0.
    Remote,
}

/// Describes a CAN message/frame that is not yet converted to the
/// representation the peripheral understands.
#[derive(Copy, Clone, Debug)]
pub struct MessageBuilder<'a> {
    /// CAN identifier for the frame
    pub id: Id,
    /// Frame type with a payload
    pub frame_type: FrameType<'a>,
}

impl<'a> MessageBuilder<'a> {
    /// Create the message in the format required by the peripheral.
    pub fn build(self) -> RawMessage {
        let fields = id::encode(self.id);
        let mut message = RawMessage {
            sid: fields.sid.into(),
            eid: if fields.extended {
                (fields.eid << EID_POS) | IDE
            } else {
                0
            },
            data: [0; MAX_DATA_LEN],
        };
        match self.frame_type {
            FrameType::Data(payload) => {
                let len = min(payload.len(), MAX_DATA_LEN);
                message.data[..len].copy_from_slice(&payload[..len]);
                message.eid |= len as u32;
            }
            FrameType::Remote => message.eid |= RTR,
        }
        message
    }
}

/// Classic CAN frame ready to be handed to
/// [`Can::transmit_frame`](crate::bus::Can::transmit_frame).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Message(pub(crate) RawMessage);

impl Message {
    /// The message in the peripheral's representation
    pub fn raw(&self) -> &RawMessage {
        &self.0
    }
}

impl Frame for Message {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATA_LEN {
            return None;
        }
        Some(Message(
            MessageBuilder {
                id: id.into(),
                frame_type: FrameType::Data(data),
            }
            .build(),
        ))
    }

    /// The requested length is checked but not sent; remote frames always
    /// carry a data length code of 0.
    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DATA_LEN {
            return None;
        }
        Some(Message(
            MessageBuilder {
                id: id.into(),
                frame_type: FrameType::Remote,
            }
            .build(),
        ))
    }

    fn is_extended(&self) -> bool {
        self.0.is_extended()
    }

    fn is_remote_frame(&self) -> bool {
        self.0.is_remote_frame()
    }

    fn id(&self) -> Id {
        self.0.id()
    }

    fn dlc(&self) -> usize {
        self.0.dlc().into()
    }

    fn data(&self) -> &[u8] {
        self.0.data()
    }
}
