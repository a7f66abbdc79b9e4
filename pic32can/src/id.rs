//! Conversion between CAN identifiers and the split `SID`/`EID` fields used
//! by the peripheral.
//!
//! The peripheral stores the 11 most significant identifier bits in the
//! `SID` field and, for 29-bit identifiers, the remaining 18 bits in the
//! `EID` field together with an extension flag.
//!
//! The driver API works with [`embedded_can::Id`], so the frame format is
//! always explicit. Plain `u32` identifiers, as used by applications that
//! track identifiers numerically, are converted with [`from_raw`]: values up
//! to `0x7FF` are standard identifiers, anything larger is an extended one.

use crate::reg::rxf;
use core::sync::atomic::{AtomicU32, Ordering};
use embedded_can::{ExtendedId, Id, StandardId};

/// Largest standard identifier, also the boundary of [`from_raw`]
pub const SID_MAX: u32 = 0x7ff;
/// Mask of the 29 valid extended identifier bits
pub const EID_MAX: u32 = 0x1fff_ffff;
/// Mask of the 18 low bits carried in the `EID` field
pub const EID_LOW_MASK: u32 = 0x3_ffff;

/// Identifier split the way the peripheral stores it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IdFields {
    /// `SID`: the whole standard identifier or bits 28:18 of an extended one
    pub sid: u16,
    /// `EID`: bits 17:0 of an extended identifier, zero otherwise
    pub eid: u32,
    /// `IDE` / `EXID` / `MIDE`
    pub extended: bool,
}

/// Splits an identifier into peripheral fields.
pub fn encode(id: Id) -> IdFields {
    match id {
        Id::Standard(id) => IdFields {
            sid: id.as_raw(),
            eid: 0,
            extended: false,
        },
        Id::Extended(id) => IdFields {
            sid: (id.as_raw() >> 18) as u16,
            eid: id.as_raw() & EID_LOW_MASK,
            extended: true,
        },
    }
}

/// Joins peripheral fields back into an identifier.
///
/// Bits outside the fields are ignored.
pub fn decode(fields: IdFields) -> Id {
    let sid = fields.sid & StandardId::MAX.as_raw();
    if fields.extended {
        let raw = (u32::from(sid) << 18) | (fields.eid & EID_LOW_MASK);
        // Safety: the masks above keep the value within 29 bits
        Id::Extended(unsafe { ExtendedId::new_unchecked(raw) })
    } else {
        // Safety: the mask above keeps the value within 11 bits
        Id::Standard(unsafe { StandardId::new_unchecked(sid) })
    }
}

/// Interprets a numeric identifier, choosing the format by magnitude.
///
/// Values above `0x7FF` become extended identifiers truncated to 29 bits.
/// There is no way to express an extended identifier below `0x800` through
/// this function; construct [`Id::Extended`] directly for that.
pub fn from_raw(raw: u32) -> Id {
    if raw > SID_MAX {
        // Safety: masked to 29 bits
        Id::Extended(unsafe { ExtendedId::new_unchecked(raw & EID_MAX) })
    } else {
        // Safety: checked against `SID_MAX` above
        Id::Standard(unsafe { StandardId::new_unchecked(raw as u16) })
    }
}

/// Numeric value of an identifier regardless of its format.
pub fn to_raw(id: Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw().into(),
        Id::Extended(id) => id.as_raw(),
    }
}

/// Bit marking an extended identifier in [`AtomicId`]
const EXTENDED_FLAG: u32 = 1 << 31;

/// An [`Id`] that can be written from the interrupt handler while task code
/// reads it.
#[derive(Debug, Default)]
pub struct AtomicId(AtomicU32);

impl AtomicId {
    /// Holds the standard identifier 0
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Loads the identifier.
    pub fn load(&self, order: Ordering) -> Id {
        let raw = self.0.load(order);
        if raw & EXTENDED_FLAG != 0 {
            // Safety: masked to 29 bits
            Id::Extended(unsafe { ExtendedId::new_unchecked(raw & EID_MAX) })
        } else {
            // Safety: masked to 11 bits
            Id::Standard(unsafe { StandardId::new_unchecked((raw & SID_MAX) as u16) })
        }
    }

    /// Stores an identifier.
    pub fn store(&self, id: Id, order: Ordering) {
        let raw = match id {
            Id::Standard(id) => id.as_raw().into(),
            Id::Extended(id) => id.as_raw() | EXTENDED_FLAG,
        };
        self.0.store(raw, order)
    }
}

/// Packs an identifier into the `CxRXFn` / `CxRXMn` layout.
pub(crate) fn to_filter_word(id: Id) -> u32 {
    let fields = encode(id);
    let word = (u32::from(fields.sid) << rxf::SID_POS) & rxf::SID_MASK;
    if fields.extended {
        word | (fields.eid & rxf::EID_MASK) | rxf::EXID
    } else {
        word
    }
}

/// Unpacks an identifier from the `CxRXFn` / `CxRXMn` layout.
pub(crate) fn from_filter_word(word: u32) -> Id {
    decode(IdFields {
        sid: ((word & rxf::SID_MASK) >> rxf::SID_POS) as u16,
        eid: word & rxf::EID_MASK,
        extended: word & rxf::EXID != 0,
    })
}
