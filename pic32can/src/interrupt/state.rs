//! Driver activity shared between task and interrupt context

use core::sync::atomic::{AtomicU8, Ordering};

/// Current activity of the driver
///
/// There is a single state for the whole peripheral; it is not tracked per
/// FIFO.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum State {
    /// No request is pending
    Idle = 0,
    /// A message was queued for transmission
    TransmitInProgress = 1,
    /// A receive slot was armed
    ReceiveInProgress = 2,
    /// The interrupt handler completed a transfer. Without a registered
    /// callback the driver stays in this state until the next request.
    TransferComplete = 3,
    /// A bus or controller error was signalled. Without a registered callback
    /// the driver stays in this state until the next request.
    Error = 4,
}

impl State {
    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => State::TransmitInProgress,
            2 => State::ReceiveInProgress,
            3 => State::TransferComplete,
            4 => State::Error,
            _ => State::Idle,
        }
    }
}

/// [`State`] that can be updated from the interrupt handler while task code
/// reads it.
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) const fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> State {
        State::from_bits(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: State) {
        self.0.store(state as u8, Ordering::Release)
    }
}
