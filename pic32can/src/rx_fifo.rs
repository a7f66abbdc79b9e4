//! Reception through the hardware FIFOs
//!
//! Receiving is a two step process. [`Can::receive`] arms the FIFO slot the
//! module will store the next message in, and the interrupt handler copies
//! the message into the armed destination once it arrives. Every slot can be
//! armed independently; a slot that receives a message while not armed is
//! retired without copying anything.

use crate::bus::{Can, OutOfBounds, FIFO_COUNT};
use crate::id::AtomicId;
use crate::interrupt::{state::State, FifoInterruptSet};
use crate::message::RawMessage;
use crate::messageram::Capacities;
use crate::reg::{fifoci, fifocon, int, Reg, RegisterAccess};
use core::cmp::min;
use core::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use pic32can_core::{CanId, Dependencies};

/// Where the interrupt handler stores a received frame.
///
/// The fields are atomics so that task code can read them while the bus is
/// owned by the interrupt handler. `len` is written last, with release
/// ordering; load it with acquire ordering before reading the other fields.
#[derive(Copy, Clone, Debug)]
pub struct RxDestination<'a> {
    /// Identifier of the frame
    pub id: &'a AtomicId,
    /// Number of bytes written to `data`: the data length code, limited to 8
    /// and to the length of `data`
    pub len: &'a AtomicU8,
    /// Payload
    pub data: &'a [AtomicU8],
    /// Timestamp captured on reception
    pub timestamp: Option<&'a AtomicU16>,
}

impl RxDestination<'_> {
    fn fill(&self, message: &RawMessage) {
        self.id.store(message.id(), Ordering::Relaxed);
        let len = min(message.len(), self.data.len());
        for (cell, byte) in self.data.iter().zip(&message.data[..len]) {
            cell.store(*byte, Ordering::Relaxed);
        }
        if let Some(timestamp) = self.timestamp {
            timestamp.store(message.timestamp(), Ordering::Relaxed);
        }
        self.len.store(len as u8, Ordering::Release);
    }
}

impl<'a, P: CanId, D: Dependencies<P>, C: Capacities, R: RegisterAccess> Can<'a, P, D, C, R> {
    /// Arms the FIFO slot that will hold the next received message.
    ///
    /// Returns the index of the armed slot. Nothing is copied here; the
    /// destination is filled by [`Self::on_interrupt`]. Arming a slot that
    /// is still armed replaces the previous destination.
    pub fn receive(
        &mut self,
        destination: RxDestination<'a>,
        fifo: usize,
    ) -> Result<usize, OutOfBounds> {
        if fifo >= FIFO_COUNT {
            return Err(OutOfBounds);
        }
        let regs = &self.internals.regs;
        let slot = (regs.read(Reg::FifoCi(fifo)) & fifoci::CFIFOCI_MASK) as usize;
        self.rx_registrations[fifo][slot] = Some(destination);

        self.state.store(State::ReceiveInProgress);
        regs.set_bits(Reg::FifoInt(fifo), FifoInterruptSet::RX_NOT_EMPTY_ENABLE.bits());
        regs.set_bits(Reg::Int, int::RBIE);
        Ok(slot)
    }

    /// Retires every occupied slot of the FIFO, filling the armed ones.
    pub(crate) fn drain_rx_fifo(&mut self, fifo: usize) {
        for _ in 0..self.internals.fifo_depth(fifo) {
            if !self.fifo_interrupts(fifo).rx_not_empty() {
                break;
            }
            let index =
                (self.internals.regs.read(Reg::FifoCi(fifo)) & fifoci::CFIFOCI_MASK) as usize;
            match self.internals.user_slot(fifo).map(|slot| slot.get()) {
                Some(message) => match self.rx_registrations[fifo][index].take() {
                    Some(destination) => destination.fill(&message),
                    None => trace!("CAN frame dropped from FIFO {} slot {}", fifo, index),
                },
                None => warn!("CAN FIFO {} points outside of the message memory", fifo),
            }
            self.internals
                .regs
                .set_bits(Reg::FifoCon(fifo), fifocon::UINC);
        }
    }
}
