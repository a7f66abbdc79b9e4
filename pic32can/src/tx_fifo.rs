//! Transmission through the hardware FIFOs

use crate::bus::{Can, OutOfBounds, FIFO_COUNT};
use crate::interrupt::{state::State, FifoInterruptSet};
use crate::message::{FrameType, Message, MessageBuilder, RawMessage};
use crate::messageram::Capacities;
use crate::reg::{fifocon, int, Reg, RegisterAccess};
use embedded_can::Id;
use pic32can_core::{CanId, Dependencies};

impl<'a, P: CanId, D: Dependencies<P>, C: Capacities, R: RegisterAccess> Can<'a, P, D, C, R> {
    /// Puts a frame in a transmit FIFO to be sent on the bus.
    ///
    /// Fails with [`nb::Error::WouldBlock`] if the FIFO is full. Payloads
    /// longer than 8 bytes are truncated. Completion is reported by the
    /// interrupt handler.
    pub fn transmit(
        &mut self,
        id: Id,
        frame_type: FrameType<'_>,
        fifo: usize,
    ) -> nb::Result<(), OutOfBounds> {
        self.transmit_raw(MessageBuilder { id, frame_type }.build(), fifo)
    }

    /// Puts a prepared [`Message`] in a transmit FIFO. See [`Self::transmit`].
    pub fn transmit_frame(&mut self, frame: &Message, fifo: usize) -> nb::Result<(), OutOfBounds> {
        self.transmit_raw(*frame.raw(), fifo)
    }

    fn transmit_raw(&mut self, message: RawMessage, fifo: usize) -> nb::Result<(), OutOfBounds> {
        if fifo >= FIFO_COUNT {
            return Err(nb::Error::Other(OutOfBounds));
        }
        if !self.fifo_interrupts(fifo).tx_not_full() {
            return Err(nb::Error::WouldBlock);
        }
        let slot = self
            .internals
            .user_slot(fifo)
            .ok_or(nb::Error::Other(OutOfBounds))?;
        slot.set(message);

        self.state.store(State::TransmitInProgress);
        let regs = &self.internals.regs;
        regs.set_bits(Reg::FifoInt(fifo), FifoInterruptSet::TX_EMPTY_ENABLE.bits());
        regs.set_bits(Reg::FifoCon(fifo), fifocon::UINC);
        regs.set_bits(Reg::FifoCon(fifo), fifocon::TXREQ);
        regs.set_bits(Reg::Int, int::TBIE);
        trace!("CAN frame queued in FIFO {}", fifo);
        Ok(())
    }

    /// Withdraws the transmit request of a FIFO.
    ///
    /// Frames the module already started sending are not recalled and the
    /// driver state is left unchanged. Out of range FIFOs are ignored.
    pub fn abort(&mut self, fifo: usize) {
        if fifo < FIFO_COUNT {
            self.internals
                .regs
                .clear_bits(Reg::FifoCon(fifo), fifocon::TXREQ);
        }
    }
}
