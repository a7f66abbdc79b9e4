//! Acceptance filters and masks
//!
//! A received message is stored in the FIFO selected by the first enabled
//! filter that matches it. A filter matches when the identifier agrees with
//! the filter value on every bit set in the filter's mask.
//!
//! Filters can be reprogrammed while the bus is running: the filter is
//! disabled for the duration of the update. Masks can only be written in
//! configuration mode, so [`Can::set_mask`] stalls the bus while it runs.

use crate::bus::{Can, ModeSwitchTimeout, OperationMode, FILTER_COUNT, MASK_COUNT};
use crate::id;
use crate::messageram::Capacities;
use crate::reg::{fltcon, Reg, RegisterAccess};
use embedded_can::Id;
use pic32can_core::{CanId, Dependencies};

/// Value reported for filters and masks that do not exist
const NO_ID: Id = Id::Standard(embedded_can::StandardId::ZERO);

impl<'a, P: CanId, D: Dependencies<P>, C: Capacities, R: RegisterAccess> Can<'a, P, D, C, R> {
    /// Programs the identifier matched by acceptance filter `index`.
    ///
    /// Extended identifiers only match extended frames. Indices beyond the
    /// filters in use are ignored.
    pub fn set_filter(&mut self, index: usize, id: Id) {
        if index >= FILTER_COUNT {
            return;
        }
        let regs = &self.internals.regs;
        let control = Reg::FltCon(index / 4);
        regs.clear_bits(control, fltcon::flten(index));
        regs.write(Reg::RxF(index), id::to_filter_word(id));
        regs.set_bits(control, fltcon::flten(index));
    }

    /// Identifier matched by acceptance filter `index`
    pub fn filter(&self, index: usize) -> Id {
        if index >= FILTER_COUNT {
            return NO_ID;
        }
        id::from_filter_word(self.internals.regs.read(Reg::RxF(index)))
    }

    /// Programs acceptance mask `index`.
    ///
    /// Switches the module to configuration mode for the write and back to
    /// its operating mode afterwards, waiting for both switches. An extended
    /// identifier also restricts matching to the frame format of the filter.
    /// Indices beyond the masks of the module are ignored.
    pub fn set_mask(&mut self, index: usize, id: Id) -> Result<(), ModeSwitchTimeout> {
        if index >= MASK_COUNT {
            return Ok(());
        }
        self.internals.set_mode(OperationMode::Configuration)?;
        self.internals
            .regs
            .write(Reg::RxM(index), id::to_filter_word(id));
        let mode = self.internals.operating_mode;
        self.internals.set_mode(mode)
    }

    /// Acceptance mask `index`
    pub fn mask(&self, index: usize) -> Id {
        if index >= MASK_COUNT {
            return NO_ID;
        }
        id::from_filter_word(self.internals.regs.read(Reg::RxM(index)))
    }
}
