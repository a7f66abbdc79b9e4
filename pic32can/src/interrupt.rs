//! Interrupt flags, error state and the interrupt handler

pub mod state;

use crate::bus::{Can, FIFO_COUNT};
use crate::messageram::Capacities;
use crate::reg::{int, trec, vec, Reg, RegisterAccess};
use bitfield::bitfield;
use core::ops::BitOr;
use core::sync::atomic::Ordering;
use pic32can_core::{CanId, Dependencies};
use state::State;

bitfield! {
    /// Flags and enables of a FIFO interrupt register (`CxFIFOINTn`).
    ///
    /// Which flags are meaningful depends on the direction of the FIFO.
    #[derive(Copy, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct FifoInterruptSet(u32);

    /// Transmit FIFO not full interrupt enable
    pub tx_not_full_enable, set_tx_not_full_enable: 26;
    /// Transmit FIFO half empty interrupt enable
    pub tx_half_enable, set_tx_half_enable: 25;
    /// Transmit FIFO empty interrupt enable
    pub tx_empty_enable, set_tx_empty_enable: 24;
    /// Receive FIFO overflow interrupt enable
    pub rx_overflow_enable, set_rx_overflow_enable: 19;
    /// Receive FIFO full interrupt enable
    pub rx_full_enable, set_rx_full_enable: 18;
    /// Receive FIFO half full interrupt enable
    pub rx_half_enable, set_rx_half_enable: 17;
    /// Receive FIFO not empty interrupt enable
    pub rx_not_empty_enable, set_rx_not_empty_enable: 16;
    /// Transmit FIFO not full
    pub tx_not_full, _: 10;
    /// Transmit FIFO half empty
    pub tx_half, _: 9;
    /// Transmit FIFO empty
    pub tx_empty, _: 8;
    /// Receive FIFO overflow
    pub rx_overflow, set_rx_overflow: 3;
    /// Receive FIFO full
    pub rx_full, _: 2;
    /// Receive FIFO half full
    pub rx_half, _: 1;
    /// Receive FIFO not empty
    pub rx_not_empty, _: 0;
}

impl FifoInterruptSet {
    /// `RXNEMPTYIF`
    pub const RX_NOT_EMPTY: Self = Self(1 << 0);
    /// `RXHALFIF`
    pub const RX_HALF: Self = Self(1 << 1);
    /// `RXFULLIF`
    pub const RX_FULL: Self = Self(1 << 2);
    /// `RXOVFLIF`
    pub const RX_OVERFLOW: Self = Self(1 << 3);
    /// `TXEMPTYIF`
    pub const TX_EMPTY: Self = Self(1 << 8);
    /// `TXHALFIF`
    pub const TX_HALF: Self = Self(1 << 9);
    /// `TXNFULLIF`
    pub const TX_NOT_FULL: Self = Self(1 << 10);
    /// `RXNEMPTYIE`
    pub const RX_NOT_EMPTY_ENABLE: Self = Self(1 << 16);
    /// `TXEMPTYIE`
    pub const TX_EMPTY_ENABLE: Self = Self(1 << 24);

    /// Raw register bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Checks whether any bit of `other` is set in `self`
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for FifoInterruptSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<u32> for FifoInterruptSet {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl core::fmt::Debug for FifoInterruptSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FifoInterruptSet {{ ")?;
        if self.tx_not_full() {
            write!(f, "TXNFULL ")?;
        }
        if self.tx_half() {
            write!(f, "TXHALF ")?;
        }
        if self.tx_empty() {
            write!(f, "TXEMPTY ")?;
        }
        if self.rx_overflow() {
            write!(f, "RXOVFL ")?;
        }
        if self.rx_full() {
            write!(f, "RXFULL ")?;
        }
        if self.rx_half() {
            write!(f, "RXHALF ")?;
        }
        if self.rx_not_empty() {
            write!(f, "RXNEMPTY ")?;
        }
        write!(f, "}}")
    }
}

bitfield! {
    /// Error state of the module, at the bit positions of `CxTREC`
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct ErrorStatus(u32);

    /// Transmitter in bus-off state
    pub tx_bus_off, _: 21;
    /// Transmitter in error passive state
    pub tx_passive, _: 20;
    /// Receiver in error passive state
    pub rx_passive, _: 19;
    /// Transmitter in error warning state
    pub tx_warning, _: 18;
    /// Receiver in error warning state
    pub rx_warning, _: 17;
    /// Transmitter or receiver in error warning state
    pub warning, _: 16;
}

impl ErrorStatus {
    /// Raw register bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// `true` if no error bit is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for ErrorStatus {
    /// Keeps the error state bits of a `CxTREC` value
    fn from(value: u32) -> Self {
        Self(value & trec::STATUS_MASK)
    }
}

impl core::fmt::Debug for ErrorStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ErrorStatus {{ ")?;
        if self.tx_bus_off() {
            write!(f, "TXBO ")?;
        }
        if self.tx_passive() {
            write!(f, "TXBP ")?;
        }
        if self.rx_passive() {
            write!(f, "RXBP ")?;
        }
        if self.tx_warning() {
            write!(f, "TXWARN ")?;
        }
        if self.rx_warning() {
            write!(f, "RXWARN ")?;
        }
        if self.warning() {
            write!(f, "EWARN ")?;
        }
        write!(f, "}}")
    }
}

/// Completion events posted by [`Can::on_interrupt`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// The transmit FIFO drained
    Transmitted {
        /// FIFO that raised the interrupt
        fifo: usize,
    },
    /// Armed receive slots were filled
    Received {
        /// FIFO that raised the interrupt
        fifo: usize,
    },
    /// A bus or controller error was signalled
    Error(ErrorStatus),
}

impl<'a, P: CanId, D: Dependencies<P>, C: Capacities, R: RegisterAccess> Can<'a, P, D, C, R> {
    /// Handles the interrupt of the CAN module.
    ///
    /// Call this from the interrupt service routine of the peripheral. Errors
    /// are handled first and suppress the transfer handling of the same
    /// invocation; otherwise the receive FIFO is drained before transmit
    /// completion is handled. Every handled condition sets the state, posts an
    /// [`Event`] and invokes the registered callback.
    pub fn on_interrupt(&mut self) {
        let status = self.internals.regs.read(Reg::Int);

        if status & int::ERROR_FLAGS != 0 {
            // Re-arm the edge triggered error sources
            self.internals.regs.clear_bits(Reg::Int, int::ERROR_ENABLES);
            self.internals.dependencies.clear_interrupt_flag();
            self.internals.regs.set_bits(Reg::Int, int::ERROR_ENABLES);

            let errors = ErrorStatus::from(self.internals.regs.read(Reg::Trec));
            self.errors.store(errors.bits(), Ordering::Release);
            warn!("CAN error interrupt {}", errors);
            self.complete(State::Error, Event::Error(errors));
            return;
        }

        self.errors.store(0, Ordering::Release);

        if status & int::RBIF != 0 {
            let fifo = self.interrupting_fifo();
            if fifo < FIFO_COUNT {
                self.internals
                    .regs
                    .clear_bits(Reg::FifoInt(fifo), FifoInterruptSet::RX_NOT_EMPTY_ENABLE.bits());
                self.internals.dependencies.clear_interrupt_flag();
                self.drain_rx_fifo(fifo);
            }
            self.internals.regs.clear_bits(Reg::Int, int::RBIF | int::RBIE);
            self.complete(State::TransferComplete, Event::Received { fifo });
        }

        if status & int::TBIF != 0 {
            let fifo = self.interrupting_fifo();
            if fifo < FIFO_COUNT {
                self.internals
                    .regs
                    .clear_bits(Reg::FifoInt(fifo), FifoInterruptSet::TX_EMPTY_ENABLE.bits());
            }
            self.internals.dependencies.clear_interrupt_flag();
            self.internals.regs.clear_bits(Reg::Int, int::TBIF | int::TBIE);
            self.complete(State::TransferComplete, Event::Transmitted { fifo });
        }
    }

    /// Checks the flags of a FIFO interrupt register.
    ///
    /// Returns `true` if any flag of `flags` is set; `false` for FIFOs out of
    /// range.
    pub fn interrupt_flag(&self, fifo: usize, flags: FifoInterruptSet) -> bool {
        fifo < FIFO_COUNT && self.fifo_interrupts(fifo).intersects(flags)
    }

    pub(crate) fn fifo_interrupts(&self, fifo: usize) -> FifoInterruptSet {
        FifoInterruptSet(self.internals.regs.read(Reg::FifoInt(fifo)))
    }

    fn interrupting_fifo(&self) -> usize {
        (self.internals.regs.read(Reg::Vec) & vec::ICOD_MASK) as usize
    }

    fn complete(&mut self, state: State, event: Event) {
        self.state.store(state);
        if self.events.is_full() {
            self.events.pop_front();
        }
        // Space was made above
        let _ = self.events.push_back(event);

        if let Some(callback) = self.callback {
            (callback.function)(callback.context);
            self.state.store(State::Idle);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bus::RX_FIFO;
    use crate::id::{self, AtomicId};
    use crate::message::{FrameType, MessageBuilder};
    use crate::mock::{self, MockBus};
    use crate::rx_fifo::RxDestination;
    use core::cell::RefCell;
    use core::sync::atomic::{AtomicU8, AtomicUsize};
    use critical_section::Mutex;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn bus_off_error_interrupt() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        static CONTEXT: AtomicUsize = AtomicUsize::new(usize::MAX);
        fn callback(context: usize) {
            CALLS.fetch_add(1, Ordering::SeqCst);
            CONTEXT.store(context, Ordering::SeqCst);
        }

        let mut memory = mock::memory();
        let mut can = mock::can(&mut memory);
        can.callback_register(Some(callback), 42);
        can.internals.regs.poke(Reg::Trec, (1 << 21) | 0xff00);
        can.internals.regs.raise(int::CERRIF, 0);
        can.on_interrupt();

        let errors = can.error_status();
        assert!(errors.tx_bus_off());
        assert_eq!(errors.bits(), 1 << 21);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(CONTEXT.load(Ordering::SeqCst), 42);
        assert_eq!(can.state(), State::Idle);
        assert_eq!(can.next_event(), Some(Event::Error(errors)));
        assert_eq!(can.next_event(), None);
        // Error sources re-armed, line acknowledged
        assert_eq!(can.internals.regs.peek(Reg::Int) & int::ERROR_ENABLES, int::ERROR_ENABLES);
        assert_eq!(can.internals.dependencies.acknowledged, 1);
    }

    #[test]
    fn callback_runs_before_returning_to_idle() {
        fn callback(_: usize) {
            panic!("callback interrupted");
        }

        let mut memory = mock::memory();
        let mut can = mock::can(&mut memory);
        can.callback_register(Some(callback), 0);

        // A callback that never returns leaves the state it was called with
        can.internals.regs.poke(Reg::Trec, 1 << 21);
        can.internals.regs.raise(int::CERRIF, 0);
        assert!(catch_unwind(AssertUnwindSafe(|| can.on_interrupt())).is_err());
        assert_eq!(can.state(), State::Error);
        assert!(can.error_status().tx_bus_off());

        can.internals.regs.clear_bits(Reg::Int, int::ERROR_FLAGS);
        can.internals.regs.raise(int::TBIF | int::TBIE, 0);
        assert!(catch_unwind(AssertUnwindSafe(|| can.on_interrupt())).is_err());
        assert_eq!(can.state(), State::TransferComplete);
    }

    #[test]
    fn error_without_callback_stays_in_error() {
        let mut memory = mock::memory();
        let mut can = mock::can(&mut memory);
        can.internals.regs.poke(Reg::Trec, 1 << 16);
        can.internals.regs.raise(int::IVRIF, 0);
        can.on_interrupt();
        assert_eq!(can.state(), State::Error);
        assert!(can.is_busy());
        assert!(can.error_status().warning());
    }

    #[test]
    fn error_suppresses_transfer_handling() {
        let mut memory = mock::memory();
        let mut can = mock::can(&mut memory);
        can.internals.regs.raise(int::SERRIF | int::TBIF | int::TBIE, 0);
        can.on_interrupt();
        assert!(matches!(can.next_event(), Some(Event::Error(_))));
        assert_eq!(can.next_event(), None);
        assert_ne!(can.internals.regs.peek(Reg::Int) & int::TBIF, 0);
    }

    #[test]
    fn transfer_interrupt_clears_error_snapshot() {
        let mut memory = mock::memory();
        let mut can = mock::can(&mut memory);
        can.internals.regs.poke(Reg::Trec, 1 << 19);
        can.internals.regs.raise(int::CERRIF, 0);
        can.on_interrupt();
        assert!(can.error_status().rx_passive());

        can.internals.regs.clear_bits(Reg::Int, int::ERROR_FLAGS);
        can.internals.regs.raise(int::TBIF | int::TBIE, 0);
        can.on_interrupt();
        assert!(can.error_status().is_empty());
        assert_eq!(can.state(), State::TransferComplete);
        assert_eq!(can.internals.regs.peek(Reg::Int) & (int::TBIF | int::TBIE), 0);
    }

    #[test]
    fn receive_is_handled_before_transmit() {
        let mut memory = mock::memory();
        let mut can = mock::can(&mut memory);
        can.internals.regs.raise(int::RBIF | int::TBIF, 1);
        can.on_interrupt();
        assert_eq!(can.next_event(), Some(Event::Received { fifo: 1 }));
        assert_eq!(can.next_event(), Some(Event::Transmitted { fifo: 1 }));
        assert_eq!(can.internals.dependencies.acknowledged, 2);
    }

    #[test]
    fn receive_interrupt_from_unknown_fifo() {
        let id = AtomicId::new();
        let len = AtomicU8::new(0xff);
        let data: [AtomicU8; 8] = Default::default();
        let mut memory = mock::memory();
        let mut can = mock::can(&mut memory);
        can.receive(
            RxDestination {
                id: &id,
                len: &len,
                data: &data,
                timestamp: None,
            },
            RX_FIFO,
        )
        .unwrap();
        can.internals.regs.push_rx(RX_FIFO);

        can.internals.regs.raise(int::RBIF, 0x40);
        can.on_interrupt();
        assert_eq!(can.next_event(), Some(Event::Received { fifo: 0x40 }));
        assert_eq!(can.state(), State::TransferComplete);
        assert_eq!(can.internals.regs.peek(Reg::Int) & (int::RBIF | int::RBIE), 0);
        assert_eq!(can.internals.dependencies.acknowledged, 0);
        // The receive FIFO is left alone
        assert!(can.interrupt_flag(RX_FIFO, FifoInterruptSet::RX_NOT_EMPTY_ENABLE));
        assert!(can.interrupt_flag(RX_FIFO, FifoInterruptSet::RX_NOT_EMPTY));
        assert!(can.rx_registrations[RX_FIFO][0].is_some());
        assert_eq!(len.load(Ordering::Acquire), 0xff);
    }

    #[test]
    fn bus_is_shared_with_interrupt_context() {
        static BUS: Mutex<RefCell<Option<MockBus<'static>>>> = Mutex::new(RefCell::new(None));
        static RX_ID: AtomicId = AtomicId::new();
        static RX_LEN: AtomicU8 = AtomicU8::new(0);
        static RX_DATA: [AtomicU8; 8] = [const { AtomicU8::new(0) }; 8];

        let memory = Box::leak(Box::new(mock::memory()));
        let can = mock::can(memory);
        critical_section::with(|cs| {
            let mut bus = BUS.borrow_ref_mut(cs);
            let can = bus.insert(can);
            let destination = RxDestination {
                id: &RX_ID,
                len: &RX_LEN,
                data: &RX_DATA,
                timestamp: None,
            };
            can.receive(destination, RX_FIFO).unwrap();
            let index = can.internals.regs.push_rx(RX_FIFO);
            let message = MessageBuilder {
                id: id::from_raw(0x1234),
                frame_type: FrameType::Data(&[4, 5, 6]),
            }
            .build();
            can.internals.rx_memory[index].set(message);
            can.internals.regs.raise(int::RBIF, RX_FIFO as u32);
        });

        std::thread::spawn(|| {
            critical_section::with(|cs| {
                if let Some(can) = BUS.borrow_ref_mut(cs).as_mut() {
                    can.on_interrupt();
                }
            })
        })
        .join()
        .unwrap();

        assert_eq!(RX_LEN.load(Ordering::Acquire), 3);
        assert_eq!(RX_ID.load(Ordering::Relaxed), id::from_raw(0x1234));
        let data: Vec<u8> = RX_DATA[..3].iter().map(|b| b.load(Ordering::Relaxed)).collect();
        assert_eq!(data, [4, 5, 6]);
        let events = critical_section::with(|cs| {
            BUS.borrow_ref_mut(cs).as_mut().map(|can| can.next_event())
        });
        assert_eq!(events, Some(Some(Event::Received { fifo: RX_FIFO })));
    }

    #[test]
    fn event_queue_drops_oldest() {
        let mut memory = mock::memory();
        let mut can = mock::can(&mut memory);
        for _ in 0..crate::bus::EVENT_QUEUE_LEN + 2 {
            can.internals.regs.raise(int::TBIF, 0);
            can.on_interrupt();
        }
        can.internals.regs.raise(int::RBIF, 1);
        can.on_interrupt();
        let mut events = 0;
        let mut last = None;
        while let Some(event) = can.next_event() {
            events += 1;
            last = Some(event);
        }
        assert_eq!(events, crate::bus::EVENT_QUEUE_LEN);
        assert_eq!(last, Some(Event::Received { fifo: 1 }));
    }

    #[test]
    fn fifo_flags() {
        let mut memory = mock::memory();
        let can = mock::can(&mut memory);
        assert!(can.interrupt_flag(0, FifoInterruptSet::TX_NOT_FULL));
        assert!(can.interrupt_flag(0, FifoInterruptSet::TX_EMPTY | FifoInterruptSet::RX_FULL));
        assert!(!can.interrupt_flag(1, FifoInterruptSet::RX_NOT_EMPTY));
        assert!(!can.interrupt_flag(5, FifoInterruptSet::TX_NOT_FULL));
    }

    #[test]
    fn flag_formatting() {
        let set = FifoInterruptSet::TX_EMPTY | FifoInterruptSet::RX_NOT_EMPTY;
        assert_eq!(format!("{set:?}"), "FifoInterruptSet { TXEMPTY RXNEMPTY }");
        let errors = ErrorStatus::from(0xffff_ffff);
        assert_eq!(errors.bits(), trec::STATUS_MASK);
        assert_eq!(
            format!("{errors:?}"),
            "ErrorStatus { TXBO TXBP RXBP TXWARN RXWARN EWARN }"
        );
    }
}
