//! Simulated CAN module for the unit tests
//!
//! Registers are plain memory except for the parts of the module the driver
//! depends on: mode switches take effect after a configurable number of
//! `CxCON` reads, `UINC` moves the FIFO index, the FIFO flags follow the
//! FIFO fill level and configuration registers ignore writes outside of
//! configuration mode.

use crate::bus::{Can, CanConfigurable, OperationMode, FIFO_COUNT};
use crate::interrupt::FifoInterruptSet;
use crate::messageram::{Capacities, SharedMemory, MESSAGE_SIZE};
use crate::reg::{con, fifocon, Reg, RegisterAccess};
use core::cell::{Cell, RefCell};
use fugit::{HertzU32, RateExtU32};
use generic_array::typenum::consts::{U2, U3};
use pic32can_core::{CanId, Dependencies};

const REGISTER_COUNT: usize = 0x400 / 0x10;

pub(crate) enum MockCan {}

unsafe impl CanId for MockCan {
    const ADDRESS: *const () = core::ptr::null();
}

pub(crate) struct Caps;

impl Capacities for Caps {
    type TxFifo = U2;
    type RxFifo = U3;
}

pub(crate) type MockBus<'a> = Can<'a, MockCan, MockDependencies, Caps, MockRegisters>;

#[derive(Default)]
pub(crate) struct MockDependencies {
    pub(crate) interrupt_enabled: bool,
    pub(crate) acknowledged: usize,
}

unsafe impl Dependencies<MockCan> for MockDependencies {
    fn can_clock(&self) -> HertzU32 {
        60.MHz()
    }

    fn physical_address(&self, address: *const ()) -> u32 {
        (address as usize as u32) & 0x1fff_ffff
    }

    fn enable_interrupt(&mut self) {
        self.interrupt_enabled = true;
    }

    fn disable_interrupt(&mut self) {
        self.interrupt_enabled = false;
    }

    fn clear_interrupt_flag(&mut self) {
        self.acknowledged += 1;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Access {
    Write,
    Clear,
    Set,
}

#[derive(Copy, Clone, Default)]
struct FifoState {
    index: u32,
    count: u32,
}

pub(crate) struct MockRegisters {
    values: RefCell<[u32; REGISTER_COUNT]>,
    fifos: RefCell<[FifoState; FIFO_COUNT]>,
    ops: RefCell<Vec<(Reg, Access, u32)>>,
    mode_latency: Cell<u32>,
    pending_polls: Cell<u32>,
    stuck: Cell<bool>,
}

impl MockRegisters {
    pub(crate) fn new() -> Self {
        Self {
            values: RefCell::new([0; REGISTER_COUNT]),
            fifos: RefCell::new([FifoState::default(); FIFO_COUNT]),
            ops: RefCell::new(Vec::new()),
            mode_latency: Cell::new(0),
            pending_polls: Cell::new(0),
            stuck: Cell::new(false),
        }
    }

    /// Number of `CxCON` reads before a requested mode is reached
    pub(crate) fn set_mode_latency(&self, polls: u32) {
        self.mode_latency.set(polls);
    }

    /// Never reach a requested mode
    pub(crate) fn set_stuck(&self, stuck: bool) {
        self.stuck.set(stuck);
    }

    /// Register writes, in order
    pub(crate) fn ops(&self) -> Vec<(Reg, Access, u32)> {
        self.ops.borrow().clone()
    }

    pub(crate) fn clear_ops(&self) {
        self.ops.borrow_mut().clear();
    }

    /// Reads a register without side effects
    pub(crate) fn peek(&self, reg: Reg) -> u32 {
        match reg {
            Reg::FifoInt(n) => self.stored(reg) | self.fifo_flags(n),
            Reg::FifoUa(n) => {
                let index = self.fifo_start(n) + self.fifos.borrow()[n].index;
                self.stored(Reg::FifoBa) + index * MESSAGE_SIZE as u32
            }
            Reg::FifoCi(n) => self.fifos.borrow()[n].index,
            _ => self.stored(reg),
        }
    }

    /// Writes a register without logging or side effects
    pub(crate) fn poke(&self, reg: Reg, value: u32) {
        self.values.borrow_mut()[reg.offset() / 0x10] = value;
    }

    /// Sets `CxINT` flags and the interrupt code
    pub(crate) fn raise(&self, flags: u32, icod: u32) {
        self.poke(Reg::Int, self.stored(Reg::Int) | flags);
        self.poke(Reg::Vec, icod);
    }

    /// `OPMOD` field
    pub(crate) fn current_mode(&self) -> u32 {
        (self.stored(Reg::Con) & con::OPMOD_MASK) >> con::OPMOD_POS
    }

    pub(crate) fn set_ci(&self, fifo: usize, index: u32) {
        self.fifos.borrow_mut()[fifo].index = index;
    }

    /// Stores an incoming message in a receive FIFO. Returns the index of the
    /// message buffer within the FIFO.
    pub(crate) fn push_rx(&self, fifo: usize) -> usize {
        let depth = self.fifo_depth(fifo);
        let mut fifos = self.fifos.borrow_mut();
        let state = &mut fifos[fifo];
        let head = (state.index + state.count) % depth;
        state.count = (state.count + 1).min(depth);
        head as usize
    }

    fn stored(&self, reg: Reg) -> u32 {
        self.values.borrow()[reg.offset() / 0x10]
    }

    fn log(&self, reg: Reg, access: Access, value: u32) {
        self.ops.borrow_mut().push((reg, access, value));
    }

    fn fifo_depth(&self, fifo: usize) -> u32 {
        ((self.stored(Reg::FifoCon(fifo)) & fifocon::FSIZE_MASK) >> fifocon::FSIZE_POS) + 1
    }

    fn fifo_start(&self, fifo: usize) -> u32 {
        (0..fifo).map(|n| self.fifo_depth(n)).sum()
    }

    fn is_tx(&self, fifo: usize) -> bool {
        self.stored(Reg::FifoCon(fifo)) & fifocon::TXEN != 0
    }

    fn fifo_flags(&self, fifo: usize) -> u32 {
        let depth = self.fifo_depth(fifo);
        let count = self.fifos.borrow()[fifo].count;
        let mut flags = 0;
        if self.is_tx(fifo) {
            if count < depth {
                flags |= FifoInterruptSet::TX_NOT_FULL.bits();
            }
            if count == 0 {
                flags |= FifoInterruptSet::TX_EMPTY.bits();
            }
        } else {
            if count > 0 {
                flags |= FifoInterruptSet::RX_NOT_EMPTY.bits();
            }
            if count == depth {
                flags |= FifoInterruptSet::RX_FULL.bits();
            }
        }
        flags
    }

    fn increment(&self, fifo: usize) {
        let depth = self.fifo_depth(fifo);
        let tx = self.is_tx(fifo);
        let mut fifos = self.fifos.borrow_mut();
        let state = &mut fifos[fifo];
        state.index = (state.index + 1) % depth;
        state.count = if tx {
            (state.count + 1).min(depth)
        } else {
            state.count.saturating_sub(1)
        };
    }

    fn in_configuration(&self) -> bool {
        self.current_mode() == OperationMode::Configuration as u32
    }

    fn advance_mode(&self) {
        if self.stuck.get() {
            return;
        }
        let value = self.stored(Reg::Con);
        let requested = (value & con::REQOP_MASK) >> con::REQOP_POS;
        if requested == self.current_mode() {
            return;
        }
        match self.pending_polls.get() {
            0 => self.poke(
                Reg::Con,
                (value & !con::OPMOD_MASK) | (requested << con::OPMOD_POS),
            ),
            n => self.pending_polls.set(n - 1),
        }
    }
}

impl RegisterAccess for MockRegisters {
    fn read(&self, reg: Reg) -> u32 {
        if reg == Reg::Con {
            self.advance_mode();
        }
        self.peek(reg)
    }

    fn write(&self, reg: Reg, value: u32) {
        self.log(reg, Access::Write, value);
        match reg {
            Reg::Con => {
                let old = self.stored(Reg::Con);
                if (old ^ value) & con::REQOP_MASK != 0 {
                    self.pending_polls.set(self.mode_latency.get());
                }
                self.poke(
                    reg,
                    (value & !con::OPMOD_MASK) | (old & con::OPMOD_MASK),
                );
            }
            Reg::Cfg | Reg::FifoBa | Reg::RxM(_) if !self.in_configuration() => {}
            _ => self.poke(reg, value),
        }
    }

    fn clear_bits(&self, reg: Reg, mask: u32) {
        self.log(reg, Access::Clear, mask);
        self.poke(reg, self.stored(reg) & !mask);
    }

    fn set_bits(&self, reg: Reg, mask: u32) {
        self.log(reg, Access::Set, mask);
        match reg {
            Reg::FifoCon(n) if mask & fifocon::UINC != 0 => {
                self.increment(n);
                self.poke(reg, self.stored(reg) | (mask & !fifocon::UINC));
            }
            _ => self.poke(reg, self.stored(reg) | mask),
        }
    }
}

pub(crate) fn memory() -> SharedMemory<Caps> {
    SharedMemory::new()
}

pub(crate) fn configurable(
    memory: &mut SharedMemory<Caps>,
) -> CanConfigurable<'_, MockCan, MockDependencies, Caps, MockRegisters> {
    CanConfigurable::with_registers(
        500.kHz(),
        MockDependencies::default(),
        MockRegisters::new(),
        memory,
    )
    .unwrap()
}

pub(crate) fn can(memory: &mut SharedMemory<Caps>) -> MockBus<'_> {
    configurable(memory).finalize().unwrap()
}
