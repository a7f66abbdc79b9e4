//! Bring-up, mode handling and status of the CAN module

use crate::config::{BitTimingError, CanConfig, BIT_TIMING_RANGES};
use crate::interrupt::state::{AtomicState, State};
use crate::interrupt::{ErrorStatus, Event};
use crate::messageram::{Capacities, SharedMemory, MESSAGE_SIZE};
use crate::message::RawMessage;
use crate::reg::{cfg, con, fifocon, fltcon, int, tmr, trec, Mmio, Reg, RegisterAccess};
use crate::rx_fifo::RxDestination;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};
use fugit::HertzU32;
use generic_array::typenum::Unsigned;
use heapless::Deque;
use pic32can_core::{CanId, Dependencies};
use vcell::VolatileCell;

/// Number of FIFOs used by the driver
pub const FIFO_COUNT: usize = 2;
/// FIFO used for transmission
pub const TX_FIFO: usize = 0;
/// FIFO receiving the messages accepted by the filters
pub const RX_FIFO: usize = 1;
/// Number of acceptance filters used by the driver
pub const FILTER_COUNT: usize = 1;
/// Number of acceptance masks of the module
pub const MASK_COUNT: usize = 4;
/// Largest number of message buffers a single FIFO can hold
pub const FIFO_MESSAGE_BUFFER_MAX: usize = 32;
/// Capacity of the event queue
pub const EVENT_QUEUE_LEN: usize = 8;

/// Operation modes of the module, as found in `REQOP` and `OPMOD`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OperationMode {
    /// Normal operation
    Normal = 0,
    /// Module disabled
    Disable = 1,
    /// Internal loopback
    Loopback = 2,
    /// Listen only
    ListenOnly = 3,
    /// Configuration; required to change bit timing, FIFOs and masks
    Configuration = 4,
    /// Listen to all messages, filters are bypassed
    ListenAll = 7,
}

impl OperationMode {
    fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            0 => OperationMode::Normal,
            1 => OperationMode::Disable,
            2 => OperationMode::Loopback,
            3 => OperationMode::ListenOnly,
            4 => OperationMode::Configuration,
            7 => OperationMode::ListenAll,
            _ => return None,
        })
    }
}

/// The module did not reach the requested operation mode in time
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModeSwitchTimeout {
    /// Mode that was requested
    pub requested: OperationMode,
}

/// Errors that may occur during configuration
#[derive(Debug)]
pub enum ConfigurationError {
    /// Problems with the bit timing configuration
    BitTiming(BitTimingError),
    /// The module did not change its operation mode
    ModeSwitch(ModeSwitchTimeout),
    /// Transmit priority is not in the range [0, 3]
    InvalidTxPriority,
}

impl From<BitTimingError> for ConfigurationError {
    fn from(value: BitTimingError) -> Self {
        Self::BitTiming(value)
    }
}

impl From<ModeSwitchTimeout> for ConfigurationError {
    fn from(value: ModeSwitchTimeout) -> Self {
        Self::ModeSwitch(value)
    }
}

/// An operation that consumes the bus failed.
///
/// The bus, or its dependencies if the bus was never brought up, is handed
/// back so that it can be configured again or released.
pub struct BusError<E, T> {
    /// What went wrong
    pub error: E,
    /// The value the operation was called on
    pub bus: T,
}

impl<E: Debug, T> Debug for BusError<E, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Index is out of bounds
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfBounds;

/// Transmit and receive error counters from `CxTREC`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorCounters {
    /// Transmit error counter
    pub tx: u8,
    /// Receive error counter
    pub rx: u8,
}

impl From<u32> for ErrorCounters {
    fn from(value: u32) -> Self {
        Self {
            tx: ((value & trec::TERRCNT_MASK) >> trec::TERRCNT_POS) as u8,
            rx: (value & trec::RERRCNT_MASK) as u8,
        }
    }
}

/// Common CANbus functionality
pub trait CanBus {
    /// Read error counters
    fn error_counters(&self) -> ErrorCounters;
    /// Read the current error state bits. Unlike
    /// [`Can::error_status`] this is not a snapshot taken by the interrupt
    /// handler.
    fn bus_status(&self) -> ErrorStatus;
    /// Get current time
    fn timestamp_counter(&self) -> u16;
    /// Operation mode the module is currently in, `None` for reserved codes
    fn operation_mode(&self) -> Option<OperationMode>;
}

#[derive(Copy, Clone)]
pub(crate) struct Callback {
    pub(crate) function: fn(usize),
    pub(crate) context: usize,
}

/// A CAN bus that is not in configuration mode.
///
/// Bus errors do not stop the driver; they are reported through
/// [`Can::error_status`], the registered callback and [`Can::next_event`].
/// Recovering from bus-off is left to the application.
pub struct Can<'a, P, D, C: Capacities, R = Mmio<P>> {
    /// Implementation details. Public for access to the mode control in
    /// [`Internals`].
    pub internals: Internals<'a, P, D, R>,
    pub(crate) rx_registrations:
        [[Option<RxDestination<'a>>; FIFO_MESSAGE_BUFFER_MAX]; FIFO_COUNT],
    pub(crate) state: AtomicState,
    pub(crate) errors: AtomicU32,
    pub(crate) callback: Option<Callback>,
    pub(crate) events: Deque<Event, EVENT_QUEUE_LEN>,
    _capacities: PhantomData<C>,
}

/// Implementation details.
pub struct Internals<'a, P, D, R> {
    pub(crate) regs: R,
    pub(crate) dependencies: D,
    pub(crate) config: CanConfig,
    /// Mode entered when leaving configuration mode
    pub(crate) operating_mode: OperationMode,
    /// Physical address programmed into `CxFIFOBA`
    pub(crate) fifo_base: u32,
    /// Message buffers of the transmit FIFO
    pub(crate) tx_memory: &'a mut [VolatileCell<RawMessage>],
    /// Message buffers of the receive FIFO, following the transmit FIFO
    pub(crate) rx_memory: &'a mut [VolatileCell<RawMessage>],
    _peripheral: PhantomData<P>,
}

impl<'a, P: CanId, D: Dependencies<P>, R: RegisterAccess>
    Internals<'a, P, D, R>
{
    /// Operation mode reported by `OPMOD`
    pub fn mode(&self) -> Option<OperationMode> {
        let bits = (self.regs.read(Reg::Con) & con::OPMOD_MASK) >> con::OPMOD_POS;
        OperationMode::from_bits(bits)
    }

    /// Requests an operation mode and waits until the module reports it.
    ///
    /// The wait is bounded by [`CanConfig::mode_switch_timeout`] polls.
    /// Pending transmissions and receptions stall while the module is in
    /// configuration mode.
    pub fn set_mode(&mut self, mode: OperationMode) -> Result<(), ModeSwitchTimeout> {
        self.regs.modify(Reg::Con, |w| {
            (w & !con::REQOP_MASK) | ((mode as u32) << con::REQOP_POS)
        });
        for _ in 0..=self.config.mode_switch_timeout {
            if self.mode() == Some(mode) {
                debug!("CAN mode switched to {}", mode);
                return Ok(());
            }
        }
        warn!("CAN mode switch to {} timed out", mode);
        Err(ModeSwitchTimeout { requested: mode })
    }

    /// Message buffer the FIFO's user address points to
    pub(crate) fn user_slot(&self, fifo: usize) -> Option<&VolatileCell<RawMessage>> {
        let offset = self.regs.read(Reg::FifoUa(fifo)).checked_sub(self.fifo_base)?;
        let index = offset as usize / MESSAGE_SIZE;
        match index.checked_sub(self.tx_memory.len()) {
            None => self.tx_memory.get(index),
            Some(index) => self.rx_memory.get(index),
        }
    }

    /// Number of message buffers configured for the FIFO
    pub(crate) fn fifo_depth(&self, fifo: usize) -> usize {
        let con = self.regs.read(Reg::FifoCon(fifo));
        ((con & fifocon::FSIZE_MASK) >> fifocon::FSIZE_POS) as usize + 1
    }
}

/// A CAN bus in configuration mode. Before messages can be sent and received,
/// it needs to be [`Self::finalize`]d.
pub struct CanConfigurable<'a, P, D, C: Capacities, R = Mmio<P>>(
    /// The module is in configuration mode while this is wrapped.
    Can<'a, P, D, C, R>,
);

impl<'a, P: CanId, D: Dependencies<P>, C: Capacities> CanConfigurable<'a, P, D, C> {
    /// Create new can peripheral.
    ///
    /// Turns the module on and puts it into configuration mode. The returned
    /// peripheral is not operational; use [`Self::finalize`] to finish
    /// configuration and start transmitting and receiving.
    pub fn new(
        bitrate: HertzU32,
        dependencies: D,
        memory: &'a mut SharedMemory<C>,
    ) -> Result<Self, BusError<ModeSwitchTimeout, D>> {
        // Safety:
        // Since `dependencies` field implies ownership of the HW register pointed to by
        // `P: CanId`, `regs` has a unique access to it
        let regs = unsafe { Mmio::<P>::new() };
        Self::with_registers(bitrate, dependencies, regs, memory)
    }
}

impl<'a, P: CanId, D: Dependencies<P>, C: Capacities, R: RegisterAccess>
    CanConfigurable<'a, P, D, C, R>
{
    /// Create new can peripheral on top of an arbitrary register block.
    ///
    /// If the module does not enter configuration mode, it is turned off
    /// again and the dependencies are returned.
    pub fn with_registers(
        bitrate: HertzU32,
        dependencies: D,
        regs: R,
        memory: &'a mut SharedMemory<C>,
    ) -> Result<Self, BusError<ModeSwitchTimeout, D>> {
        let memory = memory.init();
        let fifo_base = dependencies.physical_address(&*memory as *const _ as *const ());

        let mut internals = Internals {
            regs,
            dependencies,
            config: CanConfig::new(bitrate),
            operating_mode: OperationMode::Normal,
            fifo_base,
            tx_memory: memory.tx_fifo.as_mut_slice(),
            rx_memory: memory.rx_fifo.as_mut_slice(),
            _peripheral: PhantomData,
        };
        internals.regs.set_bits(Reg::Con, con::ON);
        if let Err(error) = internals.set_mode(OperationMode::Configuration) {
            internals.regs.clear_bits(Reg::Con, con::ON);
            return Err(BusError {
                error,
                bus: internals.dependencies,
            });
        }
        Self::apply_ram_config(&internals.regs, fifo_base);

        Ok(Self(Can {
            internals,
            rx_registrations: [[None; FIFO_MESSAGE_BUFFER_MAX]; FIFO_COUNT],
            state: AtomicState::new(State::Idle),
            errors: AtomicU32::new(0),
            callback: None,
            events: Deque::new(),
            _capacities: PhantomData,
        }))
    }

    /// Raw access to the registers.
    ///
    /// # Safety
    /// The abstraction assumes that it has exclusive ownership of the
    /// registers. Direct access can break such assumptions.
    pub unsafe fn registers(&self) -> &R {
        &self.0.internals.regs
    }

    /// Allows changing the configuration applied by [`Self::finalize`].
    pub fn config(&mut self) -> &mut CanConfig {
        &mut self.0.internals.config
    }

    /// Program the message RAM location and the FIFO sizes
    fn apply_ram_config(regs: &R, fifo_base: u32) {
        regs.write(Reg::FifoBa, fifo_base);
        regs.write(
            Reg::FifoCon(TX_FIFO),
            ((C::TxFifo::U32 - 1) << fifocon::FSIZE_POS) | fifocon::TXEN,
        );
        regs.write(
            Reg::FifoCon(RX_FIFO),
            (C::RxFifo::U32 - 1) << fifocon::FSIZE_POS,
        );
    }

    /// Apply parameters from a bus config struct
    fn apply_bus_config(&mut self) -> Result<(), ConfigurationError> {
        let internals = &mut self.0.internals;
        let config = &internals.config;
        let regs = &internals.regs;
        if config.tx_priority > 3 {
            return Err(ConfigurationError::InvalidTxPriority);
        }

        let timing = &config.nominal_timing;
        let prescaler = timing.prescaler(internals.dependencies.can_clock(), &BIT_TIMING_RANGES)?;
        // Every field holds its value minus one
        let mut cfg_word = ((prescaler - 1) & cfg::BRP_MASK)
            | ((u32::from(timing.sjw) - 1) << cfg::SJW_POS)
            | ((u32::from(timing.propagation_seg) - 1) << cfg::PRSEG_POS)
            | ((u32::from(timing.phase_seg_1) - 1) << cfg::SEG1PH_POS)
            | ((u32::from(timing.phase_seg_2) - 1) << cfg::SEG2PH_POS)
            | cfg::SEG2PHTS;
        if timing.triple_sampling {
            cfg_word |= cfg::SAM;
        }
        regs.write(Reg::Cfg, cfg_word);

        regs.modify(Reg::FifoCon(TX_FIFO), |w| {
            (w & !fifocon::TXPRI_MASK) | u32::from(config.tx_priority)
        });

        // Filter 0 routes to the receive FIFO through mask 0
        regs.write(Reg::RxF(0), 0);
        regs.set_bits(
            Reg::FltCon(0),
            fltcon::fsel(0, RX_FIFO as u32) | fltcon::msel(0, 0) | fltcon::flten(0),
        );
        regs.write(Reg::RxM(0), 0);

        if config.timestamp.enabled {
            regs.set_bits(Reg::Con, con::CANCAP);
        } else {
            regs.clear_bits(Reg::Con, con::CANCAP);
        }
        regs.write(
            Reg::Tmr,
            u32::from(config.timestamp.prescaler) & tmr::CANTSPRE_MASK,
        );

        internals.operating_mode = if config.loopback {
            OperationMode::Loopback
        } else {
            OperationMode::Normal
        };

        internals.dependencies.enable_interrupt();
        regs.set_bits(Reg::Int, int::ERROR_ENABLES);
        Ok(())
    }

    /// Locks the configuration and enters the operating mode.
    ///
    /// On failure the module stays in configuration mode with its interrupt
    /// line disabled.
    pub fn finalize(
        mut self,
    ) -> Result<Can<'a, P, D, C, R>, BusError<ConfigurationError, Self>> {
        if let Err(error) = self.apply_bus_config() {
            return Err(BusError { error, bus: self });
        }

        let mode = self.0.internals.operating_mode;
        if let Err(timeout) = self.0.internals.set_mode(mode) {
            self.0.internals.dependencies.disable_interrupt();
            return Err(BusError {
                error: timeout.into(),
                bus: self,
            });
        }

        let can = self.0;
        can.state.store(State::Idle);
        can.errors.store(0, Ordering::Release);
        Ok(can)
    }
}

impl<'a, P: CanId, D: Dependencies<P>, C: Capacities, R: RegisterAccess> Can<'a, P, D, C, R> {
    /// Raw access to the registers.
    ///
    /// # Safety
    /// The abstraction assumes that it has exclusive ownership of the
    /// registers. Direct access can break such assumptions.
    pub unsafe fn registers(&self) -> &R {
        &self.internals.regs
    }

    /// Returns to configuration mode.
    ///
    /// The interrupt line is disabled until the bus is finalized again.
    /// Armed receive slots are forgotten. If the module does not enter
    /// configuration mode, the interrupt line is enabled again and the bus is
    /// returned unchanged.
    pub fn configure(
        mut self,
    ) -> Result<CanConfigurable<'a, P, D, C, R>, BusError<ModeSwitchTimeout, Self>> {
        self.internals.dependencies.disable_interrupt();
        if let Err(error) = self.internals.set_mode(OperationMode::Configuration) {
            self.internals.dependencies.enable_interrupt();
            return Err(BusError { error, bus: self });
        }
        self.rx_registrations = [[None; FIFO_MESSAGE_BUFFER_MAX]; FIFO_COUNT];
        Ok(CanConfigurable(self))
    }

    /// Turns the module off and returns the dependencies.
    pub fn release(mut self) -> D {
        self.internals.dependencies.disable_interrupt();
        self.internals.regs.clear_bits(Reg::Int, int::ERROR_ENABLES);
        self.internals.regs.clear_bits(Reg::Con, con::ON);
        self.internals.dependencies
    }

    /// Current activity of the driver
    pub fn state(&self) -> State {
        self.state.load()
    }

    /// `true` unless the driver is [`State::Idle`]
    pub fn is_busy(&self) -> bool {
        self.state() != State::Idle
    }

    /// Error state captured by the last error interrupt.
    ///
    /// Cleared by the next interrupt that does not signal an error.
    pub fn error_status(&self) -> ErrorStatus {
        ErrorStatus::from(self.errors.load(Ordering::Acquire))
    }

    /// Registers the function called from the interrupt handler on every
    /// completed transfer and on errors.
    ///
    /// `context` is passed to the function unchanged. Passing `None` leaves
    /// the current registration in place.
    pub fn callback_register(&mut self, function: Option<fn(usize)>, context: usize) {
        if let Some(function) = function {
            self.callback = Some(Callback { function, context });
        }
    }

    /// Takes the oldest event posted by the interrupt handler.
    ///
    /// The queue holds [`EVENT_QUEUE_LEN`] events; older events are
    /// discarded when it overflows.
    pub fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }
}

impl<P: CanId, D: Dependencies<P>, C: Capacities, R: RegisterAccess> CanBus
    for Can<'_, P, D, C, R>
{
    fn error_counters(&self) -> ErrorCounters {
        self.internals.regs.read(Reg::Trec).into()
    }

    fn bus_status(&self) -> ErrorStatus {
        ErrorStatus::from(self.internals.regs.read(Reg::Trec))
    }

    fn timestamp_counter(&self) -> u16 {
        (self.internals.regs.read(Reg::Tmr) >> tmr::CANTS_POS) as u16
    }

    fn operation_mode(&self) -> Option<OperationMode> {
        self.internals.mode()
    }
}
