//! CAN bus configuration

use core::ops::RangeInclusive;
use fugit::HertzU32;

/// Default number of `CxCON` polls before a mode switch is considered failed
pub const DEFAULT_MODE_SWITCH_TIMEOUT: u32 = 100_000;

/// Configuration for the CAN bus
#[derive(Copy, Clone, Debug)]
pub struct CanConfig {
    /// Bit timing parameters
    pub nominal_timing: BitTiming,
    /// Timestamp configuration
    pub timestamp: Timestamp,
    /// Run in loopback mode instead of normal operation
    pub loopback: bool,
    /// Transmit priority of FIFO 0, 0 (lowest) to 3 (highest)
    pub tx_priority: u8,
    /// Number of `CxCON` polls to wait for a requested operation mode to be
    /// reached before giving up
    pub mode_switch_timeout: u32,
}

/// Bit-timing parameters
///
/// The bit time is determined by
/// - the time quantum `t_q`, which lasts `2 * prescaler` periods of the CAN
///   clock
/// - the number of time quanta in a bit time, determined by
///   `propagation_seg`, `phase_seg_1` and `phase_seg_2`
///
/// This struct expects *real* values, extra subtractions expected by the HW
/// register are handled within the driver.
///
/// Default values are:
/// - sjw: 3
/// - propagation_seg: 1
/// - phase_seg_1: 7
/// - phase_seg_2: 3
///
/// Default time quanta in a bit time is 12 (synchronization segment (1) +
/// propagation_seg + phase_seg_1 + phase_seg_2), which yields 500 kbit/s from
/// a 60 MHz CAN clock with a prescaler of 5.
#[derive(Copy, Clone, Debug)]
pub struct BitTiming {
    /// Synchronization jump width
    pub sjw: u8,
    /// Propagation time segment
    pub propagation_seg: u8,
    /// Phase time before the sample point
    pub phase_seg_1: u8,
    /// Time after the sample point
    pub phase_seg_2: u8,
    /// Sample the bus three times at the sample point
    pub triple_sampling: bool,
    /// The bitrate of the bus. The CAN clock must be divisible into time
    /// quanta such that a bit time is a whole number of time quanta.
    pub bitrate: HertzU32,
}

impl BitTiming {
    /// Create an instance
    ///
    /// Nominal bitrate value must be provided, all other settings come
    /// pre-populated with default values.
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            sjw: 3,
            propagation_seg: 1,
            phase_seg_1: 7,
            phase_seg_2: 3,
            triple_sampling: false,
            bitrate,
        }
    }
}

/// Timestamp counter configuration
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timestamp {
    /// Capture a timestamp for every received message
    pub enabled: bool,
    /// Timestamp timer prescaler. The timer increments every `prescaler + 1`
    /// system clock cycles.
    pub prescaler: u16,
}

impl Default for Timestamp {
    fn default() -> Self {
        Self {
            enabled: true,
            prescaler: 0,
        }
    }
}

/// Misconfigurations of [`BitTiming`].
#[derive(Debug, PartialEq, Eq)]
pub enum BitTimingError {
    /// SJW is outside the wrapped `RangeInclusive`
    SynchronizationJumpWidthOutOfRange(RangeInclusive<u32>),
    /// Propagation segment is outside the wrapped `RangeInclusive`
    PropagationSegOutOfRange(RangeInclusive<u32>),
    /// Phase segment 1 is outside the wrapped `RangeInclusive`
    PhaseSeg1OutOfRange(RangeInclusive<u32>),
    /// Phase segment 2 is outside the wrapped `RangeInclusive`
    PhaseSeg2OutOfRange(RangeInclusive<u32>),
    /// Total bit time quanta is outside the wrapped `RangeInclusive`
    BitTimeOutOfRange(RangeInclusive<u32>),
    /// Prescaler is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u32>),
    /// No valid prescaler could be found
    ///
    /// The following requirement must be met:
    /// - `can_clock` must be divisible by `2 * bitrate * bit_time_quanta`
    NoValidPrescaler {
        /// Provided CAN clock
        can_clock: HertzU32,
        /// Bitrate requested in [`BitTiming`]
        bitrate: HertzU32,
        /// Time quanta per bit selected by [`BitTiming`]
        bit_time_quanta: u32,
    },
}

/// Valid values of a BitTiming struct
#[derive(Clone)]
pub(crate) struct BitTimingRanges {
    sjw: RangeInclusive<u32>,
    propagation_seg: RangeInclusive<u32>,
    phase_seg_1: RangeInclusive<u32>,
    phase_seg_2: RangeInclusive<u32>,
    /// The bit time, in time quanta
    time_quanta_per_bit: RangeInclusive<u32>,
    prescaler: RangeInclusive<u32>,
}

pub(crate) const BIT_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    sjw: 1..=4,
    propagation_seg: 1..=8,
    phase_seg_1: 1..=8,
    phase_seg_2: 1..=8,
    time_quanta_per_bit: 8..=25,
    prescaler: 1..=64,
};

impl BitTiming {
    /// Returns the number of time quanta that make up one bit time, `t_bit /
    /// t_q`
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.propagation_seg)
            + u32::from(self.phase_seg_1)
            + u32::from(self.phase_seg_2)
    }

    fn check(&self, valid: &BitTimingRanges) -> Result<(), BitTimingError> {
        if !valid.sjw.contains(&self.sjw.into()) {
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(
                valid.sjw.clone(),
            ))
        } else if !valid.propagation_seg.contains(&self.propagation_seg.into()) {
            Err(BitTimingError::PropagationSegOutOfRange(
                valid.propagation_seg.clone(),
            ))
        } else if !valid.phase_seg_1.contains(&self.phase_seg_1.into()) {
            Err(BitTimingError::PhaseSeg1OutOfRange(
                valid.phase_seg_1.clone(),
            ))
        } else if !valid.phase_seg_2.contains(&self.phase_seg_2.into()) {
            Err(BitTimingError::PhaseSeg2OutOfRange(
                valid.phase_seg_2.clone(),
            ))
        } else if !valid
            .time_quanta_per_bit
            .contains(&self.time_quanta_per_bit())
        {
            Err(BitTimingError::BitTimeOutOfRange(
                valid.time_quanta_per_bit.clone(),
            ))
        } else {
            Ok(())
        }
    }

    pub(crate) fn prescaler(
        &self,
        f_can: HertzU32,
        valid: &BitTimingRanges,
    ) -> Result<u32, BitTimingError> {
        self.check(valid)?;
        let f_out = self.bitrate;
        let bit_time_quanta = self.time_quanta_per_bit();
        // One time quantum spans two CAN clock periods per prescaler step
        let f_q = f_out.to_Hz() * bit_time_quanta * 2;
        match f_can.to_Hz().checked_rem(f_q) {
            Some(0) => {
                let prescaler = f_can.to_Hz() / f_q;
                if !valid.prescaler.contains(&prescaler) {
                    Err(BitTimingError::PrescalerOutOfRange(valid.prescaler.clone()))
                } else {
                    Ok(prescaler)
                }
            }
            _ => Err(BitTimingError::NoValidPrescaler {
                can_clock: f_can,
                bitrate: f_out,
                bit_time_quanta,
            }),
        }
    }
}

impl CanConfig {
    /// Create an instance
    ///
    /// Nominal bitrate value must be provided, all other settings come
    /// pre-populated with default values.
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            nominal_timing: BitTiming::new(bitrate),
            timestamp: Default::default(),
            loopback: false,
            tx_priority: 0,
            mode_switch_timeout: DEFAULT_MODE_SWITCH_TIMEOUT,
        }
    }
}
