//! Memory management for the RAM interface between core and peripheral.
//!
//! The CAN module keeps its FIFOs in system RAM. `CxFIFOBA` holds the
//! physical address of the first message buffer and the FIFOs follow each
//! other in FIFO number order, each `FSIZE + 1` buffers long.
use crate::message::RawMessage;
use core::mem::MaybeUninit;
use generic_array::{
    typenum::{consts::*, IsLessOrEqual, LeEq, NonZero, Same, Unsigned},
    ArrayLength, GenericArray,
};
use vcell::VolatileCell;

/// Size of a single message buffer in bytes
pub const MESSAGE_SIZE: usize = core::mem::size_of::<RawMessage>();

/// Element capacities
pub trait Capacities {
    /// Number of message buffers in the transmit FIFO (FIFO 0)
    type TxFifo: FifoLength;
    /// Number of message buffers in the receive FIFO (FIFO 1)
    type RxFifo: FifoLength;
}

/// [`generic_array::ArrayLength`] valid for a hardware FIFO: between 1 and
/// 32 message buffers.
pub trait FifoLength: ArrayLength<VolatileCell<RawMessage>> + Unsigned {}
impl<N> FifoLength for N
where
    N: ArrayLength<VolatileCell<RawMessage>> + Unsigned + NonZero + IsLessOrEqual<U32>,
    LeEq<N, U32>: Same<True>,
{
}

#[repr(C, align(32))]
pub(crate) struct SharedMemoryInner<C: Capacities> {
    pub(crate) tx_fifo: GenericArray<VolatileCell<RawMessage>, C::TxFifo>,
    pub(crate) rx_fifo: GenericArray<VolatileCell<RawMessage>, C::RxFifo>,
}

/// Memory shared between the peripheral and core. Provide a struct `C` that
/// implements [`Capacities`] to select the sizes of the FIFOs, then construct
/// this using `SharedMemory::<C>::new()`.
///
/// The buffers must be reachable by the CAN module through the system bus;
/// on parts with a data cache they have to be placed in a coherent
/// (uncached) section.
pub struct SharedMemory<C: Capacities>(MaybeUninit<SharedMemoryInner<C>>);

impl<C: Capacities> SharedMemory<C> {
    pub(crate) fn init(&mut self) -> &mut SharedMemoryInner<C> {
        self.0 = MaybeUninit::zeroed();
        // Safety: All bits 0 is a valid value for all the contained arrays.
        unsafe { self.0.assume_init_mut() }
    }

    /// All initialization is handled by the type that uses the memory, so this
    /// type can safely be assigned to a link_section that is not
    /// initialized by the system to control its position in memory.
    pub const fn new() -> Self {
        Self(MaybeUninit::uninit())
    }
}

impl<C: Capacities> Default for SharedMemory<C> {
    fn default() -> Self {
        Self::new()
    }
}
