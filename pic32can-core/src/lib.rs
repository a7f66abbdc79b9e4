#![no_std]
#![warn(missing_docs)]

//! `pic32can-core` provides the thin integration layer between the platform
//! independent [`pic32can`] driver and a device specific HAL (in
//! documentation also referred to as _target HAL_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs.
//!
//! Integrators are responsible for soundness of trait implementations and
//! conforming to their respective safety prerequisites.
//!
//! [`pic32can`]: <https://docs.rs/crate/pic32can/>

pub use fugit;

/// Trait representing CAN peripheral identity
///
/// Types implementing this trait are marker types identifying a specific
/// instance of the CAN module available on the device (`CAN1` .. `CAN4` on
/// the larger parts). It only conveys *where* the register block is located,
/// not that it may be accessed. The latter is expressed by [`Dependencies`].
///
/// # Safety
/// `CanId::ADDRESS` points to the first register (`CxCON`) of a CAN module.
///
/// # Examples
/// ```no_run
/// use pic32can_core::CanId;
///
/// pub enum Can1 {}
///
/// unsafe impl CanId for Can1 {
///     const ADDRESS: *const () = 0xBF88_0000 as *const _;
/// }
/// ```
pub unsafe trait CanId {
    /// Static address of the register block controlling the CAN module
    const ADDRESS: *const ();
}

/// Trait representing CAN peripheral dependencies
///
/// Structs implementing [`Dependencies`] should
/// - enclose all object representable dependencies of [`CanId`] (clocks,
///   pins, the PAC peripheral) and release them upon destruction
/// - be constructible only when it is sound to interact with the CAN module
/// - be a singleton for a given [`CanId`]
///
/// Apart from clocks, the CAN module relies on two pieces of the device that
/// live outside of its register block: the interrupt controller (the module
/// raises a single interrupt line) and the system bus address translation
/// used for the message RAM (the module addresses it physically while the CPU
/// uses virtual addresses). Both are provided through this trait.
///
/// # Safety
/// While a [`Dependencies`] instance exists
/// - CAN related clocks must not change
/// - CAN related pin modes must not change
/// - the register block must not be accessible by other parts of the target
///   HAL
/// - [`Dependencies::physical_address`] must return the address the CAN
///   module uses to reach the memory pointed to by its argument
pub unsafe trait Dependencies<Id: CanId> {
    /// Frequency of the clock the CAN module derives its time quanta from.
    ///
    /// One time quantum lasts `2 * prescaler` periods of this clock.
    fn can_clock(&self) -> fugit::HertzU32;

    /// Translates a CPU address into the physical address seen by the CAN
    /// module (`KVA_TO_PA` on MIPS based parts).
    fn physical_address(&self, address: *const ()) -> u32;

    /// Enables the CAN module interrupt line in the interrupt controller.
    fn enable_interrupt(&mut self);

    /// Disables the CAN module interrupt line in the interrupt controller.
    fn disable_interrupt(&mut self);

    /// Acknowledges a pending CAN module interrupt in the interrupt
    /// controller.
    fn clear_interrupt_flag(&mut self);
}
