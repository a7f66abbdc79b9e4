#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//! # PIC32CAN
//!
//! ## Overview
//! This crate provides a driver for the FIFO based CAN module of the PIC32
//! family (PIC32MK and relatives).
//!
//! It provides the following features:
//!
//! - classical CAN with standard and extended identifiers, data and remote
//!   frames
//! - message RAM layout via [`SharedMemory`] with compile-time checked FIFO
//!   sizes
//! - message transmission through a hardware FIFO, with cancellation
//! - interrupt driven reception: receive slots are armed up front and filled
//!   by the interrupt handler
//! - acceptance filter and mask settings
//! - error state reporting through a callback, an event queue and accessors
//!
//! The CAN module is embedded in the MCU like all other peripherals. The
//! interface between them includes a clock, an interrupt line, a
//! memory-mapped register block and a region of system RAM holding the FIFO
//! message buffers, which the module addresses physically.
//!
//! In order to use the driver, one has to instantiate [`CanConfigurable`]
//! and [`finalize`] it. Its constructor requires an instance of a
//! [`Dependencies`] implementing struct and holds onto it until it's
//! [`released`]. Safety requirements of the `Dependencies` trait guarantee a
//! correct state of the module interfaces during its operation.
//!
//! ## Message RAM Configuration
//!
//! The FIFOs live in a [`SharedMemory`] provided by the user. FIFO 0
//! transmits and FIFO 1 receives; their depths are chosen through
//! [`Capacities`]. On parts with a data cache the memory has to be placed in
//! a coherent section, for example by linking a static into `.bss` of KSEG1.
//!
//! ## Transfers
//!
//! Transfers are asynchronous. [`Can::transmit`] queues a frame and
//! [`Can::receive`] arms the receive slot the next frame lands in. The
//! application calls [`Can::on_interrupt`] from the interrupt service routine
//! of the module; it copies received frames into the armed destinations,
//! updates the driver [`State`], posts an [`Event`] and calls the registered
//! callback.
//!
//! Code example
//!
//! ```no_run
//! use core::cell::RefCell;
//! use core::sync::atomic::{AtomicU8, Ordering};
//! use critical_section::Mutex;
//! use pic32can::bus::{Can, CanConfigurable, RX_FIFO, TX_FIFO};
//! use pic32can::generic_array::typenum::consts::*;
//! use pic32can::id::{self, AtomicId};
//! use pic32can::interrupt::Event;
//! use pic32can::message::FrameType;
//! use pic32can::messageram::{Capacities, SharedMemory};
//! use pic32can::rx_fifo::RxDestination;
//! use pic32can_core::fugit::RateExtU32 as _;
//! # use pic32can_core::{fugit::HertzU32, CanId, Dependencies};
//! # pub enum Can1 {}
//! # unsafe impl CanId for Can1 {
//! #     const ADDRESS: *const () = 0xBF88_0000 as *const _;
//! # }
//! # pub struct Deps;
//! # unsafe impl Dependencies<Can1> for Deps {
//! #     fn can_clock(&self) -> HertzU32 { HertzU32::MHz(60) }
//! #     fn physical_address(&self, address: *const ()) -> u32 {
//! #         address as usize as u32 & 0x1fff_ffff
//! #     }
//! #     fn enable_interrupt(&mut self) {}
//! #     fn disable_interrupt(&mut self) {}
//! #     fn clear_interrupt_flag(&mut self) {}
//! # }
//! # let dependencies = Deps;
//!
//! pub struct Capacities1;
//!
//! impl Capacities for Capacities1 {
//!     type TxFifo = U4;
//!     type RxFifo = U8;
//! }
//!
//! type Bus = Can<'static, Can1, Deps, Capacities1>;
//!
//! static mut MEMORY: SharedMemory<Capacities1> = SharedMemory::new();
//! static BUS: Mutex<RefCell<Option<Bus>>> = Mutex::new(RefCell::new(None));
//!
//! static RX_ID: AtomicId = AtomicId::new();
//! static RX_LEN: AtomicU8 = AtomicU8::new(0);
//! static RX_DATA: [AtomicU8; 8] = [const { AtomicU8::new(0) }; 8];
//!
//! // The interrupt service routine of the module
//! fn can1_interrupt() {
//!     critical_section::with(|cs| {
//!         if let Some(can) = BUS.borrow_ref_mut(cs).as_mut() {
//!             can.on_interrupt();
//!         }
//!     });
//! }
//!
//! // Safety: MEMORY is only used by this driver instance
//! let memory = unsafe { &mut *core::ptr::addr_of_mut!(MEMORY) };
//! let mut can = CanConfigurable::<Can1, _, _>::new(500.kHz(), dependencies, memory).unwrap();
//! can.config().timestamp.enabled = false;
//! let mut can = can.finalize().unwrap();
//!
//! can.set_filter(0, id::from_raw(0x100));
//! can.set_mask(0, id::from_raw(0x700)).unwrap();
//!
//! can.transmit(id::from_raw(0x123), FrameType::Data(&[1, 2, 3]), TX_FIFO)
//!     .unwrap();
//! can.receive(
//!     RxDestination {
//!         id: &RX_ID,
//!         len: &RX_LEN,
//!         data: &RX_DATA,
//!         timestamp: None,
//!     },
//!     RX_FIFO,
//! )
//! .unwrap();
//! critical_section::with(|cs| *BUS.borrow_ref_mut(cs) = Some(can));
//!
//! # can1_interrupt();
//! let event = critical_section::with(|cs| {
//!     BUS.borrow_ref_mut(cs).as_mut().and_then(|can| can.next_event())
//! });
//! match event {
//!     Some(Event::Received { .. }) => {
//!         let len = usize::from(RX_LEN.load(Ordering::Acquire));
//!         let _id = RX_ID.load(Ordering::Relaxed);
//!         let _byte = RX_DATA[..len].first().map(|b| b.load(Ordering::Relaxed));
//!     }
//!     Some(Event::Error(errors)) if errors.tx_bus_off() => {
//!         // Recovery is up to the application
//!     }
//!     _ => {}
//! }
//! ```
//!
//! [`SharedMemory`]: crate::messageram::SharedMemory
//! [`Capacities`]: crate::messageram::Capacities
//! [`CanConfigurable`]: crate::bus::CanConfigurable
//! [`finalize`]: crate::bus::CanConfigurable::finalize
//! [`released`]: crate::bus::Can::release
//! [`Dependencies`]: pic32can_core::Dependencies
//! [`Can::transmit`]: crate::bus::Can::transmit
//! [`Can::receive`]: crate::bus::Can::receive
//! [`Can::on_interrupt`]: crate::bus::Can::on_interrupt
//! [`State`]: crate::interrupt::state::State
//! [`Event`]: crate::interrupt::Event

#[macro_use]
mod fmt;

pub mod bus;
pub mod config;
pub mod filter;
pub mod id;
pub mod interrupt;
pub mod message;
pub mod messageram;
pub mod prelude;
pub mod reg;
pub mod rx_fifo;
pub mod tx_fifo;

#[cfg(test)]
mod mock;

pub use embedded_can;
pub use generic_array;
pub use pic32can_core as core;
