//! Traits needed to use the driver, imported anonymously.
pub use crate::bus::CanBus as _;
pub use crate::reg::RegisterAccess as _;
pub use embedded_can::Frame as _;
