//! Type-state markers for device buffers and kernel launches.
//!
//! Output can only be read through a finished launch:
//!
//! ```compile_fail
//! use offload_core::{InFlight, Launch, Ready};
//!
//! fn needs_ready(_: &Launch<Ready>) {}
//! fn check(l: &Launch<InFlight>) {
//!     needs_ready(l);
//! }
//! ```

mod sealed {
    pub trait Sealed {}
}

/// Compile-time state of a [`DeviceBuffer`](crate::buffer::DeviceBuffer)
/// or [`Launch`](crate::dispatch::Launch).
pub trait State: sealed::Sealed + std::fmt::Debug {}

/// Allocated on the device, contents not yet defined by the host.
#[derive(Debug, Clone, Copy)]
pub struct Queued;
impl sealed::Sealed for Queued {}
impl State for Queued {}

/// Launch enqueued, completion not yet observed.
#[derive(Debug, Clone, Copy)]
pub struct InFlight;
impl sealed::Sealed for InFlight {}
impl State for InFlight {}

/// Contents valid on the device (buffer) or device work finished (launch).
#[derive(Debug, Clone, Copy)]
pub struct Ready;
impl sealed::Sealed for Ready {}
impl State for Ready {}
