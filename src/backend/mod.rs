//! Boundary to the OS-level discovery facility.
//!
//! [`NsdBackend`] is the adapter the rest of the crate talks to; everything
//! network-dependent hides behind it. [`MdnsBackend`] is the real mDNS
//! implementation, [`MockBackend`] an in-memory one for tests and demos.

pub mod mdns;
pub mod mock;
pub mod traits;

pub use mdns::MdnsBackend;
pub use mock::{MockBackend, MockCounters};
pub use traits::*;
