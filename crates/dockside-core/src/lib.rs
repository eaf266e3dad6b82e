//! Core logic for dockside
//!
//! This crate provides:
//! - The container lifecycle controller (connect, resolve image, create,
//!   start, probe, clean up)
//! - Readiness probes and the retry policy that bounds them
//! - Harness adapters that scope a container to a test or a suite

mod container;
mod controller;
mod error;
mod harness;
mod probe;
mod retry;

pub use container::*;
pub use controller::*;
pub use error::*;
pub use harness::*;
pub use probe::*;
pub use retry::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
