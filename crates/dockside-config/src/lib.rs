//! Configuration for dockside
//!
//! This crate handles:
//! - The harness configuration file (`~/.config/dockside/config.toml`)
//! - Environment overrides used by test suites (`CONTAINER_IMAGE` and friends)

mod error;
mod harness;

pub use error::*;
pub use harness::*;
