//! Testing utilities and mock implementations
//!
//! Mocks for exercising the device agent without an MQTT broker or an
//! analyzer program.

pub mod mocks;

pub use mocks::*;
