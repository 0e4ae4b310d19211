//! Wire-level protocol for the device agent
//!
//! Control message codec, broker record types and topic validation.

pub mod control;
pub mod record;
pub mod topics;

pub use control::*;
pub use record::*;
pub use topics::*;
