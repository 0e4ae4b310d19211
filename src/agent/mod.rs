//! Device agent
//!
//! The agent composes a subscription registry, a publish engine, a message
//! router and control dispatch around one transport, and runs the receive
//! loop that drives them.

pub mod analysis;
pub mod control;
pub mod device;
pub mod handle;
pub mod payload;
pub mod publisher;
pub mod registry;
pub mod router;

pub use analysis::{AnalysisError, AnalysisHook, CommandHook};
pub use control::ControlOutcome;
pub use device::DeviceAgent;
pub use handle::{AgentCommand, AgentHandle};
pub use payload::{DataStore, Payload};
pub use publisher::PublishEngine;
pub use registry::SubscriptionRegistry;
pub use router::{IgnoreReason, MessageRouter, Route};
