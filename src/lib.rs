//! EdgeServe device agent
//!
//! A long-lived device process that exchanges records with an MQTT broker.
//! Its subscription set and publishing behavior are driven remotely by
//! control messages addressed to it rather than configured statically.
//!
//! # Overview
//!
//! - Control message codec (`ACTION_TOPIC`) and topic validation
//! - Subscription registry that always keeps the control topic
//! - Publish engine with multi-record payload fan-out
//! - Receive loop that routes control and data records
//! - MQTT v5 transport with reconnection and subscription replay
//!
//! # Quick Start
//!
//! ```rust
//! use edgeserve_agent::protocol::{ControlAction, ControlMessage};
//!
//! let message = ControlMessage::decode(b"SUBSCRIBE_cam_front").unwrap();
//! assert_eq!(message.action, ControlAction::Subscribe);
//! assert_eq!(message.topic, "cam_front");
//! assert_eq!(ControlMessage::publish("data0").encode(), "PUBLISH_data0");
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod source;
pub mod testing;
pub mod transport;

pub use agent::{AgentHandle, AnalysisHook, DeviceAgent, Payload};
pub use config::{ConfigError, DeviceConfig};
pub use error::{AgentError, AgentResult};
pub use protocol::*;
pub use source::DataSource;
pub use transport::mqtt::MqttClient;
