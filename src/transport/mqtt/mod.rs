//! MQTT v5 transport for device agents
//!
//! The client is split into pure functions and I/O so most of it can be
//! tested without a broker.
//!
//! # Architecture
//!
//! - [`connection`] - Connection state, option construction, subscription planning
//! - [`message_handler`] - Event routing and publish/record conversion
//! - [`health_monitor`] - Reconnection decisions and state transitions
//! - [`client`] - Impure I/O operations and the reconnection supervisor
//!
//! # Usage
//!
//! ```rust,no_run
//! use edgeserve_agent::config::MqttSection;
//! use edgeserve_agent::transport::mqtt::MqttClient;
//! use std::collections::BTreeSet;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection::with_broker("mqtt://localhost:1883");
//! let mut client = MqttClient::new("dev0", config)?;
//! client.connect().await?;
//! client
//!     .set_subscriptions(&BTreeSet::from(["status".to_string()]))
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{
    ConnectionState, FilterBuilder, MqttError, ReconnectConfig, SubscriptionPlan,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler, RecordForwarder};
