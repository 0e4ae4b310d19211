//! Transport layer for device communication
//!
//! This module provides the transport abstraction the device agent talks to
//! and its MQTT implementation.

use crate::protocol::InboundRecord;
use bytes::Bytes;
use std::collections::BTreeSet;

pub mod mqtt;

/// Transport trait for device communication
///
/// This trait provides an abstraction over the message broker so the agent
/// can be driven by a mock in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect from the broker
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Replace the broker subscriptions with exactly `topics`.
    ///
    /// `topics` is what the transport restores after a reconnect, even when
    /// the broker call itself fails.
    async fn set_subscriptions(&self, topics: &BTreeSet<String>) -> Result<(), Self::Error>;

    /// Drop every broker subscription
    async fn clear_subscriptions(&self) -> Result<(), Self::Error>;

    /// Send one record
    async fn send(&self, topic: &str, key: Option<&str>, value: Bytes)
    -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> Option<crate::transport::mqtt::ConnectionState>;

    /// Check if the connection is permanently disconnected
    fn is_permanently_disconnected(&self) -> bool;

    /// Set the sender inbound records are forwarded to
    fn set_record_sender(&self, sender: tokio::sync::mpsc::Sender<InboundRecord>);
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
