//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management,
//! option construction and subscription planning.

use crate::config::MqttSection;
use crate::protocol::subscription_filter;
use rumqttc::Transport as RumqttcTransport;
use rumqttc::v5::MqttOptions;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Permanently disconnected - max reconnection attempts exceeded
    PermanentlyDisconnected(String),
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![100, 250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Upper bound on time spent reconnecting, `None` when unlimited
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Delay before the given (1-based) attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Send to '{topic}' failed")]
    SendFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Missing credentials: {0}")]
    Credentials(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// Build a client id unique per connection attempt.
///
/// Two processes started with the same group id must not kick each other
/// off the broker.
pub fn client_id(group_id: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{group_id}-{}", &suffix[..8])
}

/// Build MQTT options from config
pub fn configure_mqtt_options(
    group_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(config.broker_url.clone())),
    };
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(client_id(group_id), host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username_env) = &config.username_env {
        let username = std::env::var(username_env)
            .map_err(|_| MqttError::Credentials(username_env.clone()))?;
        let password = match &config.password_env {
            Some(env_name) => std::env::var(env_name)
                .map_err(|_| MqttError::Credentials(env_name.clone()))?,
            None => String::new(),
        };
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    // Analyzer inputs such as video clips are large
    mqtt_options.set_max_packet_size(Some(config.max_packet_size));

    Ok(mqtt_options)
}

/// Changes needed to move broker subscriptions from `current` to `desired`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPlan {
    pub subscribe: Vec<String>,
    pub unsubscribe: Vec<String>,
}

impl SubscriptionPlan {
    pub fn between(current: &BTreeSet<String>, desired: &BTreeSet<String>) -> Self {
        Self {
            subscribe: desired.difference(current).cloned().collect(),
            unsubscribe: current.difference(desired).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Maps topic names to the filters actually sent to the broker
#[derive(Debug, Clone)]
pub struct FilterBuilder {
    group_id: String,
    shared: bool,
}

impl FilterBuilder {
    pub fn new(group_id: impl Into<String>, shared: bool) -> Self {
        Self {
            group_id: group_id.into(),
            shared,
        }
    }

    pub fn filter(&self, topic: &str) -> String {
        subscription_filter(&self.group_id, topic, self.shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_pattern_then_sustained() {
        let config = ReconnectConfig::default();
        assert_eq!(config.calculate_backoff_delay(1), 100);
        assert_eq!(config.calculate_backoff_delay(5), 2000);
        assert_eq!(config.calculate_backoff_delay(6), 5000);
        assert_eq!(config.calculate_backoff_delay(100), 5000);
    }

    #[test]
    fn test_calculate_max_total_time() {
        let limited = ReconnectConfig {
            max_attempts: Some(3),
            backoff_pattern: vec![10, 20],
            sustained_delay: 50,
        };
        assert_eq!(limited.calculate_max_total_time(), Some(80));
        assert_eq!(ReconnectConfig::default().calculate_max_total_time(), None);
    }

    #[test]
    fn test_client_id_is_unique_per_attempt() {
        let a = client_id("dev0");
        let b = client_id("dev0");
        assert!(a.starts_with("dev0-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_configure_mqtt_options() {
        let config = MqttSection::with_broker("mqtt://localhost:1883");
        let options = configure_mqtt_options("dev0", &config).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_tls_port() {
        let config = MqttSection::with_broker("mqtts://broker.example.com");
        let options = configure_mqtt_options("dev0", &config).unwrap();
        assert_eq!(options.broker_address().1, 8883);
    }

    #[test]
    fn test_invalid_broker_url() {
        for url in ["invalid-url", "http://localhost:1883"] {
            let config = MqttSection::with_broker(url);
            let result = configure_mqtt_options("dev0", &config);
            assert!(matches!(result, Err(MqttError::InvalidBrokerUrl(_))));
        }
    }

    #[test]
    fn test_missing_username_env() {
        let mut config = MqttSection::with_broker("mqtt://localhost:1883");
        config.username_env = Some("EDGESERVE_TEST_UNSET_USERNAME".to_string());
        let result = configure_mqtt_options("dev0", &config);
        assert!(matches!(result, Err(MqttError::Credentials(_))));
    }

    #[test]
    fn test_subscription_plan() {
        let current = BTreeSet::from(["status".to_string(), "a".to_string()]);
        let desired = BTreeSet::from(["status".to_string(), "b".to_string()]);
        let plan = SubscriptionPlan::between(&current, &desired);
        assert_eq!(plan.subscribe, vec!["b"]);
        assert_eq!(plan.unsubscribe, vec!["a"]);
        assert!(SubscriptionPlan::between(&desired, &desired).is_empty());
    }

    #[test]
    fn test_filter_builder() {
        assert_eq!(FilterBuilder::new("dev0", false).filter("data0"), "data0");
        assert_eq!(
            FilterBuilder::new("dev0", true).filter("data0"),
            "$share/dev0/data0"
        );
    }
}
