//! Pure reconnection decisions and connection state transitions

use super::connection::{ConnectionState, ReconnectConfig};
use std::time::Duration;
use tracing::{error, info, warn};

/// Pure reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide whether the supervisor tries another connection
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if matches!(config.max_attempts, Some(max) if current_attempts >= max) {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }

        let attempt = current_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// How long `connect` waits for the first ConnAck
    pub fn calculate_connection_timeout(config: &ReconnectConfig) -> Duration {
        match config.calculate_max_total_time() {
            Some(max_total_time) => Duration::from_millis(max_total_time + 30_000),
            None => Duration::from_secs(60),
        }
    }

    /// State after a connection event
    pub fn determine_next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::DisconnectedByBroker => {
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::NetworkError(error) => ConnectionState::Disconnected(error),
            ConnectionEvent::ReconnectionStarted(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::PermanentFailure(reason) => {
                ConnectionState::PermanentlyDisconnected(reason)
            }
        }
    }

    /// Sends and subscription changes need a live session
    pub fn can_send(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                warn!(reason = %reason, "MQTT connection lost");
            }
            (ConnectionState::Reconnecting(attempt), ConnectionState::Connected) => {
                info!(attempt, "Reconnection successful");
            }
            (_, ConnectionState::PermanentlyDisconnected(reason)) => {
                error!(reason = %reason, "MQTT connection permanently failed");
            }
            (_, ConnectionState::Connected) => info!("MQTT connection established"),
            _ => info!("MQTT connection state: {:?} -> {:?}", from, to),
        }
    }

    pub fn validate_connection_config(config: &ReconnectConfig) -> Result<(), String> {
        if config.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
        }
        if config.sustained_delay == 0 {
            return Err("sustained_delay must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ConnAckReceived,
    DisconnectedByBroker,
    NetworkError(String),
    ReconnectionStarted(u32),
    PermanentFailure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_attempt_reconnection() {
        let config = ReconnectConfig::default();

        assert_eq!(
            HealthMonitor::should_attempt_reconnection(0, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay_ms: 100
            }
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(0, &config, true),
            ReconnectionDecision::AbortShutdownRequested
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(9, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 10,
                delay_ms: 5000
            }
        );

        let limited = ReconnectConfig {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(3, &limited, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }

    #[test]
    fn test_connection_timeout() {
        assert_eq!(
            HealthMonitor::calculate_connection_timeout(&ReconnectConfig::default()),
            Duration::from_secs(60)
        );

        let limited = ReconnectConfig {
            max_attempts: Some(2),
            backoff_pattern: vec![100, 200],
            sustained_delay: 500,
        };
        assert_eq!(
            HealthMonitor::calculate_connection_timeout(&limited),
            Duration::from_millis(30_300)
        );
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::ConnAckReceived),
            ConnectionState::Connected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::NetworkError("timeout".into())),
            ConnectionState::Disconnected("timeout".to_string())
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::ReconnectionStarted(2)),
            ConnectionState::Reconnecting(2)
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::PermanentFailure("gone".into())),
            ConnectionState::PermanentlyDisconnected("gone".to_string())
        );
    }

    #[test]
    fn test_can_send_only_when_connected() {
        assert!(HealthMonitor::can_send(&ConnectionState::Connected));
        assert!(!HealthMonitor::can_send(&ConnectionState::Connecting));
        assert!(!HealthMonitor::can_send(&ConnectionState::Reconnecting(1)));
        assert!(!HealthMonitor::can_send(&ConnectionState::Disconnected(
            "x".to_string()
        )));
    }

    #[test]
    fn test_validate_connection_config() {
        assert!(HealthMonitor::validate_connection_config(&ReconnectConfig::default()).is_ok());

        let zero_attempts = ReconnectConfig {
            max_attempts: Some(0),
            ..Default::default()
        };
        assert!(HealthMonitor::validate_connection_config(&zero_attempts).is_err());

        let zero_delay = ReconnectConfig {
            sustained_delay: 0,
            ..Default::default()
        };
        assert!(HealthMonitor::validate_connection_config(&zero_delay).is_err());
    }
}
