//! Error types for the device agent
//!
//! Every condition the receive loop can hit maps to one variant here. Only
//! [`AgentError::MissingAnalysisHook`] stops the loop; everything else is
//! reported and the loop moves on to the next record.

use crate::protocol::topics::ValidationError;
use thiserror::Error;

/// Main error type for device agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Malformed control message: {reason}")]
    MalformedControlMessage { reason: String },

    #[error("Unknown control action: {action}")]
    UnknownControlAction { action: String },

    #[error("Unable to unsubscribe: topic '{topic}' not subscribed")]
    UnsubscribeOfAbsentTopic { topic: String },

    #[error("Unable to unsubscribe: '{topic}' is the control topic")]
    ControlTopicProtected { topic: String },

    #[error("No data held for topic '{topic}'")]
    MissingTopicData { topic: String },

    #[error("Record received on data topic '{topic}' but no analysis hook is configured")]
    MissingAnalysisHook { topic: String },

    #[error("Invalid topic '{topic}': {source}")]
    InvalidTopic {
        topic: String,
        #[source]
        source: ValidationError,
    },

    #[error("Analysis failed: {0}")]
    AnalysisFailed(#[from] crate::agent::analysis::AnalysisError),

    #[error("Agent is not running")]
    AgentStopped,

    #[error("Transport error: {0}")]
    TransportError(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl AgentError {
    /// Whether the receive loop must stop on this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::MissingAnalysisHook { .. })
    }

    /// Short stable label, used for metrics and structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::MalformedControlMessage { .. } => "malformed_control_message",
            AgentError::UnknownControlAction { .. } => "unknown_control_action",
            AgentError::UnsubscribeOfAbsentTopic { .. } => "unsubscribe_of_absent_topic",
            AgentError::ControlTopicProtected { .. } => "control_topic_protected",
            AgentError::MissingTopicData { .. } => "missing_topic_data",
            AgentError::MissingAnalysisHook { .. } => "missing_analysis_hook",
            AgentError::InvalidTopic { .. } => "invalid_topic",
            AgentError::AnalysisFailed(_) => "analysis_failed",
            AgentError::AgentStopped => "agent_stopped",
            AgentError::TransportError(_) => "transport_error",
            AgentError::ConfigError(_) => "config_error",
            AgentError::InternalError { .. } => "internal_error",
        }
    }

    pub fn malformed_control<S: Into<String>>(reason: S) -> Self {
        Self::MalformedControlMessage {
            reason: reason.into(),
        }
    }

    pub fn unknown_control_action<S: Into<String>>(action: S) -> Self {
        Self::UnknownControlAction {
            action: action.into(),
        }
    }

    pub fn missing_topic_data<S: Into<String>>(topic: S) -> Self {
        Self::MissingTopicData {
            topic: topic.into(),
        }
    }

    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TransportError(Box::new(error))
    }

    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
