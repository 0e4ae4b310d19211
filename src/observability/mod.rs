//! Observability for the device agent
//!
//! Structured logging, metrics collection and health check endpoints.

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

pub use logging::{control_span, lifecycle_span, publish_span, record_span};
