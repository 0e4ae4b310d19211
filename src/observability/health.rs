//! Health check HTTP server for container orchestration
//!
//! Exposes the device's connection and agent state over HTTP so both
//! operators and orchestrators can probe it.

use crate::observability::metrics::{metrics, MetricsCollector};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use warp::http::StatusCode;
use warp::Filter;

/// Agent state reported once the receive loop runs
pub const STATE_RUNNING: &str = "running";

/// HTTP health check server
pub struct HealthServer {
    group_id: String,
    port: u16,
    metrics: &'static MetricsCollector,
    additional_checks: RwLock<BTreeMap<String, HealthCheck>>,
}

impl HealthServer {
    pub fn new(group_id: impl Into<String>, port: u16) -> Self {
        Self::with_metrics(group_id, port, metrics())
    }

    /// Server reading from a specific collector instead of the global one
    pub fn with_metrics(
        group_id: impl Into<String>,
        port: u16,
        metrics: &'static MetricsCollector,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            port,
            metrics,
            additional_checks: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn add_health_check(&self, name: impl Into<String>, check: HealthCheck) {
        self.additional_checks.write().await.insert(name.into(), check);
    }

    pub async fn remove_health_check(&self, name: &str) {
        self.additional_checks.write().await.remove(name);
    }

    /// All routes served by [`Self::start`]
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let with_server = {
            let server = self.clone();
            warp::any().map(move || server.clone())
        };

        // GET /health - overall status with individual checks
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server.clone())
            .and_then(|server: Arc<HealthServer>| async move {
                let status = server.get_health_status().await;
                let code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            });

        // GET /metrics - full metrics snapshot
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server.clone())
            .map(|server: Arc<HealthServer>| warp::reply::json(&server.metrics.get_metrics()));

        // GET /ready - connected and running
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server)
            .map(|server: Arc<HealthServer>| {
                let ready = server.is_ready();
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                warp::reply::with_status(warp::reply::json(&response), code)
            });

        // GET /live - process is up
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET / - endpoint index
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints = BTreeMap::from([
                ("/health", "Overall health status with detailed checks"),
                ("/metrics", "Record, publish, analysis and MQTT metrics"),
                ("/ready", "Readiness probe"),
                ("/live", "Liveness probe"),
            ]);
            warp::reply::json(&endpoints)
        });

        health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
    }

    /// Serve until the process exits
    pub async fn start(self: Arc<Self>) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!(port = self.port, "Starting health server");
        warp::serve(self.routes()).run(addr).await;
    }

    fn is_ready(&self) -> bool {
        let snapshot = self.metrics.get_metrics();
        snapshot.mqtt.connected && snapshot.lifecycle.current_state == STATE_RUNNING
    }

    async fn get_health_status(&self) -> HealthStatus {
        let now = current_timestamp();
        let snapshot = self.metrics.get_metrics();

        let mut checks = BTreeMap::new();
        checks.insert(
            "mqtt".to_string(),
            if snapshot.mqtt.connected {
                HealthCheck::healthy("MQTT connection established")
            } else {
                HealthCheck::unhealthy("MQTT connection failed or disconnected")
            },
        );
        checks.insert(
            "agent".to_string(),
            Self::check_agent_state(&snapshot.lifecycle.current_state),
        );
        for (name, check) in self.additional_checks.read().await.iter() {
            checks.insert(name.clone(), check.clone());
        }

        let healthy = checks.values().all(|check| check.status == "healthy");
        self.metrics.update_health_status(healthy);
        HealthStatus {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: now,
            group_id: self.group_id.clone(),
            uptime_seconds: snapshot.lifecycle.uptime_seconds,
            subscribed_topics: snapshot.subscriptions.subscribed_topics,
            checks,
        }
    }

    fn check_agent_state(state: &str) -> HealthCheck {
        match state {
            STATE_RUNNING => HealthCheck::healthy("Receive loop running"),
            "initializing" | "starting" => HealthCheck {
                status: "starting".to_string(),
                message: Some(format!("Agent is {state}")),
                last_check: current_timestamp(),
            },
            other => HealthCheck::unhealthy(format!("Agent is {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

impl HealthCheck {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            message: Some(message.into()),
            last_check: current_timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: "unhealthy".to_string(),
            message: Some(message.into()),
            last_check: current_timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    group_id: String,
    uptime_seconds: u64,
    subscribed_topics: u64,
    checks: BTreeMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
