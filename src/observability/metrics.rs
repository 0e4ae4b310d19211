//! Thread-safe metrics collection system
//!
//! Atomic counters and mutex-protected latency windows for records, control
//! dispatch, publishes, analysis runs and the MQTT transport.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Latency samples kept per window
const LATENCY_WINDOW: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Bounded window of millisecond samples
#[derive(Debug, Default)]
struct LatencyWindow {
    samples: Mutex<VecDeque<u64>>,
}

impl LatencyWindow {
    fn record(&self, duration: Duration) {
        if let Ok(mut samples) = self.samples.lock() {
            if samples.len() == LATENCY_WINDOW {
                samples.pop_front();
            }
            samples.push_back(duration.as_millis() as u64);
        }
    }

    fn clear(&self) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.clear();
        }
    }

    fn stats(&self) -> LatencyStats {
        let Ok(samples) = self.samples.lock() else {
            return LatencyStats::default();
        };
        if samples.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        LatencyStats {
            avg_ms: sorted.iter().sum::<u64>() as f64 / sorted.len() as f64,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
        }
    }
}

/// Thread-safe metrics collector using atomics and mutexes
#[derive(Debug)]
pub struct MetricsCollector {
    // Inbound records
    control_records: AtomicU64,
    data_records: AtomicU64,
    ignored_records: AtomicU64,
    control_errors: AtomicU64,

    // Subscriptions
    subscribed_topics: AtomicU64,
    subscription_changes: AtomicU64,
    subscription_failures: AtomicU64,

    // Publish engine
    publishes: AtomicU64,
    records_sent: AtomicU64,
    bytes_sent: AtomicU64,
    publish_failures: AtomicU64,
    publish_latency: LatencyWindow,

    // Analysis hook
    analysis_runs: AtomicU64,
    analysis_failures: AtomicU64,
    analysis_latency: LatencyWindow,

    // MQTT transport
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    messages_published: AtomicU64,
    mqtt_publish_failures: AtomicU64,
    messages_received: AtomicU64,
    connection_start_time: AtomicU64,

    // Lifecycle
    agent_state: Mutex<String>,
    uptime_start: AtomicU64,
    state_transitions: AtomicU64,
    health_status: AtomicBool,
    last_health_check: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let now = current_timestamp();
        Self {
            control_records: AtomicU64::new(0),
            data_records: AtomicU64::new(0),
            ignored_records: AtomicU64::new(0),
            control_errors: AtomicU64::new(0),
            subscribed_topics: AtomicU64::new(0),
            subscription_changes: AtomicU64::new(0),
            subscription_failures: AtomicU64::new(0),
            publishes: AtomicU64::new(0),
            records_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            publish_latency: LatencyWindow::default(),
            analysis_runs: AtomicU64::new(0),
            analysis_failures: AtomicU64::new(0),
            analysis_latency: LatencyWindow::default(),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            mqtt_publish_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            agent_state: Mutex::new("initializing".to_string()),
            uptime_start: AtomicU64::new(now),
            state_transitions: AtomicU64::new(0),
            health_status: AtomicBool::new(true),
            last_health_check: AtomicU64::new(now),
        }
    }

    // Inbound records
    pub fn control_record_received(&self) {
        self.control_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn data_record_received(&self) {
        self.data_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.ignored_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn control_error(&self) {
        self.control_errors.fetch_add(1, Ordering::Relaxed);
    }

    // Subscriptions
    pub fn subscriptions_changed(&self, topic_count: usize) {
        self.subscription_changes.fetch_add(1, Ordering::Relaxed);
        self.subscribed_topics
            .store(topic_count as u64, Ordering::Relaxed);
    }

    pub fn subscription_failed(&self) {
        self.subscription_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Publish engine
    pub fn publish_completed(&self, records: usize, bytes: usize, duration: Duration) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
        self.records_sent
            .fetch_add(records as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.publish_latency.record(duration);
    }

    pub fn publish_failed(&self, records_sent: usize) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
        self.records_sent
            .fetch_add(records_sent as u64, Ordering::Relaxed);
    }

    // Analysis hook
    pub fn analysis_completed(&self, duration: Duration, success: bool) {
        self.analysis_runs.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.analysis_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.analysis_latency.record(duration);
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.mqtt_publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle metrics
    pub fn set_agent_state(&self, state: &str) {
        if let Ok(mut current_state) = self.agent_state.lock() {
            if *current_state != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current_state = state.to_string();
            }
        }
    }

    pub fn update_health_status(&self, healthy: bool) {
        self.health_status.store(healthy, Ordering::Relaxed);
        self.last_health_check
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.control_records,
            &self.data_records,
            &self.ignored_records,
            &self.control_errors,
            &self.subscribed_topics,
            &self.subscription_changes,
            &self.subscription_failures,
            &self.publishes,
            &self.records_sent,
            &self.bytes_sent,
            &self.publish_failures,
            &self.analysis_runs,
            &self.analysis_failures,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.messages_published,
            &self.mqtt_publish_failures,
            &self.messages_received,
            &self.connection_start_time,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.publish_latency.clear();
        self.analysis_latency.clear();
        self.mqtt_connected.store(false, Ordering::Relaxed);

        let now = current_timestamp();
        self.uptime_start.store(now, Ordering::Relaxed);
        self.health_status.store(true, Ordering::Relaxed);
        self.last_health_check.store(now, Ordering::Relaxed);
        if let Ok(mut state) = self.agent_state.lock() {
            *state = "initializing".to_string();
        }
    }

    fn connection_duration(&self, now: u64) -> u64 {
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if self.mqtt_connected.load(Ordering::Relaxed) && start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    fn current_agent_state(&self) -> String {
        self.agent_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        MetricsSnapshot {
            records: RecordMetrics {
                control_records: load(&self.control_records),
                data_records: load(&self.data_records),
                ignored_records: load(&self.ignored_records),
                control_errors: load(&self.control_errors),
            },
            subscriptions: SubscriptionMetrics {
                subscribed_topics: load(&self.subscribed_topics),
                changes: load(&self.subscription_changes),
                failures: load(&self.subscription_failures),
            },
            publish: PublishMetrics {
                publishes: load(&self.publishes),
                records_sent: load(&self.records_sent),
                bytes_sent: load(&self.bytes_sent),
                failures: load(&self.publish_failures),
                latency: self.publish_latency.stats(),
            },
            analysis: AnalysisMetrics {
                runs: load(&self.analysis_runs),
                failures: load(&self.analysis_failures),
                latency: self.analysis_latency.stats(),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: load(&self.connection_attempts),
                connections_established: load(&self.connections_established),
                connection_failures: load(&self.connection_failures),
                messages_published: load(&self.messages_published),
                publish_failures: load(&self.mqtt_publish_failures),
                messages_received: load(&self.messages_received),
                connection_duration_seconds: self.connection_duration(now),
            },
            lifecycle: LifecycleMetrics {
                current_state: self.current_agent_state(),
                uptime_seconds: now.saturating_sub(load(&self.uptime_start)),
                state_transitions: load(&self.state_transitions),
                healthy: self.health_status.load(Ordering::Relaxed),
                last_health_check: load(&self.last_health_check),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub records: RecordMetrics,
    pub subscriptions: SubscriptionMetrics,
    pub publish: PublishMetrics,
    pub analysis: AnalysisMetrics,
    pub mqtt: MqttMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyStats {
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct RecordMetrics {
    pub control_records: u64,
    pub data_records: u64,
    pub ignored_records: u64,
    pub control_errors: u64,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionMetrics {
    pub subscribed_topics: u64,
    pub changes: u64,
    pub failures: u64,
}

#[derive(Debug, Serialize)]
pub struct PublishMetrics {
    pub publishes: u64,
    pub records_sent: u64,
    pub bytes_sent: u64,
    pub failures: u64,
    pub latency: LatencyStats,
}

#[derive(Debug, Serialize)]
pub struct AnalysisMetrics {
    pub runs: u64,
    pub failures: u64,
    pub latency: LatencyStats,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub uptime_seconds: u64,
    pub state_transitions: u64,
    pub healthy: bool,
    pub last_health_check: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_metrics() {
        let collector = MetricsCollector::new();
        collector.control_record_received();
        collector.data_record_received();
        collector.data_record_received();
        collector.record_ignored();
        collector.control_error();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.records.control_records, 1);
        assert_eq!(snapshot.records.data_records, 2);
        assert_eq!(snapshot.records.ignored_records, 1);
        assert_eq!(snapshot.records.control_errors, 1);
    }

    #[test]
    fn test_publish_metrics() {
        let collector = MetricsCollector::new();
        collector.publish_completed(3, 30, Duration::from_millis(40));
        collector.publish_failed(1);

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.publish.publishes, 1);
        assert_eq!(snapshot.publish.records_sent, 4);
        assert_eq!(snapshot.publish.bytes_sent, 30);
        assert_eq!(snapshot.publish.failures, 1);
        assert!(snapshot.publish.latency.avg_ms >= 40.0);
    }

    #[test]
    fn test_subscription_gauge() {
        let collector = MetricsCollector::new();
        collector.subscriptions_changed(3);
        collector.subscriptions_changed(1);

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.subscriptions.subscribed_topics, 1);
        assert_eq!(snapshot.subscriptions.changes, 2);
    }

    #[test]
    fn test_analysis_metrics() {
        let collector = MetricsCollector::new();
        collector.analysis_completed(Duration::from_millis(10), true);
        collector.analysis_completed(Duration::from_millis(30), false);

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.analysis.runs, 2);
        assert_eq!(snapshot.analysis.failures, 1);
        assert!((snapshot.analysis.latency.avg_ms - 20.0).abs() < 0.1);
    }

    #[test]
    fn test_mqtt_metrics() {
        let collector = MetricsCollector::new();
        collector.mqtt_connection_attempt();
        collector.mqtt_connection_established();
        collector.mqtt_message_published();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.mqtt.connection_attempts, 1);
        assert_eq!(snapshot.mqtt.connections_established, 1);
        assert_eq!(snapshot.mqtt.messages_published, 1);
        assert!(snapshot.mqtt.connected);

        collector.mqtt_connection_lost();
        assert!(!collector.get_metrics().mqtt.connected);
    }

    #[test]
    fn test_agent_state_transitions() {
        let collector = MetricsCollector::new();
        collector.set_agent_state("running");
        collector.set_agent_state("running");
        collector.set_agent_state("stopped");

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.lifecycle.current_state, "stopped");
        assert_eq!(snapshot.lifecycle.state_transitions, 2);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.data_record_received();
                        collector.mqtt_message_published();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.records.data_records, 1000);
        assert_eq!(snapshot.mqtt.messages_published, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert!((percentile(&data, 50.0) - 5.5).abs() < 0.1);
        assert!((percentile(&data, 95.0) - 9.55).abs() < 0.1);
        assert!((percentile(&data, 0.0) - 1.0).abs() < f64::EPSILON);
        assert!((percentile(&data, 100.0) - 10.0).abs() < f64::EPSILON);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let window = LatencyWindow::default();
        for i in 0..(LATENCY_WINDOW as u64 + 500) {
            window.record(Duration::from_millis(i));
        }
        assert_eq!(window.samples.lock().unwrap().len(), LATENCY_WINDOW);
        // Oldest samples were evicted
        assert_eq!(window.samples.lock().unwrap().front(), Some(&500));
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();
        collector.data_record_received();
        collector.mqtt_connection_established();
        collector.publish_completed(1, 3, Duration::from_millis(5));

        collector.reset();

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.records.data_records, 0);
        assert_eq!(snapshot.publish.records_sent, 0);
        assert!(!snapshot.mqtt.connected);
        assert_eq!(snapshot.lifecycle.current_state, "initializing");
    }
}
