//! Impure I/O operations for MQTT client
//!
//! This module handles network communication, the reconnection supervisor
//! and integration with the rumqttc client.

use super::connection::{
    configure_mqtt_options, ConnectionState, FilterBuilder, MqttError, ReconnectConfig,
    SubscriptionPlan,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler, RecordForwarder};
use crate::config::MqttSection;
use crate::observability::metrics;
use crate::protocol::InboundRecord;
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Longest wait for queued requests to reach the socket on disconnect
const FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// Longest wait for the supervisor task after the shutdown signal
const SUPERVISOR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Topics the broker should deliver, and those it currently delivers
#[derive(Debug, Default)]
struct SubscriptionState {
    desired: BTreeSet<String>,
    active: BTreeSet<String>,
}

/// MQTT v5 transport for a device agent
pub struct MqttClient {
    group_id: String,
    config: MqttSection,
    filters: FilterBuilder,
    client: Arc<Mutex<AsyncClient>>,
    event_loop: Option<Arc<Mutex<EventLoop>>>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_config: ReconnectConfig,
    subscriptions: Arc<Mutex<SubscriptionState>>,
    record_forwarder: Arc<std::sync::Mutex<RecordForwarder>>,
}

/// Everything the reconnection supervisor task owns
struct Supervisor {
    group_id: String,
    config: MqttSection,
    filters: FilterBuilder,
    shared_client: Arc<Mutex<AsyncClient>>,
    current_event_loop: Arc<Mutex<EventLoop>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect_config: ReconnectConfig,
    reconnect_attempts: u32,
    subscriptions: Arc<Mutex<SubscriptionState>>,
    record_forwarder: Arc<std::sync::Mutex<RecordForwarder>>,
}

impl MqttClient {
    pub fn new(group_id: &str, config: MqttSection) -> Result<Self, MqttError> {
        let (client, event_loop) = Self::create_connection(group_id, &config)?;
        let filters = FilterBuilder::new(group_id, config.shared_subscription);

        Ok(MqttClient {
            group_id: group_id.to_string(),
            config,
            filters,
            client: Arc::new(Mutex::new(client)),
            event_loop: Some(Arc::new(Mutex::new(event_loop))),
            event_loop_handle: None,
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            reconnect_config: ReconnectConfig::default(),
            subscriptions: Arc::new(Mutex::new(SubscriptionState::default())),
            record_forwarder: Arc::new(std::sync::Mutex::new(RecordForwarder::new())),
        })
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Create a fresh client and event loop for the initial connection and
    /// every reconnection attempt
    fn create_connection(
        group_id: &str,
        config: &MqttSection,
    ) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = configure_mqtt_options(group_id, config)?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY))
    }

    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        (
            watch::channel(ConnectionState::Connecting),
            watch::channel(false),
        )
    }

    /// Wait for the first ConnAck, or fail on disconnect or timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                match &*state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailedStr(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => continue,
                }
            }
        })
        .await;

        confirmation.unwrap_or_else(|_| {
            Err(MqttError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            ))
        })
    }

    /// Start the event loop supervisor and wait for the broker's ConnAck
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self.event_loop.take().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Event loop already started".to_string())
        })?;

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        metrics().mqtt_connection_attempt();

        let supervisor = Supervisor {
            group_id: self.group_id.clone(),
            config: self.config.clone(),
            filters: self.filters.clone(),
            shared_client: self.client.clone(),
            current_event_loop: event_loop,
            state_tx,
            shutdown_rx,
            reconnect_config: self.reconnect_config.clone(),
            reconnect_attempts: 0,
            subscriptions: self.subscriptions.clone(),
            record_forwarder: self.record_forwarder.clone(),
        };
        self.event_loop_handle = Some(tokio::spawn(supervisor.run()));

        let connection_timeout =
            HealthMonitor::calculate_connection_timeout(&self.reconnect_config);
        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, connection_timeout).await
        {
            metrics().mqtt_connection_failed();
            return Err(e);
        }
        Ok(())
    }

    /// Close the session and stop the supervisor.
    ///
    /// Records already handed to [`MqttClient::send`] are written to the
    /// socket before the Disconnect packet, bounded by a flush timeout.
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        if self.is_connected() {
            let client = self.client.lock().await;
            client
                .disconnect()
                .await
                .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;
        }

        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
            debug!("Sent shutdown signal to reconnection supervisor");
        }

        if let Some(mut handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(SUPERVISOR_JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "Event loop task ended with error");
                }
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    handle.abort();
                }
                _ => {}
            }
        }

        // Only after the supervisor is done; it flushes while still Connected
        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }

        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.active.clear();

        info!(group_id = %self.group_id, "MQTT client disconnected");
        Ok(())
    }

    /// Returns None if connection hasn't been established yet
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state_rx = self.state_rx.as_ref().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Client not connected".to_string())
        })?;

        let current_state = state_rx.borrow().clone();
        if !HealthMonitor::can_send(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }

    /// Make broker subscriptions match `topics` exactly.
    ///
    /// `topics` becomes the set replayed on the next ConnAck even when this
    /// call fails, so a dropped connection still converges on it.
    pub async fn set_subscriptions(&self, topics: &BTreeSet<String>) -> Result<(), MqttError> {
        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.desired = topics.clone();
        self.check_connection_state()?;

        let plan = SubscriptionPlan::between(&subscriptions.active, topics);
        if !plan.is_empty() {
            let client = self.client.lock().await;
            Self::apply_plan(&client, &self.filters, &plan, &mut subscriptions.active).await?;
        }
        Ok(())
    }

    /// Drop every broker subscription
    pub async fn clear_subscriptions(&self) -> Result<(), MqttError> {
        self.set_subscriptions(&BTreeSet::new()).await
    }

    async fn apply_plan(
        client: &AsyncClient,
        filters: &FilterBuilder,
        plan: &SubscriptionPlan,
        active: &mut BTreeSet<String>,
    ) -> Result<(), MqttError> {
        for topic in &plan.unsubscribe {
            client
                .unsubscribe(filters.filter(topic))
                .await
                .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;
            active.remove(topic);
            debug!(topic = %topic, "Unsubscribed");
        }
        for topic in &plan.subscribe {
            client
                .subscribe(filters.filter(topic), QoS::AtLeastOnce)
                .await
                .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;
            active.insert(topic.clone());
            debug!(topic = %topic, "Subscribed");
        }
        Ok(())
    }

    /// Send one record at QoS 1
    pub async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        value: Bytes,
    ) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let properties = MessageHandler::build_properties(key);
        let client = self.client.lock().await;
        let result = client
            .publish_with_properties(topic, QoS::AtLeastOnce, false, value, properties)
            .await;

        match result {
            Ok(()) => {
                metrics().mqtt_message_published();
                Ok(())
            }
            Err(e) => {
                metrics().mqtt_publish_failed();
                Err(MqttError::SendFailed {
                    topic: topic.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    pub fn set_record_sender(&self, sender: mpsc::Sender<InboundRecord>) {
        let mut forwarder = self
            .record_forwarder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        forwarder.set_record_sender(sender);
    }
}

impl Supervisor {
    async fn run(mut self) {
        info!(group_id = %self.group_id, "Starting MQTT event loop with reconnection supervisor");

        loop {
            let event_loop = self.current_event_loop.clone();
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        debug!("Shutdown signal received, stopping reconnection supervisor");
                        self.flush_until_disconnect().await;
                        break;
                    }
                }

                event_result = async move {
                    let mut event_loop_guard = event_loop.lock().await;
                    event_loop_guard.poll().await
                } => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route).await
                        }
                        Err(e) => self.handle_event_loop_error(e).await,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        info!(group_id = %self.group_id, "MQTT event loop stopped");
    }

    fn transition(&self, event: ConnectionEvent) {
        let from = self.state_tx.borrow().clone();
        let to = HealthMonitor::determine_next_state(event);
        if from != to {
            HealthMonitor::log_state_transition(&from, &to);
        }
        let _ = self.state_tx.send(to);
    }

    /// Returns true to keep polling
    async fn process_event_route(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.transition(ConnectionEvent::ConnAckReceived);
                self.reconnect_attempts = 0;
                metrics().mqtt_connection_established();
                self.resubscribe().await;
                true
            }
            EventRoute::MessageReceived { record, retain } => {
                if MessageHandler::should_process_message(&record.topic, retain) {
                    metrics().mqtt_message_received();
                    self.forward(record).await;
                }
                true
            }
            EventRoute::Disconnected => {
                self.transition(ConnectionEvent::DisconnectedByBroker);
                metrics().mqtt_connection_lost();
                self.attempt_reconnection().await
            }
            EventRoute::SubscriptionConfirmed { packet_id, failed } => {
                if failed > 0 {
                    warn!(packet_id, failed, "Broker refused subscription");
                } else {
                    debug!(target: "mqtt_transport", packet_id, "Subscription confirmed");
                }
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::DisconnectSent => {
                debug!("Disconnect written, stopping reconnection supervisor");
                false
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Keep polling until the Disconnect queued by `MqttClient::disconnect`
    /// is written, so requests queued ahead of it reach the broker.
    async fn flush_until_disconnect(&mut self) {
        if !matches!(*self.state_tx.borrow(), ConnectionState::Connected) {
            return;
        }

        let event_loop = self.current_event_loop.clone();
        let flushed = tokio::time::timeout(FLUSH_TIMEOUT, async move {
            let mut event_loop = event_loop.lock().await;
            loop {
                match event_loop.poll().await {
                    Ok(event) => {
                        if matches!(
                            MessageHandler::route_mqtt_event(&event),
                            EventRoute::DisconnectSent
                        ) {
                            return true;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Connection closed while flushing");
                        return false;
                    }
                }
            }
        })
        .await;

        match flushed {
            Ok(true) => debug!(group_id = %self.group_id, "Outgoing queue flushed"),
            Ok(false) => warn!(group_id = %self.group_id, "Outgoing queue not fully flushed"),
            Err(_) => warn!(group_id = %self.group_id, "Timed out flushing outgoing queue"),
        }
    }

    async fn forward(&self, record: InboundRecord) {
        let forwarder = self
            .record_forwarder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Err(e) = forwarder.forward_record(record).await {
            error!(error = %e, "Failed to forward record");
        }
    }

    async fn handle_event_loop_error(&mut self, error: rumqttc::v5::ConnectionError) -> bool {
        let was_connected = matches!(*self.state_tx.borrow(), ConnectionState::Connected);
        error!(group_id = %self.group_id, error = %error, "MQTT event loop error");
        self.transition(ConnectionEvent::NetworkError(error.to_string()));
        if was_connected {
            metrics().mqtt_connection_lost();
        }
        self.attempt_reconnection().await
    }

    /// New session: the broker forgot everything, so replay the desired set
    async fn resubscribe(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.active.clear();
        let plan = SubscriptionPlan::between(&BTreeSet::new(), &subscriptions.desired);
        if plan.is_empty() {
            return;
        }

        let client = self.shared_client.lock().await;
        let state = &mut *subscriptions;
        match MqttClient::apply_plan(&client, &self.filters, &plan, &mut state.active).await {
            Ok(()) => info!(topics = plan.subscribe.len(), "Re-subscribed after connect"),
            Err(e) => error!(error = %e, "Failed to re-subscribe"),
        }
    }

    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Returns true to keep polling with a fresh connection
    async fn attempt_reconnection(&mut self) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.reconnect_config,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.reconnect_attempts = attempt;
                self.transition(ConnectionEvent::ReconnectionStarted(attempt));
                info!(attempt, delay_ms, "Attempting reconnection");

                if !Self::interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await
                    || *self.shutdown_rx.borrow()
                {
                    info!("Shutdown signal received, aborting reconnection");
                    return false;
                }

                metrics().mqtt_connection_attempt();
                self.apply_new_connection().await;
                true
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    self.reconnect_attempts
                );
                self.transition(ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }

    async fn apply_new_connection(&mut self) {
        match MqttClient::create_connection(&self.group_id, &self.config) {
            Ok((new_client, new_event_loop)) => {
                self.current_event_loop = Arc::new(Mutex::new(new_event_loop));
                *self.shared_client.lock().await = new_client;
                debug!("Swapped in new connection for reconnection attempt");
            }
            Err(e) => {
                // The old event loop stays; its next poll fails and retries
                error!(error = %e, "Failed to create new connection");
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn set_subscriptions(&self, topics: &BTreeSet<String>) -> Result<(), Self::Error> {
        MqttClient::set_subscriptions(self, topics).await
    }

    async fn clear_subscriptions(&self) -> Result<(), Self::Error> {
        MqttClient::clear_subscriptions(self).await
    }

    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        value: Bytes,
    ) -> Result<(), Self::Error> {
        MqttClient::send(self, topic, key, value).await
    }

    fn is_connected(&self) -> bool {
        MqttClient::is_connected(self)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }

    fn set_record_sender(&self, sender: mpsc::Sender<InboundRecord>) {
        MqttClient::set_record_sender(self, sender)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        // No async in Drop; callers disconnect() for a clean session close
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}
