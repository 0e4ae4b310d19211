//! Device agent and its receive loop
//!
//! The agent owns its identity, the held data, the subscription registry
//! and an optional analysis hook. [`DeviceAgent::run`] selects over inbound
//! records, queued commands and a shutdown signal, handling one event at a
//! time so per-topic order is preserved and only the loop mutates state.

use crate::agent::analysis::AnalysisHook;
use crate::agent::handle::{AgentCommand, AgentHandle, COMMAND_QUEUE_CAPACITY};
use crate::agent::payload::DataStore;
use crate::agent::publisher::PublishEngine;
use crate::agent::registry::SubscriptionRegistry;
use crate::agent::router::{MessageRouter, Route};
use crate::config::DeviceConfig;
use crate::error::{AgentError, AgentResult};
use crate::lifecycle_span;
use crate::observability::health::STATE_RUNNING;
use crate::observability::metrics::metrics;
use crate::protocol::topics::validate_topic;
use crate::protocol::InboundRecord;
use crate::record_span;
use crate::transport::Transport;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Instrument};

/// Inbound record queue capacity
pub const RECORD_QUEUE_CAPACITY: usize = 256;

/// Device agent driven by control messages
pub struct DeviceAgent<T: Transport> {
    group_id: String,
    transport: T,
    registry: SubscriptionRegistry,
    publisher: PublishEngine,
    router: MessageRouter,
    analysis_hook: Option<Arc<dyn AnalysisHook>>,
    commands_tx: mpsc::Sender<AgentCommand>,
    commands_rx: Option<mpsc::Receiver<AgentCommand>>,
    records_rx: Option<mpsc::Receiver<InboundRecord>>,
}

impl<T: Transport> DeviceAgent<T> {
    pub fn new(
        group_id: impl Into<String>,
        control_topic: impl Into<String>,
        data: DataStore,
        transport: T,
    ) -> Self {
        let group_id = group_id.into();
        let control_topic = control_topic.into();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        Self {
            router: MessageRouter::new(control_topic.clone(), group_id.clone()),
            registry: SubscriptionRegistry::new(control_topic),
            publisher: PublishEngine::new(data),
            group_id,
            transport,
            analysis_hook: None,
            commands_tx,
            commands_rx: Some(commands_rx),
            records_rx: None,
        }
    }

    /// Agent identity and control topic taken from a validated config
    pub fn from_config(config: &DeviceConfig, data: DataStore, transport: T) -> Self {
        Self::new(
            config.agent.group_id.clone(),
            config.agent.control_topic.clone(),
            data,
            transport,
        )
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn control_topic(&self) -> &str {
        self.registry.control_topic()
    }

    pub fn subscribed_topics(&self) -> &BTreeSet<String> {
        self.registry.topics()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn data(&self) -> &DataStore {
        self.publisher.data()
    }

    pub fn has_analysis_hook(&self) -> bool {
        self.analysis_hook.is_some()
    }

    /// Install the analysis hook, replacing any previous one
    pub fn set_analysis_hook<H>(&mut self, hook: H)
    where
        H: AnalysisHook + 'static,
    {
        debug!(group_id = %self.group_id, hook = hook.name(), "Analysis hook set");
        self.analysis_hook = Some(Arc::new(hook));
    }

    pub fn clear_analysis_hook(&mut self) {
        self.analysis_hook = None;
    }

    /// Handle for queueing commands into [`Self::run`]
    pub fn handle(&self) -> AgentHandle {
        AgentHandle::new(self.commands_tx.clone())
    }

    /// Connect and subscribe the control topic
    pub async fn start(&mut self) -> AgentResult<()> {
        metrics().set_agent_state("starting");
        info!(
            group_id = %self.group_id,
            control_topic = %self.control_topic(),
            "Starting device agent"
        );

        self.transport
            .connect()
            .await
            .map_err(AgentError::transport)?;

        let (records_tx, records_rx) = mpsc::channel(RECORD_QUEUE_CAPACITY);
        self.transport.set_record_sender(records_tx);
        self.records_rx = Some(records_rx);

        self.transport
            .set_subscriptions(self.registry.topics())
            .await
            .map_err(AgentError::transport)?;
        metrics().subscriptions_changed(self.registry.len());

        info!(group_id = %self.group_id, "Device agent started");
        Ok(())
    }

    /// Add a topic to the subscription set.
    ///
    /// Returns false, without a broker call, when the topic is already
    /// subscribed.
    pub async fn subscribe(&mut self, topic: &str) -> AgentResult<bool> {
        validate_topic(topic).map_err(|source| AgentError::InvalidTopic {
            topic: topic.to_string(),
            source,
        })?;

        if !self.registry.insert(topic) {
            debug!(topic = %topic, "Already subscribed");
            return Ok(false);
        }

        if let Err(e) = self.transport.set_subscriptions(self.registry.topics()).await {
            let _ = self.registry.remove(topic);
            self.resync_transport().await;
            metrics().subscription_failed();
            return Err(AgentError::transport(e));
        }

        metrics().subscriptions_changed(self.registry.len());
        info!(topic = %topic, topics = self.registry.len(), "Subscribed");
        Ok(true)
    }

    /// Remove a topic from the subscription set
    pub async fn unsubscribe(&mut self, topic: &str) -> AgentResult<()> {
        self.registry.remove(topic)?;

        if let Err(e) = self.transport.set_subscriptions(self.registry.topics()).await {
            self.registry.insert(topic);
            self.resync_transport().await;
            metrics().subscription_failed();
            return Err(AgentError::transport(e));
        }

        metrics().subscriptions_changed(self.registry.len());
        info!(topic = %topic, topics = self.registry.len(), "Unsubscribed");
        Ok(())
    }

    /// Drop every broker subscription, then re-subscribe the control topic
    pub async fn reset_to_baseline(&mut self) -> AgentResult<()> {
        let previous = self.registry.reset();

        if let Err(e) = self.transport.clear_subscriptions().await {
            self.registry.restore(previous);
            self.resync_transport().await;
            metrics().subscription_failed();
            return Err(AgentError::transport(e));
        }

        // On failure the transport still restores the control topic on reconnect
        if let Err(e) = self.transport.set_subscriptions(self.registry.topics()).await {
            metrics().subscription_failed();
            error!(
                control_topic = %self.control_topic(),
                error = %e,
                "Control topic re-subscription failed after reset"
            );
            return Err(AgentError::transport(e));
        }

        metrics().subscriptions_changed(self.registry.len());
        info!(dropped = previous.len() - 1, "Subscriptions reset to baseline");
        Ok(())
    }

    /// Point the transport back at the registry after a failed change
    async fn resync_transport(&self) {
        if let Err(e) = self.transport.set_subscriptions(self.registry.topics()).await {
            debug!(error = %e, "Subscription resync left to the next reconnect");
        }
    }

    /// Send every record held for `topic`
    pub async fn publish(&self, topic: &str) -> AgentResult<usize> {
        self.publisher.publish(&self.transport, topic).await
    }

    /// Handle one inbound record
    pub async fn process_record(&mut self, record: InboundRecord) -> AgentResult<()> {
        let span = record_span!(topic = %record.topic, bytes = record.value.len());

        match self.router.route(&record) {
            Route::Control => {
                metrics().control_record_received();
                self.handle_control(&record.value)
                    .instrument(span)
                    .await
                    .map(|_| ())
            }
            Route::Data => {
                metrics().data_record_received();
                self.analyze(record).instrument(span).await
            }
            Route::Ignored(reason) => {
                metrics().record_ignored();
                debug!(topic = %record.topic, reason = ?reason, "Control record ignored");
                Ok(())
            }
        }
    }

    async fn analyze(&self, record: InboundRecord) -> AgentResult<()> {
        let hook = self
            .analysis_hook
            .as_ref()
            .ok_or_else(|| AgentError::MissingAnalysisHook {
                topic: record.topic.clone(),
            })?;

        let started = Instant::now();
        let result = hook.analyze(&record.value).await;
        let elapsed = started.elapsed();
        metrics().analysis_completed(elapsed, result.is_ok());

        let output = result?;
        info!(
            topic = %record.topic,
            hook = hook.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            result = %output.trim_end(),
            "Analysis complete"
        );
        Ok(())
    }

    /// Run the receive loop until shutdown, a closed record channel or a
    /// fatal error. The transport is disconnected on every exit path.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> AgentResult<()> {
        let span = lifecycle_span!(group_id = %self.group_id);
        let result = self.run_inner(shutdown).instrument(span).await;

        metrics().set_agent_state("stopping");
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed");
        }

        match &result {
            Ok(()) => {
                metrics().set_agent_state("stopped");
                info!(group_id = %self.group_id, "Device agent stopped");
            }
            Err(e) => {
                metrics().set_agent_state("failed");
                error!(group_id = %self.group_id, error = %e, "Device agent failed");
            }
        }
        result
    }

    async fn run_inner(&mut self, mut shutdown: watch::Receiver<bool>) -> AgentResult<()> {
        if self.records_rx.is_none() {
            self.start().await?;
        }
        let mut records = self
            .records_rx
            .take()
            .ok_or_else(|| AgentError::internal_error("Record receiver not available"))?;
        let mut commands = self
            .commands_rx
            .take()
            .ok_or_else(|| AgentError::internal_error("Agent loop already ran"))?;

        if *shutdown.borrow() {
            return Ok(());
        }

        metrics().set_agent_state(STATE_RUNNING);
        info!(group_id = %self.group_id, "Receive loop running");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested");
                        return Ok(());
                    }
                }
                record = records.recv() => {
                    let Some(record) = record else {
                        warn!("Record channel closed");
                        return Ok(());
                    };
                    self.handle_record(record).await?;

                    // At most one command per record, so a steady record
                    // stream cannot starve handle requests
                    if let Ok(command) = commands.try_recv() {
                        self.execute(command).await;
                    }
                }
                Some(command) = commands.recv() => {
                    self.execute(command).await;
                }
            }
        }
    }

    /// Process one record; only fatal errors are returned
    async fn handle_record(&mut self, record: InboundRecord) -> AgentResult<()> {
        if let Err(e) = self.process_record(record).await {
            if e.is_fatal() {
                return Err(e);
            }
            // Analysis failures are already counted by the hook timing
            if !matches!(e, AgentError::AnalysisFailed(_)) {
                metrics().control_error();
            }
            warn!(kind = e.kind(), error = %e, "Record handling failed");
        }
        Ok(())
    }

    async fn execute(&mut self, command: AgentCommand) {
        debug!(command = command.name(), "Executing command");

        // A dropped reply means the caller went away; the command still ran.
        match command {
            AgentCommand::Subscribe { topic, reply } => {
                let _ = reply.send(self.subscribe(&topic).await);
            }
            AgentCommand::Unsubscribe { topic, reply } => {
                let _ = reply.send(self.unsubscribe(&topic).await);
            }
            AgentCommand::Reset { reply } => {
                let _ = reply.send(self.reset_to_baseline().await);
            }
            AgentCommand::Publish { topic, reply } => {
                let _ = reply.send(self.publish(&topic).await);
            }
            AgentCommand::SubscribedTopics { reply } => {
                let _ = reply.send(self.registry.topics().clone());
            }
        }
    }
}
