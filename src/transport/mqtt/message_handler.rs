//! Pure message routing and processing logic for MQTT events
//!
//! This module contains pure functions for handling MQTT events, turning
//! publishes into records and routing decisions.

use crate::protocol::{InboundRecord, RECORD_KEY_PROPERTY};
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{Publish, PublishProperties};
use rumqttc::v5::Event;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Decide whether an inbound publish becomes a record.
    ///
    /// Retained messages are replays of old state and are never handled.
    pub fn should_process_message(topic: &str, retain: bool) -> bool {
        if retain {
            debug!(topic = %topic, "Ignoring retained message");
            return false;
        }
        true
    }

    /// Record key carried in the publish user properties
    pub fn extract_key(properties: Option<&PublishProperties>) -> Option<Bytes> {
        properties?
            .user_properties
            .iter()
            .find(|(name, _)| name == RECORD_KEY_PROPERTY)
            .map(|(_, value)| Bytes::from(value.clone()))
    }

    /// Properties attached to an outbound record
    pub fn build_properties(key: Option<&str>) -> PublishProperties {
        let mut properties = PublishProperties::default();
        if let Some(key) = key {
            properties
                .user_properties
                .push((RECORD_KEY_PROPERTY.to_string(), key.to_string()));
        }
        properties
    }

    /// Convert a publish packet into a record
    pub fn to_record(publish: &Publish) -> InboundRecord {
        InboundRecord {
            topic: String::from_utf8_lossy(&publish.topic).into_owned(),
            key: Self::extract_key(publish.properties.as_ref()),
            value: publish.payload.clone(),
        }
    }

    /// Route MQTT event to appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => {
                use rumqttc::v5::mqttbytes::v5::Packet;
                match incoming {
                    Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                    Packet::Publish(publish) => EventRoute::MessageReceived {
                        record: Self::to_record(publish),
                        retain: publish.retain,
                    },
                    Packet::Disconnect(_) => EventRoute::Disconnected,
                    Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                        packet_id: suback.pkid,
                        failed: suback
                            .return_codes
                            .iter()
                            .filter(|code| !Self::is_granted(code))
                            .count(),
                    },
                    other => EventRoute::InfrastructureEvent(format!("{other:?}")),
                }
            }
            Event::Outgoing(rumqttc::Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    fn is_granted(code: &rumqttc::v5::mqttbytes::v5::SubscribeReasonCode) -> bool {
        use rumqttc::v5::mqttbytes::v5::SubscribeReasonCode;
        matches!(code, SubscribeReasonCode::Success(_))
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived { record: InboundRecord, retain: bool },
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription confirmed; `failed` counts refused filters
    SubscriptionConfirmed { packet_id: u16, failed: usize },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Our Disconnect was written; every request queued before it went out
    DisconnectSent,
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Hands received records to the agent
#[derive(Clone)]
pub struct RecordForwarder {
    record_sender: Option<mpsc::Sender<InboundRecord>>,
}

impl RecordForwarder {
    pub fn new() -> Self {
        Self {
            record_sender: None,
        }
    }

    pub fn set_record_sender(&mut self, sender: mpsc::Sender<InboundRecord>) {
        self.record_sender = Some(sender);
    }

    /// Forward a record, waiting for channel capacity to keep order
    pub async fn forward_record(&self, record: InboundRecord) -> Result<(), String> {
        let Some(sender) = &self.record_sender else {
            warn!(topic = %record.topic, "Record received but no receiver configured - dropped");
            return Err("No record sender configured".to_string());
        };

        debug!(topic = %record.topic, bytes = record.value.len(), "Forwarding record");
        sender
            .send(record)
            .await
            .map_err(|e| format!("Failed to forward record: {e}"))
    }
}

impl Default for RecordForwarder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::QoS;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, Packet, SubAck, SubscribeReasonCode,
    };

    fn publish(topic: &str, payload: &str, properties: Option<PublishProperties>) -> Publish {
        Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from(topic.to_string()),
            pkid: 1,
            payload: Bytes::from(payload.to_string()),
            properties,
        }
    }

    #[test]
    fn test_retained_messages_are_skipped() {
        assert!(MessageHandler::should_process_message("status", false));
        assert!(!MessageHandler::should_process_message("status", true));
    }

    #[test]
    fn test_key_roundtrips_through_properties() {
        let properties = MessageHandler::build_properties(Some("dev0"));
        let key = MessageHandler::extract_key(Some(&properties));
        assert_eq!(key, Some(Bytes::from("dev0")));
    }

    #[test]
    fn test_unkeyed_record() {
        let properties = MessageHandler::build_properties(None);
        assert!(properties.user_properties.is_empty());
        assert_eq!(MessageHandler::extract_key(Some(&properties)), None);
        assert_eq!(MessageHandler::extract_key(None), None);
    }

    #[test]
    fn test_other_user_properties_ignored() {
        let mut properties = PublishProperties::default();
        properties
            .user_properties
            .push(("origin".to_string(), "camera".to_string()));
        assert_eq!(MessageHandler::extract_key(Some(&properties)), None);
    }

    #[test]
    fn test_route_mqtt_event() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: rumqttc::v5::mqttbytes::v5::DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));

        let keyed = publish(
            "status",
            "SUBSCRIBE_data0",
            Some(MessageHandler::build_properties(Some("dev0"))),
        );
        match MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Publish(keyed))) {
            EventRoute::MessageReceived { record, retain } => {
                assert_eq!(record.topic, "status");
                assert_eq!(record.key_str(), Some("dev0"));
                assert_eq!(record.value, Bytes::from("SUBSCRIBE_data0"));
                assert!(!retain);
            }
            other => panic!("Expected MessageReceived route, got {other:?}"),
        }
    }

    #[test]
    fn test_outgoing_disconnect_is_distinguished() {
        let sent = Event::Outgoing(rumqttc::Outgoing::Disconnect);
        assert!(matches!(
            MessageHandler::route_mqtt_event(&sent),
            EventRoute::DisconnectSent
        ));

        let publish = Event::Outgoing(rumqttc::Outgoing::Publish(3));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&publish),
            EventRoute::OutgoingEvent
        ));
    }

    #[test]
    fn test_suback_counts_refused_filters() {
        let suback = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 7,
            return_codes: vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::NotAuthorized,
                SubscribeReasonCode::Success(QoS::AtMostOnce),
            ],
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&suback) {
            EventRoute::SubscriptionConfirmed { packet_id, failed } => {
                assert_eq!(packet_id, 7);
                assert_eq!(failed, 1);
            }
            other => panic!("Expected SubscriptionConfirmed route, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_record_forwarder() {
        let mut forwarder = RecordForwarder::new();
        let record = InboundRecord::new("data0", "frame");

        assert!(forwarder.forward_record(record.clone()).await.is_err());

        let (tx, mut rx) = mpsc::channel(1);
        forwarder.set_record_sender(tx);
        forwarder.forward_record(record.clone()).await.unwrap();

        assert_eq!(rx.recv().await, Some(record));
    }
}
