//! Topic contract and in-process publish/subscribe bus.
//!
//! Each patient owns one namespace of five logical channels with fixed
//! delivery semantics. The bus itself is an in-process broker built on
//! broadcast channels plus a retained-message store; delivery inside one
//! process is reliable, so the QoS levels are carried as channel metadata
//! and the exactly-once guarantee of the command channel is enforced where
//! it matters: the pump refuses to apply a command id twice.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

pub const BUS_CHANNEL_CAPACITY: usize = 256;

/// MQTT-style delivery guarantee attached to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// One logical channel: topic, delivery guarantee, retained flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub topic: String,
    pub qos: QosLevel,
    pub retained: bool,
}

/// The per-patient topic namespace, base `/iot/patient/{id}`.
#[derive(Debug, Clone)]
pub struct PatientTopics {
    pub base: String,
    /// sensor -> engine
    pub glucose_data: ChannelSpec,
    /// engine -> pump; duplicate application would double-dose
    pub pump_command: ChannelSpec,
    /// pump -> engine, dashboards; last value retained
    pub pump_status: ChannelSpec,
    /// any -> logger, dashboards
    pub alert: ChannelSpec,
    /// config -> dashboards; retained, rarely published
    pub patient_info: ChannelSpec,
}

impl PatientTopics {
    pub fn new(patient_id: &str) -> Self {
        let base = format!("/iot/patient/{patient_id}");
        Self {
            glucose_data: ChannelSpec {
                topic: format!("{base}/glucose/sensor/data"),
                qos: QosLevel::AtLeastOnce,
                retained: false,
            },
            pump_command: ChannelSpec {
                topic: format!("{base}/insulin/pump/command"),
                qos: QosLevel::ExactlyOnce,
                retained: false,
            },
            pump_status: ChannelSpec {
                topic: format!("{base}/insulin/pump/status"),
                qos: QosLevel::AtLeastOnce,
                retained: true,
            },
            alert: ChannelSpec {
                topic: format!("{base}/notifications/alert"),
                qos: QosLevel::AtLeastOnce,
                retained: false,
            },
            patient_info: ChannelSpec {
                topic: format!("{base}/info"),
                qos: QosLevel::AtLeastOnce,
                retained: true,
            },
            base,
        }
    }
}

/// A published payload with its topic.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// The subscriber fell behind and `n` messages were dropped. Acceptable
    /// on at-least-once channels; the subscriber logs and continues.
    #[error("subscriber lagged, {0} messages dropped")]
    Lagged(u64),
    #[error("bus closed")]
    Closed,
}

/// In-process broker: one broadcast channel per topic plus a retained store.
#[derive(Debug, Clone, Default)]
pub struct MessageBus {
    inner: Arc<Mutex<BusInner>>,
}

#[derive(Debug, Default)]
struct BusInner {
    channels: HashMap<String, broadcast::Sender<BusMessage>>,
    retained: HashMap<String, BusMessage>,
}

impl BusInner {
    fn sender(&mut self, topic: &str) -> &broadcast::Sender<BusMessage> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(BUS_CHANNEL_CAPACITY).0)
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a payload on a channel. When the channel is retained the
    /// payload replaces the stored last value so late subscribers see it
    /// immediately. Returns the number of current subscribers reached.
    pub async fn publish(&self, spec: &ChannelSpec, payload: String) -> usize {
        let message = BusMessage {
            topic: spec.topic.clone(),
            payload,
        };

        let mut inner = self.inner.lock().await;
        if spec.retained {
            inner.retained.insert(spec.topic.clone(), message.clone());
        }
        // Err means no live subscriber, which is fine for fire-and-forget.
        inner.sender(&spec.topic).send(message).unwrap_or(0)
    }

    /// Subscribe to a channel. On a retained channel the stored last value
    /// is delivered before any live message.
    pub async fn subscribe(&self, spec: &ChannelSpec) -> Subscription {
        let mut inner = self.inner.lock().await;
        let receiver = inner.sender(&spec.topic).subscribe();
        let retained = if spec.retained {
            inner.retained.get(&spec.topic).cloned()
        } else {
            None
        };
        Subscription { retained, receiver }
    }

    /// The retained value currently stored for a topic, if any.
    pub async fn retained(&self, spec: &ChannelSpec) -> Option<BusMessage> {
        let inner = self.inner.lock().await;
        inner.retained.get(&spec.topic).cloned()
    }
}

#[derive(Debug)]
pub struct Subscription {
    retained: Option<BusMessage>,
    receiver: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    /// Receive the next message; the retained snapshot, if one was present
    /// at subscribe time, arrives first.
    pub async fn recv(&mut self) -> Result<BusMessage, SubscriptionError> {
        if let Some(message) = self.retained.take() {
            return Ok(message);
        }
        match self.receiver.recv().await {
            Ok(message) => Ok(message),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(SubscriptionError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(SubscriptionError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_live_subscribers() {
        let bus = MessageBus::new();
        let topics = PatientTopics::new("patient_001");

        let mut sub = bus.subscribe(&topics.glucose_data).await;
        let reached = bus
            .publish(&topics.glucose_data, "payload".to_string())
            .await;
        assert_eq!(reached, 1);

        let message = sub.recv().await.unwrap();
        assert_eq!(message.payload, "payload");
        assert_eq!(message.topic, topics.glucose_data.topic);
    }

    #[tokio::test]
    async fn retained_message_delivered_to_late_subscriber() {
        let bus = MessageBus::new();
        let topics = PatientTopics::new("patient_001");

        bus.publish(&topics.pump_status, "old".to_string()).await;
        bus.publish(&topics.pump_status, "current".to_string()).await;

        let mut late = bus.subscribe(&topics.pump_status).await;
        let first = late.recv().await.unwrap();
        assert_eq!(first.payload, "current");
    }

    #[tokio::test]
    async fn non_retained_channels_store_nothing() {
        let bus = MessageBus::new();
        let topics = PatientTopics::new("patient_001");

        bus.publish(&topics.alert, "gone".to_string()).await;
        assert!(bus.retained(&topics.alert).await.is_none());
    }

    #[test]
    fn topic_layout_matches_contract() {
        let topics = PatientTopics::new("p42");
        assert_eq!(topics.base, "/iot/patient/p42");
        assert_eq!(topics.glucose_data.topic, "/iot/patient/p42/glucose/sensor/data");
        assert_eq!(topics.pump_command.topic, "/iot/patient/p42/insulin/pump/command");
        assert_eq!(topics.pump_status.topic, "/iot/patient/p42/insulin/pump/status");
        assert_eq!(topics.alert.topic, "/iot/patient/p42/notifications/alert");
        assert_eq!(topics.patient_info.topic, "/iot/patient/p42/info");

        assert_eq!(topics.pump_command.qos, QosLevel::ExactlyOnce);
        assert!(topics.pump_status.retained);
        assert!(!topics.glucose_data.retained);
    }
}
