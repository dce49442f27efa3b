use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier distinguishing event kinds.
///
/// Client-originated control events and server-originated events share the
/// same identifier space; the concrete set of ids is defined by the host
/// application and its server contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionEventId(String);

impl SessionEventId {
    /// Reserved control id asking the server to start delivering a topic.
    pub const TOPIC_SUBSCRIBE: &'static str = "topic_subscribe";
    /// Reserved control id asking the server to stop delivering a topic.
    pub const TOPIC_UNSUBSCRIBE: &'static str = "topic_unsubscribe";

    /// Wrap a raw event identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id belongs to the reserved control-event subset.
    pub fn is_control(&self) -> bool {
        self.0 == Self::TOPIC_SUBSCRIBE || self.0 == Self::TOPIC_UNSUBSCRIBE
    }
}

impl From<&str> for SessionEventId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionEventId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a topic partition of the event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TopicId(String);

impl TopicId {
    /// Wrap a raw topic name.
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// Raw topic string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TopicId {
    fn from(topic: &str) -> Self {
        Self::new(topic)
    }
}

impl From<String> for TopicId {
    fn from(topic: String) -> Self {
        Self(topic)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit of information flowing through the channel in either direction.
///
/// `id` is always present; `topic_id` is present only for events relevant to
/// topic subscription and delivery. All other fields live in the open
/// `payload` map, whose shape depends on `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEvent {
    /// Event kind identifier.
    pub id: SessionEventId,
    /// Topic grouping for topic-scoped events; `None` for channel-wide events.
    #[serde(rename = "topicId", skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<TopicId>,
    /// Additional id-dependent fields, kept in wire shape.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl SessionEvent {
    /// Create a channel-wide event with an empty payload.
    pub fn new(id: impl Into<SessionEventId>) -> Self {
        Self {
            id: id.into(),
            topic_id: None,
            payload: Map::new(),
        }
    }

    /// Attach a topic to the event.
    pub fn with_topic(mut self, topic: impl Into<TopicId>) -> Self {
        self.topic_id = Some(topic.into());
        self
    }

    /// Attach a payload field to the event.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Control event telling the server to start delivering `topic`.
    pub fn topic_subscribe(topic: impl Into<TopicId>) -> Self {
        Self::new(SessionEventId::TOPIC_SUBSCRIBE).with_topic(topic)
    }

    /// Control event telling the server to stop delivering `topic`.
    pub fn topic_unsubscribe(topic: impl Into<TopicId>) -> Self {
        Self::new(SessionEventId::TOPIC_UNSUBSCRIBE).with_topic(topic)
    }

    /// Whether this event belongs to the reserved control subset.
    pub fn is_control(&self) -> bool {
        self.id.is_control()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_wire_shape_with_camel_case_topic() {
        let event = SessionEvent::new("datasource_updated")
            .with_topic("db-events")
            .with_field("nodeId", "node-1");

        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(
            value,
            json!({
                "id": "datasource_updated",
                "topicId": "db-events",
                "nodeId": "node-1",
            })
        );
    }

    #[test]
    fn omits_topic_for_channel_wide_events() {
        let event = SessionEvent::new("config_changed");
        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value, json!({ "id": "config_changed" }));
    }

    #[test]
    fn deserializes_unknown_fields_into_payload() {
        let event: SessionEvent = serde_json::from_value(json!({
            "id": "session_log_updated",
            "topicId": "session-log",
            "severity": "warning",
            "count": 3,
        }))
        .expect("event should deserialize");

        assert_eq!(event.id, SessionEventId::new("session_log_updated"));
        assert_eq!(event.topic_id, Some(TopicId::new("session-log")));
        assert_eq!(event.payload["severity"], json!("warning"));
        assert_eq!(event.payload["count"], json!(3));
    }

    #[test]
    fn control_constructors_always_carry_a_topic() {
        let sub = SessionEvent::topic_subscribe("db-events");
        let unsub = SessionEvent::topic_unsubscribe("db-events");

        assert!(sub.is_control());
        assert!(unsub.is_control());
        assert_eq!(sub.topic_id, Some(TopicId::new("db-events")));
        assert_eq!(unsub.topic_id, Some(TopicId::new("db-events")));
    }

    #[test]
    fn regular_ids_are_not_control_ids() {
        assert!(!SessionEventId::new("datasource_updated").is_control());
        assert!(SessionEventId::new(SessionEventId::TOPIC_SUBSCRIBE).is_control());
    }
}
