use chatrelay_core::models::generate_event_id;
use chatrelay_core::{ChatId, ConnectionId, RegionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detail type carried by every message envelope. Channels and subscribers
/// ignore envelopes with any other detail type.
pub const DETAIL_TYPE: &str = "ChatMessageReceived";

/// A chat message produced by one client connection, as it travels between
/// regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub chat_id: ChatId,
    pub sender_connection_id: ConnectionId,
    /// Opaque message body, forwarded verbatim
    pub message: String,
    /// Region whose client produced the message
    pub origin_region: RegionId,
    pub event_id: String,
    pub sent_at: DateTime<Utc>,
}

impl MessageEvent {
    #[must_use]
    pub fn new(
        chat_id: ChatId,
        sender_connection_id: ConnectionId,
        message: String,
        origin_region: RegionId,
    ) -> Self {
        Self {
            chat_id,
            sender_connection_id,
            message,
            origin_region,
            event_id: generate_event_id(),
            sent_at: Utc::now(),
        }
    }
}

/// Who put an envelope on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Published by the origin region for a client message
    Client,
    /// Copy of a client message forwarded to a peer region
    Replica,
}

impl EventSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Replica => "replica",
        }
    }
}

/// Wire format of a message event on an event channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEnvelope {
    pub source: EventSource,
    pub detail_type: String,
    pub event: MessageEvent,
}

impl RelayEnvelope {
    #[must_use]
    pub fn client(event: MessageEvent) -> Self {
        Self {
            source: EventSource::Client,
            detail_type: DETAIL_TYPE.to_string(),
            event,
        }
    }

    #[must_use]
    pub fn replica(event: MessageEvent) -> Self {
        Self {
            source: EventSource::Replica,
            detail_type: DETAIL_TYPE.to_string(),
            event,
        }
    }

    #[must_use]
    pub fn is_replica(&self) -> bool {
        self.source == EventSource::Replica
    }

    #[must_use]
    pub fn is_chat_message(&self) -> bool {
        self.detail_type == DETAIL_TYPE
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> MessageEvent {
        MessageEvent::new(
            ChatId::from("default"),
            ConnectionId::from("abc123="),
            "Hello world!".to_string(),
            RegionId::from("eu-west-1"),
        )
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = RelayEnvelope::replica(event());
        let json = envelope.to_json().unwrap();

        assert!(json.contains("\"source\":\"replica\""));
        assert!(json.contains("\"detailType\":\"ChatMessageReceived\""));
        assert!(json.contains("\"senderConnectionId\":\"abc123=\""));
        assert!(json.contains("\"originRegion\":\"eu-west-1\""));

        let decoded = RelayEnvelope::from_json(&json).unwrap();
        assert_eq!(decoded, envelope);
        assert!(decoded.is_replica());
        assert!(decoded.is_chat_message());
    }

    #[test]
    fn test_message_is_forwarded_verbatim() {
        let mut e = event();
        e.message = "{\"nested\": \"json\", \"emoji\": \"\u{1f44b}\"}".to_string();
        let json = RelayEnvelope::client(e.clone()).to_json().unwrap();
        let decoded = RelayEnvelope::from_json(&json).unwrap();
        assert_eq!(decoded.event.message, e.message);
    }

    #[test]
    fn test_event_ids_are_unique() {
        assert_ne!(event().event_id, event().event_id);
        assert_eq!(event().event_id.len(), 16);
    }

    #[test]
    fn test_unknown_detail_type_is_not_a_chat_message() {
        let json = r#"{
            "source": "client",
            "detailType": "SomethingElse",
            "event": {
                "chatId": "default",
                "senderConnectionId": "c1",
                "message": "hi",
                "originRegion": "us-east-1",
                "eventId": "0123456789abcdef",
                "sentAt": "2026-01-01T00:00:00Z"
            }
        }"#;
        let envelope = RelayEnvelope::from_json(json).unwrap();
        assert!(!envelope.is_chat_message());
        assert!(!envelope.is_replica());
    }
}
