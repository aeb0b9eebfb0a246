//! Core event types for the a3s-broadcast system
//!
//! All types use camelCase JSON serialization for wire compatibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Open, string-keyed event payload
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Kind of user action carried by an event
///
/// The set is open: kinds this crate does not know about are kept verbatim
/// in `Other` so consumers can fall through to their default handling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    Login,
    Purchase,
    ProfileUpdate,
    Other(String),
}

impl ActionKind {
    /// Wire name of this kind
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Login => "login",
            ActionKind::Purchase => "purchase",
            ActionKind::ProfileUpdate => "profile_update",
            ActionKind::Other(raw) => raw,
        }
    }

    /// Whether this is one of the kinds with dedicated consumer handling
    pub fn is_known(&self) -> bool {
        !matches!(self, ActionKind::Other(_))
    }
}

impl From<String> for ActionKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "login" => ActionKind::Login,
            "purchase" => ActionKind::Purchase,
            "profile_update" => ActionKind::ProfileUpdate,
            _ => ActionKind::Other(raw),
        }
    }
}

impl From<&str> for ActionKind {
    fn from(raw: &str) -> Self {
        ActionKind::from(raw.to_string())
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain event broadcast to every bound consumer queue
///
/// Events are immutable once built: fields are only reachable through
/// accessors, and every queue receives its own copy of the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    action_kind: ActionKind,

    subject_id: String,

    /// Producer-assigned; not guaranteed monotonic across publishers
    occurred_at: DateTime<Utc>,

    #[serde(default)]
    payload: Payload,
}

impl Event {
    /// Create a new event stamped with the current time
    pub fn new(
        action_kind: impl Into<ActionKind>,
        subject_id: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self::with_timestamp(action_kind, subject_id, Utc::now(), payload)
    }

    /// Create an event with an explicit occurrence time
    pub fn with_timestamp(
        action_kind: impl Into<ActionKind>,
        subject_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: Payload,
    ) -> Self {
        Self {
            action_kind: action_kind.into(),
            subject_id: subject_id.into(),
            occurred_at,
            payload,
        }
    }

    pub fn action_kind(&self) -> &ActionKind {
        &self.action_kind
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// String payload field, if present and a string
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    /// Numeric payload field, if present and a number
    pub fn payload_f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(|v| v.as_f64())
    }

    /// Payload field rendered as text (strings verbatim, numbers and bools
    /// formatted), `None` when absent, null, or not a scalar
    pub fn payload_text(&self, key: &str) -> Option<String> {
        match self.payload.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Serialize to the JSON wire format
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the JSON wire format
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// An action submitted to the publisher, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub kind: ActionKind,

    pub subject_id: String,

    /// Must be a JSON object of scalar values (or null for no payload)
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Action {
    pub fn new(
        kind: impl Into<ActionKind>,
        subject_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            subject_id: subject_id.into(),
            payload,
        }
    }
}

/// A decoded event with delivery context
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    /// The event data
    pub event: Event,

    /// Queue the event was delivered from
    pub queue: String,

    /// Broker-assigned sequence number
    pub sequence: u64,

    /// Number of delivery attempts, including this one
    pub num_delivered: u64,
}

impl ReceivedEvent {
    /// Whether this delivery is a redelivery of an earlier attempt
    pub fn is_redelivery(&self) -> bool {
        self.num_delivered > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_action_kind_known_values() {
        assert_eq!(ActionKind::from("login"), ActionKind::Login);
        assert_eq!(ActionKind::from("purchase"), ActionKind::Purchase);
        assert_eq!(ActionKind::from("profile_update"), ActionKind::ProfileUpdate);
        assert!(ActionKind::Purchase.is_known());
    }

    #[test]
    fn test_action_kind_unknown_is_preserved() {
        let kind = ActionKind::from("password_reset");
        assert_eq!(kind, ActionKind::Other("password_reset".to_string()));
        assert!(!kind.is_known());
        assert_eq!(kind.to_string(), "password_reset");
    }

    #[test]
    fn test_event_wire_format() {
        let occurred = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = Event::with_timestamp(
            ActionKind::Purchase,
            "bob456",
            occurred,
            payload(json!({"productId": "LAPTOP-001", "amount": 1299.99})),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["actionKind"], "purchase");
        assert_eq!(value["subjectId"], "bob456");
        assert_eq!(value["occurredAt"], "2024-05-01T10:00:00Z");
        assert_eq!(value["payload"]["productId"], "LAPTOP-001");
    }

    #[test]
    fn test_event_decodes_unknown_kind() {
        let json = r#"{
            "actionKind": "logout",
            "subjectId": "alice123",
            "occurredAt": "2024-05-01T10:00:00.123Z",
            "payload": {}
        }"#;

        let event = Event::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(event.action_kind(), &ActionKind::Other("logout".to_string()));
        assert_eq!(event.subject_id(), "alice123");
    }

    #[test]
    fn test_event_missing_payload_defaults_empty() {
        let json = r#"{"actionKind":"login","subjectId":"a","occurredAt":"2024-05-01T10:00:00Z"}"#;
        let event = Event::from_bytes(json.as_bytes()).unwrap();
        assert!(event.payload().is_empty());
    }

    #[test]
    fn test_payload_accessors() {
        let event = Event::new(
            "purchase",
            "bob456",
            payload(json!({"productId": 42, "amount": 10.5, "currency": "USD", "gift": null})),
        );

        assert_eq!(event.payload_str("currency"), Some("USD"));
        assert_eq!(event.payload_str("productId"), None);
        assert_eq!(event.payload_text("productId").as_deref(), Some("42"));
        assert_eq!(event.payload_f64("amount"), Some(10.5));
        assert_eq!(event.payload_text("gift"), None);
        assert_eq!(event.payload_text("missing"), None);
    }

    #[test]
    fn test_received_event_redelivery_flag() {
        let received = ReceivedEvent {
            event: Event::new("login", "a", Payload::new()),
            queue: "analytics_queue".to_string(),
            sequence: 1,
            num_delivered: 2,
        };
        assert!(received.is_redelivery());
    }
}
