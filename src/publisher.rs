//! Publisher: validates actions and broadcasts them as events
//!
//! The publisher declares its channel on connect, so publishing never
//! targets a channel that does not exist yet. It knows nothing about the
//! queues bound to the channel.

use crate::broker::Broker;
use crate::error::{BroadcastError, Result};
use crate::types::{Action, Event, Payload};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

/// Publishes events to one broadcast channel
pub struct Publisher {
    broker: Arc<dyn Broker>,
    channel: String,
    durable: bool,
}

impl Publisher {
    /// Declare `channel` (durable) and return a publisher for it
    pub async fn connect(broker: Arc<dyn Broker>, channel: impl Into<String>) -> Result<Self> {
        Self::connect_with(broker, channel, true).await
    }

    /// Declare `channel` with the given durability and return a publisher for it
    ///
    /// Events published through a durable publisher are marked persistent.
    pub async fn connect_with(
        broker: Arc<dyn Broker>,
        channel: impl Into<String>,
        durable: bool,
    ) -> Result<Self> {
        let channel = channel.into();
        broker.declare_channel(&channel, durable).await?;

        tracing::info!(channel = %channel, durable, broker = broker.name(), "Publisher connected");
        Ok(Self {
            broker,
            channel,
            durable,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Validate an action, stamp it, and broadcast it
    pub async fn publish(&self, action: Action) -> Result<Event> {
        let payload = validate(&action)?;
        let event = Event::new(action.kind, action.subject_id, payload);
        self.publish_event(&event).await?;
        Ok(event)
    }

    /// Broadcast a pre-built event, returning the broker sequence number
    pub async fn publish_event(&self, event: &Event) -> Result<u64> {
        let body = Bytes::from(event.to_bytes()?);
        let sequence = self.broker.publish(&self.channel, body, self.durable).await?;

        tracing::debug!(
            channel = %self.channel,
            kind = %event.action_kind(),
            subject = event.subject_id(),
            sequence,
            "Event published"
        );
        Ok(sequence)
    }
}

/// Check an action's shape and extract its payload
///
/// Subject and kind must be non-empty; the payload must be absent (null)
/// or an object whose values are all scalars.
pub fn validate(action: &Action) -> Result<Payload> {
    if action.subject_id.trim().is_empty() {
        return Err(BroadcastError::Validation("subjectId cannot be empty".to_string()));
    }
    if action.kind.as_str().trim().is_empty() {
        return Err(BroadcastError::Validation("action kind cannot be empty".to_string()));
    }

    let payload = match &action.payload {
        Value::Null => Payload::new(),
        Value::Object(map) => map.clone(),
        other => {
            return Err(BroadcastError::Validation(format!(
                "payload must be an object, got {}",
                type_name(other)
            )))
        }
    };

    for (key, value) in &payload {
        if matches!(value, Value::Array(_) | Value::Object(_)) {
            return Err(BroadcastError::Validation(format!(
                "payload field '{}' must be a scalar, got {}",
                key,
                type_name(value)
            )));
        }
    }

    Ok(payload)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
