//! NATS pull-consumer subscription

use crate::broker::{Delivery, Subscription};
use crate::error::{BroadcastError, Result};
use async_nats::jetstream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

/// Manual-ack subscription over a JetStream durable pull consumer
pub struct NatsSubscription {
    messages: BoxStream<'static, std::result::Result<jetstream::Message, String>>,
    queue: String,
}

impl NatsSubscription {
    pub(crate) fn new(messages: jetstream::consumer::pull::Stream, queue: &str) -> Self {
        Self {
            messages: messages.map(|m| m.map_err(|e| e.to_string())).boxed(),
            queue: queue.to_string(),
        }
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        let msg = match self.messages.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(reason)) => {
                return Err(BroadcastError::Subscribe {
                    queue: self.queue.clone(),
                    reason,
                })
            }
            None => return Ok(None),
        };

        let (sequence, num_delivered) = msg
            .info()
            .map(|info| (info.stream_sequence, info.delivered.max(1) as u64))
            .unwrap_or((0, 1));
        let body = msg.payload.clone();

        let msg = Arc::new(msg);
        let ack_msg = msg.clone();
        let nak_msg = msg;

        Ok(Some(Delivery::new(
            body,
            self.queue.clone(),
            sequence,
            num_delivered,
            move || {
                Box::pin(async move {
                    ack_msg
                        .ack()
                        .await
                        .map_err(|e| BroadcastError::Ack(e.to_string()))
                })
            },
            move || {
                Box::pin(async move {
                    nak_msg
                        .ack_with(jetstream::AckKind::Nak(None))
                        .await
                        .map_err(|e| BroadcastError::Ack(e.to_string()))
                })
            },
        )))
    }
}
