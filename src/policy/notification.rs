//! Notification role: compose user-facing messages and hand them to a notifier
//!
//! Message composition is pure; delivery goes through the [`Notifier`]
//! seam so tests can record what would have been sent.

use super::ConsumerPolicy;
use crate::error::Result;
use crate::types::{ActionKind, Event};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Kind of notification sent to a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LoginAlert,
    PurchaseConfirmation,
    ProfileChange,
}

/// A composed notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub subject_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl Notification {
    fn new(kind: NotificationKind, subject_id: &str, message: String) -> Self {
        Self {
            kind,
            subject_id: subject_id.to_string(),
            message,
            product_id: None,
            amount: None,
            currency: None,
        }
    }
}

/// Compose the notification for an event, if its kind warrants one
///
/// Missing optional payload fields are left out of the message rather
/// than failing the event.
pub fn compose(event: &Event) -> Option<Notification> {
    let subject = event.subject_id();
    match event.action_kind() {
        ActionKind::Login => {
            let mut message = "New login to your account".to_string();
            if let Some(ip) = event.payload_text("ip") {
                message.push_str(&format!(" from {}", ip));
            }
            Some(Notification::new(NotificationKind::LoginAlert, subject, message))
        }
        ActionKind::Purchase => {
            let product_id = event.payload_text("productId");
            let amount = event.payload_f64("amount");
            let currency = event.payload_text("currency");

            let mut message = "Purchase confirmed".to_string();
            if let Some(ref product) = product_id {
                message.push_str(&format!(": {}", product));
            }
            if let Some(amount) = amount {
                message.push_str(&format!(" for {:.2}", amount));
                if let Some(ref currency) = currency {
                    message.push_str(&format!(" {}", currency));
                }
            }

            let mut notification =
                Notification::new(NotificationKind::PurchaseConfirmation, subject, message);
            notification.product_id = product_id;
            notification.amount = amount;
            notification.currency = currency;
            Some(notification)
        }
        ActionKind::ProfileUpdate => {
            let mut message = "Your profile was updated".to_string();
            if let Some(field) = event.payload_text("field") {
                message.push_str(&format!(" ({} changed)", field));
            }
            Some(Notification::new(NotificationKind::ProfileChange, subject, message))
        }
        ActionKind::Other(_) => None,
    }
}

/// Delivery seam for composed notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that only logs what it would send
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            kind = ?notification.kind,
            subject = %notification.subject_id,
            message = %notification.message,
            "Notification sent"
        );
        Ok(())
    }
}

/// Notifier that keeps every notification; clones share the record
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Counters kept by the notification role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub sent: u64,
    /// Events that warranted no notification
    pub skipped: u64,
}

/// Sends one notification per recognized event
pub struct NotificationPolicy<N: Notifier = LogNotifier> {
    notifier: N,
    stats: NotificationStats,
}

impl Default for NotificationPolicy<LogNotifier> {
    fn default() -> Self {
        Self::new(LogNotifier)
    }
}

impl<N: Notifier> NotificationPolicy<N> {
    pub fn new(notifier: N) -> Self {
        Self {
            notifier,
            stats: NotificationStats::default(),
        }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }
}

#[async_trait]
impl<N: Notifier + 'static> ConsumerPolicy for NotificationPolicy<N> {
    type Snapshot = NotificationStats;

    fn role(&self) -> &str {
        "notification"
    }

    async fn handle(&mut self, event: &Event) -> Result<()> {
        match compose(event) {
            Some(notification) => {
                self.notifier.send(&notification).await?;
                self.stats.sent += 1;
            }
            None => {
                tracing::debug!(
                    kind = %event.action_kind(),
                    subject = event.subject_id(),
                    "No notification for action kind"
                );
                self.stats.skipped += 1;
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> NotificationStats {
        self.stats
    }
}
