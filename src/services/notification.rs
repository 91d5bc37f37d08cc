use crate::payments::types::{Payment, PaymentStatus};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PaymentCompleted,
    PaymentFailed,
}

impl NotificationType {
    /// Only completion and failure are announced to the customer.
    pub fn for_status(status: PaymentStatus) -> Option<Self> {
        match status {
            PaymentStatus::Completed => Some(NotificationType::PaymentCompleted),
            PaymentStatus::Failed => Some(NotificationType::PaymentFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentNotification {
    pub kind: NotificationType,
    pub payment_id: Uuid,
    pub booking_reference: String,
    pub gateway_reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub customer_email: String,
    pub customer_name: String,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl PaymentNotification {
    pub fn from_payment(payment: &Payment) -> Option<Self> {
        let kind = NotificationType::for_status(payment.status)?;
        Some(Self {
            kind,
            payment_id: payment.id,
            booking_reference: payment.booking_reference.clone(),
            gateway_reference: payment.gateway_reference.clone(),
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
            customer_email: payment.customer.email.clone(),
            customer_name: payment.customer.name.clone(),
            failure_reason: payment.failure_reason.clone(),
            paid_at: payment.paid_at,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),

    #[error("notification delivery timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &PaymentNotification) -> Result<(), NotificationError>;
}

/// Writes notifications to the structured log.
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &PaymentNotification) -> Result<(), NotificationError> {
        match notification.kind {
            NotificationType::PaymentCompleted => {
                info!(
                    payment_id = %notification.payment_id,
                    booking_reference = %notification.booking_reference,
                    amount = %notification.amount,
                    currency = %notification.currency,
                    email = %notification.customer_email,
                    "🔔 NOTIFICATION: Payment Completed - booking {} confirmed",
                    notification.booking_reference
                );
            }
            NotificationType::PaymentFailed => {
                error!(
                    payment_id = %notification.payment_id,
                    booking_reference = %notification.booking_reference,
                    email = %notification.customer_email,
                    reason = notification.failure_reason.as_deref().unwrap_or("unspecified"),
                    "🔔 NOTIFICATION: Payment Failed - booking {}",
                    notification.booking_reference
                );
            }
        }
        Ok(())
    }
}

/// Posts notifications as JSON to an outbound webhook.
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, notification: &PaymentNotification) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Delivery(format!(
                "webhook returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub queue_capacity: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Deliveries running at once. The worker stops reading the queue at this limit.
    pub max_in_flight: usize,
    pub webhook_url: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            timeout: Duration::from_secs(10),
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_in_flight: 8,
            webhook_url: None,
        }
    }
}

impl NotificationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.queue_capacity = std::env::var("NOTIFICATION_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.queue_capacity);
        cfg.timeout = Duration::from_secs(
            std::env::var("NOTIFICATION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.timeout.as_secs()),
        );
        cfg.max_retries = std::env::var("NOTIFICATION_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(cfg.max_retries);
        cfg.max_in_flight = std::env::var("NOTIFICATION_MAX_IN_FLIGHT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.max_in_flight);
        cfg.webhook_url = std::env::var("NOTIFICATION_WEBHOOK_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        cfg
    }
}

/// Sending half of the notification queue. Never blocks: a full or closed
/// queue drops the notification with a warning.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<PaymentNotification>,
}

impl NotificationDispatcher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PaymentNotification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Returns whether the notification was queued.
    pub fn dispatch(&self, notification: PaymentNotification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    payment_id = %dropped.payment_id,
                    kind = ?dropped.kind,
                    "notification queue full, dropping notification"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!(
                    payment_id = %dropped.payment_id,
                    "notification worker stopped, dropping notification"
                );
                false
            }
        }
    }
}
