use crate::services::notification::{
    NotificationConfig, NotificationError, Notifier, PaymentNotification,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Longest wait between two delivery attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Drains the notification queue and delivers each notification with a
/// per-attempt timeout and exponential backoff between attempts.
pub struct NotificationWorker {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    max_retries: u32,
    base_backoff: Duration,
    max_in_flight: usize,
}

impl NotificationWorker {
    pub fn new(notifier: Arc<dyn Notifier>, config: &NotificationConfig) -> Self {
        Self {
            notifier,
            timeout: config.timeout,
            max_retries: config.max_retries,
            base_backoff: config.base_backoff,
            max_in_flight: config.max_in_flight.max(1),
        }
    }

    pub async fn run(
        self,
        mut rx: mpsc::Receiver<PaymentNotification>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(
            timeout_secs = self.timeout.as_secs(),
            max_retries = self.max_retries,
            max_in_flight = self.max_in_flight,
            "notification worker started"
        );

        let max_in_flight = self.max_in_flight;
        let worker = Arc::new(self);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("notification worker stopping");
                        break;
                    }
                }
                // At the limit the queue is left to fill, so dispatchers see it full.
                received = rx.recv(), if in_flight.len() < max_in_flight => {
                    let Some(notification) = received else {
                        info!("notification queue closed");
                        break;
                    };
                    let worker = Arc::clone(&worker);
                    in_flight.spawn(async move {
                        worker.deliver(notification).await;
                    });
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        // Deliveries already in progress get to finish.
        while in_flight.join_next().await.is_some() {}
        info!("notification worker stopped");
    }

    /// Returns whether delivery eventually succeeded. Failures are logged, never raised.
    pub async fn deliver(&self, notification: PaymentNotification) -> bool {
        let mut attempt = 0;
        loop {
            let result =
                match tokio::time::timeout(self.timeout, self.notifier.send(&notification)).await {
                    Ok(result) => result,
                    Err(_) => Err(NotificationError::Timeout(self.timeout)),
                };

            match result {
                Ok(()) => {
                    debug!(
                        payment_id = %notification.payment_id,
                        kind = ?notification.kind,
                        attempt = attempt + 1,
                        "notification delivered"
                    );
                    return true;
                }
                Err(e) if attempt < self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        payment_id = %notification.payment_id,
                        attempt = attempt + 1,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "notification delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        payment_id = %notification.payment_id,
                        kind = ?notification.kind,
                        attempts = attempt + 1,
                        error = %e,
                        "notification delivery abandoned"
                    );
                    return false;
                }
            }
        }
    }

    /// `base_backoff * 2^attempt`, capped at [`MAX_BACKOFF`].
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }
}
