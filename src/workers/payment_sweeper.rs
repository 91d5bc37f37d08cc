use crate::payments::error::PaymentError;
use crate::payments::types::Payment;
use crate::services::reconciliation::ReconciliationCoordinator;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    /// How often the sweeper wakes up.
    pub interval: Duration,
    /// Age after which a non-terminal payment is considered abandoned.
    pub pending_ttl: Duration,
    /// Maximum number of payments examined per cycle.
    pub batch_size: i64,
    /// Ask the gateway before cancelling, so a late success is honoured.
    pub verify_first: bool,
    pub concurrency: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(300),
            pending_ttl: Duration::from_secs(86_400),
            batch_size: 100,
            verify_first: true,
            concurrency: 4,
        }
    }
}

impl SweepConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.enabled = std::env::var("PAYMENT_SWEEP_ENABLED")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(cfg.enabled);
        cfg.interval = Duration::from_secs(
            std::env::var("PAYMENT_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.pending_ttl = Duration::from_secs(
            std::env::var("PAYMENT_PENDING_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.pending_ttl.as_secs()),
        );
        cfg.batch_size = std::env::var("PAYMENT_SWEEP_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.batch_size);
        cfg.verify_first = std::env::var("PAYMENT_SWEEP_VERIFY_FIRST")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(cfg.verify_first);
        cfg
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub cancelled: usize,
    /// Settled by the gateway's answer instead of being cancelled.
    pub reconciled: usize,
    /// Left alone this cycle because the gateway could not be reached.
    pub skipped: usize,
    pub errors: usize,
}

enum SweepAction {
    Cancelled,
    Reconciled,
    Skipped,
    Failed,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Cancels payments that have sat in `pending`/`processing` past their TTL.
pub struct PaymentSweeper {
    coordinator: Arc<ReconciliationCoordinator>,
    config: SweepConfig,
}

impl PaymentSweeper {
    pub fn new(coordinator: Arc<ReconciliationCoordinator>, config: SweepConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            pending_ttl_secs = self.config.pending_ttl.as_secs(),
            batch_size = self.config.batch_size,
            verify_first = self.config.verify_first,
            "payment sweeper started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("payment sweeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.run_cycle().await {
                        Ok(report) if report.examined > 0 => {
                            info!(
                                examined = report.examined,
                                cancelled = report.cancelled,
                                reconciled = report.reconciled,
                                skipped = report.skipped,
                                errors = report.errors,
                                "payment sweep finished"
                            );
                        }
                        Ok(_) => debug!("payment sweep found nothing to do"),
                        Err(e) => warn!(error = %e, "payment sweep cycle failed"),
                    }
                }
            }
        }

        info!("payment sweeper stopped");
    }

    /// One pass over the stale payments. Per-payment failures are counted,
    /// not propagated.
    pub async fn run_cycle(&self) -> Result<SweepReport, PaymentError> {
        let ttl = chrono::Duration::from_std(self.config.pending_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = Utc::now() - ttl;

        let stale = self
            .coordinator
            .engine()
            .stale_payments(cutoff, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };

        let actions: Vec<SweepAction> = stream::iter(stale)
            .map(|payment| self.sweep_one(payment))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for action in actions {
            match action {
                SweepAction::Cancelled => report.cancelled += 1,
                SweepAction::Reconciled => report.reconciled += 1,
                SweepAction::Skipped => report.skipped += 1,
                SweepAction::Failed => report.errors += 1,
            }
        }
        Ok(report)
    }

    async fn sweep_one(&self, payment: Payment) -> SweepAction {
        if self.config.verify_first {
            match self.coordinator.verify(&payment.gateway_reference).await {
                Ok(current) if current.status.is_terminal() => {
                    info!(
                        payment_id = %current.id,
                        status = %current.status,
                        "stale payment settled by gateway"
                    );
                    return SweepAction::Reconciled;
                }
                Ok(_) => {}
                Err(PaymentError::GatewayUnavailable { .. }) => {
                    warn!(
                        payment_id = %payment.id,
                        "gateway unreachable, leaving stale payment for next sweep"
                    );
                    return SweepAction::Skipped;
                }
                Err(PaymentError::AmountMismatch { .. }) => return SweepAction::Reconciled,
                Err(e) => {
                    // The gateway may not know a checkout that never opened.
                    debug!(payment_id = %payment.id, error = %e, "verification before sweep failed");
                }
            }
        }

        match self.coordinator.engine().cancel(payment.id).await {
            Ok(cancelled) => {
                info!(
                    payment_id = %cancelled.id,
                    booking_reference = %cancelled.booking_reference,
                    age_secs = (Utc::now() - cancelled.created_at).num_seconds(),
                    "expired payment cancelled"
                );
                SweepAction::Cancelled
            }
            Err(PaymentError::InvalidTransition { from, .. }) => {
                debug!(payment_id = %payment.id, status = %from, "payment settled during sweep");
                SweepAction::Reconciled
            }
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "failed to cancel expired payment");
                SweepAction::Failed
            }
        }
    }
}
