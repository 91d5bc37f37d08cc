//! Payment lifecycle engine.
//!
//! Owns every status change of a [`Payment`]. All writes go through the
//! store's conditional update so concurrent webhooks, verifications and
//! operator actions resolve to exactly one legal transition.

use crate::config::ConfigError;
use crate::database::error::StoreError;
use crate::database::repository::PaymentStore;
use crate::payments::error::{GatewayError, PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::reference::{PrefixedReferenceGenerator, ReferenceGenerator};
use crate::payments::types::{
    CheckoutRequest, CheckoutSession, CustomerContact, Evidence, Money, Payment, PaymentLookup,
    PaymentStatus,
};
use crate::services::notification::{NotificationDispatcher, PaymentNotification};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub reference_prefix: String,
    pub reference_max_attempts: u32,
    pub transition_max_attempts: u32,
    /// Upper bound on a whole checkout creation, gateway retries included.
    pub gateway_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reference_prefix: "TRV".to_string(),
            reference_max_attempts: 5,
            transition_max_attempts: 8,
            gateway_timeout: Duration::from_secs(90),
        }
    }
}

impl LifecycleConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.reference_prefix = std::env::var("PAYMENT_REFERENCE_PREFIX")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(cfg.reference_prefix);
        cfg.reference_max_attempts = std::env::var("PAYMENT_REFERENCE_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(cfg.reference_max_attempts);
        cfg.transition_max_attempts = std::env::var("PAYMENT_TRANSITION_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(cfg.transition_max_attempts);
        cfg.gateway_timeout = Duration::from_secs(
            std::env::var("PAYMENT_GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.gateway_timeout.as_secs()),
        );
        cfg
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reference_prefix.is_empty()
            || !self
                .reference_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::ValidationFailed(
                "PAYMENT_REFERENCE_PREFIX must be non-empty and alphanumeric".to_string(),
            ));
        }
        if self.reference_max_attempts == 0 || self.transition_max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "payment retry bounds must be at least 1".to_string(),
            ));
        }
        if self.gateway_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_GATEWAY_TIMEOUT_SECS".to_string(),
            ));
        }
        Ok(())
    }
}

/// Input for [`PaymentLifecycleEngine::initiate`].
#[derive(Debug, Clone)]
pub struct InitiatePaymentRequest {
    pub booking_reference: String,
    pub amount: Money,
    pub customer: CustomerContact,
    pub return_url: Option<String>,
    pub callback_url: Option<String>,
}

impl InitiatePaymentRequest {
    pub fn validate(&self) -> PaymentResult<()> {
        if self.booking_reference.trim().is_empty() {
            return Err(PaymentError::Validation {
                field: "booking_reference".to_string(),
                message: "booking reference is required".to_string(),
            });
        }
        self.amount.validate_positive("amount")?;
        self.customer.validate()
    }
}

/// Per-checkout redirect and callback URLs. `None` falls back to the
/// gateway's configured URLs.
#[derive(Debug, Clone, Default)]
pub struct CheckoutOptions {
    pub return_url: Option<String>,
    pub callback_url: Option<String>,
}

pub struct PaymentLifecycleEngine {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    references: Arc<dyn ReferenceGenerator>,
    notifications: Option<NotificationDispatcher>,
    config: LifecycleConfig,
}

impl PaymentLifecycleEngine {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            references: Arc::new(PrefixedReferenceGenerator::new(
                config.reference_prefix.clone(),
            )),
            store,
            gateway,
            notifications: None,
            config,
        }
    }

    pub fn with_notifications(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.notifications = Some(dispatcher);
        self
    }

    pub fn with_reference_generator(mut self, references: Arc<dyn ReferenceGenerator>) -> Self {
        self.references = references;
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Creates a pending payment for a booking and opens a gateway checkout.
    ///
    /// The payment is persisted before the gateway is contacted, so a
    /// gateway outage leaves a `pending` record that can be resumed with
    /// [`retry_checkout`](Self::retry_checkout).
    pub async fn initiate(&self, request: InitiatePaymentRequest) -> PaymentResult<Payment> {
        request.validate()?;

        if let Some(existing) = self
            .store
            .find_active_for_booking(&request.booking_reference)
            .await?
        {
            info!(
                booking_reference = %request.booking_reference,
                payment_id = %existing.id,
                status = %existing.status,
                "active payment already exists for booking"
            );
            return Err(PaymentError::DuplicatePayment {
                existing: Box::new(existing),
            });
        }

        let payment = self.insert_pending(&request).await?;
        self.open_checkout(
            payment,
            CheckoutOptions {
                return_url: request.return_url,
                callback_url: request.callback_url,
            },
        )
        .await
    }

    /// Re-attempts checkout creation for a pending payment whose checkout
    /// never opened.
    ///
    /// URLs given at initiate are not stored; callers pass them again in
    /// `options`, otherwise the gateway's configured URLs apply.
    pub async fn retry_checkout(
        &self,
        id: Uuid,
        options: CheckoutOptions,
    ) -> PaymentResult<Payment> {
        let payment = self.load(&PaymentLookup::Id(id)).await?;

        if payment.awaiting_checkout() {
            info!(payment_id = %id, gateway_reference = %payment.gateway_reference, "retrying checkout");
            return self.open_checkout(payment, options).await;
        }
        if payment.gateway_transaction_id.is_some() {
            return Ok(payment);
        }

        Err(PaymentError::InvalidTransition {
            payment_id: payment.id,
            from: payment.status,
            to: PaymentStatus::Pending,
        })
    }

    pub async fn get(&self, id: Uuid) -> PaymentResult<Payment> {
        self.load(&PaymentLookup::Id(id)).await
    }

    pub async fn find(&self, lookup: &PaymentLookup) -> PaymentResult<Payment> {
        self.load(lookup).await
    }

    pub async fn find_by_reference(&self, gateway_reference: &str) -> PaymentResult<Payment> {
        self.load(&PaymentLookup::Reference(gateway_reference.to_string()))
            .await
    }

    /// Moves a payment to `target`.
    ///
    /// A self-transition returns the stored record without writing. A
    /// reported amount that differs from the stored one fails with
    /// `AmountMismatch` and forces the payment to `failed` when that is
    /// still reachable.
    pub async fn transition(
        &self,
        lookup: PaymentLookup,
        target: PaymentStatus,
        evidence: Evidence,
    ) -> PaymentResult<Payment> {
        let current = self.load(&lookup).await?;

        if let Some(reported) = &evidence.amount {
            if !current.money().same_value(reported) {
                return Err(self
                    .reject_amount_mismatch(current, reported.clone(), &evidence)
                    .await);
            }
        }

        self.apply_transition(current, target, &evidence).await
    }

    pub async fn cancel(&self, id: Uuid) -> PaymentResult<Payment> {
        self.transition(
            PaymentLookup::Id(id),
            PaymentStatus::Cancelled,
            Evidence::internal(),
        )
        .await
    }

    pub async fn refund(&self, id: Uuid) -> PaymentResult<Payment> {
        self.transition(
            PaymentLookup::Id(id),
            PaymentStatus::Refunded,
            Evidence::internal(),
        )
        .await
    }

    /// Non-terminal payments created before `cutoff`.
    pub async fn stale_payments(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> PaymentResult<Vec<Payment>> {
        Ok(self.store.find_stale(cutoff, limit).await?)
    }

    pub async fn ping_store(&self) -> PaymentResult<()> {
        Ok(self.store.ping().await?)
    }

    async fn load(&self, lookup: &PaymentLookup) -> PaymentResult<Payment> {
        let found = match lookup {
            PaymentLookup::Id(id) => self.store.get(*id).await?,
            PaymentLookup::Reference(reference) => self.store.find_by_reference(reference).await?,
        };
        found.ok_or_else(|| PaymentError::not_found(lookup))
    }

    async fn insert_pending(&self, request: &InitiatePaymentRequest) -> PaymentResult<Payment> {
        let max_attempts = self.config.reference_max_attempts;

        for attempt in 1..=max_attempts {
            let reference = self.references.generate();
            if self.store.find_by_reference(&reference).await?.is_some() {
                warn!(gateway_reference = %reference, attempt, "gateway reference collision");
                continue;
            }

            let payment = Payment::new_pending(
                request.booking_reference.clone(),
                request.amount.clone(),
                request.customer.clone(),
                reference,
                Utc::now(),
            );

            match self.store.insert(&payment).await {
                Ok(stored) => {
                    info!(
                        payment_id = %stored.id,
                        booking_reference = %stored.booking_reference,
                        gateway_reference = %stored.gateway_reference,
                        amount = %stored.money(),
                        "payment created"
                    );
                    return Ok(stored);
                }
                Err(StoreError::DuplicateReference { gateway_reference }) => {
                    warn!(%gateway_reference, attempt, "gateway reference collision on insert");
                }
                Err(StoreError::ActivePaymentExists { booking_reference }) => {
                    // Lost the race for the booking's active slot.
                    if let Some(existing) =
                        self.store.find_active_for_booking(&booking_reference).await?
                    {
                        return Err(PaymentError::DuplicatePayment {
                            existing: Box::new(existing),
                        });
                    }
                    debug!(%booking_reference, "active payment vanished before re-read, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        error!(
            booking_reference = %request.booking_reference,
            attempts = max_attempts,
            "could not mint a unique gateway reference"
        );
        Err(PaymentError::ReferenceExhausted {
            attempts: max_attempts,
        })
    }

    async fn open_checkout(
        &self,
        payment: Payment,
        options: CheckoutOptions,
    ) -> PaymentResult<Payment> {
        let request = CheckoutRequest {
            reference: payment.gateway_reference.clone(),
            amount: payment.money(),
            customer: payment.customer.clone(),
            return_url: options.return_url,
            callback_url: options.callback_url,
            description: Some(format!("Payment for booking {}", payment.booking_reference)),
        };

        let outcome = match tokio::time::timeout(
            self.config.gateway_timeout,
            self.gateway.create_checkout(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                seconds: self.config.gateway_timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(session) => self.attach_checkout(payment, &session).await,
            Err(err) if err.is_retryable() => {
                warn!(
                    payment_id = %payment.id,
                    gateway = self.gateway.name(),
                    error = %err,
                    "checkout creation failed, payment left pending"
                );
                Err(PaymentError::GatewayUnavailable {
                    payment_id: Some(payment.id),
                    message: err.to_string(),
                })
            }
            Err(err) => {
                let reason = err.reason();
                warn!(
                    payment_id = %payment.id,
                    gateway = self.gateway.name(),
                    reason = %reason,
                    "gateway rejected checkout"
                );
                let payment_id = payment.id;
                if let Err(e) = self
                    .apply_transition(payment, PaymentStatus::Failed, &Evidence::failure(&reason))
                    .await
                {
                    warn!(payment_id = %payment_id, error = %e, "could not mark rejected payment failed");
                }
                Err(PaymentError::GatewayRejected {
                    payment_id,
                    message: reason,
                })
            }
        }
    }

    /// Records the checkout session without touching the status.
    async fn attach_checkout(
        &self,
        payment: Payment,
        session: &CheckoutSession,
    ) -> PaymentResult<Payment> {
        let mut current = payment;

        for _ in 0..self.config.transition_max_attempts {
            if current.gateway_transaction_id.is_some() && current.checkout_url.is_some() {
                return Ok(current);
            }

            let candidate = current.with_checkout(session, Utc::now());
            match self.store.update_if_status(&candidate, current.status).await {
                Ok(updated) => {
                    info!(
                        payment_id = %updated.id,
                        gateway_reference = %updated.gateway_reference,
                        "checkout session attached"
                    );
                    return Ok(updated);
                }
                Err(StoreError::StatusConflict { .. }) => {
                    current = self.load(&PaymentLookup::Id(current.id)).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Contention { id: current.id }.into())
    }

    async fn apply_transition(
        &self,
        payment: Payment,
        target: PaymentStatus,
        evidence: &Evidence,
    ) -> PaymentResult<Payment> {
        let mut current = payment;

        for attempt in 1..=self.config.transition_max_attempts {
            if current.status == target {
                debug!(payment_id = %current.id, status = %target, "transition already applied");
                return Ok(current);
            }
            if !current.status.can_transition_to(target) {
                warn!(
                    payment_id = %current.id,
                    from = %current.status,
                    to = %target,
                    "illegal payment transition rejected"
                );
                return Err(PaymentError::InvalidTransition {
                    payment_id: current.id,
                    from: current.status,
                    to: target,
                });
            }

            let candidate = current.transitioned(target, evidence, Utc::now());
            match self.store.update_if_status(&candidate, current.status).await {
                Ok(updated) => {
                    info!(
                        payment_id = %updated.id,
                        gateway_reference = %updated.gateway_reference,
                        from = %current.status,
                        to = %updated.status,
                        "payment transitioned"
                    );
                    self.notify(&updated);
                    return Ok(updated);
                }
                Err(StoreError::StatusConflict { actual, .. }) => {
                    debug!(
                        payment_id = %current.id,
                        expected = %current.status,
                        %actual,
                        attempt,
                        "conditional update lost, re-reading"
                    );
                    current = self.load(&PaymentLookup::Id(current.id)).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        error!(
            payment_id = %current.id,
            attempts = self.config.transition_max_attempts,
            "payment transition abandoned after repeated conflicts"
        );
        Err(StoreError::Contention { id: current.id }.into())
    }

    async fn reject_amount_mismatch(
        &self,
        payment: Payment,
        reported: Money,
        evidence: &Evidence,
    ) -> PaymentError {
        let expected = payment.money();
        warn!(
            payment_id = %payment.id,
            gateway_reference = %payment.gateway_reference,
            expected = %expected,
            reported = %reported,
            "reported amount does not match payment"
        );

        let payment_id = payment.id;
        if payment.status.can_transition_to(PaymentStatus::Failed) {
            let failure = Evidence {
                failure_reason: Some(format!(
                    "amount_mismatch: expected {}, got {}",
                    expected, reported
                )),
                amount: None,
                ..evidence.clone()
            };
            if let Err(e) = self
                .apply_transition(payment, PaymentStatus::Failed, &failure)
                .await
            {
                warn!(payment_id = %payment_id, error = %e, "could not fail mismatched payment");
            }
        }

        PaymentError::AmountMismatch {
            payment_id,
            expected: expected.to_string(),
            reported: reported.to_string(),
        }
    }

    fn notify(&self, payment: &Payment) {
        if let (Some(dispatcher), Some(notification)) = (
            self.notifications.as_ref(),
            PaymentNotification::from_payment(payment),
        ) {
            dispatcher.dispatch(notification);
        }
    }
}
