use crate::payments::error::{GatewayError, PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{GatewayStatus, Payment, PaymentLookup};
use crate::services::payment_lifecycle::PaymentLifecycleEngine;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    /// The event was applied, or was already reflected in the payment.
    Applied(Payment),
    /// The event carries no actionable status (e.g. `pending`).
    Ignored {
        gateway_reference: String,
        status: GatewayStatus,
    },
}

/// Turns gateway webhooks and verification lookups into lifecycle
/// transitions. Both paths end in [`PaymentLifecycleEngine::transition`].
pub struct ReconciliationCoordinator {
    engine: Arc<PaymentLifecycleEngine>,
    gateway: Arc<dyn PaymentGateway>,
}

impl ReconciliationCoordinator {
    pub fn new(engine: Arc<PaymentLifecycleEngine>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { engine, gateway }
    }

    pub fn engine(&self) -> &Arc<PaymentLifecycleEngine> {
        &self.engine
    }

    /// Handles a raw webhook body. The signature is checked before the body
    /// is parsed.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> PaymentResult<WebhookOutcome> {
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                warn!(gateway = self.gateway.name(), "webhook rejected: missing signature");
                PaymentError::UntrustedEvent {
                    reason: "missing signature".to_string(),
                }
            })?;

        let verification = self
            .gateway
            .verify_webhook(payload, signature)
            .map_err(|e| PaymentError::UntrustedEvent {
                reason: e.to_string(),
            })?;
        if !verification.valid {
            let reason = verification
                .reason
                .unwrap_or_else(|| "invalid signature".to_string());
            warn!(gateway = self.gateway.name(), %reason, "webhook rejected: bad signature");
            return Err(PaymentError::UntrustedEvent { reason });
        }

        let event = self
            .gateway
            .parse_webhook_event(payload)
            .map_err(|e| PaymentError::MalformedEvent {
                message: match e {
                    GatewayError::Validation { message, .. } => message,
                    other => other.to_string(),
                },
            })?;

        info!(
            gateway_reference = %event.gateway_reference,
            event_type = %event.event_type,
            status = ?event.status,
            "webhook received"
        );

        let Some(target) = event.status.target_status() else {
            info!(
                gateway_reference = %event.gateway_reference,
                status = ?event.status,
                "webhook status not actionable, acknowledged"
            );
            return Ok(WebhookOutcome::Ignored {
                gateway_reference: event.gateway_reference,
                status: event.status,
            });
        };

        let payment = self
            .engine
            .transition(
                PaymentLookup::Reference(event.gateway_reference.clone()),
                target,
                event.evidence(),
            )
            .await?;
        Ok(WebhookOutcome::Applied(payment))
    }

    /// Reconciles a payment against the gateway's own record of it.
    pub async fn verify(&self, gateway_reference: &str) -> PaymentResult<Payment> {
        let payment = self.engine.find_by_reference(gateway_reference).await?;
        if payment.status.is_terminal() {
            return Ok(payment);
        }

        let timeout = self.engine.config().gateway_timeout;
        let verification =
            match tokio::time::timeout(timeout, self.gateway.verify_transaction(gateway_reference))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout {
                    seconds: timeout.as_secs(),
                }),
            }
            .map_err(|err| {
                warn!(
                    payment_id = %payment.id,
                    %gateway_reference,
                    error = %err,
                    "gateway verification failed"
                );
                if err.is_retryable() {
                    PaymentError::GatewayUnavailable {
                        payment_id: Some(payment.id),
                        message: err.to_string(),
                    }
                } else {
                    PaymentError::GatewayRejected {
                        payment_id: payment.id,
                        message: err.reason(),
                    }
                }
            })?;

        let Some(target) = verification.status.target_status() else {
            info!(
                payment_id = %payment.id,
                status = ?verification.status,
                "gateway has no final status yet"
            );
            return Ok(payment);
        };

        self.engine
            .transition(PaymentLookup::Id(payment.id), target, verification.evidence())
            .await
    }
}
