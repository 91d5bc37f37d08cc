use crate::database::error::{StoreError, StoreResult};
use crate::database::repository::PaymentStore;
use crate::payments::types::{Payment, PaymentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    payments: HashMap<Uuid, Payment>,
    by_reference: HashMap<String, Uuid>,
    active_by_booking: HashMap<String, Uuid>,
}

/// Process-local payment store.
///
/// Each operation takes the lock once, so insert and conditional update are
/// atomic with respect to each other.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.payments.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: &Payment) -> StoreResult<Payment> {
        let mut inner = self.inner.write().await;

        if inner.by_reference.contains_key(&payment.gateway_reference) {
            return Err(StoreError::DuplicateReference {
                gateway_reference: payment.gateway_reference.clone(),
            });
        }
        if payment.status.is_active()
            && inner
                .active_by_booking
                .contains_key(&payment.booking_reference)
        {
            return Err(StoreError::ActivePaymentExists {
                booking_reference: payment.booking_reference.clone(),
            });
        }
        if inner.payments.contains_key(&payment.id) {
            return Err(StoreError::backend(format!(
                "payment id {} already exists",
                payment.id
            )));
        }

        inner
            .by_reference
            .insert(payment.gateway_reference.clone(), payment.id);
        if payment.status.is_active() {
            inner
                .active_by_booking
                .insert(payment.booking_reference.clone(), payment.id);
        }
        inner.payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.inner.read().await.payments.get(&id).cloned())
    }

    async fn find_by_reference(&self, gateway_reference: &str) -> StoreResult<Option<Payment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_reference
            .get(gateway_reference)
            .and_then(|id| inner.payments.get(id))
            .cloned())
    }

    async fn find_active_for_booking(
        &self,
        booking_reference: &str,
    ) -> StoreResult<Option<Payment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .active_by_booking
            .get(booking_reference)
            .and_then(|id| inner.payments.get(id))
            .cloned())
    }

    async fn update_if_status(
        &self,
        candidate: &Payment,
        expected: PaymentStatus,
    ) -> StoreResult<Payment> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let stored = inner
            .payments
            .get_mut(&candidate.id)
            .ok_or(StoreError::NotFound { id: candidate.id })?;
        if stored.status != expected {
            return Err(StoreError::StatusConflict {
                expected,
                actual: stored.status,
            });
        }

        let booking = stored.booking_reference.clone();
        if candidate.status.is_active() {
            if let Some(holder) = inner.active_by_booking.get(&booking) {
                if *holder != candidate.id {
                    return Err(StoreError::ActivePaymentExists {
                        booking_reference: booking,
                    });
                }
            }
        }

        // Identity, amount and customer are immutable; only lifecycle fields move.
        stored.status = candidate.status;
        stored.gateway_transaction_id = candidate.gateway_transaction_id.clone();
        stored.checkout_url = candidate.checkout_url.clone();
        stored.payment_method = candidate.payment_method.clone();
        stored.failure_reason = candidate.failure_reason.clone();
        stored.paid_at = candidate.paid_at;
        stored.updated_at = candidate.updated_at;
        let updated = stored.clone();

        if updated.status.is_active() {
            inner.active_by_booking.insert(booking, updated.id);
        } else if inner.active_by_booking.get(&booking) == Some(&updated.id) {
            inner.active_by_booking.remove(&booking);
        }

        Ok(updated)
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Payment>> {
        let inner = self.inner.read().await;
        let mut stale: Vec<Payment> = inner
            .payments
            .values()
            .filter(|p| !p.status.is_terminal() && p.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
