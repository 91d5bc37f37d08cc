use crate::database::error::StoreResult;
use crate::payments::types::{Payment, PaymentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistence contract for payments.
///
/// `update_if_status` is the only way a stored payment changes: it writes
/// the candidate record iff the stored status still equals `expected`,
/// otherwise it fails with `StatusConflict` carrying the actual status.
/// Implementations must also enforce unique gateway references and at most
/// one active payment per booking on `insert`.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: &Payment) -> StoreResult<Payment>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Payment>>;

    async fn find_by_reference(&self, gateway_reference: &str) -> StoreResult<Option<Payment>>;

    async fn find_active_for_booking(&self, booking_reference: &str)
        -> StoreResult<Option<Payment>>;

    async fn update_if_status(
        &self,
        candidate: &Payment,
        expected: PaymentStatus,
    ) -> StoreResult<Payment>;

    /// Non-terminal payments created before `cutoff`, oldest first.
    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Payment>>;

    async fn ping(&self) -> StoreResult<()>;
}
