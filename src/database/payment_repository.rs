use crate::database::error::{StoreError, StoreResult};
use crate::database::repository::PaymentStore;
use crate::payments::types::{CustomerContact, Payment, PaymentStatus};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, booking_reference, amount, currency, status, gateway_reference, \
     gateway_transaction_id, checkout_url, payment_method, customer_email, customer_phone, \
     customer_name, failure_reason, created_at, updated_at, paid_at";

/// Row shape of the `payments` table
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub booking_reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub gateway_reference: String,
    pub gateway_transaction_id: Option<String>,
    pub checkout_url: Option<String>,
    pub payment_method: Option<String>,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub customer_name: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::from_str(&row.status).map_err(|_| {
            StoreError::backend(format!(
                "payment {} has unknown status '{}'",
                row.id, row.status
            ))
        })?;

        Ok(Payment {
            id: row.id,
            booking_reference: row.booking_reference,
            amount: row.amount,
            currency: row.currency,
            status,
            gateway_reference: row.gateway_reference,
            gateway_transaction_id: row.gateway_transaction_id,
            checkout_url: row.checkout_url,
            payment_method: row.payment_method,
            customer: CustomerContact {
                email: row.customer_email,
                phone: row.customer_phone,
                name: row.customer_name,
            },
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            paid_at: row.paid_at,
        })
    }
}

/// Postgres-backed payment store
#[derive(Clone)]
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::backend(format!("migration failed: {}", e)))
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> StoreResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE {}", PAYMENT_COLUMNS, clause);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .map(Payment::try_from)
            .transpose()
    }
}

#[async_trait]
impl PaymentStore for PgPaymentRepository {
    async fn insert(&self, payment: &Payment) -> StoreResult<Payment> {
        let sql = format!(
            "INSERT INTO payments ({cols})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
             RETURNING {cols}",
            cols = PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.id)
            .bind(&payment.booking_reference)
            .bind(&payment.amount)
            .bind(&payment.currency)
            .bind(payment.status.as_str())
            .bind(&payment.gateway_reference)
            .bind(&payment.gateway_transaction_id)
            .bind(&payment.checkout_url)
            .bind(&payment.payment_method)
            .bind(&payment.customer.email)
            .bind(&payment.customer.phone)
            .bind(&payment.customer.name)
            .bind(&payment.failure_reason)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .bind(payment.paid_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                StoreError::from_sqlx(e, &payment.booking_reference, &payment.gateway_reference)
            })?;

        Payment::try_from(row)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_by_reference(&self, gateway_reference: &str) -> StoreResult<Option<Payment>> {
        self.fetch_one_where("gateway_reference = $1", gateway_reference)
            .await
    }

    async fn find_active_for_booking(
        &self,
        booking_reference: &str,
    ) -> StoreResult<Option<Payment>> {
        self.fetch_one_where(
            "booking_reference = $1 AND status IN ('pending', 'processing', 'completed')",
            booking_reference,
        )
        .await
    }

    async fn update_if_status(
        &self,
        candidate: &Payment,
        expected: PaymentStatus,
    ) -> StoreResult<Payment> {
        let sql = format!(
            "UPDATE payments
             SET status = $3, gateway_transaction_id = $4, checkout_url = $5,
                 payment_method = $6, failure_reason = $7, paid_at = $8, updated_at = $9
             WHERE id = $1 AND status = $2
             RETURNING {}",
            PAYMENT_COLUMNS
        );

        let updated = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(candidate.id)
            .bind(expected.as_str())
            .bind(candidate.status.as_str())
            .bind(&candidate.gateway_transaction_id)
            .bind(&candidate.checkout_url)
            .bind(&candidate.payment_method)
            .bind(&candidate.failure_reason)
            .bind(candidate.paid_at)
            .bind(candidate.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                StoreError::from_sqlx(
                    e,
                    &candidate.booking_reference,
                    &candidate.gateway_reference,
                )
            })?;

        if let Some(row) = updated {
            return Payment::try_from(row);
        }

        // No row matched: either the payment is gone or its status moved on.
        let actual: Option<String> = sqlx::query_scalar("SELECT status FROM payments WHERE id = $1")
            .bind(candidate.id)
            .fetch_optional(&self.pool)
            .await?;
        match actual {
            None => Err(StoreError::NotFound { id: candidate.id }),
            Some(status) => Err(StoreError::StatusConflict {
                expected,
                actual: PaymentStatus::from_str(&status)
                    .map_err(|_| StoreError::backend(format!("unknown status '{}'", status)))?,
            }),
        }
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments
             WHERE status IN ('pending', 'processing') AND created_at < $1
             ORDER BY created_at ASC
             LIMIT $2",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
