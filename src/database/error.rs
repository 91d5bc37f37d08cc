//! Payment store error types

use crate::payments::types::PaymentStatus;
use thiserror::Error;
use uuid::Uuid;

pub const ACTIVE_PER_BOOKING_CONSTRAINT: &str = "payments_one_active_per_booking";
pub const GATEWAY_REFERENCE_CONSTRAINT: &str = "payments_gateway_reference_key";

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Another payment already holds the booking's active slot.
    #[error("Active payment already exists for booking {booking_reference}")]
    ActivePaymentExists { booking_reference: String },

    #[error("Gateway reference {gateway_reference} is already taken")]
    DuplicateReference { gateway_reference: String },

    /// Conditional update lost: the stored status was not the expected one.
    #[error("Status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        expected: PaymentStatus,
        actual: PaymentStatus,
    },

    #[error("Payment {id} not found in store")]
    NotFound { id: Uuid },

    #[error("Gave up updating payment {id} after repeated conflicts")]
    Contention { id: Uuid },

    #[error("Store backend error: {message}")]
    Backend { message: String, retryable: bool },
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Backend { retryable, .. } => *retryable,
            StoreError::Contention { .. } => true,
            _ => false,
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
            retryable: false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(feature = "database")]
impl StoreError {
    /// Maps sqlx failures, turning the two uniqueness constraints into domain variants.
    pub fn from_sqlx(err: sqlx::Error, booking_reference: &str, gateway_reference: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                match db_err.constraint() {
                    Some(ACTIVE_PER_BOOKING_CONSTRAINT) => {
                        return StoreError::ActivePaymentExists {
                            booking_reference: booking_reference.to_string(),
                        }
                    }
                    Some(GATEWAY_REFERENCE_CONSTRAINT) => {
                        return StoreError::DuplicateReference {
                            gateway_reference: gateway_reference.to_string(),
                        }
                    }
                    _ => {}
                }
            }
        }
        Self::from(err)
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let retryable = matches!(
            err,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
        );
        StoreError::Backend {
            message: err.to_string(),
            retryable,
        }
    }
}
