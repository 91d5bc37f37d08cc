use crate::database::error::StoreError;
use crate::payments::types::{Payment, PaymentLookup, PaymentStatus};
use thiserror::Error;
use uuid::Uuid;

pub type GatewayResult<T> = Result<T, GatewayError>;
pub type PaymentResult<T> = Result<T, PaymentError>;

/// Failures talking to the payment gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Gateway timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Gateway error: provider={provider}, message={message}")]
    Provider {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Validation { .. } => false,
            GatewayError::Network { .. } => true,
            GatewayError::Timeout { .. } => true,
            GatewayError::RateLimit { .. } => true,
            GatewayError::Provider { retryable, .. } => *retryable,
        }
    }

    /// Message suitable for a payment's `failure_reason`.
    pub fn reason(&self) -> String {
        match self {
            GatewayError::Validation { message, .. } => message.clone(),
            GatewayError::Provider { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Domain errors surfaced by the lifecycle engine and reconciliation paths.
#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("An active payment already exists for booking {}", existing.booking_reference)]
    DuplicatePayment { existing: Box<Payment> },

    #[error("Invalid transition for payment {payment_id}: {from} -> {to}")]
    InvalidTransition {
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Amount mismatch for payment {payment_id}: expected {expected}, got {reported}")]
    AmountMismatch {
        payment_id: Uuid,
        expected: String,
        reported: String,
    },

    #[error("Untrusted event: {reason}")]
    UntrustedEvent { reason: String },

    #[error("Malformed event: {message}")]
    MalformedEvent { message: String },

    #[error("Gateway unavailable: {message}")]
    GatewayUnavailable {
        payment_id: Option<Uuid>,
        message: String,
    },

    #[error("Gateway rejected payment {payment_id}: {message}")]
    GatewayRejected { payment_id: Uuid, message: String },

    #[error("Could not mint a unique gateway reference after {attempts} attempts")]
    ReferenceExhausted { attempts: u32 },

    #[error("Payment not found: {lookup}")]
    NotFound { lookup: String },

    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentError {
    pub fn not_found(lookup: &PaymentLookup) -> Self {
        PaymentError::NotFound {
            lookup: lookup.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::GatewayUnavailable { .. } => true,
            PaymentError::Store(err) => err.is_retryable(),
            _ => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::DuplicatePayment { .. } => 409,
            PaymentError::InvalidTransition { .. } => 409,
            PaymentError::AmountMismatch { .. } => 422,
            PaymentError::UntrustedEvent { .. } => 401,
            PaymentError::MalformedEvent { .. } => 400,
            PaymentError::GatewayUnavailable { .. } => 503,
            PaymentError::GatewayRejected { .. } => 502,
            PaymentError::ReferenceExhausted { .. } => 500,
            PaymentError::NotFound { .. } => 404,
            PaymentError::Validation { .. } => 400,
            PaymentError::Store(StoreError::Contention { .. }) => 409,
            PaymentError::Store(_) => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::DuplicatePayment { .. } => {
                "A payment is already in progress for this booking".to_string()
            }
            PaymentError::InvalidTransition { from, to, .. } => {
                format!("Payment cannot move from {} to {}", from, to)
            }
            PaymentError::AmountMismatch { .. } => {
                "Reported amount does not match the payment amount".to_string()
            }
            PaymentError::UntrustedEvent { .. } => "Invalid webhook signature".to_string(),
            PaymentError::MalformedEvent { message } => message.clone(),
            PaymentError::GatewayUnavailable { .. } => {
                "Payment gateway is temporarily unavailable. Please retry shortly".to_string()
            }
            PaymentError::GatewayRejected { message, .. } => {
                format!("Payment was rejected by the gateway: {}", message)
            }
            PaymentError::ReferenceExhausted { .. } => {
                "Could not create the payment. Please retry".to_string()
            }
            PaymentError::NotFound { .. } => "Payment not found".to_string(),
            PaymentError::Validation { message, .. } => message.clone(),
            PaymentError::Store(_) => "An internal error occurred".to_string(),
        }
    }
}
