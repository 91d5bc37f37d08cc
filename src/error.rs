//! Application error type for the HTTP layer
//!
//! Wraps [`PaymentError`] with request context and maps it to HTTP status
//! codes, machine-readable error codes and user-facing messages.

use crate::database::error::StoreError;
use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "DUPLICATE_PAYMENT")]
    DuplicatePayment,
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "AMOUNT_MISMATCH")]
    AmountMismatch,
    #[serde(rename = "UNTRUSTED_EVENT")]
    UntrustedEvent,
    #[serde(rename = "MALFORMED_EVENT")]
    MalformedEvent,
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "CONCURRENT_UPDATE")]
    ConcurrentUpdate,

    // External errors (502, 503)
    #[serde(rename = "GATEWAY_UNAVAILABLE")]
    GatewayUnavailable,
    #[serde(rename = "GATEWAY_REJECTED")]
    GatewayRejected,

    // Infrastructure errors (5xx)
    #[serde(rename = "REFERENCE_EXHAUSTED")]
    ReferenceExhausted,
    #[serde(rename = "STORAGE_ERROR")]
    StorageError,

    // Generic
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub source: PaymentError,
    pub request_id: Option<String>,
}

impl AppError {
    pub fn new(source: PaymentError) -> Self {
        Self {
            source,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        self.source.http_status_code()
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.source {
            PaymentError::DuplicatePayment { .. } => ErrorCode::DuplicatePayment,
            PaymentError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            PaymentError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
            PaymentError::UntrustedEvent { .. } => ErrorCode::UntrustedEvent,
            PaymentError::MalformedEvent { .. } => ErrorCode::MalformedEvent,
            PaymentError::GatewayUnavailable { .. } => ErrorCode::GatewayUnavailable,
            PaymentError::GatewayRejected { .. } => ErrorCode::GatewayRejected,
            PaymentError::ReferenceExhausted { .. } => ErrorCode::ReferenceExhausted,
            PaymentError::NotFound { .. } => ErrorCode::PaymentNotFound,
            PaymentError::Validation { .. } => ErrorCode::ValidationError,
            PaymentError::Store(StoreError::Contention { .. }) => ErrorCode::ConcurrentUpdate,
            PaymentError::Store(_) => ErrorCode::StorageError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        self.source.user_message()
    }

    /// Structured context safe to show to clients
    pub fn details(&self) -> Option<serde_json::Value> {
        match &self.source {
            PaymentError::Validation { field, message } => Some(serde_json::json!({
                "field": field,
                "error": message,
            })),
            PaymentError::InvalidTransition { from, to, .. } => Some(serde_json::json!({
                "from": from,
                "to": to,
            })),
            PaymentError::AmountMismatch {
                expected, reported, ..
            } => Some(serde_json::json!({
                "expected": expected,
                "reported": reported,
            })),
            PaymentError::GatewayUnavailable {
                payment_id: Some(payment_id),
                ..
            } => Some(serde_json::json!({ "payment_id": payment_id })),
            PaymentError::GatewayRejected { payment_id, .. } => {
                Some(serde_json::json!({ "payment_id": payment_id }))
            }
            _ => None,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        AppError::new(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::new(PaymentError::Store(err))
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
