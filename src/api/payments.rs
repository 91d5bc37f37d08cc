//! Payment endpoints: initiate, verify, lookup and checkout retry

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::error::{get_request_id_from_headers, ErrorResponse};
use crate::payments::error::PaymentError;
use crate::payments::types::{CustomerContact, Money, Payment, PaymentLookup, PaymentStatus};
use crate::services::payment_lifecycle::{CheckoutOptions, InitiatePaymentRequest};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

const DEFAULT_CURRENCY: &str = "ETB";

/// Accepts `"150.00"` as well as `150.00`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    fn as_decimal_str(&self) -> String {
        match self {
            AmountInput::Text(text) => text.clone(),
            AmountInput::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentBody {
    pub booking_reference: String,
    pub amount: AmountInput,
    pub currency: Option<String>,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub customer_name: String,
    pub return_url: Option<String>,
    pub webhook_url: Option<String>,
}

impl InitiatePaymentBody {
    fn into_request(self) -> Result<InitiatePaymentRequest, PaymentError> {
        let currency = self
            .currency
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        Ok(InitiatePaymentRequest {
            booking_reference: self.booking_reference,
            amount: Money::parse(&self.amount.as_decimal_str(), &currency)?,
            customer: CustomerContact {
                email: self.customer_email,
                phone: self.customer_phone.filter(|p| !p.trim().is_empty()),
                name: self.customer_name,
            },
            return_url: self.return_url,
            callback_url: self.webhook_url,
        })
    }
}

/// Optional body of a checkout retry. Omitted URLs fall back to the
/// gateway's configured ones.
#[derive(Debug, Default, Deserialize)]
pub struct RetryCheckoutBody {
    pub return_url: Option<String>,
    pub webhook_url: Option<String>,
}

impl RetryCheckoutBody {
    fn parse(body: &[u8]) -> Result<Self, PaymentError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| PaymentError::Validation {
            field: "body".to_string(),
            message: e.to_string(),
        })
    }

    fn into_options(self) -> CheckoutOptions {
        CheckoutOptions {
            return_url: self.return_url,
            callback_url: self.webhook_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentBody {
    #[serde(alias = "tx_ref", alias = "reference")]
    pub gateway_reference: String,
}

/// Client-facing view of a payment.
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub booking_reference: String,
    pub gateway_reference: String,
    pub amount: String,
    pub currency: String,
    pub status: PaymentStatus,
    pub checkout_url: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub payment_method: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            payment_id: payment.id,
            booking_reference: payment.booking_reference,
            gateway_reference: payment.gateway_reference,
            amount: payment.amount.to_string(),
            currency: payment.currency,
            status: payment.status,
            checkout_url: payment.checkout_url,
            gateway_transaction_id: payment.gateway_transaction_id,
            payment_method: payment.payment_method,
            failure_reason: payment.failure_reason,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
            paid_at: payment.paid_at,
            duplicate: false,
        }
    }
}

/// POST /api/payments
pub async fn initiate_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<InitiatePaymentBody>, JsonRejection>,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return invalid_body(request_id, rejection),
    };

    let request = match body.into_request() {
        Ok(request) => request,
        Err(e) => return app_error(e, request_id).into_response(),
    };

    info!(booking_reference = %request.booking_reference, amount = %request.amount, "💳 Payment initiation requested");

    match state.engine.initiate(request).await {
        Ok(payment) => (StatusCode::CREATED, Json(PaymentResponse::from(payment))).into_response(),
        Err(PaymentError::DuplicatePayment { existing }) => {
            let mut snapshot = PaymentResponse::from(*existing);
            snapshot.duplicate = true;
            (StatusCode::OK, Json(snapshot)).into_response()
        }
        Err(e) => app_error(e, request_id).into_response(),
    }
}

/// POST /api/payments/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<VerifyPaymentBody>, JsonRejection>,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return invalid_body(request_id, rejection),
    };

    let reference = body.gateway_reference.trim();
    if reference.is_empty() {
        return app_error(
            PaymentError::Validation {
                field: "gateway_reference".to_string(),
                message: "gateway reference is required".to_string(),
            },
            request_id,
        )
        .into_response();
    }

    match state.coordinator.verify(reference).await {
        Ok(payment) => Json(PaymentResponse::from(payment)).into_response(),
        Err(e) => app_error(e, request_id).into_response(),
    }
}

/// GET /api/payments/{id}
///
/// Accepts a payment id or a gateway reference.
pub async fn get_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<PaymentResponse>> {
    let payment = state
        .engine
        .find(&PaymentLookup::parse(&id))
        .await
        .map_err(|e| app_error(e, get_request_id_from_headers(&headers)))?;
    Ok(Json(payment.into()))
}

/// POST /api/payments/{id}/checkout
///
/// Accepts an empty body or `{"return_url", "webhook_url"}`.
pub async fn retry_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Json<PaymentResponse>> {
    let request_id = get_request_id_from_headers(&headers);
    let options = RetryCheckoutBody::parse(&body)
        .map_err(|e| app_error(e, request_id.clone()))?
        .into_options();
    let lookup = PaymentLookup::parse(&id);
    let payment_id = match lookup {
        PaymentLookup::Id(id) => id,
        PaymentLookup::Reference(_) => {
            state
                .engine
                .find(&lookup)
                .await
                .map_err(|e| app_error(e, request_id.clone()))?
                .id
        }
    };

    let payment = state
        .engine
        .retry_checkout(payment_id, options)
        .await
        .map_err(|e| app_error(e, request_id))?;
    Ok(Json(payment.into()))
}

fn app_error(error: PaymentError, request_id: Option<String>) -> AppError {
    let error = AppError::new(error);
    match request_id {
        Some(request_id) => error.with_request_id(request_id),
        None => error,
    }
}

fn invalid_body(request_id: Option<String>, rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::validation_error(
            request_id,
            "body",
            &rejection.body_text(),
        )),
    )
        .into_response()
}
