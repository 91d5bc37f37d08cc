use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

use super::AppState;
use crate::error::AppError;
use crate::middleware::error::{get_request_id_from_headers, ErrorResponse};
use crate::payments::error::PaymentError;
use crate::services::reconciliation::WebhookOutcome;

const SIGNATURE_HEADERS: [&str; 2] = ["chapa-signature", "x-chapa-signature"];

/// POST /api/webhooks/chapa
///
/// Events that can never be applied are acknowledged with `rejected` so the
/// gateway stops redelivering them. Only storage failures ask for a retry.
pub async fn chapa_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()));

    match state.coordinator.handle_webhook(&body, signature).await {
        Ok(WebhookOutcome::Applied(payment)) => {
            info!(
                payment_id = %payment.id,
                gateway_reference = %payment.gateway_reference,
                status = %payment.status,
                "Webhook processed successfully"
            );
            accepted()
        }
        Ok(WebhookOutcome::Ignored {
            gateway_reference,
            status,
        }) => {
            info!(%gateway_reference, ?status, "Webhook acknowledged without change");
            accepted()
        }
        Err(e @ PaymentError::UntrustedEvent { .. }) => {
            let mut error = AppError::new(e);
            if let Some(request_id) = get_request_id_from_headers(&headers) {
                error = error.with_request_id(request_id);
            }
            error.into_response()
        }
        Err(e @ PaymentError::Store(_)) => {
            error!(error = %e, "Webhook processing failed, gateway will redeliver");
            let mut error = AppError::new(e);
            if let Some(request_id) = get_request_id_from_headers(&headers) {
                error = error.with_request_id(request_id);
            }
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::from_app_error(&error)),
            )
                .into_response()
        }
        // Amount mismatch, illegal transition, unknown reference, bad body.
        Err(e) => {
            warn!(error = %e, "Webhook rejected");
            rejected(&e)
        }
    }
}

fn accepted() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "accepted" }))).into_response()
}

fn rejected(error: &PaymentError) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "rejected",
            "reason": error.to_string(),
        })),
    )
        .into_response()
}
