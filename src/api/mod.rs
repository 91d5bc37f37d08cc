//! HTTP surface

pub mod payments;
pub mod webhooks;

use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::logging::{http_trace_layer, request_logging_middleware, UuidRequestId};
use crate::services::payment_lifecycle::PaymentLifecycleEngine;
use crate::services::reconciliation::ReconciliationCoordinator;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PaymentLifecycleEngine>,
    pub coordinator: Arc<ReconciliationCoordinator>,
    pub health_checker: HealthChecker,
}

impl AppState {
    pub fn new(coordinator: Arc<ReconciliationCoordinator>) -> Self {
        let engine = coordinator.engine().clone();
        Self {
            health_checker: HealthChecker::new(engine.clone()),
            engine,
            coordinator,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(health))
        .route("/health/live", get(liveness))
        .route("/api/payments", post(payments::initiate_payment))
        .route("/api/payments/verify", post(payments::verify_payment))
        .route("/api/payments/{id}", get(payments::get_payment))
        .route("/api/payments/{id}/checkout", post(payments::retry_checkout))
        .route("/api/webhooks/chapa", post(webhooks::chapa_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(http_trace_layer())
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health_checker.check_health().await;

    if health_status.status == HealthState::Unhealthy {
        error!("❌ Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        Ok(Json(health_status))
    }
}

async fn liveness() -> &'static str {
    info!("💓 Liveness probe requested");
    "OK"
}
