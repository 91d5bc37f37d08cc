//! Health check module
//! Reports the status of the payment store and the configured gateway

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::services::payment_lifecycle::PaymentLifecycleEngine;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    engine: Arc<PaymentLifecycleEngine>,
    store_timeout: Duration,
}

impl HealthChecker {
    pub fn new(engine: Arc<PaymentLifecycleEngine>) -> Self {
        Self {
            engine,
            store_timeout: Duration::from_secs(5),
        }
    }

    /// Gateway reachability is not probed here; an outage shows up as
    /// `GatewayUnavailable` on the request that hits it.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let start = Instant::now();

        match timeout(self.store_timeout, self.engine.ping_store()).await {
            Ok(Ok(())) => {
                let response_time = start.elapsed().as_millis();
                health_status.checks.insert(
                    "payment_store".to_string(),
                    ComponentHealth::up(Some(response_time)),
                );
                info!("Payment store health check: OK ({}ms)", response_time);
            }
            Ok(Err(e)) => {
                health_status.status = HealthState::Unhealthy;
                health_status.checks.insert(
                    "payment_store".to_string(),
                    ComponentHealth::down(Some(e.to_string())),
                );
                error!("Payment store health check failed: {}", e);
            }
            Err(_) => {
                health_status.status = HealthState::Unhealthy;
                health_status.checks.insert(
                    "payment_store".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("Payment store health check timed out");
            }
        }

        health_status
    }
}
