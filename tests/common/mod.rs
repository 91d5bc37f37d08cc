#![allow(dead_code)]

use async_trait::async_trait;
use booking_payments::database::{InMemoryPaymentStore, PaymentStore, StoreResult};
use booking_payments::payments::error::{GatewayError, GatewayResult};
use booking_payments::payments::provider::PaymentGateway;
use booking_payments::payments::providers::chapa::parse_chapa_webhook;
use booking_payments::payments::types::{
    CheckoutRequest, CheckoutSession, CustomerContact, GatewayStatus, GatewayVerification, Money,
    Payment, PaymentStatus, WebhookEvent, WebhookVerificationResult,
};
use booking_payments::payments::utils::{sign_hmac_sha256_hex, verify_hmac_sha256_hex};
use booking_payments::services::{
    InitiatePaymentRequest, LifecycleConfig, NotificationDispatcher, PaymentLifecycleEngine,
    PaymentNotification, ReconciliationCoordinator,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

// ---------------------------------------------------------------------------
// Gateway double
// ---------------------------------------------------------------------------

/// Scriptable gateway. Checkouts succeed unless a failure was queued;
/// verifications answer from a per-reference table.
#[derive(Default)]
pub struct FakeGateway {
    checkout_failures: Mutex<VecDeque<GatewayError>>,
    checkout_delay: Mutex<Option<Duration>>,
    last_checkout: Mutex<Option<CheckoutRequest>>,
    verifications: Mutex<HashMap<String, GatewayResult<GatewayVerification>>>,
    checkout_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_checkout(&self, error: GatewayError) {
        self.checkout_failures.lock().unwrap().push_back(error);
    }

    pub fn delay_checkout(&self, delay: Duration) {
        *self.checkout_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_verification(&self, reference: &str, result: GatewayResult<GatewayVerification>) {
        self.verifications
            .lock()
            .unwrap()
            .insert(reference.to_string(), result);
    }

    /// The most recent checkout request the gateway received.
    pub fn last_checkout(&self) -> Option<CheckoutRequest> {
        self.last_checkout.lock().unwrap().clone()
    }

    pub fn checkout_calls(&self) -> usize {
        self.checkout_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout(&self, request: CheckoutRequest) -> GatewayResult<CheckoutSession> {
        self.checkout_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_checkout.lock().unwrap() = Some(request.clone());

        let delay = *self.checkout_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.checkout_failures.lock().unwrap().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        Ok(CheckoutSession {
            checkout_url: format!("https://checkout.chapa.co/checkout/payment/{}", request.reference),
            transaction_id: request.reference,
        })
    }

    async fn verify_transaction(&self, reference: &str) -> GatewayResult<GatewayVerification> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.verifications
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or_else(|| {
                Err(GatewayError::Provider {
                    provider: "fake".to_string(),
                    message: "transaction not found".to_string(),
                    provider_code: Some("404".to_string()),
                    retryable: false,
                })
            })
    }

    fn name(&self) -> &'static str {
        "fake"
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> GatewayResult<WebhookVerificationResult> {
        let valid = verify_hmac_sha256_hex(payload, WEBHOOK_SECRET, signature);
        Ok(WebhookVerificationResult {
            valid,
            reason: (!valid).then(|| "invalid signature".to_string()),
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<WebhookEvent> {
        parse_chapa_webhook(payload)
    }
}

pub fn verification(
    reference: &str,
    status: GatewayStatus,
    amount: &str,
    currency: &str,
    failure_reason: Option<&str>,
) -> GatewayResult<GatewayVerification> {
    Ok(GatewayVerification {
        status,
        reference: reference.to_string(),
        amount: Money::parse(amount, currency).unwrap(),
        transaction_id: Some(format!("chapa-{}", reference)),
        failure_reason: failure_reason.map(str::to_string),
        payment_method: Some("telebirr".to_string()),
    })
}

// ---------------------------------------------------------------------------
// Store wrapper counting successful conditional writes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryPaymentStore,
    updates: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentStore for CountingStore {
    async fn insert(&self, payment: &Payment) -> StoreResult<Payment> {
        self.inner.insert(payment).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        self.inner.get(id).await
    }

    async fn find_by_reference(&self, gateway_reference: &str) -> StoreResult<Option<Payment>> {
        self.inner.find_by_reference(gateway_reference).await
    }

    async fn find_active_for_booking(
        &self,
        booking_reference: &str,
    ) -> StoreResult<Option<Payment>> {
        self.inner.find_active_for_booking(booking_reference).await
    }

    async fn update_if_status(
        &self,
        candidate: &Payment,
        expected: PaymentStatus,
    ) -> StoreResult<Payment> {
        let updated = self.inner.update_if_status(candidate, expected).await?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Payment>> {
        self.inner.find_stale(cutoff, limit).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<CountingStore>,
    pub gateway: Arc<FakeGateway>,
    pub engine: Arc<PaymentLifecycleEngine>,
    pub coordinator: Arc<ReconciliationCoordinator>,
    pub notifications: mpsc::Receiver<PaymentNotification>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(LifecycleConfig::default())
    }

    pub fn with_config(config: LifecycleConfig) -> Self {
        let store = Arc::new(CountingStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let (dispatcher, notifications) = NotificationDispatcher::channel(64);
        let engine = Arc::new(
            PaymentLifecycleEngine::new(store.clone(), gateway.clone(), config)
                .with_notifications(dispatcher),
        );
        let coordinator = Arc::new(ReconciliationCoordinator::new(
            engine.clone(),
            gateway.clone(),
        ));
        Self {
            store,
            gateway,
            engine,
            coordinator,
            notifications,
        }
    }

    /// Notifications queued so far.
    pub fn drain_notifications(&mut self) -> Vec<PaymentNotification> {
        let mut drained = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            drained.push(notification);
        }
        drained
    }

    /// Stores a pending payment that was created `age` ago, bypassing checkout.
    pub async fn seed_pending(&self, booking: &str, amount: &str, age: chrono::Duration) -> Payment {
        let payment = Payment::new_pending(
            booking,
            Money::parse(amount, "ETB").unwrap(),
            customer(),
            format!("TRV-SEED{:08X}", rand_suffix()),
            Utc::now() - age,
        );
        self.store.insert(&payment).await.unwrap()
    }
}

fn rand_suffix() -> u32 {
    Uuid::new_v4().as_u128() as u32
}

pub fn customer() -> CustomerContact {
    CustomerContact {
        email: "guest@example.com".to_string(),
        phone: Some("0911000000".to_string()),
        name: "Abebe Kebede".to_string(),
    }
}

pub fn initiate_request(booking: &str, amount: &str) -> InitiatePaymentRequest {
    InitiatePaymentRequest {
        booking_reference: booking.to_string(),
        amount: Money::parse(amount, "ETB").unwrap(),
        customer: customer(),
        return_url: None,
        callback_url: None,
    }
}

// ---------------------------------------------------------------------------
// Webhook payloads
// ---------------------------------------------------------------------------

pub fn webhook_body(reference: &str, status: &str, amount: &str, currency: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event": format!("charge.{}", status),
        "tx_ref": reference,
        "status": status,
        "amount": amount,
        "currency": currency,
        "reference": format!("APx{}", reference),
        "payment_method": "telebirr",
    }))
    .unwrap()
}

pub fn sign(payload: &[u8]) -> String {
    sign_hmac_sha256_hex(payload, WEBHOOK_SECRET)
}
