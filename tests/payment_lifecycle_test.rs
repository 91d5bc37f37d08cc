mod common;

use async_trait::async_trait;
use booking_payments::database::{InMemoryPaymentStore, PaymentStore, StoreError, StoreResult};
use booking_payments::payments::error::{GatewayError, PaymentError};
use booking_payments::payments::reference::ReferenceGenerator;
use booking_payments::payments::types::{Evidence, Money, Payment, PaymentLookup, PaymentStatus};
use booking_payments::services::{
    CheckoutOptions, LifecycleConfig, NotificationType, PaymentLifecycleEngine, WebhookOutcome,
};
use chrono::{DateTime, Utc};
use common::{initiate_request, sign, webhook_body, FakeGateway, Harness};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn reported(amount: &str, currency: &str) -> Evidence {
    Evidence::reported(Money::parse(amount, currency).unwrap())
}

#[tokio::test]
async fn initiate_persists_pending_payment_with_checkout() {
    let h = Harness::new();

    let payment = h.engine.initiate(initiate_request("42", "150.00")).await.unwrap();

    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.booking_reference, "42");
    assert!(payment.gateway_reference.starts_with("TRV-"));
    assert_eq!(payment.gateway_transaction_id.as_deref(), Some(payment.gateway_reference.as_str()));
    assert!(payment.checkout_url.is_some());
    assert_eq!(h.gateway.checkout_calls(), 1);

    let stored = h.engine.get(payment.id).await.unwrap();
    assert_eq!(stored, payment);
}

#[tokio::test]
async fn initiate_rejects_invalid_input_before_touching_the_store() {
    let h = Harness::new();

    let err = h
        .engine
        .initiate(initiate_request("42", "0"))
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::Validation { ref field, .. } if field == "amount"));
    assert_eq!(h.gateway.checkout_calls(), 0);
    assert!(h.store.find_active_for_booking("42").await.unwrap().is_none());
}

#[tokio::test]
async fn second_initiate_for_booking_returns_existing_payment() {
    let h = Harness::new();
    let first = h.engine.initiate(initiate_request("42", "150.00")).await.unwrap();

    let err = h
        .engine
        .initiate(initiate_request("42", "150.00"))
        .await
        .unwrap_err();

    match err {
        PaymentError::DuplicatePayment { existing } => assert_eq!(existing.id, first.id),
        other => panic!("expected DuplicatePayment, got {:?}", other),
    }
    assert_eq!(h.gateway.checkout_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_initiates_create_exactly_one_payment() {
    let h = Harness::new();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.initiate(initiate_request("42", "150.00")).await
        }));
    }

    let mut created = Vec::new();
    let mut duplicates = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(payment) => created.push(payment),
            Err(PaymentError::DuplicatePayment { existing }) => duplicates.push(*existing),
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(created.len(), 1);
    assert_eq!(duplicates.len(), 7);
    assert!(duplicates.iter().all(|p| p.id == created[0].id));
    assert_eq!(
        h.store.find_active_for_booking("42").await.unwrap().unwrap().id,
        created[0].id
    );
}

#[tokio::test]
async fn gateway_outage_leaves_payment_pending_until_checkout_is_retried() {
    let h = Harness::new();
    h.gateway.fail_next_checkout(GatewayError::Network {
        message: "connection reset".to_string(),
    });

    let err = h
        .engine
        .initiate(initiate_request("42", "150.00"))
        .await
        .unwrap_err();
    let payment_id = match err {
        PaymentError::GatewayUnavailable {
            payment_id: Some(id),
            ..
        } => id,
        other => panic!("expected GatewayUnavailable, got {:?}", other),
    };

    let stranded = h.engine.get(payment_id).await.unwrap();
    assert_eq!(stranded.status, PaymentStatus::Pending);
    assert!(stranded.awaiting_checkout());

    // The booking still holds its active slot.
    assert!(matches!(
        h.engine.initiate(initiate_request("42", "150.00")).await,
        Err(PaymentError::DuplicatePayment { .. })
    ));

    let resumed = h.engine.retry_checkout(payment_id, CheckoutOptions::default()).await.unwrap();
    assert_eq!(resumed.id, payment_id);
    assert_eq!(resumed.status, PaymentStatus::Pending);
    assert!(resumed.checkout_url.is_some());
    assert_eq!(h.gateway.checkout_calls(), 2);

    // Already open: returned as is.
    let again = h.engine.retry_checkout(payment_id, CheckoutOptions::default()).await.unwrap();
    assert_eq!(again, resumed);
    assert_eq!(h.gateway.checkout_calls(), 2);
}

#[tokio::test]
async fn checkout_retry_forwards_caller_urls() {
    let h = Harness::new();
    h.gateway.fail_next_checkout(GatewayError::Timeout { seconds: 30 });
    let mut request = initiate_request("42", "150.00");
    request.return_url = Some("https://travel.example.com/bookings/42".to_string());

    let payment_id = match h.engine.initiate(request).await.unwrap_err() {
        PaymentError::GatewayUnavailable {
            payment_id: Some(id),
            ..
        } => id,
        other => panic!("expected GatewayUnavailable, got {:?}", other),
    };

    h.engine
        .retry_checkout(
            payment_id,
            CheckoutOptions {
                return_url: Some("https://travel.example.com/bookings/42".to_string()),
                callback_url: Some("https://travel.example.com/hooks/chapa".to_string()),
            },
        )
        .await
        .unwrap();

    let sent = h.gateway.last_checkout().unwrap();
    assert_eq!(sent.return_url.as_deref(), Some("https://travel.example.com/bookings/42"));
    assert_eq!(
        sent.callback_url.as_deref(),
        Some("https://travel.example.com/hooks/chapa")
    );
}

#[tokio::test]
async fn hung_checkout_hits_the_gateway_deadline() {
    let h = Harness::with_config(LifecycleConfig {
        gateway_timeout: Duration::from_millis(100),
        ..LifecycleConfig::default()
    });
    h.gateway.delay_checkout(Duration::from_secs(30));

    let started = Instant::now();
    let err = h
        .engine
        .initiate(initiate_request("42", "150.00"))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(err.is_retryable());
    let payment_id = match err {
        PaymentError::GatewayUnavailable {
            payment_id: Some(id),
            ..
        } => id,
        other => panic!("expected GatewayUnavailable, got {:?}", other),
    };
    let stored = h.engine.get(payment_id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert!(stored.awaiting_checkout());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_checkout_does_not_block_other_payments() {
    let h = Harness::with_config(LifecycleConfig {
        gateway_timeout: Duration::from_secs(30),
        ..LifecycleConfig::default()
    });
    let settled = h.engine.initiate(initiate_request("7", "80.00")).await.unwrap();

    h.gateway.delay_checkout(Duration::from_secs(30));
    let stuck = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.initiate(initiate_request("42", "150.00")).await })
    };
    for _ in 0..200 {
        if h.gateway.checkout_calls() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.gateway.checkout_calls(), 2);

    let body = webhook_body(&settled.gateway_reference, "success", "80.00", "ETB");
    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        h.coordinator.handle_webhook(&body, Some(&sign(&body))),
    )
    .await
    .expect("webhook finishes while another checkout hangs")
    .unwrap();

    assert!(matches!(
        outcome,
        WebhookOutcome::Applied(ref p) if p.status == PaymentStatus::Completed
    ));
    assert!(!stuck.is_finished());
    stuck.abort();
}

#[tokio::test]
async fn gateway_rejection_fails_payment_and_frees_booking() {
    let mut h = Harness::new();
    h.gateway.fail_next_checkout(GatewayError::Provider {
        provider: "fake".to_string(),
        message: "invalid customer email".to_string(),
        provider_code: Some("400".to_string()),
        retryable: false,
    });

    let err = h
        .engine
        .initiate(initiate_request("42", "150.00"))
        .await
        .unwrap_err();
    let payment_id = match err {
        PaymentError::GatewayRejected {
            payment_id,
            message,
        } => {
            assert_eq!(message, "invalid customer email");
            payment_id
        }
        other => panic!("expected GatewayRejected, got {:?}", other),
    };

    let failed = h.engine.get(payment_id).await.unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("invalid customer email"));

    let notifications = h.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationType::PaymentFailed);

    // A failed checkout cannot be resumed.
    assert!(matches!(
        h.engine.retry_checkout(payment_id, CheckoutOptions::default()).await,
        Err(PaymentError::InvalidTransition {
            from: PaymentStatus::Failed,
            to: PaymentStatus::Pending,
            ..
        })
    ));

    let replacement = h.engine.initiate(initiate_request("42", "150.00")).await.unwrap();
    assert_ne!(replacement.id, payment_id);
}

#[tokio::test]
async fn transitions_follow_the_table() {
    let h = Harness::new();
    let payment = h.engine.initiate(initiate_request("42", "150.00")).await.unwrap();
    let lookup = PaymentLookup::Id(payment.id);

    assert!(matches!(
        h.engine
            .transition(lookup.clone(), PaymentStatus::Refunded, Evidence::internal())
            .await,
        Err(PaymentError::InvalidTransition {
            from: PaymentStatus::Pending,
            to: PaymentStatus::Refunded,
            ..
        })
    ));

    let processing = h
        .engine
        .transition(lookup.clone(), PaymentStatus::Processing, reported("150.00", "ETB"))
        .await
        .unwrap();
    assert_eq!(processing.status, PaymentStatus::Processing);

    let completed = h
        .engine
        .transition(lookup.clone(), PaymentStatus::Completed, reported("150", "etb"))
        .await
        .unwrap();
    assert_eq!(completed.status, PaymentStatus::Completed);
    let paid_at = completed.paid_at.expect("paid_at set on completion");

    assert!(matches!(
        h.engine
            .transition(lookup.clone(), PaymentStatus::Failed, Evidence::failure("late"))
            .await,
        Err(PaymentError::InvalidTransition {
            from: PaymentStatus::Completed,
            to: PaymentStatus::Failed,
            ..
        })
    ));

    let refunded = h.engine.refund(payment.id).await.unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.paid_at, Some(paid_at));

    // Refunded releases the booking.
    assert!(h.store.find_active_for_booking("42").await.unwrap().is_none());
}

#[tokio::test]
async fn repeated_transition_is_a_no_op_without_a_write() {
    let mut h = Harness::new();
    let payment = h.engine.initiate(initiate_request("42", "150.00")).await.unwrap();
    let lookup = PaymentLookup::Reference(payment.gateway_reference.clone());

    let completed = h
        .engine
        .transition(lookup.clone(), PaymentStatus::Completed, reported("150.00", "ETB"))
        .await
        .unwrap();
    let writes = h.store.updates();

    let replay = h
        .engine
        .transition(lookup, PaymentStatus::Completed, reported("150.00", "ETB"))
        .await
        .unwrap();

    assert_eq!(replay, completed);
    assert_eq!(h.store.updates(), writes);
    assert_eq!(h.drain_notifications().len(), 1);
}

#[tokio::test]
async fn amount_mismatch_fails_the_payment() {
    let h = Harness::new();
    let payment = h.engine.initiate(initiate_request("42", "150.00")).await.unwrap();

    let err = h
        .engine
        .transition(
            PaymentLookup::Id(payment.id),
            PaymentStatus::Completed,
            reported("100.00", "ETB"),
        )
        .await
        .unwrap_err();

    match err {
        PaymentError::AmountMismatch {
            expected, reported, ..
        } => {
            assert_eq!(expected, "150.00 ETB");
            assert_eq!(reported, "100.00 ETB");
        }
        other => panic!("expected AmountMismatch, got {:?}", other),
    }

    let failed = h.engine.get(payment.id).await.unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(
        failed.failure_reason.as_deref(),
        Some("amount_mismatch: expected 150.00 ETB, got 100.00 ETB")
    );
}

#[tokio::test]
async fn currency_mismatch_is_an_amount_mismatch() {
    let h = Harness::new();
    let payment = h.engine.initiate(initiate_request("42", "150.00")).await.unwrap();

    let err = h
        .engine
        .transition(
            PaymentLookup::Id(payment.id),
            PaymentStatus::Completed,
            reported("150.00", "USD"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::AmountMismatch { .. }));
    assert_eq!(
        h.engine.get(payment.id).await.unwrap().status,
        PaymentStatus::Failed
    );
}

#[tokio::test]
async fn amount_mismatch_on_settled_payment_leaves_it_untouched() {
    let h = Harness::new();
    let payment = h.engine.initiate(initiate_request("42", "150.00")).await.unwrap();
    let completed = h
        .engine
        .transition(
            PaymentLookup::Id(payment.id),
            PaymentStatus::Completed,
            reported("150.00", "ETB"),
        )
        .await
        .unwrap();

    let err = h
        .engine
        .transition(
            PaymentLookup::Id(payment.id),
            PaymentStatus::Completed,
            reported("1.00", "ETB"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::AmountMismatch { .. }));
    assert_eq!(h.engine.get(payment.id).await.unwrap(), completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_conflicting_transitions_have_one_winner() {
    for _ in 0..20 {
        let h = Harness::new();
        let payment = h.engine.initiate(initiate_request("42", "150.00")).await.unwrap();

        let complete = {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .transition(
                        PaymentLookup::Id(payment.id),
                        PaymentStatus::Completed,
                        reported("150.00", "ETB"),
                    )
                    .await
            })
        };
        let cancel = {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.cancel(payment.id).await })
        };

        let results = [complete.await.unwrap(), cancel.await.unwrap()];
        let winners: Vec<&Payment> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(PaymentError::InvalidTransition { .. }))));

        let stored = h.engine.get(payment.id).await.unwrap();
        assert_eq!(stored.status, winners[0].status);
    }
}

#[tokio::test]
async fn unknown_payment_is_not_found() {
    let h = Harness::new();

    assert!(matches!(
        h.engine.get(Uuid::new_v4()).await,
        Err(PaymentError::NotFound { .. })
    ));
    assert!(matches!(
        h.engine.find_by_reference("TRV-000000000000").await,
        Err(PaymentError::NotFound { .. })
    ));
}

struct FixedReference;

impl ReferenceGenerator for FixedReference {
    fn generate(&self) -> String {
        "TRV-FIXED0000000".to_string()
    }
}

#[tokio::test]
async fn reference_collisions_are_bounded() {
    let store = Arc::new(InMemoryPaymentStore::new());
    let engine = PaymentLifecycleEngine::new(
        store,
        Arc::new(FakeGateway::new()),
        LifecycleConfig {
            reference_max_attempts: 3,
            ..LifecycleConfig::default()
        },
    )
    .with_reference_generator(Arc::new(FixedReference));

    engine.initiate(initiate_request("42", "150.00")).await.unwrap();
    let err = engine
        .initiate(initiate_request("43", "150.00"))
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::ReferenceExhausted { attempts: 3 }));
}

/// Reports every conditional write as lost.
struct AlwaysConflicting(InMemoryPaymentStore);

#[async_trait]
impl PaymentStore for AlwaysConflicting {
    async fn insert(&self, payment: &Payment) -> StoreResult<Payment> {
        self.0.insert(payment).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        self.0.get(id).await
    }

    async fn find_by_reference(&self, gateway_reference: &str) -> StoreResult<Option<Payment>> {
        self.0.find_by_reference(gateway_reference).await
    }

    async fn find_active_for_booking(
        &self,
        booking_reference: &str,
    ) -> StoreResult<Option<Payment>> {
        self.0.find_active_for_booking(booking_reference).await
    }

    async fn update_if_status(
        &self,
        _candidate: &Payment,
        expected: PaymentStatus,
    ) -> StoreResult<Payment> {
        Err(StoreError::StatusConflict {
            expected,
            actual: expected,
        })
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Payment>> {
        self.0.find_stale(cutoff, limit).await
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn endless_conflicts_surface_as_contention() {
    let inner = InMemoryPaymentStore::new();
    let seeded = Payment::new_pending(
        "42",
        Money::parse("150.00", "ETB").unwrap(),
        common::customer(),
        "TRV-CONTENDED000",
        Utc::now(),
    );
    inner.insert(&seeded).await.unwrap();

    let engine = PaymentLifecycleEngine::new(
        Arc::new(AlwaysConflicting(inner)),
        Arc::new(FakeGateway::new()),
        LifecycleConfig {
            transition_max_attempts: 3,
            ..LifecycleConfig::default()
        },
    );

    let err = engine.cancel(seeded.id).await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Store(StoreError::Contention { id }) if id == seeded.id
    ));
    assert_eq!(err.http_status_code(), 409);
}
