//! Services module for business logic and integrations

pub mod notification;
pub mod payment_lifecycle;
pub mod reconciliation;

pub use notification::{
    HttpNotifier, LogNotifier, NotificationConfig, NotificationDispatcher, NotificationError,
    NotificationType, Notifier, PaymentNotification,
};
pub use payment_lifecycle::{
    CheckoutOptions, InitiatePaymentRequest, LifecycleConfig, PaymentLifecycleEngine,
};
pub use reconciliation::{ReconciliationCoordinator, WebhookOutcome};
