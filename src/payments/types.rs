use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Payment status state machine
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::Refunded,
    ];

    /// Statuses reachable from this one in a single step.
    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[
                PaymentStatus::Processing,
                PaymentStatus::Completed,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Processing => &[
                PaymentStatus::Completed,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Completed => &[PaymentStatus::Refunded],
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// Whether a payment in this status occupies its booking's single active slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Completed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(PaymentError::Validation {
                field: "status".to_string(),
                message: format!("unknown payment status: {}", value),
            }),
        }
    }
}

// ============================================================================
// Money and customer details
// ============================================================================

/// Stored amounts are `NUMERIC(12, 2)`.
const MONEY_SCALE: i64 = 2;
const MONEY_UPPER_BOUND: i64 = 10_000_000_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into().trim().to_uppercase(),
        }
    }

    pub fn parse(amount: &str, currency: &str) -> Result<Self, PaymentError> {
        let parsed = BigDecimal::from_str(amount.trim()).map_err(|_| PaymentError::Validation {
            field: "amount".to_string(),
            message: format!("invalid decimal amount: {}", amount),
        })?;
        Ok(Self::new(parsed, currency))
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if self.amount <= BigDecimal::from(0) {
            return Err(PaymentError::Validation {
                field: field.to_string(),
                message: "amount must be greater than zero".to_string(),
            });
        }
        let (_, scale) = self.amount.normalized().as_bigint_and_exponent();
        if scale > MONEY_SCALE {
            return Err(PaymentError::Validation {
                field: field.to_string(),
                message: format!("amount allows at most {} decimal places", MONEY_SCALE),
            });
        }
        if self.amount >= BigDecimal::from(MONEY_UPPER_BOUND) {
            return Err(PaymentError::Validation {
                field: field.to_string(),
                message: format!("amount must be below {}", MONEY_UPPER_BOUND),
            });
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::Validation {
                field: "currency".to_string(),
                message: format!("currency must be a 3-letter code, got '{}'", self.currency),
            });
        }
        Ok(())
    }

    /// Numeric comparison, so `150` and `150.00` are the same value.
    pub fn same_value(&self, other: &Money) -> bool {
        self.amount == other.amount && self.currency.eq_ignore_ascii_case(&other.currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerContact {
    pub email: String,
    pub phone: Option<String>,
    pub name: String,
}

impl CustomerContact {
    pub fn validate(&self) -> Result<(), PaymentError> {
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(PaymentError::Validation {
                field: "customer_email".to_string(),
                message: "a valid customer email is required".to_string(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(PaymentError::Validation {
                field: "customer_name".to_string(),
                message: "customer name is required".to_string(),
            });
        }
        Ok(())
    }

    /// Splits the full name on the first whitespace run.
    pub fn split_name(&self) -> (String, String) {
        let mut parts = self.name.split_whitespace();
        let first = parts.next().unwrap_or_default().to_string();
        let last = parts.collect::<Vec<_>>().join(" ");
        (first, last)
    }
}

// ============================================================================
// Payment entity
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    pub id: Uuid,
    pub booking_reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_reference: String,
    pub gateway_transaction_id: Option<String>,
    pub checkout_url: Option<String>,
    pub payment_method: Option<String>,
    pub customer: CustomerContact,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new_pending(
        booking_reference: impl Into<String>,
        money: Money,
        customer: CustomerContact,
        gateway_reference: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_reference: booking_reference.into(),
            amount: money.amount,
            currency: money.currency,
            status: PaymentStatus::Pending,
            gateway_reference: gateway_reference.into(),
            gateway_transaction_id: None,
            checkout_url: None,
            payment_method: None,
            customer,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        }
    }

    pub fn money(&self) -> Money {
        Money::new(self.amount.clone(), self.currency.clone())
    }

    /// A pending payment whose checkout session was never opened.
    pub fn awaiting_checkout(&self) -> bool {
        self.status == PaymentStatus::Pending && self.gateway_transaction_id.is_none()
    }

    /// Returns the record as it looks after moving to `target`. Legality is
    /// checked by the caller.
    pub fn transitioned(
        &self,
        target: PaymentStatus,
        evidence: &Evidence,
        now: DateTime<Utc>,
    ) -> Payment {
        let mut next = self.clone();
        next.status = target;
        next.updated_at = now;

        if target == PaymentStatus::Failed {
            next.failure_reason = Some(
                evidence
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "unspecified".to_string()),
            );
        }
        if target == PaymentStatus::Completed && next.paid_at.is_none() {
            next.paid_at = Some(now);
        }
        if next.gateway_transaction_id.is_none() {
            next.gateway_transaction_id = evidence.transaction_id.clone();
        }
        if next.payment_method.is_none() {
            next.payment_method = evidence.payment_method.clone();
        }
        next
    }

    /// Attaches checkout data without touching the status.
    pub fn with_checkout(&self, session: &CheckoutSession, now: DateTime<Utc>) -> Payment {
        let mut next = self.clone();
        if next.gateway_transaction_id.is_none() {
            next.gateway_transaction_id = Some(session.transaction_id.clone());
        }
        if next.checkout_url.is_none() {
            next.checkout_url = Some(session.checkout_url.clone());
        }
        next.updated_at = now;
        next
    }
}

/// How a caller addresses a payment: by id or by gateway reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentLookup {
    Id(Uuid),
    Reference(String),
}

impl PaymentLookup {
    pub fn parse(value: &str) -> Self {
        match Uuid::parse_str(value.trim()) {
            Ok(id) => PaymentLookup::Id(id),
            Err(_) => PaymentLookup::Reference(value.trim().to_string()),
        }
    }
}

impl From<Uuid> for PaymentLookup {
    fn from(id: Uuid) -> Self {
        PaymentLookup::Id(id)
    }
}

impl From<&str> for PaymentLookup {
    fn from(value: &str) -> Self {
        PaymentLookup::parse(value)
    }
}

impl fmt::Display for PaymentLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentLookup::Id(id) => write!(f, "{}", id),
            PaymentLookup::Reference(reference) => f.write_str(reference),
        }
    }
}

/// What the gateway (or an operator) reported alongside a status change.
/// `amount` is absent only for internally originated transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    pub transaction_id: Option<String>,
    pub amount: Option<Money>,
    pub failure_reason: Option<String>,
    pub payment_method: Option<String>,
}

impl Evidence {
    pub fn internal() -> Self {
        Self::default()
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn reported(amount: Money) -> Self {
        Self {
            amount: Some(amount),
            ..Self::default()
        }
    }
}

// ============================================================================
// Gateway request / response shapes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub reference: String,
    pub amount: Money,
    pub customer: CustomerContact,
    pub return_url: Option<String>,
    pub callback_url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
    Refunded,
    Unknown,
}

impl GatewayStatus {
    pub fn from_provider_str(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "pending" => GatewayStatus::Pending,
            "processing" => GatewayStatus::Processing,
            "success" | "successful" | "completed" => GatewayStatus::Success,
            "failed" | "failure" => GatewayStatus::Failed,
            "cancelled" | "canceled" => GatewayStatus::Cancelled,
            "refunded" | "reversed" => GatewayStatus::Refunded,
            _ => GatewayStatus::Unknown,
        }
    }

    /// Lifecycle status this gateway report drives the payment towards.
    /// `None` means there is nothing to reconcile yet.
    pub fn target_status(&self) -> Option<PaymentStatus> {
        match self {
            GatewayStatus::Processing => Some(PaymentStatus::Processing),
            GatewayStatus::Success => Some(PaymentStatus::Completed),
            GatewayStatus::Failed => Some(PaymentStatus::Failed),
            GatewayStatus::Cancelled => Some(PaymentStatus::Cancelled),
            GatewayStatus::Refunded => Some(PaymentStatus::Refunded),
            GatewayStatus::Pending | GatewayStatus::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayVerification {
    pub status: GatewayStatus,
    pub reference: String,
    pub amount: Money,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub payment_method: Option<String>,
}

impl GatewayVerification {
    pub fn evidence(&self) -> Evidence {
        Evidence {
            transaction_id: self.transaction_id.clone(),
            amount: Some(self.amount.clone()),
            failure_reason: self.failure_reason.clone(),
            payment_method: self.payment_method.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub gateway_reference: String,
    pub status: GatewayStatus,
    pub amount: Money,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub payment_method: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn evidence(&self) -> Evidence {
        Evidence {
            transaction_id: self.transaction_id.clone(),
            amount: Some(self.amount.clone()),
            failure_reason: self.failure_reason.clone(),
            payment_method: self.payment_method.clone(),
        }
    }
}
