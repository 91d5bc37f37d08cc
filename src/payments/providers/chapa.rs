use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    CheckoutRequest, CheckoutSession, GatewayStatus, GatewayVerification, Money, WebhookEvent,
    WebhookVerificationResult,
};
use crate::payments::utils::{verify_hmac_sha256_hex, PaymentHttpClient};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

const PROVIDER: &str = "chapa";

#[derive(Debug, Clone)]
pub struct ChapaConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub return_url: Option<String>,
    pub callback_url: Option<String>,
}

impl Default for ChapaConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.chapa.co/v1".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            return_url: None,
            callback_url: None,
        }
    }
}

impl ChapaConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let secret_key = std::env::var("CHAPA_SECRET_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(GatewayError::Validation {
                message: "CHAPA_SECRET_KEY environment variable is required".to_string(),
                field: Some("CHAPA_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            webhook_secret: std::env::var("CHAPA_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("CHAPA_BASE_URL")
                .unwrap_or_else(|_| "https://api.chapa.co/v1".to_string()),
            timeout_secs: std::env::var("CHAPA_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("CHAPA_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
            return_url: std::env::var("CHAPA_RETURN_URL").ok(),
            callback_url: std::env::var("CHAPA_CALLBACK_URL").ok(),
            secret_key,
        })
    }

    /// Webhooks are signed with the dedicated secret when one is configured.
    pub fn signing_secret(&self) -> &str {
        self.webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.secret_key)
    }
}

pub struct ChapaGateway {
    config: ChapaConfig,
    http: PaymentHttpClient,
}

impl ChapaGateway {
    pub fn new(config: ChapaConfig) -> GatewayResult<Self> {
        let http = PaymentHttpClient::new(
            PROVIDER,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(ChapaConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Builds the initialize body, leaving out every empty field.
    fn initialize_payload(&self, request: &CheckoutRequest) -> JsonValue {
        let (first_name, last_name) = request.customer.split_name();
        let return_url = request
            .return_url
            .clone()
            .or_else(|| self.config.return_url.clone());
        let callback_url = request
            .callback_url
            .clone()
            .or_else(|| self.config.callback_url.clone());

        let fields = [
            ("amount", Some(request.amount.amount.to_string())),
            ("currency", Some(request.amount.currency.clone())),
            ("email", Some(request.customer.email.clone())),
            ("first_name", Some(first_name)),
            ("last_name", Some(last_name)),
            ("phone_number", request.customer.phone.clone()),
            ("tx_ref", Some(request.reference.clone())),
            ("callback_url", callback_url),
            ("return_url", return_url),
            ("description", request.description.clone()),
        ];

        let mut body = Map::new();
        for (key, value) in fields {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                body.insert(key.to_string(), JsonValue::String(value));
            }
        }
        JsonValue::Object(body)
    }

    fn envelope_error(message: String) -> GatewayError {
        GatewayError::Provider {
            provider: PROVIDER.to_string(),
            message,
            provider_code: None,
            retryable: false,
        }
    }
}

#[async_trait]
impl PaymentGateway for ChapaGateway {
    async fn create_checkout(&self, request: CheckoutRequest) -> GatewayResult<CheckoutSession> {
        if request.customer.email.trim().is_empty() {
            return Err(GatewayError::Validation {
                message: "customer email is required for chapa initialization".to_string(),
                field: Some("email".to_string()),
            });
        }

        let payload = self.initialize_payload(&request);
        let raw: ChapaEnvelope<ChapaInitializeData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                Some(&self.config.secret_key),
                Some(&payload),
            )
            .await?;

        if !raw.is_success() {
            return Err(Self::envelope_error(raw.message_text()));
        }
        let data = raw
            .data
            .ok_or_else(|| Self::envelope_error("initialize response has no data".to_string()))?;

        info!(reference = %request.reference, "chapa checkout initialized");

        Ok(CheckoutSession {
            checkout_url: data.checkout_url,
            transaction_id: data.tx_ref.unwrap_or(request.reference),
        })
    }

    async fn verify_transaction(&self, reference: &str) -> GatewayResult<GatewayVerification> {
        if reference.trim().is_empty() {
            return Err(GatewayError::Validation {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }

        let raw: ChapaEnvelope<ChapaVerifyData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", reference)),
                Some(&self.config.secret_key),
                None,
            )
            .await?;
        if !raw.is_success() {
            return Err(Self::envelope_error(raw.message_text()));
        }
        let data = raw
            .data
            .ok_or_else(|| Self::envelope_error("verify response has no data".to_string()))?;

        let status = GatewayStatus::from_provider_str(&data.status);
        if status == GatewayStatus::Unknown {
            warn!(reference = %reference, status = %data.status, "unrecognised chapa status");
        }

        let amount = parse_amount(data.amount.as_ref())
            .ok_or_else(|| Self::envelope_error("verify response has no valid amount".to_string()))?;

        Ok(GatewayVerification {
            status,
            reference: data.tx_ref.unwrap_or_else(|| reference.to_string()),
            amount: Money::new(amount, data.currency.unwrap_or_default()),
            transaction_id: data.reference,
            failure_reason: data.message,
            payment_method: data.method.or(data.payment_type),
        })
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> GatewayResult<WebhookVerificationResult> {
        let valid = verify_hmac_sha256_hex(payload, self.config.signing_secret(), signature);
        Ok(WebhookVerificationResult {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid chapa signature".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<WebhookEvent> {
        parse_chapa_webhook(payload)
    }
}

pub fn parse_chapa_webhook(payload: &[u8]) -> GatewayResult<WebhookEvent> {
    let parsed: JsonValue =
        serde_json::from_slice(payload).map_err(|e| GatewayError::Validation {
            message: format!("invalid webhook JSON payload: {}", e),
            field: None,
        })?;

    let text = |key: &str| {
        parsed
            .get(key)
            .and_then(|v| v.as_str())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let required = |key: &str| {
        text(key).ok_or(GatewayError::Validation {
            message: format!("webhook payload is missing '{}'", key),
            field: Some(key.to_string()),
        })
    };

    let gateway_reference = required("tx_ref")?;
    let status_raw = required("status")?;
    let currency = required("currency")?;
    let amount = parse_amount(parsed.get("amount")).ok_or(GatewayError::Validation {
        message: "webhook payload has no valid 'amount'".to_string(),
        field: Some("amount".to_string()),
    })?;

    Ok(WebhookEvent {
        event_type: text("event").unwrap_or_else(|| format!("charge.{}", status_raw)),
        gateway_reference,
        status: GatewayStatus::from_provider_str(&status_raw),
        amount: Money::new(amount, currency),
        transaction_id: text("reference"),
        failure_reason: text("failure_reason").or_else(|| text("message")),
        payment_method: text("payment_method").or_else(|| text("type")),
        received_at: chrono::Utc::now(),
    })
}

/// Chapa reports amounts as JSON numbers or strings.
fn parse_amount(value: Option<&JsonValue>) -> Option<BigDecimal> {
    match value? {
        JsonValue::String(s) => BigDecimal::from_str(s.trim()).ok(),
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ChapaEnvelope<T> {
    status: String,
    #[serde(default)]
    message: Option<JsonValue>,
    data: Option<T>,
}

impl<T> ChapaEnvelope<T> {
    fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }

    fn message_text(&self) -> String {
        match &self.message {
            Some(JsonValue::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => format!("chapa returned status '{}'", self.status),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChapaInitializeData {
    checkout_url: String,
    #[serde(default)]
    tx_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChapaVerifyData {
    status: String,
    #[serde(default)]
    amount: Option<JsonValue>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    tx_ref: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, rename = "type")]
    payment_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::CustomerContact;
    use crate::payments::utils::sign_hmac_sha256_hex;

    fn gateway() -> ChapaGateway {
        ChapaGateway::new(ChapaConfig {
            secret_key: "CHASECK_TEST".to_string(),
            webhook_secret: Some("whsec".to_string()),
            ..ChapaConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn initialize_payload_omits_empty_fields() {
        let request = CheckoutRequest {
            reference: "TRV-0A1B2C3D4E5F".to_string(),
            amount: Money::parse("150.00", "ETB").unwrap(),
            customer: CustomerContact {
                email: "guest@example.com".to_string(),
                phone: None,
                name: "Abebe".to_string(),
            },
            return_url: None,
            callback_url: Some("https://example.com/hook".to_string()),
            description: None,
        };

        let payload = gateway().initialize_payload(&request);
        assert_eq!(payload["amount"], "150.00");
        assert_eq!(payload["first_name"], "Abebe");
        assert_eq!(payload["tx_ref"], "TRV-0A1B2C3D4E5F");
        assert_eq!(payload["callback_url"], "https://example.com/hook");
        assert!(payload.get("last_name").is_none());
        assert!(payload.get("phone_number").is_none());
        assert!(payload.get("return_url").is_none());
    }

    #[test]
    fn webhook_signature_uses_webhook_secret() {
        let gw = gateway();
        let body = br#"{"tx_ref":"TRV-1","status":"success","amount":"10","currency":"ETB"}"#;
        let good = sign_hmac_sha256_hex(body, "whsec");
        assert!(gw.verify_webhook(body, &good).unwrap().valid);

        let bad = sign_hmac_sha256_hex(body, "CHASECK_TEST");
        let result = gw.verify_webhook(body, &bad).unwrap();
        assert!(!result.valid);
        assert!(result.reason.is_some());
    }

    #[test]
    fn parses_webhook_with_numeric_amount() {
        let body = br#"{"event":"charge.success","tx_ref":"TRV-1","status":"success","amount":150,"currency":"etb","reference":"APabc","payment_method":"telebirr"}"#;
        let event = parse_chapa_webhook(body).unwrap();
        assert_eq!(event.gateway_reference, "TRV-1");
        assert_eq!(event.status, GatewayStatus::Success);
        assert!(event.amount.same_value(&Money::parse("150.00", "ETB").unwrap()));
        assert_eq!(event.transaction_id.as_deref(), Some("APabc"));
        assert_eq!(event.payment_method.as_deref(), Some("telebirr"));
    }

    #[test]
    fn rejects_webhook_without_reference() {
        let body = br#"{"status":"success","amount":"150","currency":"ETB"}"#;
        assert!(matches!(
            parse_chapa_webhook(body),
            Err(GatewayError::Validation { .. })
        ));
        assert!(parse_chapa_webhook(b"not json").is_err());
    }

    #[test]
    fn envelope_message_falls_back_to_status() {
        let envelope: ChapaEnvelope<ChapaInitializeData> =
            serde_json::from_str(r#"{"status":"failed","message":{"currency":["invalid"]}}"#)
                .unwrap();
        assert!(!envelope.is_success());
        assert!(envelope.message_text().contains("currency"));
        assert!(envelope.data.is_none());
    }

    #[test]
    fn verify_envelope_carries_data_when_present() {
        let envelope: ChapaEnvelope<ChapaVerifyData> = serde_json::from_str(
            r#"{"status":"success","message":"Payment details","data":{"status":"success","amount":"150.00","currency":"ETB","tx_ref":"TRV-1","method":"telebirr"}}"#,
        )
        .unwrap();
        assert!(envelope.is_success());
        let data = envelope.data.unwrap();
        assert_eq!(data.tx_ref.as_deref(), Some("TRV-1"));
        assert_eq!(data.method.as_deref(), Some("telebirr"));

        let empty: ChapaEnvelope<ChapaVerifyData> =
            serde_json::from_str(r#"{"status":"failed","message":"Invalid transaction","data":null}"#)
                .unwrap();
        assert!(empty.data.is_none());
        assert_eq!(empty.message_text(), "Invalid transaction");
    }
}
