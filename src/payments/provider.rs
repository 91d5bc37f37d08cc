use crate::payments::error::GatewayResult;
use crate::payments::types::{
    CheckoutRequest, CheckoutSession, GatewayVerification, WebhookEvent,
    WebhookVerificationResult,
};
use async_trait::async_trait;

/// Hosted-checkout payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout(&self, request: CheckoutRequest) -> GatewayResult<CheckoutSession>;

    /// Authoritative status of the transaction behind `reference`.
    async fn verify_transaction(&self, reference: &str) -> GatewayResult<GatewayVerification>;

    fn name(&self) -> &'static str;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> GatewayResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<WebhookEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{CustomerContact, GatewayStatus, Money};

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_checkout(
            &self,
            request: CheckoutRequest,
        ) -> GatewayResult<CheckoutSession> {
            Ok(CheckoutSession {
                checkout_url: format!("https://checkout.example.com/{}", request.reference),
                transaction_id: request.reference,
            })
        }

        async fn verify_transaction(&self, reference: &str) -> GatewayResult<GatewayVerification> {
            Ok(GatewayVerification {
                status: GatewayStatus::Success,
                reference: reference.to_string(),
                amount: Money::parse("150.00", "ETB").unwrap(),
                transaction_id: Some("mock_tx".to_string()),
                failure_reason: None,
                payment_method: Some("telebirr".to_string()),
            })
        }

        fn name(&self) -> &'static str {
            "mock"
        }

        fn verify_webhook(
            &self,
            _payload: &[u8],
            _signature: &str,
        ) -> GatewayResult<WebhookVerificationResult> {
            Ok(WebhookVerificationResult {
                valid: true,
                reason: None,
            })
        }

        fn parse_webhook_event(&self, _payload: &[u8]) -> GatewayResult<WebhookEvent> {
            Ok(WebhookEvent {
                event_type: "charge.success".to_string(),
                gateway_reference: "TRV-000000000000".to_string(),
                status: GatewayStatus::Success,
                amount: Money::parse("150.00", "ETB").unwrap(),
                transaction_id: None,
                failure_reason: None,
                payment_method: None,
                received_at: chrono::Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);
        let session = gateway
            .create_checkout(CheckoutRequest {
                reference: "TRV-ABCDEF012345".to_string(),
                amount: Money::parse("150.00", "ETB").unwrap(),
                customer: CustomerContact {
                    email: "guest@example.com".to_string(),
                    phone: None,
                    name: "Guest".to_string(),
                },
                return_url: None,
                callback_url: None,
                description: None,
            })
            .await
            .expect("checkout creation should succeed");
        assert_eq!(session.transaction_id, "TRV-ABCDEF012345");

        let verification = gateway
            .verify_transaction("TRV-ABCDEF012345")
            .await
            .expect("verification should succeed");
        assert_eq!(verification.status, GatewayStatus::Success);
        assert_eq!(gateway.name(), "mock");
    }
}
