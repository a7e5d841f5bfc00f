//! Configurable in-process gateway for tests and DATABASE_URL-less local
//! runs. Shares the real signature scheme so webhook verification is
//! exercised end to end.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::gateway::{
    signature, CheckoutSession, GatewayError, PaymentEvent, PaymentGateway, PaymentOutcome,
};
use crate::models::BankAccount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Provider,
    Timeout,
}

#[derive(Default)]
struct MockState {
    fail_next_checkout: Option<MockFailure>,
    fail_next_payout: Option<MockFailure>,
    payouts: Vec<(String, Decimal)>,
}

pub struct MockGateway {
    checksum_key: String,
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(checksum_key: impl Into<String>) -> Self {
        Self {
            checksum_key: checksum_key.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn fail_next_checkout(&self, failure: MockFailure) {
        self.state.lock().fail_next_checkout = Some(failure);
    }

    pub fn fail_next_payout(&self, failure: MockFailure) {
        self.state.lock().fail_next_payout = Some(failure);
    }

    /// Payouts that actually went through, for assertions.
    pub fn payouts(&self) -> Vec<(String, Decimal)> {
        self.state.lock().payouts.clone()
    }

    /// A correctly signed webhook body for `order_code`, as the gateway
    /// would deliver it.
    pub fn webhook_body(&self, order_code: i64, amount: i64, paid: bool) -> Vec<u8> {
        let data = json!({
            "orderCode": order_code,
            "amount": amount,
            "code": if paid { "00" } else { "01" },
            "desc": if paid { "success" } else { "cancelled" },
            "reference": format!("mock_ref_{order_code}"),
        });
        let body = json!({
            "code": "00",
            "desc": "success",
            "success": true,
            "signature": signature::sign_object(&self.checksum_key, &data),
            "data": data,
        });
        serde_json::to_vec(&body).unwrap()
    }

    fn take(failure: &mut Option<MockFailure>) -> Result<(), GatewayError> {
        match failure.take() {
            None => Ok(()),
            Some(MockFailure::Timeout) => Err(GatewayError::Timeout),
            Some(MockFailure::Provider) => {
                Err(GatewayError::Provider("mock failure".to_string()))
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout_session(
        &self,
        order_code: i64,
        _amount: Decimal,
        _description: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        Self::take(&mut self.state.lock().fail_next_checkout)?;
        Ok(CheckoutSession {
            session_id: format!("mock_sess_{order_code}"),
            checkout_url: format!("https://pay.example.test/checkout/{order_code}"),
        })
    }

    fn verify_webhook(&self, raw_body: &[u8]) -> Result<PaymentEvent, GatewayError> {
        let body: Value = serde_json::from_slice(raw_body)
            .map_err(|e| GatewayError::Signature(format!("unparseable webhook body: {e}")))?;
        let data = &body["data"];
        let sig = body["signature"].as_str().unwrap_or_default();
        if !signature::verify_object(&self.checksum_key, data, sig) {
            return Err(GatewayError::Signature("checksum mismatch".to_string()));
        }

        let order_code = data["orderCode"]
            .as_i64()
            .ok_or_else(|| GatewayError::Signature("missing orderCode".to_string()))?;
        Ok(PaymentEvent {
            order_code,
            amount: Decimal::from(data["amount"].as_i64().unwrap_or(0)),
            outcome: if data["code"].as_str() == Some("00") {
                PaymentOutcome::Paid
            } else {
                PaymentOutcome::Cancelled
            },
            reference: data["reference"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn initiate_payout(
        &self,
        _account: &BankAccount,
        amount: Decimal,
        _description: &str,
    ) -> Result<String, GatewayError> {
        let mut state = self.state.lock();
        Self::take(&mut state.fail_next_payout)?;
        let reference = format!("mock_payout_{}", Uuid::new_v4());
        state.payouts.push((reference.clone(), amount));
        Ok(reference)
    }
}
