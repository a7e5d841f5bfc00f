//! PayOS adapter: hosted checkout links, webhook verification, and payouts.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::gateway::{
    signature, CheckoutSession, GatewayError, PaymentEvent, PaymentGateway, PaymentOutcome,
};
use crate::models::BankAccount;

const DEFAULT_BASE_URL: &str = "https://api-merchant.payos.vn";

/// Result code PayOS uses for success, both in API responses and in the
/// per-payment `data.code` of webhooks.
const CODE_OK: &str = "00";

#[derive(Debug, Clone)]
pub struct PayosConfig {
    pub client_id: String,
    pub api_key: String,
    pub checksum_key: String,
    pub return_url: String,
    pub cancel_url: String,
    pub base_url: String,
    pub payout_timeout: Duration,
}

impl PayosConfig {
    pub fn new(client_id: String, api_key: String, checksum_key: String) -> Self {
        Self {
            client_id,
            api_key,
            checksum_key,
            return_url: String::new(),
            cancel_url: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            payout_timeout: Duration::from_secs(15),
        }
    }
}

pub struct PayosGateway {
    config: PayosConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ApiEnvelope {
    code: String,
    desc: String,
    data: Option<Value>,
}

#[derive(Deserialize)]
struct WebhookBody {
    data: Value,
    signature: String,
}

impl PayosGateway {
    pub fn new(config: PayosConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { config, client })
    }

    async fn post(&self, path: &str, body: Value, timeout: Duration) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .client
            .post(url)
            .header("x-client-id", &self.config.client_id)
            .header("x-api-key", &self.config.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Transport(e)
                }
            })?;

        let envelope: ApiEnvelope = response.json().await?;
        if envelope.code != CODE_OK {
            return Err(GatewayError::Provider(format!(
                "{}: {}",
                envelope.code, envelope.desc
            )));
        }
        envelope
            .data
            .ok_or_else(|| GatewayError::Provider("response carried no data".to_string()))
    }

    fn amount_units(amount: Decimal) -> Result<i64, GatewayError> {
        amount
            .round_dp(0)
            .to_i64()
            .ok_or_else(|| GatewayError::Provider(format!("amount {amount} out of range")))
    }
}

#[async_trait]
impl PaymentGateway for PayosGateway {
    async fn create_checkout_session(
        &self,
        order_code: i64,
        amount: Decimal,
        description: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        let amount = Self::amount_units(amount)?;
        let fields = json!({
            "orderCode": order_code,
            "amount": amount,
            "description": description,
            "returnUrl": self.config.return_url,
            "cancelUrl": self.config.cancel_url,
        });
        let mut body = fields.clone();
        body["signature"] = Value::String(signature::sign_object(&self.config.checksum_key, &fields));

        let data = self
            .post("/v2/payment-requests", body, Duration::from_secs(30))
            .await?;

        let session_id = data["paymentLinkId"]
            .as_str()
            .ok_or_else(|| GatewayError::Provider("missing paymentLinkId".to_string()))?
            .to_string();
        let checkout_url = data["checkoutUrl"]
            .as_str()
            .ok_or_else(|| GatewayError::Provider("missing checkoutUrl".to_string()))?
            .to_string();

        tracing::info!(order_code, session_id = %session_id, "Created PayOS checkout session");
        Ok(CheckoutSession {
            session_id,
            checkout_url,
        })
    }

    fn verify_webhook(&self, raw_body: &[u8]) -> Result<PaymentEvent, GatewayError> {
        let body: WebhookBody = serde_json::from_slice(raw_body)
            .map_err(|e| GatewayError::Signature(format!("unparseable webhook body: {e}")))?;

        if !signature::verify_object(&self.config.checksum_key, &body.data, &body.signature) {
            return Err(GatewayError::Signature("checksum mismatch".to_string()));
        }

        let order_code = body.data["orderCode"]
            .as_i64()
            .ok_or_else(|| GatewayError::Signature("missing orderCode".to_string()))?;
        let amount = body.data["amount"].as_i64().unwrap_or(0);
        let paid = body.data["code"].as_str() == Some(CODE_OK);
        let reference = body.data["reference"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(PaymentEvent {
            order_code,
            amount: Decimal::from(amount),
            outcome: if paid {
                PaymentOutcome::Paid
            } else {
                PaymentOutcome::Cancelled
            },
            reference,
        })
    }

    async fn initiate_payout(
        &self,
        account: &BankAccount,
        amount: Decimal,
        description: &str,
    ) -> Result<String, GatewayError> {
        let amount = Self::amount_units(amount)?;
        let fields = json!({
            "amount": amount,
            "description": description,
            "toAccountNumber": account.account_number,
            "toAccountName": account.holder_name,
            "toBankName": account.bank_name,
        });
        let mut body = fields.clone();
        body["signature"] = Value::String(signature::sign_object(&self.config.checksum_key, &fields));

        let data = self
            .post("/v1/payouts", body, self.config.payout_timeout)
            .await?;

        data["referenceId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Provider("missing payout referenceId".to_string()))
    }
}
