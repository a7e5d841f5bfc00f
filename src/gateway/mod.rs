use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::BankAccount;

pub mod mock;
pub mod payos;
pub mod signature;

pub use mock::{MockFailure, MockGateway};
pub use payos::{PayosConfig, PayosGateway};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("webhook signature invalid: {0}")]
    Signature(String),

    #[error("gateway call timed out")]
    Timeout,

    #[error("gateway rejected the request: {0}")]
    Provider(String),

    #[error("gateway unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Cancelled,
}

/// A verified, parsed payment notification.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub order_code: i64,
    pub amount: Decimal,
    pub outcome: PaymentOutcome,
    pub reference: String,
}

/// External payment provider contract: checkout links in, verified webhook
/// events out, plus the refund payout call.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        order_code: i64,
        amount: Decimal,
        description: &str,
    ) -> Result<CheckoutSession, GatewayError>;

    /// Authenticates the raw webhook body and parses it. Must not be
    /// bypassed: a payload failing verification is a potential forgery.
    fn verify_webhook(&self, raw_body: &[u8]) -> Result<PaymentEvent, GatewayError>;

    /// Moves refund money to the customer's declared account. May time out;
    /// callers must treat a timeout as "not completed".
    async fn initiate_payout(
        &self,
        account: &BankAccount,
        amount: Decimal,
        description: &str,
    ) -> Result<String, GatewayError>;
}
