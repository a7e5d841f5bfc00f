use std::env;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::gateway::PayosConfig;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::apply_security_headers;

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub struct Config {
    /// Memory store is used when unset (local development).
    pub database_url: Option<String>,
    pub bind_addr: String,
    /// Default seat-map hold length.
    pub hold_duration: Duration,
    /// How long a Pending invoice may wait for its payment.
    pub payment_timeout: Duration,
    /// Minimum notice before showtime start for refund requests.
    pub refund_window: Duration,
    pub sweep_interval: StdDuration,
    /// Mock gateway is used when PayOS credentials are unset.
    pub payos: Option<PayosConfig>,
}

impl Config {
    pub fn from_env() -> Self {
        let payos = match (
            env::var("PAYOS_CLIENT_ID"),
            env::var("PAYOS_API_KEY"),
            env::var("PAYOS_CHECKSUM_KEY"),
        ) {
            (Ok(client_id), Ok(api_key), Ok(checksum_key)) => {
                let mut config = PayosConfig::new(client_id, api_key, checksum_key);
                config.return_url = env::var("PAYOS_RETURN_URL").unwrap_or_default();
                config.cancel_url = env::var("PAYOS_CANCEL_URL").unwrap_or_default();
                config.payout_timeout =
                    StdDuration::from_secs(env_u64("PAYOUT_TIMEOUT_SECS", 15));
                Some(config)
            }
            _ => None,
        };

        Self {
            database_url: env::var("DATABASE_URL").ok(),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string()),
            hold_duration: Duration::seconds(env_u64("HOLD_DURATION_SECS", 300) as i64),
            payment_timeout: Duration::seconds(env_u64("PAYMENT_TIMEOUT_SECS", 900) as i64),
            refund_window: Duration::hours(env_u64("REFUND_WINDOW_HOURS", 24) as i64),
            sweep_interval: StdDuration::from_secs(env_u64("SWEEP_INTERVAL_SECS", 60)),
            payos,
        }
    }
}
