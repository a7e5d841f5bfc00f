use axum::http::{header, HeaderName, HeaderValue};
use axum::Router;
use std::env;
use tower_http::set_header::SetResponseHeaderLayer;

const NOSNIFF: &str = "nosniff";
const DENY: &str = "DENY";
const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";
const CSP_API_VALUE: &str = "default-src 'none'; frame-ancestors 'none'";
const REFERRER_POLICY_VALUE: &str = "strict-origin-when-cross-origin";

fn header_layer(
    name: HeaderName,
    value: &'static str,
) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(name, HeaderValue::from_static(value))
}

/// Standard API security headers. HSTS only in production, where TLS is
/// guaranteed.
pub fn apply_security_headers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let is_production = env::var("RUST_ENV")
        .map(|v| v.to_lowercase() == "production")
        .unwrap_or(false);

    let router = router
        .layer(header_layer(
            HeaderName::from_static("x-content-type-options"),
            NOSNIFF,
        ))
        .layer(header_layer(HeaderName::from_static("x-frame-options"), DENY))
        .layer(header_layer(
            header::CONTENT_SECURITY_POLICY,
            CSP_API_VALUE,
        ))
        .layer(header_layer(header::REFERRER_POLICY, REFERRER_POLICY_VALUE));

    if is_production {
        tracing::info!("Security: HSTS header enabled (production mode)");
        router.layer(header_layer(header::STRICT_TRANSPORT_SECURITY, HSTS_VALUE))
    } else {
        router
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_values_are_valid() {
        for value in [NOSNIFF, DENY, HSTS_VALUE, CSP_API_VALUE, REFERRER_POLICY_VALUE] {
            assert!(HeaderValue::from_static(value).to_str().is_ok());
        }
    }
}
