//! HMAC-SHA256 request and webhook signing shared by the PayOS adapter and
//! the mock gateway. The scheme signs the payload's fields as a
//! `key=value&key=value` string with keys in lexicographic order.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Renders a JSON value the way the gateway does when signing: bare strings
/// and numbers, empty string for null.
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical `k=v&k=v` form of a JSON object, keys sorted.
pub fn canonicalize(data: &Value) -> String {
    let fields: BTreeMap<&str, String> = data
        .as_object()
        .map(|map| map.iter().map(|(k, v)| (k.as_str(), render(v))).collect())
        .unwrap_or_default();
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn sign(key: &str, canonical: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn sign_object(key: &str, data: &Value) -> String {
    sign(key, &canonicalize(data))
}

/// Constant-shape comparison via the MAC verifier rather than string
/// equality.
pub fn verify_object(key: &str, data: &Value, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonicalize(data).as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_form_sorts_keys() {
        let data = json!({"orderCode": 42, "amount": 1000, "desc": "ok"});
        assert_eq!(canonicalize(&data), "amount=1000&desc=ok&orderCode=42");
    }

    #[test]
    fn null_renders_empty() {
        let data = json!({"a": null, "b": "x"});
        assert_eq!(canonicalize(&data), "a=&b=x");
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let data = json!({"orderCode": 42, "amount": 1000});
        let sig = sign_object("secret", &data);
        assert!(verify_object("secret", &data, &sig));
        assert!(!verify_object("other", &data, &sig));
        assert!(!verify_object("secret", &json!({"orderCode": 43}), &sig));
    }

    #[test]
    fn garbage_signature_is_rejected() {
        assert!(!verify_object("secret", &json!({}), "not-hex"));
    }
}
