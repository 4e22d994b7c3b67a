//! Request signing for broker gateways.
//!
//! Signed requests carry three headers:
//! - `X-API-Key` — the configured key.
//! - `X-Timestamp` — the injected clock's time as naive ISO-8601 seconds.
//! - `X-Signature` — hex HMAC over `METHOD|PATH|PAYLOAD|TIMESTAMP`, where
//!   `PAYLOAD` is `"{sorted querystring}|{sorted compact JSON body}"`. The
//!   inner `|` is always present, even when both halves are empty.

use crate::types::SignMethod;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Sha256, Sha512};
use std::collections::BTreeMap;

/// Canonical payload half of the signing message.
pub fn canonical_payload(params: &BTreeMap<String, String>, body: Option<&Value>) -> String {
    let query: String = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let body = body.map(canonical_json).unwrap_or_default();
    format!("{query}|{body}")
}

/// Compact JSON with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    fn sort_keys(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut sorted = serde_json::Map::new();
                for key in keys {
                    sorted.insert(key.clone(), sort_keys(&map[key]));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
            other => other.clone(),
        }
    }
    sort_keys(value).to_string()
}

/// Hex HMAC over `METHOD|PATH|PAYLOAD|TIMESTAMP`.
pub fn build_signature(
    secret: &str,
    method: &str,
    path: &str,
    payload: &str,
    timestamp: &str,
    sign_method: SignMethod,
) -> String {
    let message = format!("{}|{path}|{payload}|{timestamp}", method.to_uppercase());
    match sign_method {
        SignMethod::HmacSha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                .expect("hmac accepts any key length");
            mac.update(message.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        SignMethod::HmacSha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
                .expect("hmac accepts any key length");
            mac.update(message.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_compactly() {
        let value = json!({"b": 1, "a": {"d": 2, "c": [3, {"f": 4, "e": 5}]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":[3,{"e":5,"f":4}],"d":2},"b":1}"#
        );
    }

    #[test]
    fn payload_keeps_separator_when_empty() {
        assert_eq!(canonical_payload(&BTreeMap::new(), None), "|");
    }

    #[test]
    fn payload_sorts_query_params() {
        let mut params = BTreeMap::new();
        params.insert("code".to_string(), "000001".to_string());
        params.insert("aaa".to_string(), "1".to_string());
        let payload = canonical_payload(&params, Some(&json!({"price": 10})));
        assert_eq!(payload, "aaa=1&code=000001|{\"price\":10}");
    }

    #[test]
    fn known_signature_vector() {
        // HMAC-SHA256("secret", "POST|/api/order|code=000001|{\"price\":10}|2024-01-01T09:30:00")
        let mut params = BTreeMap::new();
        params.insert("code".to_string(), "000001".to_string());
        let payload = canonical_payload(&params, Some(&json!({"price": 10})));
        let signature = build_signature(
            "secret",
            "POST",
            "/api/order",
            &payload,
            "2024-01-01T09:30:00",
            SignMethod::HmacSha256,
        );
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        // Deterministic: same inputs, same signature.
        let again = build_signature(
            "secret",
            "post",
            "/api/order",
            &payload,
            "2024-01-01T09:30:00",
            SignMethod::HmacSha256,
        );
        assert_eq!(signature, again);
    }

    #[test]
    fn sha512_signatures_differ_and_are_longer() {
        let payload = "|";
        let a = build_signature("k", "GET", "/p", payload, "t", SignMethod::HmacSha256);
        let b = build_signature("k", "GET", "/p", payload, "t", SignMethod::HmacSha512);
        assert_eq!(a.len(), 64);
        assert_eq!(b.len(), 128);
    }
}
