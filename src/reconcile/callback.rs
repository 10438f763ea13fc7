//! Inbound callback payload parsing
//!
//! Webhooks arrive form-encoded or as JSON, redirects as query strings.
//! Everything is lifted into one JSON object first, then split into the
//! signed field set and the `hash`.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::error::PaymentError;

/// Parse a callback body according to its content type
pub fn parse_body(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<serde_json::Value, PaymentError> {
    let looks_like_json = content_type.is_some_and(|ct| ct.contains("json"))
        || body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{');

    if looks_like_json {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| PaymentError::InvalidRequest(format!("malformed JSON callback: {}", e)))?;
        if !value.is_object() {
            return Err(PaymentError::InvalidRequest(
                "callback body must be an object".to_string(),
            ));
        }
        return Ok(value);
    }

    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
        .map_err(|e| PaymentError::InvalidRequest(format!("malformed form callback: {}", e)))?;
    Ok(pairs_to_value(pairs))
}

/// Query parameters as a JSON object
pub fn query_to_value(query: HashMap<String, String>) -> serde_json::Value {
    pairs_to_value(query)
}

fn pairs_to_value<I: IntoIterator<Item = (String, String)>>(pairs: I) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = pairs
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();
    serde_json::Value::Object(map)
}

/// Split a payload into its signed fields and the supplied `hash`
///
/// A missing hash yields an empty string, which never verifies.
pub fn split_signed<F: DeserializeOwned>(
    payload: &serde_json::Value,
) -> Result<(F, String), PaymentError> {
    let hash = payload
        .get("hash")
        .and_then(|h| h.as_str())
        .unwrap_or_default()
        .to_string();
    let fields = F::deserialize(payload)
        .map_err(|e| PaymentError::InvalidRequest(format!("unexpected callback fields: {}", e)))?;
    Ok((fields, hash))
}
