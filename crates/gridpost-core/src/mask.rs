//! Secret masking for diagnostic exposure.
//!
//! Every payload or configuration copy that leaves the delivery path
//! (notifications, diagnostics) goes through these transforms first.
//! Stored queue entries stay unmasked so retries use the real data.

use serde_json::Value;

/// Payload fields treated as secrets.
const SECRET_FIELDS: &[&str] = &["api_key"];

/// Masks a secret, keeping only the last four characters.
///
/// Values of four characters or fewer are fully starred.
pub fn mask_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    let len = trimmed.chars().count();
    if len <= 4 {
        return "*".repeat(len);
    }
    let visible: String = trimmed.chars().skip(len - 4).collect();
    format!("{}{}", "*".repeat(len - 4), visible)
}

/// Returns a copy of a JSON payload with all secret fields masked.
pub fn mask_payload(payload: &Value) -> Value {
    let mut masked = payload.clone();
    if let Value::Object(map) = &mut masked {
        for field in SECRET_FIELDS {
            if let Some(Value::String(secret)) = map.get(*field) {
                let replacement = mask_secret(secret);
                map.insert((*field).to_string(), Value::String(replacement));
            }
        }
    }
    masked
}
