//! Prefixed opaque id generation
//!
//! Security events carry ids of the form `{prefix}_{random}`, with at least
//! 96 bits of entropy, base64 URL-safe encoded without padding.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};

/// Generate a prefixed id with 96 bits of entropy.
///
/// # Example
/// ```
/// use revio_core::id::generate_prefixed_id;
/// let event_id = generate_prefixed_id("evt");
/// assert!(event_id.starts_with("evt_"));
/// ```
pub fn generate_prefixed_id(prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    OsRng.try_fill_bytes(&mut bytes).unwrap();

    let encoded = BASE64_URL_SAFE_NO_PAD.encode(bytes);

    format!("{prefix}_{encoded}")
}

/// Validate that an id carries the expected prefix and enough entropy.
pub fn validate_prefixed_id(id: &str, expected_prefix: &str) -> bool {
    if !id.starts_with(&format!("{expected_prefix}_")) {
        return false;
    }

    let random_part = &id[expected_prefix.len() + 1..];

    match BASE64_URL_SAFE_NO_PAD.decode(random_part) {
        Ok(decoded) => decoded.len() >= 12,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_prefixed_id() {
        let id = generate_prefixed_id("evt");
        assert!(id.starts_with("evt_"));
        assert!(validate_prefixed_id(&id, "evt"));
        assert!(!validate_prefixed_id(&id, "usr"));

        // Ensure uniqueness
        let id2 = generate_prefixed_id("evt");
        assert_ne!(id, id2);
    }

    #[test]
    fn test_validate_rejects_short_ids() {
        assert!(!validate_prefixed_id("evt", "evt"));
        assert!(!validate_prefixed_id("evt_", "evt"));
        assert!(!validate_prefixed_id("evt_dGVzdA", "evt"));
    }
}
