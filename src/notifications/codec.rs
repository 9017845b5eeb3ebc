//! Base64url helpers for key material and token segments.
//!
//! Everything on the web push wire (VAPID tokens, `k=` parameter) is
//! unpadded base64url. Stored subscriber keys are decoded leniently: browsers
//! and older clients sometimes hand out padded or standard-alphabet base64.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};

/// Encode bytes as unpadded base64url.
pub fn encode(bytes: &[u8]) -> String {
    BASE64URL.encode(bytes)
}

/// Decode base64url, tolerating `=` padding and the `+`/`/` alphabet.
pub fn decode(input: &str) -> Result<Vec<u8>> {
    let normalized: String = input
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    BASE64URL
        .decode(normalized.as_bytes())
        .context("Invalid base64url encoding")
}

/// Decode base64url into a fixed-size array.
///
/// `what` names the field in the error message, e.g. "p256dh key".
pub fn decode_array<const N: usize>(input: &str, what: &str) -> Result<[u8; N]> {
    let bytes = decode(input).with_context(|| format!("Failed to decode {what}"))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_bytes: Vec<u8>| anyhow::anyhow!("{what} must be {N} bytes, got {len}"))
}
