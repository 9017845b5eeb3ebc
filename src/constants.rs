//! Application-wide constants for rollcall-push.
//!
//! Wire-format sizes come from RFC 8188 (`aes128gcm` content coding) and
//! RFC 8291 (message encryption for web push). Operational defaults can be
//! overridden through [`crate::config::Config`].
//!
//! # Categories
//!
//! - **Wire format**: key, salt and header sizes fixed by the standards
//! - **Tokens**: VAPID token lifetime
//! - **Delivery**: TTL, timeouts, fan-out bound

use std::time::Duration;

// ============================================================================
// Wire format
// ============================================================================

/// Content coding announced in the `Content-Encoding` header.
pub const CONTENT_ENCODING: &str = "aes128gcm";

/// Length of an uncompressed P-256 point (`0x04 || x || y`).
pub const PUBLIC_KEY_LEN: usize = 65;

/// Length of the subscriber's authentication secret.
pub const AUTH_SECRET_LEN: usize = 16;

/// Length of the per-message random salt.
pub const SALT_LEN: usize = 16;

/// AES-128-GCM key length.
pub const CONTENT_KEY_LEN: usize = 16;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Record size written into the header.
///
/// Every message is a single record, so this only has to be at least as
/// large as the ciphertext.
pub const RECORD_SIZE: u32 = 4096;

/// Fixed header length: salt (16) + rs (4) + idlen (1) + keyid (65).
pub const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;

/// Largest plaintext that fits a 4096-byte push message body.
///
/// Relays are only required to accept 4096 bytes of body, which has to
/// hold the header, the padding delimiter and the GCM tag as well.
pub const MAX_PLAINTEXT_LEN: usize = RECORD_SIZE as usize - HEADER_LEN - 1 - TAG_LEN;

// ============================================================================
// Tokens
// ============================================================================

/// VAPID token lifetime in seconds.
///
/// RFC 8292 caps `exp` at 24 hours ahead; half of that leaves room for
/// clock skew between us and the relay.
pub const VAPID_TOKEN_LIFETIME_SECS: i64 = 12 * 60 * 60;

// ============================================================================
// Delivery
// ============================================================================

/// Default `TTL` header: how long the relay may hold an undelivered message.
pub const DEFAULT_TTL_SECS: u32 = 86_400;

/// Per-request timeout for the POST to a relay.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on concurrent relay requests within one invocation.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Default address for the invocation endpoint.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";

/// Fallback contact for the `sub` claim.
pub const DEFAULT_VAPID_SUBJECT: &str = "mailto:admin@localhost";

/// User agent sent to relays.
pub fn user_agent() -> String {
    format!("rollcall-push/{}", env!("CARGO_PKG_VERSION"))
}
