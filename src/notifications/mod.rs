//! Web push delivery.
//!
//! Everything between "this account should be told something" and the bytes
//! a browser push service accepts.
//!
//! # Pipeline
//!
//! ```text
//! NotifyRequest ──► Dispatcher loads matching PushSubscriptions
//!                      │ per subscription, concurrently
//!                      ▼
//!   vapid::sign         token for the relay origin (once per origin)
//!   agreement::derive   ephemeral ECDH + HKDF → content key, nonce
//!   cipher::encrypt     0x02 delimiter, AES-128-GCM
//!   framing::frame      86-byte aes128gcm header + ciphertext
//!                      │
//!                      ▼
//!   POST endpoint  ──► 2xx sent │ 404/410 delete │ other failed
//! ```
//!
//! # VAPID Keys
//!
//! One long-lived P-256 keypair (RFC 8292). Browsers subscribe with the
//! public half; relays check every token against it.
//!
//! # Push Subscriptions
//!
//! What the browser's `PushSubscription.toJSON()` returns plus the owning
//! account, kept in a [`push::SubscriberStore`].

// Rust guideline compliant 2026-02

pub mod agreement;
pub mod cipher;
pub mod codec;
pub mod dispatch;
pub mod envelope;
pub mod framing;
pub mod payload;
pub mod push;
pub mod vapid;
