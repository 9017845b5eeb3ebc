//! Per-message key agreement and key derivation (RFC 8291 §3).
//!
//! Every message gets a fresh ephemeral P-256 keypair and a fresh salt. The
//! ECDH secret between the ephemeral key and the subscriber's key is run
//! through HKDF-SHA256 three times:
//!
//! ```text
//! IKM   = HKDF(salt = auth_secret, ecdh, "WebPush: info\0" || ua_public || as_public, 32)
//! CEK   = HKDF(salt = salt,        IKM,  "Content-Encoding: aes128gcm\0",           16)
//! NONCE = HKDF(salt = salt,        IKM,  "Content-Encoding: nonce\0",               12)
//! ```
//!
//! The info strings include their trailing NUL. A wrong byte anywhere here
//! produces keys that decrypt nothing, and nothing reports it until the
//! browser drops the message, so each stage is exposed on its own and
//! checked against the RFC 8291 Appendix A vectors.

// Rust guideline compliant 2026-02

use std::fmt;

use anyhow::{anyhow, Context, Result};
use hkdf::Hkdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{ecdh, PublicKey, SecretKey};
use rand::RngCore;
use rand_core::OsRng;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::codec;
use crate::constants::{AUTH_SECRET_LEN, CONTENT_KEY_LEN, NONCE_LEN, PUBLIC_KEY_LEN, SALT_LEN};

const KEY_INFO_PREFIX: &[u8] = b"WebPush: info\0";

/// HKDF info for the content-encryption key.
pub const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";

/// HKDF info for the nonce.
pub const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

/// The subscriber's half of the agreement, decoded from a stored record.
#[derive(Clone)]
pub struct SubscriberKeys {
    public_key: PublicKey,
    public_bytes: [u8; PUBLIC_KEY_LEN],
    auth_secret: [u8; AUTH_SECRET_LEN],
}

impl fmt::Debug for SubscriberKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberKeys")
            .field("public_key", &codec::encode(&self.public_bytes))
            .finish_non_exhaustive()
    }
}

impl SubscriberKeys {
    /// Decode the `p256dh` and `auth` values a browser hands out.
    pub fn from_base64url(p256dh: &str, auth: &str) -> Result<Self> {
        let public = codec::decode(p256dh).context("Failed to decode p256dh key")?;
        let auth = codec::decode(auth).context("Failed to decode auth secret")?;
        Self::from_bytes(&public, &auth)
    }

    /// Validate raw key bytes.
    ///
    /// The public key must be a 65-byte uncompressed point on P-256 and the
    /// auth secret exactly 16 bytes.
    pub fn from_bytes(public_key: &[u8], auth_secret: &[u8]) -> Result<Self> {
        let public_bytes: [u8; PUBLIC_KEY_LEN] = public_key.try_into().map_err(|_e| {
            anyhow!(
                "p256dh key must be a {PUBLIC_KEY_LEN}-byte uncompressed P-256 point, got {} bytes",
                public_key.len()
            )
        })?;
        anyhow::ensure!(
            public_bytes[0] == 0x04,
            "p256dh key must be an uncompressed point (leading 0x04), got {:#04x}",
            public_bytes[0]
        );
        let public_key = PublicKey::from_sec1_bytes(&public_bytes)
            .context("p256dh key is not a point on P-256")?;

        let auth_secret: [u8; AUTH_SECRET_LEN] = auth_secret.try_into().map_err(|_e| {
            anyhow!(
                "auth secret must be {AUTH_SECRET_LEN} bytes, got {}",
                auth_secret.len()
            )
        })?;

        Ok(Self {
            public_key,
            public_bytes,
            auth_secret,
        })
    }

    /// Uncompressed public key bytes.
    pub fn public_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_bytes
    }

    /// Authentication secret.
    pub fn auth_secret(&self) -> &[u8; AUTH_SECRET_LEN] {
        &self.auth_secret
    }
}

/// Keys for exactly one (subscriber, message) pair.
///
/// Never stored and never reused. Secret fields are wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EphemeralSession {
    content_key: [u8; CONTENT_KEY_LEN],
    nonce: [u8; NONCE_LEN],
    ephemeral_public_key: [u8; PUBLIC_KEY_LEN],
    salt: [u8; SALT_LEN],
}

impl fmt::Debug for EphemeralSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralSession")
            .field("salt", &codec::encode(&self.salt))
            .field("ephemeral_public_key", &codec::encode(&self.ephemeral_public_key))
            .finish_non_exhaustive()
    }
}

impl EphemeralSession {
    /// AES-128-GCM content-encryption key.
    pub fn content_key(&self) -> &[u8; CONTENT_KEY_LEN] {
        &self.content_key
    }

    /// AES-GCM nonce for the single record.
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Ephemeral public key, sent as the header's key id.
    pub fn ephemeral_public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.ephemeral_public_key
    }

    /// Random salt, sent in the header.
    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }
}

/// Derive fresh message keys for `subscriber`.
pub fn derive(subscriber: &SubscriberKeys) -> Result<EphemeralSession> {
    let ephemeral = SecretKey::random(&mut OsRng);
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    derive_with(subscriber, &ephemeral, salt)
}

/// Derive message keys from an explicit ephemeral key and salt.
///
/// [`derive`] is the only production caller; this exists so the whole chain
/// can be replayed against published vectors.
pub fn derive_with(
    subscriber: &SubscriberKeys,
    ephemeral: &SecretKey,
    salt: [u8; SALT_LEN],
) -> Result<EphemeralSession> {
    let ephemeral_public_key = uncompressed_point(&ephemeral.public_key())?;
    let secret = shared_secret(ephemeral, &subscriber.public_key);
    let ikm = input_keying_material(
        &subscriber.auth_secret,
        &secret,
        &subscriber.public_bytes,
        &ephemeral_public_key,
    )?;

    Ok(EphemeralSession {
        content_key: *content_encryption_key(&salt, &ikm)?,
        nonce: content_nonce(&salt, &ikm)?,
        ephemeral_public_key,
        salt,
    })
}

/// Raw ECDH secret (the x-coordinate of the shared point).
pub fn shared_secret(own: &SecretKey, peer: &PublicKey) -> Zeroizing<[u8; 32]> {
    let shared = ecdh::diffie_hellman(own.to_nonzero_scalar(), peer.as_affine());
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(shared.raw_secret_bytes());
    out
}

/// First HKDF stage: bind the ECDH secret to both public keys and the auth secret.
///
/// `subscriber_public` (ua_public) comes before `sender_public` (as_public)
/// in the info string regardless of which side is computing.
pub fn input_keying_material(
    auth_secret: &[u8; AUTH_SECRET_LEN],
    shared_secret: &[u8; 32],
    subscriber_public: &[u8; PUBLIC_KEY_LEN],
    sender_public: &[u8; PUBLIC_KEY_LEN],
) -> Result<Zeroizing<[u8; 32]>> {
    hkdf_sha256(
        auth_secret,
        shared_secret,
        &[KEY_INFO_PREFIX, subscriber_public, sender_public],
    )
}

/// Second HKDF stage: the 16-byte content-encryption key.
pub fn content_encryption_key(
    salt: &[u8; SALT_LEN],
    ikm: &[u8; 32],
) -> Result<Zeroizing<[u8; CONTENT_KEY_LEN]>> {
    hkdf_sha256(salt, ikm, &[CEK_INFO])
}

/// Third HKDF stage: the 12-byte nonce.
pub fn content_nonce(salt: &[u8; SALT_LEN], ikm: &[u8; 32]) -> Result<[u8; NONCE_LEN]> {
    Ok(*hkdf_sha256::<NONCE_LEN>(salt, ikm, &[NONCE_INFO])?)
}

fn hkdf_sha256<const N: usize>(
    salt: &[u8],
    ikm: &[u8],
    info: &[&[u8]],
) -> Result<Zeroizing<[u8; N]>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = Zeroizing::new([0u8; N]);
    hk.expand_multi_info(info, okm.as_mut_slice())
        .map_err(|e| anyhow!("HKDF expand failed: {e}"))?;
    Ok(okm)
}

pub(crate) fn uncompressed_point(key: &PublicKey) -> Result<[u8; PUBLIC_KEY_LEN]> {
    key.to_encoded_point(false)
        .as_bytes()
        .try_into()
        .context("Encoded P-256 point has unexpected length")
}
