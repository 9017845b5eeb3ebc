//! VAPID server identity and bearer token signing (RFC 8292).
//!
//! The service holds one long-lived P-256 keypair. For every relay origin it
//! signs a short-lived ES256 token whose `aud` claim is that origin, and it
//! presents the public half alongside the token so the relay can verify it
//! without any prior registration:
//!
//! ```text
//! Authorization: vapid t=<header>.<claims>.<signature>, k=<public key>
//! ```

// Rust guideline compliant 2026-02

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use p256::ecdsa::{signature::Signer, Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

use super::codec;
use crate::constants::{PUBLIC_KEY_LEN, VAPID_TOKEN_LIFETIME_SECS};

/// VAPID keypair for web push authentication.
///
/// The private key is the raw 32-byte P-256 scalar (base64url). The public
/// key is the uncompressed SEC1 point (65 bytes, base64url). Both halves are
/// kept so the `k=` parameter never has to be re-derived per request, and
/// every constructor checks that they belong together.
#[derive(Clone, Serialize, Deserialize)]
pub struct VapidKeys {
    /// Raw 32-byte P-256 private key scalar (base64url).
    private_key_b64: String,
    /// Uncompressed public key bytes (base64url, 65 bytes decoded).
    public_key_b64: String,
}

impl fmt::Debug for VapidKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidKeys")
            .field("public_key_b64", &self.public_key_b64)
            .field("private_key_b64", &"<redacted>")
            .finish()
    }
}

impl VapidKeys {
    /// Generate a fresh VAPID keypair.
    pub fn generate() -> Self {
        Self::from_signing_key(&SigningKey::random(&mut OsRng))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Self {
        // SEC1 uncompressed public key (65 bytes: 0x04 || x || y)
        let public_bytes = signing_key.verifying_key().to_encoded_point(false);
        Self {
            private_key_b64: codec::encode(signing_key.to_bytes().as_slice()),
            public_key_b64: codec::encode(public_bytes.as_bytes()),
        }
    }

    /// Build from a private key alone, deriving the public half.
    ///
    /// Accepts a raw 32-byte scalar, SEC1 DER or PKCS#8 DER (all base64url);
    /// the stored form is always the raw scalar.
    pub fn from_private_key(private_key_b64: &str) -> Result<Self> {
        let material = codec::decode(private_key_b64).context("Invalid VAPID private key")?;
        let signing_key = signing_key_from_material(&material)?;
        Ok(Self::from_signing_key(&signing_key))
    }

    /// Reconstruct from base64url-encoded strings.
    ///
    /// Fails if either half is malformed or if the public key is not the
    /// public component of the private key.
    pub fn from_base64url(public_key_b64: &str, private_key_b64: &str) -> Result<Self> {
        let pub_bytes: [u8; PUBLIC_KEY_LEN] =
            codec::decode_array(public_key_b64, "VAPID public key")?;
        anyhow::ensure!(
            pub_bytes[0] == 0x04,
            "VAPID public key must be an uncompressed P-256 point"
        );

        let keys = Self::from_private_key(private_key_b64)?;
        anyhow::ensure!(
            keys.public_key_bytes()? == pub_bytes,
            "VAPID public key does not match the private key"
        );
        Ok(keys)
    }

    /// Base64url-encoded uncompressed public key (65 bytes decoded).
    ///
    /// Browsers use this as the `applicationServerKey` when subscribing.
    pub fn public_key_base64url(&self) -> &str {
        &self.public_key_b64
    }

    /// Base64url-encoded raw 32-byte private key scalar.
    pub fn private_key_base64url(&self) -> &str {
        &self.private_key_b64
    }

    /// Uncompressed public key bytes (65 bytes).
    pub fn public_key_bytes(&self) -> Result<[u8; PUBLIC_KEY_LEN]> {
        codec::decode_array(&self.public_key_b64, "VAPID public key")
    }

    /// Import the private scalar as an ECDSA signing key.
    pub fn signing_key(&self) -> Result<SigningKey> {
        let raw = codec::decode(&self.private_key_b64).context("Invalid VAPID private key")?;
        SigningKey::from_slice(&raw).context("VAPID private key is not a valid P-256 scalar")
    }

    /// Load a keypair previously written by [`VapidKeys::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read VAPID keys from {}", path.display()))?;
        let stored: Self =
            serde_json::from_str(&content).context("Failed to parse VAPID keys file")?;
        // Re-validate: the file may have been edited by hand.
        Self::from_base64url(&stored.public_key_b64, &stored.private_key_b64)
    }

    /// Write the keypair as JSON, owner read/write only.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write VAPID keys to {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .context("Failed to set VAPID keys file permissions")?;
        }
        Ok(())
    }
}

fn signing_key_from_material(material: &[u8]) -> Result<SigningKey> {
    if material.len() == 32 {
        return SigningKey::from_slice(material)
            .context("VAPID private key is not a valid P-256 scalar");
    }

    // Keys exported by other tooling arrive as SEC1 DER (~121 bytes) or PKCS#8 DER (~138 bytes)
    if let Ok(secret) = p256::SecretKey::from_sec1_der(material) {
        return Ok(SigningKey::from(secret));
    }
    use p256::pkcs8::DecodePrivateKey;
    let signing_key = SigningKey::from_pkcs8_der(material)
        .context("VAPID private key is not a 32-byte scalar, SEC1 DER, or PKCS#8 DER")?;
    log::info!(
        "[WebPush] Normalized VAPID private key from DER ({} bytes) to raw scalar",
        material.len()
    );
    Ok(signing_key)
}

#[derive(Serialize)]
struct TokenHeader {
    typ: &'static str,
    alg: &'static str,
}

/// Claims carried by a VAPID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VapidClaims {
    /// Origin of the push relay the token is valid for.
    pub aud: String,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// Contact identifier for the sender (`mailto:` or `https:` URI).
    pub sub: String,
}

/// Sign a VAPID token for `audience`, expiring [`VAPID_TOKEN_LIFETIME_SECS`] from now.
pub fn sign(audience: &str, subject: &str, keys: &VapidKeys) -> Result<String> {
    sign_at(audience, subject, keys, Utc::now())
}

/// Sign a VAPID token as if the current time were `now`.
///
/// Output is `base64url(header).base64url(claims).base64url(r || s)`.
pub fn sign_at(
    audience: &str,
    subject: &str,
    keys: &VapidKeys,
    now: DateTime<Utc>,
) -> Result<String> {
    let header = TokenHeader {
        typ: "JWT",
        alg: "ES256",
    };
    let claims = VapidClaims {
        aud: audience.to_string(),
        exp: now.timestamp() + VAPID_TOKEN_LIFETIME_SECS,
        sub: subject.to_string(),
    };

    let header_b64 =
        codec::encode(&serde_json::to_vec(&header).context("JWT header serialization failed")?);
    let claims_b64 =
        codec::encode(&serde_json::to_vec(&claims).context("JWT claims serialization failed")?);
    let signing_input = format!("{header_b64}.{claims_b64}");

    let signing_key = keys.signing_key()?;
    let signature: Signature = signing_key
        .try_sign(signing_input.as_bytes())
        .context("ES256 signing failed")?;

    Ok(format!(
        "{signing_input}.{}",
        codec::encode(signature.to_bytes().as_slice())
    ))
}

/// Render the `Authorization` header value for a signed token.
pub fn authorization_header(token: &str, keys: &VapidKeys) -> String {
    format!("vapid t={}, k={}", token, keys.public_key_base64url())
}

/// Derive the token audience (the relay origin) from a subscription endpoint.
///
/// `https://fcm.googleapis.com/fcm/send/abc` → `https://fcm.googleapis.com`.
/// Default ports are dropped, explicit ones kept.
pub fn audience_for_endpoint(endpoint: &str) -> Result<String> {
    let url = reqwest::Url::parse(endpoint).context("Invalid push endpoint URL")?;
    anyhow::ensure!(
        matches!(url.scheme(), "https" | "http"),
        "Push endpoint must be http(s), got {}",
        url.scheme()
    );
    anyhow::ensure!(url.host_str().is_some(), "Push endpoint has no host");
    Ok(url.origin().ascii_serialization())
}

/// Verify a token against an uncompressed public key and return its claims.
///
/// Relays do this on receipt; the service uses it to check its own
/// configuration and in tests.
pub fn verify(token: &str, public_key: &[u8]) -> Result<VapidClaims> {
    use p256::ecdsa::signature::Verifier;

    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        anyhow::bail!("VAPID token must have exactly three segments");
    };

    let verifying_key =
        VerifyingKey::from_sec1_bytes(public_key).context("Invalid P-256 public key")?;
    let signature = Signature::from_slice(&codec::decode(sig_b64)?)
        .context("Malformed ES256 signature")?;
    verifying_key
        .verify(format!("{header_b64}.{claims_b64}").as_bytes(), &signature)
        .context("VAPID signature does not verify")?;

    serde_json::from_slice(&codec::decode(claims_b64)?).context("Malformed VAPID claims")
}
