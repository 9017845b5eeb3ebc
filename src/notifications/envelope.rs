//! End-to-end message sealing: agreement → encryption → framing.
//!
//! [`seal`] is what the dispatcher runs once per subscriber. [`open`] is the
//! receiving side (what a browser does with its private key), used to check
//! that sealed bodies decrypt.

use anyhow::{Context, Result};
use p256::{PublicKey, SecretKey};

use super::agreement::{self, SubscriberKeys};
use super::{cipher, framing};
use crate::constants::AUTH_SECRET_LEN;

/// Encrypt `plaintext` for one subscriber and return the request body.
///
/// Fresh ephemeral key and salt on every call.
pub fn seal(subscriber: &SubscriberKeys, plaintext: &[u8], padding: usize) -> Result<Vec<u8>> {
    cipher::ensure_padded_fits(plaintext.len(), padding)?;

    let session = agreement::derive(subscriber)?;
    let ciphertext =
        cipher::encrypt_padded(plaintext, session.content_key(), session.nonce(), padding)?;
    Ok(framing::frame(
        session.salt(),
        session.ephemeral_public_key(),
        &ciphertext,
    ))
}

/// Decrypt a framed body with the subscriber's private key and auth secret.
pub fn open(
    body: &[u8],
    subscriber_secret: &SecretKey,
    auth_secret: &[u8; AUTH_SECRET_LEN],
) -> Result<Vec<u8>> {
    let (header, ciphertext) = framing::parse(body)?;

    let sender_public =
        PublicKey::from_sec1_bytes(&header.key_id).context("Key id is not a P-256 point")?;
    let subscriber_public = agreement::uncompressed_point(&subscriber_secret.public_key())?;

    let secret = agreement::shared_secret(subscriber_secret, &sender_public);
    let ikm = agreement::input_keying_material(
        auth_secret,
        &secret,
        &subscriber_public,
        &header.key_id,
    )?;
    let key = agreement::content_encryption_key(&header.salt, &ikm)?;
    let nonce = agreement::content_nonce(&header.salt, &ikm)?;

    cipher::decrypt(ciphertext, &key, &nonce)
}
