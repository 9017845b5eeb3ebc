//! Record padding and AES-128-GCM (RFC 8188 §2).
//!
//! A push message is always a single, final record: the plaintext is followed
//! by the delimiter `0x02` and any number of zero bytes, then sealed with the
//! derived key and nonce. No associated data.

// Rust guideline compliant 2026-02

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use zeroize::Zeroizing;

use crate::constants::{CONTENT_KEY_LEN, MAX_PLAINTEXT_LEN, NONCE_LEN};

/// Delimiter marking the last record of a message.
pub const FINAL_RECORD_DELIMITER: u8 = 0x02;

/// Encrypt `plaintext` as a single unpadded record.
pub fn encrypt(
    plaintext: &[u8],
    key: &[u8; CONTENT_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    encrypt_padded(plaintext, key, nonce, 0)
}

/// Encrypt `plaintext` followed by `padding` zero bytes.
///
/// Padding hides the exact payload length from the relay; it counts
/// against [`MAX_PLAINTEXT_LEN`] like the plaintext itself.
pub fn encrypt_padded(
    plaintext: &[u8],
    key: &[u8; CONTENT_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    padding: usize,
) -> Result<Vec<u8>> {
    let content_len = ensure_padded_fits(plaintext.len(), padding)?;

    let mut record = Zeroizing::new(Vec::with_capacity(content_len + 1));
    record.extend_from_slice(plaintext);
    record.push(FINAL_RECORD_DELIMITER);
    record.resize(content_len + 1, 0);

    let cipher = Aes128Gcm::new(key.into());
    cipher
        .encrypt(Nonce::from_slice(nonce), record.as_slice())
        .map_err(|e| anyhow!("AES-GCM encryption failed: {e}"))
}

/// Decrypt a single record and strip its padding.
///
/// Fails on a bad tag or when the record does not end in the final-record
/// delimiter followed only by zeros.
pub fn decrypt(
    ciphertext: &[u8],
    key: &[u8; CONTENT_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let cipher = Aes128Gcm::new(key.into());
    let mut record = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("AES-GCM decryption failed: {e}"))?;

    let delimiter_at = record
        .iter()
        .rposition(|&b| b != 0)
        .context("Record is all padding, no delimiter")?;
    anyhow::ensure!(
        record[delimiter_at] == FINAL_RECORD_DELIMITER,
        "Expected final-record delimiter 0x02, found {:#04x}",
        record[delimiter_at]
    );
    record.truncate(delimiter_at);
    Ok(record)
}

/// Reject payloads that would not fit in one relay-sized message.
pub fn ensure_fits(len: usize) -> Result<()> {
    anyhow::ensure!(
        len <= MAX_PLAINTEXT_LEN,
        "Push payload is {len} bytes; at most {MAX_PLAINTEXT_LEN} fit in one message"
    );
    Ok(())
}

/// Like [`ensure_fits`] for plaintext plus `padding`; returns the sum.
pub fn ensure_padded_fits(plaintext_len: usize, padding: usize) -> Result<usize> {
    let len = plaintext_len.checked_add(padding).with_context(|| {
        format!("Push payload of {plaintext_len} bytes plus {padding} bytes of padding overflows")
    })?;
    ensure_fits(len)?;
    Ok(len)
}
