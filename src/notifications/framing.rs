//! `aes128gcm` message framing (RFC 8188 §2.1).
//!
//! ```text
//! +-----------+--------+-----------+-----------------+------------------+
//! | salt (16) | rs (4) | idlen (1) | keyid (idlen)   | ciphertext + tag |
//! +-----------+--------+-----------+-----------------+------------------+
//! ```
//!
//! For web push the key id is always the sender's ephemeral public key, so
//! `idlen` is 65 and the header is 86 bytes. `rs` is big-endian.

use anyhow::Result;

use crate::constants::{HEADER_LEN, PUBLIC_KEY_LEN, RECORD_SIZE, SALT_LEN, TAG_LEN};

/// Decoded header of a framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Per-message salt.
    pub salt: [u8; SALT_LEN],
    /// Record size.
    pub record_size: u32,
    /// Sender's ephemeral public key.
    pub key_id: [u8; PUBLIC_KEY_LEN],
}

/// Assemble the request body: header followed by the ciphertext.
pub fn frame(
    salt: &[u8; SALT_LEN],
    ephemeral_public_key: &[u8; PUBLIC_KEY_LEN],
    ciphertext: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    body.extend_from_slice(salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(ephemeral_public_key);
    body.extend_from_slice(ciphertext);
    body
}

/// Split a framed body into its header and the ciphertext that follows.
pub fn parse(body: &[u8]) -> Result<(FrameHeader, &[u8])> {
    anyhow::ensure!(
        body.len() >= HEADER_LEN,
        "Body is {} bytes, shorter than the {HEADER_LEN}-byte header",
        body.len()
    );

    let (salt, rest) = body.split_at(SALT_LEN);
    let (rs, rest) = rest.split_at(4);
    let (idlen, rest) = rest.split_at(1);
    anyhow::ensure!(
        usize::from(idlen[0]) == PUBLIC_KEY_LEN,
        "Key id must be a {PUBLIC_KEY_LEN}-byte P-256 point, header says {}",
        idlen[0]
    );
    let (key_id, ciphertext) = rest.split_at(PUBLIC_KEY_LEN);

    let mut header = FrameHeader {
        salt: [0u8; SALT_LEN],
        record_size: u32::from_be_bytes([rs[0], rs[1], rs[2], rs[3]]),
        key_id: [0u8; PUBLIC_KEY_LEN],
    };
    header.salt.copy_from_slice(salt);
    header.key_id.copy_from_slice(key_id);

    // Smallest legal record: one delimiter byte plus the tag.
    anyhow::ensure!(
        header.record_size as usize > TAG_LEN,
        "Record size {} is below the minimum of {}",
        header.record_size,
        TAG_LEN + 1
    );
    anyhow::ensure!(
        ciphertext.len() > TAG_LEN,
        "Ciphertext is {} bytes, too short to hold a tag",
        ciphertext.len()
    );
    anyhow::ensure!(
        ciphertext.len() <= header.record_size as usize,
        "Ciphertext of {} bytes spans more than one {}-byte record",
        ciphertext.len(),
        header.record_size
    );

    Ok((header, ciphertext))
}
