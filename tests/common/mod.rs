//! Shared helpers for integration tests.
//!
//! `decrypt_body` is a from-scratch receiver built directly on the crypto
//! crates, so a delivered body is checked by something other than the code
//! that produced it.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use hkdf::Hkdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand_core::OsRng;
use rollcall_push::notifications::codec;
use rollcall_push::PushSubscription;
use sha2::Sha256;

/// A simulated browser: private key, auth secret and its stored record.
pub struct TestSubscriber {
    pub secret: SecretKey,
    pub auth: [u8; 16],
    pub subscription: PushSubscription,
}

pub fn subscriber(endpoint: &str, user_id: &str) -> TestSubscriber {
    let secret = SecretKey::random(&mut OsRng);
    let mut auth = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::rng(), &mut auth);
    let public = secret.public_key().to_encoded_point(false);

    TestSubscriber {
        subscription: PushSubscription {
            endpoint: endpoint.to_string(),
            p256dh: codec::encode(public.as_bytes()),
            auth: codec::encode(&auth),
            user_id: user_id.to_string(),
            created_at: None,
        },
        secret,
        auth,
    }
}

/// Decrypt an `aes128gcm` web push body the way a browser does.
pub fn decrypt_body(body: &[u8], secret: &SecretKey, auth: &[u8; 16]) -> Vec<u8> {
    assert!(body.len() > 86, "body too short: {}", body.len());
    let salt = &body[..16];
    let record_size = u32::from_be_bytes([body[16], body[17], body[18], body[19]]);
    assert_eq!(record_size, 4096);
    assert_eq!(body[20], 65);
    let sender_public = &body[21..86];
    let ciphertext = &body[86..];

    let sender = PublicKey::from_sec1_bytes(sender_public).unwrap();
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), sender.as_affine());
    let receiver_public = secret.public_key().to_encoded_point(false);

    let mut info = b"WebPush: info\0".to_vec();
    info.extend_from_slice(receiver_public.as_bytes());
    info.extend_from_slice(sender_public);
    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth), shared.raw_secret_bytes().as_slice())
        .expand(&info, &mut ikm)
        .unwrap();

    let hk = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut cek = [0u8; 16];
    hk.expand(b"Content-Encoding: aes128gcm\0", &mut cek).unwrap();
    let mut nonce = [0u8; 12];
    hk.expand(b"Content-Encoding: nonce\0", &mut nonce).unwrap();

    let cipher = Aes128Gcm::new_from_slice(&cek).unwrap();
    let mut plain = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .unwrap();

    while plain.last() == Some(&0) {
        plain.pop();
    }
    assert_eq!(plain.pop(), Some(0x02), "missing final-record delimiter");
    plain
}
