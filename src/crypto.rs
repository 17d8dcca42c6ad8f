// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Crypto Engine
//!
//! Key lifecycle, authenticated encryption of the sensitive tier, payload
//! integrity token, and content hashing.
//!
//! ## Key Lifecycle
//!
//! A random master key and startup salt are generated once per process from
//! the OS RNG; the 256-bit encryption key is derived from them via
//! HKDF-SHA256 and the master material is discarded. The HMAC integrity
//! secret is generated independently so that a compromise of one key never
//! compromises the other. Nothing here is persisted or logged; a process
//! restart silently rotates everything.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64ct::{Base64, Encoding};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;
use zeroize::Zeroizing;

/// Size of key material in bytes (256 bits).
pub const KEY_SIZE: usize = 32;
/// Size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Size of the per-issuance session salt in bytes.
pub const SESSION_SALT_SIZE: usize = 16;

/// HKDF info string for the payload encryption key.
const BLOB_INFO: &[u8] = b"rep-blob-encryption-v1";
/// HKDF info string for per-issuance session keys.
pub const SESSION_INFO: &[u8] = b"rep-session-key-v1";

type HmacSha256 = Hmac<Sha256>;

/// Errors from the crypto engine. Sealed values never reveal plaintext in
/// error messages.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("ciphertext blob is malformed: {0}")]
    MalformedBlob(&'static str),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Fill a fixed-size buffer from the OS RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// HKDF-SHA256 extract-then-expand. Shared by the startup key derivation and
/// per-session key issuance; distinct `info` strings yield independent keys.
pub fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .expect("HKDF output length within bounds");
    okm
}

/// The process-lifetime key material. Constructed once at startup and passed
/// explicitly to every component that needs it; never a global.
pub struct KeyBundle {
    encryption_key: Zeroizing<[u8; KEY_SIZE]>,
    hmac_secret: Zeroizing<[u8; KEY_SIZE]>,
}

impl KeyBundle {
    /// Generate fresh key material. The intermediate master key and salt are
    /// zeroized when this function returns; only the derived encryption key
    /// and the independent HMAC secret survive.
    pub fn generate() -> Self {
        let master = Zeroizing::new(random_bytes::<KEY_SIZE>());
        let salt = Zeroizing::new(random_bytes::<KEY_SIZE>());

        let okm = derive_key(master.as_ref(), salt.as_ref(), BLOB_INFO, KEY_SIZE);
        let mut encryption_key = Zeroizing::new([0u8; KEY_SIZE]);
        encryption_key.copy_from_slice(&okm);

        Self {
            encryption_key,
            hmac_secret: Zeroizing::new(random_bytes::<KEY_SIZE>()),
        }
    }

    pub fn encryption_key(&self) -> &[u8; KEY_SIZE] {
        &self.encryption_key
    }

    pub fn hmac_secret(&self) -> &[u8; KEY_SIZE] {
        &self.hmac_secret
    }
}

impl std::fmt::Debug for KeyBundle {
    // Key material must never leak through Debug formatting.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyBundle { .. }")
    }
}

/// Canonical JSON of the public map: sorted keys, no incidental whitespace.
fn canonical_public(public: &BTreeMap<String, String>) -> String {
    serde_json::to_string(public).unwrap_or_default()
}

/// Compute the payload integrity token over the canonical public map and the
/// (possibly empty) sensitive blob. Deterministic for identical input.
pub fn compute_integrity(
    public: &BTreeMap<String, String>,
    sensitive_blob: &str,
    hmac_secret: &[u8; KEY_SIZE],
) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(hmac_secret)
        .expect("HMAC accepts any key length");
    mac.update(canonical_public(public).as_bytes());
    mac.update(b"|");
    mac.update(sensitive_blob.as_bytes());
    let tag = mac.finalize().into_bytes();
    format!("hmac-sha256:{}", Base64::encode_string(&tag))
}

/// Encrypt the sensitive map. An empty map is a no-op yielding an empty
/// string. Output layout: `base64(nonce || ciphertext || tag)`. The AAD is
/// the payload integrity token, so a blob cannot be swapped between payloads
/// with different public sections without decryption failing.
pub fn encrypt_sensitive(
    map: &BTreeMap<String, String>,
    key: &[u8; KEY_SIZE],
    aad: &str,
) -> Result<String, CryptoError> {
    if map.is_empty() {
        return Ok(String::new());
    }

    let plaintext = serde_json::to_vec(map)?;
    let nonce_bytes = random_bytes::<NONCE_SIZE>();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: &plaintext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::Encrypt)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(Base64::encode_string(&blob))
}

/// Decrypt a sensitive blob produced by [`encrypt_sensitive`]. Fails on a
/// wrong key, wrong AAD, or tampered ciphertext.
pub fn decrypt_sensitive(
    blob: &str,
    key: &[u8; KEY_SIZE],
    aad: &str,
) -> Result<BTreeMap<String, String>, CryptoError> {
    let bytes = Base64::decode_vec(blob).map_err(|_| CryptoError::MalformedBlob("not base64"))?;
    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedBlob("shorter than nonce + tag"));
    }

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::Decrypt)?;

    Ok(serde_json::from_slice(&plaintext)?)
}

/// Subresource-integrity hash over the exact bytes that will appear in the
/// markup. Recomputing over a re-serialization would diverge client-side.
pub fn compute_sri(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    format!("sha256-{}", Base64::encode_string(&hash))
}
