//! Symmetric encryption, hashing and token generation for at-rest artifacts.
//!
//! All call transcripts are encrypted before they reach a store. The cipher
//! key is derived from caller-supplied key material with SHA-256, so any
//! non-empty secret works as a key. A failed operation is always surfaced as
//! an error; there is no plaintext fallback.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a generated security token in bytes.
pub const TOKEN_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key material must not be empty")]
    EmptyKey,
    #[error("plaintext must not be empty")]
    EmptyPlaintext,
    #[error("ciphertext is not valid base64")]
    Decode,
    #[error("ciphertext is truncated")]
    Truncated,
    #[error("cryptographic operation failed")]
    Cipher,
    #[error("decrypted payload is not valid utf-8")]
    Utf8,
}

fn derive_cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.is_empty() {
        return Err(CryptoError::EmptyKey);
    }
    let digest = Sha256::digest(key);
    Aes256Gcm::new_from_slice(&digest).map_err(|_| CryptoError::Cipher)
}

/// Encrypts `plaintext` under `key`. The random nonce is prepended to the
/// ciphertext and the whole blob is base64-encoded for storage.
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<String, CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::EmptyPlaintext);
    }
    let cipher = derive_cipher(key)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::Cipher)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Reverses [`encrypt`]. Fails on a wrong key, a tampered blob, or malformed
/// input.
pub fn decrypt(ciphertext: &str, key: &[u8]) -> Result<String, CryptoError> {
    let cipher = derive_cipher(key)?;
    let blob = BASE64
        .decode(ciphertext.as_bytes())
        .map_err(|_| CryptoError::Decode)?;
    if blob.len() <= NONCE_LEN {
        return Err(CryptoError::Truncated);
    }
    let (nonce_bytes, payload) = blob.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, payload)
        .map_err(|_| CryptoError::Cipher)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Utf8)
}

/// Hex-encoded SHA-256 digest. Used for non-reversible logging identifiers
/// only, never for security decisions.
pub fn hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Generates [`TOKEN_LEN`] cryptographically random bytes.
pub fn generate_token() -> Vec<u8> {
    let mut token = vec![0u8; TOKEN_LEN];
    OsRng.fill_bytes(&mut token);
    token
}

/// Masks every digit of a phone number except the last four. Keeps the
/// original formatting characters so the shape stays recognisable in logs.
pub fn obfuscate_phone_number(phone_number: &str) -> String {
    let chars: Vec<char> = phone_number.chars().collect();
    if chars.len() < 4 {
        return phone_number.to_string();
    }
    let split = chars.len() - 4;
    chars
        .into_iter()
        .enumerate()
        .map(|(index, c)| {
            if index < split && c.is_ascii_digit() {
                '*'
            } else {
                c
            }
        })
        .collect()
}
