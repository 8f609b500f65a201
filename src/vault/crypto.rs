//! Password-based envelope encryption for wallet secrets
//!
//! Format: SALT (32) || NONCE (12) || TAG (16) || CIPHERTEXT, base64 encoded.
//! Key: PBKDF2-HMAC-SHA256(password, salt, 100_000 rounds), AES-256-GCM.
//!
//! The legacy envelope is NONCE (12) || TAG (16) || CIPHERTEXT with the key
//! taken directly from SHA-256(password). It is still readable so older
//! stores can be migrated, but never written.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};

pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const KDF_ROUNDS: u32 = 100_000;

/// Smallest well-formed current envelope (one byte of ciphertext)
const CURRENT_MIN_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN + 1;

/// Smallest well-formed legacy envelope
const LEGACY_MIN_LEN: usize = NONCE_LEN + TAG_LEN + 1;

/// Which envelope scheme a blob decrypted under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Current,
    Legacy,
}

fn derive_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, KDF_ROUNDS, &mut key[..]);
    key
}

fn legacy_key(password: &str) -> Zeroizing<[u8; KEY_LEN]> {
    let digest = Sha256::digest(password.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&digest);
    key
}

/// Encrypt `plaintext` under `password` into a base64 envelope
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|_| Error::Crypto("invalid key length".to_string()))?;

    // aes-gcm appends the tag to the ciphertext
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| Error::Crypto("encryption failed".to_string()))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut envelope = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(tag);
    envelope.extend_from_slice(ciphertext);

    Ok(STANDARD.encode(envelope))
}

fn open(key: &[u8], nonce: &[u8], tag: &[u8], ciphertext: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new_from_slice(key).ok()?;
    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let opened = cipher.decrypt(Nonce::from_slice(nonce), sealed.as_slice()).ok();
    sealed.zeroize();
    opened.map(Zeroizing::new)
}

fn open_current(data: &[u8], password: &str) -> Option<Zeroizing<Vec<u8>>> {
    if data.len() < CURRENT_MIN_LEN {
        return None;
    }
    let (salt, rest) = data.split_at(SALT_LEN);
    let (nonce, rest) = rest.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let key = derive_key(password, salt);
    open(&key[..], nonce, tag, ciphertext)
}

fn open_legacy(data: &[u8], password: &str) -> Option<Zeroizing<Vec<u8>>> {
    if data.len() < LEGACY_MIN_LEN {
        return None;
    }
    let (nonce, rest) = data.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let key = legacy_key(password);
    open(&key[..], nonce, tag, ciphertext)
}

/// Decrypt an envelope, reporting which scheme opened it
///
/// Returns `None` for a wrong password, a failed tag check, or a malformed
/// envelope; the three are indistinguishable to the caller.
pub fn decrypt_with_kind(
    envelope: &str,
    password: &str,
) -> Option<(Zeroizing<Vec<u8>>, EnvelopeKind)> {
    let data = Zeroizing::new(STANDARD.decode(envelope.trim()).ok()?);

    if data.len() >= CURRENT_MIN_LEN {
        if let Some(plain) = open_current(&data, password) {
            return Some((plain, EnvelopeKind::Current));
        }
    } else {
        debug!("Envelope shorter than current header, trying legacy scheme");
    }

    open_legacy(&data, password).map(|plain| (plain, EnvelopeKind::Legacy))
}

/// Decrypt an envelope under `password`
pub fn decrypt(envelope: &str, password: &str) -> Option<Zeroizing<Vec<u8>>> {
    decrypt_with_kind(envelope, password).map(|(plain, _)| plain)
}

/// Decrypt an envelope that holds UTF-8 text
pub fn decrypt_string(envelope: &str, password: &str) -> Option<Zeroizing<String>> {
    let plain = decrypt(envelope, password)?;
    std::str::from_utf8(&plain)
        .ok()
        .map(|s| Zeroizing::new(s.to_string()))
}

/// Produce a legacy envelope; only used to exercise migration paths
#[cfg(test)]
pub(crate) fn encrypt_legacy(plaintext: &[u8], password: &str) -> String {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let key = legacy_key(password);
    let cipher = Aes256Gcm::new_from_slice(&key[..]).unwrap();
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .unwrap();
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut envelope = Vec::new();
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(tag);
    envelope.extend_from_slice(ciphertext);
    STANDARD.encode(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let envelope = encrypt(b"super secret key material", "hunter2").unwrap();
        let plain = decrypt(&envelope, "hunter2").unwrap();
        assert_eq!(plain.as_slice(), b"super secret key material");
    }

    #[test]
    fn test_wrong_password_returns_none() {
        let envelope = encrypt(b"key", "correct horse").unwrap();
        assert!(decrypt(&envelope, "battery staple").is_none());
        assert!(decrypt(&envelope, "").is_none());
    }

    #[test]
    fn test_envelope_layout() {
        let plaintext = b"0123456789";
        let envelope = encrypt(plaintext, "pw").unwrap();
        let raw = STANDARD.decode(&envelope).unwrap();
        assert_eq!(raw.len(), SALT_LEN + NONCE_LEN + TAG_LEN + plaintext.len());
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_encryption() {
        let a = encrypt(b"same", "pw").unwrap();
        let b = encrypt(b"same", "pw").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_tag_treated_as_wrong_password() {
        let envelope = encrypt(b"payload", "pw").unwrap();
        let mut raw = STANDARD.decode(&envelope).unwrap();
        raw[SALT_LEN + NONCE_LEN] ^= 0xff;
        let tampered = STANDARD.encode(raw);
        assert!(decrypt(&tampered, "pw").is_none());
    }

    #[test]
    fn test_garbage_input_returns_none() {
        assert!(decrypt("not base64 at all!!", "pw").is_none());
        assert!(decrypt("", "pw").is_none());
        assert!(decrypt(&STANDARD.encode([1u8; 8]), "pw").is_none());
    }

    #[test]
    fn test_legacy_envelope_fallback() {
        // Short plaintext keeps the legacy blob below the current header size
        let short = encrypt_legacy(b"abc", "pw");
        let (plain, kind) = decrypt_with_kind(&short, "pw").unwrap();
        assert_eq!(plain.as_slice(), b"abc");
        assert_eq!(kind, EnvelopeKind::Legacy);

        // Long plaintext passes the length check and falls back after the current scheme fails
        let long_secret = vec![7u8; 88];
        let long = encrypt_legacy(&long_secret, "pw");
        let (plain, kind) = decrypt_with_kind(&long, "pw").unwrap();
        assert_eq!(plain.as_slice(), long_secret.as_slice());
        assert_eq!(kind, EnvelopeKind::Legacy);

        assert!(decrypt(&long, "other").is_none());
    }

    #[test]
    fn test_current_envelope_reports_current() {
        let envelope = encrypt(b"abc", "pw").unwrap();
        let (_, kind) = decrypt_with_kind(&envelope, "pw").unwrap();
        assert_eq!(kind, EnvelopeKind::Current);
    }

    #[test]
    fn test_decrypt_string() {
        let envelope = encrypt("word ".repeat(12).trim().as_bytes(), "pw").unwrap();
        let phrase = decrypt_string(&envelope, "pw").unwrap();
        assert_eq!(phrase.split_whitespace().count(), 12);
    }
}
