//! AES-256-GCM authenticated encryption.
//!
//! Every seal draws a fresh random 96-bit IV and prepends it to the
//! ciphertext, so a sealed message is always `iv ∥ ct ∥ tag` and the only
//! state a caller needs is the key. Opening authenticates the tag (and the
//! optional associated data) before releasing any plaintext.
//!
//! GCM is not nonce-misuse resistant: the random IV is mandatory and is why
//! [`seal`] generates it internally instead of accepting one.

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// GCM IV size in bytes (96 bits).
pub const IV_SIZE: usize = 12;

/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// An AES-256-GCM key. Zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Key([u8; KEY_SIZE]);

impl From<[u8; KEY_SIZE]> for Key {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl Key {
    /// Raw bytes of the key.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Encrypts `plaintext` under `key`, authenticating `aad` alongside it.
///
/// Returns `iv ∥ ct ∥ tag`; the IV is fresh random per call.
///
/// # Panics
///
/// Panics if the underlying cipher fails, which does not happen for valid
/// keys and in-memory buffers.
pub fn seal(key: &Key, plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut iv = [0u8; IV_SIZE];
    crypto_rng::fill_buffer(&mut iv);

    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let ct = cipher
        .encrypt(iv.as_slice().into(), payload)
        .expect("AES-GCM encryption should never fail");

    let mut sealed = Vec::with_capacity(IV_SIZE + ct.len());
    sealed.extend_from_slice(&iv);
    sealed.extend_from_slice(&ct);
    sealed
}

/// Decrypts a message produced by [`seal`].
///
/// Returns `None` if the input is too short to carry an IV and tag, if the
/// tag does not authenticate, or if `aad` differs from what was sealed.
pub fn open(key: &Key, sealed: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
    if sealed.len() < IV_SIZE + TAG_SIZE {
        return None;
    }
    let (iv, ct) = sealed.split_at(IV_SIZE);

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let payload = Payload { msg: ct, aad };
    cipher.decrypt(iv.into(), payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_key() -> Key {
        let mut bytes = [0u8; KEY_SIZE];
        crypto_rng::fill_buffer(&mut bytes);
        Key::from(bytes)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = random_key();
        let sealed = seal(&key, b"the quick brown fox", b"header");
        let opened = open(&key, &sealed, b"header").unwrap();
        assert_eq!(opened, b"the quick brown fox");
    }

    #[test]
    fn test_sealed_layout() {
        let key = random_key();
        let sealed = seal(&key, b"abc", b"");
        assert_eq!(sealed.len(), IV_SIZE + 3 + TAG_SIZE);
    }

    #[test]
    fn test_fresh_iv_per_seal() {
        let key = random_key();
        let a = seal(&key, b"same plaintext", b"");
        let b = seal(&key, b"same plaintext", b"");
        assert_ne!(a, b);
        assert_ne!(&a[..IV_SIZE], &b[..IV_SIZE]);
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let key = random_key();
        let other = random_key();
        let sealed = seal(&key, b"secret", b"");
        assert!(open(&other, &sealed, b"").is_none());
    }

    #[test]
    fn test_open_rejects_wrong_aad() {
        let key = random_key();
        let sealed = seal(&key, b"secret", b"aad-1");
        assert!(open(&key, &sealed, b"aad-2").is_none());
    }

    #[test]
    fn test_open_rejects_tampered_ciphertext() {
        let key = random_key();
        let mut sealed = seal(&key, b"secret", b"");
        let last = sealed.len() - 1;
        sealed[last] ^= 1;
        assert!(open(&key, &sealed, b"").is_none());
    }

    #[test]
    fn test_open_rejects_truncated_input() {
        let key = random_key();
        assert!(open(&key, &[0u8; IV_SIZE + TAG_SIZE - 1], b"").is_none());
        assert!(open(&key, &[], b"").is_none());
    }

    #[test]
    fn test_empty_plaintext() {
        let key = random_key();
        let sealed = seal(&key, b"", b"meta");
        assert_eq!(open(&key, &sealed, b"meta").unwrap(), Vec::<u8>::new());
    }
}
