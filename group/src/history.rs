//! Encrypted message history records.
//!
//! History persists as a JSON array of [`MessageRecord`]s, sealed under a
//! key derived from the user's password with an independent random salt.
//! The derivation context appends `-messages` to the password so the
//! history key can never collide with the identity wrap key even when both
//! use the same password.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::GroupError;

const HISTORY_CONTEXT_SUFFIX: &[u8] = b"-messages";

/// One displayed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// The sender's peer identifier.
    pub peer_id: String,
    /// Whether the local user sent this message.
    pub sent: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp_millis: u128,
    /// The plaintext body.
    pub text: String,
}

/// A sealed history blob plus the salt needed to re-derive its key.
#[derive(Clone, Serialize, Deserialize)]
pub struct SealedHistory {
    /// Base64 `iv ∥ ct ∥ tag` over the JSON record array.
    pub ciphertext: String,
    /// Base64 16-byte salt, independent of the identity wrap salt.
    pub salt: String,
}

/// Seals `records` under a key derived from `password`.
pub fn seal_history(records: &[MessageRecord], password: &str) -> Result<SealedHistory, GroupError> {
    let json = serde_json::to_vec(records).map_err(|e| GroupError::Persistence(e.to_string()))?;

    let mut salt = [0u8; crypto_password_kdf::SALT_SIZE];
    crypto_rng::fill_buffer(&mut salt);
    let sealed = crypto_aead::seal(&history_key(password, &salt), &json, b"");

    Ok(SealedHistory {
        ciphertext: STANDARD.encode(sealed),
        salt: STANDARD.encode(salt),
    })
}

/// Opens a sealed history blob.
pub fn open_history(sealed: &SealedHistory, password: &str) -> Result<Vec<MessageRecord>, GroupError> {
    let salt = STANDARD
        .decode(&sealed.salt)
        .map_err(|e| GroupError::Persistence(e.to_string()))?;
    let ciphertext = STANDARD
        .decode(&sealed.ciphertext)
        .map_err(|e| GroupError::Persistence(e.to_string()))?;

    let json = crypto_aead::open(&history_key(password, &salt), &ciphertext, b"")
        .ok_or(GroupError::InvalidPassword)?;
    serde_json::from_slice(&json).map_err(|e| GroupError::Persistence(e.to_string()))
}

fn history_key(password: &str, salt: &[u8]) -> crypto_aead::Key {
    let mut context =
        Zeroizing::new(Vec::with_capacity(password.len() + HISTORY_CONTEXT_SUFFIX.len()));
    context.extend_from_slice(password.as_bytes());
    context.extend_from_slice(HISTORY_CONTEXT_SUFFIX);

    let mut key = Zeroizing::new([0u8; crypto_aead::KEY_SIZE]);
    crypto_password_kdf::derive(&context, salt, &mut *key);
    crypto_aead::Key::from(*key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<MessageRecord> {
        vec![
            MessageRecord {
                peer_id: "peer-1".into(),
                sent: false,
                timestamp_millis: 1_000,
                text: "hello".into(),
            },
            MessageRecord {
                peer_id: "self".into(),
                sent: true,
                timestamp_millis: 2_000,
                text: "hi back".into(),
            },
        ]
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let sealed = seal_history(&sample(), "passphrase").unwrap();
        let opened = open_history(&sealed, "passphrase").unwrap();
        assert_eq!(opened, sample());
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealed = seal_history(&sample(), "passphrase").unwrap();
        assert!(matches!(
            open_history(&sealed, "other"),
            Err(GroupError::InvalidPassword)
        ));
    }

    #[test]
    fn test_empty_history_roundtrip() {
        let sealed = seal_history(&[], "passphrase").unwrap();
        assert_eq!(open_history(&sealed, "passphrase").unwrap(), vec![]);
    }
}
