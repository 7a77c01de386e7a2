//! The long-term signing identity and its persisted forms.
//!
//! The ML-DSA keypair is the only durable secret in the system. It persists
//! either raw (both keys base64) or password-wrapped: PBKDF2-SHA-256 over a
//! 16-byte salt derives an AES-256-GCM key that seals the 4032-byte signing
//! key under a 12-byte IV. The storage backend itself is a collaborator
//! behind [`IdentityStore`]; browsers keep the record in local storage, tests
//! keep it in memory.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::GroupError;

/// The long-term ML-DSA-65 identity keypair.
pub struct Identity {
    signing_key: crypto_dsa::SigningKey,
    verification_key: crypto_dsa::VerificationKey,
}

impl Identity {
    /// Generates a fresh identity.
    pub fn generate() -> Self {
        let (signing_key, verification_key) = crypto_dsa::generate_key_pair();
        Self {
            signing_key,
            verification_key,
        }
    }

    /// The public verification key.
    pub fn verification_key(&self) -> &crypto_dsa::VerificationKey {
        &self.verification_key
    }

    /// Signs `message` under the identity key.
    pub fn sign(&self, message: &[u8]) -> crypto_dsa::Signature {
        crypto_dsa::sign(&self.signing_key, message)
    }

    /// The identity fingerprint: base64 of the verification key. Used as
    /// the TOFU lookup key and the rekey-election identifier.
    pub fn fingerprint(&self) -> String {
        fingerprint(self.verification_key.as_bytes())
    }

    /// Converts to a persistable record, wrapping under `password` when one
    /// is given.
    pub fn to_record(&self, password: Option<&str>) -> IdentityRecord {
        match password {
            None => IdentityRecord::Raw(RawIdentity {
                public_key: STANDARD.encode(self.verification_key.as_bytes()),
                secret_key: STANDARD.encode(self.signing_key.as_bytes()),
            }),
            Some(password) => {
                let mut salt = [0u8; crypto_password_kdf::SALT_SIZE];
                crypto_rng::fill_buffer(&mut salt);
                let mut wrap_key = Zeroizing::new([0u8; crypto_aead::KEY_SIZE]);
                crypto_password_kdf::derive(password.as_bytes(), &salt, &mut *wrap_key);
                let sealed = crypto_aead::seal(
                    &crypto_aead::Key::from(*wrap_key),
                    self.signing_key.as_bytes(),
                    b"",
                );
                let (iv, ciphertext) = sealed.split_at(crypto_aead::IV_SIZE);
                IdentityRecord::Wrapped(WrappedIdentity {
                    encrypted_key: STANDARD.encode(ciphertext),
                    salt: STANDARD.encode(salt),
                    iv: STANDARD.encode(iv),
                    public_key: STANDARD.encode(self.verification_key.as_bytes()),
                })
            }
        }
    }

    /// Restores an identity from its persisted record.
    ///
    /// A wrapped record requires `password`; a missing password fails
    /// [`GroupError::PasswordRequired`] and a wrong one
    /// [`GroupError::InvalidPassword`].
    pub fn from_record(
        record: &IdentityRecord,
        password: Option<&str>,
    ) -> Result<Self, GroupError> {
        match record {
            IdentityRecord::Raw(raw) => {
                let public = decode_b64(&raw.public_key)?;
                let secret = Zeroizing::new(decode_b64(&raw.secret_key)?);
                let verification_key = crypto_dsa::VerificationKey::try_from(public.as_slice())
                    .map_err(|e| GroupError::Persistence(e.to_string()))?;
                let signing_key = crypto_dsa::SigningKey::try_from(secret.as_slice())
                    .map_err(|e| GroupError::Persistence(e.to_string()))?;
                Ok(Self {
                    signing_key,
                    verification_key,
                })
            }
            IdentityRecord::Wrapped(wrapped) => {
                let password = password.ok_or(GroupError::PasswordRequired)?;
                let salt = decode_b64(&wrapped.salt)?;
                let iv = decode_b64(&wrapped.iv)?;
                let ciphertext = decode_b64(&wrapped.encrypted_key)?;
                let public = decode_b64(&wrapped.public_key)?;

                let mut wrap_key = Zeroizing::new([0u8; crypto_aead::KEY_SIZE]);
                crypto_password_kdf::derive(password.as_bytes(), &salt, &mut *wrap_key);
                let mut sealed = Vec::with_capacity(iv.len() + ciphertext.len());
                sealed.extend_from_slice(&iv);
                sealed.extend_from_slice(&ciphertext);
                let secret = Zeroizing::new(
                    crypto_aead::open(&crypto_aead::Key::from(*wrap_key), &sealed, b"")
                        .ok_or(GroupError::InvalidPassword)?,
                );

                let verification_key = crypto_dsa::VerificationKey::try_from(public.as_slice())
                    .map_err(|e| GroupError::Persistence(e.to_string()))?;
                let signing_key = crypto_dsa::SigningKey::try_from(secret.as_slice())
                    .map_err(|e| GroupError::Persistence(e.to_string()))?;
                Ok(Self {
                    signing_key,
                    verification_key,
                })
            }
        }
    }
}

/// Fingerprint of a signing public key: its padded standard base64.
pub(crate) fn fingerprint(verification_key: &[u8]) -> String {
    STANDARD.encode(verification_key)
}

fn decode_b64(encoded: &str) -> Result<Vec<u8>, GroupError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| GroupError::Persistence(e.to_string()))
}

/// A raw (unwrapped) persisted identity.
#[derive(Clone, Serialize, Deserialize)]
pub struct RawIdentity {
    /// Base64 verification key (1952 bytes decoded).
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Base64 signing key (4032 bytes decoded).
    #[serde(rename = "secretKey")]
    pub secret_key: String,
}

/// A password-wrapped persisted identity.
#[derive(Clone, Serialize, Deserialize)]
pub struct WrappedIdentity {
    /// Base64 AES-GCM ciphertext-plus-tag over the signing key.
    #[serde(rename = "encryptedKey")]
    pub encrypted_key: String,
    /// Base64 16-byte PBKDF2 salt.
    pub salt: String,
    /// Base64 12-byte GCM IV.
    pub iv: String,
    /// Base64 verification key, stored in the clear.
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// Either persisted form; distinguished structurally when parsed.
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentityRecord {
    /// Password-wrapped form.
    Wrapped(WrappedIdentity),
    /// Raw form.
    Raw(RawIdentity),
}

/// Storage collaborator holding the persisted identity record.
pub trait IdentityStore {
    /// Loads the stored record, if any.
    fn load(&self) -> Option<IdentityRecord>;
    /// Replaces the stored record.
    fn store(&mut self, record: &IdentityRecord);
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryIdentityStore {
    record: Option<IdentityRecord>,
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Option<IdentityRecord> {
        self.record.clone()
    }

    fn store(&mut self, record: &IdentityRecord) {
        self.record = Some(record.clone());
    }
}

/// Loads the identity from `store`, generating and persisting a fresh one
/// if the store is empty.
pub fn load_or_generate(
    store: &mut dyn IdentityStore,
    password: Option<&str>,
) -> Result<Identity, GroupError> {
    match store.load() {
        Some(record) => Identity::from_record(&record, password),
        None => {
            let identity = Identity::generate();
            store.store(&identity.to_record(password));
            Ok(identity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_roundtrip() {
        let identity = Identity::generate();
        let record = identity.to_record(None);
        let restored = Identity::from_record(&record, None).unwrap();
        assert_eq!(identity.fingerprint(), restored.fingerprint());

        // The restored signing key still signs under the same identity.
        let sig = restored.sign(b"probe");
        assert!(crypto_dsa::verify(
            identity.verification_key(),
            b"probe",
            &sig
        ));
    }

    #[test]
    fn test_wrapped_record_roundtrip() {
        let identity = Identity::generate();
        let record = identity.to_record(Some("correct horse"));
        let restored = Identity::from_record(&record, Some("correct horse")).unwrap();
        assert_eq!(identity.fingerprint(), restored.fingerprint());
    }

    #[test]
    fn test_wrapped_record_without_password_fails() {
        let identity = Identity::generate();
        let record = identity.to_record(Some("correct horse"));
        assert!(matches!(
            Identity::from_record(&record, None),
            Err(GroupError::PasswordRequired)
        ));
    }

    #[test]
    fn test_wrapped_record_with_wrong_password_fails() {
        let identity = Identity::generate();
        let record = identity.to_record(Some("correct horse"));
        assert!(matches!(
            Identity::from_record(&record, Some("battery staple")),
            Err(GroupError::InvalidPassword)
        ));
    }

    #[test]
    fn test_record_json_field_names() {
        let identity = Identity::generate();
        let json = serde_json::to_value(identity.to_record(Some("pw"))).unwrap();
        assert!(json.get("encryptedKey").is_some());
        assert!(json.get("salt").is_some());
        assert!(json.get("iv").is_some());
        assert!(json.get("publicKey").is_some());
    }

    #[test]
    fn test_record_json_distinguishes_forms() {
        let identity = Identity::generate();
        let raw = serde_json::to_string(&identity.to_record(None)).unwrap();
        let parsed: IdentityRecord = serde_json::from_str(&raw).unwrap();
        assert!(matches!(parsed, IdentityRecord::Raw(_)));

        let wrapped = serde_json::to_string(&identity.to_record(Some("pw"))).unwrap();
        let parsed: IdentityRecord = serde_json::from_str(&wrapped).unwrap();
        assert!(matches!(parsed, IdentityRecord::Wrapped(_)));
    }

    #[test]
    fn test_load_or_generate_persists_once() {
        let mut store = MemoryIdentityStore::default();
        let first = load_or_generate(&mut store, None).unwrap();
        let second = load_or_generate(&mut store, None).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
    }
}
