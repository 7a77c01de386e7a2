//! ML-KEM-768 key encapsulation (FIPS 203).
//!
//! A thin, safe wrapper around the formally verified libcrux ML-KEM
//! implementation, fixed to the 768 parameter set. Key generation and
//! encapsulation draw their randomness internally through `crypto-rng`, so
//! callers never handle seed buffers.
//!
//! Decapsulation follows the FIPS 203 implicit-rejection discipline: a
//! malformed or mismatched ciphertext yields an unrelated shared secret
//! rather than an error. Callers must authenticate whatever they derive from
//! the shared secret and must not rely on decapsulation to detect tampering.

use libcrux_ml_kem::{MlKemCiphertext, MlKemPrivateKey, MlKemPublicKey, mlkem768};
use zeroize::Zeroize;

/// ML-KEM-768 public key size in bytes.
pub const PUBLIC_KEY_SIZE: usize = 1184;

/// ML-KEM-768 secret key size in bytes.
pub const SECRET_KEY_SIZE: usize = 2400;

/// ML-KEM-768 ciphertext size in bytes.
pub const CIPHERTEXT_SIZE: usize = 1088;

/// ML-KEM-768 shared secret size in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

const KEYGEN_SEED_SIZE: usize = 64;
const ENCAP_SEED_SIZE: usize = 32;

/// Error returned when constructing a fixed-size KEM object from a slice of
/// the wrong length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidLength {
    /// The size the object requires.
    pub expected: usize,
    /// The size that was provided.
    pub got: usize,
}

impl std::fmt::Display for InvalidLength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid ML-KEM input length: expected {} bytes, got {}",
            self.expected, self.got
        )
    }
}

impl std::error::Error for InvalidLength {}

fn exact<const N: usize>(bytes: &[u8]) -> Result<[u8; N], InvalidLength> {
    bytes.try_into().map_err(|_| InvalidLength {
        expected: N,
        got: bytes.len(),
    })
}

/// An ML-KEM-768 encapsulation (public) key.
pub struct PublicKey(MlKemPublicKey<PUBLIC_KEY_SIZE>);

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PublicKey").field(self.as_bytes()).finish()
    }
}

impl PublicKey {
    /// Raw bytes of the public key.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_slice()
    }
}

impl From<[u8; PUBLIC_KEY_SIZE]> for PublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(MlKemPublicKey::from(bytes))
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self::from(exact::<PUBLIC_KEY_SIZE>(bytes)?))
    }
}

impl Clone for PublicKey {
    fn clone(&self) -> Self {
        Self::from(*self.as_bytes())
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for PublicKey {}

/// An ML-KEM-768 decapsulation (secret) key.
///
/// The key bytes are held directly so they can be zeroed when the value is
/// dropped; the libcrux view is rebuilt per decapsulation.
pub struct SecretKey([u8; SECRET_KEY_SIZE]);

impl SecretKey {
    /// Raw bytes of the secret key.
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; SECRET_KEY_SIZE]> for SecretKey {
    fn from(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl Clone for SecretKey {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A ciphertext produced by [`encapsulate`].
pub struct Ciphertext(MlKemCiphertext<CIPHERTEXT_SIZE>);

impl Ciphertext {
    /// Raw bytes of the ciphertext.
    pub fn as_bytes(&self) -> &[u8; CIPHERTEXT_SIZE] {
        self.0.as_slice()
    }
}

impl From<[u8; CIPHERTEXT_SIZE]> for Ciphertext {
    fn from(bytes: [u8; CIPHERTEXT_SIZE]) -> Self {
        Self(MlKemCiphertext::from(bytes))
    }
}

impl TryFrom<&[u8]> for Ciphertext {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self::from(exact::<CIPHERTEXT_SIZE>(bytes)?))
    }
}

/// The 32-byte shared secret agreed through encapsulation.
///
/// Zeroed on drop.
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// Raw bytes of the shared secret.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Generates a fresh ML-KEM-768 keypair from the platform CSPRNG.
pub fn generate_key_pair() -> (SecretKey, PublicKey) {
    let mut randomness = [0u8; KEYGEN_SEED_SIZE];
    crypto_rng::fill_buffer(&mut randomness);
    let (sk, pk) = mlkem768::generate_key_pair(randomness).into_parts();
    randomness.zeroize();
    (SecretKey(*sk.as_slice()), PublicKey(pk))
}

/// Encapsulates a fresh shared secret to `public_key`.
///
/// Returns the ciphertext to transmit and the locally held shared secret.
pub fn encapsulate(public_key: &PublicKey) -> (Ciphertext, SharedSecret) {
    let mut randomness = [0u8; ENCAP_SEED_SIZE];
    crypto_rng::fill_buffer(&mut randomness);
    let (ct, ss) = mlkem768::encapsulate(&public_key.0, randomness);
    randomness.zeroize();
    (Ciphertext(ct), SharedSecret(ss))
}

/// Recovers the shared secret from `ciphertext` under `secret_key`.
///
/// Never fails: a foreign ciphertext implicitly rejects into an unrelated
/// secret.
pub fn decapsulate(secret_key: &SecretKey, ciphertext: &Ciphertext) -> SharedSecret {
    let sk = MlKemPrivateKey::from(secret_key.0);
    SharedSecret(mlkem768::decapsulate(&sk, &ciphertext.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encapsulate_decapsulate_roundtrip() {
        let (sk, pk) = generate_key_pair();
        let (ct, ss_sender) = encapsulate(&pk);
        let ss_receiver = decapsulate(&sk, &ct);
        assert_eq!(ss_sender.as_bytes(), ss_receiver.as_bytes());
    }

    #[test]
    fn test_generated_keys_are_distinct() {
        let (_, pk1) = generate_key_pair();
        let (_, pk2) = generate_key_pair();
        assert_ne!(pk1.as_bytes(), pk2.as_bytes());
    }

    #[test]
    fn test_wrong_secret_key_disagrees() {
        let (_, pk) = generate_key_pair();
        let (other_sk, _) = generate_key_pair();
        let (ct, ss) = encapsulate(&pk);
        // Implicit rejection: decapsulation succeeds but yields garbage.
        let wrong = decapsulate(&other_sk, &ct);
        assert_ne!(ss.as_bytes(), wrong.as_bytes());
    }

    #[test]
    fn test_public_key_try_from_rejects_bad_length() {
        let err = PublicKey::try_from(&[0u8; 16][..]).unwrap_err();
        assert_eq!(err.expected, PUBLIC_KEY_SIZE);
        assert_eq!(err.got, 16);
    }

    #[test]
    fn test_ciphertext_try_from_rejects_bad_length() {
        assert!(Ciphertext::try_from(&[0u8; CIPHERTEXT_SIZE - 1][..]).is_err());
    }

    #[test]
    fn test_key_byte_roundtrip() {
        let (sk, pk) = generate_key_pair();
        let pk2 = PublicKey::try_from(pk.as_bytes().as_slice()).unwrap();
        let (ct, ss) = encapsulate(&pk2);
        let sk2 = SecretKey::from(*sk.as_bytes());
        assert_eq!(decapsulate(&sk2, &ct).as_bytes(), ss.as_bytes());
    }
}
