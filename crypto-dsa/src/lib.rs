//! ML-DSA-65 digital signatures (FIPS 204).
//!
//! A thin, safe wrapper around the formally verified libcrux ML-DSA
//! implementation, fixed to the 65 parameter set. Signing randomness is
//! drawn internally; the signing context is always empty — domain separation
//! in this workspace happens at the KDF layer instead.
//!
//! ML-DSA signs raw messages directly (it hashes internally with SHAKE256),
//! so callers pass unhashed bytes to [`sign`] and [`verify`].

use libcrux_ml_dsa::ml_dsa_65;
use zeroize::Zeroize;

/// ML-DSA-65 signing (secret) key size in bytes.
pub const SIGNING_KEY_SIZE: usize = 4032;

/// ML-DSA-65 verification (public) key size in bytes.
pub const VERIFICATION_KEY_SIZE: usize = 1952;

/// ML-DSA-65 signature size in bytes.
pub const SIGNATURE_SIZE: usize = 3309;

const KEYGEN_SEED_SIZE: usize = 32;
const SIGNING_SEED_SIZE: usize = 32;

/// Error returned when constructing a fixed-size ML-DSA object from a slice
/// of the wrong length.
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
            "invalid ML-DSA input length: expected {} bytes, got {}",
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

/// An ML-DSA-65 verification key.
pub struct VerificationKey([u8; VERIFICATION_KEY_SIZE]);

impl VerificationKey {
    /// Raw bytes of the verification key.
    pub fn as_bytes(&self) -> &[u8; VERIFICATION_KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; VERIFICATION_KEY_SIZE]> for VerificationKey {
    fn from(bytes: [u8; VERIFICATION_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for VerificationKey {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(exact::<VERIFICATION_KEY_SIZE>(bytes)?))
    }
}

impl Clone for VerificationKey {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl PartialEq for VerificationKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for VerificationKey {}

/// An ML-DSA-65 signing key.
///
/// The key bytes are zeroed when the value is dropped.
pub struct SigningKey([u8; SIGNING_KEY_SIZE]);

impl SigningKey {
    /// Raw bytes of the signing key.
    pub fn as_bytes(&self) -> &[u8; SIGNING_KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; SIGNING_KEY_SIZE]> for SigningKey {
    fn from(bytes: [u8; SIGNING_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for SigningKey {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(exact::<SIGNING_KEY_SIZE>(bytes)?))
    }
}

impl Clone for SigningKey {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// An ML-DSA-65 signature.
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Raw bytes of the signature.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl From<[u8; SIGNATURE_SIZE]> for Signature {
    fn from(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(exact::<SIGNATURE_SIZE>(bytes)?))
    }
}

impl Clone for Signature {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

/// Generates a fresh ML-DSA-65 keypair from the platform CSPRNG.
pub fn generate_key_pair() -> (SigningKey, VerificationKey) {
    let mut randomness = [0u8; KEYGEN_SEED_SIZE];
    crypto_rng::fill_buffer(&mut randomness);
    let kp = ml_dsa_65::generate_key_pair(randomness);
    randomness.zeroize();
    (
        SigningKey(*kp.signing_key.as_ref()),
        VerificationKey(*kp.verification_key.as_ref()),
    )
}

/// Signs `message` under `signing_key`.
///
/// # Panics
///
/// Panics only if the underlying implementation rejects its inputs, which
/// cannot happen for keys produced by [`generate_key_pair`] and the empty
/// context used here.
pub fn sign(signing_key: &SigningKey, message: &[u8]) -> Signature {
    let mut randomness = [0u8; SIGNING_SEED_SIZE];
    crypto_rng::fill_buffer(&mut randomness);
    let sk = libcrux_ml_dsa::MLDSASigningKey::new(signing_key.0);
    let sig = ml_dsa_65::sign(&sk, message, b"", randomness)
        .expect("ML-DSA signing failed with empty context");
    randomness.zeroize();
    Signature(*sig.as_ref())
}

/// Verifies `signature` over `message` under `verification_key`.
pub fn verify(verification_key: &VerificationKey, message: &[u8], signature: &Signature) -> bool {
    let vk = libcrux_ml_dsa::MLDSAVerificationKey::new(verification_key.0);
    let sig = libcrux_ml_dsa::MLDSASignature::new(signature.0);
    ml_dsa_65::verify(&vk, message, b"", &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let (sk, vk) = generate_key_pair();
        let sig = sign(&sk, b"attest this");
        assert!(verify(&vk, b"attest this", &sig));
    }

    #[test]
    fn test_verify_rejects_other_message() {
        let (sk, vk) = generate_key_pair();
        let sig = sign(&sk, b"attest this");
        assert!(!verify(&vk, b"attest that", &sig));
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let (sk, _) = generate_key_pair();
        let (_, other_vk) = generate_key_pair();
        let sig = sign(&sk, b"attest this");
        assert!(!verify(&other_vk, b"attest this", &sig));
    }

    #[test]
    fn test_verify_rejects_tampered_signature() {
        let (sk, vk) = generate_key_pair();
        let sig = sign(&sk, b"attest this");
        let mut bytes = *sig.as_bytes();
        bytes[0] ^= 1;
        assert!(!verify(&vk, b"attest this", &Signature::from(bytes)));
    }

    #[test]
    fn test_try_from_rejects_bad_lengths() {
        assert!(VerificationKey::try_from(&[0u8; 100][..]).is_err());
        assert!(SigningKey::try_from(&[0u8; 100][..]).is_err());
        assert!(Signature::try_from(&[0u8; 100][..]).is_err());
        assert!(VerificationKey::try_from(&[0u8; VERIFICATION_KEY_SIZE][..]).is_ok());
    }

    #[test]
    fn test_key_byte_roundtrip() {
        let (sk, vk) = generate_key_pair();
        let sk2 = SigningKey::try_from(sk.as_bytes().as_slice()).unwrap();
        let sig = sign(&sk2, b"payload");
        let vk2 = VerificationKey::try_from(vk.as_bytes().as_slice()).unwrap();
        assert!(verify(&vk2, b"payload", &sig));
    }
}
