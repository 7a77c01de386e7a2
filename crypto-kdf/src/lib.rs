//! HKDF-SHA-256 key derivation.
//!
//! One-shot extract-then-expand over a single input keying material, which is
//! the shape every derivation in this workspace takes: tree node secrets,
//! the root-to-group step, chain seeding, the per-message ratchet, and the
//! KEM shared-secret wrap key. Domain separation is carried entirely by the
//! `info` string; the salt is all-zero ([`ZERO_SALT`]) unless a caller has a
//! genuinely random one.

use hkdf::Hkdf;
use sha2::Sha256;

/// The default all-zero 32-byte salt.
pub const ZERO_SALT: [u8; 32] = [0u8; 32];

/// Derives `out.len()` bytes from `ikm` with HKDF-SHA-256.
///
/// # Panics
///
/// Panics if `out` is longer than HKDF-SHA-256 can produce (255 · 32 bytes);
/// all derivations in this workspace are 32 bytes.
pub fn extract_expand(salt: &[u8], ikm: &[u8], info: &[u8], out: &mut [u8]) {
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, out)
        .expect("HKDF output length out of range");
}

/// Convenience for the ubiquitous 32-byte derivation with [`ZERO_SALT`].
#[must_use]
pub fn derive_32(ikm: &[u8], info: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    extract_expand(&ZERO_SALT, ikm, info, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(derive_32(b"ikm", b"info"), derive_32(b"ikm", b"info"));
    }

    #[test]
    fn test_info_separates_outputs() {
        assert_ne!(derive_32(b"ikm", b"info-a"), derive_32(b"ikm", b"info-b"));
    }

    #[test]
    fn test_ikm_separates_outputs() {
        assert_ne!(derive_32(b"ikm-a", b"info"), derive_32(b"ikm-b", b"info"));
    }

    #[test]
    fn test_salt_separates_outputs() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        extract_expand(b"salt-a", b"ikm", b"info", &mut a);
        extract_expand(b"salt-b", b"ikm", b"info", &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_variable_output_lengths_share_prefix() {
        let mut short = [0u8; 16];
        let mut long = [0u8; 48];
        extract_expand(&ZERO_SALT, b"ikm", b"info", &mut short);
        extract_expand(&ZERO_SALT, b"ikm", b"info", &mut long);
        assert_eq!(&long[..16], &short[..]);
    }

    #[test]
    fn test_output_is_not_all_zero() {
        assert_ne!(derive_32(b"", b""), [0u8; 32]);
    }
}
