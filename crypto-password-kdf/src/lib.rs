//! Password-based key derivation.
//!
//! PBKDF2-HMAC-SHA-256 at 600 000 iterations, the parameter set used for the
//! persisted identity wrap and the encrypted message history. The iteration
//! count is fixed here so every stored artifact in the workspace unwraps with
//! the same cost; changing it invalidates existing stored records.
//!
//! Always pair a derivation with a unique random salt (16 bytes in this
//! workspace) stored alongside the derived artifact.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

/// PBKDF2 iteration count for all password-derived keys.
pub const ITERATIONS: u32 = 600_000;

/// Recommended salt length in bytes.
pub const SALT_SIZE: usize = 16;

/// Derives `output.len()` bytes from `password` and `salt`.
pub fn derive(password: &[u8], salt: &[u8], output: &mut [u8]) {
    pbkdf2_hmac::<Sha256>(password, salt, ITERATIONS, output);
}

#[cfg(test)]
mod tests {
    use super::*;

    // The 600k iteration count makes each derivation take a noticeable
    // fraction of a second; tests keep the number of calls small.

    #[test]
    fn test_deterministic_and_salt_sensitive() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        let mut c = [0u8; 32];
        derive(b"hunter2", b"salt-0123456789a", &mut a);
        derive(b"hunter2", b"salt-0123456789a", &mut b);
        derive(b"hunter2", b"salt-0123456789b", &mut c);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_password_sensitive() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        derive(b"correct horse", b"salt-0123456789a", &mut a);
        derive(b"battery staple", b"salt-0123456789a", &mut b);
        assert_ne!(a, b);
    }
}
