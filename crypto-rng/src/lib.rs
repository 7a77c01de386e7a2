//! Cryptographically secure random byte generation.
//!
//! A single entry point over the platform CSPRNG: the OS entropy source on
//! native targets and the Web Crypto API when compiled to wasm. All key,
//! nonce, and seed material in this workspace is drawn through this crate.
//!
//! # Failure behavior
//!
//! [`fill_buffer`] panics if the platform random source fails. Continuing
//! without entropy would silently produce predictable key material, so there
//! is deliberately no error channel to recover through.

/// Fills `buffer` with cryptographically secure random bytes.
///
/// # Panics
///
/// Panics if the platform random source is unavailable.
///
/// # Examples
///
/// ```rust
/// let mut seed = [0u8; 32];
/// crypto_rng::fill_buffer(&mut seed);
/// ```
pub fn fill_buffer(buffer: &mut [u8]) {
    getrandom::getrandom(buffer)
        .expect("Failed to generate random bytes: system random source unavailable");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_calls_produce_distinct_output() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        fill_buffer(&mut a);
        fill_buffer(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_buffer_does_not_panic() {
        let mut empty = [];
        fill_buffer(&mut empty);
    }

    #[test]
    fn test_large_buffer_is_filled() {
        let mut buffer = vec![0u8; 4096];
        let before = buffer.clone();
        fill_buffer(&mut buffer);
        assert_ne!(buffer, before);
    }
}
