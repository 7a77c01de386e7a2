//! A single sender's hash chain.

use std::collections::VecDeque;

use zeroize::Zeroizing;

use crate::ChainError;

/// Maximum number of cached skipped message keys per chain; the oldest entry
/// is evicted first.
pub const SKIPPED_KEY_CAP: usize = 100;

/// Upper bound on how far ahead of the expected counter a single message may
/// jump. Guards the forward ratchet against a hostile counter that would
/// otherwise spin the chain arbitrarily long.
pub const MAX_FORWARD_SKIP: u64 = 1_000;

/// Domain prefix for seeding a sender's chain from the group key.
const CHAIN_SEED_PREFIX: &[u8] = b"parrhesia-chain-";

/// Info string for deriving a message key from a chain key.
const MESSAGE_KEY_INFO: &[u8] = b"msg";

/// Info string for stepping the chain key forward.
const NEXT_CHAIN_KEY_INFO: &[u8] = b"chain";

/// One sender's symmetric ratchet within a single epoch.
///
/// The sender ratchets once per outbound message; receivers ratchet to the
/// message's counter, caching any skipped keys. Decryption never mutates the
/// chain unless the AEAD opens, so a forged frame cannot desynchronize the
/// ratchet.
pub struct Chain {
    chain_key: Zeroizing<[u8; 32]>,
    counter: u64,
    skipped: VecDeque<(u64, Zeroizing<[u8; 32]>)>,
}

impl Chain {
    /// Seeds the chain for `sender_id` from the epoch's group key.
    pub fn seed(group_key: &[u8; 32], sender_id: &str) -> Self {
        let mut info = Vec::with_capacity(CHAIN_SEED_PREFIX.len() + sender_id.len());
        info.extend_from_slice(CHAIN_SEED_PREFIX);
        info.extend_from_slice(sender_id.as_bytes());
        Self {
            chain_key: Zeroizing::new(crypto_kdf::derive_32(group_key, &info)),
            counter: 0,
            skipped: VecDeque::new(),
        }
    }

    /// The next counter this chain will produce or expects to consume.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Number of cached skipped message keys.
    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }

    /// One ratchet step: the message key for this position and the next
    /// chain key.
    fn step(chain_key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
        (
            crypto_kdf::derive_32(chain_key, MESSAGE_KEY_INFO),
            crypto_kdf::derive_32(chain_key, NEXT_CHAIN_KEY_INFO),
        )
    }

    /// Encrypts the next outbound message.
    ///
    /// Returns the sealed payload (`iv ∥ ct ∥ tag`) and the counter it was
    /// sealed at. Counters are dense: every call consumes exactly one.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> (Vec<u8>, u64) {
        let (message_key, next) = Self::step(&self.chain_key);
        let payload = crypto_aead::seal(&crypto_aead::Key::from(message_key), plaintext, b"");
        self.chain_key = Zeroizing::new(next);
        let counter = self.counter;
        self.counter += 1;
        (payload, counter)
    }

    /// Decrypts the message sealed at `counter`.
    ///
    /// A counter ahead of the chain ratchets forward and caches every
    /// skipped key; a counter behind it consumes the cached key. All state
    /// changes are committed only after the AEAD authenticates.
    pub fn decrypt(&mut self, counter: u64, payload: &[u8]) -> Result<Vec<u8>, ChainError> {
        if counter < self.counter {
            let position = self
                .skipped
                .iter()
                .position(|(cached, _)| *cached == counter)
                .ok_or(ChainError::OutOfOrder(counter))?;
            let message_key = *self.skipped[position].1;
            let plaintext = crypto_aead::open(&crypto_aead::Key::from(message_key), payload, b"")
                .ok_or(ChainError::AeadAuthFailure)?;
            self.skipped.remove(position);
            return Ok(plaintext);
        }

        if counter - self.counter > MAX_FORWARD_SKIP {
            return Err(ChainError::OutOfOrder(counter));
        }

        // Ratchet a scratch copy to the target; the live chain is updated
        // only once the ciphertext authenticates.
        let mut scratch = *self.chain_key;
        let mut skipped = Vec::new();
        for c in self.counter..counter {
            let (message_key, next) = Self::step(&scratch);
            skipped.push((c, Zeroizing::new(message_key)));
            scratch = next;
        }
        let (message_key, next) = Self::step(&scratch);
        let plaintext = crypto_aead::open(&crypto_aead::Key::from(message_key), payload, b"")
            .ok_or(ChainError::AeadAuthFailure)?;

        self.chain_key = Zeroizing::new(next);
        self.counter = counter + 1;
        for entry in skipped {
            self.skipped.push_back(entry);
        }
        while self.skipped.len() > SKIPPED_KEY_CAP {
            self.skipped.pop_front();
        }
        Ok(plaintext)
    }
}
