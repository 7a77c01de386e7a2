//! Per-sender symmetric ratchets.
//!
//! Every participant (self included) gets one hash chain per epoch, seeded
//! from the group key and the sender's identifier. Each message consumes one
//! chain step: the step yields a one-time AES-256-GCM message key and the
//! next chain key, so compromise of a later chain key never exposes earlier
//! messages.
//!
//! Receivers tolerate in-epoch reordering by caching skipped message keys
//! (bounded, FIFO) and tolerate messages that straddle a rekey through a
//! bounded previous-epoch grace window managed by [`EpochChains`].

mod epoch;
mod ratchet;

pub use epoch::{EpochChains, GRACE_WINDOW_MILLIS};
pub use ratchet::{Chain, MAX_FORWARD_SKIP, SKIPPED_KEY_CAP};

use thiserror::Error;

/// Errors raised while encrypting or decrypting chain messages.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The counter was already consumed and its key is no longer cached.
    #[error("message counter {0} was already consumed and its key is not cached")]
    OutOfOrder(u64),
    /// The ciphertext failed AEAD authentication.
    #[error("ciphertext failed authentication")]
    AeadAuthFailure,
    /// The message's epoch is neither current nor within the grace window.
    #[error("message epoch {got} is outside the decryption window at epoch {current}")]
    EpochOutOfWindow {
        /// The local epoch at rejection time.
        current: u64,
        /// The epoch carried by the message.
        got: u64,
    },
    /// No chain exists for the claimed sender.
    #[error("no chain is seeded for sender {0:?}")]
    UnknownSender(String),
}
