//! Group key management.
//!
//! Owns the long-term signing identity, the session's ephemeral KEM keypair,
//! the peer registry with its trust-on-first-use records, and the TreeKEM +
//! per-sender-chain state. The [`GroupKeyManager`] is the single mutation
//! point for all key material: the session layer feeds it parsed frames and
//! sends whatever it returns.
//!
//! Identity binding is enforced here: a peer's ephemeral KEM key is accepted
//! only with a valid ML-DSA signature under the peer's long-term signing
//! key, and the signing key's fingerprint is bound to the peer through the
//! TOFU store.

mod color;
mod history;
mod identity;
mod manager;
mod tofu;

pub use color::{PALETTE, assign_colors, color_index};
pub use history::{MessageRecord, SealedHistory, open_history, seal_history};
pub use identity::{
    Identity, IdentityRecord, IdentityStore, MemoryIdentityStore, RawIdentity, WrappedIdentity,
    load_or_generate,
};
pub use manager::{EncryptedMessage, GroupKeyManager, KeyAnnouncement, Peer, RekeyContext,
    RekeyOutcome};
pub use tofu::{MemoryTofuStore, TofuRecord, TofuStatus, TofuStore, VERIFIED_TTL_MILLIS};

use thiserror::Error;

/// Errors raised by the group key manager and its identity helpers.
#[derive(Debug, Error)]
pub enum GroupError {
    /// A peer's key material has the wrong length.
    #[error("invalid {what}: expected {expected} bytes, got {got}")]
    InvalidKey {
        /// Which key failed the check.
        what: &'static str,
        /// The required length.
        expected: usize,
        /// The length received.
        got: usize,
    },
    /// The signature over a peer's KEM key does not verify.
    #[error("signature over the announced KEM key does not verify")]
    InvalidSignature,
    /// The signing-key fingerprint is already bound to another identity.
    #[error("fingerprint {fingerprint} conflicts with an existing trust record")]
    TofuConflict {
        /// The conflicting fingerprint.
        fingerprint: String,
    },
    /// The referenced peer is not in the registry.
    #[error("unknown peer {0:?}")]
    UnknownPeer(String),
    /// No tree state exists yet for this operation.
    #[error("not in a group yet")]
    NotInGroup,
    /// A TreeKEM operation failed.
    #[error(transparent)]
    Tree(#[from] treekem::TreeError),
    /// A chain operation failed.
    #[error(transparent)]
    Chain(#[from] chain::ChainError),
    /// The local tree is in a state no commit can be built from.
    #[error("rekey failed: {0}")]
    RekeyFailed(&'static str),
    /// A wrapped identity was loaded without a password.
    #[error("the stored identity is password-wrapped")]
    PasswordRequired,
    /// The password failed to unwrap the stored identity.
    #[error("the password does not unwrap the stored identity")]
    InvalidPassword,
    /// A persisted record could not be encoded or decoded.
    #[error("persistence error: {0}")]
    Persistence(String),
}
