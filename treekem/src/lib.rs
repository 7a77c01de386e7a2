//! TreeKEM group key agreement.
//!
//! A left-balanced binary tree of ephemeral ML-KEM-768 keypairs whose root
//! secret is the group's shared secret. Membership changes and periodic
//! rekeys travel as [`Commit`] messages that rotate one member's direct
//! path; joiners (and members a commit cannot reach) are initialized with
//! targeted [`Welcome`] messages. Both message types serialize to JSON with
//! base64 binary fields and are relayed opaquely by the server.
//!
//! The tree exposes only index-based operations; key ownership, peer
//! identity, and signature checks live a layer up in the group key manager.

mod b64;
pub mod math;
mod message;
mod secrets;
mod tree;

pub use message::{Commit, CommitPathNode, Welcome, WelcomePathSecret};
pub use tree::{MAX_LEAVES, RatchetTree, TreeError};
