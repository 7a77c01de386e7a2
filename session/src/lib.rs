//! The session state machine.
//!
//! A single-threaded cooperative dispatcher over the server transport: each
//! inbound frame is handled to completion, producing zero or more outbound
//! frames and shell-facing events before the next frame is dequeued. All key
//! material lives in the [`group::GroupKeyManager`] this layer drives.
//!
//! Protocol-level failures (stale commits, out-of-window epochs, replayed
//! counters, forged frames) drop the offending frame and keep the session
//! alive; only local inconsistencies tear the session down.

mod session;
mod wire;

pub use session::{
    Dispatch, RoomsApi, Session, SessionConfig, SessionEvent, Transport, pump,
};
pub use wire::{ClientFrame, ServerFrame};

use thiserror::Error;

/// Fatal session errors. Everything recoverable is handled internally.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A key-management operation failed in a way the session cannot
    /// recover from locally.
    #[error(transparent)]
    Group(#[from] group::GroupError),
    /// An outbound frame could not be encoded.
    #[error("failed to encode outbound frame: {0}")]
    Encode(String),
    /// The transport refused an outbound frame.
    #[error("transport send failed: {0}")]
    Transport(String),
}
