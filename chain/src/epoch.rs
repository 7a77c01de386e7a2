//! Chain sets across epoch boundaries.

use std::collections::HashMap;

use tracing::debug;

use crate::{Chain, ChainError};

/// How long after a rekey the previous epoch's chains stay decryptable, in
/// milliseconds.
pub const GRACE_WINDOW_MILLIS: u128 = 30_000;

struct PreviousEpoch {
    epoch: u64,
    receive: HashMap<String, Chain>,
    expires_at_millis: u128,
}

/// One participant's chain state for an epoch: a send chain for our own
/// messages and one receive chain per participant, ourselves included (the
/// server echoes our broadcasts back to us). Send and self-receive chains
/// are seeded identically, so our echoes decrypt like anyone else's
/// messages.
///
/// A commit is a barrier: messages from `current − 1` decrypt while the
/// grace window is open, anything older or newer fails
/// [`ChainError::EpochOutOfWindow`]. The expiry check runs lazily on every
/// decrypt and can also be driven explicitly via
/// [`expire_previous`](Self::expire_previous); dropping twice is a no-op.
pub struct EpochChains {
    epoch: u64,
    send: Chain,
    receive: HashMap<String, Chain>,
    previous: Option<PreviousEpoch>,
}

impl EpochChains {
    /// Seeds chains for a fresh epoch: our send chain plus receive chains
    /// for ourselves and every peer.
    pub fn start<'a>(
        epoch: u64,
        group_key: &[u8; 32],
        self_id: &str,
        peer_ids: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            epoch,
            send: Chain::seed(group_key, self_id),
            receive: Self::seed_receive(group_key, self_id, peer_ids),
            previous: None,
        }
    }

    /// The epoch these chains are seeded for.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether previous-epoch chains are still being retained.
    pub fn previous_active(&self) -> bool {
        self.previous.is_some()
    }

    /// Moves to a new epoch: the current receive chains are parked for the
    /// grace window and every chain is reseeded from the new group key.
    pub fn advance<'a>(
        &mut self,
        epoch: u64,
        group_key: &[u8; 32],
        self_id: &str,
        peer_ids: impl IntoIterator<Item = &'a str>,
        now_millis: u128,
    ) {
        let parked = std::mem::replace(
            &mut self.receive,
            Self::seed_receive(group_key, self_id, peer_ids),
        );
        self.previous = Some(PreviousEpoch {
            epoch: self.epoch,
            receive: parked,
            expires_at_millis: now_millis + GRACE_WINDOW_MILLIS,
        });
        self.send = Chain::seed(group_key, self_id);
        self.epoch = epoch;
    }

    /// Drops the previous epoch's chains once their window has passed.
    pub fn expire_previous(&mut self, now_millis: u128) {
        if let Some(previous) = &self.previous
            && now_millis >= previous.expires_at_millis
        {
            debug!(epoch = previous.epoch, "previous-epoch chains expired");
            self.previous = None;
        }
    }

    /// Drops `sender_id`'s receive chains in every retained epoch, e.g.
    /// when the peer leaves the room.
    pub fn remove_sender(&mut self, sender_id: &str) {
        self.receive.remove(sender_id);
        if let Some(previous) = self.previous.as_mut() {
            previous.receive.remove(sender_id);
        }
    }

    /// Encrypts on our send chain.
    ///
    /// Returns the sealed payload, the counter consumed, and the epoch the
    /// message belongs to.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> (Vec<u8>, u64, u64) {
        let (payload, counter) = self.send.encrypt(plaintext);
        (payload, counter, self.epoch)
    }

    /// Decrypts a message from `sender_id` tagged with `epoch`/`counter`.
    pub fn decrypt(
        &mut self,
        sender_id: &str,
        epoch: u64,
        counter: u64,
        payload: &[u8],
        now_millis: u128,
    ) -> Result<Vec<u8>, ChainError> {
        self.expire_previous(now_millis);

        let receive = if epoch == self.epoch {
            &mut self.receive
        } else if let Some(previous) = self.previous.as_mut().filter(|p| p.epoch == epoch) {
            &mut previous.receive
        } else {
            return Err(ChainError::EpochOutOfWindow {
                current: self.epoch,
                got: epoch,
            });
        };
        let chain = receive
            .get_mut(sender_id)
            .ok_or_else(|| ChainError::UnknownSender(sender_id.to_string()))?;
        chain.decrypt(counter, payload)
    }

    fn seed_receive<'a>(
        group_key: &[u8; 32],
        self_id: &str,
        peer_ids: impl IntoIterator<Item = &'a str>,
    ) -> HashMap<String, Chain> {
        let mut receive: HashMap<String, Chain> = peer_ids
            .into_iter()
            .map(|id| (id.to_string(), Chain::seed(group_key, id)))
            .collect();
        receive.insert(self_id.to_string(), Chain::seed(group_key, self_id));
        receive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: [u8; 32] = [1u8; 32];
    const KEY_B: [u8; 32] = [2u8; 32];

    fn alice_and_bob(group_key: &[u8; 32]) -> (EpochChains, EpochChains) {
        (
            EpochChains::start(1, group_key, "alice", ["bob"]),
            EpochChains::start(1, group_key, "bob", ["alice"]),
        )
    }

    #[test]
    fn test_current_epoch_roundtrip() {
        let (mut alice, mut bob) = alice_and_bob(&KEY_A);
        let (payload, counter, epoch) = alice.encrypt(b"hello");
        assert_eq!(epoch, 1);
        assert_eq!(
            bob.decrypt("alice", epoch, counter, &payload, 0).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_own_echo_decrypts() {
        let (mut alice, _) = alice_and_bob(&KEY_A);
        let (payload, counter, epoch) = alice.encrypt(b"echoed");
        assert_eq!(
            alice.decrypt("alice", epoch, counter, &payload, 0).unwrap(),
            b"echoed"
        );
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let (mut alice, mut bob) = alice_and_bob(&KEY_A);
        let (payload, counter, epoch) = alice.encrypt(b"hi");
        assert!(matches!(
            bob.decrypt("mallory", epoch, counter, &payload, 0),
            Err(ChainError::UnknownSender(_))
        ));
    }

    #[test]
    fn test_previous_epoch_decrypts_within_grace_window() {
        let (mut alice, mut bob) = alice_and_bob(&KEY_A);
        let (payload, counter, epoch) = alice.encrypt(b"in flight");

        bob.advance(2, &KEY_B, "bob", ["alice"], 1_000);
        assert!(bob.previous_active());
        assert_eq!(
            bob.decrypt(
                "alice",
                epoch,
                counter,
                &payload,
                1_000 + GRACE_WINDOW_MILLIS - 1
            )
            .unwrap(),
            b"in flight"
        );
    }

    #[test]
    fn test_previous_epoch_expires_after_grace_window() {
        let (mut alice, mut bob) = alice_and_bob(&KEY_A);
        let (payload, counter, epoch) = alice.encrypt(b"too late");

        bob.advance(2, &KEY_B, "bob", ["alice"], 1_000);
        assert!(matches!(
            bob.decrypt(
                "alice",
                epoch,
                counter,
                &payload,
                1_000 + GRACE_WINDOW_MILLIS
            ),
            Err(ChainError::EpochOutOfWindow { current: 2, got: 1 })
        ));
        assert!(!bob.previous_active());
    }

    #[test]
    fn test_expire_previous_is_idempotent() {
        let (_, mut bob) = alice_and_bob(&KEY_A);
        bob.advance(2, &KEY_B, "bob", ["alice"], 0);
        bob.expire_previous(GRACE_WINDOW_MILLIS);
        assert!(!bob.previous_active());
        bob.expire_previous(GRACE_WINDOW_MILLIS + 1);
        assert!(!bob.previous_active());
    }

    #[test]
    fn test_epoch_older_than_window_rejected() {
        let (mut alice, mut bob) = alice_and_bob(&KEY_A);
        let (payload, counter, epoch) = alice.encrypt(b"ancient");
        bob.advance(2, &KEY_B, "bob", ["alice"], 0);
        bob.advance(3, &KEY_A, "bob", ["alice"], 1);
        assert!(matches!(
            bob.decrypt("alice", epoch, counter, &payload, 2),
            Err(ChainError::EpochOutOfWindow { current: 3, got: 1 })
        ));
    }

    #[test]
    fn test_future_epoch_rejected() {
        let (mut alice, mut bob) = alice_and_bob(&KEY_A);
        let (payload, counter, _) = alice.encrypt(b"from the future");
        assert!(matches!(
            bob.decrypt("alice", 7, counter, &payload, 0),
            Err(ChainError::EpochOutOfWindow { current: 1, got: 7 })
        ));
    }

    #[test]
    fn test_removed_sender_is_rejected_in_all_epochs() {
        let (mut alice, mut bob) = alice_and_bob(&KEY_A);
        let (payload, counter, epoch) = alice.encrypt(b"leftover");
        bob.advance(2, &KEY_B, "bob", std::iter::empty::<&str>(), 0);
        bob.remove_sender("alice");
        assert!(matches!(
            bob.decrypt("alice", epoch, counter, &payload, 0),
            Err(ChainError::UnknownSender(_))
        ));
    }

    #[test]
    fn test_new_epoch_reseeds_counters() {
        let (mut alice, mut bob) = alice_and_bob(&KEY_A);
        for _ in 0..3 {
            alice.encrypt(b"spin");
        }
        alice.advance(2, &KEY_B, "alice", ["bob"], 0);
        bob.advance(2, &KEY_B, "bob", ["alice"], 0);
        let (payload, counter, epoch) = alice.encrypt(b"fresh");
        assert_eq!(counter, 0);
        assert_eq!(epoch, 2);
        assert_eq!(
            bob.decrypt("alice", epoch, counter, &payload, 0).unwrap(),
            b"fresh"
        );
    }
}
