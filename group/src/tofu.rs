//! Trust-on-first-use records for peer signing keys.
//!
//! The first time a fingerprint appears in a room it is bound to that peer
//! identity with status [`TofuStatus::Unverified`]. A human can promote the
//! binding to `Verified` after comparing safety numbers out of band;
//! verified bindings demote back to unverified after thirty days. A record
//! marked [`TofuStatus::KeyChanged`], or a fingerprint re-appearing under a
//! different peer identity, blocks the peer until resolved.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How long a verified binding stays verified, in milliseconds (30 days).
pub const VERIFIED_TTL_MILLIS: u128 = 30 * 24 * 60 * 60 * 1_000;

/// Trust state of a fingerprint binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TofuStatus {
    /// Seen but never verified by a human.
    Unverified,
    /// Verified through safety-number comparison.
    Verified,
    /// The binding was invalidated; requires human resolution.
    KeyChanged,
}

/// One fingerprint binding within a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TofuRecord {
    /// The peer identity this fingerprint is bound to.
    pub peer_id: String,
    /// Current trust state.
    pub status: TofuStatus,
    /// When the fingerprint was first seen (ms since the Unix epoch).
    pub first_seen: u128,
    /// When the fingerprint was last seen.
    pub last_seen: u128,
    /// When the binding was verified, if ever.
    pub verified_at: Option<u128>,
}

/// Storage collaborator for TOFU records, keyed by room and fingerprint.
pub trait TofuStore {
    /// Loads the record for `fingerprint` in `room_id`.
    fn get(&self, room_id: &str, fingerprint: &str) -> Option<TofuRecord>;
    /// Inserts or replaces the record for `fingerprint` in `room_id`.
    fn put(&mut self, room_id: &str, fingerprint: &str, record: TofuRecord);
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryTofuStore {
    records: HashMap<(String, String), TofuRecord>,
}

impl TofuStore for MemoryTofuStore {
    fn get(&self, room_id: &str, fingerprint: &str) -> Option<TofuRecord> {
        self.records
            .get(&(room_id.to_string(), fingerprint.to_string()))
            .cloned()
    }

    fn put(&mut self, room_id: &str, fingerprint: &str, record: TofuRecord) {
        self.records
            .insert((room_id.to_string(), fingerprint.to_string()), record);
    }
}

/// Checks `fingerprint` against the store and records the sighting.
///
/// Returns `false` when the binding conflicts: the record is marked
/// `KeyChanged`, or the fingerprint is bound to a different peer. On
/// success the record is inserted or refreshed; a verified binding older
/// than [`VERIFIED_TTL_MILLIS`] demotes to unverified.
pub(crate) fn check_and_record(
    store: &mut dyn TofuStore,
    room_id: &str,
    fingerprint: &str,
    peer_id: &str,
    now_millis: u128,
) -> bool {
    match store.get(room_id, fingerprint) {
        None => {
            store.put(
                room_id,
                fingerprint,
                TofuRecord {
                    peer_id: peer_id.to_string(),
                    status: TofuStatus::Unverified,
                    first_seen: now_millis,
                    last_seen: now_millis,
                    verified_at: None,
                },
            );
            true
        }
        Some(mut record) => {
            if record.status == TofuStatus::KeyChanged || record.peer_id != peer_id {
                return false;
            }
            if record.status == TofuStatus::Verified
                && record
                    .verified_at
                    .is_none_or(|at| at + VERIFIED_TTL_MILLIS < now_millis)
            {
                record.status = TofuStatus::Unverified;
                record.verified_at = None;
            }
            record.last_seen = now_millis;
            store.put(room_id, fingerprint, record);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sighting_is_recorded_unverified() {
        let mut store = MemoryTofuStore::default();
        assert!(check_and_record(&mut store, "room", "fp-a", "peer-1", 10));
        let record = store.get("room", "fp-a").unwrap();
        assert_eq!(record.status, TofuStatus::Unverified);
        assert_eq!(record.peer_id, "peer-1");
        assert_eq!(record.first_seen, 10);
    }

    #[test]
    fn test_rebinding_to_other_peer_conflicts() {
        let mut store = MemoryTofuStore::default();
        assert!(check_and_record(&mut store, "room", "fp-a", "peer-1", 10));
        assert!(!check_and_record(&mut store, "room", "fp-a", "peer-2", 20));
        // The original record is preserved.
        assert_eq!(store.get("room", "fp-a").unwrap().peer_id, "peer-1");
    }

    #[test]
    fn test_key_changed_blocks_the_peer() {
        let mut store = MemoryTofuStore::default();
        check_and_record(&mut store, "room", "fp-a", "peer-1", 10);
        let mut record = store.get("room", "fp-a").unwrap();
        record.status = TofuStatus::KeyChanged;
        store.put("room", "fp-a", record);
        assert!(!check_and_record(&mut store, "room", "fp-a", "peer-1", 20));
    }

    #[test]
    fn test_refresh_updates_last_seen() {
        let mut store = MemoryTofuStore::default();
        check_and_record(&mut store, "room", "fp-a", "peer-1", 10);
        check_and_record(&mut store, "room", "fp-a", "peer-1", 50);
        let record = store.get("room", "fp-a").unwrap();
        assert_eq!(record.first_seen, 10);
        assert_eq!(record.last_seen, 50);
    }

    #[test]
    fn test_verified_binding_expires_after_thirty_days() {
        let mut store = MemoryTofuStore::default();
        check_and_record(&mut store, "room", "fp-a", "peer-1", 0);
        let mut record = store.get("room", "fp-a").unwrap();
        record.status = TofuStatus::Verified;
        record.verified_at = Some(0);
        store.put("room", "fp-a", record);

        // Still verified just inside the window.
        check_and_record(&mut store, "room", "fp-a", "peer-1", VERIFIED_TTL_MILLIS);
        assert_eq!(
            store.get("room", "fp-a").unwrap().status,
            TofuStatus::Verified
        );

        // Demoted once the window passes.
        check_and_record(&mut store, "room", "fp-a", "peer-1", VERIFIED_TTL_MILLIS + 1);
        let record = store.get("room", "fp-a").unwrap();
        assert_eq!(record.status, TofuStatus::Unverified);
        assert_eq!(record.verified_at, None);
    }

    #[test]
    fn test_rooms_are_isolated() {
        let mut store = MemoryTofuStore::default();
        assert!(check_and_record(&mut store, "room-1", "fp-a", "peer-1", 0));
        assert!(check_and_record(&mut store, "room-2", "fp-a", "peer-9", 0));
    }
}
