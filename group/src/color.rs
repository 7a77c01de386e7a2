//! Deterministic display colors for participants.
//!
//! Every client derives the same color for the same signing key, so a peer
//! looks identical on every screen without any coordination. The base index
//! comes from a SHA-256 of the signing public key; when two keys land on the
//! same palette slot, fingerprints are assigned in lexicographic order and a
//! colliding key walks forward to the next free slot.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

/// Display palette; one entry per possible room member.
pub const PALETTE: [&str; 16] = [
    "#e06c75", "#98c379", "#e5c07b", "#61afef", "#c678dd", "#56b6c2", "#d19a66", "#7f848e",
    "#ef596f", "#a9dc76", "#ffd866", "#78dce8", "#ab9df2", "#fc9867", "#82aaff", "#c3e88d",
];

/// Base palette index for a signing public key.
pub fn color_index(signing_public_key: &[u8]) -> usize {
    let digest = Sha256::digest(signing_public_key);
    digest[0] as usize % PALETTE.len()
}

/// Assigns a distinct color to every fingerprint.
///
/// `fingerprints` maps fingerprint → signing public key bytes. Assignment
/// order is the lexicographic order of fingerprints, so all honest clients
/// resolve collisions identically.
pub fn assign_colors<'a>(
    fingerprints: impl IntoIterator<Item = (&'a str, &'a [u8])>,
) -> HashMap<String, &'static str> {
    let mut ordered: Vec<(&str, &[u8])> = fingerprints.into_iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    let mut taken = [false; PALETTE.len()];
    let mut assigned = HashMap::with_capacity(ordered.len());
    for (fingerprint, key) in ordered {
        let mut index = color_index(key);
        while taken[index] {
            index = (index + 1) % PALETTE.len();
        }
        taken[index] = true;
        assigned.insert(fingerprint.to_string(), PALETTE[index]);
    }
    assigned
}
