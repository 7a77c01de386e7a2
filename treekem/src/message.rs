//! Wire representations of commits and welcomes.
//!
//! Both structures serialize to JSON with every binary field base64-encoded
//! (standard alphabet, padded); they are relayed opaquely by the server and
//! must parse identically at every member.

use serde::{Deserialize, Serialize};

use crate::b64;

/// One rotated node on the committer's direct path.
///
/// `kem_ct`/`aead_ct` carry the node's new secret sealed to the copath
/// resolution; both are empty when the copath subtree is entirely blank and
/// there was nobody to seal to.
#[derive(Clone, Serialize, Deserialize)]
pub struct CommitPathNode {
    /// Index of the rotated node in the flat tree array.
    pub node_index: usize,
    /// The node's replacement KEM public key.
    #[serde(with = "b64")]
    pub new_pk: Vec<u8>,
    /// KEM encapsulation to the copath resolution; empty if skipped.
    #[serde(with = "b64")]
    pub kem_ct: Vec<u8>,
    /// The node secret sealed under the wrap key; empty if skipped.
    #[serde(with = "b64")]
    pub aead_ct: Vec<u8>,
}

impl CommitPathNode {
    /// The sealed secret, if this entry carries one.
    pub(crate) fn sealed(&self) -> Option<(&[u8], &[u8])> {
        if self.kem_ct.is_empty() {
            None
        } else {
            Some((&self.kem_ct, &self.aead_ct))
        }
    }
}

/// A key rotation along one member's direct path.
///
/// Applied atomically by every member; advances the epoch by exactly one.
#[derive(Clone, Serialize, Deserialize)]
pub struct Commit {
    /// Leaf position of the committing member.
    pub committer_leaf_pos: usize,
    /// The committer's replacement leaf public key.
    #[serde(with = "b64")]
    pub new_leaf_pk: Vec<u8>,
    /// Rotated path nodes, ordered leaf to root.
    pub path: Vec<CommitPathNode>,
    /// The epoch this commit establishes (previous epoch + 1).
    pub epoch: u64,
}

/// One path secret handed to a joiner.
#[derive(Clone, Serialize, Deserialize)]
pub struct WelcomePathSecret {
    /// Index of the node this secret belongs to.
    pub node_index: usize,
    /// KEM encapsulation to the joiner's announced public key.
    #[serde(with = "b64")]
    pub kem_ct: Vec<u8>,
    /// The node secret sealed under the wrap key.
    #[serde(with = "b64")]
    pub aead_ct: Vec<u8>,
}

/// A targeted message initializing a joiner's view of the tree.
#[derive(Clone, Serialize, Deserialize)]
pub struct Welcome {
    /// Public key of every node, `null` where the node is blank. The
    /// joiner's own leaf slot carries the key the joiner announced.
    #[serde(with = "b64_opt_vec")]
    pub tree_public_keys: Vec<Option<Vec<u8>>>,
    /// Leaf count of the tree at this epoch.
    pub num_leaves: usize,
    /// The leaf position assigned to the joiner.
    pub my_leaf_pos: usize,
    /// At least one secret on the joiner's direct path, lowest first.
    pub path_secrets: Vec<WelcomePathSecret>,
    /// The epoch the joiner enters at.
    pub epoch: u64,
}

/// Adapter for `Vec<Option<Vec<u8>>>` with base64 elements; blanks map to
/// JSON `null`.
mod b64_opt_vec {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

    pub(super) fn serialize<S>(items: &[Option<Vec<u8>>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: Vec<Option<String>> = items
            .iter()
            .map(|item| item.as_ref().map(|bytes| STANDARD.encode(bytes)))
            .collect();
        encoded.serialize(serializer)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Option<Vec<u8>>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Vec<Option<String>> = Vec::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|item| {
                item.map(|s| STANDARD.decode(&s).map_err(D::Error::custom))
                    .transpose()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_json_shape() {
        let commit = Commit {
            committer_leaf_pos: 0,
            new_leaf_pk: vec![1, 2, 3],
            path: vec![CommitPathNode {
                node_index: 1,
                new_pk: vec![4, 5],
                kem_ct: vec![],
                aead_ct: vec![],
            }],
            epoch: 3,
        };
        let json: serde_json::Value = serde_json::from_str(
            &serde_json::to_string(&commit).unwrap(),
        )
        .unwrap();
        assert_eq!(json["committer_leaf_pos"], 0);
        assert_eq!(json["new_leaf_pk"], "AQID");
        assert_eq!(json["path"][0]["node_index"], 1);
        assert_eq!(json["path"][0]["kem_ct"], "");
        assert_eq!(json["epoch"], 3);
    }

    #[test]
    fn test_commit_roundtrip() {
        let commit = Commit {
            committer_leaf_pos: 2,
            new_leaf_pk: vec![9; 1184],
            path: vec![CommitPathNode {
                node_index: 5,
                new_pk: vec![8; 1184],
                kem_ct: vec![7; 1088],
                aead_ct: vec![6; 60],
            }],
            epoch: 11,
        };
        let parsed: Commit =
            serde_json::from_str(&serde_json::to_string(&commit).unwrap()).unwrap();
        assert_eq!(parsed.committer_leaf_pos, 2);
        assert_eq!(parsed.path[0].kem_ct, commit.path[0].kem_ct);
        assert_eq!(parsed.epoch, 11);
    }

    #[test]
    fn test_welcome_blank_nodes_are_null() {
        let welcome = Welcome {
            tree_public_keys: vec![Some(vec![1]), None, Some(vec![2])],
            num_leaves: 2,
            my_leaf_pos: 1,
            path_secrets: vec![],
            epoch: 1,
        };
        let json: serde_json::Value = serde_json::from_str(
            &serde_json::to_string(&welcome).unwrap(),
        )
        .unwrap();
        assert!(json["tree_public_keys"][1].is_null());
        let parsed: Welcome =
            serde_json::from_str(&serde_json::to_string(&welcome).unwrap()).unwrap();
        assert_eq!(parsed.tree_public_keys[1], None);
        assert_eq!(parsed.tree_public_keys[2].as_deref(), Some(&[2u8][..]));
    }
}
