//! The ratchet tree: group key agreement state for one member.
//!
//! A left-balanced binary tree of ML-KEM keypairs stored as a flat node
//! array. Leaves belong to members; the root secret is the group secret.
//! Commits rotate every node on the committer's direct path and seal the new
//! secrets toward the copath; welcomes hand a joiner (or a member the commit
//! could not reach) a full snapshot plus one path secret.
//!
//! Only the member that generated a node's keypair holds its secret key.
//! A member can therefore open a commit entry only when the entry was sealed
//! to a node it holds the key for — in practice its own leaf. The committer
//! uses [`RatchetTree::leaves_needing_welcome`] to find members outside that
//! set and follows the commit with targeted welcomes to them.

use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::math;
use crate::message::{Commit, CommitPathNode, Welcome, WelcomePathSecret};
use crate::secrets;

/// Hard cap on the number of leaf slots (room size).
pub const MAX_LEAVES: usize = 16;

/// Errors raised by tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The tree already holds [`MAX_LEAVES`] leaf slots.
    #[error("room is full: the tree already holds {MAX_LEAVES} leaves")]
    RoomFull,
    /// A commit whose epoch is not exactly one past the local epoch.
    #[error("commit for epoch {got} cannot apply at epoch {current}")]
    StaleCommit {
        /// The local epoch at rejection time.
        current: u64,
        /// The epoch carried by the commit.
        got: u64,
    },
    /// Structurally invalid key material or indices.
    #[error("malformed tree message: {0}")]
    Malformed(&'static str),
    /// A sealed path secret failed to unwrap under our key.
    #[error("path secret failed to unwrap")]
    DecapFailed,
    /// No entry in the commit (or welcome) is addressed to a key we hold.
    #[error("no path secret is decryptable from this leaf")]
    NoPathSecret,
}

/// One slot in the flat node array. Any field may be blank.
#[derive(Default)]
struct Node {
    public_key: Option<crypto_kem::PublicKey>,
    secret_key: Option<crypto_kem::SecretKey>,
    secret: Option<Zeroizing<[u8; 32]>>,
}

impl Node {
    fn blank() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        self.public_key = None;
        self.clear_secrets();
    }

    fn clear_secrets(&mut self) {
        self.secret_key = None;
        self.secret = None;
    }
}

/// One member's view of the group's ratchet tree.
pub struct RatchetTree {
    nodes: Vec<Node>,
    num_leaves: usize,
    my_leaf: usize,
    epoch: u64,
}

impl RatchetTree {
    /// Creates the one-leaf tree of a room creator.
    ///
    /// The creator sits at leaf 0; the leaf secret doubles as the root
    /// secret until the first commit grows the tree.
    pub fn create_for_creator(
        secret_key: crypto_kem::SecretKey,
        public_key: crypto_kem::PublicKey,
    ) -> Self {
        let mut leaf_secret = [0u8; 32];
        crypto_rng::fill_buffer(&mut leaf_secret);
        let leaf = Node {
            public_key: Some(public_key),
            secret_key: Some(secret_key),
            secret: Some(Zeroizing::new(leaf_secret)),
        };
        leaf_secret.zeroize();
        Self {
            nodes: vec![leaf],
            num_leaves: 1,
            my_leaf: 0,
            epoch: 0,
        }
    }

    /// The current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Our own leaf position.
    pub fn my_leaf(&self) -> usize {
        self.my_leaf
    }

    /// The number of leaf slots, including blanked ones.
    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    /// The public key installed at `leaf_pos`, if the slot is occupied.
    pub fn leaf_public_key(&self, leaf_pos: usize) -> Option<&crypto_kem::PublicKey> {
        self.nodes.get(2 * leaf_pos)?.public_key.as_ref()
    }

    /// The current root secret, if one has been established.
    pub fn root_secret(&self) -> Option<&[u8; 32]> {
        self.nodes[math::root(self.num_leaves)]
            .secret
            .as_ref()
            .map(|secret| &**secret)
    }

    /// The 256-bit group key derived from the root secret.
    pub fn group_key(&self) -> Option<Zeroizing<[u8; 32]>> {
        self.root_secret()
            .map(|secret| Zeroizing::new(crypto_kdf::derive_32(secret, secrets::TREE_ROOT_INFO)))
    }

    /// Appends a leaf for a new member and blanks its direct path.
    ///
    /// Leaf positions are append-only: removals leave permanent blank slots
    /// and positions are never renumbered, so indices stay stable for the
    /// lifetime of the room.
    pub fn add_leaf(&mut self, public_key: crypto_kem::PublicKey) -> Result<usize, TreeError> {
        if self.num_leaves == MAX_LEAVES {
            return Err(TreeError::RoomFull);
        }
        let leaf_pos = self.num_leaves;
        self.num_leaves += 1;
        // Growing by one leaf appends an internal node and the leaf itself.
        self.nodes.push(Node::blank());
        self.nodes.push(Node::blank());
        debug_assert_eq!(self.nodes.len(), math::node_width(self.num_leaves));

        self.nodes[2 * leaf_pos].public_key = Some(public_key);
        for node_index in math::direct_path(leaf_pos, self.num_leaves) {
            self.nodes[node_index].clear();
        }
        Ok(leaf_pos)
    }

    /// Blanks `leaf_pos` and every node on its direct path.
    ///
    /// `num_leaves` is not decremented; the slot stays blank.
    pub fn remove_leaf(&mut self, leaf_pos: usize) -> Result<(), TreeError> {
        if leaf_pos >= self.num_leaves {
            return Err(TreeError::Malformed("removed leaf out of range"));
        }
        if leaf_pos == self.my_leaf {
            return Err(TreeError::Malformed("cannot remove own leaf"));
        }
        self.nodes[2 * leaf_pos].clear();
        for node_index in math::direct_path(leaf_pos, self.num_leaves) {
            self.nodes[node_index].clear();
        }
        Ok(())
    }

    /// Rotates every node on our direct path and advances the epoch.
    ///
    /// Each path node gets a fresh random secret chain entry and a fresh
    /// keypair; the node secret is sealed to the resolution of the copath
    /// sibling. A fully blank copath subtree yields an empty entry — its
    /// future occupants are reached by targeted welcomes instead.
    pub fn generate_commit(&mut self) -> Result<Commit, TreeError> {
        let n = self.num_leaves;
        let my_node = 2 * self.my_leaf;

        let mut leaf_secret = [0u8; 32];
        crypto_rng::fill_buffer(&mut leaf_secret);
        let (leaf_sk, leaf_pk) = crypto_kem::generate_key_pair();
        let new_leaf_pk = leaf_pk.as_bytes().to_vec();
        self.nodes[my_node].public_key = Some(leaf_pk);
        self.nodes[my_node].secret_key = Some(leaf_sk);
        self.nodes[my_node].secret = Some(Zeroizing::new(leaf_secret));

        let mut prev = leaf_secret;
        leaf_secret.zeroize();

        let dp = math::direct_path(self.my_leaf, n);
        let cop = math::copath(self.my_leaf, n);
        let mut path = Vec::with_capacity(dp.len());
        for (&node_index, &cop_node) in dp.iter().zip(&cop) {
            let secret = crypto_kdf::derive_32(&prev, secrets::TREE_NODE_INFO);
            let (sk, pk) = crypto_kem::generate_key_pair();
            let new_pk = pk.as_bytes().to_vec();
            let (kem_ct, aead_ct) = match self.resolve(cop_node) {
                Some(target) => {
                    let target_pk = self.nodes[target]
                        .public_key
                        .as_ref()
                        .expect("resolved nodes carry a public key");
                    secrets::seal_path_secret(target_pk, &secret)
                }
                None => (Vec::new(), Vec::new()),
            };
            self.nodes[node_index].public_key = Some(pk);
            self.nodes[node_index].secret_key = Some(sk);
            self.nodes[node_index].secret = Some(Zeroizing::new(secret));
            path.push(CommitPathNode {
                node_index,
                new_pk,
                kem_ct,
                aead_ct,
            });
            prev = secret;
        }
        prev.zeroize();

        self.epoch += 1;
        Ok(Commit {
            committer_leaf_pos: self.my_leaf,
            new_leaf_pk,
            path,
            epoch: self.epoch,
        })
    }

    /// Applies another member's commit and returns the new root secret.
    ///
    /// Rejects commits whose epoch is not exactly `current + 1`. The tree is
    /// left untouched on every error path, including [`TreeError::NoPathSecret`]
    /// — the caller then waits for the committer's targeted welcome.
    pub fn process_commit(&mut self, commit: &Commit) -> Result<Zeroizing<[u8; 32]>, TreeError> {
        if commit.epoch != self.epoch + 1 {
            return Err(TreeError::StaleCommit {
                current: self.epoch,
                got: commit.epoch,
            });
        }
        let n = self.num_leaves;
        if commit.committer_leaf_pos >= n {
            return Err(TreeError::Malformed("committer leaf out of range"));
        }
        if commit.committer_leaf_pos == self.my_leaf {
            return Err(TreeError::Malformed("commit from our own leaf"));
        }
        let dp = math::direct_path(commit.committer_leaf_pos, n);
        if commit.path.len() != dp.len() {
            return Err(TreeError::Malformed("path length mismatch"));
        }

        // Parse every key up front so a bad commit cannot leave the tree
        // half-mutated.
        let leaf_pk = crypto_kem::PublicKey::try_from(commit.new_leaf_pk.as_slice())
            .map_err(|_| TreeError::Malformed("leaf public key length"))?;
        let mut path_pks = Vec::with_capacity(commit.path.len());
        for (entry, &expected) in commit.path.iter().zip(&dp) {
            if entry.node_index != expected {
                return Err(TreeError::Malformed("path node off the direct path"));
            }
            let pk = crypto_kem::PublicKey::try_from(entry.new_pk.as_slice())
                .map_err(|_| TreeError::Malformed("path public key length"))?;
            path_pks.push(pk);
        }

        // Exactly one copath subtree contains our leaf; open its entry if it
        // was sealed to a key we hold.
        let cop = math::copath(commit.committer_leaf_pos, n);
        let mut opened: Option<(usize, Zeroizing<[u8; 32]>)> = None;
        for (i, entry) in commit.path.iter().enumerate() {
            if !math::subtree_contains(cop[i], self.my_leaf) {
                continue;
            }
            let Some((kem_ct, aead_ct)) = entry.sealed() else {
                break;
            };
            let Some(target) = self.resolve(cop[i]) else {
                break;
            };
            let Some(sk) = self.nodes[target].secret_key.as_ref() else {
                break;
            };
            let secret = secrets::open_path_secret(sk, kem_ct, aead_ct)?;
            opened = Some((i, secret));
            break;
        }
        let (entry_index, entry_secret) = opened.ok_or(TreeError::NoPathSecret)?;

        // Install the rotated public keys and drop any stale secrets on
        // those nodes.
        self.nodes[2 * commit.committer_leaf_pos].public_key = Some(leaf_pk);
        self.nodes[2 * commit.committer_leaf_pos].clear_secrets();
        for (entry, pk) in commit.path.iter().zip(path_pks) {
            self.nodes[entry.node_index].public_key = Some(pk);
            self.nodes[entry.node_index].clear_secrets();
        }

        // Derive upward from the entry point to the root.
        let mut current = *entry_secret;
        self.nodes[dp[entry_index]].secret = Some(entry_secret);
        for &node_index in &dp[entry_index + 1..] {
            current = crypto_kdf::derive_32(&current, secrets::TREE_NODE_INFO);
            self.nodes[node_index].secret = Some(Zeroizing::new(current));
        }
        current.zeroize();

        self.epoch = commit.epoch;
        let root = self.nodes[math::root(n)]
            .secret
            .clone()
            .expect("the derivation chain ends at the root");
        Ok(root)
    }

    /// Builds a targeted welcome for the member at `leaf_pos`.
    ///
    /// Snapshots every non-blank public key (with the target's announced key
    /// in its own slot) and seals the lowest secret we know on the target's
    /// direct path. Called by the committer right after
    /// [`generate_commit`](Self::generate_commit), so the embedded epoch is
    /// the commit's epoch.
    pub fn generate_welcome(
        &self,
        leaf_pos: usize,
        leaf_public_key: &crypto_kem::PublicKey,
    ) -> Result<Welcome, TreeError> {
        let n = self.num_leaves;
        if leaf_pos >= n {
            return Err(TreeError::Malformed("welcome leaf out of range"));
        }
        let mut tree_public_keys: Vec<Option<Vec<u8>>> = self
            .nodes
            .iter()
            .map(|node| {
                node.public_key
                    .as_ref()
                    .map(|pk| pk.as_bytes().to_vec())
            })
            .collect();
        tree_public_keys[2 * leaf_pos] = Some(leaf_public_key.as_bytes().to_vec());

        let mut path_secrets = Vec::new();
        for node_index in math::direct_path(leaf_pos, n) {
            if let Some(secret) = &self.nodes[node_index].secret {
                let (kem_ct, aead_ct) = secrets::seal_path_secret(leaf_public_key, secret);
                path_secrets.push(WelcomePathSecret {
                    node_index,
                    kem_ct,
                    aead_ct,
                });
                break;
            }
        }
        if path_secrets.is_empty() {
            return Err(TreeError::NoPathSecret);
        }

        Ok(Welcome {
            tree_public_keys,
            num_leaves: n,
            my_leaf_pos: leaf_pos,
            path_secrets,
            epoch: self.epoch,
        })
    }

    /// Builds a tree from a targeted welcome.
    ///
    /// `secret_key`/`public_key` are the receiving member's own KEM keypair;
    /// the first path secret must unwrap under it.
    pub fn from_welcome(
        welcome: &Welcome,
        secret_key: crypto_kem::SecretKey,
        public_key: crypto_kem::PublicKey,
    ) -> Result<Self, TreeError> {
        let n = welcome.num_leaves;
        if n == 0 || n > MAX_LEAVES {
            return Err(TreeError::Malformed("leaf count out of range"));
        }
        if welcome.tree_public_keys.len() != math::node_width(n) {
            return Err(TreeError::Malformed("tree width mismatch"));
        }
        if welcome.my_leaf_pos >= n {
            return Err(TreeError::Malformed("assigned leaf out of range"));
        }

        let entry = welcome
            .path_secrets
            .first()
            .ok_or(TreeError::Malformed("welcome carries no path secret"))?;
        let dp = math::direct_path(welcome.my_leaf_pos, n);
        let entry_index = dp
            .iter()
            .position(|&x| x == entry.node_index)
            .ok_or(TreeError::Malformed("path secret off the direct path"))?;
        let entry_secret = secrets::open_path_secret(&secret_key, &entry.kem_ct, &entry.aead_ct)?;

        let mut nodes = Vec::with_capacity(welcome.tree_public_keys.len());
        for advertised in &welcome.tree_public_keys {
            let public_key = advertised
                .as_deref()
                .map(crypto_kem::PublicKey::try_from)
                .transpose()
                .map_err(|_| TreeError::Malformed("advertised public key length"))?;
            nodes.push(Node {
                public_key,
                ..Node::blank()
            });
        }
        let my_node = 2 * welcome.my_leaf_pos;
        nodes[my_node].public_key = Some(public_key);
        nodes[my_node].secret_key = Some(secret_key);

        let mut tree = Self {
            nodes,
            num_leaves: n,
            my_leaf: welcome.my_leaf_pos,
            epoch: welcome.epoch,
        };
        let mut current = *entry_secret;
        tree.nodes[dp[entry_index]].secret = Some(entry_secret);
        for &node_index in &dp[entry_index + 1..] {
            current = crypto_kdf::derive_32(&current, secrets::TREE_NODE_INFO);
            tree.nodes[node_index].secret = Some(Zeroizing::new(current));
        }
        current.zeroize();
        Ok(tree)
    }

    /// Occupied leaves that cannot open our latest commit and must be sent a
    /// targeted welcome.
    ///
    /// A member can open a commit entry only when the entry's seal target is
    /// its own leaf; anyone else under that copath subtree is unreachable.
    pub fn leaves_needing_welcome(&self) -> Vec<usize> {
        let n = self.num_leaves;
        let mut uncovered = Vec::new();
        for cop_node in math::copath(self.my_leaf, n) {
            let target = self.resolve(cop_node);
            for leaf in 0..n {
                if leaf == self.my_leaf || self.nodes[2 * leaf].public_key.is_none() {
                    continue;
                }
                if !math::subtree_contains(cop_node, leaf) {
                    continue;
                }
                if target != Some(2 * leaf) {
                    uncovered.push(leaf);
                }
            }
        }
        uncovered
    }

    /// Effective key-holding node for a possibly blank subtree: the node
    /// itself when keyed, otherwise its leftmost non-blank descendant.
    fn resolve(&self, index: usize) -> Option<usize> {
        if self.nodes[index].public_key.is_some() {
            return Some(index);
        }
        if math::is_leaf(index) {
            return None;
        }
        self.resolve(math::left_child(index))
            .or_else(|| self.resolve(math::right_child(index, self.num_leaves)))
    }
}
