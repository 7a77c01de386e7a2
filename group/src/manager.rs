//! The group key manager.
//!
//! One instance per room session. It owns every piece of key material the
//! session touches and sequences all TreeKEM and chain mutations; the
//! session dispatcher above it only parses frames and sends what this layer
//! returns.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::identity::fingerprint;
use crate::{GroupError, Identity, TofuStore, color, tofu};

/// A remote participant accepted into the registry.
pub struct Peer {
    /// The peer's long-term signing key.
    pub signing_key: crypto_dsa::VerificationKey,
    /// The peer's current ephemeral KEM key.
    pub kem_key: crypto_kem::PublicKey,
    /// The peer's leaf in the tree; `None` until our first welcome reveals
    /// the layout (we may learn peers before we have tree state).
    pub leaf_pos: Option<usize>,
    /// base64 of the signing key; TOFU key and election identifier.
    pub fingerprint: String,
}

/// Our signed key announcement: the identity-binding triple every peer
/// verifies before trusting our KEM key.
pub struct KeyAnnouncement {
    /// ML-DSA verification key bytes.
    pub signing_public_key: Vec<u8>,
    /// ML-KEM public key bytes.
    pub kem_public_key: Vec<u8>,
    /// ML-DSA signature over the KEM public key.
    pub signature: Vec<u8>,
}

/// Why a rekey is being considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyContext {
    /// A peer just joined.
    Add,
    /// A peer just left.
    Remove,
    /// The periodic message-count rekey fired.
    Interval,
}

/// A sealed outbound message.
pub struct EncryptedMessage {
    /// `iv ∥ ct ∥ tag`.
    pub payload: Vec<u8>,
    /// Epoch the message belongs to.
    pub epoch: u64,
    /// The sender counter consumed.
    pub counter: u64,
}

/// Everything a rekey produces: the broadcast commit plus targeted welcomes
/// for members the commit cannot reach.
pub struct RekeyOutcome {
    /// The commit to broadcast.
    pub commit: treekem::Commit,
    /// `(peer_id, welcome)` pairs to send individually.
    pub welcomes: Vec<(String, treekem::Welcome)>,
}

/// Owner of the signing identity, KEM keypair, peer registry, tree, and
/// chains for one room session.
pub struct GroupKeyManager {
    identity: Identity,
    kem_secret: crypto_kem::SecretKey,
    kem_public: crypto_kem::PublicKey,
    room_id: String,
    self_id: Option<String>,
    peers: HashMap<String, Peer>,
    tree: Option<treekem::RatchetTree>,
    chains: Option<chain::EpochChains>,
    tofu: Box<dyn TofuStore>,
}

impl GroupKeyManager {
    /// Creates a manager with a fresh ephemeral KEM keypair.
    pub fn new(identity: Identity, tofu: Box<dyn TofuStore>, room_id: &str) -> Self {
        let (kem_secret, kem_public) = crypto_kem::generate_key_pair();
        Self {
            identity,
            kem_secret,
            kem_public,
            room_id: room_id.to_string(),
            self_id: None,
            peers: HashMap::new(),
            tree: None,
            chains: None,
            tofu,
        }
    }

    /// Records the server-assigned participant identifier.
    pub fn set_self_id(&mut self, peer_id: &str) {
        self.self_id = Some(peer_id.to_string());
    }

    /// The server-assigned identifier, once known.
    pub fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }

    /// Our identity fingerprint.
    pub fn fingerprint(&self) -> String {
        self.identity.fingerprint()
    }

    /// Whether tree state has been established.
    pub fn has_tree(&self) -> bool {
        self.tree.is_some()
    }

    /// The current epoch, once tree state exists.
    pub fn epoch(&self) -> Option<u64> {
        self.tree.as_ref().map(treekem::RatchetTree::epoch)
    }

    /// Identifiers of all registered peers.
    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Deterministic display colors for everyone, keyed by fingerprint.
    pub fn colors(&self) -> HashMap<String, &'static str> {
        let own_fp = self.identity.fingerprint();
        let own_key = self.identity.verification_key().as_bytes().to_vec();
        let mut entries: Vec<(String, Vec<u8>)> = vec![(own_fp, own_key)];
        for peer in self.peers.values() {
            entries.push((
                peer.fingerprint.clone(),
                peer.signing_key.as_bytes().to_vec(),
            ));
        }
        color::assign_colors(
            entries
                .iter()
                .map(|(fp, key)| (fp.as_str(), key.as_slice())),
        )
    }

    /// Our signed key announcement.
    pub fn announce(&self) -> KeyAnnouncement {
        let kem_public_key = self.kem_public.as_bytes().to_vec();
        let signature = self.identity.sign(&kem_public_key);
        KeyAnnouncement {
            signing_public_key: self.identity.verification_key().as_bytes().to_vec(),
            kem_public_key,
            signature: signature.as_bytes().to_vec(),
        }
    }

    /// Initializes the single-leaf tree of a room creator and seeds the
    /// creator's own chain.
    pub fn create_as_creator(&mut self) -> Result<(), GroupError> {
        let self_id = self
            .self_id
            .clone()
            .ok_or(GroupError::RekeyFailed("session id not assigned"))?;
        let tree =
            treekem::RatchetTree::create_for_creator(self.kem_secret.clone(), self.kem_public.clone());
        let group_key = tree
            .group_key()
            .ok_or(GroupError::RekeyFailed("creator tree has no root secret"))?;
        self.chains = Some(chain::EpochChains::start(
            tree.epoch(),
            &group_key,
            &self_id,
            std::iter::empty::<&str>(),
        ));
        self.tree = Some(tree);
        Ok(())
    }

    /// Admits a peer after the four identity checks.
    ///
    /// In order: signing-key length, KEM-key length, signature over the KEM
    /// key, TOFU binding. Only then is the peer installed in the registry
    /// and, when tree state exists, given a leaf. Any failure leaves the
    /// registry and tree untouched.
    pub fn add_peer(
        &mut self,
        peer_id: &str,
        signing_pk: &[u8],
        kem_pk: &[u8],
        sig: &[u8],
        now_millis: u128,
    ) -> Result<(), GroupError> {
        if signing_pk.len() != crypto_dsa::VERIFICATION_KEY_SIZE {
            return Err(GroupError::InvalidKey {
                what: "signing key",
                expected: crypto_dsa::VERIFICATION_KEY_SIZE,
                got: signing_pk.len(),
            });
        }
        if kem_pk.len() != crypto_kem::PUBLIC_KEY_SIZE {
            return Err(GroupError::InvalidKey {
                what: "KEM key",
                expected: crypto_kem::PUBLIC_KEY_SIZE,
                got: kem_pk.len(),
            });
        }
        let signing_key = crypto_dsa::VerificationKey::try_from(signing_pk)
            .expect("length was checked above");
        let signature =
            crypto_dsa::Signature::try_from(sig).map_err(|_| GroupError::InvalidSignature)?;
        if !crypto_dsa::verify(&signing_key, kem_pk, &signature) {
            return Err(GroupError::InvalidSignature);
        }
        let peer_fingerprint = fingerprint(signing_pk);
        if !tofu::check_and_record(
            self.tofu.as_mut(),
            &self.room_id,
            &peer_fingerprint,
            peer_id,
            now_millis,
        ) {
            return Err(GroupError::TofuConflict {
                fingerprint: peer_fingerprint,
            });
        }

        if self.peers.contains_key(peer_id) {
            debug!(peer_id, "peer re-announced; keeping existing registry entry");
            return Ok(());
        }

        let kem_key =
            crypto_kem::PublicKey::try_from(kem_pk).expect("length was checked above");
        let leaf_pos = match self.tree.as_mut() {
            Some(tree) => Some(tree.add_leaf(kem_key.clone())?),
            None => None,
        };
        self.peers.insert(
            peer_id.to_string(),
            Peer {
                signing_key,
                kem_key,
                leaf_pos,
                fingerprint: peer_fingerprint,
            },
        );
        Ok(())
    }

    /// Removes a peer: registry entry, chains, and tree leaf.
    pub fn remove_peer(&mut self, peer_id: &str) -> Result<(), GroupError> {
        let peer = self
            .peers
            .remove(peer_id)
            .ok_or_else(|| GroupError::UnknownPeer(peer_id.to_string()))?;
        if let (Some(tree), Some(leaf_pos)) = (self.tree.as_mut(), peer.leaf_pos) {
            tree.remove_leaf(leaf_pos)?;
        }
        if let Some(chains) = self.chains.as_mut() {
            chains.remove_sender(peer_id);
        }
        Ok(())
    }

    /// Whether we are the elected rekey initiator for this event.
    ///
    /// The initiator is the connected participant with the lexicographically
    /// smallest fingerprint. For an add, the joining peer is not eligible —
    /// only members present before the join may welcome it.
    pub fn should_initiate_rekey(
        &self,
        context: RekeyContext,
        joining_peer: Option<&str>,
    ) -> bool {
        let own = self.identity.fingerprint();
        !self.peers.iter().any(|(peer_id, peer)| {
            let excluded = context == RekeyContext::Add && joining_peer == Some(peer_id.as_str());
            !excluded && peer.fingerprint < own
        })
    }

    /// Rotates our direct path and reseeds every chain.
    ///
    /// Returns the commit to broadcast plus a targeted welcome for each
    /// member the commit cannot reach — always including `joining_peer`,
    /// which has no tree state to apply a commit to.
    pub fn initiate_rekey(
        &mut self,
        joining_peer: Option<&str>,
        now_millis: u128,
    ) -> Result<RekeyOutcome, GroupError> {
        let tree = self.tree.as_mut().ok_or(GroupError::NotInGroup)?;
        let commit = tree.generate_commit()?;

        let mut welcome_leaves = tree.leaves_needing_welcome();
        if let Some(joining) = joining_peer {
            let joining_leaf = self
                .peers
                .get(joining)
                .and_then(|peer| peer.leaf_pos)
                .ok_or_else(|| GroupError::UnknownPeer(joining.to_string()))?;
            if !welcome_leaves.contains(&joining_leaf) {
                welcome_leaves.push(joining_leaf);
            }
        }

        let mut welcomes = Vec::with_capacity(welcome_leaves.len());
        for (peer_id, peer) in &self.peers {
            if let Some(leaf_pos) = peer.leaf_pos
                && welcome_leaves.contains(&leaf_pos)
            {
                let welcome = tree.generate_welcome(leaf_pos, &peer.kem_key)?;
                welcomes.push((peer_id.clone(), welcome));
            }
        }

        self.reseed_chains(now_millis)?;
        debug!(
            epoch = self.epoch(),
            welcomes = welcomes.len(),
            "rekey committed"
        );
        Ok(RekeyOutcome { commit, welcomes })
    }

    /// Builds a targeted welcome for one peer at the current epoch.
    pub fn generate_welcome_for(&self, peer_id: &str) -> Result<treekem::Welcome, GroupError> {
        let tree = self.tree.as_ref().ok_or(GroupError::NotInGroup)?;
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| GroupError::UnknownPeer(peer_id.to_string()))?;
        let leaf_pos = peer
            .leaf_pos
            .ok_or_else(|| GroupError::UnknownPeer(peer_id.to_string()))?;
        Ok(tree.generate_welcome(leaf_pos, &peer.kem_key)?)
    }

    /// Applies a broadcast commit.
    ///
    /// Returns `false` when the commit is our own echo and nothing changed.
    /// A [`treekem::TreeError::NoPathSecret`] error means the commit was
    /// addressed past us and our targeted welcome is in flight; the caller
    /// drops the frame and waits.
    pub fn receive_commit(
        &mut self,
        commit: &treekem::Commit,
        now_millis: u128,
    ) -> Result<bool, GroupError> {
        let tree = self.tree.as_mut().ok_or(GroupError::NotInGroup)?;
        if commit.committer_leaf_pos == tree.my_leaf() {
            return Ok(false);
        }
        tree.process_commit(commit)?;
        self.reseed_chains(now_millis)?;
        Ok(true)
    }

    /// Applies a targeted welcome, replacing any existing tree state.
    ///
    /// A welcome whose epoch does not advance ours is stale and rejected;
    /// peers' leaf positions are re-learned from the welcome's snapshot.
    pub fn receive_welcome(
        &mut self,
        welcome: &treekem::Welcome,
        now_millis: u128,
    ) -> Result<(), GroupError> {
        if let Some(tree) = &self.tree
            && welcome.epoch <= tree.epoch()
        {
            return Err(GroupError::Tree(treekem::TreeError::StaleCommit {
                current: tree.epoch(),
                got: welcome.epoch,
            }));
        }
        let tree = treekem::RatchetTree::from_welcome(
            welcome,
            self.kem_secret.clone(),
            self.kem_public.clone(),
        )?;
        for peer in self.peers.values_mut() {
            peer.leaf_pos = (0..tree.num_leaves())
                .find(|&leaf| tree.leaf_public_key(leaf) == Some(&peer.kem_key));
            if peer.leaf_pos.is_none() {
                warn!(fingerprint = %peer.fingerprint, "peer missing from welcomed tree");
            }
        }
        self.tree = Some(tree);
        self.reseed_chains(now_millis)
    }

    /// Seals a message on our own send chain.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<EncryptedMessage, GroupError> {
        let chains = self.chains.as_mut().ok_or(GroupError::NotInGroup)?;
        let (payload, counter, epoch) = chains.encrypt(plaintext);
        Ok(EncryptedMessage {
            payload,
            epoch,
            counter,
        })
    }

    /// Opens a message from `peer_id` (or our own loopback).
    pub fn decrypt(
        &mut self,
        peer_id: &str,
        payload: &[u8],
        epoch: u64,
        counter: u64,
        now_millis: u128,
    ) -> Result<Vec<u8>, GroupError> {
        if self.self_id.as_deref() != Some(peer_id) && !self.peers.contains_key(peer_id) {
            return Err(GroupError::UnknownPeer(peer_id.to_string()));
        }
        let chains = self.chains.as_mut().ok_or(GroupError::NotInGroup)?;
        Ok(chains.decrypt(peer_id, epoch, counter, payload, now_millis)?)
    }

    /// Drops all group state; key material zeroizes as it is dropped.
    pub fn close(&mut self) {
        self.tree = None;
        self.chains = None;
    }

    /// Reseeds one chain per participant from the current group key,
    /// parking the previous epoch's chains for the grace window.
    fn reseed_chains(&mut self, now_millis: u128) -> Result<(), GroupError> {
        let tree = self.tree.as_ref().ok_or(GroupError::NotInGroup)?;
        let self_id = self
            .self_id
            .clone()
            .ok_or(GroupError::RekeyFailed("session id not assigned"))?;
        let group_key = tree
            .group_key()
            .ok_or(GroupError::RekeyFailed("no root secret at reseed"))?;
        let peer_ids: Vec<&str> = self.peers.keys().map(String::as_str).collect();
        match self.chains.as_mut() {
            Some(chains) => {
                chains.advance(tree.epoch(), &group_key, &self_id, peer_ids, now_millis);
            }
            None => {
                self.chains = Some(chain::EpochChains::start(
                    tree.epoch(),
                    &group_key,
                    &self_id,
                    peer_ids,
                ));
            }
        }
        Ok(())
    }
}
