//! Frame dispatcher and rekey coordinator.

use tracing::{debug, warn};

use group::{GroupError, GroupKeyManager, RekeyContext, RekeyOutcome};

use crate::wire::{ClientFrame, ServerFrame};
use crate::SessionError;

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Automatic rekey fires after this many locally sent messages.
    pub rekey_interval: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { rekey_interval: 50 }
    }
}

/// Something the shell should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message decrypted successfully.
    Plaintext {
        /// The sender.
        peer_id: String,
        /// The decrypted body.
        plaintext: Vec<u8>,
    },
    /// A peer passed the identity checks and entered the registry.
    PeerAdmitted {
        /// The admitted peer.
        peer_id: String,
    },
    /// A peer left the room.
    PeerLeft {
        /// The departed peer.
        peer_id: String,
    },
    /// A peer failed the identity checks and was not admitted.
    PeerRejected {
        /// The rejected peer.
        peer_id: String,
        /// Human-readable rejection reason.
        reason: String,
    },
    /// A fingerprint is already bound to a different identity; a human must
    /// resolve it.
    TofuConflict {
        /// The conflicting peer.
        peer_id: String,
        /// The conflicting fingerprint.
        fingerprint: String,
    },
    /// The room reached its lifetime limit.
    RoomExpired,
    /// The room is at capacity.
    RoomFull,
}

/// The result of handling one frame: frames to send, in order, before the
/// next frame is dequeued, plus events for the shell.
#[derive(Default)]
pub struct Dispatch {
    /// Outbound frames, in send order.
    pub outbound: Vec<ClientFrame>,
    /// Shell-facing events.
    pub events: Vec<SessionEvent>,
}

impl Dispatch {
    fn event(event: SessionEvent) -> Self {
        Self {
            outbound: Vec::new(),
            events: vec![event],
        }
    }
}

/// Outbound half of the server connection.
pub trait Transport {
    /// Transport-specific send error.
    type Error: std::fmt::Display;
    /// Sends one frame to the server.
    fn send(&mut self, frame: &ClientFrame) -> Result<(), Self::Error>;
}

/// The room-management REST collaborator (`/api/rooms`).
pub trait RoomsApi {
    /// API-specific error.
    type Error: std::fmt::Display;
    /// `POST /api/rooms` → the new room id.
    fn create_room(&mut self) -> Result<String, Self::Error>;
    /// `GET /api/rooms/{id}` → whether the room exists.
    fn room_exists(&self, room_id: &str) -> Result<bool, Self::Error>;
}

/// Handles `frame` and pushes every resulting outbound frame to `transport`
/// before returning, preserving the one-frame-at-a-time cooperative model.
pub fn pump<T: Transport>(
    session: &mut Session,
    transport: &mut T,
    frame: &ServerFrame,
) -> Result<Vec<SessionEvent>, SessionError> {
    let dispatch = session.handle(frame)?;
    for outbound in &dispatch.outbound {
        transport
            .send(outbound)
            .map_err(|e| SessionError::Transport(e.to_string()))?;
    }
    Ok(dispatch.events)
}

/// One participant's session: the event dispatcher over the group key
/// manager.
pub struct Session {
    manager: GroupKeyManager,
    config: SessionConfig,
    creator_id: Option<String>,
    messages_since_rekey: u64,
}

impl Session {
    /// Wraps a key manager into a session.
    pub fn new(manager: GroupKeyManager, config: SessionConfig) -> Self {
        Self {
            manager,
            config,
            creator_id: None,
            messages_since_rekey: 0,
        }
    }

    /// Read access to the key manager (epoch, colors, fingerprints).
    pub fn manager(&self) -> &GroupKeyManager {
        &self.manager
    }

    /// The room creator's identifier, once the server has told us.
    pub fn creator_id(&self) -> Option<&str> {
        self.creator_id.as_deref()
    }

    /// Handles one server frame at the current wall-clock time.
    pub fn handle(&mut self, frame: &ServerFrame) -> Result<Dispatch, SessionError> {
        self.handle_at(frame, now_millis())
    }

    /// Deterministic variant of [`handle`](Self::handle) with an injected
    /// clock, used by tests and simulators.
    pub fn handle_at(
        &mut self,
        frame: &ServerFrame,
        now_millis: u128,
    ) -> Result<Dispatch, SessionError> {
        match frame {
            ServerFrame::Welcome {
                peer_id,
                is_creator,
                creator_id,
            } => {
                self.manager.set_self_id(peer_id);
                self.creator_id = Some(creator_id.clone());
                if *is_creator {
                    self.manager.create_as_creator()?;
                }
                let announcement = self.manager.announce();
                Ok(Dispatch {
                    outbound: vec![ClientFrame::KeyAnnounce {
                        public_key: announcement.signing_public_key,
                        pq_public_key: announcement.kem_public_key,
                        sig: announcement.signature,
                    }],
                    events: Vec::new(),
                })
            }

            ServerFrame::PeerKey {
                peer_id,
                public_key,
                pq_public_key,
                sig,
            }
            | ServerFrame::PeerJoined {
                peer_id,
                public_key,
                pq_public_key,
                sig,
            } => self.handle_peer_announcement(peer_id, public_key, pq_public_key, sig, now_millis),

            ServerFrame::PeerLeft { peer_id } => {
                if let Err(error) = self.manager.remove_peer(peer_id) {
                    debug!(%peer_id, %error, "dropping peer_left for unknown peer");
                    return Ok(Dispatch::default());
                }
                let mut dispatch = Dispatch::event(SessionEvent::PeerLeft {
                    peer_id: peer_id.clone(),
                });
                if self.manager.has_tree()
                    && self.manager.peer_count() > 0
                    && self
                        .manager
                        .should_initiate_rekey(RekeyContext::Remove, None)
                {
                    let outcome = self.manager.initiate_rekey(None, now_millis)?;
                    self.push_rekey(&mut dispatch, outcome)?;
                    self.messages_since_rekey = 0;
                }
                Ok(dispatch)
            }

            ServerFrame::TreeCommit { tree_commit } => {
                let commit: treekem::Commit = match serde_json::from_str(tree_commit) {
                    Ok(commit) => commit,
                    Err(error) => {
                        warn!(%error, "dropping unparseable tree commit");
                        return Ok(Dispatch::default());
                    }
                };
                match self.manager.receive_commit(&commit, now_millis) {
                    Ok(true) => {
                        self.messages_since_rekey = 0;
                        Ok(Dispatch::default())
                    }
                    Ok(false) => Ok(Dispatch::default()),
                    Err(error) if Self::is_recoverable(&error) => {
                        debug!(%error, "dropping tree commit");
                        Ok(Dispatch::default())
                    }
                    Err(error) => Err(error.into()),
                }
            }

            ServerFrame::TreeWelcome {
                target_peer_id,
                tree_welcome,
            } => {
                if self.manager.self_id() != Some(target_peer_id.as_str()) {
                    debug!(%target_peer_id, "dropping welcome targeted at someone else");
                    return Ok(Dispatch::default());
                }
                let welcome: treekem::Welcome = match serde_json::from_str(tree_welcome) {
                    Ok(welcome) => welcome,
                    Err(error) => {
                        warn!(%error, "dropping unparseable tree welcome");
                        return Ok(Dispatch::default());
                    }
                };
                match self.manager.receive_welcome(&welcome, now_millis) {
                    Ok(()) => {
                        self.messages_since_rekey = 0;
                        Ok(Dispatch::default())
                    }
                    Err(error) if Self::is_recoverable(&error) => {
                        debug!(%error, "dropping tree welcome");
                        Ok(Dispatch::default())
                    }
                    Err(error) => Err(error.into()),
                }
            }

            ServerFrame::Message {
                peer_id,
                payload,
                epoch,
                counter,
                ..
            } => match self
                .manager
                .decrypt(peer_id, payload, *epoch, *counter, now_millis)
            {
                Ok(plaintext) => Ok(Dispatch::event(SessionEvent::Plaintext {
                    peer_id: peer_id.clone(),
                    plaintext,
                })),
                Err(error) if Self::is_recoverable(&error) => {
                    debug!(%peer_id, epoch, counter, %error, "dropping message");
                    Ok(Dispatch::default())
                }
                Err(error) => Err(error.into()),
            },

            ServerFrame::RoomExpired => Ok(Dispatch::event(SessionEvent::RoomExpired)),
            ServerFrame::RoomFull => Ok(Dispatch::event(SessionEvent::RoomFull)),
        }
    }

    /// Encrypts and queues a chat message at the current wall-clock time.
    pub fn send_message(&mut self, plaintext: &[u8]) -> Result<Dispatch, SessionError> {
        self.send_message_at(plaintext, now_millis())
    }

    /// Deterministic variant of [`send_message`](Self::send_message).
    ///
    /// After every send the interval-rekey counter is checked: once it
    /// reaches the configured threshold and we are the elected initiator,
    /// the message is followed by a fresh commit.
    pub fn send_message_at(
        &mut self,
        plaintext: &[u8],
        now_millis: u128,
    ) -> Result<Dispatch, SessionError> {
        let sealed = self.manager.encrypt(plaintext)?;
        let mut dispatch = Dispatch {
            outbound: vec![ClientFrame::Message {
                payload: sealed.payload,
                epoch: sealed.epoch,
                counter: sealed.counter,
                message_id: None,
            }],
            events: Vec::new(),
        };

        self.messages_since_rekey += 1;
        if self.messages_since_rekey >= self.config.rekey_interval
            && self.manager.peer_count() > 0
            && self
                .manager
                .should_initiate_rekey(RekeyContext::Interval, None)
        {
            let outcome = self.manager.initiate_rekey(None, now_millis)?;
            self.push_rekey(&mut dispatch, outcome)?;
            self.messages_since_rekey = 0;
        }
        Ok(dispatch)
    }

    /// Tears down all group state; key material zeroizes as it drops.
    pub fn disconnect(&mut self) {
        self.manager.close();
        self.messages_since_rekey = 0;
    }

    fn handle_peer_announcement(
        &mut self,
        peer_id: &str,
        public_key: &[u8],
        pq_public_key: &[u8],
        sig: &[u8],
        now_millis: u128,
    ) -> Result<Dispatch, SessionError> {
        match self
            .manager
            .add_peer(peer_id, public_key, pq_public_key, sig, now_millis)
        {
            Ok(()) => {}
            Err(GroupError::TofuConflict { fingerprint }) => {
                warn!(peer_id, "fingerprint conflict; peer not admitted");
                return Ok(Dispatch::event(SessionEvent::TofuConflict {
                    peer_id: peer_id.to_string(),
                    fingerprint,
                }));
            }
            Err(
                error @ (GroupError::InvalidKey { .. }
                | GroupError::InvalidSignature
                | GroupError::Tree(treekem::TreeError::RoomFull)),
            ) => {
                warn!(peer_id, %error, "peer rejected");
                return Ok(Dispatch::event(SessionEvent::PeerRejected {
                    peer_id: peer_id.to_string(),
                    reason: error.to_string(),
                }));
            }
            Err(error) => return Err(error.into()),
        }

        let mut dispatch = Dispatch::event(SessionEvent::PeerAdmitted {
            peer_id: peer_id.to_string(),
        });
        if self.manager.has_tree()
            && self
                .manager
                .should_initiate_rekey(RekeyContext::Add, Some(peer_id))
        {
            let outcome = self.manager.initiate_rekey(Some(peer_id), now_millis)?;
            self.push_rekey(&mut dispatch, outcome)?;
            self.messages_since_rekey = 0;
        }
        Ok(dispatch)
    }

    /// Appends a rekey's broadcast commit and targeted welcomes, commit
    /// first so every receiver sees the epoch advance before its welcome.
    fn push_rekey(
        &mut self,
        dispatch: &mut Dispatch,
        outcome: RekeyOutcome,
    ) -> Result<(), SessionError> {
        dispatch.outbound.push(ClientFrame::TreeCommit {
            tree_commit: serde_json::to_string(&outcome.commit)
                .map_err(|e| SessionError::Encode(e.to_string()))?,
        });
        for (peer_id, welcome) in outcome.welcomes {
            dispatch.outbound.push(ClientFrame::TreeWelcome {
                target_peer_id: peer_id,
                tree_welcome: serde_json::to_string(&welcome)
                    .map_err(|e| SessionError::Encode(e.to_string()))?,
            });
        }
        Ok(())
    }

    /// Whether a frame-handling error is dropped-and-forgotten rather than
    /// fatal to the session.
    fn is_recoverable(error: &GroupError) -> bool {
        matches!(
            error,
            GroupError::Tree(
                treekem::TreeError::StaleCommit { .. }
                    | treekem::TreeError::NoPathSecret
                    | treekem::TreeError::DecapFailed
                    | treekem::TreeError::Malformed(_)
            ) | GroupError::Chain(_)
                | GroupError::UnknownPeer(_)
                | GroupError::NotInGroup
        )
    }
}

fn now_millis() -> u128 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis()
}
