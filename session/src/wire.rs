//! Transport frame schemas.
//!
//! Every frame is a JSON object with a `type` discriminator. The server
//! authors the membership frames and relays the client-authored ones
//! (`tree_commit`, `tree_welcome`, `message`) verbatim; commits and welcomes
//! travel as JSON-encoded strings inside their frames so the relay never
//! needs to understand them.

use serde::{Deserialize, Serialize};

/// Frames received from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Session start: our server-assigned identity.
    Welcome {
        /// Our participant identifier.
        peer_id: String,
        /// Whether we created the room.
        is_creator: bool,
        /// The creator's participant identifier.
        creator_id: String,
    },
    /// An existing member's key announcement, delivered to a joiner.
    PeerKey {
        /// The member's identifier.
        peer_id: String,
        /// base64 ML-DSA verification key.
        #[serde(with = "b64")]
        public_key: Vec<u8>,
        /// base64 ML-KEM public key.
        #[serde(with = "b64")]
        pq_public_key: Vec<u8>,
        /// base64 ML-DSA signature over the KEM key.
        #[serde(with = "b64")]
        sig: Vec<u8>,
    },
    /// A new arrival's key announcement, broadcast to existing members.
    PeerJoined {
        /// The joiner's identifier.
        peer_id: String,
        /// base64 ML-DSA verification key.
        #[serde(with = "b64")]
        public_key: Vec<u8>,
        /// base64 ML-KEM public key.
        #[serde(with = "b64")]
        pq_public_key: Vec<u8>,
        /// base64 ML-DSA signature over the KEM key.
        #[serde(with = "b64")]
        sig: Vec<u8>,
    },
    /// A member disconnected.
    PeerLeft {
        /// The departed member's identifier.
        peer_id: String,
    },
    /// A relayed commit broadcast.
    TreeCommit {
        /// JSON-encoded [`treekem::Commit`].
        tree_commit: String,
    },
    /// A relayed welcome targeted at us.
    TreeWelcome {
        /// The intended recipient.
        target_peer_id: String,
        /// JSON-encoded [`treekem::Welcome`].
        tree_welcome: String,
    },
    /// A relayed chat message.
    Message {
        /// The sender's identifier.
        peer_id: String,
        /// base64 `iv ∥ ct ∥ tag`.
        #[serde(with = "b64")]
        payload: Vec<u8>,
        /// Epoch the message was sealed in.
        epoch: u64,
        /// The sender's counter.
        counter: u64,
        /// Optional client-side deduplication id.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message_id: Option<String>,
    },
    /// The room reached its lifetime limit.
    RoomExpired,
    /// The room is at capacity.
    RoomFull,
}

/// Frames sent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Our signed key announcement.
    KeyAnnounce {
        /// base64 ML-DSA verification key.
        #[serde(with = "b64")]
        public_key: Vec<u8>,
        /// base64 ML-KEM public key.
        #[serde(with = "b64")]
        pq_public_key: Vec<u8>,
        /// base64 ML-DSA signature over the KEM key.
        #[serde(with = "b64")]
        sig: Vec<u8>,
    },
    /// A commit for the server to broadcast.
    TreeCommit {
        /// JSON-encoded [`treekem::Commit`].
        tree_commit: String,
    },
    /// A welcome for the server to deliver to one member.
    TreeWelcome {
        /// The intended recipient.
        target_peer_id: String,
        /// JSON-encoded [`treekem::Welcome`].
        tree_welcome: String,
    },
    /// A sealed chat message for the server to broadcast.
    Message {
        /// base64 `iv ∥ ct ∥ tag`.
        #[serde(with = "b64")]
        payload: Vec<u8>,
        /// Epoch the message was sealed in.
        epoch: u64,
        /// Our sender counter.
        counter: u64,
        /// Optional client-side deduplication id.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message_id: Option<String>,
    },
}

/// Serde adapter encoding binary fields as standard base64 strings.
mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub(super) fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(&encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_frame_discriminators() {
        let welcome: ServerFrame = serde_json::from_str(
            r#"{"type":"welcome","peer_id":"p1","is_creator":true,"creator_id":"p1"}"#,
        )
        .unwrap();
        assert!(matches!(welcome, ServerFrame::Welcome { .. }));

        let expired: ServerFrame = serde_json::from_str(r#"{"type":"room_expired"}"#).unwrap();
        assert!(matches!(expired, ServerFrame::RoomExpired));
    }

    #[test]
    fn test_key_announce_wire_fields() {
        let frame = ClientFrame::KeyAnnounce {
            public_key: vec![1, 2],
            pq_public_key: vec![3, 4],
            sig: vec![5, 6],
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "key_announce");
        assert_eq!(json["public_key"], "AQI=");
        assert_eq!(json["pq_public_key"], "AwQ=");
        assert_eq!(json["sig"], "BQY=");
    }

    #[test]
    fn test_message_roundtrip_and_optional_id() {
        let frame = ClientFrame::Message {
            payload: vec![9; 40],
            epoch: 3,
            counter: 17,
            message_id: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("message_id"));
        let parsed: ClientFrame = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientFrame::Message {
                payload,
                epoch,
                counter,
                message_id,
            } => {
                assert_eq!(payload, vec![9; 40]);
                assert_eq!((epoch, counter), (3, 17));
                assert_eq!(message_id, None);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_peer_joined_rejects_invalid_base64() {
        let result: Result<ServerFrame, _> = serde_json::from_str(
            r#"{"type":"peer_joined","peer_id":"p2","public_key":"!!","pq_public_key":"","sig":""}"#,
        );
        assert!(result.is_err());
    }
}
