use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name substituted when a conversation record carries no entry for a participant.
pub const UNKNOWN_USER: &str = "Unknown User";

/// A two-party buyer/vendor conversation, as stored in the backend.
///
/// The participant set is fixed at creation time; preview fields and the
/// unread map are rewritten on every message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<String>,
    #[serde(default)]
    pub participant_names: HashMap<String, String>,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub last_message_at: i64,
    #[serde(default)]
    pub last_message_sender: String,
    #[serde(default)]
    pub unread: HashMap<String, u32>,
}

impl Conversation {
    /// Decode a backend document. This is the single validation point for
    /// conversation records; a document missing its id or participant set
    /// is rejected here instead of leaking undefined fields downstream.
    pub fn from_doc(doc: &Value) -> Option<Conversation> {
        match serde_json::from_value::<Conversation>(doc.clone()) {
            Ok(conv) if !conv.id.is_empty() && !conv.participants.is_empty() => Some(conv),
            Ok(conv) => {
                warn!("Dropping malformed conversation record (id='{}')", conv.id);
                None
            }
            Err(e) => {
                warn!("Dropping undecodable conversation record: {}", e);
                None
            }
        }
    }

    /// Whether `user_id` is a member of this conversation.
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// Display name for a participant, defaulting when the record has none.
    pub fn display_name(&self, user_id: &str) -> &str {
        self.participant_names
            .get(user_id)
            .map(|s| s.as_str())
            .unwrap_or(UNKNOWN_USER)
    }

    /// Unread count for a participant; absent entries read as 0.
    pub fn unread_for(&self, user_id: &str) -> u32 {
        self.unread.get(user_id).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,      // Accepted by the backend
    Delivered, // Reached the recipient's device
    Read,      // Seen by the recipient
}

/// A single chat message. Immutable once created; the timestamp is
/// assigned by the backend and orders the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: i64,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub delivery_status: DeliveryStatus,
}

impl ChatMessage {
    /// Decode a backend document; malformed records are logged and skipped.
    pub fn from_doc(doc: &Value) -> Option<ChatMessage> {
        match serde_json::from_value::<ChatMessage>(doc.clone()) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!("Dropping undecodable message record: {}", e);
                None
            }
        }
    }
}

/// Heartbeat-derived presence for one user. Best effort only; there is
/// no accuracy bound on `online`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub user_id: String,
    pub online: bool,
    pub last_seen: i64,
}

/// Metadata for an already-uploaded attachment, as recorded on a message.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub url: String,
    pub name: String,
    pub size: u64,
}
