use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, MessageType, Notification, ReactionSummary};

/// Events sent FROM server TO client over the socket.
/// Framed as `{ "event": "<name>", "data": <payload> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Handshake accepted; the connection has joined `user:<id>`
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "userId")]
        user_id: i64,
    },

    /// Handshake rejected; the server closes right after sending this
    #[serde(rename = "connect_error")]
    ConnectError { message: String },

    /// A chat message was persisted
    #[serde(rename = "receive_message")]
    ReceiveMessage(ChatMessage),

    /// The reaction aggregate of a message changed
    #[serde(rename = "reaction:update")]
    ReactionUpdate {
        #[serde(rename = "messageId")]
        message_id: i64,
        reactions: Vec<ReactionSummary>,
    },

    /// A message was deleted by its sender
    #[serde(rename = "message:deleted")]
    MessageDeleted {
        #[serde(rename = "messageId")]
        message_id: i64,
    },

    #[serde(rename = "notification:new")]
    NotificationNew(NotificationEnvelope),
}

/// A freshly stored notification as pushed to its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub id: i64,
    #[serde(flatten)]
    pub notification: Notification,
    pub created_at: DateTime<Utc>,
}

/// Commands sent FROM client TO server over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    /// Deferred handshake: authenticate the connection after upgrade
    #[serde(rename = "auth")]
    Auth { token: String },

    #[serde(rename = "send_message")]
    SendMessage(SendMessagePayload),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub receiver_id: i64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub media_url: Option<String>,
    /// Base64 AES-GCM ciphertext
    #[serde(default)]
    pub encrypted: Option<String>,
    /// Base64 96-bit IV
    #[serde(default)]
    pub iv: Option<String>,
    #[serde(default)]
    pub is_encrypted: bool,
}
