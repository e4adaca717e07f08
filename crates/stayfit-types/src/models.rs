use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Non-secret stand-in stored in `content` when the real body is encrypted.
pub const ENCRYPTED_PLACEHOLDER: &str = "[Encrypted]";

/// Name of the private room every connection of a user joins.
pub fn user_room(user_id: i64) -> String {
    format!("user:{}", user_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Gif,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Gif => "gif",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "gif" => Ok(Self::Gif),
            other => Err(format!("unknown message type '{}'", other)),
        }
    }
}

/// A persisted 1:1 chat message, exactly as relayed in `receive_message`.
///
/// When `is_encrypted` is set, `encrypted_content` and `iv` carry the
/// base64 AES-GCM payload and `content` is only [`ENCRYPTED_PLACEHOLDER`].
/// The server never looks inside either field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub encrypted_content: Option<String>,
    pub iv: Option<String>,
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Both participants of the conversation this message belongs to.
    pub fn participants(&self) -> [i64; 2] {
        [self.sender_id, self.receiver_id]
    }
}

/// Per-emoji summary of the raw reaction rows on one message, from the
/// point of view of a single viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub reacted_by_me: bool,
}

// -- Notifications --

/// A notification synthesized from a social mutation. Serializes as
/// `{ "type": "<kind>", "data": { ... } }`, with the payload shape fixed per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    /// A friend published a new post
    Post(PostNotice),
    Comment(CommentNotice),
    Like(LikeNotice),
    FriendRequest(FriendRequestNotice),
    FriendAccept(FriendAcceptNotice),
    WorkoutInvite(WorkoutNotice),
    WorkoutResponse(WorkoutResponseNotice),
    #[serde(alias = "workout_cancelled")]
    WorkoutCanceled(WorkoutNotice),
    WorkoutOptOut(WorkoutOptOutNotice),
    WorkoutReminder(WorkoutReminderNotice),
}

impl Notification {
    /// The `type` tag stored alongside the payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Post(_) => "post",
            Self::Comment(_) => "comment",
            Self::Like(_) => "like",
            Self::FriendRequest(_) => "friend_request",
            Self::FriendAccept(_) => "friend_accept",
            Self::WorkoutInvite(_) => "workout_invite",
            Self::WorkoutResponse(_) => "workout_response",
            Self::WorkoutCanceled(_) => "workout_canceled",
            Self::WorkoutOptOut(_) => "workout_opt_out",
            Self::WorkoutReminder(_) => "workout_reminder",
        }
    }

    /// Split into the `(type, data)` pair persisted in the notifications table.
    pub fn to_parts(&self) -> serde_json::Result<(&'static str, serde_json::Value)> {
        let mut value = serde_json::to_value(self)?;
        let data = value
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        Ok((self.kind(), data))
    }

    /// Rebuild from a stored `(type, data)` pair. Accepts the legacy
    /// `workout_cancelled` spelling.
    pub fn from_parts(kind: &str, data: serde_json::Value) -> serde_json::Result<Self> {
        let kind = Self::canonical_kind(kind);
        serde_json::from_value(serde_json::json!({ "type": kind, "data": data }))
    }

    /// Stored spelling of a notification type; the British
    /// `workout_cancelled` is accepted as an alias.
    pub fn canonical_kind(kind: &str) -> &str {
        match kind {
            "workout_cancelled" => "workout_canceled",
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostNotice {
    pub post_id: i64,
    pub author_id: i64,
    pub author_username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNotice {
    pub post_id: i64,
    pub comment_id: i64,
    pub commenter_id: i64,
    pub commenter_username: String,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeNotice {
    pub post_id: i64,
    pub liker_id: i64,
    pub liker_username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestNotice {
    pub request_id: i64,
    pub from_user_id: i64,
    pub from_username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendAcceptNotice {
    pub friend_id: i64,
    pub friend_username: String,
}

/// Shared by invites and cancellations: both come from the schedule's creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutNotice {
    pub schedule_id: i64,
    pub workout: String,
    pub date: String,
    pub time: String,
    pub creator_id: i64,
    pub creator_username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutResponseNotice {
    pub schedule_id: i64,
    pub workout: String,
    pub date: String,
    pub time: String,
    pub responder_id: i64,
    pub responder_username: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutOptOutNotice {
    pub schedule_id: i64,
    pub workout: String,
    pub date: String,
    pub time: String,
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutReminderNotice {
    pub schedule_id: i64,
    pub workout: String,
    pub date: String,
    pub time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> Notification {
        Notification::WorkoutInvite(WorkoutNotice {
            schedule_id: 7,
            workout: "Leg day".into(),
            date: "2026-03-01".into(),
            time: "18:30".into(),
            creator_id: 1,
            creator_username: "alice".into(),
        })
    }

    #[test]
    fn notification_wire_shape() {
        let json = serde_json::to_value(invite()).unwrap();
        assert_eq!(json["type"], "workout_invite");
        assert_eq!(json["data"]["scheduleId"], 7);
        assert_eq!(json["data"]["creatorUsername"], "alice");
    }

    #[test]
    fn parts_rebuild_same_notification() {
        let n = invite();
        let (kind, data) = n.to_parts().unwrap();
        assert_eq!(kind, "workout_invite");
        assert!(data.get("type").is_none());
        assert_eq!(Notification::from_parts(kind, data).unwrap(), n);
    }

    #[test]
    fn legacy_cancelled_spelling_is_read() {
        let Notification::WorkoutInvite(payload) = invite() else { unreachable!() };
        let data = serde_json::to_value(&payload).unwrap();
        let n = Notification::from_parts("workout_cancelled", data).unwrap();
        assert_eq!(n.kind(), "workout_canceled");
    }

    #[test]
    fn canonical_kind_maps_only_the_alias() {
        assert_eq!(Notification::canonical_kind("workout_cancelled"), "workout_canceled");
        assert_eq!(Notification::canonical_kind("workout_canceled"), "workout_canceled");
        assert_eq!(Notification::canonical_kind("like"), "like");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(Notification::from_parts("poke", serde_json::json!({})).is_err());
    }

    #[test]
    fn room_names() {
        assert_eq!(user_room(42), "user:42");
        assert_eq!("gif".parse::<MessageType>().unwrap(), MessageType::Gif);
        assert!("video".parse::<MessageType>().is_err());
    }
}
