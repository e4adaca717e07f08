/// Database row types, one per query shape.
/// Distinct from stayfit-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

pub struct FriendRow {
    pub id: i64,
    pub username: String,
}

pub struct FriendRequestRow {
    pub id: i64,
    pub sender_id: i64,
    pub sender_username: String,
    pub receiver_id: i64,
    pub created_at: String,
}

/// Fields supplied by the sender; id and created_at come from the database.
pub struct NewMessage<'a> {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: &'a str,
    pub message_type: &'a str,
    pub media_url: Option<&'a str>,
    pub encrypted_content: Option<&'a str>,
    pub iv: Option<&'a str>,
    pub is_encrypted: bool,
}

pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub message_type: String,
    pub media_url: Option<String>,
    pub encrypted_content: Option<String>,
    pub iv: Option<String>,
    pub is_encrypted: bool,
    pub created_at: String,
}

/// Latest message exchanged with one partner.
pub struct ConversationRow {
    pub partner_id: i64,
    pub partner_username: String,
    pub last_message: MessageRow,
}

pub struct ReactionRow {
    pub message_id: i64,
    pub user_id: i64,
    pub emoji: String,
}

/// One `GROUP BY emoji` line of a message's reactions.
pub struct ReactionAggregateRow {
    pub emoji: String,
    pub count: i64,
    pub reacted_by_viewer: bool,
}

pub struct NotificationRow {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub data: String,
    pub read: bool,
    pub created_at: String,
}

pub struct PostRow {
    pub id: i64,
    pub user_id: i64,
    pub caption: String,
    pub media_url: Option<String>,
    pub created_at: String,
}

/// A post decorated for one viewer.
pub struct FeedRow {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub caption: String,
    pub media_url: Option<String>,
    pub like_count: i64,
    pub comment_count: i64,
    pub liked: bool,
    pub saved: bool,
    pub created_at: String,
}

pub struct CommentRow {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub created_at: String,
}

pub struct WorkoutRow {
    pub id: i64,
    pub creator_id: i64,
    pub creator_username: String,
    pub workout: String,
    pub date: String,
    pub time: String,
    pub reminder_sent: bool,
    pub created_at: String,
}

pub struct ParticipantRow {
    pub schedule_id: i64,
    pub user_id: i64,
    pub username: String,
    pub status: String,
}
