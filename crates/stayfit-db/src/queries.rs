use crate::models::{
    ConversationRow, FriendRequestRow, FriendRow, MessageRow, NewMessage, ReactionAggregateRow,
    ReactionRow, UserRow,
};
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str = "m.id, m.sender_id, m.receiver_id, m.content, m.message_type, m.media_url, \
     m.encrypted_content, m.iv, m.is_encrypted, m.created_at";

/// Largest history page a caller may request.
pub const MAX_HISTORY_PAGE: u32 = 200;

// Stays well under SQLite's host parameter limit.
const REACTION_BATCH: usize = 500;

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, password) VALUES (?1, ?2, ?3)",
                (username, email, password_hash),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Like `create_user`, but a clash with an existing username or email
    /// yields `None` instead of an error.
    pub fn try_create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            match conn.execute(
                "INSERT INTO users (username, email, password) VALUES (?1, ?2, ?3)",
                (username, email, password_hash),
            ) {
                Ok(_) => Ok(Some(conn.last_insert_rowid())),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Delete a user and every row that references them, children first.
    pub fn delete_user(&self, user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM message_reactions WHERE user_id = ?1 OR message_id IN
                    (SELECT id FROM messages WHERE sender_id = ?1 OR receiver_id = ?1)",
                [user_id],
            )?;
            tx.execute(
                "DELETE FROM messages WHERE sender_id = ?1 OR receiver_id = ?1",
                [user_id],
            )?;
            tx.execute("DELETE FROM notifications WHERE user_id = ?1", [user_id])?;
            tx.execute(
                "DELETE FROM friends WHERE user_id = ?1 OR friend_id = ?1",
                [user_id],
            )?;
            tx.execute(
                "DELETE FROM friend_requests WHERE sender_id = ?1 OR receiver_id = ?1",
                [user_id],
            )?;
            for table in ["likes", "saves", "comments"] {
                tx.execute(
                    &format!(
                        "DELETE FROM {table} WHERE user_id = ?1 OR post_id IN
                            (SELECT id FROM posts WHERE user_id = ?1)"
                    ),
                    [user_id],
                )?;
            }
            tx.execute("DELETE FROM posts WHERE user_id = ?1", [user_id])?;
            tx.execute(
                "DELETE FROM workout_participants WHERE user_id = ?1 OR schedule_id IN
                    (SELECT id FROM workout_schedules WHERE creator_id = ?1)",
                [user_id],
            )?;
            tx.execute("DELETE FROM workout_schedules WHERE creator_id = ?1", [user_id])?;
            tx.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
            tx.commit()?;
            Ok(())
        })
    }

    // -- Friends --

    pub fn are_friends(&self, a: i64, b: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM friends WHERE user_id = ?1 AND friend_id = ?2",
                    [a, b],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Insert both directed rows of a friendship.
    pub fn add_friendship(&self, a: i64, b: i64) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            insert_friend_pair(&tx, a, b)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Returns true if a friendship existed.
    pub fn remove_friendship(&self, a: i64, b: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM friends WHERE (user_id = ?1 AND friend_id = ?2)
                    OR (user_id = ?2 AND friend_id = ?1)",
                [a, b],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn list_friends(&self, user_id: i64) -> Result<Vec<FriendRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username FROM friends f
                 JOIN users u ON u.id = f.friend_id
                 WHERE f.user_id = ?1
                 ORDER BY u.username",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(FriendRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// True if a request exists in either direction.
    pub fn pending_request_between(&self, a: i64, b: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM friend_requests WHERE (sender_id = ?1 AND receiver_id = ?2)
                        OR (sender_id = ?2 AND receiver_id = ?1)",
                    [a, b],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn create_friend_request(&self, sender_id: i64, receiver_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO friend_requests (sender_id, receiver_id) VALUES (?1, ?2)",
                [sender_id, receiver_id],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_friend_request(&self, id: i64) -> Result<Option<FriendRequestRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT r.id, r.sender_id, u.username, r.receiver_id, r.created_at
                 FROM friend_requests r JOIN users u ON u.id = r.sender_id
                 WHERE r.id = ?1",
                [id],
                map_friend_request,
            )
            .optional()
        })
    }

    pub fn incoming_friend_requests(&self, user_id: i64) -> Result<Vec<FriendRequestRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.sender_id, u.username, r.receiver_id, r.created_at
                 FROM friend_requests r JOIN users u ON u.id = r.sender_id
                 WHERE r.receiver_id = ?1
                 ORDER BY r.created_at DESC, r.id DESC",
            )?;
            let rows = stmt
                .query_map([user_id], map_friend_request)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Turn a request into a friendship: both directed rows, request removed.
    pub fn accept_friend_request(&self, request_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let (sender, receiver): (i64, i64) = tx.query_row(
                "SELECT sender_id, receiver_id FROM friend_requests WHERE id = ?1",
                [request_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            insert_friend_pair(&tx, sender, receiver)?;
            tx.execute("DELETE FROM friend_requests WHERE id = ?1", [request_id])?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn delete_friend_request(&self, request_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM friend_requests WHERE id = ?1", [request_id])?;
            Ok(removed > 0)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, message_type, media_url,
                    encrypted_content, iv, is_encrypted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    msg.sender_id,
                    msg.receiver_id,
                    msg.content,
                    msg.message_type,
                    msg.media_url,
                    msg.encrypted_content,
                    msg.iv,
                    msg.is_encrypted,
                ],
            )?;
            let id = conn.last_insert_rowid();
            let row = conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1"),
                [id],
                map_message,
            )?;
            Ok(row)
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1"),
                [id],
                map_message,
            )
            .optional()
        })
    }

    /// One page of history between two users, oldest first. `before` is a
    /// message id cursor; only older messages are returned.
    pub fn get_conversation(&self, a: i64, b: i64, limit: u32, before: Option<i64>) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE ((m.sender_id = ?1 AND m.receiver_id = ?2)
                     OR (m.sender_id = ?2 AND m.receiver_id = ?1))
                   AND (?3 IS NULL OR m.id < ?3)
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?4"
            ))?;
            let mut rows = stmt
                .query_map(rusqlite::params![a, b, before, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Latest message per conversation partner, newest conversation first.
    pub fn latest_conversations(&self, user_id: i64) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}, u.id, u.username FROM messages m
                 JOIN users u ON u.id = CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END
                 WHERE m.id IN (
                    SELECT MAX(id) FROM messages
                    WHERE sender_id = ?1 OR receiver_id = ?1
                    GROUP BY CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
                 )
                 ORDER BY m.created_at DESC, m.id DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationRow {
                        last_message: map_message(row)?,
                        partner_id: row.get(10)?,
                        partner_username: row.get(11)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Remove a message and, before it, all of its reactions.
    /// Returns the number of reaction rows removed.
    pub fn delete_message(&self, id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let reactions = tx.execute("DELETE FROM message_reactions WHERE message_id = ?1", [id])?;
            tx.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(reactions)
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if exists, inserts if not.
    /// Returns true if the reaction was inserted, false if it was removed.
    pub fn toggle_reaction(&self, message_id: i64, user_id: i64, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            // Check if reaction already exists
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    rusqlite::params![message_id, user_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM message_reactions WHERE id = ?1", [existing_id])?;
                Ok(false)
            } else {
                conn.execute(
                    "INSERT INTO message_reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                    rusqlite::params![message_id, user_id, emoji],
                )?;
                Ok(true)
            }
        })
    }

    /// Per-emoji counts for one message, in order of first use.
    pub fn reaction_aggregate(&self, message_id: i64, viewer_id: i64) -> Result<Vec<ReactionAggregateRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT emoji, COUNT(*), MAX(user_id = ?2) FROM message_reactions
                 WHERE message_id = ?1
                 GROUP BY emoji
                 ORDER BY MIN(id)",
            )?;
            let rows = stmt
                .query_map([message_id, viewer_id], |row| {
                    Ok(ReactionAggregateRow {
                        emoji: row.get(0)?,
                        count: row.get(1)?,
                        reacted_by_viewer: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch reactions for a set of message IDs, in insertion order
    /// within each batch.
    pub fn get_reactions_for_messages(&self, message_ids: &[i64]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let mut rows = Vec::new();
            for chunk in message_ids.chunks(REACTION_BATCH) {
                let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
                let sql = format!(
                    "SELECT message_id, user_id, emoji FROM message_reactions
                     WHERE message_id IN ({})
                     ORDER BY id",
                    placeholders.join(", ")
                );

                let mut stmt = conn.prepare(&sql)?;
                let batch = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                    })
                })?;
                for row in batch {
                    rows.push(row?);
                }
            }

            Ok(rows)
        })
    }
}

fn query_user<P: rusqlite::ToSql>(conn: &Connection, column: &str, value: P) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, email, password, created_at FROM users WHERE {column} = ?1"
    ))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn insert_friend_pair(conn: &Connection, a: i64, b: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO friends (user_id, friend_id) VALUES (?1, ?2), (?2, ?1)",
        [a, b],
    )?;
    Ok(())
}

fn map_friend_request(row: &Row<'_>) -> rusqlite::Result<FriendRequestRow> {
    Ok(FriendRequestRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_username: row.get(2)?,
        receiver_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        message_type: row.get(4)?,
        media_url: row.get(5)?,
        encrypted_content: row.get(6)?,
        iv: row.get(7)?,
        is_encrypted: row.get(8)?,
        created_at: row.get(9)?,
    })
}
