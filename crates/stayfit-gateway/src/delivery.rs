use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use stayfit_crypto::conversation_id;
use stayfit_db::queries::MAX_HISTORY_PAGE;
use stayfit_db::Database;
use stayfit_db::models::{MessageRow, NewMessage, ReactionAggregateRow, ReactionRow};
use stayfit_types::events::{SendMessagePayload, ServerEvent};
use stayfit_types::models::{ChatMessage, ENCRYPTED_PLACEHOLDER, MessageType, ReactionSummary};

use crate::blocking;
use crate::error::DeliveryError;
use crate::registry::RoomRegistry;

const MAX_EMOJI_BYTES: usize = 32;

/// Message relay, reaction toggling and deletion propagation.
///
/// Every operation is a straight line of awaited steps: load, check, write,
/// then fan the result out to the participants' rooms. A failing step returns
/// early and nothing is broadcast.
#[derive(Clone)]
pub struct DeliveryEngine {
    db: Arc<Database>,
    registry: RoomRegistry,
}

impl DeliveryEngine {
    pub fn new(db: Arc<Database>, registry: RoomRegistry) -> Self {
        Self { db, registry }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Persist a chat message and relay it to the receiver's room, echoing it
    /// back to the originating connection (if any) as confirmation.
    pub async fn send_message(
        &self,
        sender_id: i64,
        origin: Option<Uuid>,
        payload: SendMessagePayload,
    ) -> Result<ChatMessage, DeliveryError> {
        let SendMessagePayload {
            receiver_id,
            content,
            message_type,
            media_url,
            encrypted,
            iv,
            is_encrypted,
        } = payload;

        let (content, encrypted, iv) = if is_encrypted {
            let encrypted = encrypted.filter(|c| !c.is_empty()).ok_or(DeliveryError::Invalid("missing ciphertext"))?;
            let iv = iv.filter(|v| !v.is_empty()).ok_or(DeliveryError::Invalid("missing iv"))?;
            (ENCRYPTED_PLACEHOLDER.to_string(), Some(encrypted), Some(iv))
        } else {
            if content.trim().is_empty() {
                return Err(DeliveryError::Invalid("empty message"));
            }
            (content, None, None)
        };

        let row = blocking(&self.db, move |db| {
            if !db.are_friends(sender_id, receiver_id)? {
                return Ok(None);
            }
            let row = db.insert_message(&NewMessage {
                sender_id,
                receiver_id,
                content: &content,
                message_type: message_type.as_str(),
                media_url: media_url.as_deref(),
                encrypted_content: encrypted.as_deref(),
                iv: iv.as_deref(),
                is_encrypted,
            })?;
            Ok(Some(row))
        })
        .await?
        .ok_or(DeliveryError::Forbidden)?;

        let mut message = row_to_message(row);
        message.created_at = chrono::Utc::now();

        let event = ServerEvent::ReceiveMessage(message.clone());
        let delivered = self.registry.broadcast(receiver_id, event.clone()).await;
        if let Some(conn_id) = origin {
            self.registry.send_to_connection(sender_id, conn_id, event).await;
        }
        debug!(
            "message {} in {} delivered to {} connection(s)",
            message.id,
            conversation_id(sender_id, receiver_id),
            delivered
        );

        Ok(message)
    }

    /// One page of chat history between `user_id` and a friend, oldest first,
    /// each message with its reaction aggregate as seen by `user_id`.
    /// `limit` is clamped to `1..=MAX_HISTORY_PAGE`; `before` pages backwards
    /// from a message id.
    pub async fn history(
        &self,
        user_id: i64,
        other_id: i64,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<(ChatMessage, Vec<ReactionSummary>)>, DeliveryError> {
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        let (rows, reaction_rows) = blocking(&self.db, move |db| {
            if !db.are_friends(user_id, other_id)? {
                return Ok(None);
            }
            let rows = db.get_conversation(user_id, other_id, limit, before)?;
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            let reactions = db.get_reactions_for_messages(&ids)?;
            Ok(Some((rows, reactions)))
        })
        .await?
        .ok_or(DeliveryError::Forbidden)?;

        let mut by_message = summarize(reaction_rows, user_id);
        Ok(rows
            .into_iter()
            .map(|row| {
                let reactions = by_message.remove(&row.id).unwrap_or_default();
                (row_to_message(row), reactions)
            })
            .collect())
    }

    /// Current reaction aggregate of a message for one of its participants.
    pub async fn reactions(&self, message_id: i64, viewer_id: i64) -> Result<Vec<ReactionSummary>, DeliveryError> {
        let message = self.load_message(message_id).await?;
        if !is_participant(&message, viewer_id) {
            return Err(DeliveryError::Forbidden);
        }
        self.aggregate(message_id, viewer_id).await
    }

    /// Flip the caller's `(message, emoji)` reaction, then push the fresh
    /// aggregate to both participants. Returns the caller's view.
    pub async fn toggle_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Vec<ReactionSummary>, DeliveryError> {
        let emoji = emoji.trim().to_string();
        if emoji.is_empty() || emoji.len() > MAX_EMOJI_BYTES {
            return Err(DeliveryError::Invalid("bad emoji"));
        }

        let message = self.load_message(message_id).await?;
        if !is_participant(&message, user_id) {
            return Err(DeliveryError::Forbidden);
        }

        let added = blocking(&self.db, move |db| db.toggle_reaction(message_id, user_id, &emoji)).await?;
        debug!(
            "user {} {} reaction on message {}",
            user_id,
            if added { "added" } else { "removed" },
            message_id
        );

        // Each participant gets the aggregate from their own point of view.
        // Recomputed outside the toggle, so a concurrent toggle may make one
        // of these momentarily stale until the next update.
        let mut caller_view = Vec::new();
        for participant in message.participants() {
            let reactions = self.aggregate(message_id, participant).await?;
            if participant == user_id {
                caller_view = reactions.clone();
            }
            self.registry
                .broadcast(participant, ServerEvent::ReactionUpdate { message_id, reactions })
                .await;
        }

        Ok(caller_view)
    }

    /// Delete a message (sender only). Reactions go first, then the row; both
    /// participants are told the id.
    pub async fn delete_message(&self, message_id: i64, caller_id: i64) -> Result<(), DeliveryError> {
        let message = self.load_message(message_id).await?;
        if message.sender_id != caller_id {
            warn!("user {} tried to delete message {} they did not send", caller_id, message_id);
            return Err(DeliveryError::Forbidden);
        }

        let removed = blocking(&self.db, move |db| db.delete_message(message_id)).await?;
        info!("message {} deleted with {} reaction(s)", message_id, removed);

        for participant in message.participants() {
            self.registry
                .broadcast(participant, ServerEvent::MessageDeleted { message_id })
                .await;
        }
        Ok(())
    }

    async fn load_message(&self, message_id: i64) -> Result<ChatMessage, DeliveryError> {
        blocking(&self.db, move |db| db.get_message(message_id))
            .await?
            .map(row_to_message)
            .ok_or(DeliveryError::NotFound)
    }

    async fn aggregate(&self, message_id: i64, viewer_id: i64) -> Result<Vec<ReactionSummary>, DeliveryError> {
        let rows = blocking(&self.db, move |db| db.reaction_aggregate(message_id, viewer_id)).await?;
        Ok(rows.into_iter().map(aggregate_to_summary).collect())
    }
}

fn is_participant(message: &ChatMessage, user_id: i64) -> bool {
    message.participants().contains(&user_id)
}

fn aggregate_to_summary(row: ReactionAggregateRow) -> ReactionSummary {
    ReactionSummary {
        emoji: row.emoji,
        count: row.count as usize,
        reacted_by_me: row.reacted_by_viewer,
    }
}

/// Group raw reaction rows by message, then by emoji in order of first use.
fn summarize(rows: Vec<ReactionRow>, viewer_id: i64) -> HashMap<i64, Vec<ReactionSummary>> {
    let mut slots: HashMap<(i64, String), usize> = HashMap::new();
    let mut out: HashMap<i64, Vec<ReactionSummary>> = HashMap::new();
    for r in rows {
        let summaries = out.entry(r.message_id).or_default();
        let idx = *slots.entry((r.message_id, r.emoji.clone())).or_insert_with(|| {
            summaries.push(ReactionSummary {
                emoji: r.emoji.clone(),
                count: 0,
                reacted_by_me: false,
            });
            summaries.len() - 1
        });
        summaries[idx].count += 1;
        summaries[idx].reacted_by_me |= r.user_id == viewer_id;
    }
    out
}

pub fn row_to_message(row: MessageRow) -> ChatMessage {
    let message_type = row.message_type.parse::<MessageType>().unwrap_or_else(|e| {
        warn!("Corrupt message_type on message {}: {}", row.id, e);
        MessageType::Text
    });
    ChatMessage {
        id: row.id,
        sender_id: row.sender_id,
        receiver_id: row.receiver_id,
        content: row.content,
        message_type,
        media_url: row.media_url,
        encrypted_content: row.encrypted_content,
        iv: row.iv,
        is_encrypted: row.is_encrypted,
        created_at: stayfit_db::parse_timestamp(&row.created_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        engine: DeliveryEngine,
        db: Arc<Database>,
        alice: i64,
        bob: i64,
        carol: i64,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = db.create_user("alice", "alice@example.com", "x").unwrap();
        let bob = db.create_user("bob", "bob@example.com", "x").unwrap();
        let carol = db.create_user("carol", "carol@example.com", "x").unwrap();
        db.add_friendship(alice, bob).unwrap();
        let engine = DeliveryEngine::new(db.clone(), RoomRegistry::new());
        Fixture { engine, db, alice, bob, carol }
    }

    fn hi(receiver_id: i64) -> SendMessagePayload {
        SendMessagePayload {
            receiver_id,
            content: "hi".into(),
            ..Default::default()
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn friends_message_is_persisted_and_delivered() {
        let f = fixture();
        let (a_conn, mut a_rx) = f.engine.registry().connect(f.alice).await;
        let (_, mut b_rx) = f.engine.registry().connect(f.bob).await;

        let msg = f.engine.send_message(f.alice, Some(a_conn), hi(f.bob)).await.unwrap();
        assert_eq!((msg.sender_id, msg.receiver_id), (f.alice, f.bob));
        assert_eq!(msg.content, "hi");
        assert!(!msg.is_encrypted);

        let stored = f.db.get_message(msg.id).unwrap().unwrap();
        assert_eq!(stored.content, "hi");

        for rx in [&mut a_rx, &mut b_rx] {
            match drain(rx).as_slice() {
                [ServerEvent::ReceiveMessage(got)] => assert_eq!(got.id, msg.id),
                other => panic!("unexpected events {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn echo_goes_to_origin_connection_only() {
        let f = fixture();
        let (a_conn, mut a_rx) = f.engine.registry().connect(f.alice).await;
        let (_, mut a_other_tab) = f.engine.registry().connect(f.alice).await;

        f.engine.send_message(f.alice, Some(a_conn), hi(f.bob)).await.unwrap();
        assert_eq!(drain(&mut a_rx).len(), 1);
        assert!(drain(&mut a_other_tab).is_empty());
    }

    #[tokio::test]
    async fn non_friend_send_is_dropped() {
        let f = fixture();
        let (a_conn, mut a_rx) = f.engine.registry().connect(f.alice).await;
        let (_, mut c_rx) = f.engine.registry().connect(f.carol).await;

        let err = f.engine.send_message(f.alice, Some(a_conn), hi(f.carol)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Forbidden));
        assert!(f.db.get_conversation(f.alice, f.carol, MAX_HISTORY_PAGE, None).unwrap().is_empty());
        assert!(drain(&mut a_rx).is_empty());
        assert!(drain(&mut c_rx).is_empty());
    }

    #[tokio::test]
    async fn plaintext_is_stored_as_sent() {
        let f = fixture();
        let mut payload = hi(f.bob);
        payload.content = "  10k at 7, bring water \n".into();
        let msg = f.engine.send_message(f.alice, None, payload).await.unwrap();
        assert_eq!(msg.content, "  10k at 7, bring water \n");
        let stored = f.db.get_message(msg.id).unwrap().unwrap();
        assert_eq!(stored.content, "  10k at 7, bring water \n");
    }

    #[tokio::test]
    async fn blank_plaintext_rejected() {
        let f = fixture();
        let mut payload = hi(f.bob);
        payload.content = "   ".into();
        let err = f.engine.send_message(f.alice, None, payload).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Invalid(_)));
        assert!(f.db.get_conversation(f.alice, f.bob, MAX_HISTORY_PAGE, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn encrypted_message_stores_placeholder() {
        let f = fixture();
        let payload = SendMessagePayload {
            receiver_id: f.bob,
            content: "leaky plaintext".into(),
            encrypted: Some("Y2lwaGVydGV4dA==".into()),
            iv: Some("AAAAAAAAAAAAAAAA".into()),
            is_encrypted: true,
            ..Default::default()
        };
        let msg = f.engine.send_message(f.alice, None, payload).await.unwrap();
        assert_eq!(msg.content, ENCRYPTED_PLACEHOLDER);
        assert_eq!(msg.encrypted_content.as_deref(), Some("Y2lwaGVydGV4dA=="));

        let missing_iv = SendMessagePayload {
            receiver_id: f.bob,
            encrypted: Some("Y2lwaGVy".into()),
            is_encrypted: true,
            ..Default::default()
        };
        assert!(matches!(
            f.engine.send_message(f.alice, None, missing_iv).await,
            Err(DeliveryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn reaction_update_reaches_both_participants() {
        let f = fixture();
        let msg = f.engine.send_message(f.alice, None, hi(f.bob)).await.unwrap();
        let (_, mut a_rx) = f.engine.registry().connect(f.alice).await;
        let (_, mut b_rx) = f.engine.registry().connect(f.bob).await;

        let mine = f.engine.toggle_reaction(msg.id, f.bob, "👍").await.unwrap();
        assert_eq!(
            mine,
            vec![ReactionSummary { emoji: "👍".into(), count: 1, reacted_by_me: true }]
        );

        let expect = |me: bool| ServerEvent::ReactionUpdate {
            message_id: msg.id,
            reactions: vec![ReactionSummary { emoji: "👍".into(), count: 1, reacted_by_me: me }],
        };
        assert_eq!(drain(&mut a_rx), vec![expect(false)]);
        assert_eq!(drain(&mut b_rx), vec![expect(true)]);
    }

    #[tokio::test]
    async fn toggle_twice_restores_state() {
        let f = fixture();
        let msg = f.engine.send_message(f.alice, None, hi(f.bob)).await.unwrap();

        f.engine.toggle_reaction(msg.id, f.bob, "🔥").await.unwrap();
        f.engine.toggle_reaction(msg.id, f.alice, "🔥").await.unwrap();
        let view = f.engine.reactions(msg.id, f.alice).await.unwrap();
        assert_eq!(view[0].count, 2);

        let after = f.engine.toggle_reaction(msg.id, f.bob, "🔥").await.unwrap();
        assert_eq!(after[0].count, 1);
        assert!(!after[0].reacted_by_me);
        let after = f.engine.toggle_reaction(msg.id, f.alice, "🔥").await.unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn outsiders_cannot_react() {
        let f = fixture();
        let msg = f.engine.send_message(f.alice, None, hi(f.bob)).await.unwrap();
        assert!(matches!(
            f.engine.toggle_reaction(msg.id, f.carol, "👍").await,
            Err(DeliveryError::Forbidden)
        ));
        assert!(matches!(
            f.engine.toggle_reaction(9999, f.bob, "👍").await,
            Err(DeliveryError::NotFound)
        ));
        assert!(matches!(
            f.engine.toggle_reaction(msg.id, f.bob, "  ").await,
            Err(DeliveryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn delete_cascades_and_notifies_both() {
        let f = fixture();
        let msg = f.engine.send_message(f.alice, None, hi(f.bob)).await.unwrap();
        f.engine.toggle_reaction(msg.id, f.bob, "👍").await.unwrap();
        let (_, mut a_rx) = f.engine.registry().connect(f.alice).await;
        let (_, mut b_rx) = f.engine.registry().connect(f.bob).await;

        assert!(matches!(
            f.engine.delete_message(msg.id, f.bob).await,
            Err(DeliveryError::Forbidden)
        ));
        assert!(f.db.get_message(msg.id).unwrap().is_some());

        f.engine.delete_message(msg.id, f.alice).await.unwrap();
        assert!(f.db.get_message(msg.id).unwrap().is_none());
        assert!(f.db.get_reactions_for_messages(&[msg.id]).unwrap().is_empty());
        assert!(matches!(
            f.engine.reactions(msg.id, f.alice).await,
            Err(DeliveryError::NotFound)
        ));

        let deleted = ServerEvent::MessageDeleted { message_id: msg.id };
        assert_eq!(drain(&mut a_rx), vec![deleted.clone()]);
        assert_eq!(drain(&mut b_rx), vec![deleted]);
    }

    #[tokio::test]
    async fn history_carries_viewer_reactions() {
        let f = fixture();
        let first = f.engine.send_message(f.alice, None, hi(f.bob)).await.unwrap();
        f.engine.send_message(f.bob, None, hi(f.alice)).await.unwrap();
        f.engine.toggle_reaction(first.id, f.bob, "👍").await.unwrap();

        let history = f.engine.history(f.bob, f.alice, 50, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].0.id, first.id);
        assert!(history[0].1[0].reacted_by_me);
        assert!(history[1].1.is_empty());

        assert!(matches!(
            f.engine.history(f.carol, f.alice, 50, None).await,
            Err(DeliveryError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn long_history_is_paged() {
        let f = fixture();
        let total: i64 = 33_000;
        f.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO messages (sender_id, receiver_id, content, message_type) VALUES (?1, ?2, ?3, 'text')",
                )?;
                for i in 0..total {
                    stmt.execute((f.alice, f.bob, format!("m{i}")))?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .unwrap();
        let last = f.engine.send_message(f.alice, None, hi(f.bob)).await.unwrap();
        f.engine.toggle_reaction(last.id, f.bob, "💪").await.unwrap();

        let page = f.engine.history(f.bob, f.alice, u32::MAX, None).await.unwrap();
        assert_eq!(page.len(), MAX_HISTORY_PAGE as usize);
        let (newest, reactions) = page.last().unwrap();
        assert_eq!(newest.id, last.id);
        assert_eq!(reactions[0].emoji, "💪");
        assert!(reactions[0].reacted_by_me);
        assert!(page.windows(2).all(|w| w[0].0.id < w[1].0.id));

        let older = f.engine.history(f.bob, f.alice, 0, Some(page[0].0.id)).await.unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].0.id, page[0].0.id - 1);
    }
}
