use crate::models::{CommentRow, FeedRow, PostRow};
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::{Connection, Row};

/// Feed columns for viewer ?1.
const FEED_SELECT: &str = "SELECT p.id, p.user_id, u.username, p.caption, p.media_url,
        (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id),
        (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id),
        EXISTS (SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = ?1),
        EXISTS (SELECT 1 FROM saves s WHERE s.post_id = p.id AND s.user_id = ?1),
        p.created_at
     FROM posts p JOIN users u ON u.id = p.user_id";

impl Database {
    // -- Posts --

    pub fn create_post(&self, user_id: i64, caption: &str, media_url: Option<&str>) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (user_id, caption, media_url) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, caption, media_url],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_post(&self, id: i64) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, caption, media_url, created_at FROM posts WHERE id = ?1",
                [id],
                |row| {
                    Ok(PostRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        caption: row.get(2)?,
                        media_url: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    /// The viewer's own posts plus their friends' posts, newest first.
    pub fn feed(&self, viewer_id: i64) -> Result<Vec<FeedRow>> {
        self.with_conn(|conn| {
            query_feed(
                conn,
                "WHERE p.user_id = ?1 OR p.user_id IN (SELECT friend_id FROM friends WHERE user_id = ?1)",
                viewer_id,
            )
        })
    }

    pub fn saved_posts(&self, viewer_id: i64) -> Result<Vec<FeedRow>> {
        self.with_conn(|conn| {
            query_feed(
                conn,
                "WHERE p.id IN (SELECT post_id FROM saves WHERE user_id = ?1)",
                viewer_id,
            )
        })
    }

    /// Remove a post with its comments, likes and saves.
    pub fn delete_post(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for table in ["comments", "likes", "saves"] {
                tx.execute(&format!("DELETE FROM {table} WHERE post_id = ?1"), [id])?;
            }
            tx.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(())
        })
    }

    // -- Likes & saves --

    /// Returns (liked, like_count) after the toggle.
    pub fn toggle_like(&self, post_id: i64, user_id: i64) -> Result<(bool, usize)> {
        self.with_conn(|conn| toggle_marker(conn, "likes", post_id, user_id))
    }

    /// Returns (saved, save_count) after the toggle.
    pub fn toggle_save(&self, post_id: i64, user_id: i64) -> Result<(bool, usize)> {
        self.with_conn(|conn| toggle_marker(conn, "saves", post_id, user_id))
    }

    // -- Comments --

    pub fn create_comment(&self, post_id: i64, user_id: i64, content: &str) -> Result<CommentRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (post_id, user_id, content) VALUES (?1, ?2, ?3)",
                rusqlite::params![post_id, user_id, content],
            )?;
            let id = conn.last_insert_rowid();
            let row = conn.query_row(
                "SELECT c.id, c.post_id, c.user_id, u.username, c.content, c.created_at
                 FROM comments c JOIN users u ON u.id = c.user_id
                 WHERE c.id = ?1",
                [id],
                map_comment,
            )?;
            Ok(row)
        })
    }

    pub fn comments_for_post(&self, post_id: i64) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.post_id, c.user_id, u.username, c.content, c.created_at
                 FROM comments c JOIN users u ON u.id = c.user_id
                 WHERE c.post_id = ?1
                 ORDER BY c.created_at ASC, c.id ASC",
            )?;
            let rows = stmt
                .query_map([post_id], map_comment)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_feed(conn: &Connection, filter: &str, viewer_id: i64) -> Result<Vec<FeedRow>> {
    let mut stmt = conn.prepare(&format!(
        "{FEED_SELECT} {filter} ORDER BY p.created_at DESC, p.id DESC"
    ))?;
    let rows = stmt
        .query_map([viewer_id], |row| {
            Ok(FeedRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                username: row.get(2)?,
                caption: row.get(3)?,
                media_url: row.get(4)?,
                like_count: row.get(5)?,
                comment_count: row.get(6)?,
                liked: row.get(7)?,
                saved: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Flip a (post, user) marker row in `likes` or `saves`.
fn toggle_marker(conn: &Connection, table: &str, post_id: i64, user_id: i64) -> Result<(bool, usize)> {
    let removed = conn.execute(
        &format!("DELETE FROM {table} WHERE post_id = ?1 AND user_id = ?2"),
        [post_id, user_id],
    )?;
    if removed == 0 {
        conn.execute(
            &format!("INSERT INTO {table} (post_id, user_id) VALUES (?1, ?2)"),
            [post_id, user_id],
        )?;
    }
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE post_id = ?1"),
        [post_id],
        |row| row.get(0),
    )?;
    Ok((removed == 0, count as usize))
}

fn map_comment(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        user_id: row.get(2)?,
        username: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_support::db_with_users;

    #[test]
    fn feed_includes_friends_only() {
        let (db, ids) = db_with_users(&["alice", "bob", "carol"]);
        db.add_friendship(ids[0], ids[1]).unwrap();
        db.create_post(ids[0], "mine", None).unwrap();
        db.create_post(ids[1], "friend", Some("/uploads/a.jpg")).unwrap();
        db.create_post(ids[2], "stranger", None).unwrap();

        let feed = db.feed(ids[0]).unwrap();
        let captions: Vec<_> = feed.iter().map(|p| p.caption.as_str()).collect();
        assert_eq!(captions, ["friend", "mine"]);
        assert_eq!(feed[0].media_url.as_deref(), Some("/uploads/a.jpg"));
    }

    #[test]
    fn like_and_save_toggle_independently() {
        let (db, ids) = db_with_users(&["alice", "bob"]);
        let post = db.create_post(ids[0], "run", None).unwrap();

        assert_eq!(db.toggle_like(post, ids[1]).unwrap(), (true, 1));
        assert_eq!(db.toggle_like(post, ids[0]).unwrap(), (true, 2));
        assert_eq!(db.toggle_save(post, ids[1]).unwrap(), (true, 1));
        assert_eq!(db.toggle_like(post, ids[1]).unwrap(), (false, 1));

        let saved = db.saved_posts(ids[1]).unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].saved);
        assert!(!saved[0].liked);
        assert_eq!(saved[0].like_count, 1);
    }

    #[test]
    fn comments_and_post_delete() {
        let (db, ids) = db_with_users(&["alice", "bob"]);
        let post = db.create_post(ids[0], "run", None).unwrap();
        let c = db.create_comment(post, ids[1], "nice pace").unwrap();
        assert_eq!(c.username, "bob");
        assert_eq!(db.comments_for_post(post).unwrap().len(), 1);

        db.toggle_like(post, ids[1]).unwrap();
        db.delete_post(post).unwrap();
        assert!(db.get_post(post).unwrap().is_none());
        assert!(db.comments_for_post(post).unwrap().is_empty());
    }
}
