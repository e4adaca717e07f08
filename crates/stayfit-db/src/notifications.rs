use crate::models::NotificationRow;
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::Row;

const NOTIFICATION_COLUMNS: &str = "id, user_id, type, data, read, created_at";

impl Database {
    pub fn insert_notification(&self, user_id: i64, kind: &str, data: &str) -> Result<NotificationRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (user_id, type, data) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, kind, data],
            )?;
            let id = conn.last_insert_rowid();
            let row = conn.query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                [id],
                map_notification,
            )?;
            Ok(row)
        })
    }

    /// A user's notifications, newest first, optionally restricted to one type.
    pub fn list_notifications(&self, user_id: i64, kind: Option<&str>) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1 AND (?2 IS NULL OR type = ?2)
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, kind], map_notification)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                [id],
                map_notification,
            )
            .optional()
        })
    }

    pub fn unread_notification_count(&self, user_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Mark the given notifications read. Ids owned by other users are ignored.
    /// Read is one-way: nothing here can set it back to 0.
    pub fn mark_notifications_read(&self, user_id: i64, ids: &[i64]) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare(
                    "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2 AND read = 0",
                )?;
                for id in ids {
                    updated += stmt.execute([*id, user_id])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                [user_id],
            )?;
            Ok(updated)
        })
    }

    /// Returns false if no such notification belongs to the user.
    pub fn delete_notification(&self, user_id: i64, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
            )?;
            Ok(removed > 0)
        })
    }
}

fn map_notification(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        data: row.get(3)?,
        read: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_support::db_with_users;

    #[test]
    fn filter_by_type_and_owner() {
        let (db, ids) = db_with_users(&["alice", "bob"]);
        db.insert_notification(ids[0], "like", r#"{"postId":1}"#).unwrap();
        db.insert_notification(ids[0], "comment", r#"{"postId":1}"#).unwrap();
        db.insert_notification(ids[1], "like", r#"{"postId":2}"#).unwrap();

        let all = db.list_notifications(ids[0], None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].kind, "comment");

        let likes = db.list_notifications(ids[0], Some("like")).unwrap();
        assert_eq!(likes.len(), 1);
        assert!(!likes[0].read);
    }

    #[test]
    fn mark_read_is_scoped_and_monotonic() {
        let (db, ids) = db_with_users(&["alice", "bob"]);
        let mine = db.insert_notification(ids[0], "like", "{}").unwrap();
        let theirs = db.insert_notification(ids[1], "like", "{}").unwrap();

        assert_eq!(db.mark_notifications_read(ids[0], &[mine.id, theirs.id]).unwrap(), 1);
        assert!(db.get_notification(mine.id).unwrap().unwrap().read);
        assert!(!db.get_notification(theirs.id).unwrap().unwrap().read);

        // Already read: nothing changes, nothing flips back.
        assert_eq!(db.mark_notifications_read(ids[0], &[mine.id]).unwrap(), 0);
        assert!(db.get_notification(mine.id).unwrap().unwrap().read);
    }

    #[test]
    fn mark_all_read_covers_every_row() {
        let (db, ids) = db_with_users(&["alice"]);
        for _ in 0..3 {
            db.insert_notification(ids[0], "post", "{}").unwrap();
        }
        assert_eq!(db.unread_notification_count(ids[0]).unwrap(), 3);
        assert_eq!(db.mark_all_notifications_read(ids[0]).unwrap(), 3);
        assert_eq!(db.unread_notification_count(ids[0]).unwrap(), 0);
        assert!(db.list_notifications(ids[0], None).unwrap().iter().all(|n| n.read));
    }

    #[test]
    fn delete_only_own() {
        let (db, ids) = db_with_users(&["alice", "bob"]);
        let n = db.insert_notification(ids[0], "like", "{}").unwrap();
        assert!(!db.delete_notification(ids[1], n.id).unwrap());
        assert!(db.delete_notification(ids[0], n.id).unwrap());
        assert!(db.get_notification(n.id).unwrap().is_none());
    }
}
