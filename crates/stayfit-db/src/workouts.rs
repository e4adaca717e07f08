use crate::models::{ParticipantRow, WorkoutRow};
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::Row;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_ACCEPTED: &str = "accepted";
pub const STATUS_DECLINED: &str = "declined";
pub const STATUS_OPTED_OUT: &str = "opted_out";

const WORKOUT_SELECT: &str = "SELECT w.id, w.creator_id, u.username, w.workout, w.date, w.time,
        w.reminder_sent, w.created_at
     FROM workout_schedules w JOIN users u ON u.id = w.creator_id";

impl Database {
    /// Create a schedule and a pending participant row per invitee.
    pub fn create_workout(
        &self,
        creator_id: i64,
        workout: &str,
        date: &str,
        time: &str,
        invitee_ids: &[i64],
    ) -> Result<i64> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO workout_schedules (creator_id, workout, date, time) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![creator_id, workout, date, time],
            )?;
            let id = tx.last_insert_rowid();
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO workout_participants (schedule_id, user_id, status)
                     VALUES (?1, ?2, ?3)",
                )?;
                for invitee in invitee_ids {
                    stmt.execute(rusqlite::params![id, invitee, STATUS_PENDING])?;
                }
            }
            tx.commit()?;
            Ok(id)
        })
    }

    pub fn get_workout(&self, id: i64) -> Result<Option<WorkoutRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{WORKOUT_SELECT} WHERE w.id = ?1"), [id], map_workout)
                .optional()
        })
    }

    /// Schedules the user created or was invited to, soonest first.
    pub fn workouts_for_user(&self, user_id: i64) -> Result<Vec<WorkoutRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{WORKOUT_SELECT}
                 WHERE w.creator_id = ?1
                    OR w.id IN (SELECT schedule_id FROM workout_participants WHERE user_id = ?1)
                 ORDER BY w.date ASC, w.time ASC, w.id ASC"
            ))?;
            let rows = stmt
                .query_map([user_id], map_workout)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn workout_participants(&self, schedule_id: i64) -> Result<Vec<ParticipantRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.schedule_id, p.user_id, u.username, p.status
                 FROM workout_participants p JOIN users u ON u.id = p.user_id
                 WHERE p.schedule_id = ?1
                 ORDER BY u.username",
            )?;
            let rows = stmt
                .query_map([schedule_id], |row| {
                    Ok(ParticipantRow {
                        schedule_id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                        status: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false if the user is not a participant of the schedule.
    pub fn set_participant_status(&self, schedule_id: i64, user_id: i64, status: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE workout_participants SET status = ?3 WHERE schedule_id = ?1 AND user_id = ?2",
                rusqlite::params![schedule_id, user_id, status],
            )?;
            Ok(updated > 0)
        })
    }

    pub fn delete_workout(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM workout_participants WHERE schedule_id = ?1", [id])?;
            tx.execute("DELETE FROM workout_schedules WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Schedules starting in `[from, until]` whose reminder is still unsent.
    /// Bounds are `YYYY-MM-DD HH:MM:SS`.
    pub fn due_workout_reminders(&self, from: &str, until: &str) -> Result<Vec<WorkoutRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{WORKOUT_SELECT}
                 WHERE w.reminder_sent = 0
                   AND datetime(w.date || ' ' || w.time) BETWEEN datetime(?1) AND datetime(?2)
                 ORDER BY w.date, w.time"
            ))?;
            let rows = stmt
                .query_map([from, until], map_workout)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn mark_workout_reminded(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE workout_schedules SET reminder_sent = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }
}

fn map_workout(row: &Row<'_>) -> rusqlite::Result<WorkoutRow> {
    Ok(WorkoutRow {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        creator_username: row.get(2)?,
        workout: row.get(3)?,
        date: row.get(4)?,
        time: row.get(5)?,
        reminder_sent: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::db_with_users;

    #[test]
    fn invitees_start_pending() {
        let (db, ids) = db_with_users(&["alice", "bob", "carol"]);
        let id = db
            .create_workout(ids[0], "Leg day", "2026-03-01", "18:30", &[ids[1], ids[2]])
            .unwrap();

        let parts = db.workout_participants(id).unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.status == STATUS_PENDING));

        assert!(db.set_participant_status(id, ids[1], STATUS_ACCEPTED).unwrap());
        assert!(!db.set_participant_status(id, ids[0], STATUS_ACCEPTED).unwrap());

        assert_eq!(db.workouts_for_user(ids[2]).unwrap().len(), 1);
        assert_eq!(db.workouts_for_user(ids[0]).unwrap()[0].creator_username, "alice");
    }

    #[test]
    fn reminders_window() {
        let (db, ids) = db_with_users(&["alice"]);
        let soon = db.create_workout(ids[0], "Run", "2026-03-01", "18:30", &[]).unwrap();
        db.create_workout(ids[0], "Swim", "2026-03-01", "21:00", &[]).unwrap();

        let due = db
            .due_workout_reminders("2026-03-01 18:10:00", "2026-03-01 18:40:00")
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, soon);

        db.mark_workout_reminded(soon).unwrap();
        assert!(db
            .due_workout_reminders("2026-03-01 18:10:00", "2026-03-01 18:40:00")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn delete_removes_participants() {
        let (db, ids) = db_with_users(&["alice", "bob"]);
        let id = db.create_workout(ids[0], "Run", "2026-03-01", "07:00", &[ids[1]]).unwrap();
        db.delete_workout(id).unwrap();
        assert!(db.get_workout(id).unwrap().is_none());
        assert!(db.workout_participants(id).unwrap().is_empty());
    }
}
