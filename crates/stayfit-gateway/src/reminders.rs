use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use stayfit_db::Database;
use stayfit_db::workouts::STATUS_ACCEPTED;
use stayfit_types::models::{Notification, WorkoutReminderNotice};

use crate::blocking;
use crate::error::DeliveryError;
use crate::fanout::NotificationFanout;

pub const REMINDER_TICK: Duration = Duration::from_secs(60);

/// How far ahead, in minutes, a schedule must start to be reminded.
pub const REMINDER_LEAD_MINUTES: i64 = 30;

/// Background task sending workout reminders every [`REMINDER_TICK`].
pub fn spawn(db: Arc<Database>, fanout: NotificationFanout) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(REMINDER_TICK);
        loop {
            tick.tick().await;
            match run_pass(&db, &fanout, Utc::now()).await {
                Ok(0) => {}
                Ok(n) => info!("sent {} workout reminder(s)", n),
                Err(e) => error!("workout reminder pass failed: {}", e),
            }
        }
    })
}

/// Remind the creator and accepted invitees of every schedule starting within
/// [`REMINDER_LEAD_MINUTES`] of `now`, then mark it reminded. Schedule times are UTC.
/// Returns the number of notifications sent.
pub async fn run_pass(
    db: &Arc<Database>,
    fanout: &NotificationFanout,
    now: DateTime<Utc>,
) -> Result<usize, DeliveryError> {
    let from = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let until = (now + chrono::Duration::minutes(REMINDER_LEAD_MINUTES)).format("%Y-%m-%d %H:%M:%S").to_string();

    let due = blocking(db, move |db| {
        let mut due = Vec::new();
        for workout in db.due_workout_reminders(&from, &until)? {
            let accepted: Vec<i64> = db
                .workout_participants(workout.id)?
                .into_iter()
                .filter(|p| p.status == STATUS_ACCEPTED)
                .map(|p| p.user_id)
                .collect();
            db.mark_workout_reminded(workout.id)?;
            due.push((workout, accepted));
        }
        Ok(due)
    })
    .await?;

    let mut sent = 0;
    for (workout, accepted) in due {
        let notification = Notification::WorkoutReminder(WorkoutReminderNotice {
            schedule_id: workout.id,
            workout: workout.workout.clone(),
            date: workout.date.clone(),
            time: workout.time.clone(),
        });
        for user in std::iter::once(workout.creator_id).chain(accepted) {
            match fanout.deliver(user, notification.clone()).await {
                Ok(_) => sent += 1,
                Err(e) => error!("reminder for schedule {} to user {} failed: {}", workout.id, user, e),
            }
        }
    }
    Ok(sent)
}
