use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{BackgroundJob, NewBackgroundJob};
use crate::schema::background_jobs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const JOB_SEND_EMAIL: &str = "send-email";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<NaiveDateTime>,
) -> QueueResult<BackgroundJob> {
    let new_job = NewBackgroundJob {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        payload,
        status: STATUS_QUEUED.to_string(),
        run_after: run_after.unwrap_or_else(|| Utc::now().naive_utc()),
    };

    let job = diesel::insert_into(background_jobs::table)
        .values(&new_job)
        .get_result(conn)?;
    Ok(job)
}

pub fn reserve_job(
    conn: &mut PgConnection,
    job_types: &[&str],
) -> QueueResult<Option<BackgroundJob>> {
    let now = Utc::now().naive_utc();

    conn.transaction(|conn| {
        let job_opt = background_jobs::table
            .filter(background_jobs::status.eq(STATUS_QUEUED))
            .filter(background_jobs::run_after.le(now))
            .filter(background_jobs::job_type.eq_any(job_types))
            .order(background_jobs::run_after.asc())
            .for_update()
            .skip_locked()
            .first::<BackgroundJob>(conn)
            .optional()?;

        match job_opt {
            Some(job) => {
                let refreshed = diesel::update(background_jobs::table.find(job.id))
                    .set((
                        background_jobs::status.eq(STATUS_PROCESSING),
                        background_jobs::attempts.eq(job.attempts + 1),
                        background_jobs::updated_at.eq(now),
                    ))
                    .get_result::<BackgroundJob>(conn)?;
                Ok::<Option<BackgroundJob>, diesel::result::Error>(Some(refreshed))
            }
            None => Ok(None),
        }
    })
    .map_err(QueueError::from)
}

pub fn mark_job_succeeded(conn: &mut PgConnection, job_id: Uuid) -> QueueResult<()> {
    diesel::update(background_jobs::table.find(job_id))
        .set((
            background_jobs::status.eq(STATUS_SUCCEEDED),
            background_jobs::last_error.eq::<Option<String>>(None),
            background_jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn retry_job_after(
    conn: &mut PgConnection,
    job_id: Uuid,
    delay: Duration,
    error_message: &str,
) -> QueueResult<()> {
    let next_run = Utc::now()
        + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

    diesel::update(background_jobs::table.find(job_id))
        .set((
            background_jobs::status.eq(STATUS_QUEUED),
            background_jobs::run_after.eq(next_run.naive_utc()),
            background_jobs::last_error.eq(Some(error_message.to_string())),
            background_jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_job_failed(
    conn: &mut PgConnection,
    job_id: Uuid,
    error_message: &str,
) -> QueueResult<()> {
    diesel::update(background_jobs::table.find(job_id))
        .set((
            background_jobs::status.eq(STATUS_FAILED),
            background_jobs::last_error.eq(Some(error_message.to_string())),
            background_jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Exponential backoff for failed deliveries: 30s, 60s, 120s, ...
pub fn backoff_for_attempt(attempt: i32) -> Duration {
    let exponent = attempt.clamp(1, 10) as u32 - 1;
    Duration::from_secs(30 * 2u64.pow(exponent))
}

#[cfg(test)]
mod tests {
    use super::backoff_for_attempt;
    use std::time::Duration;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(30));
        assert_eq!(backoff_for_attempt(2), Duration::from_secs(60));
        assert_eq!(backoff_for_attempt(4), Duration::from_secs(240));
    }

    #[test]
    fn backoff_clamps_out_of_range_attempts() {
        assert_eq!(backoff_for_attempt(0), Duration::from_secs(30));
        assert_eq!(backoff_for_attempt(50), backoff_for_attempt(10));
    }
}
