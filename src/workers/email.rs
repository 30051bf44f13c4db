use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    mail::{MailError, Mailer, OutboundEmail},
    models::BackgroundJob,
    queue::{backoff_for_attempt, JOB_SEND_EMAIL},
};

use super::{JobExecution, JobHandler, WorkerContext};

/// Delivery attempts before a message is given up on.
pub const MAX_ATTEMPTS: i32 = 5;

pub struct SendEmailJob;

impl SendEmailJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendEmailJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for SendEmailJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_EMAIL
    }

    async fn handle(&self, ctx: Arc<WorkerContext>, job: BackgroundJob) -> JobExecution {
        deliver(ctx.mailer.as_ref(), &job).await
    }
}

/// Sends one queued email. `job.attempts` already counts this attempt.
pub async fn deliver(mailer: &dyn Mailer, job: &BackgroundJob) -> JobExecution {
    let email: OutboundEmail = match serde_json::from_value(job.payload.clone()) {
        Ok(email) => email,
        Err(err) => {
            return JobExecution::Failed {
                error: format!("invalid email payload: {err}"),
            }
        }
    };

    match mailer.send(&email).await {
        Ok(()) => {
            info!(job_id = %job.id, subject = %email.subject, "queued email delivered");
            JobExecution::Success
        }
        Err(MailError::Address(err)) => JobExecution::Failed {
            error: format!("undeliverable address: {err}"),
        },
        Err(err) if job.attempts >= MAX_ATTEMPTS => JobExecution::Failed {
            error: format!("giving up after {} attempts: {err}", job.attempts),
        },
        Err(err) => {
            warn!(job_id = %job.id, attempt = job.attempts, error = %err, "email delivery failed");
            JobExecution::Retry {
                delay: backoff_for_attempt(job.attempts),
                error: err.to_string(),
            }
        }
    }
}
