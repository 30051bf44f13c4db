use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    db::{PgPool, PgPooledConnection},
    mail::Mailer,
    models::BackgroundJob,
    queue::{mark_job_failed, mark_job_succeeded, reserve_job, retry_job_after, QueueError},
};

pub mod email;

/// Shared dependencies handed to every job handler.
pub struct WorkerContext {
    pub pool: PgPool,
    pub mailer: Arc<dyn Mailer>,
}

impl WorkerContext {
    fn db(&self) -> Option<PgPooledConnection> {
        match self.pool.get() {
            Ok(conn) => Some(conn),
            Err(err) => {
                error!(error = %err, "failed to obtain database connection in worker");
                None
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, ctx: Arc<WorkerContext>, job: BackgroundJob) -> JobExecution;
}

pub struct Worker {
    ctx: Arc<WorkerContext>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        ctx: Arc<WorkerContext>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            ctx,
            handlers: map,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!("worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn tick(&self) -> Result<bool, QueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let Some(mut conn) = self.ctx.db() else {
            return Ok(false);
        };
        let job_opt = reserve_job(&mut conn, &job_types)?;
        drop(conn);

        let Some(job) = job_opt else {
            return Ok(false);
        };

        let Some(handler) = self.handlers.get(job.job_type.as_str()) else {
            error!(job_type = %job.job_type, "no handler registered for job type");
            if let Some(mut conn) = self.ctx.db() {
                mark_job_failed(&mut conn, job.id, "no handler registered")?;
            }
            return Ok(true);
        };

        let job_id = job.id;
        let job_type = job.job_type.clone();
        match handler.handle(self.ctx.clone(), job).await {
            JobExecution::Success => {
                if let Some(mut conn) = self.ctx.db() {
                    mark_job_succeeded(&mut conn, job_id)?;
                    info!(job_id = %job_id, job_type = %job_type, "job completed successfully");
                }
            }
            JobExecution::Retry { delay, error } => {
                warn!(job_id = %job_id, job_type = %job_type, %error, "job will retry");
                if let Some(mut conn) = self.ctx.db() {
                    retry_job_after(&mut conn, job_id, delay, &error)?;
                }
            }
            JobExecution::Failed { error } => {
                error!(job_id = %job_id, job_type = %job_type, %error, "job failed");
                if let Some(mut conn) = self.ctx.db() {
                    mark_job_failed(&mut conn, job_id, &error)?;
                }
            }
        }
        Ok(true)
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![Arc::new(email::SendEmailJob::new())]
}
