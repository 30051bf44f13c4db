//! Data retention: removes stale uploads and anonymizes inactive candidates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::Serialize;
use tokio::task;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{Application, User};
use crate::storage::{application_document_prefix, ObjectStorage};
use crate::store::{AnonymizedIdentity, ApplicationScrub, Store, StoreError, StoreResult};
use crate::utils::json::decode_document_list;

pub const ANONYMIZED_NAME: &str = "Anonymized user";
/// Not a valid argon2 hash, so login can never succeed again.
pub const ANONYMIZED_PASSWORD_HASH: &str = "!anonymized";

pub fn anonymized_identity(user_id: Uuid) -> AnonymizedIdentity {
    AnonymizedIdentity {
        name: ANONYMIZED_NAME.to_string(),
        email: format!("anonymized+{user_id}@invalid"),
        password_hash: ANONYMIZED_PASSWORD_HASH.to_string(),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub applications_examined: usize,
    pub files_deleted: usize,
    pub file_failures: usize,
    pub applications_scrubbed: usize,
    pub users_anonymized: usize,
    pub row_errors: usize,
}

pub struct RetentionSweeper {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStorage>,
    max_age: ChronoDuration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn Store>, storage: Arc<dyn ObjectStorage>, retention_days: i64) -> Self {
        Self {
            store,
            storage,
            max_age: ChronoDuration::days(retention_days),
        }
    }

    pub async fn sweep(&self) -> StoreResult<SweepReport> {
        self.sweep_at(Utc::now().naive_utc()).await
    }

    /// One pass over every application older than the retention window.
    /// A failing row is logged and skipped; only the initial query can fail
    /// the sweep.
    pub async fn sweep_at(&self, now: NaiveDateTime) -> StoreResult<SweepReport> {
        let cutoff = now - self.max_age;
        let applications = self
            .blocking(move |store| store.applications_created_before(cutoff))
            .await?;
        let mut report = SweepReport {
            applications_examined: applications.len(),
            ..SweepReport::default()
        };

        for application in applications {
            if let Err(err) = self.sweep_application(&application, cutoff, now, &mut report).await {
                report.row_errors += 1;
                error!(
                    application_id = %application.id,
                    error = %err,
                    "retention sweep failed for application"
                );
            }
        }

        info!(
            cutoff = %cutoff,
            examined = report.applications_examined,
            files_deleted = report.files_deleted,
            file_failures = report.file_failures,
            scrubbed = report.applications_scrubbed,
            anonymized = report.users_anonymized,
            row_errors = report.row_errors,
            "retention sweep finished"
        );
        Ok(report)
    }

    async fn sweep_application(
        &self,
        application: &Application,
        cutoff: NaiveDateTime,
        now: NaiveDateTime,
        report: &mut SweepReport,
    ) -> StoreResult<()> {
        let (files, foreign) = stored_files(application);
        for key in &foreign {
            warn!(
                application_id = %application.id,
                key = %key,
                "document reference outside the application prefix; not deleting"
            );
        }

        let mut all_deleted = true;
        for key in &files {
            match self.storage.delete_object(key).await {
                Ok(()) => report.files_deleted += 1,
                Err(err) => {
                    all_deleted = false;
                    report.file_failures += 1;
                    warn!(
                        application_id = %application.id,
                        key = %key,
                        error = %err,
                        "failed to delete stored file"
                    );
                }
            }
        }

        let user_id = application.user_id;
        let user = self.blocking(move |store| store.find_user(user_id)).await?;
        let inactive = user
            .as_ref()
            .map(|user| is_inactive(user, cutoff))
            .unwrap_or(false);

        if let Some(user) = user.filter(|user| inactive && !user.is_anonymized()) {
            let user_id = user.id;
            let anonymized = self
                .blocking(move |store| {
                    store.anonymize_user(user_id, &anonymized_identity(user_id), now)
                })
                .await?;
            if anonymized {
                report.users_anonymized += 1;
                info!(user_id = %user_id, "anonymized inactive user");
            }
        }

        let scrub = ApplicationScrub {
            clear_files: all_deleted && application.documents_url.is_some(),
            clear_personal_data: inactive && has_personal_data(application),
        };
        if scrub.clear_files || scrub.clear_personal_data {
            let application_id = application.id;
            self.blocking(move |store| store.scrub_application(application_id, scrub))
                .await?;
            report.applications_scrubbed += 1;
        }
        Ok(())
    }

    /// Runs a store call on the blocking pool.
    async fn blocking<T, F>(&self, call: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> StoreResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        match task::spawn_blocking(move || call(&*store)).await {
            Ok(result) => result,
            Err(join_err) => Err(StoreError::Unavailable(format!(
                "retention store task failed: {join_err}"
            ))),
        }
    }
}

/// Inactivity is judged on the last login, or account creation for users
/// who never logged in.
fn is_inactive(user: &User, cutoff: NaiveDateTime) -> bool {
    user.last_login_at.unwrap_or(user.created_at) < cutoff
}

/// Splits the document list into keys this service wrote for the
/// application and anything else. Only the former are ever deleted; the
/// resume link is caller-supplied and never treated as a storage key.
fn stored_files(application: &Application) -> (Vec<String>, Vec<String>) {
    let prefix = application_document_prefix(application.id);
    decode_document_list(application.documents_url.as_deref())
        .into_iter()
        .partition(|key| key.starts_with(&prefix) && !key.contains(".."))
}

/// Runs the sweeper on a fixed cadence. A tick that finds the previous run
/// still in progress is skipped.
#[derive(Clone)]
pub struct RetentionScheduler {
    sweeper: Arc<RetentionSweeper>,
    period: Duration,
    running: Arc<AtomicBool>,
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RetentionScheduler {
    pub fn new(sweeper: Arc<RetentionSweeper>, period: Duration) -> Self {
        Self {
            sweeper,
            period,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `None` when a previous run is still going.
    pub async fn run_once(&self) -> Option<SweepReport> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("retention sweep still running; skipping this tick");
            return None;
        }
        let _guard = RunningGuard(self.running.clone());

        match self.sweeper.sweep().await {
            Ok(report) => Some(report),
            Err(err) => {
                error!(error = %err, "retention sweep failed");
                None
            }
        }
    }

    pub async fn run(self) {
        info!(period_secs = self.period.as_secs(), "retention scheduler started");
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.run_once().await;
            });
        }
    }
}
