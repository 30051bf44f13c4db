//! Persistence boundary for the recruitment workflow.
//!
//! The workflow engine, the retention sweeper and the HTTP handlers only see
//! [`Store`]; [`PgStore`] is the diesel implementation used in production.

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::mail::OutboundEmail;
use crate::models::{
    Application, Institution, Job, NewApplication, NewInstitution, NewJob, NewNotification,
    NewUser, Notification, User,
};
use crate::permissions::{RoleAssignment, RoleName};
use crate::workflow::status::{ApplicationStatus, DocsStatus, JobStatus};

pub mod pg;

pub use pg::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Profile captured from an unauthenticated applicant.
#[derive(Debug, Clone)]
pub struct ShadowUserProfile {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub linkedin_url: Option<String>,
    pub resume_url: Option<String>,
    pub institution_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ProvisionedUser {
    pub user: User,
    pub created: bool,
}

/// Which applications a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationScope {
    All,
    Institution(Uuid),
    AuthoredBy(Uuid),
    Candidate(Uuid),
}

/// Application joined with the fields listings need from its job and candidate.
#[derive(Debug, Clone)]
pub struct ApplicationListing {
    pub application: Application,
    pub job_title: String,
    pub institution_id: Uuid,
    pub candidate_name: String,
    pub candidate_email: String,
}

/// What the stored row must still look like for an update to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedState {
    pub status: ApplicationStatus,
    /// When set, the stored document list must also be unchanged.
    pub documents_url: Option<Option<String>>,
}

impl ExpectedState {
    pub fn status(status: ApplicationStatus) -> Self {
        Self {
            status,
            documents_url: None,
        }
    }

    pub fn with_documents(mut self, documents_url: Option<String>) -> Self {
        self.documents_url = Some(documents_url);
        self
    }
}

/// Column updates applied together with a status compare-and-set.
#[derive(Debug, Clone)]
pub struct ApplicationChanges {
    pub status: ApplicationStatus,
    pub trial_lesson_date: Option<NaiveDateTime>,
    pub trial_lesson_score: Option<f64>,
    pub trial_lesson_notes: Option<Option<String>>,
    pub documents_url: Option<String>,
    pub docs_status: Option<DocsStatus>,
}

impl ApplicationChanges {
    pub fn status(status: ApplicationStatus) -> Self {
        Self {
            status,
            trial_lesson_date: None,
            trial_lesson_score: None,
            trial_lesson_notes: None,
            documents_url: None,
            docs_status: None,
        }
    }
}

/// Columns the retention sweep clears. `clear_files` drops the document
/// references; `clear_personal_data` drops the resume link and trial notes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplicationScrub {
    pub clear_files: bool,
    pub clear_personal_data: bool,
}

/// Replacement identity written over an inactive account.
#[derive(Debug, Clone)]
pub struct AnonymizedIdentity {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

pub trait Store: Send + Sync + 'static {
    // Identity
    fn insert_user(&self, user: NewUser) -> StoreResult<User>;
    fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;
    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Atomic upsert keyed on email: concurrent callers observe one account.
    fn provision_shadow_user(&self, profile: ShadowUserProfile) -> StoreResult<ProvisionedUser>;
    fn record_login(&self, user_id: Uuid, at: NaiveDateTime) -> StoreResult<()>;
    fn set_active_institution(&self, user_id: Uuid, institution: Option<Uuid>)
        -> StoreResult<()>;
    /// Returns `false` when the account was already anonymized.
    fn anonymize_user(
        &self,
        user_id: Uuid,
        identity: &AnonymizedIdentity,
        at: NaiveDateTime,
    ) -> StoreResult<bool>;
    fn role_assignments(&self, user_id: Uuid) -> StoreResult<Vec<RoleAssignment>>;
    fn assign_role(
        &self,
        user_id: Uuid,
        institution_id: Option<Uuid>,
        role: RoleName,
    ) -> StoreResult<()>;
    fn insert_institution(&self, institution: NewInstitution) -> StoreResult<Institution>;
    fn find_institution(&self, institution_id: Uuid) -> StoreResult<Option<Institution>>;

    // Jobs
    fn insert_job(&self, job: NewJob) -> StoreResult<Job>;
    fn find_job(&self, job_id: Uuid) -> StoreResult<Option<Job>>;
    fn list_published_jobs(&self) -> StoreResult<Vec<Job>>;
    fn update_job_status(&self, job_id: Uuid, status: JobStatus) -> StoreResult<Option<Job>>;
    fn soft_delete_job(&self, job_id: Uuid, at: NaiveDateTime) -> StoreResult<bool>;

    // Applications
    /// Fails with [`StoreError::Conflict`] when (user, job) already applied.
    fn insert_application(&self, application: NewApplication) -> StoreResult<Application>;
    fn find_application(&self, application_id: Uuid) -> StoreResult<Option<Application>>;
    /// Applies `changes` only if the stored row still matches `expected`.
    /// `Ok(None)` means another writer moved the application first.
    fn update_application(
        &self,
        application_id: Uuid,
        expected: &ExpectedState,
        changes: &ApplicationChanges,
    ) -> StoreResult<Option<Application>>;
    /// Deletes only if the stored status still equals `expected`.
    fn delete_application(
        &self,
        application_id: Uuid,
        expected: ApplicationStatus,
    ) -> StoreResult<bool>;
    fn list_applications(&self, scope: ApplicationScope) -> StoreResult<Vec<ApplicationListing>>;
    fn applications_created_before(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<Application>>;
    fn scrub_application(&self, application_id: Uuid, scrub: ApplicationScrub)
        -> StoreResult<()>;

    // Notifications
    fn insert_notification(&self, notification: NewNotification) -> StoreResult<Notification>;
    fn list_notifications(&self, user_id: Uuid) -> StoreResult<Vec<Notification>>;
    fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        at: NaiveDateTime,
    ) -> StoreResult<bool>;

    // Outbox
    fn enqueue_email(&self, email: &OutboundEmail) -> StoreResult<()>;
}
