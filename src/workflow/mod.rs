//! Application lifecycle: the only place that writes application status.
//!
//! Every write is a compare-and-set on the status the engine last read, so two
//! concurrent callers cannot both advance the same application. Notifications
//! and emails are dispatched after the write and never fail the operation.

pub mod error;
pub mod messages;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::jwt::{JwtService, UploadTokenError};
use crate::auth::password;
use crate::config::AppConfig;
use crate::mail::OutboundEmail;
use crate::models::{Application, Job, NewApplication, NewNotification, User};
use crate::permissions::{can_act, can_act_as_owner, Action, Actor, Decision};
use crate::storage::{
    application_document_key, attachment_content_disposition, ObjectStorage, UploadedFile,
};
use crate::store::{
    ApplicationChanges, ApplicationListing, ApplicationScope, ExpectedState, ShadowUserProfile,
    Store, StoreError,
};
use crate::utils::json::{append_document, decode_document_list};

pub use error::{WorkflowError, WorkflowResult};
use messages::Message;
pub use status::{ApplicationStatus, DocsStatus, JobStatus};

const DOCUMENT_LINK_TTL: Duration = Duration::from_secs(15 * 60);
const UPLOAD_APPEND_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub public_base_url: String,
    /// Applied when a job carries no passing grade of its own.
    pub default_passing_grade: f64,
    pub upload_token_expiry_days: i64,
}

impl WorkflowSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            public_base_url: config.public_base_url.clone(),
            default_passing_grade: config.default_passing_grade,
            upload_token_expiry_days: config.upload_token_expiry_days,
        }
    }
}

/// Profile fields submitted by an applicant without an account.
#[derive(Debug, Clone, Default)]
pub struct GuestApplicant {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub linkedin_url: Option<String>,
    pub resume_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GuestApplication {
    pub application: Application,
    pub user_id: Uuid,
    pub account_created: bool,
}

#[derive(Debug, Clone)]
pub struct GradeOutcome {
    pub application: Application,
    pub passed: bool,
    pub passing_grade: f64,
    pub upload_token: Option<String>,
}

/// What the public upload page needs to render for a valid link.
#[derive(Debug, Clone, Serialize)]
pub struct UploadTokenDetails {
    pub application_id: Uuid,
    pub job_title: String,
    pub required_docs: Vec<String>,
    pub candidate_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentLink {
    pub key: String,
    pub url: String,
}

#[derive(Clone)]
pub struct ApplicationWorkflow {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStorage>,
    jwt: JwtService,
    settings: Arc<WorkflowSettings>,
}

impl ApplicationWorkflow {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            storage,
            jwt,
            settings: Arc::new(settings),
        }
    }

    /// Authenticated application to a published job.
    pub fn apply(&self, user_id: Uuid, job_id: Uuid) -> WorkflowResult<Application> {
        let job = self.open_job(job_id)?;
        let user = self
            .store
            .find_user(user_id)?
            .ok_or(WorkflowError::Unauthenticated("unknown user"))?;
        self.create_application(&user, &job)
    }

    /// Application from someone without an account. The shadow account is
    /// provisioned by an atomic upsert on the email address, so repeating the
    /// request yields a conflict instead of a second account.
    pub fn apply_as_guest(
        &self,
        applicant: GuestApplicant,
        job_id: Uuid,
    ) -> WorkflowResult<GuestApplication> {
        let email = normalize_email(&applicant.email)?;
        let name = format!(
            "{} {}",
            applicant.first_name.trim(),
            applicant.last_name.trim()
        )
        .trim()
        .to_string();
        if name.is_empty() {
            return Err(WorkflowError::Validation("name is required".to_string()));
        }

        let job = self.open_job(job_id)?;

        let password_hash = password::hash_password(&password::random_password())
            .map_err(WorkflowError::internal)?;
        let provisioned = self.store.provision_shadow_user(ShadowUserProfile {
            email,
            name,
            password_hash,
            phone: clean(applicant.phone),
            bio: clean(applicant.bio),
            linkedin_url: clean(applicant.linkedin_url),
            resume_url: clean(applicant.resume_url),
            institution_id: job.institution_id,
        })?;

        if provisioned.user.is_anonymized() {
            return Err(WorkflowError::Conflict(
                "this email belongs to a closed account".to_string(),
            ));
        }
        if provisioned.created {
            info!(
                user_id = %provisioned.user.id,
                institution_id = %job.institution_id,
                "provisioned shadow candidate account"
            );
        }

        let application = self.create_application(&provisioned.user, &job)?;
        Ok(GuestApplication {
            user_id: provisioned.user.id,
            account_created: provisioned.created,
            application,
        })
    }

    pub fn schedule_trial(
        &self,
        actor: &Actor,
        application_id: Uuid,
        date: NaiveDateTime,
    ) -> WorkflowResult<Application> {
        let (application, job) = self.load(application_id)?;
        authorize(can_act(actor, Action::ScheduleTrial, Some(job.institution_id)))?;

        let current = parse_status(&application)?;
        let changes = ApplicationChanges {
            trial_lesson_date: Some(date),
            ..ApplicationChanges::status(ApplicationStatus::TrialScheduled)
        };
        let updated = self.transition_from(&application, current, &changes)?;

        info!(
            application_id = %application_id,
            actor_id = %actor.user_id,
            trial_lesson_date = %date,
            "trial lesson scheduled"
        );
        self.dispatch(
            updated.user_id,
            messages::trial_scheduled(&job.title, date),
            None,
        );
        Ok(updated)
    }

    /// Records the grade. A passing grade lands on the document request in
    /// the same conditional write that stores the score, so a failed write
    /// leaves the application at `TRIAL_SCHEDULED` where grading can be
    /// retried. Exactly one upload token is issued afterwards.
    pub fn grade_trial(
        &self,
        actor: &Actor,
        application_id: Uuid,
        score: f64,
        notes: Option<String>,
    ) -> WorkflowResult<GradeOutcome> {
        if !score.is_finite() || score < 0.0 {
            return Err(WorkflowError::Validation(
                "score must be a non-negative number".to_string(),
            ));
        }

        let (application, job) = self.load(application_id)?;
        authorize(can_act(actor, Action::GradeTrial, Some(job.institution_id)))?;

        let current = parse_status(&application)?;
        if current != ApplicationStatus::TrialScheduled {
            return Err(WorkflowError::InvalidState(format!(
                "cannot grade an application in status {current}"
            )));
        }

        let passing_grade = job
            .passing_grade
            .unwrap_or(self.settings.default_passing_grade);
        let passed = score >= passing_grade;
        // GRADED_PASSED -> DOCS_PENDING is automatic, so a pass is written
        // straight to its resting state.
        let changes = if passed {
            ApplicationChanges {
                docs_status: Some(DocsStatus::Pending),
                ..ApplicationChanges::status(ApplicationStatus::DocsPending)
            }
        } else {
            ApplicationChanges::status(ApplicationStatus::GradedFailed)
        };
        let graded = self.write_status(
            &application,
            current,
            &ApplicationChanges {
                trial_lesson_score: Some(score),
                trial_lesson_notes: Some(clean(notes)),
                ..changes
            },
        )?;
        info!(
            application_id = %application_id,
            actor_id = %actor.user_id,
            score,
            passing_grade,
            passed,
            "trial lesson graded"
        );

        if !passed {
            self.dispatch(graded.user_id, messages::trial_failed(&job.title), None);
            return Ok(GradeOutcome {
                application: graded,
                passed,
                passing_grade,
                upload_token: None,
            });
        }

        let token = self.request_documents(&graded, &job)?;
        Ok(GradeOutcome {
            application: graded,
            passed,
            passing_grade,
            upload_token: Some(token),
        })
    }

    /// Administrative override: any status may be written by an authorized
    /// actor. Jumps outside the transition graph are logged for audit.
    pub fn update_status(
        &self,
        actor: &Actor,
        application_id: Uuid,
        new_status: ApplicationStatus,
    ) -> WorkflowResult<Application> {
        let (application, job) = self.load(application_id)?;
        authorize(can_act(
            actor,
            Action::UpdateApplicationStatus,
            Some(job.institution_id),
        ))?;

        let current = parse_status(&application)?;
        let updated = self.write_status(&application, current, &status_changes(new_status))?;

        if current.can_transition_to(new_status) {
            info!(
                application_id = %application_id,
                actor_id = %actor.user_id,
                from = %current,
                to = %new_status,
                "application status updated"
            );
        } else {
            warn!(
                application_id = %application_id,
                actor_id = %actor.user_id,
                from = %current,
                to = %new_status,
                "application status forced outside the transition graph"
            );
        }

        if new_status == ApplicationStatus::DocsPending {
            // A fresh link; earlier ones stay valid until they expire.
            if let Err(err) = self.request_documents(&updated, &job) {
                warn!(application_id = %application_id, error = %err, "document request not sent");
            }
        } else {
            self.dispatch(
                updated.user_id,
                messages::status_changed(&job.title, new_status),
                None,
            );
        }
        Ok(updated)
    }

    /// Checked counterpart of [`update_status`](Self::update_status): only
    /// moves along the documented graph.
    pub fn transition(
        &self,
        actor: &Actor,
        application_id: Uuid,
        new_status: ApplicationStatus,
    ) -> WorkflowResult<Application> {
        let (application, job) = self.load(application_id)?;
        authorize(can_act(
            actor,
            Action::UpdateApplicationStatus,
            Some(job.institution_id),
        ))?;

        let current = parse_status(&application)?;
        let updated = self.transition_from(&application, current, &status_changes(new_status))?;
        info!(
            application_id = %application_id,
            actor_id = %actor.user_id,
            from = %current,
            to = %new_status,
            "application status updated"
        );
        self.dispatch(
            updated.user_id,
            messages::status_changed(&job.title, new_status),
            None,
        );
        Ok(updated)
    }

    /// Resolves an upload link for the public upload page. Any failure
    /// yields `None`.
    pub fn validate_upload_token(&self, token: &str) -> Option<UploadTokenDetails> {
        let claims = self.jwt.verify_upload_token(token).ok()?;
        let (application, job) = self.load(claims.application_id).ok()?;
        if application.user_id != claims.user_id {
            return None;
        }
        let status = parse_status(&application).ok()?;
        if !accepts_documents(status) {
            return None;
        }
        let candidate = self.store.find_user(application.user_id).ok()??;
        Some(UploadTokenDetails {
            application_id: application.id,
            job_title: job.title.clone(),
            required_docs: job.required_document_names(),
            candidate_name: candidate.name,
        })
    }

    /// Stores `file` and appends it to the application's documents. The file
    /// is fully written before the status write that references it. A token
    /// stays usable until it expires, as long as documents are still expected.
    pub async fn upload_sensitive_document(
        &self,
        token: &str,
        file: UploadedFile,
    ) -> WorkflowResult<Application> {
        let claims = self.jwt.verify_upload_token(token).map_err(|err| match err {
            UploadTokenError::Expired => WorkflowError::Unauthenticated("upload link expired"),
            UploadTokenError::Invalid => WorkflowError::Unauthenticated("invalid upload link"),
        })?;
        if file.bytes.is_empty() {
            return Err(WorkflowError::Validation("file must not be empty".to_string()));
        }

        let (application, job) = self.load(claims.application_id)?;
        if application.user_id != claims.user_id {
            return Err(WorkflowError::Forbidden(
                "upload link does not belong to this application".to_string(),
            ));
        }
        ensure_accepts_documents(parse_status(&application)?)?;

        let key = application_document_key(application.id, &file);
        let content_type = file.resolved_content_type();
        let disposition = attachment_content_disposition(&file.original_name);
        self.storage
            .put_object(&key, file.bytes, Some(content_type), disposition)
            .await
            .map_err(|err| {
                error!(application_id = %application.id, key = %key, error = %err, "failed to store uploaded document");
                WorkflowError::internal(format!("failed to store document: {err}"))
            })?;

        let application_id = application.id;
        match self.append_document_reference(application, &key) {
            Ok(updated) => {
                info!(
                    application_id = %updated.id,
                    key = %key,
                    documents = decode_document_list(updated.documents_url.as_deref()).len(),
                    "sensitive document uploaded"
                );
                self.dispatch(updated.user_id, messages::documents_received(&job.title), None);
                Ok(updated)
            }
            Err(err) => {
                self.discard_unreferenced_upload(application_id, &key).await;
                Err(err)
            }
        }
    }

    /// Appends `key` to the document list, retrying when a concurrent upload
    /// got there first.
    fn append_document_reference(
        &self,
        application: Application,
        key: &str,
    ) -> WorkflowResult<Application> {
        let mut current = application;
        for _ in 0..UPLOAD_APPEND_ATTEMPTS {
            let status = parse_status(&current)?;
            ensure_accepts_documents(status)?;

            let expected = ExpectedState::status(status).with_documents(current.documents_url.clone());
            let changes = ApplicationChanges {
                documents_url: Some(append_document(current.documents_url.as_deref(), key)),
                docs_status: Some(DocsStatus::Submitted),
                ..ApplicationChanges::status(ApplicationStatus::DocsSubmitted)
            };

            if let Some(updated) = self.store.update_application(current.id, &expected, &changes)? {
                return Ok(updated);
            }

            current = self
                .store
                .find_application(current.id)?
                .ok_or(WorkflowError::NotFound("application"))?;
        }

        warn!(application_id = %current.id, key = %key, "document append lost repeated races");
        Err(WorkflowError::Conflict(
            "application was modified concurrently, retry the upload".to_string(),
        ))
    }

    /// Removes a stored upload whose reference never made it into the row.
    /// Identical re-uploads share a key, so a key that is already listed stays.
    async fn discard_unreferenced_upload(&self, application_id: Uuid, key: &str) {
        let referenced = match self.store.find_application(application_id) {
            Ok(Some(application)) => decode_document_list(application.documents_url.as_deref())
                .iter()
                .any(|listed| listed == key),
            Ok(None) => false,
            Err(err) => {
                warn!(application_id = %application_id, key = %key, error = %err, "could not check upload reference; leaving object");
                return;
            }
        };
        if referenced {
            return;
        }
        match self.storage.delete_object(key).await {
            Ok(()) => info!(application_id = %application_id, key = %key, "removed unreferenced upload"),
            Err(err) => {
                warn!(application_id = %application_id, key = %key, error = %err, "failed to remove unreferenced upload")
            }
        }
    }

    /// Owner-only withdrawal of a pending application. The row is removed.
    pub fn cancel(&self, actor: &Actor, application_id: Uuid) -> WorkflowResult<()> {
        let application = self
            .store
            .find_application(application_id)?
            .ok_or(WorkflowError::NotFound("application"))?;
        authorize(can_act_as_owner(actor, application.user_id))?;

        let status = parse_status(&application)?;
        if status != ApplicationStatus::Pending {
            return Err(WorkflowError::InvalidState(format!(
                "only pending applications can be cancelled (current status {status})"
            )));
        }

        if !self
            .store
            .delete_application(application_id, ApplicationStatus::Pending)?
        {
            return Err(WorkflowError::InvalidState(
                "application is no longer pending".to_string(),
            ));
        }
        info!(application_id = %application_id, user_id = %actor.user_id, "application cancelled");
        Ok(())
    }

    /// Applications visible to `actor`: everything for a superadmin, the
    /// active institution for its admin tier, otherwise jobs the actor authored.
    pub fn list_managed(&self, actor: &Actor) -> WorkflowResult<Vec<ApplicationListing>> {
        Ok(self.store.list_applications(managed_scope(actor))?)
    }

    pub fn list_mine(&self, user_id: Uuid) -> WorkflowResult<Vec<ApplicationListing>> {
        Ok(self
            .store
            .list_applications(ApplicationScope::Candidate(user_id))?)
    }

    /// Short-lived download links for the documents of one application.
    pub async fn document_links(
        &self,
        actor: &Actor,
        application_id: Uuid,
    ) -> WorkflowResult<Vec<DocumentLink>> {
        let (application, job) = self.load(application_id)?;
        if !scope_covers(managed_scope(actor), &job) {
            return Err(WorkflowError::Forbidden(
                "not allowed to view these documents".to_string(),
            ));
        }

        let mut links = Vec::new();
        for key in decode_document_list(application.documents_url.as_deref()) {
            let url = self
                .storage
                .presign_get_object(&key, DOCUMENT_LINK_TTL)
                .await
                .map_err(|err| {
                    error!(application_id = %application_id, key = %key, error = %err, "failed to presign document");
                    WorkflowError::internal(err)
                })?;
            links.push(DocumentLink { key, url });
        }
        Ok(links)
    }

    fn open_job(&self, job_id: Uuid) -> WorkflowResult<Job> {
        let job = self
            .store
            .find_job(job_id)?
            .filter(|job| job.deleted_at.is_none())
            .ok_or(WorkflowError::NotFound("job"))?;
        let accepting = job
            .status
            .parse::<JobStatus>()
            .map(JobStatus::accepts_applications)
            .unwrap_or(false);
        if !accepting {
            return Err(WorkflowError::InvalidState(
                "job is not accepting applications".to_string(),
            ));
        }
        Ok(job)
    }

    fn create_application(&self, user: &User, job: &Job) -> WorkflowResult<Application> {
        let application = self
            .store
            .insert_application(NewApplication {
                id: Uuid::new_v4(),
                user_id: user.id,
                job_id: job.id,
                status: ApplicationStatus::Pending.as_str().to_string(),
                resume_url: user.resume_url.clone(),
            })
            .map_err(|err| match err {
                StoreError::Conflict => {
                    WorkflowError::Conflict("already applied to this job".to_string())
                }
                other => other.into(),
            })?;

        info!(
            application_id = %application.id,
            user_id = %user.id,
            job_id = %job.id,
            "application created"
        );
        self.dispatch(user.id, messages::application_received(&job.title), None);
        Ok(application)
    }

    fn load(&self, application_id: Uuid) -> WorkflowResult<(Application, Job)> {
        let application = self
            .store
            .find_application(application_id)?
            .ok_or(WorkflowError::NotFound("application"))?;
        let job = self
            .store
            .find_job(application.job_id)?
            .ok_or(WorkflowError::NotFound("job"))?;
        Ok((application, job))
    }

    fn transition_from(
        &self,
        application: &Application,
        current: ApplicationStatus,
        changes: &ApplicationChanges,
    ) -> WorkflowResult<Application> {
        if !current.can_transition_to(changes.status) {
            return Err(WorkflowError::InvalidState(format!(
                "cannot move application from {current} to {}",
                changes.status
            )));
        }
        self.write_status(application, current, changes)
    }

    /// Issues an upload token for `application` and sends the link.
    fn request_documents(&self, application: &Application, job: &Job) -> WorkflowResult<String> {
        let token = self
            .jwt
            .generate_upload_token(application.id, application.user_id)
            .map_err(|err| {
                error!(application_id = %application.id, error = %err, "failed to issue upload token");
                WorkflowError::internal(err)
            })?;
        let link = messages::upload_link(&self.settings.public_base_url, &token);
        self.dispatch(
            application.user_id,
            messages::documents_requested(
                &job.title,
                &link,
                &job.required_document_names(),
                self.settings.upload_token_expiry_days,
            ),
            Some(link),
        );
        Ok(token)
    }

    fn write_status(
        &self,
        application: &Application,
        current: ApplicationStatus,
        changes: &ApplicationChanges,
    ) -> WorkflowResult<Application> {
        self.store
            .update_application(application.id, &ExpectedState::status(current), changes)?
            .ok_or_else(|| {
                warn!(
                    application_id = %application.id,
                    expected = %current,
                    "status write lost a concurrent update"
                );
                WorkflowError::Conflict("application was modified concurrently".to_string())
            })
    }

    /// Best-effort notification plus queued email. Failures are logged only.
    fn dispatch(&self, user_id: Uuid, message: Message, link: Option<String>) {
        if let Err(err) = self.store.insert_notification(NewNotification {
            id: Uuid::new_v4(),
            user_id,
            title: message.title.clone(),
            message: message.body.clone(),
            link,
        }) {
            warn!(user_id = %user_id, error = %err, "failed to persist notification");
        }

        let recipient = match self.store.find_user(user_id) {
            Ok(Some(user)) if !user.is_anonymized() => user,
            Ok(_) => return,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "failed to load email recipient");
                return;
            }
        };
        let email = OutboundEmail {
            to: recipient.email,
            subject: message.title,
            body: message.body,
        };
        if let Err(err) = self.store.enqueue_email(&email) {
            warn!(user_id = %user_id, error = %err, "failed to enqueue email");
        }
    }
}

pub fn managed_scope(actor: &Actor) -> ApplicationScope {
    if actor.is_superadmin() {
        return ApplicationScope::All;
    }
    match actor.active_institution {
        Some(active)
            if can_act(actor, Action::ListInstitutionApplications, Some(active)).is_allowed() =>
        {
            ApplicationScope::Institution(active)
        }
        _ => ApplicationScope::AuthoredBy(actor.user_id),
    }
}

/// Whether an application to `job` shows up in a listing with `scope`.
fn scope_covers(scope: ApplicationScope, job: &Job) -> bool {
    match scope {
        ApplicationScope::All => true,
        ApplicationScope::Institution(institution_id) => job.institution_id == institution_id,
        ApplicationScope::AuthoredBy(author_id) => job.author_id == author_id,
        ApplicationScope::Candidate(_) => false,
    }
}

fn authorize(decision: Decision) -> WorkflowResult<()> {
    match decision {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => Err(reason.into()),
    }
}

fn parse_status(application: &Application) -> WorkflowResult<ApplicationStatus> {
    application.status.parse().map_err(|err| {
        error!(application_id = %application.id, error = %err, "stored application status is invalid");
        WorkflowError::internal(err)
    })
}

fn status_changes(status: ApplicationStatus) -> ApplicationChanges {
    let docs_status = match status {
        ApplicationStatus::DocsPending => Some(DocsStatus::Pending),
        ApplicationStatus::DocsSubmitted => Some(DocsStatus::Submitted),
        _ => None,
    };
    ApplicationChanges {
        docs_status,
        ..ApplicationChanges::status(status)
    }
}

fn accepts_documents(status: ApplicationStatus) -> bool {
    matches!(
        status,
        ApplicationStatus::DocsPending | ApplicationStatus::DocsSubmitted
    )
}

fn ensure_accepts_documents(status: ApplicationStatus) -> WorkflowResult<()> {
    if accepts_documents(status) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidState(format!(
            "application in status {status} does not accept documents"
        )))
    }
}

fn normalize_email(raw: &str) -> WorkflowResult<String> {
    let email = raw.trim().to_ascii_lowercase();
    email
        .parse::<lettre::Address>()
        .map_err(|_| WorkflowError::Validation("a valid email is required".to_string()))?;
    Ok(email)
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
