use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::{NaiveDateTime, Utc};
use jobboard::auth::jwt::JwtService;
use jobboard::auth::password;
use jobboard::config::AppConfig;
use jobboard::db;
use jobboard::mail::OutboundEmail;
use jobboard::models::{
    Application, Institution, Job, NewApplication, NewInstitution, NewJob, NewNotification,
    NewUser, Notification, User,
};
use jobboard::permissions::{Actor, RoleAssignment, RoleName};
use jobboard::routes;
use jobboard::state::AppState;
use jobboard::storage::ObjectStorage;
use jobboard::store::{
    AnonymizedIdentity, ApplicationChanges, ApplicationListing, ApplicationScope,
    ApplicationScrub, ExpectedState, ProvisionedUser, ShadowUserProfile, Store, StoreError,
    StoreResult,
};
use jobboard::workflow::{ApplicationStatus, ApplicationWorkflow, JobStatus};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const DEFAULT_PASSWORD: &str = "correct-horse-battery";
pub const PUBLIC_BASE_URL: &str = "https://jobs.example.test";
pub const DEFAULT_PASSING_GRADE: f64 = 6.0;

static DEFAULT_PASSWORD_HASH: Lazy<String> = Lazy::new(|| {
    password::hash_password(DEFAULT_PASSWORD).expect("hashing the fixture password")
});

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

type UpdateHook = Box<dyn FnOnce(&mut Application) + Send>;

#[derive(Default)]
struct MemoryState {
    users: Vec<User>,
    institutions: Vec<Institution>,
    roles: Vec<(Uuid, RoleAssignment)>,
    jobs: Vec<Job>,
    applications: Vec<Application>,
    notifications: Vec<Notification>,
    outbox: Vec<OutboundEmail>,
}

/// In-memory [`Store`] with the same conflict and compare-and-set rules as
/// the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    state: StdMutex<MemoryState>,
    before_update: StdMutex<Option<UpdateHook>>,
    fail_next_update: AtomicBool,
    updates: AtomicUsize,
    fail_notifications: AtomicBool,
    fail_outbox: AtomicBool,
}

impl MemoryStore {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store poisoned")
    }

    /// Runs `hook` against the stored row inside the next
    /// `update_application`, before the expected state is compared.
    #[allow(dead_code)]
    pub fn before_next_update(&self, hook: impl FnOnce(&mut Application) + Send + 'static) {
        *self.before_update.lock().expect("hook poisoned") = Some(Box::new(hook));
    }

    /// The next `update_application` fails as if the database were down.
    #[allow(dead_code)]
    pub fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    /// Number of `update_application` calls so far.
    #[allow(dead_code)]
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn fail_side_effects(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::SeqCst);
        self.fail_outbox.store(fail, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn outbox(&self) -> Vec<OutboundEmail> {
        self.state().outbox.clone()
    }

    #[allow(dead_code)]
    pub fn outbox_for(&self, email: &str) -> Vec<OutboundEmail> {
        self.state()
            .outbox
            .iter()
            .filter(|message| message.to == email)
            .cloned()
            .collect()
    }

    #[allow(dead_code)]
    pub fn notifications_for(&self, user_id: Uuid) -> Vec<Notification> {
        self.state()
            .notifications
            .iter()
            .filter(|notification| notification.user_id == user_id)
            .cloned()
            .collect()
    }

    #[allow(dead_code)]
    pub fn application(&self, application_id: Uuid) -> Option<Application> {
        self.state()
            .applications
            .iter()
            .find(|application| application.id == application_id)
            .cloned()
    }

    #[allow(dead_code)]
    pub fn user(&self, user_id: Uuid) -> Option<User> {
        self.state()
            .users
            .iter()
            .find(|user| user.id == user_id)
            .cloned()
    }

    #[allow(dead_code)]
    pub fn users_with_email(&self, email: &str) -> usize {
        self.state()
            .users
            .iter()
            .filter(|user| user.email == email)
            .count()
    }

    #[allow(dead_code)]
    pub fn application_count(&self) -> usize {
        self.state().applications.len()
    }

    /// Rewrites an application as if it had been filed at `created_at` with
    /// the given stored files and notes.
    #[allow(dead_code)]
    pub fn age_application(
        &self,
        application_id: Uuid,
        created_at: NaiveDateTime,
        documents_url: Option<&str>,
        resume_url: Option<&str>,
        notes: Option<&str>,
    ) {
        let mut state = self.state();
        if let Some(application) = state
            .applications
            .iter_mut()
            .find(|application| application.id == application_id)
        {
            application.created_at = created_at;
            application.documents_url = documents_url.map(str::to_owned);
            application.resume_url = resume_url.map(str::to_owned);
            application.trial_lesson_notes = notes.map(str::to_owned);
        }
    }

    #[allow(dead_code)]
    pub fn set_activity(
        &self,
        user_id: Uuid,
        created_at: NaiveDateTime,
        last_login_at: Option<NaiveDateTime>,
    ) {
        let mut state = self.state();
        if let Some(user) = state.users.iter_mut().find(|user| user.id == user_id) {
            user.created_at = created_at;
            user.last_login_at = last_login_at;
        }
    }

    fn listing(state: &MemoryState, application: &Application) -> Option<ApplicationListing> {
        let job = state.jobs.iter().find(|job| job.id == application.job_id)?;
        let user = state
            .users
            .iter()
            .find(|user| user.id == application.user_id)?;
        Some(ApplicationListing {
            application: application.clone(),
            job_title: job.title.clone(),
            institution_id: job.institution_id,
            candidate_name: user.name.clone(),
            candidate_email: user.email.clone(),
        })
    }
}

fn user_from(new_user: NewUser) -> User {
    let at = now();
    User {
        id: new_user.id,
        name: new_user.name,
        email: new_user.email,
        password_hash: new_user.password_hash,
        phone: new_user.phone,
        resume_url: new_user.resume_url,
        bio: new_user.bio,
        linkedin_url: new_user.linkedin_url,
        active_institution_id: new_user.active_institution_id,
        last_login_at: None,
        is_shadow: new_user.is_shadow,
        anonymized_at: None,
        created_at: at,
        updated_at: at,
    }
}

fn push_role(state: &mut MemoryState, user_id: Uuid, assignment: RoleAssignment) {
    let exists = state
        .roles
        .iter()
        .any(|(owner, existing)| *owner == user_id && *existing == assignment);
    if !exists {
        state.roles.push((user_id, assignment));
    }
}

impl Store for MemoryStore {
    fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.state();
        if state.users.iter().any(|existing| existing.email == user.email) {
            return Err(StoreError::Conflict);
        }
        let user = user_from(user);
        state.users.push(user.clone());
        Ok(user)
    }

    fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.user(user_id))
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .state()
            .users
            .iter()
            .find(|user| user.email == email)
            .cloned())
    }

    fn provision_shadow_user(&self, profile: ShadowUserProfile) -> StoreResult<ProvisionedUser> {
        let mut state = self.state();
        if let Some(user) = state.users.iter().find(|user| user.email == profile.email) {
            return Ok(ProvisionedUser {
                user: user.clone(),
                created: false,
            });
        }
        let user = user_from(NewUser {
            id: Uuid::new_v4(),
            name: profile.name,
            email: profile.email,
            password_hash: profile.password_hash,
            phone: profile.phone,
            resume_url: profile.resume_url,
            bio: profile.bio,
            linkedin_url: profile.linkedin_url,
            active_institution_id: Some(profile.institution_id),
            is_shadow: true,
        });
        state.users.push(user.clone());
        push_role(
            &mut state,
            user.id,
            RoleAssignment {
                institution_id: Some(profile.institution_id),
                role: RoleName::Candidate,
            },
        );
        Ok(ProvisionedUser {
            user,
            created: true,
        })
    }

    fn record_login(&self, user_id: Uuid, at: NaiveDateTime) -> StoreResult<()> {
        let mut state = self.state();
        if let Some(user) = state.users.iter_mut().find(|user| user.id == user_id) {
            user.last_login_at = Some(at);
            user.updated_at = at;
        }
        Ok(())
    }

    fn set_active_institution(
        &self,
        user_id: Uuid,
        institution: Option<Uuid>,
    ) -> StoreResult<()> {
        let mut state = self.state();
        let user = state
            .users
            .iter_mut()
            .find(|user| user.id == user_id)
            .ok_or(StoreError::NotFound)?;
        user.active_institution_id = institution;
        user.updated_at = now();
        Ok(())
    }

    fn anonymize_user(
        &self,
        user_id: Uuid,
        identity: &AnonymizedIdentity,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let mut state = self.state();
        let Some(user) = state
            .users
            .iter_mut()
            .find(|user| user.id == user_id && user.anonymized_at.is_none())
        else {
            return Ok(false);
        };
        user.name = identity.name.clone();
        user.email = identity.email.clone();
        user.password_hash = identity.password_hash.clone();
        user.phone = None;
        user.resume_url = None;
        user.bio = None;
        user.linkedin_url = None;
        user.active_institution_id = None;
        user.anonymized_at = Some(at);
        user.updated_at = at;
        Ok(true)
    }

    fn role_assignments(&self, user_id: Uuid) -> StoreResult<Vec<RoleAssignment>> {
        Ok(self
            .state()
            .roles
            .iter()
            .filter(|(owner, _)| *owner == user_id)
            .map(|(_, assignment)| *assignment)
            .collect())
    }

    fn assign_role(
        &self,
        user_id: Uuid,
        institution_id: Option<Uuid>,
        role: RoleName,
    ) -> StoreResult<()> {
        let mut state = self.state();
        push_role(
            &mut state,
            user_id,
            RoleAssignment {
                institution_id,
                role,
            },
        );
        Ok(())
    }

    fn insert_institution(&self, institution: NewInstitution) -> StoreResult<Institution> {
        let at = now();
        let institution = Institution {
            id: institution.id,
            name: institution.name,
            created_at: at,
            updated_at: at,
        };
        self.state().institutions.push(institution.clone());
        Ok(institution)
    }

    fn find_institution(&self, institution_id: Uuid) -> StoreResult<Option<Institution>> {
        Ok(self
            .state()
            .institutions
            .iter()
            .find(|institution| institution.id == institution_id)
            .cloned())
    }

    fn insert_job(&self, job: NewJob) -> StoreResult<Job> {
        let at = now();
        let job = Job {
            id: job.id,
            title: job.title,
            description: job.description,
            area: job.area,
            category: job.category,
            status: job.status,
            institution_id: job.institution_id,
            author_id: job.author_id,
            is_academic: job.is_academic,
            passing_grade: job.passing_grade,
            required_documents: job.required_documents,
            deleted_at: None,
            created_at: at,
            updated_at: at,
        };
        self.state().jobs.push(job.clone());
        Ok(job)
    }

    fn find_job(&self, job_id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self
            .state()
            .jobs
            .iter()
            .find(|job| job.id == job_id)
            .cloned())
    }

    fn list_published_jobs(&self) -> StoreResult<Vec<Job>> {
        Ok(self
            .state()
            .jobs
            .iter()
            .filter(|job| job.deleted_at.is_none() && job.status == JobStatus::Published.as_str())
            .cloned()
            .collect())
    }

    fn update_job_status(&self, job_id: Uuid, status: JobStatus) -> StoreResult<Option<Job>> {
        let mut state = self.state();
        Ok(state
            .jobs
            .iter_mut()
            .find(|job| job.id == job_id && job.deleted_at.is_none())
            .map(|job| {
                job.status = status.as_str().to_string();
                job.updated_at = now();
                job.clone()
            }))
    }

    fn soft_delete_job(&self, job_id: Uuid, at: NaiveDateTime) -> StoreResult<bool> {
        let mut state = self.state();
        match state
            .jobs
            .iter_mut()
            .find(|job| job.id == job_id && job.deleted_at.is_none())
        {
            Some(job) => {
                job.deleted_at = Some(at);
                job.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn insert_application(&self, application: NewApplication) -> StoreResult<Application> {
        let mut state = self.state();
        let duplicate = state.applications.iter().any(|existing| {
            existing.user_id == application.user_id && existing.job_id == application.job_id
        });
        if duplicate {
            return Err(StoreError::Conflict);
        }
        let at = now();
        let application = Application {
            id: application.id,
            user_id: application.user_id,
            job_id: application.job_id,
            status: application.status,
            trial_lesson_date: None,
            trial_lesson_score: None,
            trial_lesson_notes: None,
            documents_url: None,
            docs_status: None,
            resume_url: application.resume_url,
            created_at: at,
            updated_at: at,
        };
        state.applications.push(application.clone());
        Ok(application)
    }

    fn find_application(&self, application_id: Uuid) -> StoreResult<Option<Application>> {
        Ok(self.application(application_id))
    }

    fn update_application(
        &self,
        application_id: Uuid,
        expected: &ExpectedState,
        changes: &ApplicationChanges,
    ) -> StoreResult<Option<Application>> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("database offline".to_string()));
        }
        let hook = self.before_update.lock().expect("hook poisoned").take();
        let mut state = self.state();
        let Some(row) = state
            .applications
            .iter_mut()
            .find(|application| application.id == application_id)
        else {
            return Ok(None);
        };
        if let Some(hook) = hook {
            hook(row);
        }

        if row.status != expected.status.as_str() {
            return Ok(None);
        }
        if let Some(documents) = &expected.documents_url {
            if &row.documents_url != documents {
                return Ok(None);
            }
        }

        row.status = changes.status.as_str().to_string();
        if let Some(date) = changes.trial_lesson_date {
            row.trial_lesson_date = Some(date);
        }
        if let Some(score) = changes.trial_lesson_score {
            row.trial_lesson_score = Some(score);
        }
        if let Some(notes) = &changes.trial_lesson_notes {
            row.trial_lesson_notes = notes.clone();
        }
        if let Some(documents) = &changes.documents_url {
            row.documents_url = Some(documents.clone());
        }
        if let Some(docs_status) = changes.docs_status {
            row.docs_status = Some(docs_status.as_str().to_string());
        }
        row.updated_at = now();
        Ok(Some(row.clone()))
    }

    fn delete_application(
        &self,
        application_id: Uuid,
        expected: ApplicationStatus,
    ) -> StoreResult<bool> {
        let mut state = self.state();
        let before = state.applications.len();
        state.applications.retain(|application| {
            !(application.id == application_id && application.status == expected.as_str())
        });
        Ok(state.applications.len() < before)
    }

    fn list_applications(&self, scope: ApplicationScope) -> StoreResult<Vec<ApplicationListing>> {
        let state = self.state();
        let mut listings: Vec<ApplicationListing> = state
            .applications
            .iter()
            .filter_map(|application| MemoryStore::listing(&state, application))
            .filter(|listing| match scope {
                ApplicationScope::All => true,
                ApplicationScope::Institution(id) => listing.institution_id == id,
                ApplicationScope::AuthoredBy(author) => state
                    .jobs
                    .iter()
                    .any(|job| job.id == listing.application.job_id && job.author_id == author),
                ApplicationScope::Candidate(user) => listing.application.user_id == user,
            })
            .collect();
        listings.sort_by(|a, b| b.application.created_at.cmp(&a.application.created_at));
        Ok(listings)
    }

    fn applications_created_before(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<Application>> {
        let mut rows: Vec<Application> = self
            .state()
            .applications
            .iter()
            .filter(|application| application.created_at < cutoff)
            .cloned()
            .collect();
        rows.sort_by_key(|application| application.created_at);
        Ok(rows)
    }

    fn scrub_application(
        &self,
        application_id: Uuid,
        scrub: ApplicationScrub,
    ) -> StoreResult<()> {
        let mut state = self.state();
        if let Some(application) = state
            .applications
            .iter_mut()
            .find(|application| application.id == application_id)
        {
            if scrub.clear_files {
                application.documents_url = None;
            }
            if scrub.clear_personal_data {
                application.resume_url = None;
                application.trial_lesson_notes = None;
            }
            application.updated_at = now();
        }
        Ok(())
    }

    fn insert_notification(&self, notification: NewNotification) -> StoreResult<Notification> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("notifications offline".to_string()));
        }
        let notification = Notification {
            id: notification.id,
            user_id: notification.user_id,
            title: notification.title,
            message: notification.message,
            link: notification.link,
            read_at: None,
            created_at: now(),
        };
        self.state().notifications.push(notification.clone());
        Ok(notification)
    }

    fn list_notifications(&self, user_id: Uuid) -> StoreResult<Vec<Notification>> {
        let mut rows = self.notifications_for(user_id);
        rows.reverse();
        Ok(rows)
    }

    fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let mut state = self.state();
        match state
            .notifications
            .iter_mut()
            .find(|notification| notification.id == notification_id && notification.user_id == user_id)
        {
            Some(notification) => {
                notification.read_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn enqueue_email(&self, email: &OutboundEmail) -> StoreResult<()> {
        if self.fail_outbox.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("outbox offline".to_string()));
        }
        self.state().outbox.push(email.clone());
        Ok(())
    }
}

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    deleted: Mutex<Vec<String>>,
    fail_deletes: AtomicBool,
    delete_delay: Option<Duration>,
}

impl FakeStorage {
    #[allow(dead_code)]
    pub fn with_delete_delay(delay: Duration) -> Self {
        Self {
            delete_delay: Some(delay),
            ..Self::default()
        }
    }

    #[allow(dead_code)]
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }

    #[allow(dead_code)]
    pub async fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        if let Some(delay) = self.delete_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_deletes.load(Ordering::SeqCst) {
            bail!("storage refused to delete {key}");
        }
        self.objects.lock().await.remove(key);
        self.deleted.lock().await.push(key.to_string());
        Ok(())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused@localhost/jobboard_test".to_string(),
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        public_base_url: PUBLIC_BASE_URL.to_string(),
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        upload_token_audience: "test-upload".to_string(),
        upload_token_expiry_days: 7,
        default_passing_grade: DEFAULT_PASSING_GRADE,
        retention_days: 730,
        retention_interval_hours: 24,
        cors_allowed_origin: None,
        aws_endpoint_url: None,
        aws_access_key_id: None,
        aws_secret_access_key: None,
        aws_region: "us-east-1".to_string(),
        s3_bucket: "test-bucket".to_string(),
        smtp: None,
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    store: Arc<MemoryStore>,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_storage(FakeStorage::default()).await
    }

    pub async fn with_storage(storage: FakeStorage) -> Result<Self> {
        let config = test_config();
        let store = Arc::new(MemoryStore::default());
        let storage = Arc::new(storage);
        let store_for_state: Arc<dyn Store> = store.clone();
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(store_for_state, config, storage_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            store,
            storage,
        })
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn workflow(&self) -> &ApplicationWorkflow {
        &self.state.workflow
    }

    pub fn seed_institution(&self, name: &str) -> Result<Institution> {
        Ok(self.store.insert_institution(NewInstitution {
            id: Uuid::new_v4(),
            name: name.to_string(),
        })?)
    }

    /// Registered account with [`DEFAULT_PASSWORD`].
    pub fn create_user(&self, email: &str, name: &str) -> Result<User> {
        Ok(self.store.insert_user(NewUser {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash: DEFAULT_PASSWORD_HASH.clone(),
            phone: None,
            resume_url: None,
            bio: None,
            linkedin_url: None,
            active_institution_id: None,
            is_shadow: false,
        })?)
    }

    pub fn create_candidate(&self, email: &str) -> Result<User> {
        let user = self.create_user(email, "Casey Candidate")?;
        self.store.assign_role(user.id, None, RoleName::Candidate)?;
        Ok(user)
    }

    /// Staff member holding `role` at `institution`, with it active.
    pub fn create_staff(&self, email: &str, institution: Uuid, role: RoleName) -> Result<User> {
        let user = self.create_user(email, "Sam Staff")?;
        self.store.assign_role(user.id, Some(institution), role)?;
        self.store.set_active_institution(user.id, Some(institution))?;
        Ok(self.store.user(user.id).context("staff user vanished")?)
    }

    pub fn actor(&self, user: &User) -> Result<Actor> {
        Ok(Actor {
            user_id: user.id,
            assignments: self.store.role_assignments(user.id)?,
            active_institution: user.active_institution_id,
        })
    }

    pub fn publish_job(
        &self,
        institution: Uuid,
        author: Uuid,
        passing_grade: Option<f64>,
        required_documents: &[&str],
    ) -> Result<Job> {
        Ok(self.store.insert_job(NewJob {
            id: Uuid::new_v4(),
            title: "Mathematics Teacher".to_string(),
            description: "Secondary school mathematics".to_string(),
            area: Some("education".to_string()),
            category: None,
            status: JobStatus::Published.as_str().to_string(),
            institution_id: institution,
            author_id: author,
            is_academic: passing_grade.is_some(),
            passing_grade,
            required_documents: serde_json::Value::from(
                required_documents
                    .iter()
                    .map(|name| name.to_string())
                    .collect::<Vec<_>>(),
            ),
        })?)
    }

    pub fn token_for(&self, user: &User) -> Result<String> {
        self.state
            .jwt
            .generate_token(user.id, &user.email, user.active_institution_id)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Multipart upload authorized by an upload-link token.
    #[allow(dead_code)]
    pub async fn upload_document(
        &self,
        upload_token: Option<&str>,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/upload/sensitive")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            );
        if let Some(token) = upload_token {
            builder = builder.header("x-upload-token", token);
        }

        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

/// Pulls the upload token out of the link in a documents-requested email.
#[allow(dead_code)]
pub fn upload_token_from(email: &OutboundEmail) -> Result<String> {
    let marker = format!("{PUBLIC_BASE_URL}/upload?token=");
    let start = email
        .body
        .find(&marker)
        .ok_or_else(|| anyhow!("email carries no upload link"))?
        + marker.len();
    let token: String = email.body[start..]
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    ensure!(!token.is_empty(), "upload link has an empty token");
    Ok(token)
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn body_json<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).with_context(|| {
        format!(
            "unexpected response body: {}",
            String::from_utf8_lossy(&body)
        )
    })
}
