use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::PgExpressionMethods;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::warn;
use uuid::Uuid;

use super::{
    AnonymizedIdentity, ApplicationChanges, ApplicationListing, ApplicationScope,
    ApplicationScrub, ExpectedState, ProvisionedUser, ShadowUserProfile, Store, StoreError, StoreResult,
};
use crate::db::{PgPool, PgPooledConnection};
use crate::mail::OutboundEmail;
use crate::models::{
    Application, Institution, Job, NewApplication, NewInstitution, NewJob, NewNotification,
    NewUser, NewUserInstitutionRole, Notification, User,
};
use crate::permissions::{RoleAssignment, RoleName};
use crate::queue::{enqueue_job, QueueError, JOB_SEND_EMAIL};
use crate::schema::{
    applications, institutions, jobs, notifications, roles, user_institution_roles, users,
};
use crate::workflow::status::{ApplicationStatus, JobStatus};

impl From<DieselError> for StoreError {
    fn from(value: DieselError) -> Self {
        match value {
            DieselError::NotFound => StoreError::NotFound,
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                StoreError::Conflict
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<QueueError> for StoreError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::Database(err) => StoreError::from(err),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> StoreResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| StoreError::Unavailable(format!("database pool error: {err}")))
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = applications)]
struct ApplicationChangeset<'a> {
    status: &'a str,
    trial_lesson_date: Option<NaiveDateTime>,
    trial_lesson_score: Option<f64>,
    trial_lesson_notes: Option<Option<&'a str>>,
    documents_url: Option<&'a str>,
    docs_status: Option<&'a str>,
    updated_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = applications)]
struct ScrubChangeset {
    documents_url: Option<Option<String>>,
    resume_url: Option<Option<String>>,
    trial_lesson_notes: Option<Option<String>>,
    updated_at: NaiveDateTime,
}

fn assign_role_in(
    conn: &mut PgConnection,
    user_id: Uuid,
    institution_id: Option<Uuid>,
    role: RoleName,
) -> QueryResult<()> {
    let role_id: Uuid = roles::table
        .filter(roles::name.eq(role.as_str()))
        .select(roles::id)
        .first(conn)?;

    diesel::insert_into(user_institution_roles::table)
        .values(&NewUserInstitutionRole {
            id: Uuid::new_v4(),
            user_id,
            institution_id,
            role_id,
        })
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(())
}

impl Store for PgStore {
    fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut conn = self.conn()?;
        let created = diesel::insert_into(users::table)
            .values(&user)
            .get_result(&mut conn)?;
        Ok(created)
    }

    fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table.find(user_id).first(&mut conn).optional()?)
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table
            .filter(users::email.eq(email))
            .first(&mut conn)
            .optional()?)
    }

    fn provision_shadow_user(&self, profile: ShadowUserProfile) -> StoreResult<ProvisionedUser> {
        let mut conn = self.conn()?;
        let provisioned = conn.transaction::<_, DieselError, _>(|conn| {
            let new_user = NewUser {
                id: Uuid::new_v4(),
                name: profile.name.clone(),
                email: profile.email.clone(),
                password_hash: profile.password_hash.clone(),
                phone: profile.phone.clone(),
                resume_url: profile.resume_url.clone(),
                bio: profile.bio.clone(),
                linkedin_url: profile.linkedin_url.clone(),
                active_institution_id: Some(profile.institution_id),
                is_shadow: true,
            };

            let inserted = diesel::insert_into(users::table)
                .values(&new_user)
                .on_conflict(users::email)
                .do_nothing()
                .execute(conn)?;

            let user: User = users::table
                .filter(users::email.eq(&profile.email))
                .first(conn)?;
            let created = inserted == 1;
            if created {
                assign_role_in(
                    conn,
                    user.id,
                    Some(profile.institution_id),
                    RoleName::Candidate,
                )?;
            }
            Ok(ProvisionedUser { user, created })
        })?;
        Ok(provisioned)
    }

    fn record_login(&self, user_id: Uuid, at: NaiveDateTime) -> StoreResult<()> {
        let mut conn = self.conn()?;
        diesel::update(users::table.find(user_id))
            .set((users::last_login_at.eq(Some(at)), users::updated_at.eq(at)))
            .execute(&mut conn)?;
        Ok(())
    }

    fn set_active_institution(
        &self,
        user_id: Uuid,
        institution: Option<Uuid>,
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let updated = diesel::update(users::table.find(user_id))
            .set((
                users::active_institution_id.eq(institution),
                users::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn anonymize_user(
        &self,
        user_id: Uuid,
        identity: &AnonymizedIdentity,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let updated = diesel::update(
            users::table
                .filter(users::id.eq(user_id))
                .filter(users::anonymized_at.is_null()),
        )
        .set((
            users::name.eq(&identity.name),
            users::email.eq(&identity.email),
            users::password_hash.eq(&identity.password_hash),
            users::phone.eq(None::<String>),
            users::resume_url.eq(None::<String>),
            users::bio.eq(None::<String>),
            users::linkedin_url.eq(None::<String>),
            users::active_institution_id.eq(None::<Uuid>),
            users::anonymized_at.eq(Some(at)),
            users::updated_at.eq(at),
        ))
        .execute(&mut conn)?;
        Ok(updated == 1)
    }

    fn role_assignments(&self, user_id: Uuid) -> StoreResult<Vec<RoleAssignment>> {
        let mut conn = self.conn()?;
        let rows: Vec<(Option<Uuid>, String)> = user_institution_roles::table
            .inner_join(roles::table)
            .filter(user_institution_roles::user_id.eq(user_id))
            .select((user_institution_roles::institution_id, roles::name))
            .load(&mut conn)?;

        Ok(rows
            .into_iter()
            .filter_map(|(institution_id, name)| match name.parse::<RoleName>() {
                Ok(role) => Some(RoleAssignment {
                    institution_id,
                    role,
                }),
                Err(err) => {
                    warn!(%user_id, error = %err, "ignoring unknown role assignment");
                    None
                }
            })
            .collect())
    }

    fn assign_role(
        &self,
        user_id: Uuid,
        institution_id: Option<Uuid>,
        role: RoleName,
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        assign_role_in(&mut conn, user_id, institution_id, role)?;
        Ok(())
    }

    fn insert_institution(&self, institution: NewInstitution) -> StoreResult<Institution> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(institutions::table)
            .values(&institution)
            .get_result(&mut conn)?)
    }

    fn find_institution(&self, institution_id: Uuid) -> StoreResult<Option<Institution>> {
        let mut conn = self.conn()?;
        Ok(institutions::table
            .find(institution_id)
            .first(&mut conn)
            .optional()?)
    }

    fn insert_job(&self, job: NewJob) -> StoreResult<Job> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(jobs::table)
            .values(&job)
            .get_result(&mut conn)?)
    }

    fn find_job(&self, job_id: Uuid) -> StoreResult<Option<Job>> {
        let mut conn = self.conn()?;
        Ok(jobs::table.find(job_id).first(&mut conn).optional()?)
    }

    fn list_published_jobs(&self) -> StoreResult<Vec<Job>> {
        let mut conn = self.conn()?;
        Ok(jobs::table
            .filter(jobs::status.eq(JobStatus::Published.as_str()))
            .filter(jobs::deleted_at.is_null())
            .order(jobs::created_at.desc())
            .load(&mut conn)?)
    }

    fn update_job_status(&self, job_id: Uuid, status: JobStatus) -> StoreResult<Option<Job>> {
        let mut conn = self.conn()?;
        Ok(diesel::update(
            jobs::table
                .filter(jobs::id.eq(job_id))
                .filter(jobs::deleted_at.is_null()),
        )
        .set((
            jobs::status.eq(status.as_str()),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)
        .optional()?)
    }

    fn soft_delete_job(&self, job_id: Uuid, at: NaiveDateTime) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let updated = diesel::update(
            jobs::table
                .filter(jobs::id.eq(job_id))
                .filter(jobs::deleted_at.is_null()),
        )
        .set((jobs::deleted_at.eq(Some(at)), jobs::updated_at.eq(at)))
        .execute(&mut conn)?;
        Ok(updated == 1)
    }

    fn insert_application(&self, application: NewApplication) -> StoreResult<Application> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(applications::table)
            .values(&application)
            .get_result(&mut conn)?)
    }

    fn find_application(&self, application_id: Uuid) -> StoreResult<Option<Application>> {
        let mut conn = self.conn()?;
        Ok(applications::table
            .find(application_id)
            .first(&mut conn)
            .optional()?)
    }

    fn update_application(
        &self,
        application_id: Uuid,
        expected: &ExpectedState,
        changes: &ApplicationChanges,
    ) -> StoreResult<Option<Application>> {
        let mut conn = self.conn()?;
        let changeset = ApplicationChangeset {
            status: changes.status.as_str(),
            trial_lesson_date: changes.trial_lesson_date,
            trial_lesson_score: changes.trial_lesson_score,
            trial_lesson_notes: changes
                .trial_lesson_notes
                .as_ref()
                .map(|notes| notes.as_deref()),
            documents_url: changes.documents_url.as_deref(),
            docs_status: changes.docs_status.map(|status| status.as_str()),
            updated_at: Utc::now().naive_utc(),
        };

        let target = applications::table
            .filter(applications::id.eq(application_id))
            .filter(applications::status.eq(expected.status.as_str()));

        let updated = match &expected.documents_url {
            Some(documents) => diesel::update(
                target.filter(applications::documents_url.is_not_distinct_from(documents.as_deref())),
            )
            .set(&changeset)
            .get_result(&mut conn)
            .optional()?,
            None => diesel::update(target)
                .set(&changeset)
                .get_result(&mut conn)
                .optional()?,
        };
        Ok(updated)
    }

    fn delete_application(
        &self,
        application_id: Uuid,
        expected: ApplicationStatus,
    ) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let deleted = diesel::delete(
            applications::table
                .filter(applications::id.eq(application_id))
                .filter(applications::status.eq(expected.as_str())),
        )
        .execute(&mut conn)?;
        Ok(deleted == 1)
    }

    fn list_applications(&self, scope: ApplicationScope) -> StoreResult<Vec<ApplicationListing>> {
        let mut conn = self.conn()?;
        let mut query = applications::table
            .inner_join(jobs::table)
            .inner_join(users::table)
            .select((
                applications::all_columns,
                jobs::title,
                jobs::institution_id,
                users::name,
                users::email,
            ))
            .order(applications::created_at.desc())
            .into_boxed();

        query = match scope {
            ApplicationScope::All => query,
            ApplicationScope::Institution(id) => query.filter(jobs::institution_id.eq(id)),
            ApplicationScope::AuthoredBy(id) => query.filter(jobs::author_id.eq(id)),
            ApplicationScope::Candidate(id) => query.filter(applications::user_id.eq(id)),
        };

        let rows: Vec<(Application, String, Uuid, String, String)> = query.load(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(
                |(application, job_title, institution_id, candidate_name, candidate_email)| {
                    ApplicationListing {
                        application,
                        job_title,
                        institution_id,
                        candidate_name,
                        candidate_email,
                    }
                },
            )
            .collect())
    }

    fn applications_created_before(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<Application>> {
        let mut conn = self.conn()?;
        Ok(applications::table
            .filter(applications::created_at.lt(cutoff))
            .order(applications::created_at.asc())
            .load(&mut conn)?)
    }

    fn scrub_application(
        &self,
        application_id: Uuid,
        scrub: ApplicationScrub,
    ) -> StoreResult<()> {
        if !scrub.clear_files && !scrub.clear_personal_data {
            return Ok(());
        }
        let changeset = ScrubChangeset {
            documents_url: scrub.clear_files.then_some(None),
            resume_url: scrub.clear_personal_data.then_some(None),
            trial_lesson_notes: scrub.clear_personal_data.then_some(None),
            updated_at: Utc::now().naive_utc(),
        };
        let mut conn = self.conn()?;
        diesel::update(applications::table.find(application_id))
            .set(&changeset)
            .execute(&mut conn)?;
        Ok(())
    }

    fn insert_notification(&self, notification: NewNotification) -> StoreResult<Notification> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(notifications::table)
            .values(&notification)
            .get_result(&mut conn)?)
    }

    fn list_notifications(&self, user_id: Uuid) -> StoreResult<Vec<Notification>> {
        let mut conn = self.conn()?;
        Ok(notifications::table
            .filter(notifications::user_id.eq(user_id))
            .order(notifications::created_at.desc())
            .load(&mut conn)?)
    }

    fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let updated = diesel::update(
            notifications::table
                .filter(notifications::id.eq(notification_id))
                .filter(notifications::user_id.eq(user_id)),
        )
        .set(notifications::read_at.eq(Some(at)))
        .execute(&mut conn)?;
        Ok(updated == 1)
    }

    fn enqueue_email(&self, email: &OutboundEmail) -> StoreResult<()> {
        let payload = serde_json::to_value(email)
            .map_err(|err| StoreError::Unavailable(format!("invalid email payload: {err}")))?;
        let mut conn = self.conn()?;
        enqueue_job(&mut conn, JOB_SEND_EMAIL, payload, None)?;
        Ok(())
    }
}
