use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub resume_url: Option<String>,
    pub bio: Option<String>,
    pub linkedin_url: Option<String>,
    pub active_institution_id: Option<Uuid>,
    pub last_login_at: Option<NaiveDateTime>,
    pub is_shadow: bool,
    pub anonymized_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn is_anonymized(&self) -> bool {
        self.anonymized_at.is_some()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub resume_url: Option<String>,
    pub bio: Option<String>,
    pub linkedin_url: Option<String>,
    pub active_institution_id: Option<Uuid>,
    pub is_shadow: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = institutions)]
pub struct Institution {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = institutions)]
pub struct NewInstitution {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_institution_roles)]
pub struct NewUserInstitutionRole {
    pub id: Uuid,
    pub user_id: Uuid,
    pub institution_id: Option<Uuid>,
    pub role_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = jobs)]
#[diesel(belongs_to(Institution))]
pub struct Job {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub area: Option<String>,
    pub category: Option<String>,
    pub status: String,
    pub institution_id: Uuid,
    pub author_id: Uuid,
    pub is_academic: bool,
    pub passing_grade: Option<f64>,
    pub required_documents: serde_json::Value,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Job {
    pub fn required_document_names(&self) -> Vec<String> {
        self.required_documents
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub area: Option<String>,
    pub category: Option<String>,
    pub status: String,
    pub institution_id: Uuid,
    pub author_id: Uuid,
    pub is_academic: bool,
    pub passing_grade: Option<f64>,
    pub required_documents: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = applications)]
#[diesel(belongs_to(Job))]
#[diesel(belongs_to(User))]
pub struct Application {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub status: String,
    pub trial_lesson_date: Option<NaiveDateTime>,
    pub trial_lesson_score: Option<f64>,
    pub trial_lesson_notes: Option<String>,
    pub documents_url: Option<String>,
    pub docs_status: Option<String>,
    pub resume_url: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = applications)]
pub struct NewApplication {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub status: String,
    pub resume_url: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = notifications)]
#[diesel(belongs_to(User))]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = background_jobs)]
pub struct BackgroundJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = background_jobs)]
pub struct NewBackgroundJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
