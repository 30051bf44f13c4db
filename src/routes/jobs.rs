use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::CurrentActor,
    error::{AppError, AppResult},
    models::{Job, NewJob},
    permissions::{can_act, can_act_as_owner, Action, Actor},
    state::AppState,
    workflow::{GuestApplicant, JobStatus},
};

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub title: String,
    pub description: String,
    pub area: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub academic: bool,
    pub passing_grade: Option<f64>,
    #[serde(default)]
    pub required_documents: Vec<String>,
    /// Only honoured for superadmins acting without an active institution.
    pub institution_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct JobStatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestApplyRequest {
    #[serde(alias = "job_id")]
    pub job_id: Uuid,
    pub email: String,
    #[serde(alias = "first_name")]
    pub first_name: String,
    #[serde(default, alias = "last_name")]
    pub last_name: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    #[serde(alias = "linkedin_url")]
    pub linkedin_url: Option<String>,
    #[serde(alias = "resume_url")]
    pub resume_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestApplyResponse {
    pub application_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub area: Option<String>,
    pub category: Option<String>,
    pub status: String,
    pub institution_id: Uuid,
    pub author_id: Uuid,
    pub academic: bool,
    pub passing_grade: Option<f64>,
    pub required_documents: Vec<String>,
    pub created_at: NaiveDateTime,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            required_documents: job.required_document_names(),
            id: job.id,
            title: job.title,
            description: job.description,
            area: job.area,
            category: job.category,
            status: job.status,
            institution_id: job.institution_id,
            author_id: job.author_id,
            academic: job.is_academic,
            passing_grade: job.passing_grade,
            created_at: job.created_at,
        }
    }
}

pub async fn list_jobs(State(state): State<AppState>) -> AppResult<Json<Vec<JobResponse>>> {
    let jobs = state.store.list_published_jobs()?;
    Ok(Json(jobs.into_iter().map(Into::into).collect()))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobResponse>> {
    let job = state
        .store
        .find_job(job_id)?
        .filter(|job| job.deleted_at.is_none())
        .filter(|job| job.status.parse::<JobStatus>() == Ok(JobStatus::Published))
        .ok_or_else(AppError::not_found)?;
    Ok(Json(job.into()))
}

pub async fn create_job(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(payload): Json<CreateJobRequest>,
) -> AppResult<(StatusCode, Json<JobResponse>)> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    if let Some(grade) = payload.passing_grade {
        if !grade.is_finite() || grade < 0.0 {
            return Err(AppError::bad_request(
                "passing_grade must be a non-negative number",
            ));
        }
    }

    let institution_id = actor
        .active_institution
        .or(payload.institution_id.filter(|_| actor.is_superadmin()))
        .ok_or_else(|| AppError::bad_request("select an active institution first"))?;
    ensure_allowed(can_act(&actor, Action::CreateJob, Some(institution_id)).is_allowed())?;
    state
        .store
        .find_institution(institution_id)?
        .ok_or_else(AppError::not_found)?;

    let required_documents: Vec<String> = payload
        .required_documents
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();

    let job = state.store.insert_job(NewJob {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: payload.description,
        area: payload.area,
        category: payload.category,
        status: JobStatus::Draft.as_str().to_string(),
        institution_id,
        author_id: actor.user_id,
        is_academic: payload.academic,
        passing_grade: payload.passing_grade.filter(|_| payload.academic),
        required_documents: Value::from(required_documents),
    })?;

    info!(job_id = %job.id, institution_id = %institution_id, author_id = %actor.user_id, "job created");
    Ok((StatusCode::CREATED, Json(job.into())))
}

pub async fn update_job_status(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(job_id): Path<Uuid>,
    Json(payload): Json<JobStatusRequest>,
) -> AppResult<Json<JobResponse>> {
    let status: JobStatus = payload
        .status
        .parse()
        .map_err(|_| AppError::bad_request("status must be draft, published or closed"))?;
    let job = load_live_job(&state, job_id)?;
    ensure_allowed(may_manage_job(&actor, &job))?;

    let updated = state
        .store
        .update_job_status(job_id, status)?
        .ok_or_else(AppError::not_found)?;
    info!(job_id = %job_id, status = status.as_str(), actor_id = %actor.user_id, "job status updated");
    Ok(Json(updated.into()))
}

pub async fn delete_job(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(job_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let job = load_live_job(&state, job_id)?;
    ensure_allowed(may_manage_job(&actor, &job))?;

    if !state.store.soft_delete_job(job_id, Utc::now().naive_utc())? {
        return Err(AppError::not_found());
    }
    info!(job_id = %job_id, actor_id = %actor.user_id, "job deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn apply_guest(
    State(state): State<AppState>,
    Json(payload): Json<GuestApplyRequest>,
) -> AppResult<(StatusCode, Json<GuestApplyResponse>)> {
    let outcome = state.workflow.apply_as_guest(
        GuestApplicant {
            email: payload.email,
            first_name: payload.first_name,
            last_name: payload.last_name,
            phone: payload.phone,
            bio: payload.bio,
            linkedin_url: payload.linkedin_url,
            resume_url: payload.resume_url,
        },
        payload.job_id,
    )?;
    Ok((
        StatusCode::CREATED,
        Json(GuestApplyResponse {
            application_id: outcome.application.id,
            status: outcome.application.status,
        }),
    ))
}

fn load_live_job(state: &AppState, job_id: Uuid) -> AppResult<Job> {
    state
        .store
        .find_job(job_id)?
        .filter(|job| job.deleted_at.is_none())
        .ok_or_else(AppError::not_found)
}

/// Authors manage their own postings; the institution's admin tier manages all.
fn may_manage_job(actor: &Actor, job: &Job) -> bool {
    can_act_as_owner(actor, job.author_id).is_allowed()
        || can_act(actor, Action::ManageInstitutionJobs, Some(job.institution_id)).is_allowed()
}

fn ensure_allowed(allowed: bool) -> AppResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden("not allowed to manage this job"))
    }
}
