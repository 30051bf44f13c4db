use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{AuthenticatedUser, CurrentActor},
    error::{AppError, AppResult},
    models::Application,
    state::AppState,
    store::ApplicationListing,
    utils::json::decode_document_list,
    workflow::{ApplicationStatus, DocumentLink},
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    #[serde(alias = "job_id")]
    pub job_id: Uuid,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct ScheduleRequest {
    pub date: String,
}

#[derive(Deserialize)]
pub struct GradeRequest {
    pub score: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub status: String,
    pub trial_lesson_date: Option<NaiveDateTime>,
    pub trial_lesson_score: Option<f64>,
    pub trial_lesson_notes: Option<String>,
    pub documents: Vec<String>,
    pub docs_status: Option<String>,
    pub resume_url: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Application> for ApplicationResponse {
    fn from(application: Application) -> Self {
        Self {
            documents: decode_document_list(application.documents_url.as_deref()),
            id: application.id,
            user_id: application.user_id,
            job_id: application.job_id,
            status: application.status,
            trial_lesson_date: application.trial_lesson_date,
            trial_lesson_score: application.trial_lesson_score,
            trial_lesson_notes: application.trial_lesson_notes,
            docs_status: application.docs_status,
            resume_url: application.resume_url,
            created_at: application.created_at,
            updated_at: application.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationListingResponse {
    #[serde(flatten)]
    pub application: ApplicationResponse,
    pub job_title: String,
    pub institution_id: Uuid,
    pub candidate_name: String,
    pub candidate_email: String,
}

impl From<ApplicationListing> for ApplicationListingResponse {
    fn from(listing: ApplicationListing) -> Self {
        Self {
            application: listing.application.into(),
            job_title: listing.job_title,
            institution_id: listing.institution_id,
            candidate_name: listing.candidate_name,
            candidate_email: listing.candidate_email,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResponse {
    pub application: ApplicationResponse,
    pub passed: bool,
    pub passing_grade: f64,
    pub upload_link_sent: bool,
}

pub async fn apply(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ApplyRequest>,
) -> AppResult<(StatusCode, Json<ApplicationResponse>)> {
    let application = state.workflow.apply(user.user_id, payload.job_id)?;
    Ok((StatusCode::CREATED, Json(application.into())))
}

pub async fn my_applications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ApplicationListingResponse>>> {
    let listings = state.workflow.list_mine(user.user_id)?;
    Ok(Json(listings.into_iter().map(Into::into).collect()))
}

pub async fn list_managed(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> AppResult<Json<Vec<ApplicationListingResponse>>> {
    let listings = state.workflow.list_managed(&actor)?;
    Ok(Json(listings.into_iter().map(Into::into).collect()))
}

pub async fn update_status(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(application_id): Path<Uuid>,
    Json(payload): Json<StatusRequest>,
) -> AppResult<Json<ApplicationResponse>> {
    let status: ApplicationStatus = payload
        .status
        .parse()
        .map_err(|err: crate::workflow::status::UnknownStatus| {
            AppError::bad_request(err.to_string())
        })?;
    let application = state
        .workflow
        .update_status(&actor, application_id, status)?;
    Ok(Json(application.into()))
}

pub async fn schedule_trial(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(application_id): Path<Uuid>,
    Json(payload): Json<ScheduleRequest>,
) -> AppResult<Json<ApplicationResponse>> {
    let date = parse_trial_date(&payload.date)
        .ok_or_else(|| AppError::bad_request("date must be an ISO-8601 date or date-time"))?;
    let application = state
        .workflow
        .schedule_trial(&actor, application_id, date)?;
    Ok(Json(application.into()))
}

pub async fn grade_trial(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(application_id): Path<Uuid>,
    Json(payload): Json<GradeRequest>,
) -> AppResult<Json<GradeResponse>> {
    let outcome = state
        .workflow
        .grade_trial(&actor, application_id, payload.score, payload.notes)?;
    Ok(Json(GradeResponse {
        upload_link_sent: outcome.upload_token.is_some(),
        passed: outcome.passed,
        passing_grade: outcome.passing_grade,
        application: outcome.application.into(),
    }))
}

pub async fn document_links(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(application_id): Path<Uuid>,
) -> AppResult<Json<Vec<DocumentLink>>> {
    let links = state
        .workflow
        .document_links(&actor, application_id)
        .await?;
    Ok(Json(links))
}

pub async fn cancel(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(application_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.workflow.cancel(&actor, application_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accepts RFC 3339, a naive date-time, or a bare date (midnight).
fn parse_trial_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::parse_trial_date;

    #[test]
    fn parses_supported_date_formats() {
        let midnight = parse_trial_date("2025-06-01").unwrap();
        assert_eq!(midnight.to_string(), "2025-06-01 00:00:00");

        let local = parse_trial_date("2025-06-01T14:30").unwrap();
        assert_eq!(local.to_string(), "2025-06-01 14:30:00");

        let zoned = parse_trial_date("2025-06-01T14:30:00+02:00").unwrap();
        assert_eq!(zoned.to_string(), "2025-06-01 12:30:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_trial_date("next tuesday").is_none());
        assert!(parse_trial_date("2025-13-01").is_none());
    }
}
