use axum::{
    extract::{Multipart, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
    storage::UploadedFile,
    utils::json::decode_document_list,
};

pub const UPLOAD_TOKEN_HEADER: &str = "x-upload-token";

#[derive(Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTokenResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_docs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub application_id: Uuid,
    pub status: String,
    pub documents: usize,
}

pub async fn validate_token(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Json<ValidateTokenResponse> {
    let details = query
        .token
        .as_deref()
        .and_then(|token| state.workflow.validate_upload_token(token));

    Json(match details {
        Some(details) => ValidateTokenResponse {
            valid: true,
            job_title: Some(details.job_title),
            required_docs: Some(details.required_docs),
            candidate_name: Some(details.candidate_name),
        },
        None => ValidateTokenResponse {
            valid: false,
            job_title: None,
            required_docs: None,
            candidate_name: None,
        },
    })
}

pub async fn upload_sensitive(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    mut multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let token = headers
        .get(UPLOAD_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or(query.token)
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "upload token required"))?;

    let mut uploaded: Option<UploadedFile> = None;
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let is_file = field.name() == Some("file") || field.file_name().is_some();
        if !is_file || uploaded.is_some() {
            continue;
        }
        let original_name = field
            .file_name()
            .map(str::to_owned)
            .unwrap_or_else(|| "document".to_string());
        let content_type = field.content_type().map(str::to_owned);
        let bytes = field.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read file bytes");
            AppError::bad_request(format!("failed to read file bytes: {err}"))
        })?;
        uploaded = Some(UploadedFile {
            original_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    let file = uploaded.ok_or_else(|| AppError::bad_request("file field is required"))?;
    let original_name = file.original_name.clone();
    let application = state
        .workflow
        .upload_sensitive_document(&token, file)
        .await?;

    info!(
        application_id = %application.id,
        original_name = %original_name,
        "sensitive document accepted"
    );
    Ok(Json(UploadResponse {
        application_id: application.id,
        documents: decode_document_list(application.documents_url.as_deref()).len(),
        status: application.status,
    }))
}
