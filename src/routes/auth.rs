use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser, CurrentActor},
    error::{AppError, AppResult},
    models::{NewUser, User},
    permissions::{RoleAssignment, RoleName},
    state::AppState,
    store::StoreError,
};

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ActiveInstitutionRequest {
    pub institution_id: Uuid,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct RegisteredUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
    pub active_institution: Option<Uuid>,
    pub roles: Vec<RoleAssignment>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisteredUser>)> {
    let email = payload.email.trim().to_ascii_lowercase();
    email
        .parse::<lettre::Address>()
        .map_err(|_| AppError::bad_request("a valid email is required"))?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let password_hash = password::hash_password(&payload.password)?;
    let user = state
        .store
        .insert_user(NewUser {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email,
            password_hash,
            phone: None,
            resume_url: None,
            bio: None,
            linkedin_url: None,
            active_institution_id: None,
            is_shadow: false,
        })
        .map_err(|err| match err {
            StoreError::Conflict => AppError::conflict("email already registered"),
            other => other.into(),
        })?;
    state.store.assign_role(user.id, None, RoleName::Candidate)?;

    info!(user_id = %user.id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisteredUser {
            id: user.id,
            email: user.email,
            name: user.name,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let email = payload.email.trim().to_ascii_lowercase();
    let user = state
        .store
        .find_user_by_email(&email)?
        .filter(|user| !user.is_anonymized())
        .ok_or_else(AppError::unauthorized)?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        warn!(user_id = %user.id, "rejected login with wrong password");
        return Err(AppError::unauthorized());
    }

    state
        .store
        .record_login(user.id, Utc::now().naive_utc())?;
    Ok(Json(issue_session(&state, &user, user.active_institution_id)?))
}

pub async fn select_active_institution(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(payload): Json<ActiveInstitutionRequest>,
) -> AppResult<Json<LoginResponse>> {
    let institution_id = payload.institution_id;
    if !actor.is_superadmin() && !actor.holds_any_role_at(institution_id) {
        return Err(AppError::forbidden("no role at this institution"));
    }
    state
        .store
        .find_institution(institution_id)?
        .ok_or_else(AppError::not_found)?;

    state
        .store
        .set_active_institution(actor.user_id, Some(institution_id))?;
    let user = state
        .store
        .find_user(actor.user_id)?
        .ok_or_else(AppError::unauthorized)?;

    info!(user_id = %user.id, institution_id = %institution_id, "active institution selected");
    Ok(Json(issue_session(&state, &user, Some(institution_id))?))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MeResponse>> {
    let roles = state.store.role_assignments(user.user_id)?;
    Ok(Json(MeResponse {
        user_id: user.user_id,
        email: user.email,
        active_institution: user.active_institution,
        roles,
    }))
}

fn issue_session(
    state: &AppState,
    user: &User,
    active_institution: Option<Uuid>,
) -> AppResult<LoginResponse> {
    let access_token = state
        .jwt
        .generate_token(user.id, &user.email, active_institution)?;
    Ok(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.session_expiry_seconds(),
    })
}
