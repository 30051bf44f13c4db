use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod applications;
pub mod auth;
pub mod health;
pub mod jobs;
pub mod notifications;
pub mod upload;

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 25;

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(err) => {
                        warn!(origin = %value, error = %err, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/active-institution", post(auth::select_active_institution))
        .route("/me", get(auth::me));

    let jobs_routes = Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::create_job))
        .route("/apply-guest", post(jobs::apply_guest))
        .route("/:id", get(jobs::get_job).delete(jobs::delete_job))
        .route("/:id/status", patch(jobs::update_job_status));

    let applications_routes = Router::new()
        .route("/apply", post(applications::apply))
        .route("/my-applications", get(applications::my_applications))
        .route("/manage/all", get(applications::list_managed))
        .route("/manage/:id/status", patch(applications::update_status))
        .route("/manage/:id/schedule", patch(applications::schedule_trial))
        .route("/manage/:id/grade", patch(applications::grade_trial))
        .route("/manage/:id/documents", get(applications::document_links))
        .route("/:id", delete(applications::cancel));

    let notifications_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/:id/read", post(notifications::mark_read));

    let upload_routes = Router::new()
        .route("/validate-token", get(upload::validate_token))
        .route("/sensitive", post(upload::upload_sensitive));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/applications", applications_routes)
        .nest("/api/notifications", notifications_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .nest("/api/jobs", jobs_routes)
        .nest("/api/upload", upload_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
