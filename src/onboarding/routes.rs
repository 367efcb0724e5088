//! REST endpoints for the onboarding flow and the planning chat.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::warn;

use super::coordinator::OnboardingCoordinator;
use super::ws::ws_chat_handler;
use crate::config::EnvStatus;
use crate::error::{Error, Result};
use crate::session::SessionKey;

/// User id for sessions minted without one.
pub const DEFAULT_USER_ID: &str = "local_user";

const EXPORT_FILENAME: &str = "schedule_recommender_chat.md";

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<OnboardingCoordinator>,
    /// Environment status captured at startup.
    pub env: Arc<Vec<EnvStatus>>,
}

/// Build the full HTTP router.
pub fn app_routes(coordinator: Arc<OnboardingCoordinator>, env: Vec<EnvStatus>) -> Router {
    let state = AppState {
        coordinator,
        env: Arc::new(env),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/env", get(env_status))
        .route("/api/sessions", post(create_session))
        .route(
            "/api/sessions/{user_id}/{session_id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/sessions/{user_id}/{session_id}/verify", post(verify))
        .route("/api/sessions/{user_id}/{session_id}/major", post(confirm_major))
        .route("/api/sessions/{user_id}/{session_id}/term", post(set_term))
        .route("/api/sessions/{user_id}/{session_id}/courses", post(set_courses))
        .route("/api/sessions/{user_id}/{session_id}/chat", post(chat))
        .route("/api/sessions/{user_id}/{session_id}/new-chat", post(new_chat))
        .route("/api/sessions/{user_id}/{session_id}/reset", post(reset))
        .route("/api/sessions/{user_id}/{session_id}/export", get(export))
        .route("/api/sessions/{user_id}/{session_id}/debug", get(debug))
        .route("/api/sessions/{user_id}/{session_id}/ws", get(ws_chat_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InputValidation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::WrongStage { .. } => StatusCode::CONFLICT,
            Self::NotFound { .. } | Self::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Collaborator(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(kind = self.kind(), error = %self, "Request failed");
        }
        (
            status,
            Json(serde_json::json!({
                "error": self.user_message(),
                "kind": self.kind(),
                "retryable": self.is_retryable(),
            })),
        )
            .into_response()
    }
}

// ── Request bodies ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    student_id: String,
}

#[derive(Debug, Deserialize)]
struct MajorRequest {
    major: String,
}

/// Year arrives either as a JSON number or as form text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum YearInput {
    Number(i64),
    Text(String),
}

impl YearInput {
    fn as_text(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TermRequest {
    quarter: String,
    year: YearInput,
}

#[derive(Debug, Deserialize)]
struct CoursesRequest {
    courses: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

fn session_key((user_id, session_id): (String, String)) -> SessionKey {
    SessionKey::new(user_id, session_id)
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "schedule-recommender"
    }))
}

async fn env_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.env.as_ref().clone())
}

/// POST /api/sessions
///
/// Mint a fresh identifier pair and create its session.
async fn create_session(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let key = SessionKey::generate(DEFAULT_USER_ID);
    let view = state.coordinator.status(&key).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(path): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.coordinator.status(&session_key(path)).await?))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(path): Path<(String, String)>,
) -> Result<StatusCode> {
    let key = session_key(path);
    if state.coordinator.delete(&key).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::SessionNotFound {
            user_id: key.user_id,
            session_id: key.session_id,
        })
    }
}

async fn verify(
    State(state): State<AppState>,
    Path(path): Path<(String, String)>,
    Json(body): Json<VerifyRequest>,
) -> Result<impl IntoResponse> {
    let view = state
        .coordinator
        .verify(&session_key(path), &body.student_id)
        .await?;
    Ok(Json(view))
}

async fn confirm_major(
    State(state): State<AppState>,
    Path(path): Path<(String, String)>,
    Json(body): Json<MajorRequest>,
) -> Result<impl IntoResponse> {
    let reply = state
        .coordinator
        .confirm_major(&session_key(path), &body.major)
        .await?;
    Ok(Json(reply))
}

async fn set_term(
    State(state): State<AppState>,
    Path(path): Path<(String, String)>,
    Json(body): Json<TermRequest>,
) -> Result<impl IntoResponse> {
    let view = state
        .coordinator
        .set_term(&session_key(path), &body.quarter, &body.year.as_text())
        .await?;
    Ok(Json(view))
}

async fn set_courses(
    State(state): State<AppState>,
    Path(path): Path<(String, String)>,
    Json(body): Json<CoursesRequest>,
) -> Result<impl IntoResponse> {
    let reply = state
        .coordinator
        .set_courses(&session_key(path), &body.courses, None)
        .await?;
    Ok(Json(reply))
}

async fn chat(
    State(state): State<AppState>,
    Path(path): Path<(String, String)>,
    Json(body): Json<ChatRequest>,
) -> Result<impl IntoResponse> {
    let reply = state
        .coordinator
        .chat(&session_key(path), &body.message, None)
        .await?;
    Ok(Json(reply))
}

async fn new_chat(
    State(state): State<AppState>,
    Path(path): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.coordinator.new_chat(&session_key(path)).await?))
}

async fn reset(
    State(state): State<AppState>,
    Path(path): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        state.coordinator.reset_onboarding(&session_key(path)).await?,
    ))
}

/// GET .../export
///
/// The transcript as a downloadable Markdown file.
async fn export(
    State(state): State<AppState>,
    Path(path): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let markdown = state.coordinator.export_markdown(&session_key(path)).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{EXPORT_FILENAME}\""),
            ),
        ],
        markdown,
    ))
}

async fn debug(
    State(state): State<AppState>,
    Path(path): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.coordinator.debug(&session_key(path)).await?))
}
