//! services/api/src/web/timer.rs
//!
//! Study timer endpoints. All timestamps come from the store's clock.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use study_tracker_core::{AuthContext, Session, StopOutcome};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{port_failure, ErrorBody, HandlerError};
use crate::web::state::AppState;

//=========================================================================================
// Response Types
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct StartTimerResponse {
    pub started: bool,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// `true` when a session was already open and was returned unchanged.
    pub resumed: bool,
}

#[derive(Serialize, ToSchema)]
pub struct StopTimerResponse {
    /// `false` when there was no open session.
    pub stopped: bool,
    pub duration_seconds: Option<i64>,
    /// `true` when the session had gone stale and was closed with a capped duration.
    pub recovered: bool,
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub course_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    /// `stopped`, `recovered`, or absent while open.
    pub close_reason: Option<String>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            course_id: session.course_id,
            started_at: session.started_at,
            ended_at: session.ended_at,
            duration_seconds: session.duration_seconds,
            close_reason: session.close_reason.map(|r| r.as_str().to_string()),
        }
    }
}

async fn store_now(state: &AppState) -> Result<DateTime<Utc>, HandlerError> {
    state
        .ledger
        .now()
        .await
        .map_err(|e| port_failure("Failed to read the store clock", e))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /courses/{course_id}/timer/start - Start (or resume) the study timer
#[utoipa::path(
    post,
    path = "/courses/{course_id}/timer/start",
    params(("course_id" = Uuid, Path, description = "The course being studied")),
    responses(
        (status = 200, description = "Timer running", body = StartTimerResponse),
        (status = 403, description = "Course not assigned", body = ErrorBody),
        (status = 404, description = "Course not found", body = ErrorBody),
        (status = 409, description = "Lost a race with a concurrent request", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    )
)]
pub async fn start_timer_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<StartTimerResponse>, HandlerError> {
    let now = store_now(&state).await?;
    let outcome = state
        .tracker
        .start(&actor, course_id, now)
        .await
        .map_err(|e| port_failure("Failed to start study timer", e))?;

    Ok(Json(StartTimerResponse {
        started: true,
        session_id: outcome.session.id,
        started_at: outcome.session.started_at,
        resumed: !outcome.created,
    }))
}

/// POST /courses/{course_id}/timer/stop - Stop the study timer
#[utoipa::path(
    post,
    path = "/courses/{course_id}/timer/stop",
    params(("course_id" = Uuid, Path, description = "The course being studied")),
    responses(
        (status = 200, description = "Timer stopped, or nothing was running", body = StopTimerResponse),
        (status = 409, description = "Lost a race with a concurrent request", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    )
)]
pub async fn stop_timer_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<StopTimerResponse>, HandlerError> {
    let now = store_now(&state).await?;
    let outcome = state
        .tracker
        .stop(&actor, course_id, now)
        .await
        .map_err(|e| port_failure("Failed to stop study timer", e))?;

    let response = match outcome {
        StopOutcome::Stopped(session) => StopTimerResponse {
            stopped: true,
            duration_seconds: session.duration_seconds,
            recovered: session.is_recovered(),
        },
        StopOutcome::NothingToStop => StopTimerResponse {
            stopped: false,
            duration_seconds: None,
            recovered: false,
        },
    };
    Ok(Json(response))
}

/// GET /courses/{course_id}/sessions - The caller's sessions for a course, newest first
#[utoipa::path(
    get,
    path = "/courses/{course_id}/sessions",
    params(("course_id" = Uuid, Path, description = "The course")),
    responses(
        (status = 200, description = "Session history", body = [SessionResponse]),
        (status = 404, description = "Course not found", body = ErrorBody)
    )
)]
pub async fn list_sessions_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Vec<SessionResponse>>, HandlerError> {
    state
        .catalog
        .get_course(course_id)
        .await
        .map_err(|e| port_failure("Failed to load course", e))?;

    let sessions = state
        .tracker
        .history(actor.user_id, course_id)
        .await
        .map_err(|e| port_failure("Failed to list study sessions", e))?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}
