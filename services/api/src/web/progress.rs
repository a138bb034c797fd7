//! services/api/src/web/progress.rs
//!
//! Progress reporting. Totals are derived from the closed part of the ledger
//! on every request.

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use study_tracker_core::{AuthContext, ProgressReportRow, SessionFilter};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{port_failure, ErrorBody, HandlerError};
use crate::web::middleware::require_admin;
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProgressQuery {
    pub user_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct ProgressRowResponse {
    pub student_id: Uuid,
    pub student_name: String,
    pub email: String,
    pub course_id: Uuid,
    pub course_name: String,
    pub total_seconds: i64,
    pub session_count: i64,
    pub recovered_seconds: i64,
}

impl From<ProgressReportRow> for ProgressRowResponse {
    fn from(row: ProgressReportRow) -> Self {
        Self {
            student_id: row.student_id,
            student_name: row.student_name,
            email: row.email,
            course_id: row.course_id,
            course_name: row.course_name,
            total_seconds: row.total_seconds,
            session_count: row.session_count,
            recovered_seconds: row.recovered_seconds,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct MyProgressResponse {
    pub course_id: Uuid,
    pub course_name: String,
    pub total_seconds: i64,
    pub session_count: i64,
    pub recovered_seconds: i64,
    pub recovered_count: i64,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /progress - Per-student, per-course study totals
#[utoipa::path(
    get,
    path = "/progress",
    params(ProgressQuery),
    responses(
        (status = 200, description = "Report rows ordered by student then course", body = [ProgressRowResponse]),
        (status = 403, description = "Administrator access required", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    )
)]
pub async fn progress_report_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<Vec<ProgressRowResponse>>, HandlerError> {
    require_admin(&actor)?;

    let rows = state
        .aggregator
        .report(SessionFilter {
            user_id: query.user_id,
            course_id: query.course_id,
        })
        .await
        .map_err(|e| port_failure("Failed to build progress report", e))?;
    Ok(Json(rows.into_iter().map(ProgressRowResponse::from).collect()))
}

/// GET /me/progress - The caller's own study totals per course
#[utoipa::path(
    get,
    path = "/me/progress",
    responses(
        (status = 200, description = "One row per studied course, ordered by course name", body = [MyProgressResponse]),
        (status = 401, description = "Not signed in", body = ErrorBody)
    )
)]
pub async fn my_progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
) -> Result<Json<Vec<MyProgressResponse>>, HandlerError> {
    let summaries = state
        .aggregator
        .summarize_all(SessionFilter {
            user_id: Some(actor.user_id),
            course_id: None,
        })
        .await
        .map_err(|e| port_failure("Failed to summarize progress", e))?;

    // Courses the student is no longer assigned to still show their history.
    let names: HashMap<Uuid, String> = state
        .catalog
        .list_courses()
        .await
        .map_err(|e| port_failure("Failed to list courses", e))?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();

    let mut rows: Vec<MyProgressResponse> = summaries
        .into_iter()
        .map(|s| MyProgressResponse {
            course_name: names.get(&s.course_id).cloned().unwrap_or_default(),
            course_id: s.course_id,
            total_seconds: s.total_seconds,
            session_count: s.session_count,
            recovered_seconds: s.recovered_seconds,
            recovered_count: s.recovered_count,
        })
        .collect();
    rows.sort_by(|a, b| a.course_name.cmp(&b.course_name));

    Ok(Json(rows))
}
