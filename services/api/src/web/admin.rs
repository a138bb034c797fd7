//! services/api/src/web/admin.rs
//!
//! Administrator endpoints: the student directory, role changes, course
//! assignments and the manual recovery sweep.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use study_tracker_core::{Assignment, AuthContext, Role};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{failure, port_failure, ErrorBody, HandlerError};
use crate::web::auth::UserResponse;
use crate::web::middleware::require_admin;
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SetRoleRequest {
    /// `student` or `admin`.
    pub role: String,
}

#[derive(Deserialize, ToSchema)]
pub struct AssignmentRequest {
    pub user_id: Uuid,
    pub course_id: Uuid,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AssignmentQuery {
    /// Only list assignments of this user.
    pub user_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct AssignmentResponse {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

impl From<Assignment> for AssignmentResponse {
    fn from(assignment: Assignment) -> Self {
        Self {
            user_id: assignment.user_id,
            course_id: assignment.course_id,
            assigned_at: assignment.assigned_at,
        }
    }
}

/// An assignment with the student's and course's display fields.
#[derive(Serialize, ToSchema)]
pub struct AssignmentDetailResponse {
    pub user_id: Uuid,
    pub student_name: String,
    pub email: String,
    pub course_id: Uuid,
    pub course_name: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct SweepResponse {
    pub recovered: u32,
    pub failed: u32,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /students - Every registered student
#[utoipa::path(
    get,
    path = "/students",
    responses(
        (status = 200, description = "Students ordered by name", body = [UserResponse]),
        (status = 403, description = "Administrator access required", body = ErrorBody)
    )
)]
pub async fn list_students_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
) -> Result<Json<Vec<UserResponse>>, HandlerError> {
    require_admin(&actor)?;

    let students = state
        .directory
        .list_users(Some(Role::Student))
        .await
        .map_err(|e| port_failure("Failed to list students", e))?;
    Ok(Json(students.into_iter().map(UserResponse::from).collect()))
}

/// PUT /users/{user_id}/role - Change a user's role
#[utoipa::path(
    put,
    path = "/users/{user_id}/role",
    params(("user_id" = Uuid, Path, description = "The user to change")),
    request_body = SetRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = UserResponse),
        (status = 400, description = "Unknown role", body = ErrorBody),
        (status = 403, description = "Administrator access required", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
        (status = 409, description = "Administrators cannot demote themselves", body = ErrorBody)
    )
)]
pub async fn set_role_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<SetRoleRequest>,
) -> Result<Json<UserResponse>, HandlerError> {
    require_admin(&actor)?;

    let role = req
        .role
        .parse::<Role>()
        .map_err(|e| failure(StatusCode::BAD_REQUEST, "INVALID_ROLE", e))?;
    if user_id == actor.user_id && role != Role::Admin {
        return Err(failure(
            StatusCode::CONFLICT,
            "CONFLICT",
            "Administrators cannot remove their own admin role",
        ));
    }

    let user = state
        .directory
        .set_user_role(user_id, role)
        .await
        .map_err(|e| port_failure("Failed to change role", e))?;
    info!(user_id = %user.id, role = %user.role, changed_by = %actor.user_id, "User role changed");

    Ok(Json(user.into()))
}

/// GET /assignments - Course assignments
#[utoipa::path(
    get,
    path = "/assignments",
    params(AssignmentQuery),
    responses(
        (status = 200, description = "Assignments ordered by student name then course name", body = [AssignmentDetailResponse]),
        (status = 403, description = "Administrator access required", body = ErrorBody)
    )
)]
pub async fn list_assignments_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Query(query): Query<AssignmentQuery>,
) -> Result<Json<Vec<AssignmentDetailResponse>>, HandlerError> {
    require_admin(&actor)?;

    let assignments = match query.user_id {
        Some(user_id) => state.registry.list_for_user(user_id).await,
        None => state.registry.list().await,
    }
    .map_err(|e| port_failure("Failed to list assignments", e))?;
    if assignments.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let users: HashMap<_, _> = state
        .directory
        .list_users(None)
        .await
        .map_err(|e| port_failure("Failed to list users", e))?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();
    let courses: HashMap<_, _> = state
        .catalog
        .list_courses()
        .await
        .map_err(|e| port_failure("Failed to list courses", e))?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();

    let mut keyed: Vec<((String, String, String), AssignmentDetailResponse)> = assignments
        .into_iter()
        .filter_map(|a| {
            let (Some(user), Some(course)) = (users.get(&a.user_id), courses.get(&a.course_id))
            else {
                warn!(
                    user_id = %a.user_id,
                    course_id = %a.course_id,
                    "Assignment references an unknown user or course; skipping"
                );
                return None;
            };
            let key = (
                user.first_name.clone(),
                user.last_name.clone(),
                course.name.clone(),
            );
            Some((
                key,
                AssignmentDetailResponse {
                    user_id: user.id,
                    student_name: user.full_name(),
                    email: user.email.clone(),
                    course_id: course.id,
                    course_name: course.name.clone(),
                    assigned_at: a.assigned_at,
                },
            ))
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    let rows = keyed.into_iter().map(|(_, row)| row).collect();

    Ok(Json(rows))
}

/// POST /assignments - Assign a course to a user
#[utoipa::path(
    post,
    path = "/assignments",
    request_body = AssignmentRequest,
    responses(
        (status = 201, description = "Course assigned", body = AssignmentResponse),
        (status = 403, description = "Administrator access required", body = ErrorBody),
        (status = 404, description = "User or course not found", body = ErrorBody),
        (status = 409, description = "Already assigned", body = ErrorBody)
    )
)]
pub async fn create_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Json(req): Json<AssignmentRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    require_admin(&actor)?;

    let now = state
        .ledger
        .now()
        .await
        .map_err(|e| port_failure("Failed to read the store clock", e))?;
    let assignment = state
        .registry
        .assign(req.user_id, req.course_id, now)
        .await
        .map_err(|e| port_failure("Failed to assign course", e))?;

    Ok((StatusCode::CREATED, Json(AssignmentResponse::from(assignment))))
}

/// DELETE /assignments - Revoke a course assignment; session history is kept
#[utoipa::path(
    delete,
    path = "/assignments",
    request_body = AssignmentRequest,
    responses(
        (status = 204, description = "Assignment removed"),
        (status = 403, description = "Administrator access required or pair not assigned", body = ErrorBody)
    )
)]
pub async fn delete_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Json(req): Json<AssignmentRequest>,
) -> Result<StatusCode, HandlerError> {
    require_admin(&actor)?;

    state
        .registry
        .unassign(req.user_id, req.course_id)
        .await
        .map_err(|e| port_failure("Failed to remove assignment", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/sweep - Recover stale open sessions now
#[utoipa::path(
    post,
    path = "/admin/sweep",
    responses(
        (status = 200, description = "Sweep report", body = SweepResponse),
        (status = 403, description = "Administrator access required", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    )
)]
pub async fn sweep_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
) -> Result<Json<SweepResponse>, HandlerError> {
    require_admin(&actor)?;

    let now = state
        .ledger
        .now()
        .await
        .map_err(|e| port_failure("Failed to read the store clock", e))?;
    let report = state
        .sweeper
        .sweep(now)
        .await
        .map_err(|e| port_failure("Manual recovery sweep failed", e))?;
    info!(recovered = report.recovered, failed = report.failed, "Manual recovery sweep finished");

    Ok(Json(SweepResponse {
        recovered: report.recovered,
        failed: report.failed,
    }))
}
