//! services/api/src/web/courses.rs
//!
//! Course catalog and course material endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use study_tracker_core::{AuthContext, Course, CourseMaterial, MaterialKind, Role};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{failure, port_failure, ErrorBody, HandlerError};
use crate::web::middleware::require_admin;
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateCourseRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct CourseResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Course> for CourseResponse {
    fn from(course: Course) -> Self {
        Self {
            id: course.id,
            name: course.name,
            description: course.description,
            created_at: course.created_at,
        }
    }
}

/// Metadata for a material stored elsewhere.
#[derive(Deserialize, ToSchema)]
pub struct CreateMaterialRequest {
    /// `document` or `audio`.
    pub material_type: String,
    pub title: String,
    /// Where the bytes live (URL or storage key).
    pub location: String,
}

#[derive(Serialize, ToSchema)]
pub struct MaterialResponse {
    pub id: Uuid,
    pub course_id: Uuid,
    pub material_type: String,
    pub title: String,
    pub location: String,
    pub uploaded_at: DateTime<Utc>,
}

impl From<CourseMaterial> for MaterialResponse {
    fn from(material: CourseMaterial) -> Self {
        Self {
            id: material.id,
            course_id: material.course_id,
            material_type: material.kind.as_str().to_string(),
            title: material.title,
            location: material.location,
            uploaded_at: material.uploaded_at,
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /courses - All courses for administrators, assigned courses for students
#[utoipa::path(
    get,
    path = "/courses",
    responses(
        (status = 200, description = "Visible courses ordered by name", body = [CourseResponse]),
        (status = 401, description = "Not signed in", body = ErrorBody)
    )
)]
pub async fn list_courses_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
) -> Result<Json<Vec<CourseResponse>>, HandlerError> {
    let courses = match actor.role {
        Role::Admin => state.catalog.list_courses().await,
        Role::Student => state.catalog.list_courses_for_user(actor.user_id).await,
    }
    .map_err(|e| port_failure("Failed to list courses", e))?;

    Ok(Json(courses.into_iter().map(CourseResponse::from).collect()))
}

/// POST /courses - Create a course
#[utoipa::path(
    post,
    path = "/courses",
    request_body = CreateCourseRequest,
    responses(
        (status = 201, description = "Course created", body = CourseResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 403, description = "Administrator access required", body = ErrorBody),
        (status = 409, description = "A course with this name exists", body = ErrorBody)
    )
)]
pub async fn create_course_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Json(req): Json<CreateCourseRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    require_admin(&actor)?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "INVALID_NAME", "Course name is required"));
    }
    let description = req
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let course = state
        .catalog
        .create_course(name, description)
        .await
        .map_err(|e| port_failure("Failed to create course", e))?;
    info!(course_id = %course.id, "Course created");

    Ok((StatusCode::CREATED, Json(CourseResponse::from(course))))
}

/// DELETE /courses/{course_id} - Delete a course nobody is enrolled in or has studied
#[utoipa::path(
    delete,
    path = "/courses/{course_id}",
    params(("course_id" = Uuid, Path, description = "The course to delete")),
    responses(
        (status = 204, description = "Course deleted"),
        (status = 403, description = "Administrator access required", body = ErrorBody),
        (status = 404, description = "Course not found", body = ErrorBody),
        (status = 409, description = "Course still has assignments or sessions", body = ErrorBody)
    )
)]
pub async fn delete_course_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Path(course_id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    require_admin(&actor)?;

    state
        .catalog
        .delete_course(course_id)
        .await
        .map_err(|e| port_failure("Failed to delete course", e))?;
    info!(course_id = %course_id, "Course deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// GET /courses/{course_id}/materials - Materials of a course
#[utoipa::path(
    get,
    path = "/courses/{course_id}/materials",
    params(("course_id" = Uuid, Path, description = "The course")),
    responses(
        (status = 200, description = "Materials in upload order", body = [MaterialResponse]),
        (status = 403, description = "Course not assigned", body = ErrorBody),
        (status = 404, description = "Course not found", body = ErrorBody)
    )
)]
pub async fn list_materials_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Vec<MaterialResponse>>, HandlerError> {
    state
        .catalog
        .get_course(course_id)
        .await
        .map_err(|e| port_failure("Failed to load course", e))?;

    match actor.role {
        Role::Admin => {}
        Role::Student => state
            .registry
            .require_assigned(actor.user_id, course_id)
            .await
            .map_err(|e| port_failure("Materials requested for an unassigned course", e))?,
    }

    let materials = state
        .catalog
        .list_materials(course_id)
        .await
        .map_err(|e| port_failure("Failed to list materials", e))?;
    Ok(Json(materials.into_iter().map(MaterialResponse::from).collect()))
}

/// POST /courses/{course_id}/materials - Register a material for a course
#[utoipa::path(
    post,
    path = "/courses/{course_id}/materials",
    params(("course_id" = Uuid, Path, description = "The course")),
    request_body = CreateMaterialRequest,
    responses(
        (status = 201, description = "Material registered", body = MaterialResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 403, description = "Administrator access required", body = ErrorBody),
        (status = 404, description = "Course not found", body = ErrorBody)
    )
)]
pub async fn add_material_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<CreateMaterialRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    require_admin(&actor)?;

    let kind = req
        .material_type
        .parse::<MaterialKind>()
        .map_err(|e| failure(StatusCode::BAD_REQUEST, "INVALID_MATERIAL_TYPE", e))?;
    let title = req.title.trim();
    let location = req.location.trim();
    if title.is_empty() || location.is_empty() {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            "INVALID_MATERIAL",
            "Title and location are required",
        ));
    }

    let material = state
        .catalog
        .add_material(course_id, kind, title, location)
        .await
        .map_err(|e| port_failure("Failed to add material", e))?;
    info!(course_id = %course_id, material_id = %material.id, "Course material added");

    Ok((StatusCode::CREATED, Json(MaterialResponse::from(material))))
}
