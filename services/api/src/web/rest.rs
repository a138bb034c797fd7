//! services/api/src/web/rest.rs
//!
//! The master definition for the OpenAPI specification.

use crate::error::ErrorBody;
use crate::web::{admin, auth, courses, progress, timer};
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
        courses::list_courses_handler,
        courses::create_course_handler,
        courses::delete_course_handler,
        courses::list_materials_handler,
        courses::add_material_handler,
        timer::start_timer_handler,
        timer::stop_timer_handler,
        timer::list_sessions_handler,
        admin::list_students_handler,
        admin::set_role_handler,
        admin::list_assignments_handler,
        admin::create_assignment_handler,
        admin::delete_assignment_handler,
        admin::sweep_handler,
        progress::progress_report_handler,
        progress::my_progress_handler,
    ),
    components(
        schemas(
            ErrorBody,
            auth::SignupRequest,
            auth::LoginRequest,
            auth::UserResponse,
            courses::CreateCourseRequest,
            courses::CourseResponse,
            courses::CreateMaterialRequest,
            courses::MaterialResponse,
            timer::StartTimerResponse,
            timer::StopTimerResponse,
            timer::SessionResponse,
            admin::SetRoleRequest,
            admin::AssignmentRequest,
            admin::AssignmentResponse,
            admin::AssignmentDetailResponse,
            admin::SweepResponse,
            progress::ProgressRowResponse,
            progress::MyProgressResponse,
        )
    ),
    tags(
        (name = "Study Tracker API", description = "Course enrollment, study timers and progress reporting.")
    )
)]
pub struct ApiDoc;
