pub mod admin;
pub mod auth;
pub mod courses;
pub mod middleware;
pub mod progress;
pub mod rest;
pub mod state;
pub mod timer;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

pub use middleware::require_auth;
pub use state::AppState;

/// Builds every API route. CORS, tracing and the Swagger UI are layered on by the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Protected routes (auth required). Admin-only handlers check the role themselves.
    let protected_routes = Router::new()
        .route("/me", get(auth::me_handler))
        .route("/me/progress", get(progress::my_progress_handler))
        .route(
            "/courses",
            get(courses::list_courses_handler).post(courses::create_course_handler),
        )
        .route("/courses/{course_id}", delete(courses::delete_course_handler))
        .route(
            "/courses/{course_id}/materials",
            get(courses::list_materials_handler).post(courses::add_material_handler),
        )
        .route("/courses/{course_id}/timer/start", post(timer::start_timer_handler))
        .route("/courses/{course_id}/timer/stop", post(timer::stop_timer_handler))
        .route("/courses/{course_id}/sessions", get(timer::list_sessions_handler))
        .route("/students", get(admin::list_students_handler))
        .route("/users/{user_id}/role", put(admin::set_role_handler))
        .route(
            "/assignments",
            get(admin::list_assignments_handler)
                .post(admin::create_assignment_handler)
                .delete(admin::delete_assignment_handler),
        )
        .route("/progress", get(progress::progress_report_handler))
        .route("/admin/sweep", post(admin::sweep_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(app_state)
}
