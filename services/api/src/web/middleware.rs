//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use study_tracker_core::{AuthContext, PortError, Role};
use tracing::warn;

use crate::error::{failure, port_failure, HandlerError};
use crate::web::state::AppState;

/// Reads the auth session id from the `session` cookie.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|id| !id.is_empty())
}

/// Middleware that validates the auth session cookie.
///
/// If valid, inserts the caller's `AuthContext` into request extensions.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, HandlerError> {
    let auth_session_id = session_id_from_headers(req.headers())
        .ok_or_else(|| failure(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Not signed in"))?
        .to_string();

    let now = state
        .ledger
        .now()
        .await
        .map_err(|e| port_failure("Failed to read the store clock", e))?;

    let user = state
        .directory
        .validate_auth_session(&auth_session_id, now)
        .await
        .map_err(|e| match e {
            PortError::Unauthorized | PortError::NotFound(_) => {
                warn!("Rejected an unknown or expired auth session");
                failure(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Session expired or invalid")
            }
            other => port_failure("Failed to validate auth session", other),
        })?;

    req.extensions_mut().insert(AuthContext {
        user_id: user.id,
        role: user.role,
    });

    Ok(next.run(req).await)
}

/// Refuses the request unless the caller is an administrator.
pub fn require_admin(actor: &AuthContext) -> Result<(), HandlerError> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Student => Err(failure(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "Administrator access required",
        )),
    }
}
