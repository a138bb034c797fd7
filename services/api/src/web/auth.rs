//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, and logout.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use study_tracker_core::{AuthContext, AuthSession, NewUser, PortError, Role, User};
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::BootstrapAdmin;
use crate::error::{failure, port_failure, ApiError, ErrorBody, HandlerError};
use crate::web::middleware::session_id_from_headers;
use crate::web::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// `student` or `admin`.
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            role: user.role.as_str().to_string(),
            created_at: user.created_at,
        }
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Hashes a password with Argon2 and a random salt.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

fn invalid_credentials() -> HandlerError {
    failure(
        StatusCode::UNAUTHORIZED,
        "INVALID_CREDENTIALS",
        "Invalid email or password",
    )
}

/// Creates an auth session for `user_id` and returns the `Set-Cookie` value.
async fn open_auth_session(state: &AppState, user_id: Uuid) -> Result<String, HandlerError> {
    let now = state
        .ledger
        .now()
        .await
        .map_err(|e| port_failure("Failed to read the store clock", e))?;
    let ttl = state.config.auth_session_ttl;
    let auth_session = AuthSession {
        id: Uuid::new_v4().to_string(),
        user_id,
        expires_at: now + ttl,
    };
    let cookie = format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        auth_session.id,
        ttl.num_seconds()
    );

    state
        .directory
        .create_auth_session(auth_session)
        .await
        .map_err(|e| port_failure("Failed to create auth session", e))?;
    Ok(cookie)
}

/// Creates the configured administrator, or promotes the existing account.
pub async fn ensure_admin(state: &AppState, admin: &BootstrapAdmin) -> Result<(), ApiError> {
    match state.directory.get_user_by_email(&admin.email).await {
        Ok(existing) => {
            let user = state.directory.get_user(existing.user_id).await?;
            if user.role != Role::Admin {
                state.directory.set_user_role(user.id, Role::Admin).await?;
                info!(user_id = %user.id, "Promoted bootstrap administrator");
            }
            Ok(())
        }
        Err(PortError::NotFound(_)) => {
            let hashed_password = hash_password(&admin.password)
                .map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))?;
            let user = state
                .directory
                .create_user(NewUser {
                    first_name: admin.first_name.clone(),
                    last_name: admin.last_name.clone(),
                    email: admin.email.clone(),
                    hashed_password,
                    role: Role::Admin,
                })
                .await?;
            info!(user_id = %user.id, "Created bootstrap administrator");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new student account
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created successfully", body = UserResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let email = req.email.trim();
    if !email.contains('@') {
        return Err(failure(StatusCode::BAD_REQUEST, "INVALID_EMAIL", "A valid email is required"));
    }
    if req.first_name.trim().is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "INVALID_NAME", "First name is required"));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            "WEAK_PASSWORD",
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }

    let hashed_password = hash_password(&req.password).map_err(|e| {
        error!("Failed to hash password: {:?}", e);
        failure(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Failed to hash password")
    })?;

    let user = state
        .directory
        .create_user(NewUser {
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            email: email.to_string(),
            hashed_password,
            role: Role::Student,
        })
        .await
        .map_err(|e| port_failure("Failed to create user", e))?;
    info!(user_id = %user.id, "Student registered");

    let cookie = open_auth_session(&state, user.id).await?;
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(UserResponse::from(user)),
    ))
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = UserResponse),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let user_creds = state
        .directory
        .get_user_by_email(req.email.trim())
        .await
        .map_err(|e| match e {
            PortError::NotFound(_) => invalid_credentials(),
            other => port_failure("Failed to look up user", other),
        })?;

    let parsed_hash = PasswordHash::new(&user_creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        failure(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Authentication error")
    })?;
    if Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(invalid_credentials());
    }

    let user = state
        .directory
        .get_user(user_creds.user_id)
        .await
        .map_err(|e| port_failure("Failed to load user", e))?;

    let cookie = open_auth_session(&state, user.id).await?;
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(UserResponse::from(user)),
    ))
}

/// POST /auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session", body = ErrorBody)
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let auth_session_id = session_id_from_headers(&headers)
        .ok_or_else(|| failure(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "No session found"))?;

    state
        .directory
        .delete_auth_session(auth_session_id)
        .await
        .map_err(|e| port_failure("Failed to delete auth session", e))?;

    let cookie = "session=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0";
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie.to_string())]))
}

/// GET /me - The signed-in user
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "The current user", body = UserResponse),
        (status = 401, description = "Not signed in", body = ErrorBody)
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AuthContext>,
) -> Result<Json<UserResponse>, HandlerError> {
    let user = state
        .directory
        .get_user(actor.user_id)
        .await
        .map_err(|e| port_failure("Failed to load user", e))?;
    Ok(Json(user.into()))
}
