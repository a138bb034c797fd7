//! crates/study_tracker_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete store behind them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Assignment, AuthSession, CloseReason, Course, CourseMaterial, LedgerCursor, MaterialKind,
    NewUser, Role, Session, SessionFilter, User, UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Course {course_id} is not assigned to user {user_id}")]
    NotAssigned { user_id: Uuid, course_id: Uuid },
    #[error("Course {course_id} is already assigned to user {user_id}")]
    AlreadyAssigned { user_id: Uuid, course_id: Uuid },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("A concurrent request for the same user and course won the race")]
    RaceLost,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::StorageUnavailable(_) | PortError::RaceLost)
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Ledger Port
//=========================================================================================

/// Result of the atomic "open a session unless one is already open" write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Created(Session),
    Existing(Session),
}

impl OpenOutcome {
    pub fn into_session(self) -> Session {
        match self {
            OpenOutcome::Created(s) | OpenOutcome::Existing(s) => s,
        }
    }
}

/// The durable session ledger. Every write is serialized per (user, course)
/// by the store itself.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// The store's wall clock. All session timestamps come from here.
    async fn now(&self) -> PortResult<DateTime<Utc>>;

    /// Inserts an open session for the pair unless one is already open.
    ///
    /// Returns `RaceLost` when the insert was refused but the conflicting open
    /// session is no longer visible (it was closed concurrently).
    async fn open_session(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> PortResult<OpenOutcome>;

    async fn find_open_session(&self, user_id: Uuid, course_id: Uuid)
        -> PortResult<Option<Session>>;

    /// Closes the session if, and only if, it is still open.
    /// Returns `None` when the session was already closed.
    async fn close_session(
        &self,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
        duration_seconds: i64,
        reason: CloseReason,
    ) -> PortResult<Option<Session>>;

    /// Open sessions with `started_at` strictly before `cutoff`, oldest first.
    async fn list_stale_open_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> PortResult<Vec<Session>>;

    /// Closed sessions ordered by `(user_id, course_id, id)`, strictly after `after`.
    async fn list_closed_sessions(
        &self,
        filter: SessionFilter,
        after: Option<LedgerCursor>,
        limit: u32,
    ) -> PortResult<Vec<Session>>;

    /// All sessions for one pair, newest first.
    async fn list_sessions_for_pair(&self, user_id: Uuid, course_id: Uuid)
        -> PortResult<Vec<Session>>;
}

//=========================================================================================
// Enrollment, Directory and Catalog Ports
//=========================================================================================

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Fails with `AlreadyAssigned` if the pair exists.
    async fn insert_assignment(&self, assignment: Assignment) -> PortResult<Assignment>;

    /// Fails with `NotAssigned` if the pair does not exist.
    async fn delete_assignment(&self, user_id: Uuid, course_id: Uuid) -> PortResult<()>;

    async fn get_assignment(&self, user_id: Uuid, course_id: Uuid)
        -> PortResult<Option<Assignment>>;

    async fn list_assignments(&self) -> PortResult<Vec<Assignment>>;

    async fn list_assignments_for_user(&self, user_id: Uuid) -> PortResult<Vec<Assignment>>;
}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    // --- User Management ---
    async fn create_user(&self, user: NewUser) -> PortResult<User>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn list_users(&self, role: Option<Role>) -> PortResult<Vec<User>>;

    async fn set_user_role(&self, user_id: Uuid, role: Role) -> PortResult<User>;

    // --- Auth Methods ---
    async fn create_auth_session(&self, session: AuthSession) -> PortResult<()>;

    /// Returns the owning user of a live auth session.
    async fn validate_auth_session(&self, session_id: &str, now: DateTime<Utc>)
        -> PortResult<User>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_course(&self, name: &str, description: Option<&str>) -> PortResult<Course>;

    async fn get_course(&self, course_id: Uuid) -> PortResult<Course>;

    async fn list_courses(&self) -> PortResult<Vec<Course>>;

    async fn list_courses_for_user(&self, user_id: Uuid) -> PortResult<Vec<Course>>;

    /// Refused with `Conflict` while assignments or ledger rows reference the course.
    async fn delete_course(&self, course_id: Uuid) -> PortResult<()>;

    async fn add_material(
        &self,
        course_id: Uuid,
        kind: MaterialKind,
        title: &str,
        location: &str,
    ) -> PortResult<CourseMaterial>;

    async fn list_materials(&self, course_id: Uuid) -> PortResult<Vec<CourseMaterial>>;
}
