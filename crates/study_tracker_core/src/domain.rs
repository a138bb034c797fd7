//! crates/study_tracker_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Identity
//=========================================================================================

/// The closed set of roles a user can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// A registered user. Only the role may change after registration.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Fields required to register a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub hashed_password: String,
    pub role: Role,
}

// Only used internally for login - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// The verified caller of an operation, threaded explicitly from the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
}

//=========================================================================================
// Catalog and Enrollment
//=========================================================================================

#[derive(Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Document,
    Audio,
}

impl MaterialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialKind::Document => "document",
            MaterialKind::Audio => "audio",
        }
    }
}

impl FromStr for MaterialKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" => Ok(MaterialKind::Document),
            "audio" => Ok(MaterialKind::Audio),
            other => Err(format!("unknown material type '{}'", other)),
        }
    }
}

/// Metadata for a piece of course material. The bytes live in external storage.
#[derive(Debug, Clone)]
pub struct CourseMaterial {
    pub id: Uuid,
    pub course_id: Uuid,
    pub kind: MaterialKind,
    pub title: String,
    pub location: String,
    pub uploaded_at: DateTime<Utc>,
}

/// An administrator-granted enrollment link between a user and a course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

//=========================================================================================
// Study Session Ledger
//=========================================================================================

/// How a session left the open state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Closed by an explicit stop request.
    Stopped,
    /// Force-closed by the stale-session sweep with a capped duration.
    Recovered,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Stopped => "stopped",
            CloseReason::Recovered => "recovered",
        }
    }
}

impl FromStr for CloseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(CloseReason::Stopped),
            "recovered" => Ok(CloseReason::Recovered),
            other => Err(format!("unknown close reason '{}'", other)),
        }
    }
}

/// One contiguous interval of study activity for a (user, course) pair.
///
/// `ended_at`, `duration_seconds` and `close_reason` are either all `None`
/// (open) or all `Some` (closed). A closed session is never modified again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub close_reason: Option<CloseReason>,
}

impl Session {
    /// A fresh open session.
    pub fn open(user_id: Uuid, course_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            started_at,
            ended_at: None,
            duration_seconds: None,
            close_reason: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn is_recovered(&self) -> bool {
        self.close_reason == Some(CloseReason::Recovered)
    }

    pub fn pair(&self) -> (Uuid, Uuid) {
        (self.user_id, self.course_id)
    }

    /// Seconds between `started_at` and `ended_at`, never negative.
    pub fn duration_between(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> i64 {
        (ended_at - started_at).num_seconds().max(0)
    }
}

/// Position of the last row returned by a paginated ledger scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LedgerCursor {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub session_id: Uuid,
}

impl From<&Session> for LedgerCursor {
    fn from(session: &Session) -> Self {
        Self {
            user_id: session.user_id,
            course_id: session.course_id,
            session_id: session.id,
        }
    }
}

/// Restricts a ledger scan or summary to one user and/or one course.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub user_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
}

impl SessionFilter {
    pub fn matches(&self, session: &Session) -> bool {
        self.user_id.map_or(true, |u| u == session.user_id)
            && self.course_id.map_or(true, |c| c == session.course_id)
    }
}

/// Derived totals for one (user, course) pair. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSummary {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub total_seconds: i64,
    pub session_count: i64,
    pub recovered_seconds: i64,
    pub recovered_count: i64,
}

/// A summary joined with directory and catalog data for administrative reporting.
#[derive(Debug, Clone)]
pub struct ProgressReportRow {
    pub student_id: Uuid,
    pub student_name: String,
    pub email: String,
    pub course_id: Uuid,
    pub course_name: String,
    pub total_seconds: i64,
    pub session_count: i64,
    pub recovered_seconds: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" student ".parse::<Role>(), Ok(Role::Student));
        assert!("instructor".parse::<Role>().is_err());
    }

    #[test]
    fn duration_is_never_negative() {
        let t0 = Utc::now();
        assert_eq!(Session::duration_between(t0, t0 + Duration::seconds(90)), 90);
        assert_eq!(Session::duration_between(t0, t0 - Duration::seconds(5)), 0);
    }

    #[test]
    fn filter_matches_on_given_fields_only() {
        let session = Session::open(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        assert!(SessionFilter::default().matches(&session));
        assert!(SessionFilter {
            user_id: Some(session.user_id),
            course_id: None
        }
        .matches(&session));
        assert!(!SessionFilter {
            user_id: None,
            course_id: Some(Uuid::new_v4())
        }
        .matches(&session));
    }
}
