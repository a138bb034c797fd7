//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the PostgreSQL implementation of
//! the ledger, assignment, directory and catalog ports from the `core` crate.
//!
//! The single-open-session rule and ledger immutability are enforced by the
//! schema itself (a partial unique index and a guard trigger), so every write
//! here is a single conditional statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use study_tracker_core::domain::{
    Assignment, AuthSession, CloseReason, Course, CourseMaterial, LedgerCursor, MaterialKind,
    NewUser, Role, Session, SessionFilter, User, UserCredentials,
};
use study_tracker_core::ports::{
    AssignmentStore, CatalogStore, DirectoryStore, LedgerStore, OpenOutcome, PortError,
    PortResult,
};
use tracing::error;
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

const SESSION_COLUMNS: &str =
    "id, user_id, course_id, started_at, ended_at, duration_seconds, close_reason";
const USER_COLUMNS: &str = "id, first_name, last_name, email, role, created_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements every storage port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn violation_code(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Translates driver errors that no call site handles specifically.
fn db_error(e: sqlx::Error) -> PortError {
    match &e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => PortError::StorageUnavailable(e.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => PortError::Conflict(db.message().to_string()),
            Some(FOREIGN_KEY_VIOLATION) => PortError::Conflict(db.message().to_string()),
            // Class 08 is "connection exception", 57P0x is operator shutdown.
            Some(code) if code.starts_with("08") || code.starts_with("57P0") => {
                PortError::StorageUnavailable(e.to_string())
            }
            _ => {
                error!("Unhandled database error: {:?}", e);
                PortError::Unexpected(e.to_string())
            }
        },
        _ => {
            error!("Unhandled database error: {:?}", e);
            PortError::Unexpected(e.to_string())
        }
    }
}

fn not_found(what: &str, id: impl std::fmt::Display) -> impl FnOnce(sqlx::Error) -> PortError {
    let message = format!("{} {} not found", what, id);
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(message),
        other => db_error(other),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    first_name: String,
    last_name: String,
    email: String,
    role: String,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            role: self.role.parse::<Role>().map_err(PortError::Unexpected)?,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: Uuid,
    email: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.id,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct CourseRecord {
    id: Uuid,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
}
impl CourseRecord {
    fn to_domain(self) -> Course {
        Course {
            id: self.id,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct MaterialRecord {
    id: Uuid,
    course_id: Uuid,
    material_type: String,
    title: String,
    location: String,
    uploaded_at: DateTime<Utc>,
}
impl MaterialRecord {
    fn to_domain(self) -> PortResult<CourseMaterial> {
        Ok(CourseMaterial {
            id: self.id,
            course_id: self.course_id,
            kind: self
                .material_type
                .parse::<MaterialKind>()
                .map_err(PortError::Unexpected)?,
            title: self.title,
            location: self.location,
            uploaded_at: self.uploaded_at,
        })
    }
}

#[derive(FromRow)]
struct AssignmentRecord {
    user_id: Uuid,
    course_id: Uuid,
    assigned_at: DateTime<Utc>,
}
impl AssignmentRecord {
    fn to_domain(self) -> Assignment {
        Assignment {
            user_id: self.user_id,
            course_id: self.course_id,
            assigned_at: self.assigned_at,
        }
    }
}

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    user_id: Uuid,
    course_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
    close_reason: Option<String>,
}
impl SessionRecord {
    fn to_domain(self) -> PortResult<Session> {
        let close_reason = self
            .close_reason
            .map(|r| r.parse::<CloseReason>())
            .transpose()
            .map_err(PortError::Unexpected)?;
        Ok(Session {
            id: self.id,
            user_id: self.user_id,
            course_id: self.course_id,
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_seconds: self.duration_seconds,
            close_reason,
        })
    }
}

fn sessions(records: Vec<SessionRecord>) -> PortResult<Vec<Session>> {
    records.into_iter().map(SessionRecord::to_domain).collect()
}

//=========================================================================================
// `LedgerStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl LedgerStore for DbAdapter {
    async fn now(&self) -> PortResult<DateTime<Utc>> {
        sqlx::query_scalar::<_, DateTime<Utc>>("SELECT NOW()")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn open_session(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> PortResult<OpenOutcome> {
        let sql = format!(
            "INSERT INTO study_sessions (id, user_id, course_id, started_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, course_id) WHERE ended_at IS NULL DO NOTHING \
             RETURNING {SESSION_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(course_id)
            .bind(started_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| match violation_code(&e).as_deref() {
                Some(FOREIGN_KEY_VIOLATION) => {
                    PortError::NotFound(format!("Course {} or user {} not found", course_id, user_id))
                }
                _ => db_error(e),
            })?;

        if let Some(record) = inserted {
            return Ok(OpenOutcome::Created(record.to_domain()?));
        }
        match self.find_open_session(user_id, course_id).await? {
            Some(existing) => Ok(OpenOutcome::Existing(existing)),
            None => Err(PortError::RaceLost),
        }
    }

    async fn find_open_session(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Option<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM study_sessions \
             WHERE user_id = $1 AND course_id = $2 AND ended_at IS NULL"
        );
        sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(user_id)
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(SessionRecord::to_domain)
            .transpose()
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
        duration_seconds: i64,
        reason: CloseReason,
    ) -> PortResult<Option<Session>> {
        let sql = format!(
            "UPDATE study_sessions SET ended_at = $2, duration_seconds = $3, close_reason = $4 \
             WHERE id = $1 AND ended_at IS NULL \
             RETURNING {SESSION_COLUMNS}"
        );
        let closed = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(session_id)
            .bind(ended_at)
            .bind(duration_seconds.max(0))
            .bind(reason.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        if let Some(record) = closed {
            return record.to_domain().map(Some);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM study_sessions WHERE id = $1)")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
        if exists {
            Ok(None)
        } else {
            Err(PortError::NotFound(format!("Session {} not found", session_id)))
        }
    }

    async fn list_stale_open_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> PortResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM study_sessions \
             WHERE ended_at IS NULL AND started_at < $1 \
             ORDER BY started_at ASC, id ASC LIMIT $2"
        );
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(cutoff)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        sessions(records)
    }

    async fn list_closed_sessions(
        &self,
        filter: SessionFilter,
        after: Option<LedgerCursor>,
        limit: u32,
    ) -> PortResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM study_sessions \
             WHERE ended_at IS NOT NULL \
               AND ($1::uuid IS NULL OR user_id = $1) \
               AND ($2::uuid IS NULL OR course_id = $2) \
               AND ($3::uuid IS NULL OR (user_id, course_id, id) > ($3, $4, $5)) \
             ORDER BY user_id, course_id, id LIMIT $6"
        );
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(filter.user_id)
            .bind(filter.course_id)
            .bind(after.map(|c| c.user_id))
            .bind(after.map(|c| c.course_id))
            .bind(after.map(|c| c.session_id))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        sessions(records)
    }

    async fn list_sessions_for_pair(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM study_sessions \
             WHERE user_id = $1 AND course_id = $2 \
             ORDER BY started_at DESC, id DESC"
        );
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(user_id)
            .bind(course_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        sessions(records)
    }
}

//=========================================================================================
// `AssignmentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AssignmentStore for DbAdapter {
    async fn insert_assignment(&self, assignment: Assignment) -> PortResult<Assignment> {
        let Assignment {
            user_id,
            course_id,
            assigned_at,
        } = assignment;

        let inserted = sqlx::query_as::<_, AssignmentRecord>(
            "INSERT INTO assignments (user_id, course_id, assigned_at) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, course_id) DO NOTHING \
             RETURNING user_id, course_id, assigned_at",
        )
        .bind(user_id)
        .bind(course_id)
        .bind(assigned_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match violation_code(&e).as_deref() {
            Some(FOREIGN_KEY_VIOLATION) => {
                PortError::NotFound(format!("Course {} or user {} not found", course_id, user_id))
            }
            _ => db_error(e),
        })?;

        inserted
            .map(AssignmentRecord::to_domain)
            .ok_or(PortError::AlreadyAssigned { user_id, course_id })
    }

    async fn delete_assignment(&self, user_id: Uuid, course_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM assignments WHERE user_id = $1 AND course_id = $2")
            .bind(user_id)
            .bind(course_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotAssigned { user_id, course_id });
        }
        Ok(())
    }

    async fn get_assignment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Option<Assignment>> {
        let record = sqlx::query_as::<_, AssignmentRecord>(
            "SELECT user_id, course_id, assigned_at FROM assignments \
             WHERE user_id = $1 AND course_id = $2",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.map(AssignmentRecord::to_domain))
    }

    async fn list_assignments(&self) -> PortResult<Vec<Assignment>> {
        let records = sqlx::query_as::<_, AssignmentRecord>(
            "SELECT user_id, course_id, assigned_at FROM assignments \
             ORDER BY assigned_at ASC, user_id, course_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(records.into_iter().map(AssignmentRecord::to_domain).collect())
    }

    async fn list_assignments_for_user(&self, user_id: Uuid) -> PortResult<Vec<Assignment>> {
        let records = sqlx::query_as::<_, AssignmentRecord>(
            "SELECT user_id, course_id, assigned_at FROM assignments \
             WHERE user_id = $1 ORDER BY assigned_at ASC, course_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(records.into_iter().map(AssignmentRecord::to_domain).collect())
    }
}

//=========================================================================================
// `DirectoryStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DirectoryStore for DbAdapter {
    async fn create_user(&self, user: NewUser) -> PortResult<User> {
        let sql = format!(
            "INSERT INTO users (id, first_name, last_name, email, hashed_password, role) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(&user.hashed_password)
            .bind(user.role.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match violation_code(&e).as_deref() {
                Some(UNIQUE_VIOLATION) => PortError::Conflict("Email already registered".to_string()),
                _ => db_error(e),
            })?;
        record.to_domain()
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found("User", user_id))?
            .to_domain()
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, email, hashed_password FROM users WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found("User with email", email))?;
        Ok(record.to_domain())
    }

    async fn list_users(&self, role: Option<Role>) -> PortResult<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE ($1::text IS NULL OR role = $1) \
             ORDER BY last_name, first_name, id"
        );
        let records = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(role.map(|r| r.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        records.into_iter().map(UserRecord::to_domain).collect()
    }

    async fn set_user_role(&self, user_id: Uuid, role: Role) -> PortResult<User> {
        let sql = format!("UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user_id)
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(not_found("User", user_id))?
            .to_domain()
    }

    async fn create_auth_session(&self, session: AuthSession) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&session.id)
            .bind(session.user_id)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn validate_auth_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT u.id, u.first_name, u.last_name, u.email, u.role, u.created_at \
             FROM auth_sessions s JOIN users u ON u.id = s.user_id \
             WHERE s.id = $1 AND s.expires_at > $2",
        )
        .bind(session_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        record.ok_or(PortError::Unauthorized)?.to_domain()
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

//=========================================================================================
// `CatalogStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CatalogStore for DbAdapter {
    async fn create_course(&self, name: &str, description: Option<&str>) -> PortResult<Course> {
        let record = sqlx::query_as::<_, CourseRecord>(
            "INSERT INTO courses (id, name, description) VALUES ($1, $2, $3) \
             RETURNING id, name, description, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match violation_code(&e).as_deref() {
            Some(UNIQUE_VIOLATION) => PortError::Conflict(format!("Course '{}' already exists", name)),
            _ => db_error(e),
        })?;
        Ok(record.to_domain())
    }

    async fn get_course(&self, course_id: Uuid) -> PortResult<Course> {
        let record = sqlx::query_as::<_, CourseRecord>(
            "SELECT id, name, description, created_at FROM courses WHERE id = $1",
        )
        .bind(course_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found("Course", course_id))?;
        Ok(record.to_domain())
    }

    async fn list_courses(&self) -> PortResult<Vec<Course>> {
        let records = sqlx::query_as::<_, CourseRecord>(
            "SELECT id, name, description, created_at FROM courses ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(records.into_iter().map(CourseRecord::to_domain).collect())
    }

    async fn list_courses_for_user(&self, user_id: Uuid) -> PortResult<Vec<Course>> {
        let records = sqlx::query_as::<_, CourseRecord>(
            "SELECT c.id, c.name, c.description, c.created_at \
             FROM courses c JOIN assignments a ON a.course_id = c.id \
             WHERE a.user_id = $1 ORDER BY c.name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(records.into_iter().map(CourseRecord::to_domain).collect())
    }

    async fn delete_course(&self, course_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(course_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match violation_code(&e).as_deref() {
                Some(FOREIGN_KEY_VIOLATION) => PortError::Conflict(format!(
                    "Course {} still has assignments or recorded sessions",
                    course_id
                )),
                _ => db_error(e),
            })?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Course {} not found", course_id)));
        }
        Ok(())
    }

    async fn add_material(
        &self,
        course_id: Uuid,
        kind: MaterialKind,
        title: &str,
        location: &str,
    ) -> PortResult<CourseMaterial> {
        let record = sqlx::query_as::<_, MaterialRecord>(
            "INSERT INTO course_materials (id, course_id, material_type, title, location) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, course_id, material_type, title, location, uploaded_at",
        )
        .bind(Uuid::new_v4())
        .bind(course_id)
        .bind(kind.as_str())
        .bind(title)
        .bind(location)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match violation_code(&e).as_deref() {
            Some(FOREIGN_KEY_VIOLATION) => {
                PortError::NotFound(format!("Course {} not found", course_id))
            }
            _ => db_error(e),
        })?;
        record.to_domain()
    }

    async fn list_materials(&self, course_id: Uuid) -> PortResult<Vec<CourseMaterial>> {
        let records = sqlx::query_as::<_, MaterialRecord>(
            "SELECT id, course_id, material_type, title, location, uploaded_at \
             FROM course_materials WHERE course_id = $1 ORDER BY uploaded_at ASC, id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        records.into_iter().map(MaterialRecord::to_domain).collect()
    }
}
