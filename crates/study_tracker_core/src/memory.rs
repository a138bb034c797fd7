//! crates/study_tracker_core/src/memory.rs
//!
//! A process-local implementation of every port, backed by a single mutex.
//! Holding one lock for each operation gives the same per-pair serialization
//! the database adapter gets from its partial unique index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::domain::{
    Assignment, AuthSession, CloseReason, Course, CourseMaterial, LedgerCursor, MaterialKind,
    NewUser, Role, Session, SessionFilter, User, UserCredentials,
};
use crate::ports::{
    AssignmentStore, CatalogStore, DirectoryStore, LedgerStore, OpenOutcome, PortError,
    PortResult,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, StoredUser>,
    auth_sessions: HashMap<String, AuthSession>,
    courses: HashMap<Uuid, Course>,
    materials: Vec<CourseMaterial>,
    assignments: BTreeMap<(Uuid, Uuid), Assignment>,
    sessions: Vec<Session>,
}

struct StoredUser {
    user: User,
    hashed_password: String,
}

pub struct InMemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a store whose `now()` reads from the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn lock(&self) -> PortResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| PortError::StorageUnavailable("in-memory store lock poisoned".to_string()))
    }
}

//=========================================================================================
// `LedgerStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn now(&self) -> PortResult<DateTime<Utc>> {
        Ok(self.clock.now())
    }

    async fn open_session(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> PortResult<OpenOutcome> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .sessions
            .iter()
            .find(|s| s.is_open() && s.pair() == (user_id, course_id))
        {
            return Ok(OpenOutcome::Existing(existing.clone()));
        }
        let session = Session::open(user_id, course_id, started_at);
        state.sessions.push(session.clone());
        debug!(session_id = %session.id, "Opened in-memory session");
        Ok(OpenOutcome::Created(session))
    }

    async fn find_open_session(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Option<Session>> {
        let state = self.lock()?;
        Ok(state
            .sessions
            .iter()
            .find(|s| s.is_open() && s.pair() == (user_id, course_id))
            .cloned())
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
        duration_seconds: i64,
        reason: CloseReason,
    ) -> PortResult<Option<Session>> {
        let mut state = self.lock()?;
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        if !session.is_open() {
            return Ok(None);
        }
        session.ended_at = Some(ended_at);
        session.duration_seconds = Some(duration_seconds);
        session.close_reason = Some(reason);
        Ok(Some(session.clone()))
    }

    async fn list_stale_open_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> PortResult<Vec<Session>> {
        let state = self.lock()?;
        let mut stale: Vec<Session> = state
            .sessions
            .iter()
            .filter(|s| s.is_open() && s.started_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|s| s.started_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn list_closed_sessions(
        &self,
        filter: SessionFilter,
        after: Option<LedgerCursor>,
        limit: u32,
    ) -> PortResult<Vec<Session>> {
        let state = self.lock()?;
        let mut closed: Vec<Session> = state
            .sessions
            .iter()
            .filter(|s| !s.is_open() && filter.matches(s))
            .filter(|s| after.map_or(true, |cursor| LedgerCursor::from(*s) > cursor))
            .cloned()
            .collect();
        closed.sort_by_key(|s| LedgerCursor::from(s));
        closed.truncate(limit as usize);
        Ok(closed)
    }

    async fn list_sessions_for_pair(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Vec<Session>> {
        let state = self.lock()?;
        let mut sessions: Vec<Session> = state
            .sessions
            .iter()
            .filter(|s| s.pair() == (user_id, course_id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }
}

//=========================================================================================
// `AssignmentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AssignmentStore for InMemoryStore {
    async fn insert_assignment(&self, assignment: Assignment) -> PortResult<Assignment> {
        let mut state = self.lock()?;
        let key = (assignment.user_id, assignment.course_id);
        if state.assignments.contains_key(&key) {
            return Err(PortError::AlreadyAssigned {
                user_id: assignment.user_id,
                course_id: assignment.course_id,
            });
        }
        if !state.users.contains_key(&assignment.user_id) {
            return Err(PortError::NotFound(format!("User {} not found", assignment.user_id)));
        }
        if !state.courses.contains_key(&assignment.course_id) {
            return Err(PortError::NotFound(format!(
                "Course {} not found",
                assignment.course_id
            )));
        }
        state.assignments.insert(key, assignment.clone());
        Ok(assignment)
    }

    async fn delete_assignment(&self, user_id: Uuid, course_id: Uuid) -> PortResult<()> {
        let mut state = self.lock()?;
        state
            .assignments
            .remove(&(user_id, course_id))
            .map(|_| ())
            .ok_or(PortError::NotAssigned { user_id, course_id })
    }

    async fn get_assignment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Option<Assignment>> {
        let state = self.lock()?;
        Ok(state.assignments.get(&(user_id, course_id)).cloned())
    }

    async fn list_assignments(&self) -> PortResult<Vec<Assignment>> {
        let state = self.lock()?;
        Ok(state.assignments.values().cloned().collect())
    }

    async fn list_assignments_for_user(&self, user_id: Uuid) -> PortResult<Vec<Assignment>> {
        let state = self.lock()?;
        Ok(state
            .assignments
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }
}

//=========================================================================================
// `DirectoryStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DirectoryStore for InMemoryStore {
    async fn create_user(&self, new_user: NewUser) -> PortResult<User> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        if state
            .users
            .values()
            .any(|u| u.user.email.eq_ignore_ascii_case(&new_user.email))
        {
            return Err(PortError::Conflict(format!(
                "Email {} already registered",
                new_user.email
            )));
        }
        let user = User {
            id: Uuid::new_v4(),
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            email: new_user.email,
            role: new_user.role,
            created_at: now,
        };
        state.users.insert(
            user.id,
            StoredUser {
                user: user.clone(),
                hashed_password: new_user.hashed_password,
            },
        );
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let state = self.lock()?;
        state
            .users
            .get(&user_id)
            .map(|u| u.user.clone())
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let state = self.lock()?;
        state
            .users
            .values()
            .find(|u| u.user.email.eq_ignore_ascii_case(email))
            .map(|u| UserCredentials {
                user_id: u.user.id,
                email: u.user.email.clone(),
                hashed_password: u.hashed_password.clone(),
            })
            .ok_or_else(|| PortError::NotFound(format!("User with email {} not found", email)))
    }

    async fn list_users(&self, role: Option<Role>) -> PortResult<Vec<User>> {
        let state = self.lock()?;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| role.map_or(true, |r| u.user.role == r))
            .map(|u| u.user.clone())
            .collect();
        users.sort_by(|a, b| {
            (&a.last_name, &a.first_name, a.id).cmp(&(&b.last_name, &b.first_name, b.id))
        });
        Ok(users)
    }

    async fn set_user_role(&self, user_id: Uuid, role: Role) -> PortResult<User> {
        let mut state = self.lock()?;
        let stored = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        stored.user.role = role;
        Ok(stored.user.clone())
    }

    async fn create_auth_session(&self, session: AuthSession) -> PortResult<()> {
        let mut state = self.lock()?;
        state.auth_sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str, now: DateTime<Utc>) -> PortResult<User> {
        let state = self.lock()?;
        let session = state
            .auth_sessions
            .get(session_id)
            .filter(|s| s.expires_at > now)
            .ok_or(PortError::Unauthorized)?;
        state
            .users
            .get(&session.user_id)
            .map(|u| u.user.clone())
            .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        let mut state = self.lock()?;
        state.auth_sessions.remove(session_id);
        Ok(())
    }
}

//=========================================================================================
// `CatalogStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn create_course(&self, name: &str, description: Option<&str>) -> PortResult<Course> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        if state.courses.values().any(|c| c.name == name) {
            return Err(PortError::Conflict(format!("Course '{}' already exists", name)));
        }
        let course = Course {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
        };
        state.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn get_course(&self, course_id: Uuid) -> PortResult<Course> {
        let state = self.lock()?;
        state
            .courses
            .get(&course_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))
    }

    async fn list_courses(&self) -> PortResult<Vec<Course>> {
        let state = self.lock()?;
        let mut courses: Vec<Course> = state.courses.values().cloned().collect();
        courses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(courses)
    }

    async fn list_courses_for_user(&self, user_id: Uuid) -> PortResult<Vec<Course>> {
        let state = self.lock()?;
        let mut courses: Vec<Course> = state
            .assignments
            .values()
            .filter(|a| a.user_id == user_id)
            .filter_map(|a| state.courses.get(&a.course_id).cloned())
            .collect();
        courses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(courses)
    }

    async fn delete_course(&self, course_id: Uuid) -> PortResult<()> {
        let mut state = self.lock()?;
        if !state.courses.contains_key(&course_id) {
            return Err(PortError::NotFound(format!("Course {} not found", course_id)));
        }
        if state.assignments.values().any(|a| a.course_id == course_id) {
            return Err(PortError::Conflict(format!(
                "Course {} still has assignments",
                course_id
            )));
        }
        if state.sessions.iter().any(|s| s.course_id == course_id) {
            return Err(PortError::Conflict(format!(
                "Course {} has recorded study sessions",
                course_id
            )));
        }
        state.courses.remove(&course_id);
        state.materials.retain(|m| m.course_id != course_id);
        Ok(())
    }

    async fn add_material(
        &self,
        course_id: Uuid,
        kind: MaterialKind,
        title: &str,
        location: &str,
    ) -> PortResult<CourseMaterial> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        if !state.courses.contains_key(&course_id) {
            return Err(PortError::NotFound(format!("Course {} not found", course_id)));
        }
        let material = CourseMaterial {
            id: Uuid::new_v4(),
            course_id,
            kind,
            title: title.to_string(),
            location: location.to_string(),
            uploaded_at: now,
        };
        state.materials.push(material.clone());
        Ok(material)
    }

    async fn list_materials(&self, course_id: Uuid) -> PortResult<Vec<CourseMaterial>> {
        let state = self.lock()?;
        Ok(state
            .materials
            .iter()
            .filter(|m| m.course_id == course_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seeded() -> (InMemoryStore, Uuid, Uuid) {
        let store = InMemoryStore::new();
        let user = store
            .create_user(NewUser {
                first_name: "Asha".into(),
                last_name: "Rao".into(),
                email: "asha@example.com".into(),
                hashed_password: "x".into(),
                role: Role::Student,
            })
            .await
            .unwrap();
        let course = store.create_course("Kirtanam", None).await.unwrap();
        (store, user.id, course.id)
    }

    #[tokio::test]
    async fn open_session_returns_existing_for_same_pair() {
        let (store, user, course) = seeded().await;
        let now = Utc::now();
        let first = store.open_session(user, course, now).await.unwrap();
        let second = store
            .open_session(user, course, now + Duration::seconds(5))
            .await
            .unwrap();
        assert!(matches!(first, OpenOutcome::Created(_)));
        assert_eq!(second, OpenOutcome::Existing(first.into_session()));
    }

    #[tokio::test]
    async fn close_session_is_conditional() {
        let (store, user, course) = seeded().await;
        let now = Utc::now();
        let session = store.open_session(user, course, now).await.unwrap().into_session();
        let closed = store
            .close_session(session.id, now, 0, CloseReason::Stopped)
            .await
            .unwrap();
        assert!(closed.is_some());
        let again = store
            .close_session(session.id, now + Duration::hours(1), 3600, CloseReason::Recovered)
            .await
            .unwrap();
        assert!(again.is_none());
        let history = store.list_sessions_for_pair(user, course).await.unwrap();
        assert_eq!(history[0].duration_seconds, Some(0));
        assert_eq!(history[0].close_reason, Some(CloseReason::Stopped));
    }

    #[tokio::test]
    async fn course_with_assignments_cannot_be_deleted() {
        let (store, user, course) = seeded().await;
        store
            .insert_assignment(Assignment {
                user_id: user,
                course_id: course,
                assigned_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(matches!(
            store.delete_course(course).await,
            Err(PortError::Conflict(_))
        ));
        store.delete_assignment(user, course).await.unwrap();
        store.delete_course(course).await.unwrap();
        assert!(matches!(
            store.get_course(course).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn expired_auth_session_is_rejected() {
        let (store, user, _) = seeded().await;
        let now = Utc::now();
        store
            .create_auth_session(AuthSession {
                id: "abc".into(),
                user_id: user,
                expires_at: now + Duration::minutes(1),
            })
            .await
            .unwrap();
        assert_eq!(store.validate_auth_session("abc", now).await.unwrap().id, user);
        assert_eq!(
            store
                .validate_auth_session("abc", now + Duration::minutes(2))
                .await
                .unwrap_err(),
            PortError::Unauthorized
        );
    }
}
