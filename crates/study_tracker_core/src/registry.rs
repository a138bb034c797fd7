//! crates/study_tracker_core/src/registry.rs
//!
//! Which courses a student may start sessions against.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::Assignment;
use crate::ports::{AssignmentStore, CatalogStore, DirectoryStore, PortError, PortResult};

pub struct AssignmentRegistry {
    assignments: Arc<dyn AssignmentStore>,
    directory: Arc<dyn DirectoryStore>,
    catalog: Arc<dyn CatalogStore>,
}

impl AssignmentRegistry {
    pub fn new(
        assignments: Arc<dyn AssignmentStore>,
        directory: Arc<dyn DirectoryStore>,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            assignments,
            directory,
            catalog,
        }
    }

    /// Grants `user_id` access to `course_id`. Fails with `AlreadyAssigned` if the pair exists.
    pub async fn assign(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<Assignment> {
        self.directory.get_user(user_id).await?;
        self.catalog.get_course(course_id).await?;

        let assignment = self
            .assignments
            .insert_assignment(Assignment {
                user_id,
                course_id,
                assigned_at: now,
            })
            .await?;
        info!(user_id = %user_id, course_id = %course_id, "Course assigned");
        Ok(assignment)
    }

    /// Revokes access. Session history for the pair is left untouched.
    pub async fn unassign(&self, user_id: Uuid, course_id: Uuid) -> PortResult<()> {
        self.assignments.delete_assignment(user_id, course_id).await?;
        info!(user_id = %user_id, course_id = %course_id, "Course unassigned");
        Ok(())
    }

    pub async fn is_assigned(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool> {
        Ok(self
            .assignments
            .get_assignment(user_id, course_id)
            .await?
            .is_some())
    }

    pub async fn require_assigned(&self, user_id: Uuid, course_id: Uuid) -> PortResult<()> {
        if self.is_assigned(user_id, course_id).await? {
            Ok(())
        } else {
            Err(PortError::NotAssigned { user_id, course_id })
        }
    }

    pub async fn list(&self) -> PortResult<Vec<Assignment>> {
        self.assignments.list_assignments().await
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> PortResult<Vec<Assignment>> {
        self.assignments.list_assignments_for_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewUser, Role};
    use crate::memory::InMemoryStore;

    async fn setup() -> (AssignmentRegistry, Uuid, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let user = store
            .create_user(NewUser {
                first_name: "Ravi".into(),
                last_name: "K".into(),
                email: "ravi@example.com".into(),
                hashed_password: "x".into(),
                role: Role::Student,
            })
            .await
            .unwrap();
        let course = store.create_course("Pada Sevanam", Some("Daily practice")).await.unwrap();
        let registry = AssignmentRegistry::new(store.clone(), store.clone(), store);
        (registry, user.id, course.id)
    }

    #[tokio::test]
    async fn assign_twice_fails() {
        let (registry, user, course) = setup().await;
        registry.assign(user, course, Utc::now()).await.unwrap();
        let err = registry.assign(user, course, Utc::now()).await.unwrap_err();
        assert_eq!(
            err,
            PortError::AlreadyAssigned {
                user_id: user,
                course_id: course
            }
        );
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unassign_missing_pair_fails() {
        let (registry, user, course) = setup().await;
        let err = registry.unassign(user, course).await.unwrap_err();
        assert_eq!(
            err,
            PortError::NotAssigned {
                user_id: user,
                course_id: course
            }
        );
    }

    #[tokio::test]
    async fn assign_unknown_course_is_not_found() {
        let (registry, user, _) = setup().await;
        let err = registry.assign(user, Uuid::new_v4(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn require_assigned_tracks_registry_state() {
        let (registry, user, course) = setup().await;
        assert!(registry.require_assigned(user, course).await.is_err());
        registry.assign(user, course, Utc::now()).await.unwrap();
        registry.require_assigned(user, course).await.unwrap();
        assert_eq!(registry.list_for_user(user).await.unwrap().len(), 1);
        registry.unassign(user, course).await.unwrap();
        assert!(!registry.is_assigned(user, course).await.unwrap());
    }
}
