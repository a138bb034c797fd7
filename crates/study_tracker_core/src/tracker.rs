//! crates/study_tracker_core/src/tracker.rs
//!
//! The session state machine: at most one open session per (user, course),
//! idempotent start, no-op stop, durations derived from store timestamps.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{AuthContext, CloseReason, Role, Session};
use crate::policy::{AdminBypass, TrackingPolicy};
use crate::ports::{CatalogStore, LedgerStore, OpenOutcome, PortError, PortResult};
use crate::recovery::StaleSessionSweeper;
use crate::registry::AssignmentRegistry;

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub session: Session,
    /// `false` when an already-open session was returned unchanged.
    pub created: bool,
}

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(Session),
    NothingToStop,
}

pub struct SessionTracker {
    ledger: Arc<dyn LedgerStore>,
    catalog: Arc<dyn CatalogStore>,
    registry: Arc<AssignmentRegistry>,
    sweeper: Arc<StaleSessionSweeper>,
    admin_bypass: AdminBypass,
}

impl SessionTracker {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        catalog: Arc<dyn CatalogStore>,
        registry: Arc<AssignmentRegistry>,
        sweeper: Arc<StaleSessionSweeper>,
        policy: &TrackingPolicy,
    ) -> Self {
        Self {
            ledger,
            catalog,
            registry,
            sweeper,
            admin_bypass: policy.admin_bypass,
        }
    }

    /// Opens a session for the actor on `course_id`, or returns the one already open.
    pub async fn start(
        &self,
        actor: &AuthContext,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<StartOutcome> {
        self.authorize_start(actor, course_id).await?;

        if let Err(e) = self.sweeper.recover_pair(actor.user_id, course_id, now).await {
            warn!(
                user_id = %actor.user_id,
                course_id = %course_id,
                error = %e,
                "Pair recovery failed before start; continuing"
            );
        }

        let outcome = retry_once_on_race(|| {
            self.ledger.open_session(actor.user_id, course_id, now)
        })
        .await?;

        match outcome {
            OpenOutcome::Created(session) => {
                info!(
                    session_id = %session.id,
                    user_id = %session.user_id,
                    course_id = %session.course_id,
                    "Study session started"
                );
                Ok(StartOutcome {
                    session,
                    created: true,
                })
            }
            OpenOutcome::Existing(session) => {
                debug!(session_id = %session.id, "Start on an already-open session");
                Ok(StartOutcome {
                    session,
                    created: false,
                })
            }
        }
    }

    /// Closes the open session for the pair. Calling this with nothing open is not an error.
    ///
    /// An open session that has outlived the recovery ceiling is closed as
    /// recovered with the capped duration instead of the full wall time.
    pub async fn stop(
        &self,
        actor: &AuthContext,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<StopOutcome> {
        let user_id = actor.user_id;
        retry_once_on_race(|| self.try_stop(user_id, course_id, now)).await
    }

    async fn try_stop(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<StopOutcome> {
        let Some(open) = self.ledger.find_open_session(user_id, course_id).await? else {
            debug!(user_id = %user_id, course_id = %course_id, "Nothing to stop");
            return Ok(StopOutcome::NothingToStop);
        };

        let closed = if self.sweeper.is_stale(open.started_at, now) {
            self.sweeper.recover(&open).await?
        } else {
            let duration = Session::duration_between(open.started_at, now);
            self.ledger
                .close_session(open.id, now, duration, CloseReason::Stopped)
                .await?
        };

        match closed {
            Some(session) => {
                info!(
                    session_id = %session.id,
                    user_id = %session.user_id,
                    course_id = %session.course_id,
                    duration_seconds = session.duration_seconds.unwrap_or_default(),
                    recovered = session.is_recovered(),
                    "Study session stopped"
                );
                Ok(StopOutcome::Stopped(session))
            }
            None => Err(PortError::RaceLost),
        }
    }

    /// The pair's sessions, newest first.
    pub async fn history(&self, user_id: Uuid, course_id: Uuid) -> PortResult<Vec<Session>> {
        self.ledger.list_sessions_for_pair(user_id, course_id).await
    }

    async fn authorize_start(&self, actor: &AuthContext, course_id: Uuid) -> PortResult<()> {
        match (actor.role, self.admin_bypass) {
            (Role::Admin, AdminBypass::Allow) => {
                self.catalog.get_course(course_id).await?;
                Ok(())
            }
            (Role::Admin, AdminBypass::Deny) | (Role::Student, _) => {
                self.registry.require_assigned(actor.user_id, course_id).await
            }
        }
    }
}

/// Runs `op`, retrying exactly once if it lost a serialization race.
async fn retry_once_on_race<T, F, Fut>(mut op: F) -> PortResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PortResult<T>>,
{
    match op().await {
        Err(PortError::RaceLost) => {
            warn!("Lost a concurrent update race; retrying once");
            op().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::domain::{LedgerCursor, NewUser, SessionFilter};
    use crate::memory::InMemoryStore;
    use crate::policy::RecoveredPolicy;
    use crate::ports::{DirectoryStore, OpenOutcome};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        registry: Arc<AssignmentRegistry>,
        tracker: Arc<SessionTracker>,
        student: AuthContext,
        admin: AuthContext,
        course: Uuid,
    }

    async fn fixture_with(bypass: AdminBypass) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let policy = TrackingPolicy {
            max_session_ceiling: Duration::hours(4),
            admin_bypass: bypass,
            recovered: RecoveredPolicy::Include,
        };
        let registry = Arc::new(AssignmentRegistry::new(store.clone(), store.clone(), store.clone()));
        let sweeper = Arc::new(StaleSessionSweeper::new(
            store.clone(),
            policy.max_session_ceiling,
            50,
        ));
        let tracker = Arc::new(SessionTracker::new(
            store.clone(),
            store.clone(),
            registry.clone(),
            sweeper,
            &policy,
        ));

        let student = new_user(&store, "student@example.com", Role::Student).await;
        let admin = new_user(&store, "admin@example.com", Role::Admin).await;
        let course = store.create_course("Kirtanam", None).await.unwrap().id;
        registry.assign(student.user_id, course, clock.now()).await.unwrap();

        Fixture {
            store,
            clock,
            registry,
            tracker,
            student,
            admin,
            course,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(AdminBypass::Allow).await
    }

    async fn new_user(store: &InMemoryStore, email: &str, role: Role) -> AuthContext {
        let user = store
            .create_user(NewUser {
                first_name: "Test".into(),
                last_name: email.into(),
                email: email.into(),
                hashed_password: "x".into(),
                role,
            })
            .await
            .unwrap();
        AuthContext {
            user_id: user.id,
            role,
        }
    }

    #[tokio::test]
    async fn start_twice_keeps_first_start_time() {
        let f = fixture().await;
        let t0 = f.clock.now();
        let first = f.tracker.start(&f.student, f.course, t0).await.unwrap();
        let second = f
            .tracker
            .start(&f.student, f.course, t0 + Duration::seconds(30))
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.session.id, first.session.id);
        assert_eq!(second.session.started_at, t0);
        assert_eq!(f.tracker.history(f.student.user_id, f.course).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stop_without_open_session_is_a_noop() {
        let f = fixture().await;
        let outcome = f.tracker.stop(&f.student, f.course, f.clock.now()).await.unwrap();
        assert_eq!(outcome, StopOutcome::NothingToStop);
        assert!(f.tracker.history(f.student.user_id, f.course).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_records_exact_duration() {
        let f = fixture().await;
        let t0 = f.clock.now();
        f.tracker.start(&f.student, f.course, t0).await.unwrap();
        let t1 = t0 + Duration::seconds(754);

        let StopOutcome::Stopped(session) = f.tracker.stop(&f.student, f.course, t1).await.unwrap()
        else {
            panic!("expected a stopped session");
        };
        assert_eq!(session.duration_seconds, Some(754));
        assert_eq!(session.ended_at, Some(t1));
        assert_eq!(session.close_reason, Some(CloseReason::Stopped));

        // A second stop finds nothing open.
        assert_eq!(
            f.tracker.stop(&f.student, f.course, t1).await.unwrap(),
            StopOutcome::NothingToStop
        );
    }

    #[tokio::test]
    async fn unassigned_student_cannot_start() {
        let f = fixture().await;
        let other = f.store.create_course("Vandanam", None).await.unwrap().id;
        let err = f.tracker.start(&f.student, other, f.clock.now()).await.unwrap_err();
        assert_eq!(
            err,
            PortError::NotAssigned {
                user_id: f.student.user_id,
                course_id: other
            }
        );
    }

    #[tokio::test]
    async fn admin_bypass_follows_policy() {
        let allow = fixture_with(AdminBypass::Allow).await;
        assert!(allow
            .tracker
            .start(&allow.admin, allow.course, allow.clock.now())
            .await
            .is_ok());
        let missing = allow
            .tracker
            .start(&allow.admin, Uuid::new_v4(), allow.clock.now())
            .await
            .unwrap_err();
        assert!(matches!(missing, PortError::NotFound(_)));

        let deny = fixture_with(AdminBypass::Deny).await;
        let err = deny
            .tracker
            .start(&deny.admin, deny.course, deny.clock.now())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotAssigned { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_leave_one_open_session() {
        let f = fixture().await;
        let now = f.clock.now();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let tracker = f.tracker.clone();
            let actor = f.student;
            let course = f.course;
            handles.push(tokio::spawn(async move { tracker.start(&actor, course, now).await }));
        }

        let mut ids = Vec::new();
        let mut created = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            if outcome.created {
                created += 1;
            }
            ids.push(outcome.session.id);
        }
        ids.dedup();
        assert_eq!(created, 1);
        assert_eq!(ids.len(), 1);
        assert_eq!(f.tracker.history(f.student.user_id, f.course).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_recovers_orphan_before_opening() {
        let f = fixture().await;
        let t0 = f.clock.now();
        let orphan = f.tracker.start(&f.student, f.course, t0).await.unwrap().session;

        f.clock.advance(Duration::hours(5));
        let fresh = f.tracker.start(&f.student, f.course, f.clock.now()).await.unwrap();
        assert!(fresh.created);
        assert_ne!(fresh.session.id, orphan.id);

        let history = f.tracker.history(f.student.user_id, f.course).await.unwrap();
        let recovered = history.iter().find(|s| s.id == orphan.id).unwrap();
        assert!(recovered.is_recovered());
        assert_eq!(recovered.duration_seconds, Some(4 * 3600));
    }

    #[tokio::test]
    async fn stop_on_stale_session_caps_duration() {
        let f = fixture().await;
        let t0 = f.clock.now();
        f.tracker.start(&f.student, f.course, t0).await.unwrap();

        let StopOutcome::Stopped(session) = f
            .tracker
            .stop(&f.student, f.course, t0 + Duration::hours(30))
            .await
            .unwrap()
        else {
            panic!("expected a stopped session");
        };
        assert!(session.is_recovered());
        assert_eq!(session.duration_seconds, Some(4 * 3600));
    }

    #[tokio::test]
    async fn unassign_keeps_session_history() {
        let f = fixture().await;
        let t0 = f.clock.now();
        f.tracker.start(&f.student, f.course, t0).await.unwrap();
        f.tracker
            .stop(&f.student, f.course, t0 + Duration::seconds(60))
            .await
            .unwrap();

        f.registry.unassign(f.student.user_id, f.course).await.unwrap();
        assert_eq!(f.tracker.history(f.student.user_id, f.course).await.unwrap().len(), 1);
    }

    /// Delegates to an in-memory store but refuses the first `failures` opens with `RaceLost`.
    struct RacyLedger {
        inner: Arc<InMemoryStore>,
        failures: AtomicU32,
    }

    #[async_trait]
    impl LedgerStore for RacyLedger {
        async fn now(&self) -> PortResult<DateTime<Utc>> {
            self.inner.now().await
        }
        async fn open_session(
            &self,
            user_id: Uuid,
            course_id: Uuid,
            started_at: DateTime<Utc>,
        ) -> PortResult<OpenOutcome> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PortError::RaceLost);
            }
            self.inner.open_session(user_id, course_id, started_at).await
        }
        async fn find_open_session(&self, u: Uuid, c: Uuid) -> PortResult<Option<Session>> {
            self.inner.find_open_session(u, c).await
        }
        async fn close_session(
            &self,
            id: Uuid,
            ended_at: DateTime<Utc>,
            duration_seconds: i64,
            reason: CloseReason,
        ) -> PortResult<Option<Session>> {
            self.inner.close_session(id, ended_at, duration_seconds, reason).await
        }
        async fn list_stale_open_sessions(
            &self,
            cutoff: DateTime<Utc>,
            limit: u32,
        ) -> PortResult<Vec<Session>> {
            self.inner.list_stale_open_sessions(cutoff, limit).await
        }
        async fn list_closed_sessions(
            &self,
            filter: SessionFilter,
            after: Option<LedgerCursor>,
            limit: u32,
        ) -> PortResult<Vec<Session>> {
            self.inner.list_closed_sessions(filter, after, limit).await
        }
        async fn list_sessions_for_pair(&self, u: Uuid, c: Uuid) -> PortResult<Vec<Session>> {
            self.inner.list_sessions_for_pair(u, c).await
        }
    }

    fn racy_tracker(f: &Fixture, failures: u32) -> SessionTracker {
        let ledger = Arc::new(RacyLedger {
            inner: f.store.clone(),
            failures: AtomicU32::new(failures),
        });
        let sweeper = Arc::new(StaleSessionSweeper::new(ledger.clone(), Duration::hours(4), 50));
        SessionTracker::new(
            ledger,
            f.store.clone(),
            f.registry.clone(),
            sweeper,
            &TrackingPolicy::default(),
        )
    }

    #[tokio::test]
    async fn lost_race_is_retried_once() {
        let f = fixture().await;
        let tracker = racy_tracker(&f, 1);
        let outcome = tracker.start(&f.student, f.course, f.clock.now()).await.unwrap();
        assert!(outcome.created);
    }

    #[tokio::test]
    async fn second_lost_race_is_surfaced() {
        let f = fixture().await;
        let tracker = racy_tracker(&f, 2);
        let err = tracker.start(&f.student, f.course, f.clock.now()).await.unwrap_err();
        assert_eq!(err, PortError::RaceLost);
        assert!(err.is_retryable());
    }
}
