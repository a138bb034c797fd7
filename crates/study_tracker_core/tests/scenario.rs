//! End-to-end flow through the core: enrollment, an abandoned timer, the
//! background sweep, and the administrative report.

use chrono::Duration;
use std::sync::Arc;
use study_tracker_core::{
    AssignmentRegistry, AuthContext, CatalogStore, Clock, DirectoryStore, InMemoryStore,
    ManualClock, NewUser, ProgressAggregator, Role, SessionFilter, SessionTracker,
    StaleSessionSweeper, StopOutcome, TrackingPolicy,
};

struct Harness {
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    registry: Arc<AssignmentRegistry>,
    sweeper: Arc<StaleSessionSweeper>,
    tracker: SessionTracker,
    aggregator: ProgressAggregator,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    let policy = TrackingPolicy::default();
    let registry = Arc::new(AssignmentRegistry::new(store.clone(), store.clone(), store.clone()));
    let sweeper = Arc::new(StaleSessionSweeper::new(
        store.clone(),
        policy.max_session_ceiling,
        100,
    ));
    let tracker = SessionTracker::new(
        store.clone(),
        store.clone(),
        registry.clone(),
        sweeper.clone(),
        &policy,
    );
    let aggregator =
        ProgressAggregator::new(store.clone(), store.clone(), store.clone(), policy.recovered, 50);
    Harness {
        store,
        clock,
        registry,
        sweeper,
        tracker,
        aggregator,
    }
}

async fn student(store: &InMemoryStore) -> AuthContext {
    let user = store
        .create_user(NewUser {
            first_name: "Anjali".into(),
            last_name: "Menon".into(),
            email: "anjali@example.com".into(),
            hashed_password: "x".into(),
            role: Role::Student,
        })
        .await
        .unwrap();
    AuthContext {
        user_id: user.id,
        role: Role::Student,
    }
}

#[tokio::test]
async fn abandoned_timer_is_recovered_and_reported() {
    let h = harness();
    let a = student(&h.store).await;
    let course = h.store.create_course("Kirtanam", None).await.unwrap();
    h.registry.assign(a.user_id, course.id, h.clock.now()).await.unwrap();

    // Start, then navigate away without stopping.
    h.tracker.start(&a, course.id, h.clock.now()).await.unwrap();

    h.clock.advance(Duration::hours(5));
    let report = h.sweeper.sweep(h.clock.now()).await.unwrap();
    assert_eq!(report.recovered, 1);

    let history = h.tracker.history(a.user_id, course.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].duration_seconds, Some(14400));
    assert!(history[0].is_recovered());

    let rows = h
        .aggregator
        .report(SessionFilter {
            user_id: Some(a.user_id),
            course_id: Some(course.id),
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].total_seconds, 14400);
    assert_eq!(rows[0].session_count, 1);
    assert_eq!(rows[0].student_name, "Anjali Menon");
}

#[tokio::test]
async fn unassigning_preserves_reported_history() {
    let h = harness();
    let a = student(&h.store).await;
    let course = h.store.create_course("Smaranam", None).await.unwrap();
    h.registry.assign(a.user_id, course.id, h.clock.now()).await.unwrap();

    for secs in [60, 120, 30] {
        h.tracker.start(&a, course.id, h.clock.now()).await.unwrap();
        h.clock.advance(Duration::seconds(secs));
        let outcome = h.tracker.stop(&a, course.id, h.clock.now()).await.unwrap();
        assert!(matches!(outcome, StopOutcome::Stopped(_)));
    }

    let before = h.aggregator.summarize_all(SessionFilter::default()).await.unwrap();
    assert_eq!(before[0].total_seconds, 210);
    assert_eq!(before[0].session_count, 3);

    h.registry.unassign(a.user_id, course.id).await.unwrap();
    let after = h.aggregator.summarize_all(SessionFilter::default()).await.unwrap();
    assert_eq!(before, after);

    // The course can no longer be deleted: the ledger still references it.
    assert!(h.store.delete_course(course.id).await.is_err());
}
