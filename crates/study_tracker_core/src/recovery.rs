//! crates/study_tracker_core/src/recovery.rs
//!
//! Reclaims sessions left open by clients that went away without stopping.
//!
//! A stale session is closed with `ended_at = started_at + ceiling`, so the
//! credited time never exceeds the ceiling no matter how late the sweep runs.
//! Every close is conditional, which makes re-running a sweep a no-op.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{CloseReason, Session};
use crate::ports::{LedgerStore, PortResult};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub recovered: u32,
    pub failed: u32,
}

pub struct StaleSessionSweeper {
    ledger: Arc<dyn LedgerStore>,
    ceiling: Duration,
    batch_size: u32,
}

impl StaleSessionSweeper {
    pub fn new(ledger: Arc<dyn LedgerStore>, ceiling: Duration, batch_size: u32) -> Self {
        Self {
            ledger,
            ceiling,
            batch_size: batch_size.max(1),
        }
    }

    /// Whether an open session started at `started_at` has outlived the ceiling at `now`.
    pub fn is_stale(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match now.checked_sub_signed(self.ceiling) {
            Some(cutoff) => started_at < cutoff,
            None => false,
        }
    }

    /// Closes `session` as recovered. Returns `None` if it was closed concurrently.
    pub async fn recover(&self, session: &Session) -> PortResult<Option<Session>> {
        let ended_at = session.started_at + self.ceiling;
        let duration = Session::duration_between(session.started_at, ended_at);
        let closed = self
            .ledger
            .close_session(session.id, ended_at, duration, CloseReason::Recovered)
            .await?;
        if let Some(closed) = &closed {
            info!(
                session_id = %closed.id,
                user_id = %closed.user_id,
                course_id = %closed.course_id,
                duration_seconds = duration,
                "Recovered stale study session"
            );
        }
        Ok(closed)
    }

    /// Recovers the open session of one pair if it is stale.
    pub async fn recover_pair(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<Option<Session>> {
        match self.ledger.find_open_session(user_id, course_id).await? {
            Some(open) if self.is_stale(open.started_at, now) => self.recover(&open).await,
            _ => Ok(None),
        }
    }

    /// Recovers every stale open session in the ledger, one batch at a time.
    pub async fn sweep(&self, now: DateTime<Utc>) -> PortResult<SweepReport> {
        let mut report = SweepReport::default();
        let Some(cutoff) = now.checked_sub_signed(self.ceiling) else {
            return Ok(report);
        };

        loop {
            let batch = self
                .ledger
                .list_stale_open_sessions(cutoff, self.batch_size)
                .await?;
            let batch_len = batch.len();
            let mut progressed = 0u32;

            for session in &batch {
                match self.recover(session).await {
                    Ok(Some(_)) => {
                        report.recovered += 1;
                        progressed += 1;
                    }
                    // Closed by a concurrent stop or sweep; it will not be listed again.
                    Ok(None) => progressed += 1,
                    Err(e) => {
                        error!(
                            session_id = %session.id,
                            error = %e,
                            "Failed to recover stale session"
                        );
                        report.failed += 1;
                    }
                }
            }

            if batch_len < self.batch_size as usize || progressed == 0 {
                break;
            }
        }

        if report.recovered > 0 || report.failed > 0 {
            info!(
                recovered = report.recovered,
                failed = report.failed,
                "Stale session sweep completed"
            );
        } else {
            debug!("Stale session sweep found nothing to recover");
        }
        Ok(report)
    }

    /// Periodic background pass. Runs until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: std::time::Duration, cancel: CancellationToken) {
        info!(
            interval_secs = interval.as_secs(),
            ceiling_secs = self.ceiling.num_seconds(),
            "Stale session sweeper started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let pass = async {
                let now = self.ledger.now().await?;
                self.sweep(now).await
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = pass => {
                    if let Err(e) = result {
                        warn!(error = %e, "Stale session sweep failed; retrying on next tick");
                    }
                }
            }
        }

        info!("Stale session sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::domain::{NewUser, Role};
    use crate::memory::InMemoryStore;
    use crate::ports::{CatalogStore, DirectoryStore};

    async fn setup() -> (Arc<InMemoryStore>, Arc<ManualClock>, Uuid, Uuid) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let user = store
            .create_user(NewUser {
                first_name: "Mira".into(),
                last_name: "Iyer".into(),
                email: "mira@example.com".into(),
                hashed_password: "x".into(),
                role: Role::Student,
            })
            .await
            .unwrap();
        let course = store.create_course("Smaranam", None).await.unwrap();
        (store, clock, user.id, course.id)
    }

    #[tokio::test]
    async fn ceiling_beyond_the_calendar_never_marks_sessions_stale() {
        let (store, clock, user, course) = setup().await;
        let sweeper = StaleSessionSweeper::new(store.clone(), Duration::days(200_000_000), 10);
        let started = clock.now() - Duration::hours(100);
        store.open_session(user, course, started).await.unwrap();

        assert!(!sweeper.is_stale(started, clock.now()));
        let report = sweeper.sweep(clock.now()).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(store.find_open_session(user, course).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_caps_duration_at_ceiling() {
        let (store, clock, user, course) = setup().await;
        let sweeper = StaleSessionSweeper::new(store.clone(), Duration::hours(4), 10);
        let started = clock.now() - Duration::hours(100);
        store.open_session(user, course, started).await.unwrap();

        let report = sweeper.sweep(clock.now()).await.unwrap();
        assert_eq!(report, SweepReport { recovered: 1, failed: 0 });

        let history = store.list_sessions_for_pair(user, course).await.unwrap();
        assert_eq!(history[0].duration_seconds, Some(4 * 3600));
        assert_eq!(history[0].ended_at, Some(started + Duration::hours(4)));
        assert!(history[0].is_recovered());
    }

    #[tokio::test]
    async fn sweep_is_idempotent_and_leaves_fresh_sessions() {
        let (store, clock, user, course) = setup().await;
        let sweeper = StaleSessionSweeper::new(store.clone(), Duration::hours(4), 10);
        store
            .open_session(user, course, clock.now() - Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(sweeper.sweep(clock.now()).await.unwrap(), SweepReport::default());
        assert_eq!(sweeper.sweep(clock.now()).await.unwrap(), SweepReport::default());
        assert!(store.find_open_session(user, course).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_walks_multiple_batches() {
        let (store, clock, user, _) = setup().await;
        let sweeper = StaleSessionSweeper::new(store.clone(), Duration::hours(4), 2);
        for i in 0..5 {
            let course = store.create_course(&format!("Course {}", i), None).await.unwrap();
            store
                .open_session(user, course.id, clock.now() - Duration::hours(10 + i))
                .await
                .unwrap();
        }

        let report = sweeper.sweep(clock.now()).await.unwrap();
        assert_eq!(report.recovered, 5);
        assert!(store
            .list_stale_open_sessions(clock.now(), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn recover_pair_ignores_other_pairs() {
        let (store, clock, user, course) = setup().await;
        let other = store.create_course("Archanam", None).await.unwrap();
        let sweeper = StaleSessionSweeper::new(store.clone(), Duration::hours(4), 10);
        let old = clock.now() - Duration::hours(6);
        store.open_session(user, course, old).await.unwrap();
        store.open_session(user, other.id, old).await.unwrap();

        let recovered = sweeper.recover_pair(user, course, clock.now()).await.unwrap();
        assert!(recovered.is_some());
        assert!(store.find_open_session(user, other.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let (store, _, _, _) = setup().await;
        let sweeper = Arc::new(StaleSessionSweeper::new(store, Duration::hours(4), 10));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            sweeper.run(std::time::Duration::from_millis(10), cancel.clone()),
        );
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
