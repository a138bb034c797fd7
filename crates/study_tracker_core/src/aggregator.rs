//! crates/study_tracker_core/src/aggregator.rs
//!
//! Derives per-(user, course) progress from the closed part of the ledger.
//!
//! Summaries are recomputed on every call by folding over closed sessions in
//! `(user_id, course_id, id)` order, one page per store round trip. Closed
//! records never change, so there is nothing to invalidate.

use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{LedgerCursor, ProgressReportRow, ProgressSummary, Session, SessionFilter};
use crate::policy::RecoveredPolicy;
use crate::ports::{CatalogStore, DirectoryStore, LedgerStore, PortResult};

/// Incremental fold over closed sessions sorted by pair.
///
/// `push` returns the finished summary of the previous pair whenever the pair changes.
#[derive(Debug)]
pub struct SummaryFold {
    policy: RecoveredPolicy,
    current: Option<ProgressSummary>,
}

impl SummaryFold {
    pub fn new(policy: RecoveredPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    pub fn push(&mut self, session: &Session) -> Option<ProgressSummary> {
        if session.is_open() {
            return None;
        }

        let same_pair = self
            .current
            .as_ref()
            .map_or(false, |c| (c.user_id, c.course_id) == session.pair());
        let finished = if same_pair { None } else { self.current.take() };

        let summary = self.current.get_or_insert_with(|| ProgressSummary {
            user_id: session.user_id,
            course_id: session.course_id,
            total_seconds: 0,
            session_count: 0,
            recovered_seconds: 0,
            recovered_count: 0,
        });

        let duration = session.duration_seconds.unwrap_or(0);
        let recovered = session.is_recovered();
        if recovered {
            summary.recovered_seconds += duration;
            summary.recovered_count += 1;
        }
        let counts = match (recovered, self.policy) {
            (true, RecoveredPolicy::Exclude) => false,
            (true, RecoveredPolicy::Include) | (false, _) => true,
        };
        if counts {
            summary.total_seconds += duration;
            summary.session_count += 1;
        }

        finished
    }

    pub fn finish(self) -> Option<ProgressSummary> {
        self.current
    }
}

pub struct ProgressAggregator {
    ledger: Arc<dyn LedgerStore>,
    directory: Arc<dyn DirectoryStore>,
    catalog: Arc<dyn CatalogStore>,
    policy: RecoveredPolicy,
    page_size: u32,
}

impl ProgressAggregator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        directory: Arc<dyn DirectoryStore>,
        catalog: Arc<dyn CatalogStore>,
        policy: RecoveredPolicy,
        page_size: u32,
    ) -> Self {
        Self {
            ledger,
            directory,
            catalog,
            policy,
            page_size: page_size.max(1),
        }
    }

    /// A lazy, restartable sequence of summaries, one per pair with at least one
    /// closed session matching `filter`.
    pub fn summarize(&self, filter: SessionFilter) -> BoxStream<'static, PortResult<ProgressSummary>> {
        let ledger = self.ledger.clone();
        let policy = self.policy;
        let page_size = self.page_size;

        Box::pin(async_stream::try_stream! {
            let mut fold = SummaryFold::new(policy);
            let mut after: Option<LedgerCursor> = None;

            loop {
                let page = ledger.list_closed_sessions(filter, after, page_size).await?;
                debug!(rows = page.len(), "Fetched ledger page for summary");
                let exhausted = page.len() < page_size as usize;
                if let Some(last) = page.last() {
                    after = Some(LedgerCursor::from(last));
                }
                for session in &page {
                    if let Some(summary) = fold.push(session) {
                        yield summary;
                    }
                }
                if exhausted {
                    break;
                }
            }

            if let Some(summary) = fold.finish() {
                yield summary;
            }
        })
    }

    pub async fn summarize_all(&self, filter: SessionFilter) -> PortResult<Vec<ProgressSummary>> {
        self.summarize(filter).try_collect().await
    }

    /// Summaries joined with student and course names, ordered by student surname then course.
    pub async fn report(&self, filter: SessionFilter) -> PortResult<Vec<ProgressReportRow>> {
        let summaries = self.summarize_all(filter).await?;
        if summaries.is_empty() {
            return Ok(Vec::new());
        }

        let users: HashMap<_, _> = self
            .directory
            .list_users(None)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        let courses: HashMap<_, _> = self
            .catalog
            .list_courses()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        // Ordered by last name, then first name, then course name.
        let mut keyed: Vec<((String, String, String, Uuid, Uuid), ProgressReportRow)> = summaries
            .into_iter()
            .filter_map(|s| {
                let (Some(user), Some(course)) = (users.get(&s.user_id), courses.get(&s.course_id))
                else {
                    warn!(
                        user_id = %s.user_id,
                        course_id = %s.course_id,
                        "Summary references an unknown user or course; skipping"
                    );
                    return None;
                };
                let key = (
                    user.last_name.clone(),
                    user.first_name.clone(),
                    course.name.clone(),
                    user.id,
                    course.id,
                );
                Some((
                    key,
                    ProgressReportRow {
                        student_id: user.id,
                        student_name: user.full_name(),
                        email: user.email.clone(),
                        course_id: course.id,
                        course_name: course.name.clone(),
                        total_seconds: s.total_seconds,
                        session_count: s.session_count,
                        recovered_seconds: s.recovered_seconds,
                    },
                ))
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let rows = keyed.into_iter().map(|(_, row)| row).collect();
        Ok(rows)
    }
}
