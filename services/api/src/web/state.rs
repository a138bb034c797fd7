//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use std::sync::Arc;
use study_tracker_core::ports::{AssignmentStore, CatalogStore, DirectoryStore, LedgerStore};
use study_tracker_core::{
    AssignmentRegistry, ProgressAggregator, SessionTracker, StaleSessionSweeper,
};

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<dyn DirectoryStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub registry: Arc<AssignmentRegistry>,
    pub tracker: Arc<SessionTracker>,
    pub sweeper: Arc<StaleSessionSweeper>,
    pub aggregator: Arc<ProgressAggregator>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires every service on top of a single store implementing all ports.
    pub fn from_store<S>(store: Arc<S>, config: Arc<Config>) -> Self
    where
        S: LedgerStore + AssignmentStore + DirectoryStore + CatalogStore + 'static,
    {
        let ledger: Arc<dyn LedgerStore> = store.clone();
        let assignments: Arc<dyn AssignmentStore> = store.clone();
        let directory: Arc<dyn DirectoryStore> = store.clone();
        let catalog: Arc<dyn CatalogStore> = store;

        let policy = &config.tracking;
        let registry = Arc::new(AssignmentRegistry::new(
            assignments,
            directory.clone(),
            catalog.clone(),
        ));
        let sweeper = Arc::new(StaleSessionSweeper::new(
            ledger.clone(),
            policy.max_session_ceiling,
            config.sweep_batch_size,
        ));
        let tracker = Arc::new(SessionTracker::new(
            ledger.clone(),
            catalog.clone(),
            registry.clone(),
            sweeper.clone(),
            policy,
        ));
        let aggregator = Arc::new(ProgressAggregator::new(
            ledger.clone(),
            directory.clone(),
            catalog.clone(),
            policy.recovered,
            config.summary_page_size,
        ));

        Self {
            directory,
            catalog,
            ledger,
            registry,
            tracker,
            sweeper,
            aggregator,
            config,
        }
    }
}
