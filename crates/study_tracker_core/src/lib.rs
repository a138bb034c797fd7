pub mod aggregator;
pub mod clock;
pub mod domain;
pub mod memory;
pub mod policy;
pub mod ports;
pub mod recovery;
pub mod registry;
pub mod tracker;

pub use aggregator::{ProgressAggregator, SummaryFold};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    Assignment, AuthContext, AuthSession, CloseReason, Course, CourseMaterial, LedgerCursor,
    MaterialKind, NewUser, ProgressReportRow, ProgressSummary, Role, Session, SessionFilter, User,
    UserCredentials,
};
pub use memory::InMemoryStore;
pub use policy::{AdminBypass, RecoveredPolicy, TrackingPolicy};
pub use ports::{
    AssignmentStore, CatalogStore, DirectoryStore, LedgerStore, OpenOutcome, PortError,
    PortResult,
};
pub use recovery::{StaleSessionSweeper, SweepReport};
pub use registry::AssignmentRegistry;
pub use tracker::{SessionTracker, StartOutcome, StopOutcome};
