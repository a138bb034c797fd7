//! crates/study_tracker_core/src/policy.rs
//!
//! Tunable rules for session tracking and reporting.

use chrono::Duration;
use std::str::FromStr;

/// Whether administrators may start a timer on a course they are not assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminBypass {
    Allow,
    Deny,
}

impl FromStr for AdminBypass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" | "true" | "yes" => Ok(AdminBypass::Allow),
            "deny" | "false" | "no" => Ok(AdminBypass::Deny),
            other => Err(format!("expected 'allow' or 'deny', got '{}'", other)),
        }
    }
}

/// Whether sessions closed by the recovery sweep count toward reported totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveredPolicy {
    Include,
    Exclude,
}

impl FromStr for RecoveredPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "include" => Ok(RecoveredPolicy::Include),
            "exclude" => Ok(RecoveredPolicy::Exclude),
            other => Err(format!("expected 'include' or 'exclude', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrackingPolicy {
    /// Longest plausible single study session. Open sessions older than this
    /// are closed by recovery with exactly this duration.
    pub max_session_ceiling: Duration,
    pub admin_bypass: AdminBypass,
    pub recovered: RecoveredPolicy,
}

impl Default for TrackingPolicy {
    fn default() -> Self {
        Self {
            max_session_ceiling: Duration::hours(4),
            admin_bypass: AdminBypass::Allow,
            recovered: RecoveredPolicy::Include,
        }
    }
}
