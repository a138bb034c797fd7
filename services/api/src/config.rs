//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::Duration;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::str::FromStr;
use study_tracker_core::{AdminBypass, RecoveredPolicy, TrackingPolicy};
use tracing::Level;

/// Upper bound for `MAX_SESSION_CEILING_SECS` (7 days).
const MAX_CEILING_SECS: i64 = 7 * 24 * 3600;
/// Upper bound for `AUTH_SESSION_TTL_DAYS`.
const MAX_AUTH_SESSION_TTL_DAYS: i64 = 365;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Credentials for an administrator created at startup if the email is unknown.
#[derive(Clone, Debug)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub db_max_connections: u32,
    pub log_level: Level,
    pub cors_origin: String,
    pub auth_session_ttl: Duration,
    pub tracking: TrackingPolicy,
    pub sweep_interval: std::time::Duration,
    pub sweep_batch_size: u32,
    pub summary_page_size: u32,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Load Server and Database Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let db_max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", 5u32)?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string());
        let ttl_days = parse_in_range(
            &lookup,
            "AUTH_SESSION_TTL_DAYS",
            30,
            1..=MAX_AUTH_SESSION_TTL_DAYS,
        )?;
        let auth_session_ttl = Duration::days(ttl_days);

        // --- Load Session Tracking Settings ---
        let ceiling_secs =
            parse_in_range(&lookup, "MAX_SESSION_CEILING_SECS", 4 * 3600, 1..=MAX_CEILING_SECS)?;
        let tracking = TrackingPolicy {
            max_session_ceiling: Duration::seconds(ceiling_secs),
            admin_bypass: parse_or(&lookup, "ADMIN_BYPASS_ASSIGNMENT", AdminBypass::Allow)?,
            recovered: parse_or(&lookup, "RECOVERED_SESSIONS_POLICY", RecoveredPolicy::Include)?,
        };
        let sweep_interval =
            std::time::Duration::from_secs(parse_or(&lookup, "SWEEP_INTERVAL_SECS", 300u64)?.max(1));
        let sweep_batch_size = parse_or(&lookup, "SWEEP_BATCH_SIZE", 200u32)?;
        let summary_page_size = parse_or(&lookup, "SUMMARY_PAGE_SIZE", 500u32)?;

        // --- Optional Bootstrap Administrator ---
        let bootstrap_admin = match (lookup("ADMIN_EMAIL"), lookup("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin {
                email,
                password,
                first_name: lookup("ADMIN_FIRST_NAME").unwrap_or_else(|| "Admin".to_string()),
                last_name: lookup("ADMIN_LAST_NAME").unwrap_or_default(),
            }),
            (Some(_), None) => return Err(ConfigError::MissingVar("ADMIN_PASSWORD".to_string())),
            _ => None,
        };

        Ok(Self {
            bind_address,
            database_url,
            db_max_connections,
            log_level,
            cors_origin,
            auth_session_ttl,
            tracking,
            sweep_interval,
            sweep_batch_size,
            summary_page_size,
            bootstrap_admin,
        })
    }
}

/// Parses `key` if set, otherwise falls back to `default`.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

/// Like [`parse_or`], but rejects values outside `range`.
fn parse_in_range<F>(
    lookup: &F,
    key: &str,
    default: i64,
    range: RangeInclusive<i64>,
) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default)?;
    if !range.contains(&value) {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("{} is outside {}..={}", value, range.start(), range.end()),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/db")]))
            .unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.tracking.max_session_ceiling, Duration::hours(4));
        assert_eq!(config.tracking.admin_bypass, AdminBypass::Allow);
        assert_eq!(config.tracking.recovered, RecoveredPolicy::Include);
        assert_eq!(config.sweep_interval, std::time::Duration::from_secs(300));
        assert!(config.bootstrap_admin.is_none());
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "DATABASE_URL"));
    }

    #[test]
    fn policies_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("MAX_SESSION_CEILING_SECS", "7200"),
            ("ADMIN_BYPASS_ASSIGNMENT", "deny"),
            ("RECOVERED_SESSIONS_POLICY", "exclude"),
        ]))
        .unwrap();
        assert_eq!(config.tracking.max_session_ceiling, Duration::hours(2));
        assert_eq!(config.tracking.admin_bypass, AdminBypass::Deny);
        assert_eq!(config.tracking.recovered, RecoveredPolicy::Exclude);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("RECOVERED_SESSIONS_POLICY", "sometimes"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "RECOVERED_SESSIONS_POLICY"));

        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("MAX_SESSION_CEILING_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "MAX_SESSION_CEILING_SECS"));
    }

    #[test]
    fn admin_email_requires_password() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("ADMIN_EMAIL", "admin@example.com"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "ADMIN_PASSWORD"));
    }

    #[test]
    fn ceiling_must_fit_within_a_week() {
        for raw in ["-5", "604801", "9000000000000"] {
            let err = Config::from_lookup(lookup_from(&[
                ("DATABASE_URL", "postgres://localhost/db"),
                ("MAX_SESSION_CEILING_SECS", raw),
            ]))
            .unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidValue(var, _) if var == "MAX_SESSION_CEILING_SECS"),
                "{raw} was accepted"
            );
        }

        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("MAX_SESSION_CEILING_SECS", "604800"),
        ]))
        .unwrap();
        assert_eq!(config.tracking.max_session_ceiling, Duration::days(7));
    }

    #[test]
    fn auth_session_ttl_is_bounded() {
        for raw in ["0", "-1", "366", "9000000000000"] {
            let err = Config::from_lookup(lookup_from(&[
                ("DATABASE_URL", "postgres://localhost/db"),
                ("AUTH_SESSION_TTL_DAYS", raw),
            ]))
            .unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidValue(var, _) if var == "AUTH_SESSION_TTL_DAYS"),
                "{raw} was accepted"
            );
        }

        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/db"),
            ("AUTH_SESSION_TTL_DAYS", "7"),
        ]))
        .unwrap();
        assert_eq!(config.auth_session_ttl, Duration::days(7));
    }
}
