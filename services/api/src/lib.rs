//! services/api/src/lib.rs
//!
//! The HTTP service around `study_tracker_core`: PostgreSQL adapter, axum web
//! layer, configuration and the service error type.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
