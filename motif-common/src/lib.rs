//! # Motif Common Library
//!
//! Shared code for the motif mining tools including:
//! - Database schema, models and queries
//! - Configuration loading and root folder resolution
//! - The staged extraction cache
//! - Advisory table locks and lock-retry helpers
//! - Job summaries and the onset tolerance type

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod lock;
pub mod retry;
pub mod summary;
pub mod tolerance;

pub use error::{Error, Result};
pub use summary::JobSummary;
pub use tolerance::Tolerance;
