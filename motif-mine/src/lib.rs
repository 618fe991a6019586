//! # motif-mine
//!
//! Batch jobs that turn extracted pattern occurrences into derived tables:
//! - [`index`]: inverted index of pattern values, global and per Configuration
//! - [`pairs`]: shared pattern values for every piece pair
//! - [`note_pairs`]: every canonical note pair with equality flags
//! - [`reconcile`]: back-fills note references into occurrence rows
//!
//! [`logging`] holds the binary's startup log filter.

pub mod index;
pub mod logging;
pub mod note_pairs;
pub mod pairs;
pub mod reconcile;

/// Upper bound on time spent retrying a batch while SQLite reports a lock
pub const LOCK_RETRY_MS: u64 = 5000;
