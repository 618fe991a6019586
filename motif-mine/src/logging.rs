//! Startup log filter
//!
//! The subscriber is installed before the config file is read, with
//! `RUST_LOG` or `info`. Once the config is loaded its `[logging] level`
//! replaces the default; an explicit `RUST_LOG` always wins.

use tracing::debug;
use tracing_subscriber::{reload, EnvFilter, Registry};

pub type FilterLayer = reload::Layer<EnvFilter, Registry>;

/// Handle for swapping in the configured level after startup
pub struct LogLevel {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

/// Build the reloadable filter layer. `env` is the filter parsed from
/// `RUST_LOG`, if any.
pub fn startup_filter(env: Option<EnvFilter>) -> (FilterLayer, LogLevel) {
    let from_env = env.is_some();
    let (layer, handle) = reload::Layer::new(env.unwrap_or_else(|| EnvFilter::new("info")));
    (layer, LogLevel { handle, from_env })
}

impl LogLevel {
    /// Apply the config file's level. Returns false when `RUST_LOG` was set
    /// and the filter is left alone.
    pub fn apply_configured(&self, level: &str) -> Result<bool, reload::Error> {
        if self.from_env {
            debug!(level, "RUST_LOG set, ignoring configured log level");
            return Ok(false);
        }
        self.handle.reload(EnvFilter::new(level))?;
        Ok(true)
    }
}
