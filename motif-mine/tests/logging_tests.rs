//! Startup log filter tests
//!
//! Each test installs a thread-local subscriber; #[serial] keeps the global
//! callsite interest cache from being rebuilt under a concurrent test.

use motif_common::config::MotifConfig;
use motif_mine::logging::startup_filter;
use serial_test::serial;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
#[serial]
fn test_missing_config_warning_is_logged_then_level_applies() {
    let dir = TempDir::new().unwrap();
    let captured = Captured::default();
    let writer = captured.clone();
    let (filter, log_level) = startup_filter(None);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(move || writer.clone()));

    tracing::subscriber::with_default(subscriber, || {
        let config = MotifConfig::from_toml_str("[logging]\nlevel = \"error\"\n").unwrap();
        MotifConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(log_level.apply_configured(&config.logging.level).unwrap());
        warn!("hidden after reload");
    });

    let text = captured.text();
    assert!(text.contains("absent.toml not found"), "log was: {}", text);
    assert!(!text.contains("hidden after reload"), "log was: {}", text);
}

#[test]
#[serial]
fn test_rust_log_filter_is_kept() {
    let captured = Captured::default();
    let writer = captured.clone();
    let (filter, log_level) = startup_filter(Some(EnvFilter::new("debug")));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(move || writer.clone()));

    tracing::subscriber::with_default(subscriber, || {
        assert!(!log_level.apply_configured("error").unwrap());
        info!("still visible");
    });

    assert!(captured.text().contains("still visible"));
}
