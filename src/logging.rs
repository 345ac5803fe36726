//! Tracing setup and run log discovery

use crate::manifest::Config;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const RUN_LOG_PREFIX: &str = "nic_automation_";

/// Initialize tracing with a compact stderr layer and an optional run log
///
/// - Stderr: INFO and above
/// - Run log: every event passing the filter, written to
///   `<log_path>/nic_automation_<stamp>.log` when `stamp` is given
/// - Default level: `debug` in debug mode, else `info`; `RUST_LOG` overrides
///
/// Returns the run log path when file logging is active.
pub fn init(config: &Config, stamp: Option<&str>) -> Option<PathBuf> {
    let default_level = if config.debug_mode { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr.with_max_level(Level::INFO));

    let run_log = stamp.and_then(|stamp| match open_run_log(&config.log_path, stamp) {
        Ok(opened) => Some(opened),
        Err(e) => {
            eprintln!("Warning: run log disabled: {}", e);
            None
        }
    });

    let (file_layer, path) = match run_log {
        Some((file, path)) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            ),
            Some(path),
        ),
        None => (None, None),
    };

    // A subscriber may already be installed (tests); keep the existing one
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    path
}

fn open_run_log(dir: &Path, stamp: &str) -> std::io::Result<(File, PathBuf)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}{}.log", RUN_LOG_PREFIX, stamp));
    let file = File::create(&path)?;
    Ok((file, path))
}

/// Newest run logs in `dir`, most recent first
pub fn recent_logs(dir: &Path, limit: usize) -> Vec<PathBuf> {
    let mut logs: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(RUN_LOG_PREFIX) && n.ends_with(".log"))
                })
                .collect()
        })
        .unwrap_or_default();

    // Timestamped names sort chronologically
    logs.sort();
    logs.reverse();
    logs.truncate(limit);
    logs
}
