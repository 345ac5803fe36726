//! Diagnostic capture and techsupport bundles
//!
//! Provides:
//! - Capture of a fixed set of diagnostic commands into a debug bundle
//! - Debug bundle files (`debug_data_<ts>.json`)
//! - Techsupport archives (`techsupport_<ts>.tar.zst`)

use crate::clock::Clock;
use crate::diag::{self, DiagnosticSource};
use crate::error::{Error, Result};
use crate::manifest::Config;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tar::Builder;

/// Diagnostic commands captured into every debug bundle
const DEBUG_COMMANDS: [(&str, &str); 11] = [
    ("system_info", "uname -a"),
    ("memory_info", "free -h"),
    ("disk_info", "df -h"),
    ("network_interfaces", "ip addr show"),
    ("network_stats", "cat /proc/net/dev"),
    ("interrupts", "cat /proc/interrupts"),
    ("dmesg", "dmesg | tail -100"),
    ("journalctl", "journalctl -n 100 --no-pager"),
    ("lspci", "lspci | grep -i network"),
    ("lsmod", "lsmod | grep -i nic"),
    ("ethtool", "ethtool {interface} 2>/dev/null || echo 'ethtool not available'"),
];

/// One captured command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedCommand {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Set when the command could not be run at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Local>,
}

/// Command name to captured output
pub type DebugBundle = BTreeMap<String, CapturedCommand>;

/// Paths produced by a full diagnostics collection
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    pub bundle: Option<PathBuf>,
    pub techsupport: Option<PathBuf>,
}

/// Captures diagnostics and assembles techsupport archives
pub struct DiagnosticCollector {
    source: Arc<dyn DiagnosticSource>,
    clock: Arc<dyn Clock>,
    interface: String,
    timeout: Duration,
    log_dir: PathBuf,
    techsupport_dir: PathBuf,
    files: Vec<PathBuf>,
    latest: Mutex<Option<DebugBundle>>,
}

impl DiagnosticCollector {
    pub fn new(config: &Config, source: Arc<dyn DiagnosticSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            interface: config.nic_interface.clone(),
            timeout: config.command_timeout(),
            log_dir: config.log_path.clone(),
            techsupport_dir: config.techsupport_path.clone(),
            files: config.techsupport_files.clone(),
            latest: Mutex::new(None),
        }
    }

    /// Run every diagnostic command; failures are recorded, never raised
    pub fn capture(&self) -> DebugBundle {
        tracing::info!("Capturing debug logs...");

        let mut bundle = DebugBundle::new();
        for (name, template) in DEBUG_COMMANDS {
            let command = diag::render(template, &[("interface", &self.interface)]);
            let captured = match self.source.run(&command, self.timeout) {
                Ok(output) => CapturedCommand {
                    command,
                    exit_code: Some(output.exit_code),
                    stdout: Some(output.stdout),
                    stderr: Some(output.stderr),
                    error: None,
                    timestamp: self.clock.now(),
                },
                Err(e) => {
                    tracing::debug!(name, "diagnostic command failed: {}", e);
                    CapturedCommand {
                        command,
                        exit_code: None,
                        stdout: None,
                        stderr: None,
                        error: Some(e.to_string()),
                        timestamp: self.clock.now(),
                    }
                }
            };
            bundle.insert(name.to_string(), captured);
        }

        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(bundle.clone());
        }
        bundle
    }

    /// Write a bundle as pretty JSON into the log directory
    pub fn write_bundle(&self, bundle: &DebugBundle) -> Result<PathBuf> {
        fs::create_dir_all(&self.log_dir)?;
        let stem = unique_stem(&self.log_dir, &format!("debug_data_{}", self.clock.stamp()), &[".json"]);
        let path = self.log_dir.join(format!("{}.json", stem));
        fs::write(&path, serde_json::to_string_pretty(bundle)?)?;
        tracing::info!("Debug data saved to {}", path.display());
        Ok(path)
    }

    /// Stage system files and the latest bundle, then archive them
    ///
    /// Returns the archive path, or the staging directory when archiving
    /// failed.
    pub fn build_techsupport(&self) -> Result<PathBuf> {
        tracing::info!("Generating techsupport bundle...");

        fs::create_dir_all(&self.techsupport_dir)?;
        let stem = unique_stem(
            &self.techsupport_dir,
            &format!("techsupport_{}", self.clock.stamp()),
            &["", ".tar.zst"],
        );
        let staging = self.techsupport_dir.join(&stem);
        fs::create_dir_all(&staging)?;

        for file in self.files.iter().filter(|f| f.exists()) {
            // procfs reports a zero size, so read the contents instead of copying
            match fs::read(file) {
                Ok(bytes) => {
                    let name = flatten(file);
                    if let Err(e) = fs::write(staging.join(&name), bytes) {
                        tracing::warn!("Failed to stage {}: {}", file.display(), e);
                    }
                }
                Err(e) => tracing::warn!("Failed to read {}: {}", file.display(), e),
            }
        }

        let latest = self.latest.lock().ok().and_then(|l| l.clone());
        if let Some(bundle) = latest {
            fs::write(
                staging.join("debug_data.json"),
                serde_json::to_string_pretty(&bundle)?,
            )?;
        }

        let archive = self
            .techsupport_dir
            .join(format!("{}.tar.zst", stem));
        match archive_dir(&staging, &archive) {
            Ok(()) => {
                if let Err(e) = fs::remove_dir_all(&staging) {
                    tracing::warn!("Failed to remove staging directory {}: {}", staging.display(), e);
                }
                tracing::info!("Techsupport bundle created: {}", archive.display());
                Ok(archive)
            }
            Err(e) => {
                tracing::warn!("{}; keeping {}", e, staging.display());
                let _ = fs::remove_file(&archive);
                Ok(staging)
            }
        }
    }

    /// Capture, write the bundle and build an archive, logging any failure
    pub fn collect(&self) -> Artifacts {
        let bundle = self.capture();

        let bundle_path = self
            .write_bundle(&bundle)
            .map_err(|e| tracing::error!("Failed to save debug data: {}", e))
            .ok();
        let techsupport = self
            .build_techsupport()
            .map_err(|e| tracing::error!("Failed to generate techsupport: {}", e))
            .ok();

        Artifacts {
            bundle: bundle_path,
            techsupport,
        }
    }
}

/// First of `base`, `base_2`, `base_3`, ... with no existing `<stem><suffix>` in `dir`
///
/// Collections within the same second must not overwrite each other.
fn unique_stem(dir: &Path, base: &str, suffixes: &[&str]) -> String {
    let taken = |stem: &str| suffixes.iter().any(|s| dir.join(format!("{}{}", stem, s)).exists());

    let mut stem = base.to_string();
    let mut n = 1;
    while taken(&stem) {
        n += 1;
        stem = format!("{}_{}", base, n);
    }
    stem
}

/// `/proc/net/dev` -> `proc_net_dev`
fn flatten(path: &Path) -> String {
    path.to_string_lossy().trim_start_matches('/').replace('/', "_")
}

/// Archive `dir` as `<dir name>/...` into a zstd compressed tarball
fn archive_dir(dir: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)
        .map_err(|e| Error::Archive(format!("Failed to create {}: {}", dest.display(), e)))?;

    let encoder = zstd::stream::Encoder::new(file, 3)
        .map_err(|e| Error::Archive(format!("Failed to create compressor: {}", e)))?;

    let mut builder = Builder::new(encoder);
    let prefix = dir
        .file_name()
        .ok_or_else(|| Error::Archive(format!("Invalid staging directory {}", dir.display())))?;

    builder
        .append_dir_all(prefix, dir)
        .map_err(|e| Error::Archive(format!("Failed to add files: {}", e)))?;

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::Archive(format!("Failed to finalize archive: {}", e)))?;

    encoder
        .finish()
        .map_err(|e| Error::Archive(format!("Failed to finish compression: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::diag::scripted::{Reply, ScriptedSource};
    use std::io::Read;

    fn collector(dir: &Path, source: ScriptedSource, files: Vec<PathBuf>) -> DiagnosticCollector {
        let config = Config {
            nic_interface: "eth4".into(),
            log_path: dir.join("logs"),
            techsupport_path: dir.join("techsupport"),
            techsupport_files: files,
            ..Default::default()
        };
        DiagnosticCollector::new(&config, Arc::new(source), Arc::new(ManualClock::new()))
    }

    fn archive_entries(path: &Path) -> BTreeMap<String, String> {
        let decoder = zstd::stream::Decoder::new(File::open(path).unwrap()).unwrap();
        let mut archive = tar::Archive::new(decoder);
        let mut entries = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut content = String::new();
            let _ = entry.read_to_string(&mut content);
            entries.insert(name, content);
        }
        entries
    }

    #[test]
    fn test_capture_records_every_command() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new()
            .on("uname", vec![Reply::ok("Linux host 6.1.0\n")])
            .on("lspci", vec![Reply::Unavailable]);
        let c = collector(dir.path(), source, vec![]);

        let bundle = c.capture();
        assert_eq!(bundle.len(), 11);
        assert_eq!(bundle["system_info"].stdout.as_deref(), Some("Linux host 6.1.0\n"));
        assert_eq!(bundle["system_info"].exit_code, Some(0));
        assert!(bundle["lspci"].error.is_some());
        assert!(bundle["lspci"].exit_code.is_none());
        assert!(bundle["ethtool"].command.starts_with("ethtool eth4 "));
    }

    #[test]
    fn test_write_bundle_json() {
        let dir = tempfile::tempdir().unwrap();
        let c = collector(dir.path(), ScriptedSource::new().on("free", vec![Reply::Timeout]), vec![]);

        let bundle = c.capture();
        let path = c.write_bundle(&bundle).unwrap();
        assert_eq!(path, dir.path().join("logs").join("debug_data_20240601_120000.json"));

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["disk_info"]["command"], "df -h");
        assert_eq!(json["disk_info"]["exit_code"], 0);
        assert!(json["memory_info"]["error"].as_str().unwrap().contains("timed out"));
        assert!(json["memory_info"].get("stdout").is_none());
    }

    #[test]
    fn test_techsupport_archive() {
        let dir = tempfile::tempdir().unwrap();
        let sysfile = dir.path().join("version");
        fs::write(&sysfile, "Linux version 6.1.0\n").unwrap();

        let c = collector(
            dir.path(),
            ScriptedSource::new(),
            vec![sysfile.clone(), dir.path().join("absent")],
        );
        c.capture();

        let archive = c.build_techsupport().unwrap();
        assert_eq!(archive.file_name().unwrap(), "techsupport_20240601_120000.tar.zst");
        assert!(archive.exists());
        // Staging directory is removed after archiving
        assert!(!dir.path().join("techsupport").join("techsupport_20240601_120000").exists());

        let entries = archive_entries(&archive);
        let staged = format!("techsupport_20240601_120000/{}", flatten(&sysfile));
        assert_eq!(entries.get(&staged).map(String::as_str), Some("Linux version 6.1.0\n"));
        assert!(entries.contains_key("techsupport_20240601_120000/debug_data.json"));
        assert!(!entries.keys().any(|k| k.ends_with("absent")));
    }

    #[test]
    fn test_collect_produces_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let c = collector(dir.path(), ScriptedSource::new(), vec![]);

        let artifacts = c.collect();
        assert!(artifacts.bundle.unwrap().exists());
        assert!(artifacts.techsupport.unwrap().exists());
    }

    #[test]
    fn test_collections_in_one_second_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let c = collector(dir.path(), ScriptedSource::new(), vec![]);

        let first = c.collect();
        let second = c.collect();
        assert_ne!(first.bundle, second.bundle);
        assert_ne!(first.techsupport, second.techsupport);

        let second_archive = second.techsupport.unwrap();
        assert_eq!(second_archive.file_name().unwrap(), "techsupport_20240601_120000_2.tar.zst");
        assert!(first.bundle.unwrap().exists());
        assert!(first.techsupport.unwrap().exists());
        assert!(archive_entries(&second_archive).contains_key("techsupport_20240601_120000_2/debug_data.json"));
    }

    #[test]
    fn test_flatten() {
        assert_eq!(flatten(Path::new("/proc/net/dev")), "proc_net_dev");
        assert_eq!(flatten(Path::new("/var/log/syslog")), "var_log_syslog");
    }
}
