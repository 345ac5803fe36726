//! Configuration file parsing for nicfw
//!
//! Parses `nicfw.toml` configuration files using serde. Every key is optional
//! and falls back to the defaults below.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "nicfw.toml";

/// System files collected into techsupport archives by default
pub const TECHSUPPORT_FILES: [&str; 8] = [
    "/proc/version",
    "/proc/cpuinfo",
    "/proc/meminfo",
    "/proc/interrupts",
    "/proc/net/dev",
    "/var/log/messages",
    "/var/log/syslog",
    "/var/log/dmesg",
];

/// Load configuration from a file
pub fn load(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: Config = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Resolve the configuration for a CLI invocation
///
/// An explicitly requested file must exist. Without one, `nicfw.toml` in the
/// working directory is used when present, otherwise the built-in defaults.
pub fn resolve(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load(path),
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_FILE);
            if fallback.exists() {
                load(fallback)
            } else {
                Ok(Config::default())
            }
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network interface of the card under management
    pub nic_interface: String,

    /// Card identifier used for run locking (defaults to the interface name)
    pub card_id: Option<String>,

    /// Directory holding firmware images
    pub firmware_path: PathBuf,

    /// Directory receiving firmware backups
    pub backup_path: PathBuf,

    /// Directory for run logs, debug bundles and lock files
    pub log_path: PathBuf,

    /// Timeout for each external command in seconds
    pub cli_timeout: u64,

    /// Seconds between health passes in watch mode
    pub health_check_interval: u64,

    /// Upper bound on recovery attempts per failure type
    pub max_recovery_attempts: u32,

    /// Verbose logging to the console
    pub debug_mode: bool,

    /// Directory receiving techsupport archives
    pub techsupport_path: PathBuf,

    /// System files copied into techsupport archives when present
    pub techsupport_files: Vec<PathBuf>,

    /// Seconds to wait after flashing before verification
    pub settle_delay: u64,

    /// Worker threads used to run health probes
    pub probe_workers: usize,

    /// Seconds between the two interrupt counter samples
    pub interrupt_sample_window: u64,

    /// Flash command template (`{firmware}` and `{interface}` are substituted)
    pub flash_command: Option<String>,

    /// External log store
    pub sink: SinkConfig,

    /// Recovery actuator settings
    pub recovery: RecoveryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nic_interface: "eth0".into(),
            card_id: None,
            firmware_path: PathBuf::from("./firmware/"),
            backup_path: PathBuf::from("./firmware/backup/"),
            log_path: PathBuf::from("./logs/nic_automation/"),
            cli_timeout: 30,
            health_check_interval: 5,
            max_recovery_attempts: 3,
            debug_mode: true,
            techsupport_path: PathBuf::from("./logs/techsupport/"),
            techsupport_files: TECHSUPPORT_FILES.iter().map(PathBuf::from).collect(),
            settle_delay: 5,
            probe_workers: 5,
            interrupt_sample_window: 1,
            flash_command: None,
            sink: SinkConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.nic_interface.trim().is_empty() {
            return Err(Error::ConfigValidation(
                "nic_interface must not be empty".into(),
            ));
        }

        if self.cli_timeout == 0 {
            return Err(Error::ConfigValidation(
                "cli_timeout must be at least 1 second".into(),
            ));
        }

        if self.probe_workers == 0 {
            return Err(Error::ConfigValidation(
                "probe_workers must be at least 1".into(),
            ));
        }

        if self.max_recovery_attempts == 0 {
            return Err(Error::ConfigValidation(
                "max_recovery_attempts must be at least 1".into(),
            ));
        }

        if let Some(cmd) = &self.flash_command {
            if !cmd.contains("{firmware}") {
                return Err(Error::ConfigValidation(
                    "flash_command must reference {firmware}".into(),
                ));
            }
        }

        Ok(())
    }

    /// Identifier used to serialize runs against the same card
    pub fn card_id(&self) -> &str {
        self.card_id.as_deref().unwrap_or(&self.nic_interface)
    }

    /// Per-command timeout as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_timeout)
    }

    /// Settle delay as Duration
    pub fn settle_duration(&self) -> Duration {
        Duration::from_secs(self.settle_delay)
    }
}

/// Diagnostic sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Base URL of an Elasticsearch-compatible store (disabled when unset)
    pub url: Option<String>,

    /// Index name prefix; the date is appended per event
    pub index_prefix: String,

    /// Request timeout in seconds
    pub timeout: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: None,
            index_prefix: "nic-firmware".into(),
            timeout: 5,
        }
    }
}

/// Recovery actuator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Shell command performing a recipe step, keyed by step description
    pub step_commands: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.nic_interface, "eth0");
        assert_eq!(config.cli_timeout, 30);
        assert_eq!(config.health_check_interval, 5);
        assert_eq!(config.max_recovery_attempts, 3);
        assert!(config.debug_mode);
        assert_eq!(config.card_id(), "eth0");
        assert!(config.sink.url.is_none());
        assert_eq!(config.techsupport_files.len(), 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_overrides() {
        let toml = r#"
nic_interface = "ens1f0"
card_id = "slot-3"
cli_timeout = 10
debug_mode = false
flash_command = "flashtool -i {interface} {firmware}"

[sink]
url = "http://localhost:9200"

[recovery.step_commands]
"Reset network interface" = "ip link set ens1f0 down && ip link set ens1f0 up"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.nic_interface, "ens1f0");
        assert_eq!(config.card_id(), "slot-3");
        assert_eq!(config.command_timeout(), Duration::from_secs(10));
        assert!(!config.debug_mode);
        assert_eq!(config.sink.url.as_deref(), Some("http://localhost:9200"));
        assert_eq!(config.sink.index_prefix, "nic-firmware");
        assert_eq!(config.recovery.step_commands.len(), 1);
        // Untouched keys keep their defaults
        assert_eq!(config.settle_delay, 5);
    }

    #[test]
    fn test_validation_errors() {
        let config = Config {
            cli_timeout: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigValidation(_))
        ));

        let config = Config {
            flash_command: Some("flashtool {interface}".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            nic_interface: " ".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/nicfw.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nicfw.toml");
        fs::write(&path, "nic_interface = \"eth7\"\nprobe_workers = 2\n").unwrap();

        let config = resolve(Some(&path)).unwrap();
        assert_eq!(config.nic_interface, "eth7");
        assert_eq!(config.probe_workers, 2);
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "cli_timeout = \"soon\"\n").unwrap();
        assert!(matches!(load(&path), Err(Error::ConfigParse(_))));
    }
}
