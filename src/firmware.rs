//! Firmware image installation
//!
//! Provides:
//! - Image lookup and sanity checks
//! - Backup of the current firmware information
//! - SHA256 integrity verification against an optional `.sha256` sidecar
//! - Flashing through a configurable command template

use crate::clock::Clock;
use crate::diag::{self, DiagnosticSource};
use crate::error::{Error, Result};
use crate::manifest::Config;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What an installation did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub firmware: PathBuf,
    pub sha256: String,
    /// Whether a sidecar checksum was present and matched
    pub checksum_verified: bool,
    pub backup: Option<PathBuf>,
    /// False when no flash command is configured and the image was only staged
    pub flashed: bool,
}

/// Installs firmware images on the configured interface
pub struct FirmwareInstaller {
    source: Arc<dyn DiagnosticSource>,
    clock: Arc<dyn Clock>,
    interface: String,
    firmware_dir: PathBuf,
    backup_dir: PathBuf,
    flash_command: Option<String>,
    timeout: Duration,
}

impl FirmwareInstaller {
    pub fn new(config: &Config, source: Arc<dyn DiagnosticSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            interface: config.nic_interface.clone(),
            firmware_dir: config.firmware_path.clone(),
            backup_dir: config.backup_path.clone(),
            flash_command: config.flash_command.clone(),
            timeout: config.command_timeout(),
        }
    }

    /// Resolve an image argument, falling back to the firmware directory
    pub fn locate(&self, image: &Path) -> PathBuf {
        if image.exists() || image.is_absolute() {
            return image.to_path_buf();
        }
        let candidate = self.firmware_dir.join(image);
        if candidate.exists() {
            candidate
        } else {
            image.to_path_buf()
        }
    }

    /// Install `image`: existence, optional backup, integrity, flash
    pub fn install(&self, image: &Path, backup: bool) -> Result<InstallReport> {
        let firmware = self.locate(image);
        tracing::info!("Starting firmware installation: {}", firmware.display());

        let metadata = fs::metadata(&firmware).map_err(|_| {
            Error::InstallationFailure(format!("Firmware file not found: {}", firmware.display()))
        })?;
        if !metadata.is_file() {
            return Err(Error::InstallationFailure(format!(
                "Firmware path is not a file: {}",
                firmware.display()
            )));
        }
        if metadata.len() == 0 {
            return Err(Error::InstallationFailure(format!(
                "Firmware file is empty: {}",
                firmware.display()
            )));
        }

        let backup = if backup {
            tracing::info!("Backing up current firmware...");
            match self.backup_current() {
                Ok(path) => {
                    tracing::info!("Firmware backed up to: {}", path.display());
                    Some(path)
                }
                Err(e) => {
                    tracing::warn!("Firmware backup failed, continuing with installation: {}", e);
                    None
                }
            }
        } else {
            None
        };

        tracing::info!("Verifying firmware integrity...");
        let (sha256, checksum_verified) = verify_integrity(&firmware)?;

        let flashed = self.flash(&firmware)?;

        tracing::info!("Firmware installation completed successfully");
        Ok(InstallReport {
            firmware,
            sha256,
            checksum_verified,
            backup,
            flashed,
        })
    }

    /// Record the current firmware information under the backup directory
    fn backup_current(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.backup_dir)?;

        let command = format!("ethtool -i {}", self.interface);
        let output = self.source.run(&command, self.timeout)?;
        if !output.success() {
            return Err(Error::InstallationFailure(format!(
                "'{}' {}",
                command,
                output.summary()
            )));
        }

        let path = self
            .backup_dir
            .join(format!("firmware_backup_{}.txt", self.clock.stamp()));
        fs::write(&path, output.stdout)?;
        Ok(path)
    }

    fn flash(&self, firmware: &Path) -> Result<bool> {
        let Some(template) = &self.flash_command else {
            tracing::info!("No flash command configured; image verified and staged");
            return Ok(false);
        };

        let firmware_arg = firmware.display().to_string();
        let command = diag::render(
            template,
            &[("firmware", &firmware_arg), ("interface", &self.interface)],
        );
        tracing::info!("Installing firmware...");

        let output = self
            .source
            .run(&command, self.timeout)
            .map_err(|e| Error::InstallationFailure(format!("Flash command failed: {}", e)))?;

        if !output.success() {
            return Err(Error::InstallationFailure(format!(
                "Flash command {}: {}",
                output.summary(),
                output.stderr.trim()
            )));
        }

        Ok(true)
    }
}

/// Hash the image and compare it with `<image>.sha256` when present
///
/// Returns the digest and whether a sidecar confirmed it.
pub fn verify_integrity(firmware: &Path) -> Result<(String, bool)> {
    let actual = sha256_file(firmware).map_err(|e| {
        Error::VerificationFailure(format!("cannot hash {}: {}", firmware.display(), e))
    })?;

    let mut sidecar = firmware.as_os_str().to_owned();
    sidecar.push(".sha256");
    let sidecar = PathBuf::from(sidecar);

    if !sidecar.exists() {
        tracing::warn!("No checksum file for {}; recorded sha256 {}", firmware.display(), actual);
        return Ok((actual, false));
    }

    let content = fs::read_to_string(&sidecar).map_err(|e| {
        Error::VerificationFailure(format!("cannot read {}: {}", sidecar.display(), e))
    })?;
    let expected = content
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if expected != actual {
        return Err(Error::VerificationFailure(format!(
            "checksum mismatch for {}: expected {}, got {}",
            firmware.display(),
            expected,
            actual
        )));
    }

    tracing::info!("Firmware integrity verified");
    Ok((actual, true))
}

/// Compute SHA256 hash of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::diag::scripted::{Reply, ScriptedSource};

    const HELLO_SHA256: &str = "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447";

    fn installer(dir: &Path, source: ScriptedSource, flash: Option<&str>) -> FirmwareInstaller {
        let config = Config {
            firmware_path: dir.join("firmware"),
            backup_path: dir.join("backup"),
            flash_command: flash.map(str::to_string),
            ..Default::default()
        };
        FirmwareInstaller::new(&config, Arc::new(source), Arc::new(ManualClock::new()))
    }

    fn write_image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"hello world\n").unwrap();
        path
    }

    #[test]
    fn test_sha256_computation() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "fw.bin");
        assert_eq!(sha256_file(&image).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let inst = installer(dir.path(), ScriptedSource::new(), None);

        let err = inst.install(&dir.path().join("nope.bin"), true).unwrap_err();
        assert!(matches!(err, Error::InstallationFailure(msg) if msg.contains("not found")));
    }

    #[test]
    fn test_empty_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("empty.bin");
        fs::write(&image, b"").unwrap();
        let inst = installer(dir.path(), ScriptedSource::new(), None);

        assert!(matches!(inst.install(&image, false), Err(Error::InstallationFailure(_))));
    }

    #[test]
    fn test_install_with_backup_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "fw.bin");
        fs::write(dir.path().join("fw.bin.sha256"), format!("{}  fw.bin\n", HELLO_SHA256)).unwrap();
        let source = ScriptedSource::new().on("ethtool -i", vec![Reply::ok("driver: mlx5_core\nfirmware-version: 16.35\n")]);
        let inst = installer(dir.path(), source, None);

        let report = inst.install(&image, true).unwrap();
        assert!(report.checksum_verified);
        assert!(!report.flashed);
        assert_eq!(report.sha256, HELLO_SHA256);

        let backup = report.backup.unwrap();
        assert_eq!(
            backup.file_name().unwrap().to_str().unwrap(),
            "firmware_backup_20240601_120000.txt"
        );
        assert!(fs::read_to_string(backup).unwrap().contains("mlx5_core"));
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "fw.bin");
        fs::write(dir.path().join("fw.bin.sha256"), "deadbeef  fw.bin\n").unwrap();
        let inst = installer(dir.path(), ScriptedSource::new(), None);

        assert!(matches!(inst.install(&image, false), Err(Error::VerificationFailure(_))));
    }

    #[test]
    fn test_unreadable_sidecar_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "fw.bin");
        fs::create_dir(dir.path().join("fw.bin.sha256")).unwrap();
        let inst = installer(dir.path(), ScriptedSource::new(), None);

        let err = inst.install(&image, false).unwrap_err();
        assert!(matches!(err, Error::VerificationFailure(msg) if msg.contains("fw.bin.sha256")));
    }

    #[test]
    fn test_failed_backup_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "fw.bin");
        let source = ScriptedSource::new().on("ethtool -i", vec![Reply::exit(71)]);
        let inst = installer(dir.path(), source, None);

        let report = inst.install(&image, true).unwrap();
        assert!(report.backup.is_none());
        assert!(!report.checksum_verified);
    }

    #[test]
    fn test_flash_command() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "fw.bin");
        let source = Arc::new(ScriptedSource::new().on("flashtool", vec![Reply::ok("done"), Reply::exit(2)]));
        let config = Config {
            flash_command: Some("flashtool -d {interface} {firmware}".into()),
            ..Default::default()
        };
        let inst = FirmwareInstaller::new(&config, source.clone(), Arc::new(ManualClock::new()));

        assert!(inst.install(&image, false).unwrap().flashed);
        assert_eq!(
            source.calls().last().unwrap(),
            &format!("flashtool -d eth0 {}", image.display())
        );
        assert!(matches!(inst.install(&image, false), Err(Error::InstallationFailure(_))));
    }

    #[test]
    fn test_locate_in_firmware_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("firmware")).unwrap();
        write_image(&dir.path().join("firmware"), "nic_v2.bin");
        let inst = installer(dir.path(), ScriptedSource::new(), None);

        let found = inst.locate(Path::new("nic_v2.bin"));
        assert_eq!(found, dir.path().join("firmware").join("nic_v2.bin"));
    }
}
