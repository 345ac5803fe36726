//! Unified error types for nicfw

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for nicfw operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Probe errors
    #[error("Command '{command}' timed out after {seconds} seconds")]
    ProbeTimeout { command: String, seconds: u64 },

    #[error("Command '{command}' could not be executed: {message}")]
    ProbeExecutionError { command: String, message: String },

    // Catalog errors
    #[error("Unknown failure type '{0}'")]
    UnknownFailureType(String),

    #[error("Unknown recovery recipe '{0}'")]
    UnknownRecipe(String),

    #[error("Recovery catalog is inconsistent: {0}")]
    CatalogIntegrity(String),

    #[error("Recovery step {index} of '{recipe}' failed: {step}")]
    RecoveryStepFailure {
        recipe: String,
        index: usize,
        step: String,
    },

    // Installation errors
    #[error("Firmware installation failed: {0}")]
    InstallationFailure(String),

    #[error("Firmware verification failed: {0}")]
    VerificationFailure(String),

    // Run control
    #[error("Card '{0}' already has an automation run in progress")]
    CardBusy(String),

    #[error("Automation run aborted: {0}")]
    RunAborted(String),

    #[error("Invalid phase transition: {event} from {from}")]
    InvalidTransition { event: String, from: String },

    // Artifacts
    #[error("Failed to build techsupport archive: {0}")]
    Archive(String),

    #[error("Diagnostic sink unavailable: {0}")]
    SinkUnavailable(String),
}

/// Result type alias for nicfw operations
pub type Result<T> = std::result::Result<T, Error>;
