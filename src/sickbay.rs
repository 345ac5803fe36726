//! NIC health assessment and recovery
//!
//! Provides:
//! - Health check definitions and concurrent aggregation
//! - The built-in interrupt, core dump, alert, event and anomaly probes
//! - Failure classification and the scenario/recipe catalog
//! - Sequential recovery recipe execution

pub mod catalog;
pub mod checker;
pub mod classify;
pub mod probes;
pub mod recovery;

pub use catalog::{FailureType, RecoveryCatalog};
pub use checker::{HealthAggregator, HealthCheck, HealthStatus};
pub use recovery::{RecipeResult, RecoveryExecutor};
