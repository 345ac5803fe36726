//! Health check definitions and aggregation
//!
//! A `HealthProbe` produces one reading; the `HealthAggregator` runs every
//! registered probe on a small worker pool, waits for all of them, and turns
//! the readings into timestamped `HealthCheck` results.

use crate::clock::Clock;
use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use crossbeam::channel;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Health status of a single check, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Probe could not tell
    Unknown,
    /// Nothing wrong observed
    Healthy,
    /// Degraded but not blocking
    Warning,
    /// Requires recovery
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Ordered key/value details attached to a check
pub type Details = Vec<(String, String)>;

/// What a probe observed, before it is stamped into a `HealthCheck`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub status: HealthStatus,
    pub message: String,
    pub details: Details,
}

impl Reading {
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Healthy, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Warning, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Critical, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unknown, message)
    }

    /// Append a detail entry
    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.push((key.to_string(), value.to_string()));
        self
    }
}

/// Result of one named check in one health pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub details: Details,
    pub timestamp: DateTime<Local>,
}

impl HealthCheck {
    pub fn new(name: impl Into<String>, reading: Reading, timestamp: DateTime<Local>) -> Self {
        Self {
            name: name.into(),
            status: reading.status,
            message: reading.message,
            details: reading.details,
            timestamp,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.status == HealthStatus::Critical
    }

    /// Look up a detail value by key
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A read-only diagnostic producing one reading for a named check
pub trait HealthProbe: Send + Sync {
    /// Check name, unique within an aggregator
    fn name(&self) -> &str;

    /// Take one reading
    fn probe(&self) -> Result<Reading>;
}

/// Worst status across a set of checks (`Unknown` when empty)
pub fn overall(checks: &[HealthCheck]) -> HealthStatus {
    checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Unknown)
}

/// Per-status counts for a health pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub healthy: usize,
    pub warning: usize,
    pub critical: usize,
    pub unknown: usize,
}

impl Tally {
    pub fn of(checks: &[HealthCheck]) -> Self {
        checks.iter().fold(Self::default(), |mut t, c| {
            match c.status {
                HealthStatus::Healthy => t.healthy += 1,
                HealthStatus::Warning => t.warning += 1,
                HealthStatus::Critical => t.critical += 1,
                HealthStatus::Unknown => t.unknown += 1,
            }
            t
        })
    }
}

/// Runs a fixed set of probes and collects their results
pub struct HealthAggregator {
    probes: Vec<Box<dyn HealthProbe>>,
    workers: usize,
    clock: Arc<dyn Clock>,
}

impl HealthAggregator {
    /// Create an aggregator; probe names must be unique
    pub fn new(probes: Vec<Box<dyn HealthProbe>>, workers: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut names = HashSet::new();
        for probe in &probes {
            if !names.insert(probe.name().to_string()) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate health check name: {}",
                    probe.name()
                )));
            }
        }

        Ok(Self {
            probes,
            workers: workers.max(1),
            clock,
        })
    }

    /// Registered check names in execution order
    pub fn names(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    /// Run every probe and return one check per probe, in registration order
    ///
    /// Probes run concurrently on up to `workers` threads; this returns only
    /// after all of them have reported.
    pub fn run_all(&self) -> Vec<HealthCheck> {
        tracing::info!("Starting comprehensive health check ({} probes)", self.probes.len());

        let count = self.probes.len();
        let (job_tx, job_rx) = channel::unbounded::<usize>();
        let (result_tx, result_rx) = channel::unbounded::<(usize, HealthCheck)>();

        for idx in 0..count {
            // Receiver is alive until the scope below ends
            let _ = job_tx.send(idx);
        }
        drop(job_tx);

        let workers = self.workers.min(count.max(1));
        let joined = crossbeam::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                s.spawn(move |_| {
                    while let Ok(idx) = job_rx.recv() {
                        let check = self.observe(self.probes[idx].as_ref());
                        let _ = result_tx.send((idx, check));
                    }
                });
            }
        });
        drop(result_tx);

        if joined.is_err() {
            tracing::error!("Health probe worker terminated abnormally");
        }

        let mut slots: Vec<Option<HealthCheck>> = vec![None; count];
        for (idx, check) in result_rx.iter() {
            slots[idx] = Some(check);
        }

        let checks: Vec<HealthCheck> = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    HealthCheck::new(
                        self.probes[idx].name(),
                        Reading::critical("Probe did not report a result"),
                        self.clock.now(),
                    )
                })
            })
            .collect();

        let tally = Tally::of(&checks);
        tracing::info!(
            "Health check completed: {} critical, {} warnings",
            tally.critical,
            tally.warning
        );

        checks
    }

    /// Run a single probe, containing its errors and panics
    fn observe(&self, probe: &dyn HealthProbe) -> HealthCheck {
        let name = probe.name();
        tracing::debug!(check = name, "running probe");

        let reading = match panic::catch_unwind(AssertUnwindSafe(|| probe.probe())) {
            Ok(Ok(reading)) => reading,
            Ok(Err(e @ Error::ProbeTimeout { .. })) => {
                tracing::warn!(check = name, "probe timed out: {}", e);
                Reading::unknown(format!("Probe timed out: {}", e))
            }
            Ok(Err(e)) => {
                tracing::error!(check = name, "probe failed: {}", e);
                Reading::critical(format!("Probe failed: {}", e))
            }
            Err(_) => {
                tracing::error!(check = name, "probe panicked");
                Reading::critical("Probe panicked")
            }
        };

        tracing::debug!(check = name, status = %reading.status, "{}", reading.message);
        HealthCheck::new(name, reading, self.clock.now())
    }
}
