//! Installation orchestration
//!
//! Sequences one automation run for a card:
//! pre-check, install, stabilize, post-verify, recovery of every classified
//! critical failure, outcome. Also exposes the individual operations behind
//! the `health`, `recover` and `recipe` commands.

pub mod state;

use crate::clock::{Clock, SystemClock};
use crate::diag::{DiagnosticSource, ShellSource};
use crate::error::{Error, Result};
use crate::firmware::{FirmwareInstaller, InstallReport};
use crate::lock::CardLock;
use crate::manifest::Config;
use crate::sickbay::catalog::{FailureType, RecoveryCatalog, Severity};
use crate::sickbay::checker::{self, HealthAggregator, HealthCheck, HealthProbe, HealthStatus, Tally};
use crate::sickbay::classify;
use crate::sickbay::probes;
use crate::sickbay::recovery::{CommandActuator, RecipeResult, RecoveryExecutor, StepActuator};
use crate::sink::{self, DiagnosticSink};
use crate::techsupport::DiagnosticCollector;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::json;
use state::{Event, Phase, RunMachine};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Final result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        *self == Outcome::Success
    }
}

/// What the installation step did
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed(InstallReport),
    Failed { error: String },
}

/// Result of handling one failure scenario
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub failure_type: FailureType,
    pub severity: Severity,
    pub recipe_id: String,
    pub result: RecipeResult,
    pub debug_bundle: Option<PathBuf>,
    pub techsupport: Option<PathBuf>,
}

/// Record of one automation run
#[derive(Debug, Clone, Serialize)]
pub struct AutomationRun {
    pub card_id: String,
    pub firmware: PathBuf,
    pub started: DateTime<Local>,
    pub pre_health: Vec<HealthCheck>,
    pub install: Option<InstallOutcome>,
    pub post_health: Vec<HealthCheck>,
    /// Critical checks with no failure type
    pub unclassified: Vec<String>,
    pub recoveries: Vec<RecoveryReport>,
    /// Unexpected error that aborted the run
    pub error: Option<String>,
    pub phase: Phase,
    pub outcome: Outcome,
}

impl AutomationRun {
    fn new(card_id: &str, firmware: &Path, started: DateTime<Local>) -> Self {
        Self {
            card_id: card_id.to_string(),
            firmware: firmware.to_path_buf(),
            started,
            pre_health: Vec::new(),
            install: None,
            post_health: Vec::new(),
            unclassified: Vec::new(),
            recoveries: Vec::new(),
            error: None,
            phase: Phase::Idle,
            outcome: Outcome::Failure,
        }
    }

    /// Failure types handled during the run, in order
    pub fn failures_handled(&self) -> Vec<FailureType> {
        self.recoveries.iter().map(|r| r.failure_type).collect()
    }
}

/// Injectable collaborators of the orchestrator
pub struct Components {
    pub source: Arc<dyn DiagnosticSource>,
    pub clock: Arc<dyn Clock>,
    pub probes: Vec<Box<dyn HealthProbe>>,
    pub actuator: Arc<dyn StepActuator>,
    pub sink: Arc<dyn DiagnosticSink>,
}

impl Components {
    /// Host-backed components described by the configuration
    pub fn system(config: &Config) -> Self {
        let source: Arc<dyn DiagnosticSource> = Arc::new(ShellSource);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        Self {
            probes: probes::builtin(config, source.clone(), clock.clone()),
            actuator: Arc::new(CommandActuator::new(
                source.clone(),
                config.recovery.step_commands.clone(),
                &config.nic_interface,
                config.command_timeout(),
            )),
            sink: Arc::from(sink::from_config(&config.sink, config.card_id())),
            source,
            clock,
        }
    }
}

/// Drives automation runs for one card
pub struct Orchestrator {
    card_id: String,
    lock_dir: PathBuf,
    settle: Duration,
    clock: Arc<dyn Clock>,
    catalog: Arc<RecoveryCatalog>,
    aggregator: HealthAggregator,
    executor: RecoveryExecutor,
    collector: DiagnosticCollector,
    installer: FirmwareInstaller,
    sink: Arc<dyn DiagnosticSink>,
}

impl Orchestrator {
    pub fn new(config: &Config, catalog: Arc<RecoveryCatalog>, components: Components) -> Result<Self> {
        let Components {
            source,
            clock,
            probes,
            actuator,
            sink,
        } = components;

        Ok(Self {
            card_id: config.card_id().to_string(),
            lock_dir: config.log_path.clone(),
            settle: config.settle_duration(),
            aggregator: HealthAggregator::new(probes, config.probe_workers, clock.clone())?,
            executor: RecoveryExecutor::new(catalog.clone(), actuator),
            collector: DiagnosticCollector::new(config, source.clone(), clock.clone()),
            installer: FirmwareInstaller::new(config, source, clock.clone()),
            catalog,
            clock,
            sink,
        })
    }

    pub fn catalog(&self) -> &RecoveryCatalog {
        &self.catalog
    }

    pub fn collector(&self) -> &DiagnosticCollector {
        &self.collector
    }

    /// Take the run lock for this card
    pub fn lock_card(&self) -> Result<CardLock> {
        CardLock::acquire(&self.lock_dir, &self.card_id)
    }

    /// Run one health pass and report it to the sink
    pub fn health(&self) -> Vec<HealthCheck> {
        let checks = self.aggregator.run_all();
        let tally = Tally::of(&checks);

        sink::notify(
            self.sink.as_ref(),
            "health_check",
            json!({
                "overall": checker::overall(&checks),
                "critical": tally.critical,
                "warning": tally.warning,
                "checks": checks,
            }),
        );
        checks
    }

    /// Run a recipe directly
    pub fn run_recipe(&self, recipe_id: &str) -> Result<RecipeResult> {
        self.executor.execute(recipe_id)
    }

    /// Handle a failure scenario: diagnostics, techsupport, recipe
    pub fn handle_failure(&self, failure_type: FailureType) -> Result<RecoveryReport> {
        let scenario = self.catalog.scenario_for(failure_type);
        tracing::error!("Handling failure scenario: {}", failure_type);
        tracing::info!("Failure description: {}", scenario.description);
        tracing::info!("Severity: {}", scenario.severity);

        let artifacts = self.collector.collect();
        if let Some(path) = &artifacts.techsupport {
            sink::notify(
                self.sink.as_ref(),
                "tech_support_generated",
                json!({ "path": path, "failure_type": failure_type }),
            );
        }

        sink::notify(
            self.sink.as_ref(),
            "failure_scenario",
            json!({
                "failure_type": failure_type,
                "severity": scenario.severity,
                "description": scenario.description,
                "recipe": scenario.recipe_id,
            }),
        );

        tracing::info!("Mitigation steps:");
        for (i, step) in scenario.mitigation_steps.iter().enumerate() {
            tracing::info!("  {}. {}", i + 1, step);
        }

        let result = self.executor.execute(&scenario.recipe_id)?;
        let event = if result.success {
            "recovery_complete"
        } else {
            "recovery_failed"
        };
        sink::notify(
            self.sink.as_ref(),
            event,
            json!({ "failure_type": failure_type, "result": result }),
        );

        Ok(RecoveryReport {
            failure_type,
            severity: scenario.severity,
            recipe_id: scenario.recipe_id.clone(),
            result,
            debug_bundle: artifacts.bundle,
            techsupport: artifacts.techsupport,
        })
    }

    /// Full automation run installing `firmware`
    ///
    /// Fails with `CardBusy` when another run holds the card; every other
    /// problem, including a panic inside a probe or actuator, is recorded in
    /// the returned run.
    pub fn install(&self, firmware: &Path, backup: bool) -> Result<AutomationRun> {
        let _lock = self.lock_card()?;
        tracing::info!("Starting NIC firmware automation for card {}", self.card_id);

        let mut run = AutomationRun::new(&self.card_id, firmware, self.clock.now());
        let mut machine = RunMachine::new();

        let driven = panic::catch_unwind(AssertUnwindSafe(|| {
            self.drive(&mut run, &mut machine, firmware, backup)
        }))
        .unwrap_or_else(|payload| Err(Error::RunAborted(panic_message(payload.as_ref()))));

        if let Err(e) = driven {
            tracing::error!("Unexpected error in automation: {}", e);
            run.error = Some(e.to_string());
            run.outcome = Outcome::Failure;
            match self.handle_failure(FailureType::BootFailure) {
                Ok(report) => run.recoveries.push(report),
                Err(e) => tracing::error!("Boot failure recovery could not run: {}", e),
            }
        }

        if !machine.is_done() {
            machine.handle(Event::Finish)?;
        }
        run.phase = machine.phase();

        let verdict = if run.outcome.is_success() { "SUCCESS" } else { "FAILURE" };
        tracing::info!("Automation completed: {}", verdict);
        sink::notify(
            self.sink.as_ref(),
            "automation_complete",
            json!({
                "success": run.outcome.is_success(),
                "firmware": run.firmware,
                "failures_handled": run.failures_handled(),
                "unclassified": run.unclassified,
            }),
        );

        Ok(run)
    }

    fn drive(&self, run: &mut AutomationRun, machine: &mut RunMachine, firmware: &Path, backup: bool) -> Result<()> {
        machine.handle(Event::Begin)?;
        tracing::info!("Running pre-installation health check");
        run.pre_health = self.health();

        machine.handle(Event::Install)?;
        sink::notify(
            self.sink.as_ref(),
            "firmware_install_start",
            json!({ "firmware": firmware, "backup": backup }),
        );

        match self.installer.install(firmware, backup) {
            Ok(report) => {
                sink::notify(
                    self.sink.as_ref(),
                    "firmware_install_complete",
                    json!({ "success": true, "sha256": report.sha256, "flashed": report.flashed }),
                );
                run.install = Some(InstallOutcome::Installed(report));
            }
            Err(e) => {
                tracing::error!("{}", e);
                sink::notify(
                    self.sink.as_ref(),
                    "firmware_install_complete",
                    json!({ "success": false, "error": e.to_string() }),
                );
                run.install = Some(InstallOutcome::Failed { error: e.to_string() });

                self.recover(run, machine, FailureType::FirmwareCorruption)?;
                run.outcome = Outcome::Failure;
                return machine.handle(Event::Finish).map(|_| ());
            }
        }

        machine.handle(Event::Settle)?;
        tracing::info!("Waiting {}s for firmware to stabilize", self.settle.as_secs());
        self.clock.sleep(self.settle);

        machine.handle(Event::Verify)?;
        tracing::info!("Running post-installation health check");
        run.post_health = self.health();

        for check in run.post_health.iter().filter(|c| c.status == HealthStatus::Warning) {
            tracing::warn!("Health warning in {}: {}", check.name, check.message);
        }

        let (failures, unclassified) = classify::critical_failures(&run.post_health);
        let unclassified: Vec<String> = unclassified.iter().map(|c| c.name.clone()).collect();
        for name in &unclassified {
            tracing::error!("Critical check '{}' has no recovery mapping", name);
        }

        let mut recovered = unclassified.is_empty();
        for failure_type in failures {
            recovered &= self.recover(run, machine, failure_type)?;
        }

        run.unclassified = unclassified;
        run.outcome = if recovered { Outcome::Success } else { Outcome::Failure };
        machine.handle(Event::Finish).map(|_| ())
    }

    /// Handle one scenario inside a run, tracking the phase
    fn recover(&self, run: &mut AutomationRun, machine: &mut RunMachine, failure_type: FailureType) -> Result<bool> {
        machine.handle(Event::Recover)?;
        let report = self.handle_failure(failure_type)?;
        let success = report.result.success;
        machine.handle(if success { Event::Succeed } else { Event::Fail })?;
        run.recoveries.push(report);
        Ok(success)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}
