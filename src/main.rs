//! nicfw - NIC firmware installation automation
//!
//! Installs firmware on a network interface card with health checks before
//! and after, classifies critical failures, and runs the matching recovery
//! recipe while capturing diagnostics for later analysis.

mod cli;
mod clock;
mod diag;
mod error;
mod firmware;
mod lock;
mod logging;
mod manifest;
mod orchestrator;
mod sickbay;
mod sink;
mod techsupport;

use clock::{Clock, SystemClock};
use cli::{Cli, Commands};
use error::Result;
use manifest::Config;
use orchestrator::{AutomationRun, Components, InstallOutcome, Orchestrator, RecoveryReport};
use sickbay::catalog::RecoveryCatalog;
use sickbay::checker::{self, HealthCheck, HealthStatus, Tally};
use sickbay::recovery::RecipeResult;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Loaded configuration and the orchestrator built from it
struct Session {
    config: Config,
    orch: Orchestrator,
    run_log: Option<PathBuf>,
}

impl Session {
    /// Load configuration, start logging and assemble the orchestrator
    ///
    /// `keep_log` writes a timestamped run log next to the console output.
    fn open(cli: &Cli, keep_log: bool) -> Result<Self> {
        let mut config = manifest::resolve(cli.config.as_deref())?;
        if cli.debug {
            config.debug_mode = true;
        }

        let stamp = SystemClock.stamp();
        let run_log = logging::init(&config, keep_log.then_some(stamp.as_str()));

        let catalog = Arc::new(RecoveryCatalog::builtin()?);
        let orch = Orchestrator::new(&config, catalog, Components::system(&config))?;
        Ok(Self { config, orch, run_log })
    }
}

/// Execute the requested command; `Ok(false)` means it ran but did not succeed
fn run() -> Result<bool> {
    let cli = Cli::parse_args();

    match &cli.command {
        Commands::Completion { shell } => {
            Cli::generate_completion(*shell);
            Ok(true)
        }

        Commands::Scenarios { json } => {
            let catalog = RecoveryCatalog::builtin()?;
            print_scenarios(&catalog, *json)?;
            Ok(true)
        }

        Commands::Install {
            firmware,
            backup,
            no_backup,
        } => {
            let session = Session::open(&cli, true)?;
            let run = session.orch.install(firmware, *backup || !*no_backup)?;
            print_run(&run, session.run_log.as_ref());
            Ok(run.outcome.is_success())
        }

        Commands::Health {
            json,
            watch,
            interval,
        } => {
            let Session { config, orch, .. } = Session::open(&cli, false)?;
            let interval = Duration::from_secs(interval.unwrap_or(config.health_check_interval).max(1));

            loop {
                let checks = orch.health();
                let overall = checker::overall(&checks);

                if *json {
                    let report = serde_json::json!({
                        "interface": config.nic_interface,
                        "overall": overall,
                        "checks": checks,
                    });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_checks(&checks);
                }

                if !*watch {
                    return Ok(overall != HealthStatus::Critical);
                }

                std::thread::sleep(interval);
                if !*json {
                    println!();
                }
            }
        }

        Commands::Recover { failure_type } => {
            let failure_type = failure_type.parse()?;
            let session = Session::open(&cli, true)?;
            let _lock = session.orch.lock_card()?;
            let report = session.orch.handle_failure(failure_type)?;
            print_recovery(&report);
            Ok(report.result.success)
        }

        Commands::Recipe { recipe } => {
            let session = Session::open(&cli, true)?;
            let _lock = session.orch.lock_card()?;
            let result = session.orch.run_recipe(recipe)?;
            println!("Recipe {}: {}", recipe, result_label(&result));
            Ok(result.success)
        }

        Commands::Debug { output } => {
            let session = Session::open(&cli, true)?;
            let collector = session.orch.collector();
            let bundle = collector.capture();
            let bundle_path = collector.write_bundle(&bundle)?;
            let techsupport = collector.build_techsupport()?;

            println!("Debug data:   {}", bundle_path.display());
            println!("Techsupport:  {}", techsupport.display());

            if let Some(output) = output {
                std::fs::write(output, serde_json::to_string_pretty(&bundle)?)?;
                println!("Written to:   {}", output.display());
            }
            Ok(true)
        }

        Commands::Status => {
            let session = Session::open(&cli, false)?;
            print_status(&session.config, &session.orch);
            Ok(true)
        }
    }
}

/// Status text padded to `width` before it is colored
fn status_cell(status: HealthStatus, width: usize) -> String {
    let text = format!("{:<width$}", status.to_string(), width = width);
    let color = match status {
        HealthStatus::Healthy => "32",
        HealthStatus::Warning => "33",
        HealthStatus::Critical => "31",
        HealthStatus::Unknown => return text,
    };
    format!("\x1b[{}m{}\x1b[0m", color, text)
}

fn result_label(result: &RecipeResult) -> String {
    if result.success {
        format!("\x1b[32mcompleted\x1b[0m ({} steps)", result.steps_completed)
    } else {
        format!(
            "\x1b[31mfailed\x1b[0m at step {}: {}",
            result.failed_step_index.unwrap_or_default(),
            result.failed_step_name.as_deref().unwrap_or("?")
        )
    }
}

fn print_checks(checks: &[HealthCheck]) {
    println!("{:<16} {:<12} {}", "CHECK", "STATUS", "MESSAGE");
    println!("{}", "-".repeat(64));
    for check in checks {
        println!(
            "{:<16} {} {}",
            check.name,
            status_cell(check.status, 12),
            check.message
        );
    }

    let tally = Tally::of(checks);
    println!(
        "\nOverall: {} ({} critical, {} warnings)",
        status_cell(checker::overall(checks), 0),
        tally.critical,
        tally.warning
    );
}

fn print_recovery(report: &RecoveryReport) {
    println!(
        "Scenario {} ({}): recipe {} {}",
        report.failure_type,
        report.severity,
        report.recipe_id,
        result_label(&report.result)
    );
    if let Some(path) = &report.debug_bundle {
        println!("  Debug data:  {}", path.display());
    }
    if let Some(path) = &report.techsupport {
        println!("  Techsupport: {}", path.display());
    }
}

fn print_run(run: &AutomationRun, run_log: Option<&PathBuf>) {
    println!("\nAutomation run for {}", run.card_id);
    println!("  Firmware:  {}", run.firmware.display());

    match &run.install {
        Some(InstallOutcome::Installed(report)) => {
            let short = &report.sha256[..report.sha256.len().min(12)];
            let mode = if report.flashed { "flashed" } else { "staged" };
            println!("  Install:   ok, {} (sha256 {}...)", mode, short);
        }
        Some(InstallOutcome::Failed { error }) => println!("  Install:   {}", error),
        None => println!("  Install:   not attempted"),
    }

    if !run.post_health.is_empty() {
        println!("  Health:    {}", status_cell(checker::overall(&run.post_health), 0));
    }
    for report in &run.recoveries {
        print!("  ");
        print_recovery(report);
    }
    for name in &run.unclassified {
        println!("  Unhandled: critical check '{}'", name);
    }
    if let Some(error) = &run.error {
        println!("  Error:     {}", error);
    }
    if let Some(path) = run_log {
        println!("  Log:       {}", path.display());
    }

    let verdict = if run.outcome.is_success() {
        "\x1b[32mSUCCESS\x1b[0m"
    } else {
        "\x1b[31mFAILURE\x1b[0m"
    };
    println!("\nResult: {}", verdict);
}

fn print_scenarios(catalog: &RecoveryCatalog, json: bool) -> Result<()> {
    if json {
        let scenarios: Vec<_> = catalog
            .scenarios()
            .iter()
            .map(|s| {
                let steps = catalog.recipe_for(&s.recipe_id).map(|r| r.steps.clone())?;
                Ok(serde_json::json!({
                    "failure_type": s.failure_type,
                    "description": s.description,
                    "severity": s.severity,
                    "mitigation_steps": s.mitigation_steps,
                    "recipe": s.recipe_id,
                    "recipe_steps": steps,
                }))
            })
            .collect::<Result<_>>()?;
        println!("{}", serde_json::to_string_pretty(&scenarios)?);
        return Ok(());
    }

    println!("{:<22} {:<10} {:<30} {}", "FAILURE TYPE", "SEVERITY", "RECIPE", "DESCRIPTION");
    println!("{}", "-".repeat(100));
    for s in catalog.scenarios() {
        println!(
            "{:<22} {:<10} {:<30} {}",
            s.failure_type.as_str(),
            s.severity.to_string(),
            s.recipe_id,
            s.description
        );
    }
    Ok(())
}

fn print_status(config: &Config, orch: &Orchestrator) {
    let or_none = |value: Option<&str>, none: &str| value.unwrap_or(none).to_string();

    println!("Configuration");
    let rows = [
        ("nic_interface", config.nic_interface.clone()),
        ("card_id", config.card_id().to_string()),
        ("firmware_path", config.firmware_path.display().to_string()),
        ("backup_path", config.backup_path.display().to_string()),
        ("log_path", config.log_path.display().to_string()),
        ("techsupport_path", config.techsupport_path.display().to_string()),
        ("cli_timeout", format!("{}s", config.cli_timeout)),
        ("health_check_interval", format!("{}s", config.health_check_interval)),
        ("settle_delay", format!("{}s", config.settle_delay)),
        ("max_recovery_attempts", config.max_recovery_attempts.to_string()),
        ("probe_workers", config.probe_workers.to_string()),
        ("debug_mode", config.debug_mode.to_string()),
        ("flash_command", or_none(config.flash_command.as_deref(), "none (verify and stage)")),
        ("sink", or_none(config.sink.url.as_deref(), "disabled")),
        ("step_commands", config.recovery.step_commands.len().to_string()),
    ];
    for (key, value) in rows {
        println!("  {:<24} {}", key, value);
    }

    println!("\nRecent runs");
    let logs = logging::recent_logs(&config.log_path, 5);
    if logs.is_empty() {
        println!("  (none)");
    }
    for log in logs {
        println!("  {}", log.display());
    }

    println!("\nHealth snapshot");
    let checks = orch.health();
    print_checks(&checks);
    println!("\n{} scenarios in catalog", orch.catalog().scenarios().len());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visible(cell: &str) -> String {
        let mut out = String::new();
        let mut chars = cell.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                chars.by_ref().find(|&c| c == 'm');
            } else {
                out.push(c);
            }
        }
        out
    }

    #[test]
    fn test_status_cells_share_a_width() {
        for status in [
            HealthStatus::Unknown,
            HealthStatus::Healthy,
            HealthStatus::Warning,
            HealthStatus::Critical,
        ] {
            let cell = status_cell(status, 12);
            assert_eq!(visible(&cell).len(), 12, "{}", status);
            assert!(visible(&cell).starts_with(&status.to_string()));
        }
        assert_eq!(status_cell(HealthStatus::Critical, 0), "\x1b[31mcritical\x1b[0m");
    }
}
