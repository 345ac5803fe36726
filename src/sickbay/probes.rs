//! Built-in NIC health probes
//!
//! Each probe runs one read-only command through the diagnostic source and
//! hands the output to a pure `evaluate` function, so the thresholds can be
//! tested without a host.

use super::checker::{HealthProbe, Reading};
use crate::clock::Clock;
use crate::diag::DiagnosticSource;
use crate::error::Result;
use crate::manifest::Config;
use std::sync::Arc;
use std::time::Duration;

pub const INTERRUPT_RATE_CRITICAL: u64 = 40_000;
pub const INTERRUPT_RATE_WARNING: u64 = 10_000;

/// Core files younger than this are treated as a fresh crash
pub const RECENT_CORE_SECS: i64 = 3600;

const CRITICAL_ALERT_KEYWORDS: [&str; 5] = ["fault", "fail", "error", "mismatch", "crit"];
const EVENT_ERROR_KEYWORDS: [&str; 3] = ["fail", "error", "timeout"];
const EVENT_FIRMWARE_KEYWORDS: [&str; 2] = ["firmware", "reset"];

pub const ERRORS_CRITICAL: u64 = 1000;
pub const DROPS_CRITICAL: u64 = 5000;
pub const ERRORS_WARNING: u64 = 50;
pub const DROPS_WARNING: u64 = 100;

/// The five standard probes, in reporting order
pub fn builtin(
    config: &Config,
    source: Arc<dyn DiagnosticSource>,
    clock: Arc<dyn Clock>,
) -> Vec<Box<dyn HealthProbe>> {
    let iface = config.nic_interface.clone();
    let timeout = config.command_timeout();

    vec![
        Box::new(InterruptProbe {
            source: source.clone(),
            clock: clock.clone(),
            interface: iface.clone(),
            window: Duration::from_secs(config.interrupt_sample_window.max(1)),
            timeout,
        }),
        Box::new(CoreProbe {
            source: source.clone(),
            clock,
            timeout,
        }),
        Box::new(AlertProbe {
            source: source.clone(),
            interface: iface.clone(),
            timeout,
        }),
        Box::new(EventProbe {
            source: source.clone(),
            interface: iface.clone(),
            timeout,
        }),
        Box::new(AnomalyProbe {
            source,
            interface: iface,
            timeout,
        }),
    ]
}

fn contains_any(line: &str, keywords: &[&str]) -> bool {
    let lower = line.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// Whether `interface` appears in `line` as a whole word (`eth1` never matches `eth10`)
fn mentions(line: &str, interface: &str) -> bool {
    let line = line.to_lowercase();
    let interface = interface.to_lowercase();
    if interface.is_empty() {
        return false;
    }

    line.match_indices(&interface).any(|(at, _)| {
        let before = line[..at].chars().next_back();
        let after = line[at + interface.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn preview(lines: &[&str], limit: usize) -> String {
    lines
        .iter()
        .take(limit)
        .map(|l| l.trim())
        .collect::<Vec<_>>()
        .join(" | ")
}

// Interrupts

/// Interrupt counters for one interface, summed over its IRQ lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterruptSample {
    /// Per-CPU totals
    pub per_cpu: Vec<u64>,
}

impl InterruptSample {
    pub fn total(&self) -> u64 {
        self.per_cpu.iter().sum()
    }
}

/// Parse `/proc/interrupts`, keeping rows whose name mentions `interface`
///
/// Returns `None` when no row matches.
pub fn parse_interrupts(text: &str, interface: &str) -> Option<InterruptSample> {
    let mut lines = text.lines();
    let cpus = lines
        .next()
        .map(|header| header.split_whitespace().filter(|t| t.starts_with("CPU")).count())
        .unwrap_or(0);

    let mut sample = InterruptSample {
        per_cpu: vec![0; cpus],
    };
    let mut matched = false;

    for line in lines.filter(|l| mentions(l, interface)) {
        let Some((_, counters)) = line.split_once(':') else {
            continue;
        };
        matched = true;
        for (cpu, token) in counters.split_whitespace().take(cpus).enumerate() {
            match token.parse::<u64>() {
                Ok(count) => sample.per_cpu[cpu] += count,
                Err(_) => break,
            }
        }
    }

    matched.then_some(sample)
}

/// Grade the interrupt rate between two samples taken `window_secs` apart
pub fn evaluate_interrupts(before: &InterruptSample, after: &InterruptSample, window_secs: u64) -> Reading {
    let window_secs = window_secs.max(1);
    let rate = after.total().saturating_sub(before.total()) / window_secs;

    let busy: Vec<String> = after
        .per_cpu
        .iter()
        .zip(before.per_cpu.iter().chain(std::iter::repeat(&0)))
        .enumerate()
        .filter(|(_, (a, b))| a > b)
        .map(|(cpu, _)| cpu.to_string())
        .collect();

    let reading = if rate >= INTERRUPT_RATE_CRITICAL {
        Reading::critical(format!("Interrupt storm detected: {}/sec", rate))
    } else if rate >= INTERRUPT_RATE_WARNING {
        Reading::warning(format!("High interrupt rate detected: {}/sec", rate))
    } else {
        Reading::healthy(format!("Interrupt rate normal: {}/sec", rate))
    };

    reading
        .with_detail("interrupt_rate", format!("{}/sec", rate))
        .with_detail("affected_cores", if busy.is_empty() { "none".to_string() } else { busy.join(",") })
        .with_detail("sample_window", format!("{}s", window_secs))
}

struct InterruptProbe {
    source: Arc<dyn DiagnosticSource>,
    clock: Arc<dyn Clock>,
    interface: String,
    window: Duration,
    timeout: Duration,
}

impl InterruptProbe {
    fn sample(&self) -> Result<Option<InterruptSample>> {
        let output = self.source.run("cat /proc/interrupts", self.timeout)?;
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_interrupts(&output.stdout, &self.interface))
    }
}

impl HealthProbe for InterruptProbe {
    fn name(&self) -> &str {
        "interrupt_check"
    }

    fn probe(&self) -> Result<Reading> {
        let Some(before) = self.sample()? else {
            return Ok(Reading::unknown(format!(
                "No interrupt counters found for {}",
                self.interface
            )));
        };
        self.clock.sleep(self.window);
        let after = self.sample()?.unwrap_or_default();

        Ok(evaluate_interrupts(&before, &after, self.window.as_secs()))
    }
}

// Core dumps

/// Grade `find -printf '%T@ %p\n'` output against the current Unix time
pub fn evaluate_cores(listing: &str, now_epoch: i64) -> Reading {
    let mut cores: Vec<(i64, &str)> = listing
        .lines()
        .filter_map(|line| {
            let (mtime, path) = line.trim().split_once(' ')?;
            let secs = mtime.split('.').next()?.parse::<i64>().ok()?;
            Some((secs, path))
        })
        .collect();

    if cores.is_empty() {
        return Reading::healthy("No core dumps found");
    }

    cores.sort_by(|a, b| b.0.cmp(&a.0));
    let (newest, newest_path) = cores[0];
    let age = now_epoch - newest;
    let paths: Vec<&str> = cores.iter().map(|(_, p)| *p).collect();

    let reading = if age <= RECENT_CORE_SECS {
        Reading::critical(format!("Recent core dump detected: {}", newest_path))
    } else {
        Reading::warning(format!("{} old core dump(s) present", cores.len()))
    };

    reading
        .with_detail("core_count", cores.len())
        .with_detail("latest_core", newest_path)
        .with_detail("latest_core_age", format!("{}s", age.max(0)))
        .with_detail("core_files", preview(&paths, 5))
}

struct CoreProbe {
    source: Arc<dyn DiagnosticSource>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl HealthProbe for CoreProbe {
    fn name(&self) -> &str {
        "core_check"
    }

    fn probe(&self) -> Result<Reading> {
        // find exits non-zero when a search root is missing; the listing is still valid
        let output = self.source.run(
            "find /var/crash /tmp -maxdepth 1 -name 'core*' -type f -printf '%T@ %p\\n' 2>/dev/null",
            self.timeout,
        )?;
        Ok(evaluate_cores(&output.stdout, self.clock.now().timestamp()))
    }
}

// System alerts

/// Grade journal lines already filtered to the interface
pub fn evaluate_alerts(journal: &str, interface: &str) -> Reading {
    let lines: Vec<&str> = journal
        .lines()
        .filter(|l| !l.trim().is_empty() && mentions(l, interface))
        .collect();

    let (critical, other): (Vec<&str>, Vec<&str>) = lines
        .iter()
        .copied()
        .partition(|l| contains_any(l, &CRITICAL_ALERT_KEYWORDS));

    let reading = if !critical.is_empty() {
        Reading::critical(format!("{} critical alert(s) for {}", critical.len(), interface))
            .with_detail("critical_alerts", preview(&critical, 3))
    } else if !other.is_empty() {
        Reading::warning(format!("{} warning alert(s) for {}", other.len(), interface))
            .with_detail("warning_alerts", preview(&other, 3))
    } else {
        Reading::healthy("No system alerts in the last hour")
    };

    reading.with_detail("alert_count", lines.len())
}

struct AlertProbe {
    source: Arc<dyn DiagnosticSource>,
    interface: String,
    timeout: Duration,
}

impl HealthProbe for AlertProbe {
    fn name(&self) -> &str {
        "alert_check"
    }

    fn probe(&self) -> Result<Reading> {
        let output = self.source.run(
            "journalctl -p warning --since '1 hour ago' --no-pager 2>/dev/null",
            self.timeout,
        )?;
        if !output.success() && output.stdout.is_empty() {
            return Ok(Reading::unknown("System journal not available"));
        }
        Ok(evaluate_alerts(&output.stdout, &self.interface))
    }
}

// Kernel events

/// Grade the last 20 kernel log lines mentioning the interface
pub fn evaluate_events(kernel_log: &str, interface: &str) -> Reading {
    let all: Vec<&str> = kernel_log.lines().filter(|l| mentions(l, interface)).collect();
    let recent = &all[all.len().saturating_sub(20)..];

    let errors: Vec<&str> = recent
        .iter()
        .copied()
        .filter(|l| contains_any(l, &EVENT_ERROR_KEYWORDS))
        .collect();
    let firmware: Vec<&str> = recent
        .iter()
        .copied()
        .filter(|l| contains_any(l, &EVENT_FIRMWARE_KEYWORDS))
        .collect();

    let reading = if !errors.is_empty() {
        Reading::critical(format!("Error events detected for {}", interface))
            .with_detail("error_events", preview(&errors, 3))
    } else if !firmware.is_empty() {
        Reading::warning(format!("Firmware events detected for {}", interface))
            .with_detail("firmware_events", preview(&firmware, 3))
    } else {
        Reading::healthy("No significant kernel events")
    };

    reading.with_detail("event_count", recent.len())
}

struct EventProbe {
    source: Arc<dyn DiagnosticSource>,
    interface: String,
    timeout: Duration,
}

impl HealthProbe for EventProbe {
    fn name(&self) -> &str {
        "event_check"
    }

    fn probe(&self) -> Result<Reading> {
        let output = self.source.run("dmesg 2>/dev/null", self.timeout)?;
        if !output.success() && output.stdout.is_empty() {
            return Ok(Reading::unknown("Kernel log not available"));
        }
        Ok(evaluate_events(&output.stdout, &self.interface))
    }
}

// Interface statistics

/// Error and drop counters of one `/proc/net/dev` row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub rx_errors: u64,
    pub rx_dropped: u64,
    pub tx_errors: u64,
    pub tx_dropped: u64,
}

impl InterfaceCounters {
    pub fn errors(&self) -> u64 {
        self.rx_errors + self.tx_errors
    }

    pub fn drops(&self) -> u64 {
        self.rx_dropped + self.tx_dropped
    }
}

/// Find the counters for `interface` in `/proc/net/dev`
pub fn parse_net_dev(text: &str, interface: &str) -> Option<InterfaceCounters> {
    text.lines().find_map(|line| {
        let (name, fields) = line.split_once(':')?;
        if name.trim() != interface {
            return None;
        }
        let values: Vec<u64> = fields
            .split_whitespace()
            .map(|f| f.parse().unwrap_or(0))
            .collect();
        if values.len() < 12 {
            return None;
        }
        Some(InterfaceCounters {
            rx_errors: values[2],
            rx_dropped: values[3],
            tx_errors: values[10],
            tx_dropped: values[11],
        })
    })
}

/// Grade interface error and drop counters
pub fn evaluate_anomalies(net_dev: &str, interface: &str) -> Reading {
    let Some(counters) = parse_net_dev(net_dev, interface) else {
        return Reading::critical(format!("Interface {} not found", interface));
    };

    let (errors, drops) = (counters.errors(), counters.drops());
    let reading = if errors >= ERRORS_CRITICAL || drops >= DROPS_CRITICAL {
        Reading::critical(format!(
            "Severe packet loss on {}: {} errors, {} drops",
            interface, errors, drops
        ))
    } else if errors >= ERRORS_WARNING || drops >= DROPS_WARNING {
        Reading::warning(format!(
            "Elevated packet errors on {}: {} errors, {} drops",
            interface, errors, drops
        ))
    } else {
        Reading::healthy(format!("No anomalies on {}", interface))
    };

    reading
        .with_detail("rx_errors", counters.rx_errors)
        .with_detail("tx_errors", counters.tx_errors)
        .with_detail("rx_dropped", counters.rx_dropped)
        .with_detail("tx_dropped", counters.tx_dropped)
}

struct AnomalyProbe {
    source: Arc<dyn DiagnosticSource>,
    interface: String,
    timeout: Duration,
}

impl HealthProbe for AnomalyProbe {
    fn name(&self) -> &str {
        "anomaly_check"
    }

    fn probe(&self) -> Result<Reading> {
        let output = self.source.run("cat /proc/net/dev", self.timeout)?;
        if !output.success() {
            return Ok(Reading::unknown("Interface statistics not available"));
        }
        Ok(evaluate_anomalies(&output.stdout, &self.interface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::diag::scripted::{Reply, ScriptedSource};
    use crate::sickbay::checker::HealthStatus;

    const INTERRUPTS: &str = "\
           CPU0       CPU1
  0:         20          0   IO-APIC    2-edge      timer
 24:       1000       2000   PCI-MSI 524288-edge      eth0-TxRx-0
 25:        500          0   PCI-MSI 524289-edge      eth0-TxRx-1
 26:         10         10   PCI-MSI 524290-edge      eth1-TxRx-0
";

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop colls carrier compressed
    lo: 1000 10 0 0 0 0 0 0 1000 10 0 0 0 0 0 0
  eth0: 98765 4321 30 60 0 0 0 0 12345 678 25 45 0 0 0 0
";

    #[test]
    fn test_parse_interrupts_sums_interface_rows() {
        let sample = parse_interrupts(INTERRUPTS, "eth0").unwrap();
        assert_eq!(sample.per_cpu, vec![1500, 2000]);
        assert_eq!(sample.total(), 3500);
        assert!(parse_interrupts(INTERRUPTS, "ens5").is_none());
    }

    #[test]
    fn test_interface_matches_whole_name() {
        assert!(mentions("  45:  10  20  PCI-MSI  eth1-TxRx-0", "eth1"));
        assert!(mentions("kernel: ETH1: link down", "eth1"));
        assert!(!mentions("  46:  10  20  PCI-MSI  eth10-TxRx-0", "eth1"));
        assert!(!mentions("veth1: entered promiscuous mode", "eth1"));

        let text = "\
           CPU0       CPU1
  45:        100        200   PCI-MSI  eth1-TxRx-0
  46:      90000      90000   PCI-MSI  eth10-TxRx-0
";
        assert_eq!(parse_interrupts(text, "eth1").unwrap().per_cpu, vec![100, 200]);
    }

    #[test]
    fn test_interrupt_thresholds() {
        let before = InterruptSample { per_cpu: vec![0, 0] };
        let cases = [
            (vec![5_000, 0], HealthStatus::Healthy),
            (vec![5_000, 5_000], HealthStatus::Warning),
            (vec![20_000, 19_999], HealthStatus::Warning),
            (vec![20_000, 20_000], HealthStatus::Critical),
        ];
        for (after, expected) in cases {
            let reading = evaluate_interrupts(&before, &InterruptSample { per_cpu: after }, 1);
            assert_eq!(reading.status, expected, "{}", reading.message);
        }

        let after = InterruptSample { per_cpu: vec![80_000, 0] };
        let reading = evaluate_interrupts(&before, &after, 2);
        assert_eq!(reading.status, HealthStatus::Critical);
        assert_eq!(reading.details[0], ("interrupt_rate".into(), "40000/sec".into()));
        assert_eq!(reading.details[1], ("affected_cores".into(), "0".into()));
    }

    #[test]
    fn test_core_thresholds() {
        let now = 1_717_243_200;
        assert_eq!(evaluate_cores("", now).status, HealthStatus::Healthy);

        let fresh = format!("{}.5 /var/crash/core.1234\n", now - 60);
        let reading = evaluate_cores(&fresh, now);
        assert_eq!(reading.status, HealthStatus::Critical);
        assert!(reading.message.contains("/var/crash/core.1234"));

        let stale = format!("{}.0 /tmp/core.old\n{}.0 /tmp/core.older\n", now - 7200, now - 9000);
        let reading = evaluate_cores(&stale, now);
        assert_eq!(reading.status, HealthStatus::Warning);
        assert_eq!(reading.details[0], ("core_count".into(), "2".into()));
        assert_eq!(reading.details[1], ("latest_core".into(), "/tmp/core.old".into()));
    }

    #[test]
    fn test_alert_keywords() {
        let journal = "\
Jun 01 11:00:00 host kernel: eth0: link is slow
Jun 01 11:05:00 host kernel: eth1: firmware mismatch
";
        assert_eq!(evaluate_alerts(journal, "eth0").status, HealthStatus::Warning);
        assert_eq!(evaluate_alerts(journal, "eth1").status, HealthStatus::Critical);
        assert_eq!(evaluate_alerts(journal, "eth2").status, HealthStatus::Healthy);
        assert_eq!(evaluate_alerts("", "eth0").status, HealthStatus::Healthy);
    }

    #[test]
    fn test_event_keywords() {
        let dmesg = "\
[   10.1] mlx5_core eth0: firmware version 16.35.2000
[   11.2] mlx5_core eth0: Link up
";
        assert_eq!(evaluate_events(dmesg, "eth0").status, HealthStatus::Warning);

        let failing = format!("{}[   12.0] mlx5_core eth0: cmd timeout on queue 3\n", dmesg);
        let reading = evaluate_events(&failing, "eth0");
        assert_eq!(reading.status, HealthStatus::Critical);
        assert_eq!(reading.details.last().unwrap().1, "3");

        assert_eq!(evaluate_events(dmesg, "eth9").status, HealthStatus::Healthy);
    }

    #[test]
    fn test_event_window_is_last_twenty_lines() {
        let mut log = String::from("eth0: probe failed\n");
        for i in 0..20 {
            log.push_str(&format!("eth0: link check {}\n", i));
        }
        assert_eq!(evaluate_events(&log, "eth0").status, HealthStatus::Healthy);
    }

    #[test]
    fn test_anomaly_thresholds() {
        let counters = parse_net_dev(NET_DEV, "eth0").unwrap();
        assert_eq!(counters.errors(), 55);
        assert_eq!(counters.drops(), 105);
        assert_eq!(evaluate_anomalies(NET_DEV, "eth0").status, HealthStatus::Warning);
        assert_eq!(evaluate_anomalies(NET_DEV, "lo").status, HealthStatus::Healthy);
        assert_eq!(evaluate_anomalies(NET_DEV, "eth3").status, HealthStatus::Critical);

        let noisy = "eth0: 1 1 900 0 0 0 0 0 1 1 100 0 0 0 0 0\n";
        assert_eq!(evaluate_anomalies(noisy, "eth0").status, HealthStatus::Critical);
    }

    #[test]
    fn test_builtin_probes_run_through_source() {
        let busy = INTERRUPTS.replace("1000       2000", "46000      2000");
        let source = ScriptedSource::new()
            .on("/proc/interrupts", vec![Reply::ok(INTERRUPTS), Reply::ok(&busy)])
            .on("/proc/net/dev", vec![Reply::ok(NET_DEV)])
            .on("journalctl", vec![Reply::exit(1)])
            .on("dmesg", vec![Reply::Timeout]);
        let clock = Arc::new(ManualClock::new());
        let probes = builtin(&Config::default(), Arc::new(source), clock.clone());

        let names: Vec<_> = probes.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            ["interrupt_check", "core_check", "alert_check", "event_check", "anomaly_check"]
        );

        let interrupts = probes[0].probe().unwrap();
        assert_eq!(interrupts.status, HealthStatus::Critical);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);

        assert_eq!(probes[1].probe().unwrap().status, HealthStatus::Healthy);
        assert_eq!(probes[2].probe().unwrap().status, HealthStatus::Unknown);
        assert!(probes[3].probe().is_err());
        assert_eq!(probes[4].probe().unwrap().status, HealthStatus::Warning);
    }
}
