//! Mapping from failing checks to failure types

use super::catalog::FailureType;
use super::checker::{HealthCheck, HealthStatus};

/// Substring of a check name and the failure type it indicates, first match wins
const RULES: [(&str, FailureType); 5] = [
    ("interrupt", FailureType::InterruptStorm),
    ("core", FailureType::CoreDump),
    ("alert", FailureType::HardwareFault),
    ("event", FailureType::DriverIssue),
    ("anomaly", FailureType::NetworkConnectivity),
];

/// Classify a check by name
pub fn classify(check: &HealthCheck) -> Option<FailureType> {
    classify_name(&check.name)
}

pub fn classify_name(name: &str) -> Option<FailureType> {
    let name = name.to_lowercase();
    RULES
        .iter()
        .find(|(needle, _)| name.contains(needle))
        .map(|(_, ft)| *ft)
}

/// Failure types behind the critical checks, deduplicated in check order
///
/// Critical checks that match no rule are returned separately.
pub fn critical_failures(checks: &[HealthCheck]) -> (Vec<FailureType>, Vec<&HealthCheck>) {
    let mut failures = Vec::new();
    let mut unclassified = Vec::new();

    for check in checks.iter().filter(|c| c.status == HealthStatus::Critical) {
        match classify(check) {
            Some(ft) if !failures.contains(&ft) => failures.push(ft),
            Some(_) => {}
            None => unclassified.push(check),
        }
    }

    (failures, unclassified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sickbay::checker::Reading;
    use chrono::Local;

    fn check(name: &str, status: HealthStatus) -> HealthCheck {
        HealthCheck::new(name, Reading::new(status, "x"), Local::now())
    }

    #[test]
    fn test_builtin_check_names() {
        let cases = [
            ("interrupt_check", Some(FailureType::InterruptStorm)),
            ("core_check", Some(FailureType::CoreDump)),
            ("alert_check", Some(FailureType::HardwareFault)),
            ("event_check", Some(FailureType::DriverIssue)),
            ("anomaly_check", Some(FailureType::NetworkConnectivity)),
            ("fan_speed", None),
            ("", None),
        ];
        for (name, expected) in cases {
            assert_eq!(classify_name(name), expected, "{}", name);
        }
    }

    #[test]
    fn test_case_insensitive_and_first_match_wins() {
        assert_eq!(classify_name("Interrupt_Check"), Some(FailureType::InterruptStorm));
        // "core" is tested before "event"
        assert_eq!(classify_name("core_event_check"), Some(FailureType::CoreDump));
        assert_eq!(classify_name("anomaly_alert"), Some(FailureType::HardwareFault));
    }

    #[test]
    fn test_critical_failures_dedup_in_order() {
        let checks = vec![
            check("interrupt_check", HealthStatus::Warning),
            check("event_check", HealthStatus::Critical),
            check("core_check", HealthStatus::Critical),
            check("event_check_2", HealthStatus::Critical),
            check("fan_speed", HealthStatus::Critical),
            check("anomaly_check", HealthStatus::Healthy),
        ];

        let (failures, unclassified) = critical_failures(&checks);
        assert_eq!(failures, vec![FailureType::DriverIssue, FailureType::CoreDump]);
        assert_eq!(unclassified.len(), 1);
        assert_eq!(unclassified[0].name, "fan_speed");
    }
}
