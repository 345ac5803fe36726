//! Failure scenarios and recovery recipes
//!
//! The catalog is built once at startup and shared read-only. Every failure
//! type has exactly one scenario, and every scenario names a recipe that
//! exists in the catalog.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Kind of NIC failure the catalog knows how to recover from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    BootFailure,
    DriverIssue,
    HardwareFault,
    FirmwareCorruption,
    NetworkConnectivity,
    InterruptStorm,
    CoreDump,
    MemoryLeak,
}

impl FailureType {
    /// All failure types in catalog order
    pub const ALL: [FailureType; 8] = [
        FailureType::BootFailure,
        FailureType::DriverIssue,
        FailureType::HardwareFault,
        FailureType::FirmwareCorruption,
        FailureType::NetworkConnectivity,
        FailureType::InterruptStorm,
        FailureType::CoreDump,
        FailureType::MemoryLeak,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::BootFailure => "boot_failure",
            FailureType::DriverIssue => "driver_issue",
            FailureType::HardwareFault => "hardware_fault",
            FailureType::FirmwareCorruption => "firmware_corruption",
            FailureType::NetworkConnectivity => "network_connectivity",
            FailureType::InterruptStorm => "interrupt_storm",
            FailureType::CoreDump => "core_dump",
            FailureType::MemoryLeak => "memory_leak",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        FailureType::ALL
            .into_iter()
            .find(|ft| ft.as_str() == wanted)
            .ok_or_else(|| Error::UnknownFailureType(s.to_string()))
    }
}

/// How urgent a failure scenario is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Descriptive record for one failure type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureScenario {
    pub failure_type: FailureType,
    pub description: String,
    pub mitigation_steps: Vec<String>,
    pub recipe_id: String,
    pub severity: Severity,
}

/// Ordered list of recovery step descriptions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryRecipe {
    pub id: String,
    pub steps: Vec<String>,
}

/// Read-only table of scenarios and recipes
#[derive(Debug, Clone)]
pub struct RecoveryCatalog {
    /// Indexed by `FailureType::index`
    scenarios: Vec<FailureScenario>,
    recipes: Vec<RecoveryRecipe>,
}

impl RecoveryCatalog {
    /// Build a catalog, checking that it is complete and consistent
    pub fn new(scenarios: Vec<FailureScenario>, recipes: Vec<RecoveryRecipe>) -> Result<Self> {
        let mut seen_recipes = HashSet::new();
        for recipe in &recipes {
            if !seen_recipes.insert(recipe.id.as_str()) {
                return Err(Error::CatalogIntegrity(format!(
                    "recipe '{}' defined twice",
                    recipe.id
                )));
            }
            if recipe.steps.is_empty() {
                return Err(Error::CatalogIntegrity(format!(
                    "recipe '{}' has no steps",
                    recipe.id
                )));
            }
        }

        let mut ordered: Vec<Option<FailureScenario>> = vec![None; FailureType::ALL.len()];
        for scenario in scenarios {
            if !seen_recipes.contains(scenario.recipe_id.as_str()) {
                return Err(Error::CatalogIntegrity(format!(
                    "scenario '{}' references missing recipe '{}'",
                    scenario.failure_type, scenario.recipe_id
                )));
            }
            let slot = &mut ordered[scenario.failure_type.index()];
            if slot.is_some() {
                return Err(Error::CatalogIntegrity(format!(
                    "scenario '{}' defined twice",
                    scenario.failure_type
                )));
            }
            *slot = Some(scenario);
        }

        let scenarios = ordered
            .into_iter()
            .zip(FailureType::ALL)
            .map(|(slot, ft)| {
                slot.ok_or_else(|| {
                    Error::CatalogIntegrity(format!("no scenario for failure type '{}'", ft))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { scenarios, recipes })
    }

    /// The built-in catalog shipped with nicfw
    pub fn builtin() -> Result<Self> {
        let scenarios = BUILTIN_SCENARIOS
            .iter()
            .map(|(ft, description, severity, recipe, steps)| FailureScenario {
                failure_type: *ft,
                description: description.to_string(),
                mitigation_steps: strings(steps),
                recipe_id: recipe.to_string(),
                severity: *severity,
            })
            .collect();

        let recipes = BUILTIN_RECIPES
            .iter()
            .map(|(id, steps)| RecoveryRecipe {
                id: id.to_string(),
                steps: strings(steps),
            })
            .collect();

        Self::new(scenarios, recipes)
    }

    /// Scenario for a failure type; total over `FailureType`
    pub fn scenario_for(&self, failure_type: FailureType) -> &FailureScenario {
        &self.scenarios[failure_type.index()]
    }

    /// Recipe by id
    pub fn recipe_for(&self, id: &str) -> Result<&RecoveryRecipe> {
        self.recipes
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::UnknownRecipe(id.to_string()))
    }

    /// Scenarios in failure type order
    pub fn scenarios(&self) -> &[FailureScenario] {
        &self.scenarios
    }

    pub fn recipes(&self) -> &[RecoveryRecipe] {
        &self.recipes
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

type ScenarioRow = (FailureType, &'static str, Severity, &'static str, &'static [&'static str]);

const BUILTIN_SCENARIOS: &[ScenarioRow] = &[
    (
        FailureType::BootFailure,
        "NIC fails to boot after firmware installation",
        Severity::Critical,
        "boot_failure_recovery",
        &[
            "Check power supply connections",
            "Verify firmware compatibility",
            "Attempt firmware rollback",
            "Reset NIC to factory defaults",
        ],
    ),
    (
        FailureType::DriverIssue,
        "Driver compatibility issues after firmware update",
        Severity::High,
        "driver_recovery",
        &[
            "Update NIC drivers",
            "Reload kernel modules",
            "Check driver version compatibility",
            "Reinstall driver package",
        ],
    ),
    (
        FailureType::HardwareFault,
        "Hardware fault detected during or after installation",
        Severity::Critical,
        "hardware_fault_recovery",
        &[
            "Run hardware diagnostics",
            "Check for physical damage",
            "Verify slot connections",
            "Replace hardware if necessary",
        ],
    ),
    (
        FailureType::FirmwareCorruption,
        "Firmware image corruption detected",
        Severity::High,
        "firmware_corruption_recovery",
        &[
            "Verify firmware checksum",
            "Re-download firmware image",
            "Use backup firmware image",
            "Flash from recovery mode",
        ],
    ),
    (
        FailureType::NetworkConnectivity,
        "Network connectivity lost after firmware update",
        Severity::Medium,
        "network_recovery",
        &[
            "Check link status",
            "Verify network configuration",
            "Reset network interface",
            "Check cable connections",
        ],
    ),
    (
        FailureType::InterruptStorm,
        "Excessive interrupts detected",
        Severity::High,
        "interrupt_storm_recovery",
        &[
            "Check interrupt affinity",
            "Disable/enable interrupts",
            "Update interrupt handlers",
            "Restart network services",
        ],
    ),
    (
        FailureType::CoreDump,
        "Core dump detected in system logs",
        Severity::High,
        "core_dump_recovery",
        &[
            "Analyze core dump",
            "Check for memory corruption",
            "Restart affected services",
            "Apply firmware patch if available",
        ],
    ),
    (
        FailureType::MemoryLeak,
        "Memory leak detected in NIC driver or firmware",
        Severity::Medium,
        "memory_leak_recovery",
        &[
            "Monitor memory usage",
            "Restart driver modules",
            "Apply memory leak patches",
            "Increase memory limits temporarily",
        ],
    ),
];

const BUILTIN_RECIPES: &[(&str, &[&str])] = &[
    (
        "boot_failure_recovery",
        &[
            "Reset NIC to factory defaults",
            "Reload firmware from backup",
            "Restart system services",
            "Verify basic connectivity",
        ],
    ),
    (
        "driver_recovery",
        &[
            "Unload NIC driver modules",
            "Reload driver modules",
            "Restart network services",
            "Verify driver functionality",
        ],
    ),
    (
        "hardware_fault_recovery",
        &[
            "Run hardware diagnostics",
            "Reset hardware components",
            "Check physical connections",
            "Escalate to hardware team if needed",
        ],
    ),
    (
        "firmware_corruption_recovery",
        &[
            "Stop all NIC services",
            "Flash firmware from backup",
            "Verify firmware integrity",
            "Restart NIC services",
        ],
    ),
    (
        "network_recovery",
        &[
            "Reset network interface",
            "Reload network configuration",
            "Restart network services",
            "Test connectivity",
        ],
    ),
    (
        "interrupt_storm_recovery",
        &[
            "Disable interrupts temporarily",
            "Reset interrupt affinity",
            "Restart driver",
            "Re-enable interrupts",
        ],
    ),
    (
        "core_dump_recovery",
        &[
            "Analyze core dump",
            "Restart affected services",
            "Apply patches if available",
            "Monitor for recurrence",
        ],
    ),
    (
        "memory_leak_recovery",
        &[
            "Restart driver modules",
            "Clear memory caches",
            "Apply memory patches",
            "Monitor memory usage",
        ],
    ),
];
