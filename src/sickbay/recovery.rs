//! Recovery recipe execution
//!
//! Runs a recipe's steps strictly in order through a `StepActuator` and stops
//! at the first step that fails. Steps already performed are left in place.

use super::catalog::RecoveryCatalog;
use crate::diag::{self, DiagnosticSource};
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Performs one recovery step
pub trait StepActuator: Send + Sync {
    /// Carry out `step` (1-based `index` within `recipe`); true on success
    fn perform(&self, recipe: &str, index: usize, step: &str) -> bool;
}

/// Actuator mapping step descriptions to shell commands
///
/// Steps without a configured command are advisory and acknowledged.
pub struct CommandActuator {
    source: Arc<dyn DiagnosticSource>,
    commands: HashMap<String, String>,
    interface: String,
    timeout: Duration,
}

impl CommandActuator {
    pub fn new(
        source: Arc<dyn DiagnosticSource>,
        commands: HashMap<String, String>,
        interface: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            commands,
            interface: interface.to_string(),
            timeout,
        }
    }
}

impl StepActuator for CommandActuator {
    fn perform(&self, recipe: &str, index: usize, step: &str) -> bool {
        let Some(template) = self.commands.get(step) else {
            tracing::info!(recipe, index, "No command configured for '{}', acknowledged", step);
            return true;
        };

        let command = diag::render(template, &[("interface", &self.interface)]);
        match self.source.run(&command, self.timeout) {
            Ok(output) if output.success() => true,
            Ok(output) => {
                tracing::warn!(recipe, index, "Step command '{}' {}", command, output.summary());
                false
            }
            Err(e) => {
                tracing::error!(recipe, index, "Step command failed: {}", e);
                false
            }
        }
    }
}

/// Outcome of running one recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeResult {
    pub recipe_id: String,
    pub success: bool,
    /// 1-based index of the step that failed
    pub failed_step_index: Option<usize>,
    pub failed_step_name: Option<String>,
    pub steps_completed: usize,
}

impl RecipeResult {
    /// The failure as an error value, if the recipe did not complete
    pub fn failure(&self) -> Option<Error> {
        match (self.failed_step_index, &self.failed_step_name) {
            (Some(index), Some(step)) => Some(Error::RecoveryStepFailure {
                recipe: self.recipe_id.clone(),
                index,
                step: step.clone(),
            }),
            _ => None,
        }
    }
}

/// Executes catalog recipes
pub struct RecoveryExecutor {
    catalog: Arc<RecoveryCatalog>,
    actuator: Arc<dyn StepActuator>,
}

impl RecoveryExecutor {
    pub fn new(catalog: Arc<RecoveryCatalog>, actuator: Arc<dyn StepActuator>) -> Self {
        Self { catalog, actuator }
    }

    /// Run every step of `recipe_id` in order, halting at the first failure
    pub fn execute(&self, recipe_id: &str) -> Result<RecipeResult> {
        let recipe = self.catalog.recipe_for(recipe_id)?;
        let total = recipe.steps.len();
        tracing::info!("Executing recovery recipe: {}", recipe_id);

        for (i, step) in recipe.steps.iter().enumerate() {
            let index = i + 1;
            tracing::info!("Recovery step {}/{}: {}", index, total, step);

            if !self.actuator.perform(recipe_id, index, step) {
                tracing::error!("Recovery step {} failed: {}", index, step);
                return Ok(RecipeResult {
                    recipe_id: recipe_id.to_string(),
                    success: false,
                    failed_step_index: Some(index),
                    failed_step_name: Some(step.clone()),
                    steps_completed: i,
                });
            }
            tracing::info!("Recovery step {} completed successfully", index);
        }

        tracing::info!("Recovery recipe '{}' completed successfully", recipe_id);
        Ok(RecipeResult {
            recipe_id: recipe_id.to_string(),
            success: true,
            failed_step_index: None,
            failed_step_name: None,
            steps_completed: total,
        })
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// Actuator recording each step and failing the named ones
    #[derive(Default)]
    pub struct RecordingActuator {
        failing: Vec<String>,
        panicking: Option<String>,
        performed: Mutex<Vec<String>>,
    }

    impl RecordingActuator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_on(step: &str) -> Self {
            Self {
                failing: vec![step.to_string()],
                ..Default::default()
            }
        }

        /// Panics instead of performing `step`
        pub fn panicking_on(step: &str) -> Self {
            Self {
                panicking: Some(step.to_string()),
                ..Default::default()
            }
        }

        pub fn performed(&self) -> Vec<String> {
            self.performed.lock().unwrap().clone()
        }
    }

    impl StepActuator for RecordingActuator {
        fn perform(&self, _recipe: &str, _index: usize, step: &str) -> bool {
            if self.panicking.as_deref() == Some(step) {
                panic!("actuator fault on '{}'", step);
            }
            self.performed.lock().unwrap().push(step.to_string());
            !self.failing.iter().any(|s| s == step)
        }
    }
}
