//! Scenario step tracking.
//!
//! Each (scenario, partition) pair has a current step. Unseen pairs are at
//! [`DEFAULT_STEP`]. State lives in memory only.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// Step reported for a pair that has never been set.
pub const DEFAULT_STEP: &str = "idle";

/// Snapshot of one scenario partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioEntry {
    pub scenario: String,
    pub partition_key: String,
    pub current_step: String,
}

/// Shared store of scenario steps.
///
/// Keys are kept as (scenario, partition) tuples so resetting one scenario
/// can never touch another whose name shares a prefix.
#[derive(Debug, Default)]
pub struct ScenarioStore {
    steps: RwLock<HashMap<(String, String), String>>,
}

impl ScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current step, or [`DEFAULT_STEP`] if the pair was never set.
    pub fn get_step(&self, scenario: &str, partition: &str) -> String {
        self.steps
            .read()
            .get(&(scenario.to_string(), partition.to_string()))
            .cloned()
            .unwrap_or_else(|| DEFAULT_STEP.to_string())
    }

    /// Overwrite the step for a pair.
    pub fn set_step(&self, scenario: &str, partition: &str, step: &str) {
        self.steps
            .write()
            .insert((scenario.to_string(), partition.to_string()), step.to_string());
    }

    /// Forget every partition of a scenario. Returns how many were removed.
    pub fn reset_scenario(&self, scenario: &str) -> usize {
        let mut steps = self.steps.write();
        let before = steps.len();
        steps.retain(|(name, _), _| name != scenario);
        before - steps.len()
    }

    /// Forget one partition. Returns whether it existed.
    pub fn reset_partition(&self, scenario: &str, partition: &str) -> bool {
        self.steps
            .write()
            .remove(&(scenario.to_string(), partition.to_string()))
            .is_some()
    }

    /// Snapshot of all entries, in no particular order.
    pub fn list(&self) -> Vec<ScenarioEntry> {
        self.steps
            .read()
            .iter()
            .map(|((scenario, partition), step)| ScenarioEntry {
                scenario: scenario.clone(),
                partition_key: partition.clone(),
                current_step: step.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.read().is_empty()
    }
}
