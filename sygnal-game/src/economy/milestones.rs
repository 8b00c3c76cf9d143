//! One-shot narrative milestones.
//!
//! Each rule is keyed; the keys that have fired are persisted in the phase
//! blob so a rule never fires twice, however often it is re-checked.

use serde::{Deserialize, Serialize};

use crate::economy::EconomyState;
use crate::economy::tuning::EconomyTuning;

/// Predicate a milestone waits for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MilestoneCondition {
    ResourceAtLeast(f64),
    PressureAtLeast(f64),
    FirstPurchase,
    FirstPurge,
    FirstStable,
}

/// Which narrative log a milestone line lands in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogChannel {
    #[default]
    Comms,
    Transmission,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneRule {
    pub key: String,
    pub when: MilestoneCondition,
    #[serde(default)]
    pub channel: LogChannel,
    pub line: String,
}

impl MilestoneCondition {
    fn holds(&self, state: &EconomyState, tuning: &EconomyTuning) -> bool {
        match self {
            Self::ResourceAtLeast(threshold) => state.resource >= *threshold,
            Self::PressureAtLeast(threshold) => state.pressure >= *threshold,
            Self::FirstPurchase => state.purchases > 0,
            Self::FirstPurge => state.purges > 0,
            Self::FirstStable => state.is_stable(tuning),
        }
    }
}

/// Fire every rule whose condition now holds and whose key is unset.
/// Returns how many fired.
pub fn check(state: &mut EconomyState, tuning: &EconomyTuning, now_ms: i64) -> usize {
    let mut fired = 0;
    for rule in &tuning.milestones {
        if state.milestones.contains(&rule.key) || !rule.when.holds(state, tuning) {
            continue;
        }
        state.milestones.insert(rule.key.clone());
        state.log(rule.channel, now_ms, &rule.line);
        log::debug!("milestone {} fired", rule.key);
        fired += 1;
    }
    fired
}
