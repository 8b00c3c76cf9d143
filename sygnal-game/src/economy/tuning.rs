//! Data-driven balancing for an economy phase.
//!
//! Each gameplay phase ships one JSON tuning under `assets/`. Numbers live
//! there; the shapes and their invariants live here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::constants::{PRESSURE_MAX, PRESSURE_MIN};
use crate::economy::milestones::MilestoneRule;
use crate::state::PhaseId;

/// Errors raised when a tuning document violates its invariants.
#[derive(Debug, Error, PartialEq)]
pub enum TuningError {
    #[error("invalid tuning json: {0}")]
    Parse(String),
    #[error("{field} must be positive (got {value:.2})")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field} must be between {min:.2} and {max:.2} (got {value:.2})")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("upgrade {0} is defined twice")]
    DuplicateUpgrade(String),
    #[error("upgrade {id} cost growth {growth:.2} must be at least 1")]
    ShrinkingCost { id: String, growth: f64 },
    #[error("milestone {0} is defined twice")]
    DuplicateMilestone(String),
}

/// What an upgrade level does when purchased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UpgradeEffect {
    /// Flat generation per second per level.
    AddGeneration { amount: f64 },
    /// Flat manual ping power per level.
    AddPingPower { amount: f64 },
    /// Generation multiplier `1 + level * step`.
    MultiplyGeneration { step: f64 },
    /// Pressure-rate reduction `min(level * perLevel, cap)`.
    #[serde(rename_all = "camelCase")]
    PressureDamping { per_level: f64, cap: f64 },
    /// Cheaper and stronger purges; scaling lives in [`PurgeTuning`].
    PurgeEfficiency,
    /// Faster fatigue decay, `+perLevel` of the base decay per level.
    #[serde(rename_all = "camelCase")]
    FatigueRecovery { per_level: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    pub base: f64,
    pub growth: f64,
    pub effect: UpgradeEffect,
    /// Counts toward the stability predicate's "mitigation owned" clause.
    #[serde(default)]
    pub mitigating: bool,
}

impl UpgradeDef {
    /// `floor(base * growth^level)`.
    #[must_use]
    pub fn cost_at(&self, level: u32) -> f64 {
        (self.base * self.growth.powi(crate::numbers::level_exponent(level))).floor()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PressureTuning {
    /// Pressure points per second before mitigation.
    pub base_rate: f64,
    /// Resource level at which one scale unit of extra pressure applies.
    pub scale_at: f64,
    pub scale_max: f64,
    /// Extra pressure per second per scale unit.
    pub add_per_scale: f64,
    /// Upper bound on combined damping from every upgrade.
    #[serde(default = "PressureTuning::default_damping_cap")]
    pub damping_cap: f64,
}

impl PressureTuning {
    const fn default_damping_cap() -> f64 {
        0.95
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeTuning {
    pub base_cost: f64,
    pub cost_reduction_per_level: f64,
    pub max_cost_reduction: f64,
    /// Pressure points removed at level 0.
    pub base_amount: f64,
    pub power_per_level: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingTuning {
    pub power: f64,
    /// Pressure added by each manual ping.
    pub pressure_noise: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FatigueTuning {
    /// Auto-repeat period while holding.
    pub repeat_interval_ms: f64,
    pub rise_per_sec: f64,
    pub decay_per_sec: f64,
    /// Fatigue removed by a discrete tap.
    pub tap_relief: f64,
    /// Fraction of ping power lost at full fatigue.
    pub penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinTuning {
    pub resource_threshold: f64,
    pub pressure_ceiling: f64,
    pub hold_ms: f64,
}

/// Complete balancing for one economy phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomyTuning {
    pub title: String,
    pub resource_label: String,
    pub pressure_label: String,
    pub base_generation: f64,
    pub ping: PingTuning,
    pub pressure: PressureTuning,
    pub purge: PurgeTuning,
    pub fatigue: FatigueTuning,
    pub win: WinTuning,
    #[serde(default)]
    pub upgrades: Vec<UpgradeDef>,
    #[serde(default)]
    pub milestones: Vec<MilestoneRule>,
    /// Lines seeded into the comms log on first visit and on restart.
    #[serde(default)]
    pub intro: Vec<String>,
    /// Phase unlocked when stability is held long enough.
    #[serde(default)]
    pub unlocks: Option<PhaseId>,
    /// Phase reachable through `Retreat`.
    #[serde(default)]
    pub previous: Option<PhaseId>,
}

fn positive(field: &'static str, value: f64) -> Result<(), TuningError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(TuningError::NotPositive { field, value })
    }
}

fn within(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), TuningError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(TuningError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

impl EconomyTuning {
    /// Parse and validate a tuning document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or violates an invariant.
    pub fn from_json(json: &str) -> Result<Self, TuningError> {
        let tuning: Self =
            serde_json::from_str(json).map_err(|e| TuningError::Parse(e.to_string()))?;
        tuning.validate()?;
        Ok(tuning)
    }

    /// Check every numeric invariant the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), TuningError> {
        positive("baseGeneration", self.base_generation)?;
        positive("ping.power", self.ping.power)?;
        within("ping.pressureNoise", self.ping.pressure_noise, 0.0, PRESSURE_MAX)?;
        within("pressure.baseRate", self.pressure.base_rate, 0.0, PRESSURE_MAX)?;
        positive("pressure.scaleAt", self.pressure.scale_at)?;
        within("pressure.dampingCap", self.pressure.damping_cap, 0.0, 1.0)?;
        positive("purge.baseCost", self.purge.base_cost)?;
        positive("purge.baseAmount", self.purge.base_amount)?;
        within("purge.maxCostReduction", self.purge.max_cost_reduction, 0.0, 1.0)?;
        positive("fatigue.repeatIntervalMs", self.fatigue.repeat_interval_ms)?;
        within("fatigue.penalty", self.fatigue.penalty, 0.0, 1.0)?;
        within("fatigue.tapRelief", self.fatigue.tap_relief, 0.0, 1.0)?;
        positive("win.resourceThreshold", self.win.resource_threshold)?;
        within(
            "win.pressureCeiling",
            self.win.pressure_ceiling,
            PRESSURE_MIN,
            PRESSURE_MAX,
        )?;
        positive("win.holdMs", self.win.hold_ms)?;

        let mut seen = BTreeSet::new();
        for def in &self.upgrades {
            if !seen.insert(def.id.as_str()) {
                return Err(TuningError::DuplicateUpgrade(def.id.clone()));
            }
            positive("upgrade.base", def.base)?;
            if def.growth < 1.0 {
                return Err(TuningError::ShrinkingCost {
                    id: def.id.clone(),
                    growth: def.growth,
                });
            }
        }

        let mut keys = BTreeSet::new();
        for rule in &self.milestones {
            if !keys.insert(rule.key.as_str()) {
                return Err(TuningError::DuplicateMilestone(rule.key.clone()));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn upgrade(&self, id: &str) -> Option<&UpgradeDef> {
        self.upgrades.iter().find(|def| def.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::{relay_tuning, signal_tuning};

    #[test]
    fn bundled_tunings_validate() {
        let signal = signal_tuning().unwrap();
        assert!(signal.validate().is_ok());
        assert_eq!(signal.unlocks.as_ref().map(PhaseId::as_str), Some("relay"));
        assert!(relay_tuning().unwrap().validate().is_ok());
    }

    #[test]
    fn geometric_cost_curve_floors() {
        let def = UpgradeDef {
            id: String::from("boost"),
            name: String::from("Boost"),
            desc: String::new(),
            base: 25.0,
            growth: 1.55,
            effect: UpgradeEffect::AddGeneration { amount: 1.0 },
            mitigating: false,
        };
        assert!((def.cost_at(0) - 25.0).abs() < f64::EPSILON);
        assert!((def.cost_at(1) - 38.0).abs() < f64::EPSILON);
        assert!((def.cost_at(2) - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn validation_catches_broken_documents() {
        let mut tuning = signal_tuning().unwrap();
        tuning.win.pressure_ceiling = 140.0;
        assert!(matches!(
            tuning.validate(),
            Err(TuningError::OutOfRange {
                field: "win.pressureCeiling",
                ..
            })
        ));

        let mut tuning = signal_tuning().unwrap();
        let dup = tuning.upgrades[0].clone();
        tuning.upgrades.push(dup);
        assert!(matches!(
            tuning.validate(),
            Err(TuningError::DuplicateUpgrade(_))
        ));

        assert!(matches!(
            EconomyTuning::from_json("{"),
            Err(TuningError::Parse(_))
        ));
    }
}
