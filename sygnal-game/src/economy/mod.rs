//! Resource-pressure economy engine.
//!
//! A growth resource `R` accrues from a generation rate and manual pings while
//! an opposing pressure `P` in `[0, 100]` rises with time and with `R`. Purges
//! and upgrades trade `R` for control over `P`. Holding the stability predicate
//! long enough completes the phase; letting `P` reach 100 defeats it until the
//! player restarts.
//!
//! The same [`EconomyState::advance`] step drives live ticks and the single
//! closed-form offline catch-up, so both paths share one set of rules.

pub mod milestones;
pub mod tuning;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

use crate::clock::{format_duration_ms, stamp};
use crate::constants::{
    LOG_CAPACITY, LOG_PURGE_PREFIX, LOG_RESTARTED, LOG_SYSTEM_FAILURE, LOG_UPGRADE_PREFIX,
    PRESSURE_MAX, PRESSURE_MIN,
};
use crate::numbers::{floor_f64_to_u64, ms_to_secs};

pub use milestones::{LogChannel, MilestoneCondition, MilestoneRule};
pub use tuning::{EconomyTuning, TuningError, UpgradeDef, UpgradeEffect};

/// Player actions the economy can refuse.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EconomyError {
    #[error("systems are down; restart required")]
    Defeated,
    #[error("cannot afford {what}: costs {cost:.0}, have {available:.0}")]
    Unaffordable {
        what: String,
        cost: f64,
        available: f64,
    },
    #[error("unknown upgrade {0}")]
    UnknownUpgrade(String),
}

/// Whether an advance is a live tick or the offline catch-up window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMode {
    Live,
    /// No hold credit and no auto-repeat; the stability timer resets.
    Offline,
}

/// What one advance step changed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdvanceReport {
    pub generated: f64,
    pub pressure_before: f64,
    pub pressure_after: f64,
    pub auto_pings: u32,
    pub defeated_now: bool,
    pub completed_now: bool,
}

/// Phase-local economy blob. Every field defaults so partial saves load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EconomyState {
    #[serde(alias = "signal")]
    pub resource: f64,
    /// Additive generation before multipliers.
    pub base_generation: f64,
    #[serde(alias = "signalPerSecond")]
    pub generation_rate: f64,
    pub ping_power: f64,
    #[serde(alias = "corruption")]
    pub pressure: f64,
    pub defeated: bool,
    pub completed: bool,
    #[serde(alias = "winHoldMs")]
    pub hold_ms: f64,
    pub holding: bool,
    /// Time held since the last auto-repeat fired.
    pub hold_carry_ms: f64,
    pub fatigue: f64,
    pub upgrades: BTreeMap<String, u32>,
    pub purchases: u32,
    pub purges: u32,
    pub milestones: BTreeSet<String>,
    pub comms: VecDeque<String>,
    pub transmission: VecDeque<String>,
}

impl EconomyState {
    /// Starting values for a fresh run, with the intro lines logged.
    #[must_use]
    pub fn initial(tuning: &EconomyTuning, now_ms: i64) -> Self {
        let mut state = Self {
            base_generation: tuning.base_generation,
            generation_rate: tuning.base_generation,
            ping_power: tuning.ping.power,
            ..Self::default()
        };
        for line in &tuning.intro {
            state.log(LogChannel::Comms, now_ms, line);
        }
        state
    }

    /// Decode a stored blob. An empty or missing blob yields a fresh run and
    /// fields older saves lacked are recomputed from upgrade levels.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob has the wrong shape.
    pub fn from_value(
        value: &Value,
        tuning: &EconomyTuning,
        now_ms: i64,
    ) -> Result<Self, serde_json::Error> {
        let empty = match value {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if empty {
            return Ok(Self::initial(tuning, now_ms));
        }
        let mut state: Self = serde_json::from_value(value.clone())?;
        state.backfill(tuning);
        Ok(state)
    }

    /// Encode back into a phase blob.
    ///
    /// # Errors
    ///
    /// Returns an error if a float is not representable in JSON.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn backfill(&mut self, tuning: &EconomyTuning) {
        let mut base = tuning.base_generation;
        let mut ping = tuning.ping.power;
        for def in &tuning.upgrades {
            let level = f64::from(self.level(&def.id));
            match def.effect {
                UpgradeEffect::AddGeneration { amount } => base += amount * level,
                UpgradeEffect::AddPingPower { amount } => ping += amount * level,
                _ => {}
            }
        }
        if self.base_generation <= 0.0 {
            self.base_generation = base;
        }
        if self.generation_rate <= 0.0 {
            self.generation_rate = self.base_generation * self.generation_multiplier(tuning);
        }
        if self.ping_power <= 0.0 {
            self.ping_power = ping;
        }
        self.resource = self.resource.max(0.0);
        self.pressure = self.pressure.clamp(PRESSURE_MIN, PRESSURE_MAX);
        self.fatigue = self.fatigue.clamp(0.0, 1.0);
        self.hold_ms = self.hold_ms.max(0.0);
        trim(&mut self.comms);
        trim(&mut self.transmission);
    }

    #[must_use]
    pub fn level(&self, id: &str) -> u32 {
        self.upgrades.get(id).copied().unwrap_or(0)
    }

    fn levels_of<'t>(
        &'t self,
        tuning: &'t EconomyTuning,
    ) -> impl Iterator<Item = (&'t UpgradeDef, f64)> + 't {
        tuning
            .upgrades
            .iter()
            .map(move |def| (def, f64::from(self.level(&def.id))))
    }

    /// Product of every multiplicative generation upgrade.
    #[must_use]
    pub fn generation_multiplier(&self, tuning: &EconomyTuning) -> f64 {
        self.levels_of(tuning)
            .filter_map(|(def, level)| match def.effect {
                UpgradeEffect::MultiplyGeneration { step } => Some(1.0 + level * step),
                _ => None,
            })
            .product()
    }

    /// Fraction of base pressure removed by owned damping upgrades.
    #[must_use]
    pub fn pressure_damping(&self, tuning: &EconomyTuning) -> f64 {
        let total: f64 = self
            .levels_of(tuning)
            .filter_map(|(def, level)| match def.effect {
                UpgradeEffect::PressureDamping { per_level, cap } => Some((level * per_level).min(cap)),
                _ => None,
            })
            .sum();
        total.clamp(0.0, tuning.pressure.damping_cap)
    }

    /// Pressure points per second at the current resource level.
    #[must_use]
    pub fn pressure_rate(&self, tuning: &EconomyTuning) -> f64 {
        let p = &tuning.pressure;
        let scale = (self.resource / p.scale_at).clamp(0.0, p.scale_max);
        p.base_rate.mul_add(1.0 - self.pressure_damping(tuning), p.add_per_scale * scale)
    }

    fn purge_level(&self, tuning: &EconomyTuning) -> f64 {
        self.levels_of(tuning)
            .filter(|(def, _)| def.effect == UpgradeEffect::PurgeEfficiency)
            .map(|(_, level)| level)
            .sum()
    }

    #[must_use]
    pub fn purge_cost(&self, tuning: &EconomyTuning) -> f64 {
        let purge = &tuning.purge;
        let reduction = (self.purge_level(tuning) * purge.cost_reduction_per_level)
            .min(purge.max_cost_reduction);
        (purge.base_cost * (1.0 - reduction)).floor()
    }

    /// Pressure points a purge removes.
    #[must_use]
    pub fn purge_amount(&self, tuning: &EconomyTuning) -> f64 {
        let purge = &tuning.purge;
        purge.base_amount * self.purge_level(tuning).mul_add(purge.power_per_level, 1.0)
    }

    #[must_use]
    pub fn has_mitigation(&self, tuning: &EconomyTuning) -> bool {
        tuning
            .upgrades
            .iter()
            .any(|def| def.mitigating && self.level(&def.id) > 0)
    }

    /// The win predicate gating the stability hold.
    #[must_use]
    pub fn is_stable(&self, tuning: &EconomyTuning) -> bool {
        !self.defeated
            && self.resource >= tuning.win.resource_threshold
            && self.pressure <= tuning.win.pressure_ceiling
            && self.has_mitigation(tuning)
    }

    /// Ping power after fatigue, used by auto-repeat.
    #[must_use]
    pub fn effective_ping_power(&self, tuning: &EconomyTuning) -> f64 {
        self.ping_power * self.fatigue.mul_add(-tuning.fatigue.penalty, 1.0)
    }

    fn fatigue_decay(&self, tuning: &EconomyTuning) -> f64 {
        let bonus: f64 = self
            .levels_of(tuning)
            .filter_map(|(def, level)| match def.effect {
                UpgradeEffect::FatigueRecovery { per_level } => Some(level * per_level),
                _ => None,
            })
            .sum();
        tuning.fatigue.decay_per_sec * (1.0 + bonus)
    }

    /// Advance by `dt_ms`: generation, pressure, defeat, stability hold and
    /// milestones, in that order. Defeated economies do not move.
    pub fn advance(
        &mut self,
        tuning: &EconomyTuning,
        dt_ms: f64,
        mode: AdvanceMode,
        now_ms: i64,
    ) -> AdvanceReport {
        let mut report = AdvanceReport {
            pressure_before: self.pressure,
            pressure_after: self.pressure,
            ..AdvanceReport::default()
        };
        if mode == AdvanceMode::Offline {
            self.holding = false;
            self.hold_carry_ms = 0.0;
            self.fatigue = 0.0;
            self.hold_ms = 0.0;
        }
        if self.defeated || dt_ms <= 0.0 {
            return report;
        }

        let dt_s = ms_to_secs(dt_ms);
        if mode == AdvanceMode::Live {
            report.auto_pings = self.step_hold(tuning, dt_ms);
        }

        let gain = self.generation_rate.max(0.0) * dt_s;
        self.resource += gain;
        report.generated = gain;

        self.pressure = self
            .pressure_rate(tuning)
            .mul_add(dt_s, self.pressure)
            .clamp(PRESSURE_MIN, PRESSURE_MAX);
        report.pressure_after = self.pressure;

        if self.settle(now_ms) {
            report.defeated_now = true;
        } else if mode == AdvanceMode::Live && self.is_stable(tuning) {
            if !self.completed {
                self.hold_ms += dt_ms;
                if self.hold_ms >= tuning.win.hold_ms {
                    self.hold_ms = tuning.win.hold_ms;
                    self.completed = true;
                    report.completed_now = true;
                }
            }
        } else {
            self.hold_ms = 0.0;
        }

        milestones::check(self, tuning, now_ms);
        report
    }

    /// Auto-repeat and fatigue. Returns how many repeats fired.
    fn step_hold(&mut self, tuning: &EconomyTuning, dt_ms: f64) -> u32 {
        let fatigue = &tuning.fatigue;
        let dt_s = ms_to_secs(dt_ms);
        if !self.holding {
            self.fatigue = self.fatigue_decay(tuning).mul_add(-dt_s, self.fatigue).max(0.0);
            return 0;
        }
        self.hold_carry_ms += dt_ms;
        let repeats = (self.hold_carry_ms / fatigue.repeat_interval_ms).floor();
        self.hold_carry_ms -= repeats * fatigue.repeat_interval_ms;
        if repeats > 0.0 {
            self.resource += repeats * self.effective_ping_power(tuning);
            self.pressure = repeats
                .mul_add(tuning.ping.pressure_noise, self.pressure)
                .min(PRESSURE_MAX);
        }
        self.fatigue = fatigue.rise_per_sec.mul_add(dt_s, self.fatigue).min(1.0);
        u32::try_from(floor_f64_to_u64(repeats)).unwrap_or(u32::MAX)
    }

    /// Flip to defeated if pressure is maxed. Returns `true` on the transition.
    fn settle(&mut self, now_ms: i64) -> bool {
        if self.defeated || self.pressure < PRESSURE_MAX {
            return false;
        }
        self.pressure = PRESSURE_MAX;
        self.defeated = true;
        self.holding = false;
        self.hold_ms = 0.0;
        self.log(LogChannel::Comms, now_ms, LOG_SYSTEM_FAILURE);
        true
    }

    /// Manual tap: full ping power, some pressure, and fatigue relief.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::Defeated`] while systems are down.
    pub fn ping(&mut self, tuning: &EconomyTuning, now_ms: i64) -> Result<f64, EconomyError> {
        if self.defeated {
            return Err(EconomyError::Defeated);
        }
        let gain = self.ping_power;
        self.resource += gain;
        self.pressure = (self.pressure + tuning.ping.pressure_noise).clamp(PRESSURE_MIN, PRESSURE_MAX);
        self.fatigue = (self.fatigue - tuning.fatigue.tap_relief).max(0.0);
        self.settle(now_ms);
        milestones::check(self, tuning, now_ms);
        Ok(gain)
    }

    /// # Errors
    ///
    /// Returns [`EconomyError::Defeated`] while systems are down.
    pub fn start_hold(&mut self) -> Result<(), EconomyError> {
        if self.defeated {
            return Err(EconomyError::Defeated);
        }
        self.holding = true;
        Ok(())
    }

    pub fn stop_hold(&mut self) {
        self.holding = false;
        self.hold_carry_ms = 0.0;
    }

    /// Spend `R` to knock pressure down. Returns the points removed.
    ///
    /// # Errors
    ///
    /// Rejected while defeated or when the cost exceeds `R`; state is untouched.
    pub fn purge(&mut self, tuning: &EconomyTuning, now_ms: i64) -> Result<f64, EconomyError> {
        if self.defeated {
            return Err(EconomyError::Defeated);
        }
        let cost = self.purge_cost(tuning);
        if cost > self.resource {
            return Err(EconomyError::Unaffordable {
                what: String::from("purge"),
                cost,
                available: self.resource,
            });
        }
        self.resource -= cost;
        let before = self.pressure;
        self.pressure = (self.pressure - self.purge_amount(tuning)).clamp(PRESSURE_MIN, PRESSURE_MAX);
        self.purges = self.purges.saturating_add(1);
        let removed = before - self.pressure;
        let line = format!(
            "{LOG_PURGE_PREFIX}-{removed:.1}% {} for {cost:.0} {}",
            tuning.pressure_label, tuning.resource_label
        );
        self.log(LogChannel::Transmission, now_ms, &line);
        milestones::check(self, tuning, now_ms);
        Ok(removed)
    }

    /// Buy the next level of upgrade `id`. Returns the new level.
    ///
    /// # Errors
    ///
    /// Rejected while defeated, for unknown ids, or when unaffordable.
    pub fn buy(
        &mut self,
        tuning: &EconomyTuning,
        id: &str,
        now_ms: i64,
    ) -> Result<u32, EconomyError> {
        if self.defeated {
            return Err(EconomyError::Defeated);
        }
        let def = tuning
            .upgrade(id)
            .ok_or_else(|| EconomyError::UnknownUpgrade(id.to_string()))?;
        let level = self.level(id);
        let cost = def.cost_at(level);
        if cost > self.resource {
            return Err(EconomyError::Unaffordable {
                what: def.name.clone(),
                cost,
                available: self.resource,
            });
        }
        self.resource -= cost;
        let next = level.saturating_add(1);
        self.apply_upgrade(tuning, def, next);
        self.purchases = self.purchases.saturating_add(1);
        let line = format!("{LOG_UPGRADE_PREFIX}{} (lvl {next})", def.name);
        self.log(LogChannel::Transmission, now_ms, &line);
        milestones::check(self, tuning, now_ms);
        Ok(next)
    }

    /// Set `def` to `next` and apply the difference exactly once.
    fn apply_upgrade(&mut self, tuning: &EconomyTuning, def: &UpgradeDef, next: u32) {
        let previous = self.level(&def.id);
        let delta = f64::from(next) - f64::from(previous);
        match def.effect {
            UpgradeEffect::AddGeneration { amount } => {
                self.base_generation += amount * delta;
                self.generation_rate += amount * delta * self.generation_multiplier(tuning);
            }
            UpgradeEffect::AddPingPower { amount } => self.ping_power += amount * delta,
            UpgradeEffect::MultiplyGeneration { step } => {
                let old = f64::from(previous).mul_add(step, 1.0);
                let new = f64::from(next).mul_add(step, 1.0);
                self.generation_rate = self.generation_rate / old * new;
            }
            UpgradeEffect::PressureDamping { .. }
            | UpgradeEffect::PurgeEfficiency
            | UpgradeEffect::FatigueRecovery { .. } => {}
        }
        self.upgrades.insert(def.id.clone(), next);
    }

    /// Explicit restart: the only way out of defeat. Fired milestones stay
    /// fired.
    pub fn restart(&mut self, tuning: &EconomyTuning, now_ms: i64) {
        let fired = std::mem::take(&mut self.milestones);
        *self = Self::initial(tuning, now_ms);
        self.milestones = fired;
        self.log(LogChannel::Comms, now_ms, LOG_RESTARTED);
    }

    /// Closed-form catch-up over `dt_ms`, returning the summary lines.
    pub fn catch_up(&mut self, tuning: &EconomyTuning, dt_ms: f64, now_ms: i64) -> Vec<String> {
        let away = format!("Offline for {}", format_duration_ms(dt_ms));
        if self.defeated {
            self.advance(tuning, dt_ms, AdvanceMode::Offline, now_ms);
            return vec![
                away,
                format!("Systems were already down ({} maxed).", tuning.pressure_label),
            ];
        }
        let report = self.advance(tuning, dt_ms, AdvanceMode::Offline, now_ms);
        let outcome = if report.defeated_now {
            String::from("SYSTEM FAILURE occurred while offline.")
        } else {
            String::from("Stabilisation timer resets while offline.")
        };
        vec![
            away,
            format!(
                "Generated +{} {}",
                floor_f64_to_u64(report.generated),
                tuning.resource_label
            ),
            format!(
                "{}: {:.1}% \u{2192} {:.1}%",
                tuning.pressure_label, report.pressure_before, report.pressure_after
            ),
            outcome,
        ]
    }

    /// One-line status of the win condition for the player.
    #[must_use]
    pub fn progress_text(&self, tuning: &EconomyTuning) -> String {
        let win = &tuning.win;
        if self.defeated {
            return String::from("SYSTEM FAILURE: restart required");
        }
        if self.completed {
            return String::from("Stabilised");
        }
        if self.resource < win.resource_threshold {
            return format!(
                "Reach {} {} ({:.0}%)",
                floor_f64_to_u64(win.resource_threshold),
                tuning.resource_label,
                (self.resource / win.resource_threshold * 100.0).min(100.0)
            );
        }
        if !self.has_mitigation(tuning) {
            return String::from("Install a mitigation upgrade");
        }
        if self.pressure > win.pressure_ceiling {
            return format!(
                "Bring {} under {:.0}%",
                tuning.pressure_label, win.pressure_ceiling
            );
        }
        format!(
            "Holding {:.1}s / {:.0}s",
            ms_to_secs(self.hold_ms),
            ms_to_secs(win.hold_ms)
        )
    }

    /// Append a `[HH:MM:SS]` stamped line, dropping the oldest past capacity.
    pub fn log(&mut self, channel: LogChannel, now_ms: i64, line: &str) {
        let buffer = match channel {
            LogChannel::Comms => &mut self.comms,
            LogChannel::Transmission => &mut self.transmission,
        };
        buffer.push_back(format!("[{}] {line}", stamp(now_ms)));
        trim(buffer);
    }
}

fn trim(buffer: &mut VecDeque<String>) {
    while buffer.len() > LOG_CAPACITY {
        buffer.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::signal_tuning;
    use serde_json::json;

    fn fresh() -> (EconomyTuning, EconomyState) {
        let tuning = signal_tuning().unwrap();
        let state = EconomyState::initial(&tuning, 0);
        (tuning, state)
    }

    #[test]
    fn generation_and_pressure_follow_rates() {
        let (tuning, mut state) = fresh();
        let report = state.advance(&tuning, 10_000.0, AdvanceMode::Live, 10_000);
        assert!((report.generated - 10.0).abs() < 1e-9);
        assert!((state.resource - 10.0).abs() < 1e-9);
        let expected = tuning.pressure.base_rate * 10.0
            + tuning.pressure.add_per_scale * (10.0 / tuning.pressure.scale_at) * 10.0;
        assert!((state.pressure - expected).abs() < 1e-9);
    }

    #[test]
    fn purge_prices_follow_efficiency_level() {
        let (tuning, mut state) = fresh();
        assert!((state.purge_cost(&tuning) - 60.0).abs() < f64::EPSILON);
        assert!((state.purge_amount(&tuning) - 18.0).abs() < f64::EPSILON);
        state.upgrades.insert(String::from("purgeEfficiency"), 2);
        assert!((state.purge_cost(&tuning) - 51.0).abs() < f64::EPSILON);
        assert!((state.purge_amount(&tuning) - 21.6).abs() < 1e-9);
        state.upgrades.insert(String::from("purgeEfficiency"), 20);
        assert!((state.purge_cost(&tuning) - 24.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unaffordable_actions_leave_state_untouched() {
        let (tuning, mut state) = fresh();
        state.resource = 10.0;
        state.pressure = 30.0;
        let before = state.clone();
        assert!(matches!(
            state.purge(&tuning, 0),
            Err(EconomyError::Unaffordable { .. })
        ));
        assert!(matches!(
            state.buy(&tuning, "spsBoost", 0),
            Err(EconomyError::Unaffordable { .. })
        ));
        assert_eq!(
            state.buy(&tuning, "nope", 0),
            Err(EconomyError::UnknownUpgrade(String::from("nope")))
        );
        assert_eq!(state, before);
    }

    #[test]
    fn multiplier_divides_out_previous_level() {
        let (tuning, mut state) = fresh();
        state.resource = 1_000_000.0;
        for _ in 0..3 {
            state.buy(&tuning, "spsMult", 0).unwrap();
        }
        assert!((state.generation_rate - 1.3).abs() < 1e-9);
        state.buy(&tuning, "spsBoost", 0).unwrap();
        assert!((state.generation_rate - 2.6).abs() < 1e-9);
        assert!((state.base_generation - 2.0).abs() < 1e-9);
    }

    #[test]
    fn ping_grants_power_and_relieves_fatigue() {
        let (tuning, mut state) = fresh();
        state.fatigue = 0.5;
        let gain = state.ping(&tuning, 0).unwrap();
        assert!((gain - 5.0).abs() < f64::EPSILON);
        assert!((state.pressure - 0.25).abs() < 1e-9);
        assert!(state.fatigue < 0.5);
    }

    #[test]
    fn holding_repeats_in_closed_form_and_tires() {
        let (tuning, mut state) = fresh();
        state.start_hold().unwrap();
        let report = state.advance(&tuning, 1_000.0, AdvanceMode::Live, 1_000);
        assert_eq!(report.auto_pings, 5);
        assert!(state.fatigue > 0.0);
        let tired = state.effective_ping_power(&tuning);
        assert!(tired < state.ping_power);

        state.stop_hold();
        state.advance(&tuning, 10_000.0, AdvanceMode::Live, 11_000);
        assert!(state.fatigue.abs() < f64::EPSILON);
    }

    #[test]
    fn hold_timer_resets_when_predicate_breaks() {
        let (tuning, mut state) = fresh();
        state.resource = tuning.win.resource_threshold;
        state.upgrades.insert(String::from("noiseCanceller"), 1);
        state.advance(&tuning, 2_000.0, AdvanceMode::Live, 0);
        assert!((state.hold_ms - 2_000.0).abs() < f64::EPSILON);
        state.pressure = tuning.win.pressure_ceiling + 1.0;
        state.advance(&tuning, 1.0, AdvanceMode::Live, 0);
        assert!(state.hold_ms.abs() < f64::EPSILON);
    }

    #[test]
    fn holding_long_enough_completes() {
        let (tuning, mut state) = fresh();
        state.resource = tuning.win.resource_threshold;
        state.upgrades.insert(String::from("noiseCanceller"), 3);
        let mut completed = false;
        for _ in 0..50 {
            completed |= state.advance(&tuning, 250.0, AdvanceMode::Live, 0).completed_now;
        }
        assert!(completed);
        assert!(state.completed);
    }

    #[test]
    fn defeat_is_sticky_until_restart() {
        let (tuning, mut state) = fresh();
        state.pressure = 99.99;
        let report = state.advance(&tuning, 1_000.0, AdvanceMode::Live, 0);
        assert!(report.defeated_now);
        let frozen = state.clone();
        for _ in 0..10 {
            state.advance(&tuning, 5_000.0, AdvanceMode::Live, 0);
        }
        assert_eq!(state, frozen);
        assert_eq!(state.ping(&tuning, 0), Err(EconomyError::Defeated));

        state.restart(&tuning, 0);
        assert!(!state.defeated);
        assert!(state.pressure.abs() < f64::EPSILON);
        assert!(state.comms.back().unwrap().contains("re-established"));
    }

    #[test]
    fn catch_up_reports_the_window() {
        let (tuning, mut state) = fresh();
        let lines = state.catch_up(&tuning, 60_000.0, 60_000);
        assert_eq!(lines[0], "Offline for 1m 0s");
        assert_eq!(lines[1], format!("Generated +60 {}", tuning.resource_label));
        assert!(lines[2].starts_with(&tuning.pressure_label));
        assert_eq!(lines[3], "Stabilisation timer resets while offline.");
    }

    #[test]
    fn partial_blobs_backfill_from_levels() {
        let tuning = signal_tuning().unwrap();
        let blob = json!({ "signal": 40.0, "upgrades": { "spsBoost": 2, "pingBoost": 1 } });
        let state = EconomyState::from_value(&blob, &tuning, 0).unwrap();
        assert!((state.resource - 40.0).abs() < f64::EPSILON);
        assert!((state.generation_rate - 3.0).abs() < 1e-9);
        assert!((state.ping_power - 7.0).abs() < 1e-9);

        let fresh = EconomyState::from_value(&json!({}), &tuning, 0).unwrap();
        assert_eq!(fresh, EconomyState::initial(&tuning, 0));
    }

    #[test]
    fn logs_are_capped() {
        let (_, mut state) = fresh();
        for i in 0..100 {
            state.log(LogChannel::Transmission, 0, &format!("line {i}"));
        }
        assert_eq!(state.transmission.len(), LOG_CAPACITY);
        assert!(state.transmission.back().unwrap().ends_with("line 99"));
    }
}
