use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sygnal_game::{EconomyState, EconomyTuning, Meta, PhaseInput, UpgradeDef, UpgradeEffect};

/// Pressure at which the balanced player reaches for a purge.
const PURGE_AT: f64 = 50.0;

/// What a policy sees when it is asked for its next move.
#[derive(Debug, Clone, Copy)]
pub struct EconomyView<'a> {
    pub economy: &'a EconomyState,
    pub tuning: &'a EconomyTuning,
    pub meta: &'a Meta,
}

impl EconomyView<'_> {
    fn next_unlocked(&self) -> bool {
        self.tuning
            .unlocks
            .as_ref()
            .is_some_and(|next| self.meta.is_unlocked(next.as_str()))
    }

    /// Cheapest upgrade matching `wanted` that leaves `reserve` in the bank.
    fn cheapest(&self, reserve: f64, wanted: impl Fn(&UpgradeDef) -> bool) -> Option<String> {
        self.tuning
            .upgrades
            .iter()
            .filter(|def| wanted(def))
            .map(|def| (def, def.cost_at(self.economy.level(&def.id))))
            .filter(|(_, cost)| cost + reserve <= self.economy.resource)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(def, _)| def.id.clone())
    }
}

/// Decision returned by a [`PlayerPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub input: PhaseInput,
    pub rationale: &'static str,
}

impl PolicyDecision {
    const fn new(input: PhaseInput, rationale: &'static str) -> Self {
        Self { input, rationale }
    }
}

/// Policy interface for automated play.
pub trait PlayerPolicy {
    fn name(&self) -> &'static str;

    /// Next input, or `None` to stay idle this turn.
    fn decide(&mut self, view: &EconomyView<'_>) -> Option<PolicyDecision>;
}

/// Built-in autoplay strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AutoplayStrategy {
    /// Never touches anything.
    Idle,
    /// Pings every turn and restarts after a failure.
    Tapper,
    /// Purges, mitigates, invests, and protects a running stability hold.
    Balanced,
    /// Buys generation only and never purges.
    Greedy,
}

impl AutoplayStrategy {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Tapper => "Tapper",
            Self::Balanced => "Balanced",
            Self::Greedy => "Greedy",
        }
    }

    #[must_use]
    pub fn create_policy(self) -> Box<dyn PlayerPolicy> {
        match self {
            Self::Idle => Box::new(IdlePolicy),
            Self::Tapper => Box::new(TapperPolicy),
            Self::Balanced => Box::new(BalancedPolicy),
            Self::Greedy => Box::new(GreedyPolicy),
        }
    }
}

impl fmt::Display for AutoplayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

struct IdlePolicy;
struct TapperPolicy;
struct BalancedPolicy;
struct GreedyPolicy;

impl PlayerPolicy for IdlePolicy {
    fn name(&self) -> &'static str {
        "Idle"
    }

    fn decide(&mut self, _view: &EconomyView<'_>) -> Option<PolicyDecision> {
        None
    }
}

impl PlayerPolicy for TapperPolicy {
    fn name(&self) -> &'static str {
        "Tapper"
    }

    fn decide(&mut self, view: &EconomyView<'_>) -> Option<PolicyDecision> {
        if view.economy.defeated {
            return Some(PolicyDecision::new(PhaseInput::Restart, "systems down"));
        }
        Some(PolicyDecision::new(PhaseInput::Ping, "tap"))
    }
}

impl PlayerPolicy for BalancedPolicy {
    fn name(&self) -> &'static str {
        "Balanced"
    }

    fn decide(&mut self, view: &EconomyView<'_>) -> Option<PolicyDecision> {
        let economy = view.economy;
        let tuning = view.tuning;
        if economy.defeated {
            return Some(PolicyDecision::new(PhaseInput::Restart, "systems down"));
        }
        if economy.completed && view.next_unlocked() {
            return Some(PolicyDecision::new(PhaseInput::Advance, "next bay open"));
        }
        let purge_cost = economy.purge_cost(tuning);
        if economy.pressure >= PURGE_AT && purge_cost <= economy.resource {
            return Some(PolicyDecision::new(PhaseInput::Purge, "pressure high"));
        }
        if economy.is_stable(tuning) || economy.completed {
            return Some(PolicyDecision::new(PhaseInput::Ping, "holding steady"));
        }
        if !economy.has_mitigation(tuning)
            && let Some(id) = view.cheapest(purge_cost, |def| def.mitigating)
        {
            return Some(PolicyDecision::new(PhaseInput::Buy(id), "first mitigation"));
        }
        if economy.resource < tuning.win.resource_threshold
            && let Some(id) = view.cheapest(purge_cost, |_| true)
        {
            return Some(PolicyDecision::new(PhaseInput::Buy(id), "invest"));
        }
        Some(PolicyDecision::new(PhaseInput::Ping, "build reserve"))
    }
}

impl PlayerPolicy for GreedyPolicy {
    fn name(&self) -> &'static str {
        "Greedy"
    }

    fn decide(&mut self, view: &EconomyView<'_>) -> Option<PolicyDecision> {
        if view.economy.defeated {
            return None;
        }
        let generation = |def: &UpgradeDef| {
            matches!(
                def.effect,
                UpgradeEffect::AddGeneration { .. }
                    | UpgradeEffect::MultiplyGeneration { .. }
                    | UpgradeEffect::AddPingPower { .. }
            )
        };
        if let Some(id) = view.cheapest(0.0, generation) {
            return Some(PolicyDecision::new(PhaseInput::Buy(id), "more output"));
        }
        Some(PolicyDecision::new(PhaseInput::Ping, "tap"))
    }
}
