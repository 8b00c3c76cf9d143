pub mod catalog;

use crate::logic::{AutoplayStrategy, SessionPlan};

#[derive(Clone)]
pub struct TestScenario {
    pub name: String,
    pub plan: SessionPlan,
}

impl TestScenario {
    #[must_use]
    pub fn session(name: impl Into<String>, plan: SessionPlan) -> Self {
        Self {
            name: name.into(),
            plan,
        }
    }
}

/// Resolve a scenario key. `strategy` only shapes the `autoplay` scenario.
pub fn get_scenario(name: &str, strategy: AutoplayStrategy) -> Option<TestScenario> {
    let scenario = match name.to_lowercase().as_str() {
        "smoke" => TestScenario::session("Smoke Test", catalog::smoke_plan()),
        "onboarding-routing" | "onboarding" => {
            TestScenario::session("Onboarding Routing", catalog::onboarding_plan())
        }
        "offline-hour" | "offline" => {
            TestScenario::session("Offline Hour Catch-up", catalog::offline_hour_plan())
        }
        "debounce-burst" | "debounce" => {
            TestScenario::session("Debounced Save Burst", catalog::debounce_burst_plan())
        }
        "identity-switch" | "switch" => {
            TestScenario::session("Operator Switch Isolation", catalog::identity_switch_plan())
        }
        "unknown-phase" => {
            TestScenario::session("Retired Phase Fallback", catalog::unknown_phase_plan())
        }
        "balanced-ten-minutes" | "balanced" => {
            TestScenario::session("Balanced Ten Minutes", catalog::balanced_plan())
        }
        "greedy-collapse" | "greedy" => {
            TestScenario::session("Greedy Collapse", catalog::greedy_plan())
        }
        "stabilise-and-advance" | "stabilise" => {
            TestScenario::session("Stabilise and Advance", catalog::stabilise_plan())
        }
        "autoplay" => TestScenario::session(
            format!("Autoplay ({strategy})"),
            catalog::autoplay_plan(strategy),
        ),
        _ => return None,
    };
    Some(scenario)
}

pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    vec![
        ("smoke", "Smoke Test"),
        ("onboarding-routing", "Onboarding Routing"),
        ("offline-hour", "Offline Hour Catch-up"),
        ("debounce-burst", "Debounced Save Burst"),
        ("identity-switch", "Operator Switch Isolation"),
        ("unknown-phase", "Retired Phase Fallback"),
        ("balanced-ten-minutes", "Balanced Ten Minutes"),
        ("greedy-collapse", "Greedy Collapse"),
        ("stabilise-and-advance", "Stabilise and Advance"),
        ("autoplay", "Autoplay with --strategy"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_scenario_resolves() {
        for (key, description) in list_scenarios() {
            let scenario = get_scenario(key, AutoplayStrategy::Balanced)
                .unwrap_or_else(|| panic!("{key} did not resolve"));
            if key != "autoplay" {
                assert_eq!(scenario.name, description);
            }
        }
    }

    #[test]
    fn aliases_and_case_are_accepted() {
        assert!(get_scenario("GREEDY", AutoplayStrategy::Idle).is_some());
        assert!(get_scenario("nope", AutoplayStrategy::Idle).is_none());
        let autoplay = get_scenario("autoplay", AutoplayStrategy::Tapper).unwrap();
        assert_eq!(autoplay.name, "Autoplay (Tapper)");
        assert_eq!(autoplay.plan.strategy, AutoplayStrategy::Tapper);
    }
}
