use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::common::scenario::TestScenario;
use crate::logic::harness::{SessionPlan, SessionSummary, SessionTester};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub passed: bool,
    pub iterations_run: usize,
    pub successful_iterations: usize,
    pub failures: Vec<String>,
    #[serde(with = "duration_serde")]
    pub average_duration: Duration,
    #[serde(with = "duration_vec_serde")]
    pub performance_data: Vec<Duration>,
}

pub struct LogicTester {
    tester: SessionTester,
    verbose: bool,
}

impl LogicTester {
    pub const fn new(tester: SessionTester, verbose: bool) -> Self {
        Self { tester, verbose }
    }

    pub async fn run_scenario(&self, scenario: &TestScenario, iterations: usize) -> ScenarioResult {
        if self.verbose {
            println!(
                "🧪 Testing scenario: {} (strategy: {} play: {}ms)",
                scenario.name.bright_white(),
                scenario.plan.strategy,
                scenario.plan.play_ms
            );
        }

        let (successes, failures, performance_data) =
            self.run_session_iterations(&scenario.plan, iterations).await;

        let avg_duration = if performance_data.is_empty() {
            Duration::ZERO
        } else {
            performance_data.iter().sum::<Duration>()
                / u32::try_from(performance_data.len()).unwrap_or(1)
        };

        ScenarioResult {
            scenario_name: scenario.name.clone(),
            passed: failures.is_empty(),
            iterations_run: iterations,
            successful_iterations: successes,
            failures,
            average_duration: avg_duration,
            performance_data,
        }
    }

    /// Every iteration replays the same plan on a fresh session; a final
    /// state that differs from the first iteration's is a failure.
    async fn run_session_iterations(
        &self,
        plan: &SessionPlan,
        iterations: usize,
    ) -> (usize, Vec<String>, Vec<Duration>) {
        let mut successes = 0;
        let mut failures = Vec::new();
        let mut performance_data = Vec::new();
        let mut baseline: Option<String> = None;

        for i in 0..iterations {
            let start_time = Instant::now();

            let outcome = match self.tester.run_plan(plan).await {
                Ok(summary) => evaluate(plan, &summary, &mut baseline).map(|()| summary),
                Err(err) => Err(format!("{err:#}")),
            };

            match outcome {
                Ok(summary) => {
                    successes += 1;
                    let duration = start_time.elapsed();
                    performance_data.push(duration);
                    if self.verbose {
                        println!(
                            "  ✅ Iteration {}/{} passed ({duration:?}) strategy:{} ticks:{} decisions:{} saves:{}",
                            i + 1,
                            iterations,
                            summary.strategy,
                            summary.ticks,
                            summary.decisions.len(),
                            summary.saves.saved
                        );
                    }
                }
                Err(err) => {
                    if self.verbose {
                        println!(
                            "  ❌ Iteration {}/{} failed: {}",
                            i + 1,
                            iterations,
                            err.clone().red()
                        );
                    }
                    failures.push(format!(
                        "Iteration {} (strategy {}): {err}",
                        i + 1,
                        plan.strategy.label()
                    ));
                }
            }
        }

        (successes, failures, performance_data)
    }
}

fn evaluate(
    plan: &SessionPlan,
    summary: &SessionSummary,
    baseline: &mut Option<String>,
) -> Result<(), String> {
    for expectation in &plan.expectations {
        if let Err(err) = expectation(summary) {
            return Err(format!("{err} | {}", summarize_decision_path(summary)));
        }
    }
    let fingerprint = summary.fingerprint().map_err(|err| format!("{err:#}"))?;
    if let Some(first) = baseline.as_deref() {
        if first != fingerprint {
            return Err(String::from("final state differs from the first iteration"));
        }
        return Ok(());
    }
    *baseline = Some(fingerprint);
    Ok(())
}

fn summarize_decision_path(summary: &SessionSummary) -> String {
    if summary.decisions.is_empty() {
        return "no decisions recorded".to_string();
    }

    summary
        .decisions
        .iter()
        .rev()
        .take(3)
        .map(|entry| {
            format!(
                "t+{}ms ({}): {:?} [{}] {} reason {}",
                entry.at_ms,
                entry.phase,
                entry.input,
                entry.policy,
                if entry.accepted { "ok" } else { "rejected" },
                entry.rationale
            )
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u128::deserialize(deserializer)?;
        Ok(Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
    }
}

mod duration_vec_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis: Vec<u128> = durations.iter().map(Duration::as_millis).collect();
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis_vec = Vec::<u128>::deserialize(deserializer)?;
        Ok(millis_vec
            .into_iter()
            .map(|m| Duration::from_millis(u64::try_from(m).unwrap_or(0)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::AutoplayStrategy;
    use sygnal_game::LifecycleConfig;

    fn logic_tester() -> LogicTester {
        LogicTester::new(
            SessionTester::try_new(LifecycleConfig::default(), false).unwrap(),
            false,
        )
    }

    fn never_saves(summary: &SessionSummary) -> anyhow::Result<()> {
        anyhow::ensure!(summary.saves.saved == 0, "expected no saves");
        Ok(())
    }

    #[tokio::test]
    async fn failing_expectations_are_reported_per_iteration() {
        let plan = SessionPlan::new(AutoplayStrategy::Tapper)
            .with_play_ms(3_000)
            .with_expectation(never_saves);
        let scenario = TestScenario::session("Never Saves", plan);
        let result = logic_tester().run_scenario(&scenario, 2).await;
        assert!(!result.passed);
        assert_eq!(result.successful_iterations, 0);
        assert_eq!(result.failures.len(), 2);
        assert!(result.failures[0].contains("expected no saves"));
        assert!(result.failures[0].contains("Ping"));
    }

    #[tokio::test]
    async fn repeated_iterations_agree() {
        let plan = SessionPlan::new(AutoplayStrategy::Balanced).with_play_ms(5_000);
        let scenario = TestScenario::session("Repeatable", plan);
        let result = logic_tester().run_scenario(&scenario, 3).await;
        assert!(result.passed, "{:?}", result.failures);
        assert_eq!(result.performance_data.len(), 3);
    }

    #[test]
    fn durations_serialize_as_millis() {
        let result = ScenarioResult {
            scenario_name: String::from("x"),
            passed: true,
            iterations_run: 1,
            successful_iterations: 1,
            failures: Vec::new(),
            average_duration: Duration::from_millis(12),
            performance_data: vec![Duration::from_millis(12)],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["average_duration"], 12);
        let back: ScenarioResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.performance_data, vec![Duration::from_millis(12)]);
    }
}
