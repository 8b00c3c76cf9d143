use anyhow::{Result, ensure};

use crate::logic::harness::{PRIMARY_OPERATOR, RELIEF_OPERATOR, RELIEF_RESOURCE};
use crate::logic::{AutoplayStrategy, Operator, SeededSave, SessionPlan, SessionSummary};
use sygnal_game::{GatewayCall, PhaseInput, RouteState};

const HOUR_MS: i64 = 3_600_000;
const TEN_MINUTES_MS: i64 = 600_000;

pub fn smoke_plan() -> SessionPlan {
    SessionPlan::new(AutoplayStrategy::Balanced)
        .with_play_ms(30_000)
        .with_expectation(smoke_expectation)
}

pub fn onboarding_plan() -> SessionPlan {
    SessionPlan::new(AutoplayStrategy::Tapper)
        .with_operator(Operator::Unnamed)
        .with_play_ms(5_000)
        .with_expectation(onboarding_expectation)
}

pub fn offline_hour_plan() -> SessionPlan {
    SessionPlan::new(AutoplayStrategy::Tapper)
        .with_seeded_save(SeededSave::Fresh, HOUR_MS)
        .with_play_ms(3_000)
        .with_expectation(offline_hour_expectation)
}

pub fn debounce_burst_plan() -> SessionPlan {
    SessionPlan::new(AutoplayStrategy::Tapper)
        .with_decision_interval(100)
        .with_play_ms(2_000)
        .with_expectation(debounce_expectation)
}

pub fn identity_switch_plan() -> SessionPlan {
    SessionPlan::new(AutoplayStrategy::Tapper)
        .with_seeded_save(SeededSave::Fresh, 0)
        .with_play_ms(6_000)
        .with_identity_switch_at(3_000)
        .with_expectation(identity_switch_expectation)
}

pub fn unknown_phase_plan() -> SessionPlan {
    SessionPlan::new(AutoplayStrategy::Idle)
        .with_seeded_save(SeededSave::RetiredPhase, 0)
        .with_play_ms(2_000)
        .with_expectation(unknown_phase_expectation)
}

pub fn balanced_plan() -> SessionPlan {
    SessionPlan::new(AutoplayStrategy::Balanced)
        .with_play_ms(TEN_MINUTES_MS)
        .with_expectation(survival_expectation)
}

pub fn greedy_plan() -> SessionPlan {
    SessionPlan::new(AutoplayStrategy::Greedy)
        .with_play_ms(TEN_MINUTES_MS)
        .with_expectation(collapse_expectation)
}

pub fn stabilise_plan() -> SessionPlan {
    SessionPlan::new(AutoplayStrategy::Balanced)
        .with_seeded_save(SeededSave::NearStable, 0)
        .with_play_ms(15_000)
        .with_expectation(advance_expectation)
}

pub fn autoplay_plan(strategy: AutoplayStrategy) -> SessionPlan {
    SessionPlan::new(strategy)
        .with_play_ms(120_000)
        .with_expectation(healthy_loop_expectation)
}

fn healthy_loop_expectation(summary: &SessionSummary) -> Result<()> {
    ensure!(summary.ticks > 0, "simulation never ticked");
    ensure!(
        summary.failed_ticks == 0,
        "{} ticks failed",
        summary.failed_ticks
    );
    ensure!(summary.saves.failed == 0, "a save failed");
    Ok(())
}

fn smoke_expectation(summary: &SessionSummary) -> Result<()> {
    healthy_loop_expectation(summary)?;
    ensure!(
        summary.active_phase.as_ref().is_some_and(|id| id == "signal"),
        "expected signal to be mounted, got {:?}",
        summary.active_phase
    );
    ensure!(summary.ticks == 120, "expected 120 ticks, got {}", summary.ticks);
    ensure!(summary.saves.saved >= 1, "session never saved");
    ensure!(
        summary.frame.iter().any(|line| line.contains("SIGNAL LOCK")),
        "signal surface was not painted"
    );
    Ok(())
}

fn onboarding_expectation(summary: &SessionSummary) -> Result<()> {
    let first = summary
        .decisions
        .first()
        .ok_or_else(|| anyhow::anyhow!("no decisions recorded"))?;
    ensure!(
        first.policy == "Host" && first.accepted,
        "sign-up did not complete"
    );
    ensure!(
        summary.route.state == RouteState::IdentityWithProfile,
        "route stayed at {:?}",
        summary.route.state
    );
    ensure!(
        summary.active_phase.as_ref().is_some_and(|id| id == "signal"),
        "sign-up did not lead into play"
    );
    ensure!(
        summary.gateway_saves(PRIMARY_OPERATOR) >= 1,
        "new operator was never saved"
    );
    Ok(())
}

fn offline_hour_expectation(summary: &SessionSummary) -> Result<()> {
    let lines = &summary.boot_offline_summary;
    ensure!(lines.len() == 4, "unexpected offline report {lines:?}");
    ensure!(lines[0].starts_with("Offline for 1h"), "bad header {}", lines[0]);
    ensure!(lines[1] == "Generated +3600 signal", "bad gain line {}", lines[1]);
    ensure!(
        lines[3] == "SYSTEM FAILURE occurred while offline.",
        "failure was not reported"
    );
    let restart = summary
        .decisions
        .first()
        .ok_or_else(|| anyhow::anyhow!("no decisions recorded"))?;
    ensure!(
        restart.input == PhaseInput::Restart && restart.accepted,
        "first move should be an accepted restart"
    );
    let economy = summary
        .economy("signal")
        .ok_or_else(|| anyhow::anyhow!("signal economy missing"))?;
    ensure!(!economy.defeated, "restart did not clear defeat");
    ensure!(summary.rejected_inputs() == 0, "inputs were refused after restart");
    Ok(())
}

fn debounce_expectation(summary: &SessionSummary) -> Result<()> {
    ensure!(
        summary.inputs_sent(&PhaseInput::Ping) == 20,
        "expected 20 pings, sent {}",
        summary.inputs_sent(&PhaseInput::Ping)
    );
    let writes = summary.gateway_saves(PRIMARY_OPERATOR);
    ensure!(writes == 1, "burst produced {writes} writes instead of one");
    Ok(())
}

fn identity_switch_expectation(summary: &SessionSummary) -> Result<()> {
    let index = summary
        .switch_journal_index
        .ok_or_else(|| anyhow::anyhow!("operator switch never happened"))?;
    let after = &summary.journal[index..];
    ensure!(
        after.first() == Some(&GatewayCall::Load(Some(RELIEF_OPERATOR.to_string()))),
        "switch did not start with a load, journal {after:?}"
    );
    let leaked = after
        .iter()
        .filter(|call| matches!(call, GatewayCall::Save(Some(id)) if id == PRIMARY_OPERATOR))
        .count();
    ensure!(leaked == 0, "{leaked} writes reached the previous operator");
    ensure!(
        summary.gateway_saves(RELIEF_OPERATOR) >= 1,
        "relief operator was never saved"
    );
    let economy = summary
        .economy("signal")
        .ok_or_else(|| anyhow::anyhow!("signal economy missing"))?;
    ensure!(
        economy.resource >= RELIEF_RESOURCE,
        "relief save was not adopted (resource {})",
        economy.resource
    );
    Ok(())
}

fn unknown_phase_expectation(summary: &SessionSummary) -> Result<()> {
    ensure!(
        summary.active_phase.as_ref().is_some_and(|id| id == "signal"),
        "retired phase did not fall back, got {:?}",
        summary.active_phase
    );
    ensure!(summary.final_state.phase == "signal", "saved phase was not repaired");
    Ok(())
}

fn survival_expectation(summary: &SessionSummary) -> Result<()> {
    healthy_loop_expectation(summary)?;
    let economy = summary
        .economy("signal")
        .ok_or_else(|| anyhow::anyhow!("signal economy missing"))?;
    ensure!(!economy.defeated, "balanced play collapsed");
    ensure!(economy.purchases > 0, "balanced play never invested");
    ensure!(economy.pressure < 100.0, "pressure maxed out");
    Ok(())
}

fn collapse_expectation(summary: &SessionSummary) -> Result<()> {
    let economy = summary
        .economy("signal")
        .ok_or_else(|| anyhow::anyhow!("signal economy missing"))?;
    ensure!(economy.defeated, "unmitigated play should collapse");
    ensure!(
        summary.inputs_sent(&PhaseInput::Purge) == 0,
        "greedy play purged"
    );
    ensure!(!economy.has_mitigation(summary_tuning(summary)?), "greedy play mitigated");
    Ok(())
}

fn advance_expectation(summary: &SessionSummary) -> Result<()> {
    ensure!(
        summary.active_phase.as_ref().is_some_and(|id| id == "relay"),
        "did not move on, still in {:?}",
        summary.active_phase
    );
    ensure!(summary.final_state.meta.is_unlocked("relay"), "relay never unlocked");
    let signal = summary
        .economy("signal")
        .ok_or_else(|| anyhow::anyhow!("signal economy missing"))?;
    ensure!(signal.completed, "signal was not completed");
    ensure!(
        summary.inputs_sent(&PhaseInput::Advance) >= 1,
        "advance was never requested"
    );
    ensure!(
        summary.frame.iter().any(|line| line.contains("RELAY BAY")),
        "relay surface was not painted"
    );
    Ok(())
}

fn summary_tuning(summary: &SessionSummary) -> Result<&sygnal_game::EconomyTuning> {
    summary
        .tuning("signal")
        .ok_or_else(|| anyhow::anyhow!("signal tuning missing"))
}
