use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use sygnal_game::phases::{relay_tuning, signal_tuning};
use sygnal_game::{
    EconomyState, EconomyTuning, GameState, GatewayCall, LifecycleConfig, LifecycleError,
    ManualClock, MemoryGateway, OnboardingStep, Orchestrator, PhaseId, PhaseInput, Route,
    SaveOutcome, SavedState, StaticIdentity, TextSurface, TickStatus, default_registry,
};

use crate::logic::autoplay::{AutoplayStrategy, EconomyView, PlayerPolicy};

/// Simulation resolution; every timer in a plan is a multiple of this.
const STEP_MS: i64 = 50;
const SESSION_EPOCH_MS: i64 = 1_700_000_000_000;
const ONBOARDING_NAME: &str = "operator_a";

pub const PRIMARY_OPERATOR: &str = "operator-a";
pub const RELIEF_OPERATOR: &str = "operator-b";
pub const RELIEF_RESOURCE: f64 = 321.0;

type Session = Orchestrator<MemoryGateway, StaticIdentity>;
pub type Expectation = fn(&SessionSummary) -> Result<()>;

/// How far the primary operator got through sign-up before the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operator {
    Anonymous,
    /// Signed in, no profile yet; the harness completes onboarding.
    Unnamed,
    Named,
}

/// Save waiting in the gateway for the primary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeededSave {
    Nothing,
    Fresh,
    /// Past the resource threshold with mitigation installed.
    NearStable,
    /// Points at a phase this build does not register.
    RetiredPhase,
}

#[derive(Clone)]
pub struct SessionPlan {
    pub strategy: AutoplayStrategy,
    pub operator: Operator,
    pub seeded: SeededSave,
    pub offline_gap_ms: i64,
    pub play_ms: i64,
    pub decision_interval_ms: i64,
    pub switch_identity_at_ms: Option<i64>,
    pub expectations: Vec<Expectation>,
}

impl SessionPlan {
    #[must_use]
    pub fn new(strategy: AutoplayStrategy) -> Self {
        Self {
            strategy,
            operator: Operator::Named,
            seeded: SeededSave::Nothing,
            offline_gap_ms: 0,
            play_ms: 60_000,
            decision_interval_ms: 1_000,
            switch_identity_at_ms: None,
            expectations: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    /// Seed a save last seen `offline_gap_ms` before the session boots.
    #[must_use]
    pub const fn with_seeded_save(mut self, seeded: SeededSave, offline_gap_ms: i64) -> Self {
        self.seeded = seeded;
        self.offline_gap_ms = offline_gap_ms;
        self
    }

    #[must_use]
    pub const fn with_play_ms(mut self, play_ms: i64) -> Self {
        self.play_ms = play_ms;
        self
    }

    #[must_use]
    pub const fn with_decision_interval(mut self, interval_ms: i64) -> Self {
        self.decision_interval_ms = interval_ms;
        self
    }

    #[must_use]
    pub const fn with_identity_switch_at(mut self, at_ms: i64) -> Self {
        self.switch_identity_at_ms = Some(at_ms);
        self
    }

    #[must_use]
    pub fn with_expectation(mut self, expectation: Expectation) -> Self {
        self.expectations.push(expectation);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub at_ms: i64,
    pub phase: String,
    pub input: PhaseInput,
    pub policy: &'static str,
    pub rationale: &'static str,
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveTally {
    pub saved: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl SaveTally {
    fn record(&mut self, outcome: SaveOutcome) {
        match outcome {
            SaveOutcome::Saved => self.saved += 1,
            SaveOutcome::Skipped(_) => self.skipped += 1,
            SaveOutcome::Failed => self.failed += 1,
        }
    }
}

/// Everything observed while a plan ran.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub strategy: AutoplayStrategy,
    pub route: Route,
    pub active_phase: Option<PhaseId>,
    /// Offline report as it stood right after boot.
    pub boot_offline_summary: Vec<String>,
    pub final_state: GameState,
    pub ticks: u64,
    pub failed_ticks: u64,
    pub decisions: Vec<DecisionRecord>,
    pub saves: SaveTally,
    pub journal: Vec<GatewayCall>,
    /// Journal length when the operator switch began.
    pub switch_journal_index: Option<usize>,
    pub frame: Vec<String>,
    tunings: Rc<Tunings>,
}

impl SessionSummary {
    /// Decoded economy of `phase` in the final state.
    #[must_use]
    pub fn economy(&self, phase: &str) -> Option<EconomyState> {
        let tuning = self.tunings.get(phase)?;
        let blob = self.final_state.phase_state(phase)?;
        EconomyState::from_value(blob, tuning, 0).ok()
    }

    #[must_use]
    pub fn tuning(&self, phase: &str) -> Option<&EconomyTuning> {
        self.tunings.get(phase)
    }

    #[must_use]
    pub fn rejected_inputs(&self) -> usize {
        self.decisions.iter().filter(|d| !d.accepted).count()
    }

    #[must_use]
    pub fn inputs_sent(&self, input: &PhaseInput) -> usize {
        self.decisions.iter().filter(|d| &d.input == input).count()
    }

    #[must_use]
    pub fn gateway_saves(&self, identity_id: &str) -> usize {
        self.journal
            .iter()
            .filter(|call| matches!(call, GatewayCall::Save(Some(id)) if id == identity_id))
            .count()
    }

    /// Canonical JSON of the final state, for determinism checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be encoded.
    pub fn fingerprint(&self) -> Result<String> {
        serde_json::to_string(&self.final_state).context("encoding final state")
    }
}

/// Bundled economy tunings keyed by phase.
#[derive(Debug)]
pub struct Tunings(BTreeMap<PhaseId, EconomyTuning>);

impl Tunings {
    /// # Errors
    ///
    /// Returns an error if a bundled tuning is invalid.
    pub fn load() -> Result<Self> {
        let mut map = BTreeMap::new();
        map.insert(
            PhaseId::from("signal"),
            signal_tuning().context("loading signal tuning")?,
        );
        map.insert(
            PhaseId::from("relay"),
            relay_tuning().context("loading relay tuning")?,
        );
        Ok(Self(map))
    }

    #[must_use]
    pub fn get(&self, phase: &str) -> Option<&EconomyTuning> {
        self.0.get(phase)
    }
}

/// Runs [`SessionPlan`]s against a real orchestrator with in-memory
/// collaborators and a hand-advanced clock.
#[derive(Debug, Clone)]
pub struct SessionTester {
    config: LifecycleConfig,
    tunings: Rc<Tunings>,
    verbose: bool,
}

impl SessionTester {
    /// # Errors
    ///
    /// Returns an error if the configuration or bundled tunings are invalid.
    pub fn try_new(config: LifecycleConfig, verbose: bool) -> Result<Self> {
        config.validate().context("validating lifecycle config")?;
        Ok(Self {
            config,
            tunings: Rc::new(Tunings::load()?),
            verbose,
        })
    }

    fn seeded_save(&self, seeded: SeededSave) -> Result<Option<SavedState>> {
        let mut state = GameState::fresh(SESSION_EPOCH_MS);
        let signal = PhaseId::from("signal");
        let Some(tuning) = self.tunings.get(signal.as_str()) else {
            return Ok(None);
        };
        let mut economy = EconomyState::initial(tuning, SESSION_EPOCH_MS);
        match seeded {
            SeededSave::Nothing => return Ok(None),
            SeededSave::Fresh => {}
            SeededSave::NearStable => {
                economy.resource = tuning.win.resource_threshold;
                economy.upgrades.insert(String::from("noiseCanceller"), 4);
            }
            SeededSave::RetiredPhase => {
                state.phase = PhaseId::from("retired");
                return Ok(Some(SavedState::from_state(&state)?));
            }
        }
        state.phase = signal.clone();
        state.phases.insert(signal, economy.to_value()?);
        Ok(Some(SavedState::from_state(&state)?))
    }

    fn relief_save(&self) -> Result<Option<SavedState>> {
        let Some(saved) = self.seeded_save(SeededSave::Fresh)? else {
            return Ok(None);
        };
        let mut state = saved.into_state()?;
        if let Some(blob) = state.phases.get_mut("signal") {
            blob["resource"] = Value::from(RELIEF_RESOURCE);
        }
        Ok(Some(SavedState::from_state(&state)?))
    }

    /// Boot a session, play it for `plan.play_ms`, and tear it down.
    ///
    /// # Errors
    ///
    /// Returns an error if boot, an operator switch, or a non-input lifecycle
    /// step fails. Rejected inputs are recorded, not returned.
    pub async fn run_plan(&self, plan: &SessionPlan) -> Result<SessionSummary> {
        let clock = ManualClock::starting_at(SESSION_EPOCH_MS + plan.offline_gap_ms);
        let gateway = MemoryGateway::new();
        let identity = StaticIdentity::new();
        match plan.operator {
            Operator::Anonymous => {}
            Operator::Unnamed => {
                identity.sign_in(PRIMARY_OPERATOR);
            }
            Operator::Named => {
                identity.sign_in(PRIMARY_OPERATOR);
                identity.create_profile(PRIMARY_OPERATOR, "Operator A");
            }
        }
        identity.create_profile(RELIEF_OPERATOR, "Operator B");
        if let Some(saved) = self.seeded_save(plan.seeded)? {
            gateway.insert(PRIMARY_OPERATOR, saved);
        }
        if let Some(saved) = self.relief_save()? {
            gateway.insert(RELIEF_OPERATOR, saved);
        }

        let surface = TextSurface::new();
        let registry = default_registry().context("loading bundled phases")?;
        let mut session = Orchestrator::new(
            self.config.clone(),
            registry,
            gateway.clone(),
            identity.clone(),
            Box::new(clock.clone()),
            Box::new(surface.clone()),
        )
        .context("building orchestrator")?;
        session.boot().await.context("booting session")?;
        let boot_offline_summary = session.state().meta.offline_summary.clone();

        let tick_every = i64::try_from(self.config.tick_interval_ms)?;
        let autosave_every = i64::try_from(self.config.autosave_interval_ms)?;
        let mut policy = plan.strategy.create_policy();
        let mut decisions = Vec::new();
        let mut saves = SaveTally::default();
        let mut ticks = 0;
        let mut failed_ticks = 0;
        let mut switch_journal_index = None;
        let (mut elapsed, mut last_tick, mut last_decision, mut last_autosave) = (0, 0, 0, 0);

        while elapsed < plan.play_ms {
            clock.advance(STEP_MS);
            elapsed += STEP_MS;

            if let Some(at) = plan.switch_identity_at_ms
                && switch_journal_index.is_none()
                && elapsed >= at
            {
                switch_journal_index = Some(gateway.journal().len());
                let relief = identity.sign_in(RELIEF_OPERATOR);
                session
                    .on_identity_change(Some(relief))
                    .await
                    .context("switching operator")?;
            }
            if elapsed - last_tick >= tick_every {
                last_tick = elapsed;
                ticks += 1;
                if session.tick() == TickStatus::Failed {
                    failed_ticks += 1;
                }
            }
            if elapsed - last_decision >= plan.decision_interval_ms {
                last_decision = elapsed;
                let record = if plan.operator == Operator::Unnamed {
                    self.finish_onboarding(&mut session, &identity, elapsed).await?
                } else {
                    None
                };
                let record = match record {
                    Some(record) => Some(record),
                    None => self.decide(&mut session, policy.as_mut(), elapsed).await?,
                };
                decisions.extend(record);
            }
            if let Some(outcome) = session.flush_if_due().await {
                saves.record(outcome);
            }
            if elapsed - last_autosave >= autosave_every {
                last_autosave = elapsed;
                saves.record(session.autosave().await);
            }
        }

        session.render();
        let frame = surface.lines();
        let active_phase = session.active_phase().cloned();
        let route = session.route().clone();
        saves.record(session.teardown().await);

        Ok(SessionSummary {
            strategy: plan.strategy,
            route,
            active_phase,
            boot_offline_summary,
            final_state: session.snapshot(),
            ticks,
            failed_ticks,
            decisions,
            saves,
            journal: gateway.journal(),
            switch_journal_index,
            frame,
            tunings: Rc::clone(&self.tunings),
        })
    }

    /// Act as the host during sign-up: submit a name, then create the
    /// profile and report the identity again.
    async fn finish_onboarding(
        &self,
        session: &mut Session,
        identity: &StaticIdentity,
        at_ms: i64,
    ) -> Result<Option<DecisionRecord>> {
        if session.route().step != Some(OnboardingStep::Username) {
            return Ok(None);
        }
        let input = PhaseInput::SubmitName(String::from(ONBOARDING_NAME));
        let accepted = dispatch(session, input.clone()).await?;
        if accepted {
            identity.create_profile(PRIMARY_OPERATOR, ONBOARDING_NAME);
            session
                .on_identity_change(identity.current())
                .await
                .context("refreshing profile after sign-up")?;
        }
        Ok(Some(DecisionRecord {
            at_ms,
            phase: session.config().onboarding_phase.to_string(),
            input,
            policy: "Host",
            rationale: "create profile",
            accepted,
        }))
    }

    async fn decide(
        &self,
        session: &mut Session,
        policy: &mut dyn PlayerPolicy,
        at_ms: i64,
    ) -> Result<Option<DecisionRecord>> {
        let Some(active) = session.active_phase().cloned() else {
            return Ok(None);
        };
        let Some(tuning) = self.tunings.get(active.as_str()) else {
            return Ok(None);
        };
        let state = session.state();
        let blob = state
            .phase_state(active.as_str())
            .cloned()
            .unwrap_or(Value::Null);
        let economy = EconomyState::from_value(&blob, tuning, at_ms)
            .with_context(|| format!("decoding {active} economy"))?;
        let view = EconomyView {
            economy: &economy,
            tuning,
            meta: &state.meta,
        };
        let Some(decision) = policy.decide(&view) else {
            return Ok(None);
        };

        let accepted = dispatch(session, decision.input.clone()).await?;
        if self.verbose {
            let mark = if accepted { "✓".green() } else { "✗".red() };
            println!(
                "  {mark} t+{:>6}ms {:<8} {:?} ({})",
                at_ms,
                active.as_str(),
                decision.input,
                decision.rationale
            );
        }
        Ok(Some(DecisionRecord {
            at_ms,
            phase: active.to_string(),
            input: decision.input,
            policy: policy.name(),
            rationale: decision.rationale,
            accepted,
        }))
    }
}

/// Dispatch one input; a phase refusing it is an outcome, anything else is
/// an error.
async fn dispatch(session: &mut Session, input: PhaseInput) -> Result<bool> {
    match session.dispatch(input).await {
        Ok(()) => Ok(true),
        Err(LifecycleError::Input { phase, source }) => {
            log::debug!("{phase} refused input: {source}");
            Ok(false)
        }
        Err(err) => Err(err).context("dispatching input"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tester() -> SessionTester {
        SessionTester::try_new(LifecycleConfig::default(), false).unwrap()
    }

    #[tokio::test]
    async fn anonymous_sessions_stay_in_onboarding() {
        let plan = SessionPlan::new(AutoplayStrategy::Balanced)
            .with_operator(Operator::Anonymous)
            .with_play_ms(5_000);
        let summary = tester().run_plan(&plan).await.unwrap();
        assert_eq!(summary.active_phase, Some(PhaseId::from("onboarding")));
        assert!(summary.decisions.is_empty());
        assert_eq!(summary.saves.saved, 0);
        assert!(summary.journal.is_empty());
    }

    #[tokio::test]
    async fn unnamed_operators_are_walked_through_sign_up() {
        let plan = SessionPlan::new(AutoplayStrategy::Tapper)
            .with_operator(Operator::Unnamed)
            .with_play_ms(5_000);
        let summary = tester().run_plan(&plan).await.unwrap();
        assert_eq!(summary.active_phase, Some(PhaseId::from("signal")));
        assert_eq!(summary.decisions[0].policy, "Host");
        assert!(summary.inputs_sent(&PhaseInput::Ping) >= 3);
    }

    #[tokio::test]
    async fn ticks_follow_the_configured_interval() {
        let plan = SessionPlan::new(AutoplayStrategy::Idle).with_play_ms(10_000);
        let summary = tester().run_plan(&plan).await.unwrap();
        assert_eq!(summary.ticks, 40);
        let economy = summary.economy("signal").unwrap();
        assert!((economy.resource - 10.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn identical_plans_fingerprint_identically() {
        let plan = SessionPlan::new(AutoplayStrategy::Balanced).with_play_ms(20_000);
        let tester = tester();
        let a = tester.run_plan(&plan).await.unwrap();
        let b = tester.run_plan(&plan).await.unwrap();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }
}
