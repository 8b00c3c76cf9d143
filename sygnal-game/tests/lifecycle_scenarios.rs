use serde_json::Value;
use sygnal_game::phases::{OnboardingState, signal_tuning};
use sygnal_game::{
    EconomyState, GameState, GatewayCall, Identity, LifecycleConfig, LifecycleError, ManualClock,
    MemoryGateway, Orchestrator, PhaseId, PhaseInput, RouteState, SaveOutcome,
    SavedState, StaticIdentity, TextSurface, default_registry,
};

const T0: i64 = 1_700_000_000_000;
const HOUR_MS: i64 = 3_600_000;

struct Session {
    orchestrator: Orchestrator<MemoryGateway, StaticIdentity>,
    gateway: MemoryGateway,
    identity: StaticIdentity,
    clock: ManualClock,
    surface: TextSurface,
}

fn session_at(now: i64) -> Session {
    let gateway = MemoryGateway::new();
    let identity = StaticIdentity::new();
    let clock = ManualClock::starting_at(now);
    let surface = TextSurface::new();
    let orchestrator = Orchestrator::new(
        LifecycleConfig::default(),
        default_registry().unwrap(),
        gateway.clone(),
        identity.clone(),
        Box::new(clock.clone()),
        Box::new(surface.clone()),
    )
    .unwrap();
    Session {
        orchestrator,
        gateway,
        identity,
        clock,
        surface,
    }
}

fn operator(session: &Session, id: &str) {
    session.identity.sign_in(id);
    session.identity.create_profile(id, "Operator");
}

fn signal_save(last_seen_at: i64, economy: &EconomyState) -> SavedState {
    let mut state = GameState::fresh(last_seen_at);
    state.phase = PhaseId::from("signal");
    state
        .phases
        .insert(PhaseId::from("signal"), economy.to_value().unwrap());
    SavedState::from_state(&state).unwrap()
}

fn economy_of(orchestrator: &Orchestrator<MemoryGateway, StaticIdentity>) -> EconomyState {
    let tuning = signal_tuning().unwrap();
    let blob = orchestrator
        .state()
        .phase_state("signal")
        .cloned()
        .unwrap_or(Value::Null);
    EconomyState::from_value(&blob, &tuning, 0).unwrap()
}

#[tokio::test]
async fn an_hour_offline_generates_and_then_fails() {
    let tuning = signal_tuning().unwrap();
    let mut s = session_at(T0 + HOUR_MS);
    operator(&s, "u-1");
    s.gateway
        .insert("u-1", signal_save(T0, &EconomyState::initial(&tuning, T0)));

    s.orchestrator.boot().await.unwrap();

    let economy = economy_of(&s.orchestrator);
    assert!((economy.resource - 3_600.0).abs() < 1e-6);
    assert!((economy.pressure - 100.0).abs() < f64::EPSILON);
    assert!(economy.defeated);
    assert!(!economy.holding);

    let meta = &s.orchestrator.state().meta;
    assert!(meta.offline_needs_ack);
    assert!(meta.offline_summary[0].starts_with("Offline for 1h"));
    assert_eq!(meta.offline_summary[1], "Generated +3600 signal");
    assert!(meta.offline_summary[2].starts_with("Corruption: 0.0%"));
    assert_eq!(meta.offline_summary[3], "SYSTEM FAILURE occurred while offline.");
    assert_eq!(meta.last_seen_at, T0 + HOUR_MS);
    assert!(s.surface.contains("while you were away"));

    // Defeat is sticky: ticks change nothing and actions are refused.
    s.clock.advance(5_000);
    s.orchestrator.tick();
    assert_eq!(economy_of(&s.orchestrator), economy);
    assert!(matches!(
        s.orchestrator.dispatch(PhaseInput::Ping).await,
        Err(LifecycleError::Input { .. })
    ));

    s.orchestrator.dispatch(PhaseInput::Acknowledge).await.unwrap();
    assert!(!s.orchestrator.state().meta.offline_needs_ack);

    s.gateway.clear_journal();
    s.orchestrator.dispatch(PhaseInput::Restart).await.unwrap();
    let restarted = economy_of(&s.orchestrator);
    assert!(!restarted.defeated);
    assert!(restarted.pressure.abs() < f64::EPSILON);
    assert_eq!(s.gateway.save_calls("u-1"), 1);
}

#[tokio::test]
async fn short_gaps_skip_catch_up() {
    let tuning = signal_tuning().unwrap();
    let mut s = session_at(T0 + 400);
    operator(&s, "u-1");
    let mut saved = EconomyState::initial(&tuning, T0);
    saved.resource = 42.0;
    s.gateway.insert("u-1", signal_save(T0, &saved));

    s.orchestrator.boot().await.unwrap();

    assert!(s.orchestrator.state().meta.offline_summary.is_empty());
    assert!((economy_of(&s.orchestrator).resource - 42.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn onboarding_collects_a_name_then_routes_to_play() {
    let mut s = session_at(T0);
    s.identity.sign_in("u-1");
    s.orchestrator.boot().await.unwrap();
    assert_eq!(s.orchestrator.route().state, RouteState::IdentityNoProfile);
    assert!(s.surface.contains("operator name"));

    let err = s
        .orchestrator
        .dispatch(PhaseInput::SubmitName(String::from("no spaces")))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Input { .. }));
    s.orchestrator
        .dispatch(PhaseInput::SubmitName(String::from(" night_op ")))
        .await
        .unwrap();
    let pending = OnboardingState::from_snapshot(s.orchestrator.state(), "onboarding");
    assert_eq!(pending.pending_name.as_deref(), Some("night_op"));
    assert_eq!(pending.error, None);

    s.identity.create_profile("u-1", "night_op");
    s.orchestrator
        .on_identity_change(Some(Identity::new("u-1")))
        .await
        .unwrap();
    assert_eq!(s.orchestrator.route().state, RouteState::IdentityWithProfile);
    assert_eq!(s.orchestrator.active_phase().map(PhaseId::as_str), Some("signal"));
    assert!(s.surface.contains("SIGNAL LOCK"));
    assert_eq!(s.orchestrator.profile().map(|p| p.display_name.as_str()), Some("night_op"));
}

#[tokio::test]
async fn a_burst_of_pings_is_written_once() {
    let mut s = session_at(T0);
    operator(&s, "u-1");
    s.orchestrator.boot().await.unwrap();
    s.gateway.clear_journal();

    for _ in 0..10 {
        s.orchestrator.dispatch(PhaseInput::Ping).await.unwrap();
        s.clock.advance(100);
    }
    assert_eq!(s.orchestrator.flush_if_due().await, None);
    s.clock.advance(500);
    assert_eq!(s.orchestrator.flush_if_due().await, Some(SaveOutcome::Saved));
    assert_eq!(s.gateway.save_calls("u-1"), 1);

    let stored = s.gateway.get("u-1").unwrap().into_state().unwrap();
    let tuning = signal_tuning().unwrap();
    let economy = EconomyState::from_value(&stored.phases["signal"], &tuning, 0).unwrap();
    assert!((economy.resource - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn stabilising_unlocks_and_opens_the_next_phase() {
    let tuning = signal_tuning().unwrap();
    let mut s = session_at(T0);
    operator(&s, "u-1");
    let mut economy = EconomyState::initial(&tuning, T0);
    economy.resource = tuning.win.resource_threshold;
    economy.upgrades.insert(String::from("noiseCanceller"), 4);
    s.gateway.insert("u-1", signal_save(T0, &economy));
    s.orchestrator.boot().await.unwrap();

    assert!(matches!(
        s.orchestrator.dispatch(PhaseInput::Advance).await,
        Err(LifecycleError::Input { .. })
    ));

    for _ in 0..11 {
        s.clock.advance(1_000);
        s.orchestrator.tick();
    }
    assert!(economy_of(&s.orchestrator).completed);
    assert!(s.orchestrator.state().meta.is_unlocked("relay"));
    assert!(s.orchestrator.guard().deadline().is_some());

    s.gateway.clear_journal();
    s.orchestrator.dispatch(PhaseInput::Advance).await.unwrap();
    assert_eq!(s.orchestrator.active_phase().map(PhaseId::as_str), Some("relay"));
    assert!(s.surface.contains("RELAY BAY"));
    assert_eq!(s.gateway.save_calls("u-1"), 1);
    let stored = s.gateway.get("u-1").unwrap().into_state().unwrap();
    assert_eq!(stored.phase, "relay");
    assert!(stored.meta.is_unlocked("relay"));

    s.orchestrator.dispatch(PhaseInput::Retreat).await.unwrap();
    assert_eq!(s.orchestrator.active_phase().map(PhaseId::as_str), Some("signal"));
    assert!(economy_of(&s.orchestrator).completed);
}

#[tokio::test]
async fn account_switch_loads_the_new_save_untouched() {
    let tuning = signal_tuning().unwrap();
    let mut s = session_at(T0);
    operator(&s, "a");
    let mut theirs = EconomyState::initial(&tuning, T0);
    theirs.resource = 7.0;
    s.gateway.insert("b", signal_save(T0, &theirs));
    s.identity.create_profile("b", "Other");

    s.orchestrator.boot().await.unwrap();
    for _ in 0..4 {
        s.orchestrator.dispatch(PhaseInput::Ping).await.unwrap();
    }
    s.gateway.clear_journal();

    let who = s.identity.sign_in("b");
    s.orchestrator.on_identity_change(Some(who)).await.unwrap();
    s.clock.advance(2_000);
    assert_eq!(s.orchestrator.flush_if_due().await, None);

    assert_eq!(
        s.gateway.journal(),
        vec![GatewayCall::Load(Some(String::from("b")))]
    );
    assert!((economy_of(&s.orchestrator).resource - 7.0).abs() < f64::EPSILON);
    assert_eq!(s.gateway.save_calls("a"), 0);
}

#[tokio::test]
async fn unknown_saved_phase_falls_back_to_the_default() {
    let mut s = session_at(T0);
    operator(&s, "u-1");
    let mut state = GameState::fresh(T0);
    state.phase = PhaseId::from("retired");
    s.gateway.insert("u-1", SavedState::from_state(&state).unwrap());

    s.orchestrator.boot().await.unwrap();
    assert_eq!(s.orchestrator.active_phase().map(PhaseId::as_str), Some("signal"));
    assert!(matches!(
        s.orchestrator.set_phase(&PhaseId::from("retired")).await,
        Err(LifecycleError::UnknownPhase(_))
    ));
}
