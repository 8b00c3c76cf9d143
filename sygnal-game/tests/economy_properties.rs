use sygnal_game::phases::{relay_tuning, signal_tuning};
use sygnal_game::{AdvanceMode, EconomyError, EconomyState, EconomyTuning};

fn tunings() -> Vec<EconomyTuning> {
    vec![signal_tuning().unwrap(), relay_tuning().unwrap()]
}

#[test]
fn bundled_tunings_validate() {
    for tuning in tunings() {
        tuning.validate().unwrap();
        assert!(!tuning.upgrades.is_empty());
        assert!(tuning.upgrades.iter().any(|def| def.mitigating));
    }
    assert_eq!(signal_tuning().unwrap().unlocks.as_ref().map(|id| id.as_str()), Some("relay"));
    assert_eq!(relay_tuning().unwrap().previous.as_ref().map(|id| id.as_str()), Some("signal"));
}

#[test]
fn tick_granularity_does_not_change_the_outcome() {
    for tuning in tunings() {
        let mut coarse = EconomyState::initial(&tuning, 0);
        let mut fine = coarse.clone();
        coarse.advance(&tuning, 10_000.0, AdvanceMode::Live, 10_000);
        for step in 1..=40 {
            fine.advance(&tuning, 250.0, AdvanceMode::Live, step * 250);
        }
        assert!((coarse.resource - fine.resource).abs() < 1e-6);
        assert!((coarse.pressure - fine.pressure).abs() < 1e-3);
    }
}

#[test]
fn resource_never_goes_negative() {
    let tuning = signal_tuning().unwrap();
    let mut state = EconomyState::initial(&tuning, 0);
    state.resource = 200.0;
    state.pressure = 60.0;
    let mut now = 0;
    for _ in 0..50 {
        let _ = state.purge(&tuning, now);
        let _ = state.buy(&tuning, "spsBoost", now);
        let _ = state.buy(&tuning, "noiseCanceller", now);
        now += 250;
        state.advance(&tuning, 250.0, AdvanceMode::Live, now);
        assert!(state.resource >= 0.0);
        assert!((0.0..=100.0).contains(&state.pressure));
    }
}

#[test]
fn multiplier_applies_exactly_once_per_level() {
    let tuning = signal_tuning().unwrap();
    let mut state = EconomyState::initial(&tuning, 0);
    state.resource = 1.0e9;
    state.buy(&tuning, "spsBoost", 0).unwrap();
    state.buy(&tuning, "spsBoost", 0).unwrap();
    for n in 1..=6_u32 {
        state.buy(&tuning, "spsMult", 0).unwrap();
        let expected = 3.0 * (1.0 + 0.1 * f64::from(n));
        assert!(
            (state.generation_rate - expected).abs() < 1e-9,
            "level {n}: {}",
            state.generation_rate
        );
    }
    assert!((state.generation_rate - state.base_generation * state.generation_multiplier(&tuning)).abs() < 1e-9);
}

#[test]
fn upgrade_costs_grow_geometrically() {
    let tuning = signal_tuning().unwrap();
    let def = tuning.upgrade("spsBoost").unwrap();
    assert!((def.cost_at(0) - 25.0).abs() < f64::EPSILON);
    assert!((def.cost_at(1) - 38.0).abs() < f64::EPSILON);
    assert!((def.cost_at(2) - 60.0).abs() < f64::EPSILON);
    let mut state = EconomyState::initial(&tuning, 0);
    state.resource = 63.0;
    state.buy(&tuning, "spsBoost", 0).unwrap();
    state.buy(&tuning, "spsBoost", 0).unwrap();
    assert!(state.resource.abs() < f64::EPSILON);
    assert!(matches!(
        state.buy(&tuning, "spsBoost", 0),
        Err(EconomyError::Unaffordable { .. })
    ));
}

#[test]
fn offline_catch_up_resets_the_hold() {
    let tuning = signal_tuning().unwrap();
    let mut state = EconomyState::initial(&tuning, 0);
    state.resource = tuning.win.resource_threshold;
    state.upgrades.insert(String::from("noiseCanceller"), 4);
    state.start_hold().unwrap();
    state.advance(&tuning, 4_000.0, AdvanceMode::Live, 4_000);
    assert!(state.hold_ms > 0.0);
    assert!(state.fatigue > 0.0);

    let lines = state.catch_up(&tuning, 60_000.0, 64_000);
    assert!(state.hold_ms.abs() < f64::EPSILON);
    assert!(!state.holding);
    assert!(state.fatigue.abs() < f64::EPSILON);
    assert!(!state.completed);
    assert_eq!(lines.last().map(String::as_str), Some("Stabilisation timer resets while offline."));
}

#[test]
fn defeat_survives_any_amount_of_time() {
    for tuning in tunings() {
        let mut state = EconomyState::initial(&tuning, 0);
        state.advance(&tuning, 86_400_000.0, AdvanceMode::Live, 0);
        assert!(state.defeated);
        let frozen = state.clone();
        state.advance(&tuning, 1_000.0, AdvanceMode::Live, 1_000);
        let lines = state.catch_up(&tuning, 3_600_000.0, 3_601_000);
        assert_eq!(state, frozen);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("Systems were already down"));
        assert_eq!(state.purge(&tuning, 0), Err(EconomyError::Defeated));
        assert_eq!(state.start_hold(), Err(EconomyError::Defeated));
    }
}

#[test]
fn milestones_fire_once_even_across_restart() {
    let tuning = signal_tuning().unwrap();
    let mut state = EconomyState::initial(&tuning, 0);
    state.resource = 1_000.0;
    state.advance(&tuning, 1.0, AdvanceMode::Live, 0);
    assert!(state.milestones.contains("signal1k"));
    let fragments = |state: &EconomyState| {
        state
            .comms
            .iter()
            .filter(|line| line.contains("is anyone"))
            .count()
    };
    assert_eq!(fragments(&state), 1);

    for _ in 0..5 {
        state.advance(&tuning, 1.0, AdvanceMode::Live, 0);
    }
    state.restart(&tuning, 0);
    state.resource = 2_000.0;
    state.advance(&tuning, 1.0, AdvanceMode::Live, 0);
    assert_eq!(fragments(&state), 0);
    assert!(state.milestones.contains("signal1k"));
}
