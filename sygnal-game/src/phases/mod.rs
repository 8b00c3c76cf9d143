//! Built-in phases and the default registry.

mod economy_phase;
pub mod onboarding;

pub use economy_phase::EconomyPhase;
pub use onboarding::{OnboardingPhase, OnboardingState, is_username_valid};

use crate::constants::{PHASE_ONBOARDING, PHASE_RELAY, PHASE_SIGNAL};
use crate::economy::{EconomyTuning, TuningError};
use crate::plugin::PluginRegistry;

const SIGNAL_TUNING: &str = include_str!("../../assets/signal.json");
const RELAY_TUNING: &str = include_str!("../../assets/relay.json");

/// Bundled tuning for the signal phase.
///
/// # Errors
///
/// Returns an error if the embedded asset is invalid.
pub fn signal_tuning() -> Result<EconomyTuning, TuningError> {
    EconomyTuning::from_json(SIGNAL_TUNING)
}

/// Bundled tuning for the relay phase.
///
/// # Errors
///
/// Returns an error if the embedded asset is invalid.
pub fn relay_tuning() -> Result<EconomyTuning, TuningError> {
    EconomyTuning::from_json(RELAY_TUNING)
}

/// Registry with onboarding, signal and relay.
///
/// # Errors
///
/// Returns an error if a bundled tuning is invalid.
pub fn default_registry() -> Result<PluginRegistry, TuningError> {
    Ok(PluginRegistry::builder()
        .register(PHASE_ONBOARDING, OnboardingPhase::new(PHASE_ONBOARDING))
        .register(PHASE_SIGNAL, EconomyPhase::new(PHASE_SIGNAL, signal_tuning()?))
        .register(PHASE_RELAY, EconomyPhase::new(PHASE_RELAY, relay_tuning()?))
        .build())
}
