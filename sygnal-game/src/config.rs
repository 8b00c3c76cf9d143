//! Lifecycle configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_AUTOSAVE_INTERVAL_MS, DEFAULT_OFFLINE_THRESHOLD_MS, DEFAULT_SAVE_DEBOUNCE_MS,
    DEFAULT_TICK_INTERVAL_MS, PHASE_ONBOARDING, PHASE_SIGNAL,
};
use crate::state::PhaseId;

/// Errors raised when lifecycle configuration invariants are violated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroInterval { field: &'static str },
    #[error("default phase {0} cannot be the onboarding phase")]
    DefaultIsOnboarding(PhaseId),
    #[error("phase {0} is not registered")]
    Unregistered(PhaseId),
    #[error("invalid configuration json: {0}")]
    Parse(String),
}

/// Timing and routing knobs for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConfig {
    /// Simulation clock period. Low hundreds of ms keeps battery use down.
    #[serde(default = "LifecycleConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "LifecycleConfig::default_autosave_interval_ms")]
    pub autosave_interval_ms: u64,
    /// Quiet window that coalesces bursts of soft saves.
    #[serde(default = "LifecycleConfig::default_save_debounce_ms")]
    pub save_debounce_ms: u64,
    /// Gaps shorter than this skip offline catch-up.
    #[serde(default = "LifecycleConfig::default_offline_threshold_ms")]
    pub offline_threshold_ms: u64,
    /// Optional visual-only repaint period.
    #[serde(default)]
    pub render_interval_ms: Option<u64>,
    #[serde(default = "LifecycleConfig::default_onboarding_phase")]
    pub onboarding_phase: PhaseId,
    #[serde(default = "LifecycleConfig::default_default_phase")]
    pub default_phase: PhaseId,
}

impl LifecycleConfig {
    const fn default_tick_interval_ms() -> u64 {
        DEFAULT_TICK_INTERVAL_MS
    }

    const fn default_autosave_interval_ms() -> u64 {
        DEFAULT_AUTOSAVE_INTERVAL_MS
    }

    const fn default_save_debounce_ms() -> u64 {
        DEFAULT_SAVE_DEBOUNCE_MS
    }

    const fn default_offline_threshold_ms() -> u64 {
        DEFAULT_OFFLINE_THRESHOLD_MS
    }

    fn default_onboarding_phase() -> PhaseId {
        PhaseId::from(PHASE_ONBOARDING)
    }

    fn default_default_phase() -> PhaseId {
        PhaseId::from(PHASE_SIGNAL)
    }

    /// Parse a configuration document; missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or fails validation.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check interval and routing invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("tickIntervalMs", self.tick_interval_ms),
            ("autosaveIntervalMs", self.autosave_interval_ms),
            ("saveDebounceMs", self.save_debounce_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ConfigError::ZeroInterval { field });
            }
        }
        if self.render_interval_ms == Some(0) {
            return Err(ConfigError::ZeroInterval {
                field: "renderIntervalMs",
            });
        }
        if self.default_phase == self.onboarding_phase {
            return Err(ConfigError::DefaultIsOnboarding(self.default_phase.clone()));
        }
        Ok(())
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: Self::default_tick_interval_ms(),
            autosave_interval_ms: Self::default_autosave_interval_ms(),
            save_debounce_ms: Self::default_save_debounce_ms(),
            offline_threshold_ms: Self::default_offline_threshold_ms(),
            render_interval_ms: None,
            onboarding_phase: Self::default_onboarding_phase(),
            default_phase: Self::default_default_phase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_takes_defaults() {
        let cfg = LifecycleConfig::from_json("{}").unwrap();
        assert_eq!(cfg, LifecycleConfig::default());
        assert_eq!(cfg.tick_interval_ms, 250);
        assert_eq!(cfg.offline_threshold_ms, 1_000);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let err = LifecycleConfig::from_json(r#"{"tickIntervalMs": 0}"#).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ZeroInterval {
                field: "tickIntervalMs"
            }
        );

        let err = LifecycleConfig::from_json(r#"{"defaultPhase": "onboarding"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultIsOnboarding(_)));

        let err = LifecycleConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
