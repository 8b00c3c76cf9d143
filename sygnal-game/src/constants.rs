//! Centralized lifecycle constants and phase identifiers.
//!
//! Economy balancing lives in the JSON tunings under `assets/`; the values
//! here are the structural ones the orchestrator and the save format rely on.

// Phase identifiers ---------------------------------------------------------
pub const PHASE_ONBOARDING: &str = "onboarding";
pub const PHASE_SIGNAL: &str = "signal";
pub const PHASE_RELAY: &str = "relay";

// Save format ---------------------------------------------------------------
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// Lifecycle timing ----------------------------------------------------------
pub(crate) const DEFAULT_TICK_INTERVAL_MS: u64 = 250;
pub(crate) const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 30_000;
pub(crate) const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 500;
pub(crate) const DEFAULT_OFFLINE_THRESHOLD_MS: u64 = 1_000;

// Economy bounds ------------------------------------------------------------
pub const PRESSURE_MIN: f64 = 0.0;
pub const PRESSURE_MAX: f64 = 100.0;
pub(crate) const LOG_CAPACITY: usize = 60;

// Onboarding ----------------------------------------------------------------
pub const USERNAME_PATTERN: &str = r"^[A-Za-z0-9_]{3,20}$";

// Log lines -----------------------------------------------------------------
pub(crate) const LOG_STABILISED: &str = "CONTROL//RETURN  Stabilisation achieved. Next bay unlocked.";
pub(crate) const LOG_UNSEALED_PREFIX: &str = "LOCK//UNSEALED  ";
pub(crate) const LOG_UPGRADE_PREFIX: &str = "UPGRADE//ACQUIRED  ";
pub(crate) const LOG_PURGE_PREFIX: &str = "PURGE//EXEC  ";
pub(crate) const LOG_SYSTEM_FAILURE: &str = "CONTROL//ALERT  Systems went dark.";
pub(crate) const LOG_RESTARTED: &str = "CONTROL//RETURN  Lock re-established. Phase restarted.";
