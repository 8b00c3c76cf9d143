//! Canonical game state and its persisted form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::{CURRENT_SCHEMA_VERSION, PHASE_ONBOARDING, PHASE_SIGNAL};
use crate::persistence::PersistenceError;

/// Identifier of a phase plugin (`"onboarding"`, `"signal"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseId(String);

impl PhaseId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhaseId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PhaseId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for PhaseId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PhaseId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PhaseId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Lifecycle bookkeeping shared by every phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default = "Meta::default_schema_version", alias = "schema")]
    pub schema_version: u32,
    #[serde(default)]
    pub last_seen_at: i64,
    #[serde(default)]
    pub last_save_at: i64,
    #[serde(default)]
    pub offline_summary: Vec<String>,
    #[serde(default)]
    pub offline_needs_ack: bool,
    #[serde(default = "Meta::default_unlocked_phases")]
    pub unlocked_phases: BTreeMap<PhaseId, bool>,
}

impl Meta {
    const fn default_schema_version() -> u32 {
        CURRENT_SCHEMA_VERSION
    }

    fn default_unlocked_phases() -> BTreeMap<PhaseId, bool> {
        BTreeMap::from([(PhaseId::from(PHASE_SIGNAL), true)])
    }

    #[must_use]
    pub fn fresh(now_ms: i64) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            last_seen_at: now_ms,
            last_save_at: 0,
            offline_summary: Vec::new(),
            offline_needs_ack: false,
            unlocked_phases: Self::default_unlocked_phases(),
        }
    }

    #[must_use]
    pub fn is_unlocked(&self, id: &str) -> bool {
        self.unlocked_phases.get(id).copied().unwrap_or(false)
    }

    /// Mark a phase unlocked. Returns `true` when this call changed anything.
    pub fn unlock(&mut self, id: &PhaseId) -> bool {
        let entry = self.unlocked_phases.entry(id.clone()).or_insert(false);
        let changed = !*entry;
        *entry = true;
        changed
    }

    /// Carry forward every unlock recorded in `previous`; unlocks never regress.
    pub fn merge_unlocks(&mut self, previous: &Self) {
        for (id, unlocked) in &previous.unlocked_phases {
            if *unlocked {
                self.unlock(id);
            }
        }
    }

    pub fn clear_offline_summary(&mut self) {
        self.offline_summary.clear();
        self.offline_needs_ack = false;
    }
}

/// The single canonical state instance owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub meta: Meta,
    pub phase: PhaseId,
    /// Phase-local blobs, shape owned by each plugin.
    #[serde(default)]
    pub phases: BTreeMap<PhaseId, Value>,
}

impl GameState {
    /// Fresh default state positioned at onboarding.
    #[must_use]
    pub fn fresh(now_ms: i64) -> Self {
        Self {
            meta: Meta::fresh(now_ms),
            phase: PhaseId::from(PHASE_ONBOARDING),
            phases: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn phase_state(&self, id: &str) -> Option<&Value> {
        self.phases.get(id)
    }
}

/// Persisted serialization of [`GameState`], opaque beyond `meta.schemaVersion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavedState(Value);

impl SavedState {
    /// Serialize canonical state for the gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be encoded.
    pub fn from_state(state: &GameState) -> Result<Self, PersistenceError> {
        serde_json::to_value(state)
            .map(Self)
            .map_err(PersistenceError::Encode)
    }

    #[must_use]
    pub const fn from_value(value: Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Schema version recorded in the save. Saves written before the field
    /// existed (`meta.schema`) and saves without either are treated as v1.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        let meta = self.0.get("meta");
        meta.and_then(|m| m.get("schemaVersion").or_else(|| m.get("schema")))
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(1)
    }

    /// Run migrations and decode into canonical state.
    ///
    /// # Errors
    ///
    /// Returns an error if the save is from a newer schema or cannot be decoded.
    pub fn into_state(self) -> Result<GameState, PersistenceError> {
        let migrated = migrate(self)?;
        serde_json::from_value(migrated.0).map_err(PersistenceError::Decode)
    }
}

/// Migration hook point. Each supported older version would be upgraded one
/// step at a time here; version 1 is the only format so far.
///
/// # Errors
///
/// Returns an error if the save was written by a newer build.
pub fn migrate(saved: SavedState) -> Result<SavedState, PersistenceError> {
    let found = saved.schema_version();
    if found > CURRENT_SCHEMA_VERSION {
        return Err(PersistenceError::UnsupportedSchema {
            found,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    let mut value = saved.0;
    if let Some(meta) = value.get_mut("meta").and_then(Value::as_object_mut) {
        meta.remove("schema");
        meta.insert(
            String::from("schemaVersion"),
            Value::from(CURRENT_SCHEMA_VERSION),
        );
    }
    Ok(SavedState(value))
}
