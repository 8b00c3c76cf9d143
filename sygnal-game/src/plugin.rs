//! Phase plugin contract.
//!
//! A phase is any type implementing [`PhasePlugin`]. Only `mount` is
//! required; every other capability has a default that is an explicit no-op,
//! so a plugin opts into ticking, offline catch-up, initial state, input
//! handling, and repainting by overriding the matching method.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use thiserror::Error;

use crate::identity::{Profile, Route};
use crate::lifecycle::LifecycleError;
use crate::state::{GameState, PhaseId};

/// Errors a plugin may report. They are isolated per call by the orchestrator.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("phase state is malformed: {0}")]
    State(#[from] serde_json::Error),
    #[error("action rejected: {0}")]
    Rejected(String),
    #[error("plugin failure: {0}")]
    Failed(String),
}

/// Render target handed to `mount`. Real presentation layers live outside
/// this crate; the core only needs to clear it and append text.
pub trait RenderTarget {
    fn clear(&mut self);
    fn line(&mut self, text: &str);
}

/// In-memory render target. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct TextSurface {
    lines: Rc<RefCell<Vec<String>>>,
}

impl TextSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.borrow().iter().any(|line| line.contains(needle))
    }
}

impl RenderTarget for TextSurface {
    fn clear(&mut self) {
        self.lines.borrow_mut().clear();
    }

    fn line(&mut self, text: &str) {
        self.lines.borrow_mut().push(text.to_string());
    }
}

/// Player input forwarded to the active phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PhaseInput {
    Ping,
    HoldStart,
    HoldStop,
    Purge,
    Buy(String),
    Restart,
    Advance,
    Retreat,
    Acknowledge,
    SubmitName(String),
}

/// Arguments for `tick` and `apply_offline_progress`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    /// Actual elapsed wall time being simulated.
    pub dt_ms: f64,
    pub now_ms: i64,
}

/// Side effects a tick asks the orchestrator to apply outside the phase blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub unlocked: SmallVec<[PhaseId; 2]>,
}

/// Result of closed-form offline advancement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfflineReport {
    /// Ordered, player-facing description of what changed.
    pub summary: Vec<String>,
    pub unlocked: SmallVec<[PhaseId; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SaveUrgency {
    Soon,
    Now,
}

/// Requests recorded by [`PhaseApi`] and executed once the plugin returns.
#[derive(Debug, Clone, Default)]
pub(crate) struct ApiRequests {
    pub(crate) phase: Option<PhaseId>,
    pub(crate) save: Option<SaveUrgency>,
}

impl ApiRequests {
    fn save(&mut self, urgency: SaveUrgency) {
        self.save = self.save.max(Some(urgency));
    }
}

/// Interactive API handed to `mount`, `unmount`, and `handle_input`.
///
/// Reads are deep copies and writes replace canonical state wholesale, so
/// every interactive mutation is one explicit commit.
pub struct PhaseApi<'a> {
    state: &'a mut GameState,
    mounted: &'a PhaseId,
    profile: Option<&'a Profile>,
    route: &'a Route,
    now_ms: i64,
    requests: &'a mut ApiRequests,
}

impl<'a> PhaseApi<'a> {
    pub(crate) fn new(
        state: &'a mut GameState,
        mounted: &'a PhaseId,
        profile: Option<&'a Profile>,
        route: &'a Route,
        now_ms: i64,
        requests: &'a mut ApiRequests,
    ) -> Self {
        Self {
            state,
            mounted,
            profile,
            route,
            now_ms,
            requests,
        }
    }

    /// Deep copy of canonical state.
    #[must_use]
    pub fn get_state(&self) -> GameState {
        self.state.clone()
    }

    /// Replace canonical state. The mounted phase id is kept and unlocks
    /// already granted stay granted.
    pub fn set_state(&mut self, mut next: GameState) {
        next.phase = self.mounted.clone();
        next.meta.merge_unlocks(&self.state.meta);
        *self.state = next;
    }

    /// Switch phases and flush immediately once the current call returns.
    pub fn set_phase(&mut self, id: impl Into<PhaseId>) {
        self.requests.phase = Some(id.into());
    }

    pub fn save_soon(&mut self) {
        self.requests.save(SaveUrgency::Soon);
    }

    pub fn save_now(&mut self) {
        self.requests.save(SaveUrgency::Now);
    }

    #[must_use]
    pub fn get_profile(&self) -> Option<Profile> {
        self.profile.cloned()
    }

    #[must_use]
    pub const fn route(&self) -> &Route {
        self.route
    }

    #[must_use]
    pub const fn mounted(&self) -> &PhaseId {
        self.mounted
    }

    #[must_use]
    pub const fn now_ms(&self) -> i64 {
        self.now_ms
    }

    /// Dismiss the offline summary after the player has seen it.
    pub fn acknowledge_offline(&mut self) {
        if self.state.meta.offline_needs_ack || !self.state.meta.offline_summary.is_empty() {
            self.state.meta.clear_offline_summary();
            self.save_soon();
        }
    }
}

/// Capability set implemented by each phase.
pub trait PhasePlugin {
    /// Render and wire interactive behaviour.
    ///
    /// # Errors
    ///
    /// Returns an error if the phase cannot be presented.
    fn mount(
        &mut self,
        target: &mut dyn RenderTarget,
        api: &mut PhaseApi<'_>,
    ) -> Result<(), PluginError>;

    /// Best-effort cleanup of plugin-owned timers and handles.
    ///
    /// # Errors
    ///
    /// Errors are logged by the orchestrator and never block a switch.
    fn unmount(&mut self, _api: &mut PhaseApi<'_>) -> Result<(), PluginError> {
        Ok(())
    }

    /// Advance the live phase blob by `ctx.dt_ms`. Runs in the background
    /// whenever the phase is active, whether or not anything is rendering.
    ///
    /// # Errors
    ///
    /// Errors are logged and the next tick proceeds normally.
    fn tick(&mut self, _state: &mut Value, _ctx: &TickContext) -> Result<TickReport, PluginError> {
        Ok(TickReport::default())
    }

    /// Closed-form catch-up across an arbitrarily large gap.
    ///
    /// # Errors
    ///
    /// Errors are logged and the summary is discarded.
    fn apply_offline_progress(
        &mut self,
        _state: &mut Value,
        _ctx: &TickContext,
    ) -> Result<OfflineReport, PluginError> {
        Ok(OfflineReport::default())
    }

    /// First-ever phase blob. `None` means an empty object.
    fn initial_state(&self) -> Option<Value> {
        None
    }

    /// React to player input through the interactive API.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is rejected.
    fn handle_input(
        &mut self,
        _input: &PhaseInput,
        _api: &mut PhaseApi<'_>,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Visual-only repaint from a read-only snapshot.
    fn render(&self, _snapshot: &GameState, _target: &mut dyn RenderTarget) {}
}

/// Immutable mapping from phase id to plugin, built once at startup.
pub struct PluginRegistry {
    plugins: BTreeMap<PhaseId, Box<dyn PhasePlugin>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.plugins.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &PhaseId> {
        self.plugins.keys()
    }

    pub(crate) fn get(&self, id: &str) -> Option<&(dyn PhasePlugin + 'static)> {
        self.plugins.get(id).map(|plugin| &**plugin)
    }

    pub(crate) fn get_mut(
        &mut self,
        id: &str,
    ) -> Result<&mut (dyn PhasePlugin + 'static), LifecycleError> {
        match self.plugins.get_mut(id) {
            Some(plugin) => Ok(&mut **plugin),
            None => Err(LifecycleError::UnknownPhase(PhaseId::from(id))),
        }
    }
}

/// Collects plugins before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    plugins: BTreeMap<PhaseId, Box<dyn PhasePlugin>>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn register(mut self, id: impl Into<PhaseId>, plugin: impl PhasePlugin + 'static) -> Self {
        let id = id.into();
        if self.plugins.insert(id.clone(), Box::new(plugin)).is_some() {
            log::warn!("phase {id} registered twice; keeping the last plugin");
        }
        self
    }

    #[must_use]
    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            plugins: self.plugins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{OnboardingStep, RouteState};

    struct Blank;

    impl PhasePlugin for Blank {
        fn mount(
            &mut self,
            target: &mut dyn RenderTarget,
            _api: &mut PhaseApi<'_>,
        ) -> Result<(), PluginError> {
            target.line("blank");
            Ok(())
        }
    }

    fn route() -> Route {
        Route {
            state: RouteState::NoIdentity,
            phase: PhaseId::from("onboarding"),
            step: Some(OnboardingStep::Auth),
        }
    }

    #[test]
    fn default_capabilities_are_no_ops() {
        let mut plugin = Blank;
        let mut blob = serde_json::json!({ "x": 1 });
        let ctx = TickContext {
            dt_ms: 5_000.0,
            now_ms: 0,
        };
        assert_eq!(plugin.tick(&mut blob, &ctx).unwrap(), TickReport::default());
        assert_eq!(
            plugin.apply_offline_progress(&mut blob, &ctx).unwrap(),
            OfflineReport::default()
        );
        assert_eq!(blob, serde_json::json!({ "x": 1 }));
        assert!(plugin.initial_state().is_none());
    }

    #[test]
    fn api_copies_are_detached_and_commits_keep_unlocks() {
        let mut state = GameState::fresh(0);
        state.meta.unlock(&PhaseId::from("relay"));
        let mounted = PhaseId::from("signal");
        let route = route();
        let mut requests = ApiRequests::default();
        let mut api = PhaseApi::new(&mut state, &mounted, None, &route, 7, &mut requests);

        let mut copy = api.get_state();
        copy.meta.unlocked_phases.clear();
        copy.phase = PhaseId::from("elsewhere");
        assert!(api.get_state().meta.is_unlocked("relay"));

        api.set_state(copy);
        api.save_now();
        api.save_soon();
        let committed = api.get_state();
        assert_eq!(committed.phase, "signal");
        assert!(committed.meta.is_unlocked("relay"));
        assert_eq!(requests.save, Some(SaveUrgency::Now));
    }

    #[test]
    fn registry_rejects_unknown_ids() {
        let mut registry = PluginRegistry::builder().register("blank", Blank).build();
        assert!(registry.contains("blank"));
        assert!(registry.get_mut("blank").is_ok());
        assert!(matches!(
            registry.get_mut("missing"),
            Err(LifecycleError::UnknownPhase(_))
        ));
    }

    #[test]
    fn surface_clones_share_lines() {
        let surface = TextSurface::new();
        let mut handle = surface.clone();
        handle.line("hello");
        assert!(surface.contains("hell"));
        handle.clear();
        assert!(surface.lines().is_empty());
    }
}
