//! Lifecycle orchestrator.
//!
//! Owns the single canonical [`GameState`], the active phase, the simulation
//! clock, and every persistence trigger. All mutation goes through `&mut self`,
//! which makes the orchestrator the only writer.
//!
//! Plugins see canonical state in two ways:
//!
//! * ticks and offline catch-up borrow the live phase blob mutably, with no
//!   copy;
//! * interactive code goes through [`PhaseApi`], reading deep copies and
//!   committing whole states.
//!
//! Phase switches and saves requested through the API are recorded and run
//! once the plugin call has returned.

mod hydration;
#[cfg(feature = "async")]
pub mod runtime;

use serde_json::Value;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::{ConfigError, LifecycleConfig};
use crate::identity::{Identity, IdentityError, Profile, Route, resolve_route};
use crate::numbers::i64_to_f64;
use crate::persistence::{PersistenceError, PersistenceGuard, SaveOutcome, SaveReason, SkipReason};
use crate::plugin::{
    ApiRequests, PhaseApi, PhaseInput, PluginError, PluginRegistry, RenderTarget, SaveUrgency,
    TickContext,
};
use crate::state::{GameState, PhaseId, SavedState};
use crate::{IdentityProvider, SaveGateway};

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("phase {0} is not registered")]
    UnknownPhase(PhaseId),
    #[error("identity provider failed: {0}")]
    Identity(#[from] IdentityError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("invalid lifecycle configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("phase {phase} failed to mount: {source}")]
    Mount {
        phase: PhaseId,
        #[source]
        source: PluginError,
    },
    #[error("phase {phase} rejected input: {source}")]
    Input {
        phase: PhaseId,
        #[source]
        source: PluginError,
    },
    #[error("no phase is mounted yet")]
    NotMounted,
}

/// What a call to [`Orchestrator::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Advanced,
    /// Onboarding, hydration, or an unregistered phase.
    Skipped,
    /// The plugin returned an error; the next tick runs normally.
    Failed,
}

struct Session {
    state: GameState,
    profile: Option<Profile>,
    route: Route,
    mounted: Option<PhaseId>,
    last_tick_at: i64,
    phase_request: Option<PhaseId>,
    flush_request: Option<SaveReason>,
}

/// Drives one player session against a save gateway and identity provider.
pub struct Orchestrator<G, P>
where
    G: SaveGateway,
    P: IdentityProvider,
{
    config: LifecycleConfig,
    registry: PluginRegistry,
    gateway: G,
    identity: P,
    clock: Box<dyn Clock>,
    surface: Box<dyn RenderTarget>,
    session: Session,
    guard: PersistenceGuard,
}

impl<G, P> Orchestrator<G, P>
where
    G: SaveGateway,
    P: IdentityProvider,
{
    /// Build an orchestrator. Nothing is loaded or mounted until [`Self::boot`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or names phases the
    /// registry does not contain.
    pub fn new(
        config: LifecycleConfig,
        registry: PluginRegistry,
        gateway: G,
        identity: P,
        clock: Box<dyn Clock>,
        surface: Box<dyn RenderTarget>,
    ) -> Result<Self, LifecycleError> {
        config.validate()?;
        for id in [&config.onboarding_phase, &config.default_phase] {
            if !registry.contains(id.as_str()) {
                return Err(ConfigError::Unregistered(id.clone()).into());
            }
        }
        let now = clock.now_ms();
        let state = GameState::fresh(now);
        let route = resolve_route(None, None, &state.phase, &config);
        let guard = PersistenceGuard::new(config.save_debounce_ms);
        Ok(Self {
            config,
            registry,
            gateway,
            identity,
            clock,
            surface,
            session: Session {
                state,
                profile: None,
                route,
                mounted: None,
                last_tick_at: now,
                phase_request: None,
                flush_request: None,
            },
            guard,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> &GameState {
        &self.session.state
    }

    /// Deep copy of canonical state.
    #[must_use]
    pub fn snapshot(&self) -> GameState {
        self.session.state.clone()
    }

    #[must_use]
    pub const fn active_phase(&self) -> Option<&PhaseId> {
        self.session.mounted.as_ref()
    }

    #[must_use]
    pub const fn route(&self) -> &Route {
        &self.session.route
    }

    #[must_use]
    pub const fn profile(&self) -> Option<&Profile> {
        self.session.profile.as_ref()
    }

    /// Identity whose save canonical state belongs to.
    #[must_use]
    pub const fn tracked_identity(&self) -> Option<&Identity> {
        self.guard.tracked()
    }

    #[must_use]
    pub const fn guard(&self) -> &PersistenceGuard {
        &self.guard
    }

    #[must_use]
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    #[must_use]
    pub const fn identity_provider(&self) -> &P {
        &self.identity
    }

    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Unmount the active phase, create the target's blob if needed, clear
    /// the render target and mount. Switching to the active phase is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::UnknownPhase`] for unregistered ids and
    /// [`LifecycleError::Mount`] if the incoming plugin fails to mount.
    pub fn switch_phase(&mut self, id: &PhaseId) -> Result<(), LifecycleError> {
        if self.session.mounted.as_ref() == Some(id) {
            return Ok(());
        }
        if !self.registry.contains(id.as_str()) {
            return Err(LifecycleError::UnknownPhase(id.clone()));
        }
        self.unmount_current();

        if !self.session.state.phases.contains_key(id.as_str()) {
            let initial = self
                .registry
                .get(id.as_str())
                .and_then(|plugin| plugin.initial_state())
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            self.session.state.phases.insert(id.clone(), initial);
        }
        self.session.state.phase = id.clone();
        self.session.mounted = Some(id.clone());
        self.surface.clear();
        log::info!("mounting phase {id}");

        let now = self.clock.now_ms();
        let mut requests = ApiRequests::default();
        let plugin = self.registry.get_mut(id.as_str())?;
        let mut api = PhaseApi::new(
            &mut self.session.state,
            id,
            self.session.profile.as_ref(),
            &self.session.route,
            now,
            &mut requests,
        );
        let mounted = plugin.mount(&mut *self.surface, &mut api);
        self.absorb(requests, now);
        mounted.map_err(|source| LifecycleError::Mount {
            phase: id.clone(),
            source,
        })
    }

    /// Best-effort unmount; errors are logged and never block a switch.
    fn unmount_current(&mut self) {
        let Some(outgoing) = self.session.mounted.take() else {
            return;
        };
        let now = self.clock.now_ms();
        let mut requests = ApiRequests::default();
        if let Ok(plugin) = self.registry.get_mut(outgoing.as_str()) {
            let mut api = PhaseApi::new(
                &mut self.session.state,
                &outgoing,
                self.session.profile.as_ref(),
                &self.session.route,
                now,
                &mut requests,
            );
            if let Err(err) = plugin.unmount(&mut api) {
                log::warn!("phase {outgoing} failed to unmount cleanly: {err}");
            }
        }
        requests.phase = None;
        self.absorb(requests, now);
    }

    /// Switch phases and flush immediately.
    ///
    /// # Errors
    ///
    /// See [`Self::switch_phase`].
    pub async fn set_phase(&mut self, id: &PhaseId) -> Result<SaveOutcome, LifecycleError> {
        self.switch_phase(id)?;
        self.settle().await?;
        Ok(self.flush(SaveReason::PhaseChange).await)
    }

    /// One simulation step of `dt = now - previous tick`.
    pub fn tick(&mut self) -> TickStatus {
        let now = self.clock.now_ms();
        let dt_ms = i64_to_f64(now.saturating_sub(self.session.last_tick_at).max(0));
        self.session.last_tick_at = now;

        let active = self.session.state.phase.clone();
        if active == self.config.onboarding_phase || self.guard.is_hydrating() {
            return TickStatus::Skipped;
        }
        let Ok(plugin) = self.registry.get_mut(active.as_str()) else {
            log::debug!("no plugin for {active}; tick skipped");
            return TickStatus::Skipped;
        };
        let blob = self
            .session
            .state
            .phases
            .entry(active.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        let ctx = TickContext { dt_ms, now_ms: now };

        let status = match plugin.tick(blob, &ctx) {
            Ok(report) => {
                for id in &report.unlocked {
                    if self.session.state.meta.unlock(id) {
                        log::info!("phase {id} unlocked");
                        self.guard.request_soon(now);
                    }
                }
                TickStatus::Advanced
            }
            Err(err) => {
                log::error!("phase {active} tick failed: {err}");
                TickStatus::Failed
            }
        };
        self.session.state.meta.last_seen_at = now;
        status
    }

    /// Forward player input to the active phase, then run whatever it asked
    /// for.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Input`] if the phase rejected the input, or
    /// any error raised while executing a requested phase switch.
    pub async fn dispatch(&mut self, input: PhaseInput) -> Result<(), LifecycleError> {
        let active = self
            .session
            .mounted
            .clone()
            .ok_or(LifecycleError::NotMounted)?;
        let now = self.clock.now_ms();
        let mut requests = ApiRequests::default();
        let plugin = self.registry.get_mut(active.as_str())?;
        let mut api = PhaseApi::new(
            &mut self.session.state,
            &active,
            self.session.profile.as_ref(),
            &self.session.route,
            now,
            &mut requests,
        );
        let handled = plugin.handle_input(&input, &mut api);
        self.absorb(requests, now);
        self.settle().await?;
        handled.map_err(|source| {
            log::debug!("phase {active} rejected {input:?}: {source}");
            LifecycleError::Input {
                phase: active,
                source,
            }
        })
    }

    /// Run `f` with the interactive API of the active phase.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotMounted`] before boot, or any error raised
    /// while executing a requested phase switch.
    pub async fn interact<R>(
        &mut self,
        f: impl FnOnce(&mut PhaseApi<'_>) -> R,
    ) -> Result<R, LifecycleError> {
        let active = self
            .session
            .mounted
            .clone()
            .ok_or(LifecycleError::NotMounted)?;
        let now = self.clock.now_ms();
        let mut requests = ApiRequests::default();
        let mut api = PhaseApi::new(
            &mut self.session.state,
            &active,
            self.session.profile.as_ref(),
            &self.session.route,
            now,
            &mut requests,
        );
        let out = f(&mut api);
        self.absorb(requests, now);
        self.settle().await?;
        Ok(out)
    }

    /// Record API requests. Saves asked for during hydration are dropped.
    fn absorb(&mut self, requests: ApiRequests, now: i64) {
        if let Some(id) = requests.phase {
            self.session.phase_request = Some(id);
        }
        if self.guard.is_hydrating() {
            if requests.save.is_some() {
                log::debug!("save request ignored while hydrating");
            }
            return;
        }
        match requests.save {
            Some(SaveUrgency::Now) => {
                self.session.flush_request.get_or_insert(SaveReason::Explicit);
            }
            Some(SaveUrgency::Soon) => self.schedule_soft_save(now),
            None => {}
        }
    }

    /// Execute deferred phase switches and immediate saves.
    async fn settle(&mut self) -> Result<(), LifecycleError> {
        while let Some(next) = self.session.phase_request.take() {
            self.switch_phase(&next)?;
            self.session.flush_request = Some(SaveReason::PhaseChange);
        }
        if let Some(reason) = self.session.flush_request.take() {
            self.flush(reason).await;
        }
        Ok(())
    }

    fn schedule_soft_save(&mut self, now: i64) {
        if self.guard.request_soon(now) {
            log::debug!("soft save coalesced");
        }
    }

    /// Debounced save: the last request within the quiet window wins.
    pub fn save_soon(&mut self) {
        let now = self.clock.now_ms();
        self.schedule_soft_save(now);
    }

    pub async fn save_now(&mut self) -> SaveOutcome {
        self.guard.cancel_pending();
        self.flush(SaveReason::Explicit).await
    }

    /// Run the debounced save if its quiet window has elapsed.
    pub async fn flush_if_due(&mut self) -> Option<SaveOutcome> {
        let now = self.clock.now_ms();
        if self.guard.take_due(now) {
            Some(self.flush(SaveReason::Debounced).await)
        } else {
            None
        }
    }

    /// Periodic safety net; also retries a previously failed save.
    pub async fn autosave(&mut self) -> SaveOutcome {
        if self.guard.retry_pending() {
            log::info!("retrying failed save");
        }
        self.flush(SaveReason::Autosave).await
    }

    /// The app lost visibility; flush before it may be suspended.
    pub async fn on_visibility_hidden(&mut self) -> SaveOutcome {
        self.guard.cancel_pending();
        self.flush(SaveReason::Hidden).await
    }

    /// Unmount and flush one last time.
    pub async fn teardown(&mut self) -> SaveOutcome {
        self.unmount_current();
        self.session.phase_request = None;
        self.session.flush_request = None;
        self.guard.cancel_pending();
        self.flush(SaveReason::Teardown).await
    }

    /// Dismiss the offline summary.
    pub fn acknowledge_offline(&mut self) {
        self.session.state.meta.clear_offline_summary();
        self.save_soon();
    }

    /// Write canonical state for the tracked identity.
    ///
    /// Skips without identity, while hydrating, or while another write is in
    /// flight (the request is re-queued as a soft save). Failures are logged
    /// and retried by the next autosave; so is a save whose future was
    /// dropped before the gateway answered.
    pub async fn flush(&mut self, reason: SaveReason) -> SaveOutcome {
        let now = self.clock.now_ms();
        if let Some(skip) = self.guard.write_blocker() {
            if skip == SkipReason::InFlight {
                self.guard.request_soon(now);
            } else {
                log::debug!("{reason:?} save skipped: {skip:?}");
            }
            return SaveOutcome::Skipped(skip);
        }
        let slot = match self.guard.claim_write() {
            Ok(slot) => slot,
            Err(skip) => return SaveOutcome::Skipped(skip),
        };

        let meta = &mut self.session.state.meta;
        let previous_save_at = meta.last_save_at;
        meta.last_seen_at = now;
        meta.last_save_at = now;

        let saved = match SavedState::from_state(&self.session.state) {
            Ok(saved) => saved,
            Err(err) => {
                log::warn!("{reason:?} save could not be encoded: {err}");
                self.session.state.meta.last_save_at = previous_save_at;
                slot.settle(false);
                return SaveOutcome::Failed;
            }
        };

        match self.gateway.save(Some(slot.identity()), &saved).await {
            Ok(()) => {
                log::debug!("{reason:?} save stored for {}", slot.identity().id);
                slot.settle(true);
                SaveOutcome::Saved
            }
            Err(err) => {
                log::warn!("{reason:?} save failed for {}: {err}", slot.identity().id);
                self.session.state.meta.last_save_at = previous_save_at;
                slot.settle(false);
                SaveOutcome::Failed
            }
        }
    }

    /// Visual-only repaint of the active phase.
    pub fn render(&mut self) {
        let Some(active) = &self.session.mounted else {
            return;
        };
        if let Some(plugin) = self.registry.get(active.as_str()) {
            plugin.render(&self.session.state, &mut *self.surface);
        }
    }
}
