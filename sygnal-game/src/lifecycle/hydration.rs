//! Boot and identity-aware hydration.
//!
//! Writes are paused from the moment an identity change is noticed until the
//! new identity's save has been loaded and adopted, so the previous account's
//! in-memory state can never be written over the next account's save.

use serde_json::Value;

use super::{LifecycleError, Orchestrator};
use crate::identity::{Identity, resolve_route, session_or_none};
use crate::numbers::i64_to_f64;
use crate::persistence::{SaveOutcome, SaveReason};
use crate::plugin::{OfflineReport, TickContext};
use crate::state::GameState;
use crate::{IdentityProvider, SaveGateway};

impl<G, P> Orchestrator<G, P>
where
    G: SaveGateway,
    P: IdentityProvider,
{
    /// Resolve identity, hydrate its save, run offline catch-up, route and
    /// mount.
    ///
    /// # Errors
    ///
    /// Identity provider failures other than a missing session, load
    /// failures, and unknown phases are fatal here.
    pub async fn boot(&mut self) -> Result<(), LifecycleError> {
        log::info!("booting lifecycle");
        let identity = session_or_none(self.identity.current_identity().await)?;
        self.guard.begin_hydration();
        let now = self.clock.now_ms();

        let state = match &identity {
            Some(who) => self.load_for(who, now).await?,
            None => GameState::fresh(now),
        };
        self.adopt(state, now);
        self.session.profile = match &identity {
            Some(who) => session_or_none(self.identity.current_profile(who).await)?,
            None => None,
        };
        self.guard.finish_hydration(identity);
        self.session.last_tick_at = now;

        self.reroute()?;
        self.settle().await
    }

    /// React to a sign-in, sign-out or account switch.
    ///
    /// A different identity pauses writes, drops any pending soft save, loads
    /// and adopts the new save, and only then resumes writes. The same
    /// identity only refreshes the profile. Every path re-routes and remounts.
    ///
    /// # Errors
    ///
    /// Load and identity provider failures are returned; after a failed load
    /// writes stay paused until a later change succeeds.
    pub async fn on_identity_change(
        &mut self,
        next: Option<Identity>,
    ) -> Result<(), LifecycleError> {
        let same = !self.guard.is_hydrating() && self.guard.tracked() == next.as_ref();
        if same {
            log::info!("identity unchanged; refreshing profile");
            self.session.profile = match &next {
                Some(who) => session_or_none(self.identity.current_profile(who).await)?,
                None => None,
            };
            self.unmount_current();
            self.reroute()?;
            return self.settle().await;
        }

        self.guard.begin_hydration();
        self.unmount_current();
        self.session.phase_request = None;
        self.session.flush_request = None;
        let now = self.clock.now_ms();

        match &next {
            None => {
                log::info!("signed out; resetting to defaults");
                self.session.state = GameState::fresh(now);
                self.session.profile = None;
            }
            Some(who) => {
                log::info!("hydrating save for {}", who.id);
                let state = self.load_for(who, now).await?;
                self.adopt(state, now);
                self.session.profile =
                    session_or_none(self.identity.current_profile(who).await)?;
            }
        }
        self.guard.finish_hydration(next);
        self.session.last_tick_at = now;

        self.reroute()?;
        self.settle().await
    }

    /// Replace canonical state with a fresh default and save it at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the routed phase cannot be mounted.
    pub async fn wipe_save(&mut self) -> Result<SaveOutcome, LifecycleError> {
        log::info!("wiping save");
        self.unmount_current();
        self.guard.cancel_pending();
        let now = self.clock.now_ms();
        self.session.state = GameState::fresh(now);
        self.reroute()?;
        self.settle().await?;
        Ok(self.flush(SaveReason::Wipe).await)
    }

    async fn load_for(&self, who: &Identity, now: i64) -> Result<GameState, LifecycleError> {
        match self.gateway.load(Some(who)).await? {
            Some(saved) => Ok(saved.into_state()?),
            None => {
                log::info!("no save for {}; starting fresh", who.id);
                Ok(GameState::fresh(now))
            }
        }
    }

    /// Install a hydrated state and catch it up to `now`.
    fn adopt(&mut self, state: GameState, now: i64) {
        self.session.state = state;
        self.catch_up_offline(now);
    }

    /// Closed-form catch-up of the saved phase across the offline gap.
    fn catch_up_offline(&mut self, now: i64) {
        let gap = now.saturating_sub(self.session.state.meta.last_seen_at);
        let threshold = i64::try_from(self.config.offline_threshold_ms).unwrap_or(i64::MAX);
        let active = self.session.state.phase.clone();

        let eligible = gap >= threshold
            && active != self.config.onboarding_phase
            && self.registry.contains(active.as_str());
        if !eligible {
            self.session.state.meta.clear_offline_summary();
            self.session.state.meta.last_seen_at = now;
            return;
        }

        if !self.session.state.phases.contains_key(active.as_str()) {
            let initial = self
                .registry
                .get(active.as_str())
                .and_then(|plugin| plugin.initial_state())
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            self.session.state.phases.insert(active.clone(), initial);
        }
        let ctx = TickContext {
            dt_ms: i64_to_f64(gap),
            now_ms: now,
        };
        let outcome = match (
            self.registry.get_mut(active.as_str()),
            self.session.state.phases.get_mut(active.as_str()),
        ) {
            (Ok(plugin), Some(blob)) => plugin.apply_offline_progress(blob, &ctx),
            _ => Ok(OfflineReport::default()),
        };

        let meta = &mut self.session.state.meta;
        match outcome {
            Ok(report) => {
                log::info!(
                    "offline catch-up for {active} over {gap} ms ({} summary lines)",
                    report.summary.len()
                );
                meta.offline_needs_ack = !report.summary.is_empty();
                meta.offline_summary = report.summary;
                for id in &report.unlocked {
                    meta.unlock(id);
                }
            }
            Err(err) => {
                log::error!("offline catch-up for {active} failed: {err}");
                meta.clear_offline_summary();
            }
        }
        meta.last_seen_at = now;
    }

    /// Re-derive the route from identity, profile and state, then mount it.
    /// A save pointing at a phase this build does not know falls back to the
    /// default phase.
    fn reroute(&mut self) -> Result<(), LifecycleError> {
        let mut route = resolve_route(
            self.guard.tracked(),
            self.session.profile.as_ref(),
            &self.session.state.phase,
            &self.config,
        );
        if !self.registry.contains(route.phase.as_str()) {
            log::warn!(
                "saved phase {} is not registered; using {}",
                route.phase,
                self.config.default_phase
            );
            route.phase = self.config.default_phase.clone();
        }
        log::info!("route {:?} -> {}", route.state, route.phase);
        let target = route.phase.clone();
        self.session.route = route;
        self.switch_phase(&target)
    }
}
