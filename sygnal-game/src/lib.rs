//! Sygnal Lifecycle Core
//!
//! Platform-agnostic lifecycle and simulation core for Sygnal, a phase-based
//! incremental game. The crate owns canonical state, mounts phase plugins,
//! runs the fixed-interval simulation, catches up time spent offline, and
//! persists saves for whichever identity is signed in. Rendering, auth forms
//! and storage backends live outside, behind the traits below.

pub mod clock;
pub mod config;
pub mod constants;
pub mod economy;
pub mod identity;
pub mod lifecycle;
pub mod memory;
pub mod numbers;
pub mod persistence;
pub mod phases;
pub mod plugin;
pub mod state;

use async_trait::async_trait;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
#[cfg(feature = "async")]
pub use clock::TokioClock;
pub use config::{ConfigError, LifecycleConfig};
pub use economy::{
    AdvanceMode, EconomyError, EconomyState, EconomyTuning, TuningError, UpgradeDef,
    UpgradeEffect,
};
pub use identity::{
    Identity, IdentityError, OnboardingStep, Profile, Route, RouteState, resolve_route,
};
pub use lifecycle::{LifecycleError, Orchestrator, TickStatus};
#[cfg(feature = "async")]
pub use lifecycle::runtime::{LifecycleEvent, RunSummary};
pub use memory::{GatewayCall, MemoryGateway, StaticIdentity};
pub use persistence::{PersistenceError, PersistenceGuard, SaveOutcome, SaveReason, SkipReason};
pub use phases::{EconomyPhase, OnboardingPhase, default_registry};
pub use plugin::{
    OfflineReport, PhaseApi, PhaseInput, PhasePlugin, PluginError, PluginRegistry, RenderTarget,
    TextSurface, TickContext, TickReport,
};
pub use state::{GameState, Meta, PhaseId, SavedState};

/// Remote save storage keyed by identity.
/// Platform-specific implementations should provide this
#[async_trait(?Send)]
pub trait SaveGateway {
    /// Load the save for `identity`, `None` when there is none yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached. Callers must not
    /// treat a failed load as "no save".
    async fn load(&self, identity: Option<&Identity>) -> Result<Option<SavedState>, PersistenceError>;

    /// Store `state` for `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write is rejected.
    async fn save(
        &self,
        identity: Option<&Identity>,
        state: &SavedState,
    ) -> Result<(), PersistenceError>;
}

/// Source of the authenticated identity and its profile.
/// Change notifications are delivered by the host, see
/// [`Orchestrator::on_identity_change`].
#[async_trait(?Send)]
pub trait IdentityProvider {
    /// # Errors
    ///
    /// [`IdentityError::MissingSession`] means signed out; anything else is
    /// a real failure.
    async fn current_identity(&self) -> Result<Option<Identity>, IdentityError>;

    /// # Errors
    ///
    /// Returns an error if the profile lookup fails.
    async fn current_profile(&self, identity: &Identity) -> Result<Option<Profile>, IdentityError>;
}
