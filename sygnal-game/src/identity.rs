//! Identity model and the routing state machine.
//!
//! Routing is a pure function of who is signed in, whether they have a
//! profile, and which phase the save currently points at. It is re-derived on
//! boot and after every identity change so there is exactly one answer to
//! "where should the player be".

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LifecycleConfig;
use crate::state::PhaseId;

/// Authenticated account. Absence is modelled as `Option<Identity>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
}

impl Identity {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Public profile; may be missing right after sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Errors raised by an identity provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// No active session. Treated as "signed out", never as a failure.
    #[error("auth session missing")]
    MissingSession,
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),
}

/// Collapse a missing session into "no identity".
///
/// # Errors
///
/// Returns every identity error except [`IdentityError::MissingSession`].
pub fn session_or_none<T>(result: Result<Option<T>, IdentityError>) -> Result<Option<T>, IdentityError> {
    match result {
        Err(IdentityError::MissingSession) => Ok(None),
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteState {
    NoIdentity,
    IdentityNoProfile,
    IdentityWithProfile,
}

/// Sub-step shown by the onboarding phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnboardingStep {
    Auth,
    Username,
}

impl OnboardingStep {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Username => "username",
        }
    }
}

/// Outcome of routing: the phase to mount and, for onboarding, the sub-step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub state: RouteState,
    pub phase: PhaseId,
    pub step: Option<OnboardingStep>,
}

/// Derive the route for the given identity, profile, and current phase.
#[must_use]
pub fn resolve_route(
    identity: Option<&Identity>,
    profile: Option<&Profile>,
    current: &PhaseId,
    config: &LifecycleConfig,
) -> Route {
    match (identity, profile) {
        (None, _) => Route {
            state: RouteState::NoIdentity,
            phase: config.onboarding_phase.clone(),
            step: Some(OnboardingStep::Auth),
        },
        (Some(_), None) => Route {
            state: RouteState::IdentityNoProfile,
            phase: config.onboarding_phase.clone(),
            step: Some(OnboardingStep::Username),
        },
        (Some(_), Some(_)) => {
            let phase = if *current == config.onboarding_phase {
                config.default_phase.clone()
            } else {
                current.clone()
            };
            Route {
                state: RouteState::IdentityWithProfile,
                phase,
                step: None,
            }
        }
    }
}
