//! Setup phase shown until the player has both an identity and a profile.
//!
//! The sub-step comes from the route, never from the blob. The blob only
//! records the last submitted name so the host can create the profile.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::USERNAME_PATTERN;
use crate::identity::OnboardingStep;
use crate::plugin::{PhaseApi, PhaseInput, PhasePlugin, PluginError, RenderTarget};
use crate::state::{GameState, PhaseId};

#[must_use]
pub fn is_username_valid(name: &str) -> bool {
    regex::Regex::new(USERNAME_PATTERN)
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnboardingState {
    pub pending_name: Option<String>,
    pub error: Option<String>,
}

impl OnboardingState {
    /// Read the onboarding blob out of a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &GameState, id: &str) -> Self {
        snapshot
            .phase_state(id)
            .and_then(|blob| serde_json::from_value(blob.clone()).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct OnboardingPhase {
    id: PhaseId,
    step: Option<OnboardingStep>,
}

impl OnboardingPhase {
    #[must_use]
    pub fn new(id: impl Into<PhaseId>) -> Self {
        Self {
            id: id.into(),
            step: None,
        }
    }

    fn paint(&self, state: &OnboardingState, target: &mut dyn RenderTarget) {
        target.line("SYGNAL // OPERATOR SETUP");
        match self.step {
            Some(OnboardingStep::Username) => {
                target.line("Choose an operator name: 3-20 letters, digits or _.");
                if let Some(name) = &state.pending_name {
                    target.line(&format!("Requested: {name}"));
                }
                if let Some(error) = &state.error {
                    target.line(&format!("! {error}"));
                }
            }
            Some(OnboardingStep::Auth) | None => target.line("Sign in to continue."),
        }
    }
}

impl PhasePlugin for OnboardingPhase {
    fn mount(
        &mut self,
        target: &mut dyn RenderTarget,
        api: &mut PhaseApi<'_>,
    ) -> Result<(), PluginError> {
        self.step = api.route().step;
        let state = OnboardingState::from_snapshot(&api.get_state(), self.id.as_str());
        self.paint(&state, target);
        Ok(())
    }

    fn unmount(&mut self, _api: &mut PhaseApi<'_>) -> Result<(), PluginError> {
        self.step = None;
        Ok(())
    }

    fn initial_state(&self) -> Option<Value> {
        serde_json::to_value(OnboardingState::default()).ok()
    }

    fn handle_input(
        &mut self,
        input: &PhaseInput,
        api: &mut PhaseApi<'_>,
    ) -> Result<(), PluginError> {
        let PhaseInput::SubmitName(raw) = input else {
            return Err(PluginError::Rejected(String::from(
                "setup only accepts an operator name",
            )));
        };
        if api.route().step != Some(OnboardingStep::Username) {
            return Err(PluginError::Rejected(String::from("sign in first")));
        }

        let name = raw.trim();
        let next = if is_username_valid(name) {
            OnboardingState {
                pending_name: Some(name.to_string()),
                error: None,
            }
        } else {
            OnboardingState {
                pending_name: None,
                error: Some(String::from("Use 3-20 letters, digits or _")),
            }
        };
        let mut snapshot = api.get_state();
        snapshot
            .phases
            .insert(self.id.clone(), serde_json::to_value(&next)?);
        api.set_state(snapshot);
        api.save_soon();

        match next.error {
            Some(error) => Err(PluginError::Rejected(error)),
            None => Ok(()),
        }
    }

    fn render(&self, snapshot: &GameState, target: &mut dyn RenderTarget) {
        target.clear();
        self.paint(
            &OnboardingState::from_snapshot(snapshot, self.id.as_str()),
            target,
        );
    }
}
