//! In-memory save gateway and identity provider.
//!
//! Both are cheap to clone and clones share their backing store, so a test or
//! the tester can hand one copy to the orchestrator and keep another to
//! inspect or reconfigure it mid-session.

use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::identity::{Identity, IdentityError, Profile};
use crate::persistence::PersistenceError;
use crate::state::SavedState;
use crate::{IdentityProvider, SaveGateway};

/// One recorded gateway call, keyed by identity id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Load(Option<String>),
    Save(Option<String>),
}

/// Save gateway backed by a shared `HashMap`, with a call journal and
/// switchable failures.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    saves: Rc<RefCell<HashMap<String, SavedState>>>,
    journal: Rc<RefCell<Vec<GatewayCall>>>,
    fail_loads: Rc<Cell<bool>>,
    fail_saves: Rc<Cell<bool>>,
}

impl MemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a save for `identity_id`.
    pub fn insert(&self, identity_id: &str, saved: SavedState) {
        self.saves.borrow_mut().insert(identity_id.to_string(), saved);
    }

    #[must_use]
    pub fn get(&self, identity_id: &str) -> Option<SavedState> {
        self.saves.borrow().get(identity_id).cloned()
    }

    #[must_use]
    pub fn journal(&self) -> Vec<GatewayCall> {
        self.journal.borrow().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.borrow_mut().clear();
    }

    /// Number of successful and failed save attempts for `identity_id`.
    #[must_use]
    pub fn save_calls(&self, identity_id: &str) -> usize {
        self.journal
            .borrow()
            .iter()
            .filter(|call| matches!(call, GatewayCall::Save(Some(id)) if id == identity_id))
            .count()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.set(fail);
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.set(fail);
    }

    fn record(&self, call: GatewayCall) {
        self.journal.borrow_mut().push(call);
    }
}

fn identity_key(identity: Option<&Identity>) -> Option<String> {
    identity.map(|who| who.id.clone())
}

#[async_trait(?Send)]
impl SaveGateway for MemoryGateway {
    async fn load(&self, identity: Option<&Identity>) -> Result<Option<SavedState>, PersistenceError> {
        self.record(GatewayCall::Load(identity_key(identity)));
        if self.fail_loads.get() {
            return Err(PersistenceError::Backend(String::from("load unavailable")));
        }
        Ok(identity.and_then(|who| self.get(&who.id)))
    }

    async fn save(
        &self,
        identity: Option<&Identity>,
        state: &SavedState,
    ) -> Result<(), PersistenceError> {
        self.record(GatewayCall::Save(identity_key(identity)));
        if self.fail_saves.get() {
            return Err(PersistenceError::Backend(String::from("save unavailable")));
        }
        if let Some(who) = identity {
            self.insert(&who.id, state.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct IdentityBook {
    current: Option<Identity>,
    profiles: HashMap<String, Profile>,
    failure: Option<IdentityError>,
}

/// Identity provider with a scripted session. Signed out reports
/// [`IdentityError::MissingSession`], like a real auth backend does.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    book: Rc<RefCell<IdentityBook>>,
}

impl StaticIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider already signed in as `id`.
    #[must_use]
    pub fn signed_in(id: &str) -> Self {
        let provider = Self::new();
        provider.sign_in(id);
        provider
    }

    pub fn sign_in(&self, id: &str) -> Identity {
        let identity = Identity::new(id);
        self.book.borrow_mut().current = Some(identity.clone());
        identity
    }

    pub fn sign_out(&self) {
        self.book.borrow_mut().current = None;
    }

    #[must_use]
    pub fn current(&self) -> Option<Identity> {
        self.book.borrow().current.clone()
    }

    /// Register a profile for `identity_id`.
    pub fn create_profile(&self, identity_id: &str, display_name: &str) -> Profile {
        let profile = Profile {
            id: identity_id.to_string(),
            display_name: display_name.to_string(),
            role: None,
        };
        self.book
            .borrow_mut()
            .profiles
            .insert(identity_id.to_string(), profile.clone());
        profile
    }

    /// Make every call fail with `failure` until cleared with `None`.
    pub fn fail_with(&self, failure: Option<IdentityError>) {
        self.book.borrow_mut().failure = failure;
    }
}

#[async_trait(?Send)]
impl IdentityProvider for StaticIdentity {
    async fn current_identity(&self) -> Result<Option<Identity>, IdentityError> {
        let book = self.book.borrow();
        if let Some(failure) = &book.failure {
            return Err(failure.clone());
        }
        book.current
            .clone()
            .map(Some)
            .ok_or(IdentityError::MissingSession)
    }

    async fn current_profile(&self, identity: &Identity) -> Result<Option<Profile>, IdentityError> {
        let book = self.book.borrow();
        if let Some(failure) = &book.failure {
            return Err(failure.clone());
        }
        Ok(book.profiles.get(&identity.id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GameState;

    #[tokio::test]
    async fn gateway_clones_share_saves_and_journal() {
        let gateway = MemoryGateway::new();
        let handle = gateway.clone();
        let who = Identity::new("a");
        let saved = SavedState::from_state(&GameState::fresh(0)).unwrap();

        gateway.save(Some(&who), &saved).await.unwrap();
        assert_eq!(handle.get("a"), Some(saved.clone()));
        assert_eq!(handle.load(Some(&who)).await.unwrap(), Some(saved));
        assert_eq!(handle.load(None).await.unwrap(), None);
        assert_eq!(
            handle.journal(),
            vec![
                GatewayCall::Save(Some(String::from("a"))),
                GatewayCall::Load(Some(String::from("a"))),
                GatewayCall::Load(None),
            ]
        );
        assert_eq!(handle.save_calls("a"), 1);
    }

    #[tokio::test]
    async fn gateway_failures_are_switchable() {
        let gateway = MemoryGateway::new();
        gateway.fail_saves(true);
        let saved = SavedState::from_state(&GameState::fresh(0)).unwrap();
        assert!(gateway.save(Some(&Identity::new("a")), &saved).await.is_err());
        gateway.fail_saves(false);
        gateway.fail_loads(true);
        assert!(gateway.load(Some(&Identity::new("a"))).await.is_err());
    }

    #[tokio::test]
    async fn anonymous_calls_are_recorded_no_ops() {
        let gateway = MemoryGateway::new();
        let saved = SavedState::from_state(&GameState::fresh(0)).unwrap();
        assert!(matches!(gateway.load(None).await, Ok(None)));
        assert!(gateway.save(None, &saved).await.is_ok());
        assert_eq!(
            gateway.journal(),
            vec![GatewayCall::Load(None), GatewayCall::Save(None)]
        );
        assert!(gateway.get("").is_none());
    }

    #[tokio::test]
    async fn signed_out_provider_reports_missing_session() {
        let provider = StaticIdentity::new();
        assert_eq!(
            provider.current_identity().await,
            Err(IdentityError::MissingSession)
        );
        let who = provider.sign_in("u-1");
        assert_eq!(provider.current_profile(&who).await, Ok(None));
        provider.create_profile("u-1", "Operator");
        let profile = provider.current_profile(&who).await.unwrap().unwrap();
        assert_eq!(profile.display_name, "Operator");

        provider.fail_with(Some(IdentityError::Unavailable(String::from("down"))));
        assert!(provider.current_identity().await.is_err());
    }
}
