#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;
use ysp_portal::{
    ProfileResolver, SessionStore,
    error::LookupError,
    identity::{IdentityState, MockIdentityProvider},
    models::{Actor, AuthState, Profile},
    repository::{InMemoryProfileRepository, ProfileRepository, ProfileRepositoryState},
};

// --- Gated profile store ---

/// Wraps the in-memory repository with a gate: while held, lookups park until `release`.
/// Lets a test line up a slow lookup against an identity event deterministically.
pub struct GatedProfiles {
    pub inner: InMemoryProfileRepository,
    open: watch::Sender<bool>,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl GatedProfiles {
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self {
            inner: InMemoryProfileRepository::new(),
            open,
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn hold(&self) {
        self.open.send_replace(false);
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileRepository for GatedProfiles {
    async fn fetch_profile_by_id(&self, actor_id: Uuid) -> Result<Option<Profile>, LookupError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
        let result = self.inner.fetch_profile_by_id(actor_id).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}

// --- Fixture ---

pub struct Fixture {
    pub identity: Arc<MockIdentityProvider>,
    pub profiles: Arc<GatedProfiles>,
    pub resolver: ProfileResolver,
}

impl Fixture {
    pub fn new() -> Self {
        let identity = Arc::new(MockIdentityProvider::new());
        let profiles = Arc::new(GatedProfiles::new());
        let resolver = ProfileResolver::new(
            identity.clone() as IdentityState,
            profiles.clone() as ProfileRepositoryState,
        );
        Self {
            identity,
            profiles,
            resolver,
        }
    }

    /// Registers an account and makes it the session `restore_session` will find.
    pub fn restorable_actor(&self, email: &str) -> Actor {
        let actor = self.identity.register(email, "password");
        self.identity
            .set_session(Some(MockIdentityProvider::session_for(&actor)));
        actor
    }

    pub fn start(&self) -> SessionStore {
        SessionStore::start(self.resolver.clone())
    }
}

// --- Waiting helpers ---

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

/// Waits for the store to publish a state satisfying `predicate`.
pub async fn wait_for_state(store: &SessionStore, predicate: impl FnMut(&AuthState) -> bool) -> AuthState {
    let mut rx = store.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("state not reached within 2s")
        .expect("session store closed")
        .clone();
    state
}

/// Gives spawned tasks a chance to deliver anything still in flight.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn assert_invariants(state: &AuthState) {
    assert_eq!(
        state.actor.is_some(),
        state.session.is_some(),
        "actor must be present iff session is: {state:?}"
    );
    if let Some(profile) = &state.profile {
        let actor = state.actor.as_ref().expect("profile without actor");
        assert_eq!(profile.id, actor.id, "profile must belong to the actor");
    }
    if let (Some(session), Some(actor)) = (&state.session, &state.actor) {
        assert_eq!(&session.user, actor);
    }
}
