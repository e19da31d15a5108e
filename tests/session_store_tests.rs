mod common;

use async_trait::async_trait;
use common::{Fixture, assert_invariants, settle, wait_for_state, wait_until};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;
use ysp_portal::{
    Decision, ProfileResolver, Role, SessionStore,
    error::{AuthError, IdentityError, LookupError},
    identity::{IdentityEvent, IdentityProvider, IdentityState, MockIdentityProvider},
    models::{Actor, AuthState, Session},
    repository::{InMemoryProfileRepository, ProfileRepositoryState},
};

/// Signs somebody else in as soon as the wrapped provider's sign-out returns, like a
/// second tab completing a sign-in right after this one signed out.
struct SignInAfterSignOut {
    inner: Arc<MockIdentityProvider>,
    next: Session,
}

#[async_trait]
impl IdentityProvider for SignInAfterSignOut {
    async fn restore_session(&self) -> Result<Option<Session>, IdentityError> {
        self.inner.restore_session().await
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.inner.subscribe()
    }

    async fn current_actor(&self) -> Result<Option<Actor>, IdentityError> {
        self.inner.current_actor().await
    }

    async fn access_token(&self) -> Option<String> {
        self.inner.access_token().await
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError> {
        self.inner.sign_in_with_password(email, password).await
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let result = self.inner.sign_out().await;
        self.inner.emit(IdentityEvent::signed_in(self.next.clone()));
        result
    }
}

// --- Initialization scenarios ---

#[tokio::test]
async fn restore_with_chapter_head_profile_allows_chapter_head_only() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("head@example.org");
    let chapter = Uuid::new_v4();
    fx.profiles.inner.provision(actor.id, Role::ChapterHead, Some(chapter));

    let store = fx.start();
    let state = store.ready().await;

    assert!(!state.loading);
    assert_eq!(state.actor.as_ref().map(|a| a.id), Some(actor.id));
    assert_eq!(state.role(), Some(Role::ChapterHead));
    assert_eq!(state.profile.as_ref().and_then(|p| p.chapter_id), Some(chapter));
    assert_eq!(store.authorize(Role::ChapterHead), Decision::Allow);
    assert_eq!(
        store.authorize(Role::Admin),
        Decision::DenyWrongRole {
            actual: Role::ChapterHead,
            required: Role::Admin
        }
    );
    assert_invariants(&state);
}

#[tokio::test]
async fn restore_without_session_settles_anonymous() {
    let fx = Fixture::new();
    let store = fx.start();

    let state = store.ready().await;

    assert_eq!(state, AuthState::anonymous());
    for role in Role::ALL {
        assert_eq!(store.authorize(role), Decision::DenyUnauthenticated);
    }
}

#[tokio::test]
async fn authenticated_without_profile_is_unprovisioned_not_unauthenticated() {
    let fx = Fixture::new();
    fx.restorable_actor("new@example.org");

    let store = fx.start();
    let state = store.ready().await;

    assert!(state.actor.is_some());
    assert!(state.profile.is_none());
    for role in Role::ALL {
        assert_eq!(store.authorize(role), Decision::DenyUnprovisioned);
    }
}

#[tokio::test]
async fn gate_is_pending_until_the_restore_lookup_finishes() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("admin@example.org");
    fx.profiles.inner.provision(actor.id, Role::Admin, None);
    fx.profiles.hold();

    let store = fx.start();
    wait_until(|| fx.profiles.started() == 1).await;

    // The actor is not published ahead of its profile.
    assert_eq!(store.snapshot(), AuthState::initial());
    assert_eq!(store.authorize(Role::Admin), Decision::Pending);

    fx.profiles.release();
    let state = store.ready().await;
    assert_eq!(state.role(), Some(Role::Admin));
    assert_eq!(store.authorize(Role::Admin), Decision::Allow);
}

#[tokio::test]
async fn restore_fault_starts_anonymous_instead_of_hanging() {
    let fx = Fixture::new();
    fx.restorable_actor("head@example.org");
    fx.identity.set_offline(true);

    let store = fx.start();
    let state = store.ready().await;

    assert_eq!(state, AuthState::anonymous());
}

#[tokio::test]
async fn profile_fault_during_restore_is_treated_as_not_provisioned() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("head@example.org");
    fx.profiles.inner.provision(actor.id, Role::ChapterHead, None);
    fx.profiles.inner.set_offline(true);

    let store = fx.start();
    let state = store.ready().await;

    assert!(state.actor.is_some());
    assert!(state.profile.is_none());
    assert_eq!(store.authorize(Role::ChapterHead), Decision::DenyUnprovisioned);
}

// --- Races between the two initialization paths ---

#[tokio::test]
async fn sign_out_event_supersedes_pending_restore_lookup() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("head@example.org");
    fx.profiles.inner.provision(actor.id, Role::ChapterHead, None);
    fx.profiles.hold();

    let store = fx.start();
    wait_until(|| fx.profiles.started() == 1).await;

    // Signed out elsewhere while the restore path is still looking up the profile.
    fx.identity.emit(IdentityEvent::signed_out());
    let state = wait_for_state(&store, |s| !s.loading).await;
    assert_eq!(state, AuthState::anonymous());

    // The late profile must not resurrect the signed-out actor.
    fx.profiles.release();
    wait_until(|| fx.profiles.finished() == 1).await;
    settle().await;

    assert_eq!(store.snapshot(), AuthState::anonymous());
    assert_eq!(store.authorize(Role::ChapterHead), Decision::DenyUnauthenticated);
}

#[tokio::test]
async fn sign_in_event_wins_over_slower_restore_regardless_of_completion_order() {
    let fx = Fixture::new();
    let restored = fx.restorable_actor("old@example.org");
    fx.profiles.inner.provision(restored.id, Role::Admin, None);
    let newcomer = fx.identity.register("new@example.org", "password");
    fx.profiles.inner.provision(newcomer.id, Role::ChapterHead, None);
    fx.profiles.hold();

    let store = fx.start();
    wait_until(|| fx.profiles.started() == 1).await;

    fx.identity
        .emit(IdentityEvent::signed_in(MockIdentityProvider::session_for(&newcomer)));
    wait_until(|| fx.profiles.started() == 2).await;
    assert!(store.snapshot().loading);

    fx.profiles.release();
    let state = wait_for_state(&store, |s| !s.loading).await;
    wait_until(|| fx.profiles.finished() == 2).await;
    settle().await;

    let state_after = store.snapshot();
    assert_eq!(state, state_after);
    assert_eq!(state_after.actor.as_ref().map(|a| a.id), Some(newcomer.id));
    assert_eq!(state_after.role(), Some(Role::ChapterHead));
    assert_invariants(&state_after);
}

#[tokio::test]
async fn event_arriving_before_restore_clears_loading() {
    let fx = Fixture::new();
    let actor = fx.identity.register("head@example.org", "password");
    fx.profiles.inner.provision(actor.id, Role::ChapterHead, None);

    let store = fx.start();
    fx.identity
        .emit(IdentityEvent::signed_in(MockIdentityProvider::session_for(&actor)));

    let state = wait_for_state(&store, |s| s.profile.is_some()).await;
    assert!(!state.loading);
    assert_eq!(store.authorize(Role::ChapterHead), Decision::Allow);
}

// --- Transitions after initialization ---

#[tokio::test]
async fn loading_never_returns_after_settling() {
    let fx = Fixture::new();
    let actor = fx.identity.register("head@example.org", "password");
    fx.profiles.inner.provision(actor.id, Role::ChapterHead, None);
    let store = fx.start();
    store.ready().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut rx = store.subscribe();
    let recorder = {
        let seen = seen.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                seen.lock().unwrap().push(state);
            }
        })
    };

    fx.profiles.hold();
    fx.identity
        .sign_in_with_password("head@example.org", "password")
        .await
        .unwrap();
    wait_until(|| fx.profiles.started() == 1).await;
    // The new actor is pending; the old (anonymous) belief stays visible and settled.
    assert!(!store.snapshot().loading);
    fx.profiles.release();
    wait_for_state(&store, |s| s.profile.is_some()).await;

    store.sign_out().await.unwrap();
    wait_for_state(&store, |s| s.actor.is_none()).await;
    store.shutdown().await;
    recorder.await.unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    for state in seen.iter() {
        assert!(!state.loading);
        assert_invariants(state);
    }
}

#[tokio::test]
async fn switching_actor_keeps_previous_actor_until_lookup_lands() {
    let fx = Fixture::new();
    let admin = fx.restorable_actor("admin@example.org");
    fx.profiles.inner.provision(admin.id, Role::Admin, None);
    let head = fx.identity.register("head@example.org", "password");
    fx.profiles.inner.provision(head.id, Role::ChapterHead, None);
    let store = fx.start();
    store.ready().await;

    fx.profiles.hold();
    fx.identity
        .emit(IdentityEvent::signed_in(MockIdentityProvider::session_for(&head)));
    wait_until(|| fx.profiles.started() == 2).await;

    // Until the newcomer's profile is known, the previous actor is still published.
    let during = store.snapshot();
    assert_eq!(during.actor.as_ref().map(|a| a.id), Some(admin.id));
    assert_eq!(during.role(), Some(Role::Admin));
    assert_eq!(store.authorize(Role::Admin), Decision::Allow);

    fx.profiles.release();
    let after = wait_for_state(&store, |s| s.actor.as_ref().is_some_and(|a| a.id == head.id)).await;
    // Actor and profile switch in the same update.
    assert_eq!(after.profile.as_ref().map(|p| p.id), Some(head.id));
    assert_eq!(store.authorize(Role::Admin), Decision::DenyWrongRole {
        actual: Role::ChapterHead,
        required: Role::Admin
    });
    assert_invariants(&after);
}

#[tokio::test]
async fn token_refresh_keeps_the_profile() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("admin@example.org");
    fx.profiles.inner.provision(actor.id, Role::Admin, None);
    let store = fx.start();
    store.ready().await;

    let mut refreshed = MockIdentityProvider::session_for(&actor);
    refreshed.access_token = "rotated".to_string();
    fx.identity.emit(IdentityEvent::token_refreshed(refreshed));

    let state = wait_for_state(&store, |s| {
        s.session.as_ref().is_some_and(|x| x.access_token == "rotated")
    })
    .await;
    assert_eq!(state.role(), Some(Role::Admin));
}

#[tokio::test]
async fn sign_out_twice_is_idempotent() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("admin@example.org");
    fx.profiles.inner.provision(actor.id, Role::Admin, None);
    let store = fx.start();
    store.ready().await;

    store.sign_out().await.unwrap();
    let first = store.snapshot();
    store.sign_out().await.unwrap();
    let second = store.snapshot();

    assert_eq!(first, AuthState::anonymous());
    assert_eq!(first, second);
    assert!(fx.identity.current_actor().await.unwrap().is_none());
}

#[tokio::test]
async fn sign_in_right_after_sign_out_is_not_lost() {
    // Repeated because the interleaving of the provider reply and the events varies per run.
    for _ in 0..20 {
        let identity = Arc::new(MockIdentityProvider::new());
        let profiles = Arc::new(InMemoryProfileRepository::new());
        let first = identity.register("admin@example.org", "pw");
        let second = identity.register("head@example.org", "pw");
        identity.set_session(Some(MockIdentityProvider::session_for(&first)));
        profiles.provision(first.id, Role::Admin, None);
        profiles.provision(second.id, Role::ChapterHead, None);

        let provider = Arc::new(SignInAfterSignOut {
            inner: identity.clone(),
            next: MockIdentityProvider::session_for(&second),
        });
        let store = SessionStore::start(ProfileResolver::new(
            provider as IdentityState,
            profiles as ProfileRepositoryState,
        ));
        assert_eq!(store.ready().await.role(), Some(Role::Admin));

        store.sign_out().await.unwrap();
        wait_for_state(&store, |s| s.actor.as_ref().is_some_and(|a| a.id == second.id)).await;
        settle().await;

        let state = store.snapshot();
        let provider_actor = identity.current_actor().await.unwrap().map(|a| a.id);
        assert_eq!(provider_actor, Some(second.id));
        assert_eq!(state.actor.as_ref().map(|a| a.id), provider_actor);
        assert_eq!(state.role(), Some(Role::ChapterHead));
        assert_invariants(&state);

        store.shutdown().await;
    }
}

#[tokio::test]
async fn sign_out_clears_state_even_when_provider_fails() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("admin@example.org");
    fx.profiles.inner.provision(actor.id, Role::Admin, None);
    let store = fx.start();
    store.ready().await;

    fx.identity.set_offline(true);
    let result = store.sign_out().await;

    assert!(matches!(
        result,
        Err(AuthError::Identity(IdentityError::Transport(_)))
    ));
    assert_eq!(store.snapshot(), AuthState::anonymous());
}

// --- Explicit profile refresh ---

#[tokio::test]
async fn refresh_picks_up_new_provisioning() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("new@example.org");
    let store = fx.start();
    store.ready().await;
    assert_eq!(store.authorize(Role::Admin), Decision::DenyUnprovisioned);

    fx.profiles.inner.provision(actor.id, Role::Admin, None);
    let refreshed = store.refresh_profile().await.unwrap();

    assert_eq!(refreshed.map(|p| p.role), Some(Role::Admin));
    assert_eq!(store.authorize(Role::Admin), Decision::Allow);
}

#[tokio::test]
async fn refresh_after_deprovisioning_revokes_access() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("admin@example.org");
    fx.profiles.inner.provision(actor.id, Role::Admin, None);
    let store = fx.start();
    store.ready().await;
    assert_eq!(store.authorize(Role::Admin), Decision::Allow);

    fx.profiles.inner.deprovision(actor.id);

    assert_eq!(store.refresh_profile().await, Ok(None));
    assert_eq!(store.authorize(Role::Admin), Decision::DenyUnprovisioned);
}

#[tokio::test]
async fn refresh_offline_clears_profile_and_surfaces_fault() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("head@example.org");
    fx.profiles.inner.provision(actor.id, Role::ChapterHead, None);
    let store = fx.start();
    store.ready().await;

    fx.profiles.inner.set_offline(true);
    let result = store.refresh_profile().await;

    assert!(matches!(
        result,
        Err(AuthError::Lookup(LookupError::Transport(_)))
    ));
    let state = store.snapshot();
    assert!(state.profile.is_none());
    assert!(state.actor.is_some());
    assert_invariants(&state);
}

#[tokio::test]
async fn refresh_with_identity_offline_is_an_identity_fault() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("head@example.org");
    fx.profiles.inner.provision(actor.id, Role::ChapterHead, None);
    let store = fx.start();
    store.ready().await;

    fx.identity.set_offline(true);
    let result = store.refresh_profile().await;

    assert!(matches!(result, Err(AuthError::Identity(_))));
    assert!(store.snapshot().profile.is_none());
}

#[tokio::test]
async fn refresh_for_unprovisioned_actor_is_ok_none() {
    let fx = Fixture::new();
    fx.restorable_actor("new@example.org");
    let store = fx.start();
    store.ready().await;

    assert_eq!(store.refresh_profile().await, Ok(None));
}

#[tokio::test]
async fn refresh_when_anonymous_reports_no_profile() {
    let fx = Fixture::new();
    let store = fx.start();
    store.ready().await;

    assert_eq!(store.refresh_profile().await, Ok(None));
    assert_eq!(store.snapshot(), AuthState::anonymous());
}

// --- Teardown ---

#[tokio::test]
async fn shutdown_rejects_commands_and_ignores_late_results() {
    let fx = Fixture::new();
    let actor = fx.restorable_actor("head@example.org");
    fx.profiles.inner.provision(actor.id, Role::ChapterHead, None);
    fx.profiles.hold();

    let store = fx.start();
    wait_until(|| fx.profiles.started() == 1).await;

    store.shutdown().await;
    assert!(store.is_closed());

    fx.profiles.release();
    fx.identity
        .emit(IdentityEvent::signed_in(MockIdentityProvider::session_for(&actor)));
    settle().await;

    assert_eq!(store.snapshot(), AuthState::initial());
    assert_eq!(store.sign_out().await, Err(AuthError::StoreClosed));
    assert_eq!(store.refresh_profile().await, Err(AuthError::StoreClosed));

    // A second shutdown is harmless and `ready` does not hang on a dead store.
    store.shutdown().await;
    assert!(store.ready().await.loading);
}
