use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    error::IdentityError,
    models::{Actor, Session},
};

/// Buffer for identity change events. Subscribers that fall this far behind are told
/// they lagged and skip to the newest event.
pub const EVENT_BUFFER: usize = 32;

/// IdentityEventKind
///
/// The transition that produced an `IdentityEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// IdentityEvent
///
/// One message on the identity change stream. `session` is the provider's session
/// after the transition (`None` after sign-out).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEvent {
    pub kind: IdentityEventKind,
    pub session: Option<Session>,
}

impl IdentityEvent {
    pub fn signed_in(session: Session) -> Self {
        Self {
            kind: IdentityEventKind::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            kind: IdentityEventKind::SignedOut,
            session: None,
        }
    }

    pub fn token_refreshed(session: Session) -> Self {
        Self {
            kind: IdentityEventKind::TokenRefreshed,
            session: Some(session),
        }
    }
}

/// IdentityProvider Trait
///
/// The boundary to the external identity service. Implementations are shared as
/// `IdentityState` (`Arc<dyn IdentityProvider>`) between the Session Store, the Profile
/// Resolver and the sign-in flow.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// One-shot lookup of an existing session (hard reload / process restart).
    async fn restore_session(&self) -> Result<Option<Session>, IdentityError>;

    /// Long-lived change stream. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent>;

    /// Asks the provider who the current actor is. `Ok(None)` means nobody is signed in
    /// or the provider no longer accepts the held session.
    async fn current_actor(&self) -> Result<Option<Actor>, IdentityError>;

    /// Bearer token for calls to the structured-data store, if signed in.
    async fn access_token(&self) -> Option<String>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError>;

    async fn sign_out(&self) -> Result<(), IdentityError>;
}

pub type IdentityState = Arc<dyn IdentityProvider>;

/// MockIdentityProvider
///
/// In-memory identity provider for tests and local development. Accounts are registered
/// up front; sign-in/sign-out publish change events exactly as the remote provider would.
/// `emit` lets a test inject events that happened "elsewhere" (another tab, an expiry).
pub struct MockIdentityProvider {
    accounts: Mutex<HashMap<String, (String, Actor)>>,
    current: Mutex<Option<Session>>,
    events: broadcast::Sender<IdentityEvent>,
    offline: AtomicBool,
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            events,
            offline: AtomicBool::new(false),
        }
    }

    /// Registers an account and returns its actor.
    pub fn register(&self, email: &str, password: &str) -> Actor {
        let actor = Actor {
            id: Uuid::new_v4(),
            email: email.to_string(),
        };
        self.lock_accounts()
            .insert(email.to_string(), (password.to_string(), actor.clone()));
        actor
    }

    /// Builds a one-hour session for `actor`.
    pub fn session_for(actor: &Actor) -> Session {
        Session {
            access_token: format!("mock-access-{}", actor.id.simple()),
            refresh_token: Some(format!("mock-refresh-{}", actor.id.simple())),
            expires_at: Utc::now() + Duration::hours(1),
            user: actor.clone(),
        }
    }

    /// Seeds the session returned by `restore_session` without emitting an event.
    pub fn set_session(&self, session: Option<Session>) {
        *self.lock_current() = session;
    }

    /// Replaces the held session and publishes the event to subscribers.
    pub fn emit(&self, event: IdentityEvent) {
        *self.lock_current() = event.session.clone();
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), IdentityError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(IdentityError::Transport("network unreachable".to_string()));
        }
        Ok(())
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_accounts(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Actor)>> {
        self.accounts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn restore_session(&self) -> Result<Option<Session>, IdentityError> {
        self.ensure_online()?;
        Ok(self.lock_current().clone().filter(|s| !s.is_expired()))
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }

    async fn current_actor(&self) -> Result<Option<Actor>, IdentityError> {
        self.ensure_online()?;
        Ok(self.lock_current().as_ref().map(|s| s.user.clone()))
    }

    async fn access_token(&self) -> Option<String> {
        self.lock_current().as_ref().map(|s| s.access_token.clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError> {
        self.ensure_online()?;
        let actor = match self.lock_accounts().get(email) {
            Some((expected, actor)) if expected == password => actor.clone(),
            _ => {
                return Err(IdentityError::Rejected {
                    status: 400,
                    message: "Invalid login credentials".to_string(),
                });
            }
        };
        let session = Self::session_for(&actor);
        self.emit(IdentityEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let had_session = self.lock_current().is_some();
        if had_session {
            self.emit(IdentityEvent::signed_out());
        }
        self.ensure_online()
    }
}
