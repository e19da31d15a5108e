//! Session Store
//!
//! A single owner task holds `AuthState` and is the only writer. Everything that may change
//! the belief about the current actor reaches it as a message:
//!
//! - consumer commands (sign-out, profile refresh, shutdown) on a bounded queue,
//! - identity change events from the provider's broadcast stream,
//! - completions of the lookups it spawned.
//!
//! Snapshots are published on a `watch` channel; readers never see a half-applied update.
//!
//! Every identity transition (change event, sign-out request) advances an epoch at the moment
//! the store handles it. Lookups and sign-outs carry the epoch they were started in and their
//! results are dropped if the epoch moved on. The restore path runs in epoch 0, so any change
//! event supersedes it; an event that arrives while a sign-out is in flight supersedes the
//! sign-out.
//!
//! A `SignedIn` event for a different actor does not clear the previous state: the old actor
//! and profile stay published (and keep authorizing) until the new lookup completes, and are
//! then replaced in one update.

use std::future::pending;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{AuthError, IdentityError, LookupError},
    gate::{self, Decision},
    identity::{IdentityEvent, IdentityEventKind},
    models::{AuthState, Profile, Session},
    profile::ProfileResolver,
    roles::Role,
};

const COMMAND_BUFFER: usize = 32;

enum Command {
    SignOut {
        reply: oneshot::Sender<Result<(), AuthError>>,
    },
    RefreshProfile {
        reply: oneshot::Sender<Result<Option<Profile>, AuthError>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Restore,
    Event(IdentityEventKind),
}

enum Completion {
    Resolved {
        epoch: u64,
        source: Source,
        session: Option<Session>,
        profile: Result<Option<Profile>, LookupError>,
    },
    RestoreFailed {
        error: IdentityError,
    },
    Refreshed {
        epoch: u64,
        outcome: Result<Option<Profile>, AuthError>,
        reply: oneshot::Sender<Result<Option<Profile>, AuthError>>,
    },
    SignedOut {
        epoch: u64,
        result: Result<(), IdentityError>,
        reply: oneshot::Sender<Result<(), AuthError>>,
    },
}

/// SessionStore
///
/// Cloneable handle to the owner task. Construct once with `SessionStore::start` and pass
/// it to whatever needs to observe or act on the session; call `shutdown` on teardown.
#[derive(Clone)]
pub struct SessionStore {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<AuthState>,
}

impl SessionStore {
    /// Spawns the owner task, subscribes to identity changes and kicks off the restore path.
    /// Must be called inside a Tokio runtime.
    pub fn start(resolver: ProfileResolver) -> Self {
        let (state_tx, state_rx) = watch::channel(AuthState::initial());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        // Subscribe before restoring so no event between the two is lost.
        let events = resolver.identity().subscribe();

        let mut task = StoreTask {
            resolver,
            state: state_tx,
            commands: command_rx,
            done_tx,
            done: done_rx,
            events: Some(events),
            tasks: JoinSet::new(),
            epoch: 0,
        };
        task.start_restore();
        tokio::spawn(task.run());

        Self {
            commands: command_tx,
            state: state_rx,
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Read-only subscription to state changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.clone()
    }

    /// Waits until initialization has settled (`loading == false`) and returns that state.
    /// Returns the last published state if the store shut down first.
    pub async fn ready(&self) -> AuthState {
        let mut rx = self.state.clone();
        if rx.wait_for(|s| !s.loading).await.is_err() {
            debug!("session store closed before initialization settled");
        }
        let state = rx.borrow().clone();
        state
    }

    /// Waits up to `within` for the store to settle on `actor_id` with a resolved profile,
    /// e.g. right after a sign-in whose change event is still being processed.
    pub async fn settled_for(&self, actor_id: Uuid, within: Duration) -> Option<AuthState> {
        let mut rx = self.state.clone();
        let settled = |s: &AuthState| {
            !s.loading && s.actor.as_ref().is_some_and(|a| a.id == actor_id) && s.profile.is_some()
        };
        let state = match tokio::time::timeout(within, rx.wait_for(settled)).await {
            Ok(Ok(state)) => Some(state.clone()),
            _ => None,
        };
        state
    }

    /// Authorization Gate over the current snapshot.
    pub fn authorize(&self, required: Role) -> Decision {
        gate::authorize(required, &self.state.borrow())
    }

    /// sign_out
    ///
    /// Delegates to the identity provider, then clears the state regardless of the
    /// provider's answer. A provider fault is still returned to the caller. If an identity
    /// event arrives while the provider call is in flight, that event decides the state.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.request(|reply| Command::SignOut { reply }).await
    }

    /// refresh_profile
    ///
    /// Re-resolves the profile of the current actor. On a fault the profile is cleared and
    /// the fault is returned, so callers can tell "offline" from "not provisioned" (`Ok(None)`).
    pub async fn refresh_profile(&self) -> Result<Option<Profile>, AuthError> {
        self.request(|reply| Command::RefreshProfile { reply }).await
    }

    /// Stops the owner task: unsubscribes from identity events and aborts in-flight lookups.
    /// Idempotent.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { ack }).await.is_ok() {
            let _ = done.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, AuthError>>) -> Command,
    ) -> Result<T, AuthError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| AuthError::StoreClosed)?;
        response.await.map_err(|_| AuthError::StoreClosed)?
    }
}

struct StoreTask {
    resolver: ProfileResolver,
    state: watch::Sender<AuthState>,
    commands: mpsc::Receiver<Command>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done: mpsc::UnboundedReceiver<Completion>,
    events: Option<broadcast::Receiver<IdentityEvent>>,
    tasks: JoinSet<()>,
    epoch: u64,
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<IdentityEvent>>,
) -> Result<IdentityEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

impl StoreTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { ack }) => {
                        self.teardown();
                        let _ = ack.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        return;
                    }
                },
                Some(done) = self.done.recv() => self.apply(done),
                event = next_event(&mut self.events) => self.handle_event(event),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "session store lookup task panicked");
                        }
                    }
                }
            }
        }
    }

    fn teardown(&mut self) {
        self.events = None;
        self.tasks.abort_all();
        self.commands.close();
        info!(epoch = self.epoch, "session store shut down");
    }

    // --- Restore path ---

    fn start_restore(&mut self) {
        let resolver = self.resolver.clone();
        let done = self.done_tx.clone();
        self.tasks.spawn(async move {
            let completion = match resolver.identity().restore_session().await {
                Ok(Some(session)) => {
                    let profile = resolver.resolve_profile(session.user.id).await;
                    Completion::Resolved {
                        epoch: 0,
                        source: Source::Restore,
                        session: Some(session),
                        profile,
                    }
                }
                Ok(None) => Completion::Resolved {
                    epoch: 0,
                    source: Source::Restore,
                    session: None,
                    profile: Ok(None),
                },
                Err(error) => Completion::RestoreFailed { error },
            };
            // The store may already be gone.
            let _ = done.send(completion);
        });
    }

    // --- Change-event path ---

    fn handle_event(&mut self, event: Result<IdentityEvent, broadcast::error::RecvError>) {
        match event {
            Ok(event) => self.on_identity_event(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "identity event stream lagged; continuing from newest events");
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("identity event stream closed");
                self.events = None;
            }
        }
    }

    fn on_identity_event(&mut self, event: IdentityEvent) {
        self.epoch += 1;
        let epoch = self.epoch;
        debug!(epoch, kind = ?event.kind, "identity event received");

        match event.session {
            None => self.publish(AuthState::anonymous()),
            Some(session) => {
                let resolver = self.resolver.clone();
                let done = self.done_tx.clone();
                let source = Source::Event(event.kind);
                self.tasks.spawn(async move {
                    let profile = resolver.resolve_profile(session.user.id).await;
                    let _ = done.send(Completion::Resolved {
                        epoch,
                        source,
                        session: Some(session),
                        profile,
                    });
                });
            }
        }
    }

    // --- Consumer commands ---

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SignOut { reply } => {
                // Lookups started before the sign-out request must not land after it.
                self.epoch += 1;
                let epoch = self.epoch;
                let identity = self.resolver.identity().clone();
                let done = self.done_tx.clone();
                self.tasks.spawn(async move {
                    let result = identity.sign_out().await;
                    let _ = done.send(Completion::SignedOut {
                        epoch,
                        result,
                        reply,
                    });
                });
            }
            Command::RefreshProfile { reply } => {
                let epoch = self.epoch;
                let resolver = self.resolver.clone();
                let done = self.done_tx.clone();
                self.tasks.spawn(async move {
                    let outcome = resolver.resolve_profile_for_current_actor().await;
                    let _ = done.send(Completion::Refreshed {
                        epoch,
                        outcome,
                        reply,
                    });
                });
            }
            // Handled by the run loop.
            Command::Shutdown { ack } => {
                let _ = ack.send(());
            }
        }
    }

    // --- Completions ---

    fn apply(&mut self, completion: Completion) {
        match completion {
            Completion::Resolved {
                epoch,
                source,
                session,
                profile,
            } => {
                if epoch != self.epoch {
                    debug!(epoch, current = self.epoch, ?source, "discarding superseded resolution");
                    return;
                }
                let profile = match profile {
                    Ok(profile) => profile,
                    Err(e) => {
                        warn!(error = %e, ?source, "profile lookup failed; treating actor as not provisioned");
                        None
                    }
                };
                let actor = session.as_ref().map(|s| s.user.clone());
                info!(
                    ?source,
                    actor_id = ?actor.as_ref().map(|a| a.id),
                    role = ?profile.as_ref().map(|p| p.role),
                    "session resolved"
                );
                self.publish(AuthState {
                    session,
                    actor,
                    profile,
                    loading: false,
                });
            }
            Completion::RestoreFailed { error } => {
                if self.epoch != 0 {
                    debug!(error = %error, "restore failure superseded by identity event");
                    return;
                }
                warn!(error = %error, "session restore failed; starting anonymous");
                self.publish(AuthState::anonymous());
            }
            Completion::Refreshed {
                epoch,
                outcome,
                reply,
            } => {
                if epoch == self.epoch {
                    let profile = match &outcome {
                        Ok(profile) => profile.clone(),
                        Err(e) => {
                            warn!(error = %e, "profile refresh failed; clearing profile");
                            None
                        }
                    };
                    self.set_profile(profile);
                } else {
                    debug!(epoch, current = self.epoch, "profile refresh superseded by identity change");
                }
                let _ = reply.send(outcome);
            }
            Completion::SignedOut {
                epoch,
                result,
                reply,
            } => {
                if let Err(e) = &result {
                    warn!(error = %e, "identity provider sign-out failed; clearing local session anyway");
                }
                if epoch == self.epoch {
                    self.publish(AuthState::anonymous());
                } else {
                    // A later identity event already carries the provider's current session.
                    debug!(epoch, current = self.epoch, "sign-out superseded by identity event");
                }
                let _ = reply.send(result.map_err(AuthError::from));
            }
        }
    }

    // Only a profile belonging to the current actor is ever stored.
    fn set_profile(&self, profile: Option<Profile>) {
        self.state.send_if_modified(|state| {
            let current_actor = state.actor.as_ref().map(|a| a.id);
            let profile = profile.filter(|p| Some(p.id) == current_actor);
            if state.profile == profile {
                return false;
            }
            state.profile = profile;
            true
        });
    }

    fn publish(&self, next: AuthState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}
