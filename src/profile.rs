use uuid::Uuid;

use crate::{
    error::{AuthError, LookupError},
    identity::IdentityState,
    models::Profile,
    repository::ProfileRepositoryState,
};

/// ProfileResolver
///
/// Stateless request/response wrapper around the profile store. Three outcomes:
/// `Ok(Some(profile))`, `Ok(None)` (not provisioned) and `Err(fault)`. Callers decide
/// per call site whether a fault is treated like absence.
#[derive(Clone)]
pub struct ProfileResolver {
    identity: IdentityState,
    profiles: ProfileRepositoryState,
}

impl ProfileResolver {
    pub fn new(identity: IdentityState, profiles: ProfileRepositoryState) -> Self {
        Self { identity, profiles }
    }

    pub fn identity(&self) -> &IdentityState {
        &self.identity
    }

    /// resolve_profile
    ///
    /// Fetches the profile for `actor_id`. A row that comes back under a different id is
    /// rejected as malformed rather than attached to the wrong actor.
    pub async fn resolve_profile(&self, actor_id: Uuid) -> Result<Option<Profile>, LookupError> {
        let profile = self.profiles.fetch_profile_by_id(actor_id).await?;
        match profile {
            Some(p) if p.id != actor_id => Err(LookupError::Malformed(format!(
                "profile {} returned for actor {actor_id}",
                p.id
            ))),
            other => Ok(other),
        }
    }

    /// resolve_profile_for_current_actor
    ///
    /// Asks the identity provider for the current actor first and returns `Ok(None)`
    /// immediately when nobody is signed in.
    pub async fn resolve_profile_for_current_actor(&self) -> Result<Option<Profile>, AuthError> {
        let Some(actor) = self.identity.current_actor().await? else {
            return Ok(None);
        };
        Ok(self.resolve_profile(actor.id).await?)
    }
}
