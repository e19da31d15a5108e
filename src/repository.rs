use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use uuid::Uuid;

use crate::{
    config::DEFAULT_HTTP_TIMEOUT,
    error::LookupError,
    identity::IdentityState,
    models::Profile,
    roles::{Role, normalize_role},
    supabase::http_client,
};

/// ProfileRepository Trait
///
/// Read access to the `profiles` table of the structured-data store.
///
/// Contract: a missing row is `Ok(None)`. Only transport, backend or decoding faults
/// are `Err(LookupError)`. No caching; every call is a fresh round trip.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn fetch_profile_by_id(&self, actor_id: Uuid) -> Result<Option<Profile>, LookupError>;
}

/// ProfileRepositoryState
///
/// The shared handle type used by the Profile Resolver.
pub type ProfileRepositoryState = Arc<dyn ProfileRepository>;

/// ProfileRow
///
/// Raw row shape shared by the REST and Postgres backends. `role` is kept as text and
/// validated against the Role Directory on conversion.
#[derive(Debug, Clone, Deserialize, FromRow)]
pub struct ProfileRow {
    pub id: Uuid,
    pub role: String,
    pub chapter_id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = LookupError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let role = normalize_role(Some(&row.role)).ok_or_else(|| {
            LookupError::Malformed(format!("unknown role '{}' on profile {}", row.role, row.id))
        })?;
        Ok(Profile {
            id: row.id,
            role,
            chapter_id: row.chapter_id,
            created_at: row.created_at,
        })
    }
}

// --- PostgREST backend ---

/// RestProfileRepository
///
/// Queries `profiles` through the project's PostgREST endpoint using the signed-in
/// actor's bearer token, so row-level security applies exactly as for the browser client.
pub struct RestProfileRepository {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    identity: IdentityState,
}

impl RestProfileRepository {
    pub fn new(base_url: &str, anon_key: &str, identity: IdentityState) -> Self {
        Self {
            http: http_client(DEFAULT_HTTP_TIMEOUT),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            identity,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = http_client(timeout);
        self
    }
}

#[async_trait]
impl ProfileRepository for RestProfileRepository {
    async fn fetch_profile_by_id(&self, actor_id: Uuid) -> Result<Option<Profile>, LookupError> {
        let token = self
            .identity
            .access_token()
            .await
            .unwrap_or_else(|| self.anon_key.clone());

        let id_filter = format!("eq.{actor_id}");
        let response = self
            .http
            .get(format!("{}/rest/v1/profiles", self.base_url))
            .query(&[("select", "id,role,chapter_id,created_at"), ("id", id_filter.as_str())])
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LookupError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let mut rows = response.json::<Vec<ProfileRow>>().await?;
        match rows.len() {
            0 => Ok(None),
            1 => rows.pop().map(Profile::try_from).transpose(),
            n => Err(LookupError::Malformed(format!(
                "expected at most one profile for {actor_id}, found {n}"
            ))),
        }
    }
}

// --- Postgres backend ---

/// PostgresProfileRepository
///
/// Direct read of `public.profiles` for deployments that share the database.
pub struct PostgresProfileRepository {
    pool: PgPool,
}

impl PostgresProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileRepository for PostgresProfileRepository {
    async fn fetch_profile_by_id(&self, actor_id: Uuid) -> Result<Option<Profile>, LookupError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, role, chapter_id, created_at FROM profiles WHERE id = $1",
        )
        .bind(actor_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Profile::try_from).transpose()
    }
}

// --- In-memory backend ---

/// InMemoryProfileRepository
///
/// Profiles held in a map, with an `offline` switch that turns every lookup into a
/// transport fault. Used by tests and local development.
#[derive(Default)]
pub struct InMemoryProfileRepository {
    profiles: Mutex<HashMap<Uuid, Profile>>,
    offline: AtomicBool,
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisions `actor_id` with `role`, replacing any existing row.
    pub fn provision(&self, actor_id: Uuid, role: Role, chapter_id: Option<Uuid>) -> Profile {
        let profile = Profile {
            id: actor_id,
            role,
            chapter_id,
            created_at: Some(Utc::now()),
        };
        self.lock().insert(actor_id, profile.clone());
        profile
    }

    pub fn deprovision(&self, actor_id: Uuid) {
        self.lock().remove(&actor_id);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Profile>> {
        self.profiles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn fetch_profile_by_id(&self, actor_id: Uuid) -> Result<Option<Profile>, LookupError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LookupError::Transport("network unreachable".to_string()));
        }
        Ok(self.lock().get(&actor_id).cloned())
    }
}
