use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::{
    config::DEFAULT_HTTP_TIMEOUT,
    error::IdentityError,
    identity::{EVENT_BUFFER, IdentityEvent, IdentityProvider},
    models::{Actor, Session},
};

/// Claims
///
/// The subset of the identity provider's access token payload this crate reads.
/// The token is signed with the project's JWT secret (HS256).
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the actor id, shared with `profiles.id`.
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiration Time (exp), seconds since the epoch.
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub aud: Option<String>,
}

/// decode_access_token
///
/// Validates signature and expiry of an access token and returns its claims.
pub fn decode_access_token(token: &str, jwt_secret: &str) -> Result<Claims, IdentityError> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());

    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.set_audience(&["authenticated"]);

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => IdentityError::InvalidToken("token expired".to_string()),
            _ => IdentityError::InvalidToken(e.to_string()),
        })
}

// --- GoTrue wire types ---

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

impl From<GoTrueUser> for Actor {
    fn from(user: GoTrueUser) -> Self {
        Actor {
            id: user.id,
            email: user.email.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoTrueSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: GoTrueUser,
}

impl GoTrueSession {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(|| Utc::now() + Duration::seconds(self.expires_in.unwrap_or(3600)));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GoTrueError {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

async fn rejection(response: reqwest::Response) -> IdentityError {
    let status = response.status().as_u16();
    let body = response.json::<GoTrueError>().await.unwrap_or_default();
    let message = body
        .error_description
        .or(body.msg)
        .or(body.message)
        .unwrap_or_else(|| "request rejected".to_string());
    IdentityError::Rejected { status, message }
}

/// http_client
///
/// Client shared by the Supabase-backed boundaries. Every request is bounded by `timeout`
/// so a hung provider surfaces as a transport fault instead of a session that never settles.
pub fn http_client(timeout: StdDuration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        // Only fails where `reqwest::Client::new()` would panic too (TLS backend init).
        .expect("FATAL: Failed to initialize the HTTP client")
}

/// SupabaseIdentity
///
/// `IdentityProvider` backed by the GoTrue REST API of a Supabase project.
/// The current session lives in memory only; nothing is written to disk.
pub struct SupabaseIdentity {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    jwt_secret: Option<String>,
    current: RwLock<Option<Session>>,
    events: broadcast::Sender<IdentityEvent>,
}

impl SupabaseIdentity {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            http: http_client(DEFAULT_HTTP_TIMEOUT),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            jwt_secret: None,
            current: RwLock::new(None),
            events,
        }
    }

    pub fn with_jwt_secret(mut self, secret: &str) -> Self {
        self.jwt_secret = Some(secret.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.http = http_client(timeout);
        self
    }

    /// seed_access_token
    ///
    /// Installs an existing access token as the current session so that `restore_session`
    /// finds it. The token is validated locally; no event is published.
    pub async fn seed_access_token(&self, token: &str) -> Result<Session, IdentityError> {
        let secret = self.jwt_secret.as_deref().ok_or_else(|| {
            IdentityError::InvalidToken("no JWT secret configured to validate the token".to_string())
        })?;
        let claims = decode_access_token(token, secret)?;
        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp as i64, 0)
            .ok_or_else(|| IdentityError::InvalidToken("exp out of range".to_string()))?;

        let session = Session {
            access_token: token.to_string(),
            refresh_token: None,
            expires_at,
            user: Actor {
                id: claims.sub,
                email: claims.email.unwrap_or_default(),
            },
        };
        *self.current.write().await = Some(session.clone());
        tracing::debug!(actor_id = %session.user.id, "seeded session from access token");
        Ok(session)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn publish(&self, event: IdentityEvent) {
        let _ = self.events.send(event);
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, IdentityError> {
        let response = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let session = response.json::<GoTrueSession>().await?;
        Ok(session.into_session())
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    async fn restore_session(&self) -> Result<Option<Session>, IdentityError> {
        let held = self.current.read().await.clone();
        let Some(session) = held else {
            return Ok(None);
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            *self.current.write().await = None;
            return Ok(None);
        };

        match self
            .token_grant("refresh_token", serde_json::json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(refreshed) => {
                *self.current.write().await = Some(refreshed.clone());
                self.publish(IdentityEvent::token_refreshed(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err(IdentityError::Rejected { status, message }) => {
                tracing::info!(status, %message, "stored session could not be refreshed");
                *self.current.write().await = None;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }

    async fn current_actor(&self) -> Result<Option<Actor>, IdentityError> {
        let Some(token) = self.access_token().await else {
            return Ok(None);
        };

        let response = self
            .http
            .get(self.auth_url("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let user = response.json::<GoTrueUser>().await?;
                Ok(Some(user.into()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            _ => Err(rejection(response).await),
        }
    }

    async fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError> {
        let session = self
            .token_grant(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;

        *self.current.write().await = Some(session.clone());
        tracing::info!(actor_id = %session.user.id, "signed in");
        self.publish(IdentityEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        // The local session is dropped even if the remote call fails.
        let Some(session) = self.current.write().await.take() else {
            return Ok(());
        };
        self.publish(IdentityEvent::signed_out());

        let response = self
            .http
            .post(self.auth_url("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            // Token already revoked or expired upstream.
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(rejection(response).await),
        }
    }
}
