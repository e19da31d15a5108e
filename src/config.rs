use std::env;
use std::time::Duration;

/// Per-request timeout for identity provider and PostgREST calls unless `HTTP_TIMEOUT_SECS` says otherwise.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// AppConfig
///
/// Immutable configuration loaded once at startup; `main` builds the backends and the
/// listener from it.
#[derive(Clone)]
pub struct AppConfig {
    // Base URL of the Supabase project (identity + PostgREST).
    pub supabase_url: String,
    // Public anon key sent as `apikey` on every call.
    pub supabase_anon_key: String,
    // HS256 secret used to validate a seeded access token. Mandatory in production.
    pub jwt_secret: String,
    // Runtime environment marker.
    pub env: Env,
    // Listen address of the portal shell.
    pub bind_addr: String,
    // Where profiles are read from.
    pub profile_backend: ProfileBackend,
    // Optional access token restored as the initial session.
    pub session_token: Option<String>,
    // Upper bound for a single call to the identity provider or PostgREST.
    pub http_timeout: Duration,
}

/// Env
///
/// Runtime context; selects log format and how strict configuration loading is.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

/// ProfileBackend
///
/// `Rest` goes through PostgREST with the actor's token; `Postgres` reads the table directly.
#[derive(Clone, PartialEq, Debug)]
pub enum ProfileBackend {
    Rest,
    Postgres { db_url: String },
}

impl Default for AppConfig {
    /// default
    ///
    /// Safe, non-panicking values for test state scaffolding.
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "local-anon-key".to_string(),
            jwt_secret: "super-secure-test-secret-value-local".to_string(),
            env: Env::Local,
            bind_addr: "127.0.0.1:3000".to_string(),
            profile_backend: ProfileBackend::Rest,
            session_token: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables.
    ///
    /// # Panics
    /// Panics if `SUPABASE_URL` or `SUPABASE_ANON_KEY` is missing, if
    /// `SUPABASE_JWT_SECRET` is missing in production, or if `PROFILE_BACKEND=postgres`
    /// is set without `DATABASE_URL`. The portal cannot do anything useful without them.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").unwrap_or_else(|_| "local".to_string()).as_str() {
            "production" => Env::Production,
            _ => Env::Local,
        };

        let supabase_url = env::var("SUPABASE_URL").expect("FATAL: Missing SUPABASE_URL");
        let supabase_anon_key =
            env::var("SUPABASE_ANON_KEY").expect("FATAL: Missing SUPABASE_ANON_KEY");

        let jwt_secret = match env {
            Env::Production => env::var("SUPABASE_JWT_SECRET")
                .expect("FATAL: SUPABASE_JWT_SECRET must be set in production."),
            Env::Local => env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| "super-secure-test-secret-value-local".to_string()),
        };

        let profile_backend = match env::var("PROFILE_BACKEND").as_deref() {
            Ok("postgres") => ProfileBackend::Postgres {
                db_url: env::var("DATABASE_URL")
                    .expect("FATAL: DATABASE_URL required when PROFILE_BACKEND=postgres"),
            },
            _ => ProfileBackend::Rest,
        };

        let default_bind = match env {
            Env::Local => "127.0.0.1:3000",
            Env::Production => "0.0.0.0:3000",
        };

        let http_timeout = env::var("HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|secs| secs.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);

        Self {
            supabase_url,
            supabase_anon_key,
            jwt_secret,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| default_bind.to_string()),
            profile_backend,
            session_token: env::var("PORTAL_SESSION_TOKEN").ok().filter(|t| !t.is_empty()),
            http_timeout,
            env,
        }
    }
}
