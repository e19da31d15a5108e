use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ysp_portal::{
    AppState, ProfileResolver, SessionStore,
    config::{AppConfig, Env, ProfileBackend},
    create_router,
    identity::IdentityState,
    repository::{PostgresProfileRepository, ProfileRepositoryState, RestProfileRepository},
    supabase::SupabaseIdentity,
};

/// main
///
/// Builds configuration, logging, the identity and profile backends, the Session Store and
/// the HTTP server, in that order, and tears the store down after the server stops.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing Supabase settings)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ysp_portal=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Portal starting in {:?} mode", config.env);

    // 3. Identity provider
    let supabase = SupabaseIdentity::new(&config.supabase_url, &config.supabase_anon_key)
        .with_jwt_secret(&config.jwt_secret)
        .with_timeout(config.http_timeout);

    if let Some(token) = &config.session_token {
        // A bad seed token only means we start signed out.
        match supabase.seed_access_token(token).await {
            Ok(session) => tracing::info!(actor_id = %session.user.id, "seeded session from PORTAL_SESSION_TOKEN"),
            Err(e) => tracing::warn!(error = %e, "ignoring PORTAL_SESSION_TOKEN"),
        }
    }
    let identity = Arc::new(supabase) as IdentityState;

    // 4. Profile store
    let profiles = match &config.profile_backend {
        ProfileBackend::Rest => Arc::new(
            RestProfileRepository::new(
                &config.supabase_url,
                &config.supabase_anon_key,
                identity.clone(),
            )
            .with_timeout(config.http_timeout),
        ) as ProfileRepositoryState,
        ProfileBackend::Postgres { db_url } => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await
                .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");
            Arc::new(PostgresProfileRepository::new(pool)) as ProfileRepositoryState
        }
    };

    // 5. Session Store (restore + change subscription start here)
    let resolver = ProfileResolver::new(identity, profiles);
    let session = SessionStore::start(resolver.clone());

    // 6. Router and server
    let bind_addr = config.bind_addr;
    let app = create_router(AppState {
        session: session.clone(),
        resolver,
    });

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind BIND_ADDR");

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await;

    // 7. Teardown
    session.shutdown().await;

    if let Err(e) = served {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
