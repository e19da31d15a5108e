use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Leaves: role identifiers, data model, error taxonomy.
pub mod error;
pub mod models;
pub mod roles;

// External boundaries: identity provider and profile store.
pub mod identity;
pub mod repository;
pub mod supabase;

// Core: resolver, Session Store, Authorization Gate, sign-in flow.
pub mod gate;
pub mod profile;
pub mod session;
pub mod sign_in;

// HTTP surface.
pub mod config;
pub mod guard;
pub mod handlers;
pub mod routes;
use routes::{admin, chapter_head, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use gate::{Decision, authorize};
pub use profile::ProfileResolver;
pub use roles::{Role, normalize_role};
pub use session::SessionStore;

/// ApiDoc
///
/// OpenAPI document for the portal shell, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_sign_in, handlers::post_sign_in, handlers::get_auth_state,
        handlers::post_sign_out, handlers::post_refresh_profile,
        handlers::get_admin_dashboard, handlers::get_chapter_head_dashboard
    ),
    components(
        schemas(
            models::Actor, models::Profile, models::AuthSnapshot, models::GatePanel,
            models::GatePanelKind,
            models::DashboardSummary, models::SignInPrompt, models::SignInRequest,
            models::SignInResponse, roles::Role,
        )
    ),
    tags(
        (name = "ysp-portal", description = "Volunteer portal session and role gate")
    )
)]
struct ApiDoc;

/// AppState
///
/// Everything a request may need, constructed once in `main` and injected into the router.
/// The Session Store inside is the only owner of `AuthState`; handlers get read access and
/// the store's action methods, nothing else.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionStore,
    pub resolver: ProfileResolver,
}

impl FromRef<AppState> for SessionStore {
    fn from_ref(app_state: &AppState) -> SessionStore {
        app_state.session.clone()
    }
}

impl FromRef<AppState> for ProfileResolver {
    fn from_ref(app_state: &AppState) -> ProfileResolver {
        app_state.resolver.clone()
    }
}

/// create_router
///
/// Assembles the routing structure. Each protected module gets exactly one guard, matching
/// the single role it requires.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), guard::require_admin)),
        )
        .merge(
            chapter_head::chapter_head_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                guard::require_chapter_head,
            )),
        )
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Request span carrying method, URI and the `x-request-id` set above.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
