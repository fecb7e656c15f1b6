//! Atelier Backend - collaborative content platform service
//!
//! This is the main entry point for the Atelier backend API.
//! All operations are exposed via GraphQL at /api/v2/graphql.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atelier::config::Config;
use atelier::graphql::{caller_from_headers, GraphQLApi, GraphRequest};
use atelier::guards::{DepthGuard, MemoryCounterStore, RateLimit, RateLimiter};
use atelier::services::BroadcastSink;
use atelier::store::MemoryStore;
use atelier::{Engine, TypeRegistry};

/// Application state shared across all handlers
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    api: Arc<GraphQLApi>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting Atelier Backend");

    // The type registry is built once and passed by reference everywhere.
    let registry = Arc::new(TypeRegistry::new());
    tracing::info!("Type registry built");

    // Dev mode runs against the in-memory store; a deployment substitutes
    // the platform's relational store client here.
    let store = Arc::new(MemoryStore::new(registry.clone()));
    let (events, _event_rx) = BroadcastSink::new(1024);

    let engine = Arc::new(Engine::new(
        registry,
        store,
        Arc::new(atelier::services::WordListDetector::disabled()),
        Arc::new(atelier::services::SchemaRulesValidator),
        Arc::new(events),
        config.limits.clone(),
    ));
    tracing::info!("Engine initialized");

    let window = Duration::from_secs(config.rate_window_secs);
    let api = Arc::new(GraphQLApi::new(
        engine,
        DepthGuard::new(config.depth_ceiling),
        RateLimiter::new(Arc::new(MemoryCounterStore::new())),
        RateLimit::default()
            .with_ceiling(config.rate_ceiling)
            .with_window(window),
        RateLimit::default()
            .with_ceiling(config.rate_ceiling_by_address)
            .with_window(window)
            .by_address(),
    ));
    tracing::info!("GraphQL routing table built");

    let state = AppState {
        config: config.clone(),
        api,
    };

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v2/graphql", post(graphql_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GraphQL query/mutation handler with auth context
async fn graphql_handler(
    State(state): State<AppState>,
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<GraphRequest>,
) -> Json<serde_json::Value> {
    // Proxied deployments put the original address in X-Forwarded-For.
    let address = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| peer.ip().to_string());

    let caller = caller_from_headers(&headers, &state.config.jwt_secret, Some(address));
    Json(state.api.execute(&caller, request).await)
}
