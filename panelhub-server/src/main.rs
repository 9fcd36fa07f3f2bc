//! panelhub-server: admin HTTP service for a game-server panel
//!
//! This service sits between the operator and the panel's REST API:
//! - Authenticates a single admin account with database-backed sessions
//! - Stores panel URL and API keys in an embedded database
//! - Forwards server/file/allocation operations to the panel,
//!   choosing the right credential scope per endpoint
//! - Searches plugin marketplaces and installs plugins onto servers

mod auth;
mod error;
mod handlers;
mod plugins;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use panelhub_core::{detect, Config, Database};

use crate::state::{AppState, SharedState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panelhub_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        Config::default()
    });

    // Open the embedded database
    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(&db_path)?;
    tracing::info!("database at {}", db_path.display());

    // Best-effort: pick up a host-local panel installation
    detect::prefill_panel_url(&db);

    // Drop stale sessions from previous runs
    match db.delete_expired_sessions(Utc::now().timestamp()) {
        Ok(n) if n > 0 => tracing::info!("removed {n} expired sessions"),
        Ok(_) => {}
        Err(e) => tracing::warn!("session cleanup failed: {e}"),
    }

    // Shared outbound HTTP client (GitHub requires a user agent)
    let http = reqwest::Client::builder()
        .user_agent(concat!("panelhub/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let state: SharedState = Arc::new(AppState { db, http });

    let app = router(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from((
        config.server.listen_addr.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    tracing::info!("panelhub-server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: SharedState) -> Router<SharedState> {
    let protected = Router::new()
        // Settings
        .route("/api/settings", get(handlers::get_settings_handler))
        .route("/api/settings", post(handlers::save_settings_handler))
        .route("/api/settings/detect", post(handlers::detect_panel_handler))
        .route("/api/settings/test", post(handlers::test_connection_handler))
        // Panel proxy
        .route("/api/servers", get(handlers::list_servers_handler))
        .route("/api/servers", post(handlers::create_server_handler))
        .route("/api/servers/{id}", get(handlers::get_server_handler))
        .route("/api/servers/{id}", delete(handlers::delete_server_handler))
        .route("/api/servers/{id}/power", post(handlers::power_action_handler))
        .route("/api/servers/{id}/console", get(handlers::console_credentials_handler))
        // Files
        .route("/api/servers/{id}/files", get(handlers::list_files_handler))
        .route("/api/servers/{id}/files", delete(handlers::delete_files_handler))
        .route("/api/servers/{id}/files/upload", post(handlers::upload_url_handler))
        .route("/api/servers/{id}/files/download", get(handlers::download_file_handler))
        // Plugins
        .route("/api/plugins/search", get(plugins::search_plugins_handler))
        .route("/api/servers/{id}/plugins", get(plugins::list_installed_handler))
        .route("/api/servers/{id}/plugins/install", post(plugins::install_plugin_handler))
        .route("/api/servers/{id}/plugins/{plugin}", delete(plugins::remove_plugin_handler))
        // Nodes and eggs
        .route("/api/nodes", get(handlers::list_nodes_handler))
        .route("/api/eggs", get(handlers::list_eggs_handler))
        .route("/api/eggs/sync", post(handlers::sync_eggs_handler))
        .route("/api/eggs/import", post(handlers::import_egg_handler))
        // Per-server allocations
        .route("/api/servers/{id}/allocations", get(handlers::list_allocations_handler))
        .route("/api/servers/{id}/allocations", post(handlers::add_allocation_handler))
        .route("/api/servers/{id}/allocations/{alloc}", delete(handlers::remove_allocation_handler))
        // Updates
        .route("/api/updates/check", get(handlers::check_updates_handler))
        .route("/api/updates/install", post(handlers::install_update_handler))
        .route_layer(middleware::from_fn_with_state(state, auth::require_session));

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/auth/register", post(auth::register_handler))
        .route("/api/auth/login", post(auth::login_handler))
        .merge(protected)
}
