//! Shared server state

use std::sync::Arc;

use panelhub_core::Database;

/// Shared application state
///
/// The panel client is deliberately not held here: it is rebuilt from
/// the settings database on every request so configuration changes
/// apply without a restart. Only the outbound HTTP client (connection
/// pool) is shared.
pub struct AppState {
    /// Embedded database (settings, users, sessions, plugin records)
    pub db: Database,

    /// Shared outbound HTTP client
    pub http: reqwest::Client,
}

pub type SharedState = Arc<AppState>;
