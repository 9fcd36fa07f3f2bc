//! panelhub-core: Shared library for the panelhub admin service
//!
//! This crate provides:
//! - Embedded settings/user/session database (rusqlite)
//! - Panel REST API client with credential-scope routing
//! - Local panel installation auto-detection
//! - Operator password hashing and session tokens
//! - Plugin marketplace search (Hangar, Modrinth, Spiget)

pub mod auth;
pub mod config;
pub mod db;
pub mod detect;
pub mod marketplace;
pub mod panel;

pub use config::Config;
pub use db::{Database, SettingsProvider};
pub use panel::{CredentialScope, PanelClient, PanelError};

/// Default HTTP port for panelhub-server
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default game port used when a node has no allocations yet
pub const DEFAULT_GAME_PORT: u16 = 25565;
