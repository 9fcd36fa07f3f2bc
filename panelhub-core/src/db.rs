//! Embedded database: settings, operator account, sessions, plugin
//! records
//!
//! A single SQLite file holds everything the service persists. The
//! settings table is a plain key/value store; values are opaque strings
//! and presence is the only validation done here.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("username already exists")]
    DuplicateUser,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    password TEXT NOT NULL,
    is_admin INTEGER DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS installed_plugins (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id TEXT NOT NULL,
    plugin_name TEXT NOT NULL,
    plugin_version TEXT NOT NULL,
    source TEXT NOT NULL,
    installed_at TEXT DEFAULT CURRENT_TIMESTAMP
);
";

/// Read access to named configuration values.
///
/// The panel client takes this instead of the whole [`Database`] so
/// tests can feed it fake settings.
pub trait SettingsProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// Stored operator credentials
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub password_hash: String,
}

/// A plugin installation record
#[derive(Debug, Clone, serde::Serialize)]
pub struct InstalledPlugin {
    pub name: String,
    pub version: String,
    pub source: String,
    pub installed_at: String,
}

/// Handle to the embedded database.
///
/// Cheap to clone; all clones share one connection behind a mutex.
/// Every operation is a short single statement, so the lock is never
/// held across an await point.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned mutex means a writer panicked mid-statement;
        // nothing sensible to recover here.
        self.conn.lock().expect("database mutex poisoned")
    }

    // Settings

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, DbError> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // Users

    pub fn has_admin(&self) -> Result<bool, DbError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE is_admin = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn create_admin(&self, username: &str, password_hash: &str) -> Result<(), DbError> {
        self.conn()
            .execute(
                "INSERT INTO users (username, password, is_admin) VALUES (?1, ?2, 1)",
                params![username, password_hash],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    DbError::DuplicateUser
                }
                other => DbError::Sqlite(other),
            })?;
        Ok(())
    }

    pub fn user_credentials(&self, username: &str) -> Result<Option<UserRecord>, DbError> {
        let record = self
            .conn()
            .query_row(
                "SELECT id, password FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        password_hash: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    // Sessions

    pub fn insert_session(&self, token: &str, user_id: i64, expires_at: i64) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![token, user_id, expires_at],
        )?;
        Ok(())
    }

    /// Resolve a session token to its user, honoring the stored expiry.
    pub fn session_user(&self, token: &str, now: i64) -> Result<Option<i64>, DbError> {
        let row: Option<(i64, i64)> = self
            .conn()
            .query_row(
                "SELECT user_id, expires_at FROM sessions WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.and_then(|(user_id, expires_at)| (now < expires_at).then_some(user_id)))
    }

    pub fn delete_expired_sessions(&self, now: i64) -> Result<usize, DbError> {
        let removed = self
            .conn()
            .execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?;
        Ok(removed)
    }

    // Plugin records

    pub fn record_plugin_install(
        &self,
        server_id: &str,
        name: &str,
        version: &str,
        source: &str,
    ) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO installed_plugins (server_id, plugin_name, plugin_version, source)
             VALUES (?1, ?2, ?3, ?4)",
            params![server_id, name, version, source],
        )?;
        Ok(())
    }

    pub fn installed_plugins(&self, server_id: &str) -> Result<Vec<InstalledPlugin>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT plugin_name, plugin_version, source, installed_at
             FROM installed_plugins WHERE server_id = ?1 ORDER BY installed_at",
        )?;
        let plugins = stmt
            .query_map(params![server_id], |row| {
                Ok(InstalledPlugin {
                    name: row.get(0)?,
                    version: row.get(1)?,
                    source: row.get(2)?,
                    installed_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plugins)
    }

    pub fn remove_plugin(&self, server_id: &str, name: &str) -> Result<(), DbError> {
        self.conn().execute(
            "DELETE FROM installed_plugins WHERE server_id = ?1 AND plugin_name = ?2",
            params![server_id, name],
        )?;
        Ok(())
    }
}

impl SettingsProvider for Database {
    fn get(&self, key: &str) -> Option<String> {
        // A read failure here is indistinguishable from "not set" for
        // the panel client; it surfaces as a configuration error there.
        self.get_setting(key).ok().flatten()
    }
}
