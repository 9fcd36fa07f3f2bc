//! Local panel installation auto-detection
//!
//! A panel installed on the same host keeps a line-oriented `KEY=value`
//! environment file at a well-known path. When it is present, the base
//! URL is read out of it so the operator only has to supply an API key.
//! Credentials are never read from the file.
//!
//! Everything here is best-effort: detection failures are logged, not
//! propagated.

use std::path::Path;

use thiserror::Error;

use crate::db::Database;

/// Well-known environment file of a host-local panel installation
pub const PANEL_ENV_PATH: &str = "/var/www/pterodactyl/.env";

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("panel installation not found at {0}")]
    NotInstalled(String),

    #[error("cannot read panel environment file: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("APP_URL not present in panel environment file")]
    NoAppUrl,
}

/// Read the panel base URL from the well-known environment file.
pub fn detect_panel_url() -> Result<String, DetectError> {
    detect_panel_url_at(Path::new(PANEL_ENV_PATH))
}

pub fn detect_panel_url_at(path: &Path) -> Result<String, DetectError> {
    if !path.exists() {
        return Err(DetectError::NotInstalled(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    extract_app_url(&content).ok_or(DetectError::NoAppUrl)
}

/// Pull `APP_URL` out of `KEY=value` lines, skipping comments and
/// stripping surrounding quotes.
fn extract_app_url(content: &str) -> Option<String> {
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() == "APP_URL" {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Startup convenience: if no panel URL is configured yet, look for a
/// local installation and save its URL. Never overwrites existing
/// configuration and never errors the caller.
pub fn prefill_panel_url(db: &Database) {
    match db.get_setting("panel_url") {
        Ok(Some(url)) if !url.is_empty() => return,
        Err(e) => {
            tracing::warn!("could not check existing panel URL: {e}");
            return;
        }
        _ => {}
    }

    tracing::info!("no panel configured, checking for a local installation");
    match detect_panel_url() {
        Ok(url) => {
            if let Err(e) = db.set_setting("panel_url", &url) {
                tracing::warn!("failed to save detected panel URL: {e}");
                return;
            }
            tracing::info!("detected local panel at {url} - add an API key in settings");
        }
        Err(e) => tracing::info!("no local panel detected: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_app_url() {
        let env = "APP_ENV=production\nAPP_URL=https://panel.example.com\nDB_HOST=127.0.0.1\n";
        assert_eq!(
            extract_app_url(env).as_deref(),
            Some("https://panel.example.com")
        );
    }

    #[test]
    fn test_extract_strips_quotes() {
        assert_eq!(
            extract_app_url("APP_URL=\"https://panel.example.com\"").as_deref(),
            Some("https://panel.example.com")
        );
        assert_eq!(
            extract_app_url("APP_URL='https://panel.example.com'").as_deref(),
            Some("https://panel.example.com")
        );
    }

    #[test]
    fn test_extract_skips_comments_and_noise() {
        let env = "# APP_URL=https://commented.example\nnot a pair\n APP_URL = https://real.example \n";
        assert_eq!(extract_app_url(env).as_deref(), Some("https://real.example"));
    }

    #[test]
    fn test_extract_missing_or_empty() {
        assert_eq!(extract_app_url("DB_HOST=localhost\n"), None);
        assert_eq!(extract_app_url("APP_URL=\n"), None);
    }

    #[test]
    fn test_detect_missing_file() {
        let result = detect_panel_url_at(Path::new("/nonexistent/panel/.env"));
        assert!(matches!(result, Err(DetectError::NotInstalled(_))));
    }

    #[test]
    fn test_prefill_keeps_existing_url() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting("panel_url", "https://configured.example").unwrap();

        prefill_panel_url(&db);

        assert_eq!(
            db.get_setting("panel_url").unwrap().as_deref(),
            Some("https://configured.example")
        );
    }
}
