//! Plugin marketplace routes
//!
//! Search proxies straight to the catalogs; install downloads the
//! plugin jar, pushes it through the panel's signed upload URL and
//! records the installation locally.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use panelhub_core::marketplace::{self, Catalog};

use crate::error::ApiError;
use crate::handlers::panel_client;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
    #[serde(default = "default_source")]
    source: String,
    #[serde(default = "default_version")]
    version: String,
}

fn default_source() -> String {
    "hangar".to_string()
}

fn default_version() -> String {
    "1.21.4".to_string()
}

pub async fn search_plugins_handler(
    State(state): State<SharedState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, ApiError> {
    let catalog = Catalog::parse(&query.source)?;

    // Catalog outages degrade to an empty result list
    let results = match marketplace::search(&state.http, catalog, &query.q, &query.version).await {
        Ok(results) => results,
        Err(e) => {
            tracing::warn!("plugin search against {} failed: {e}", catalog.as_str());
            Vec::new()
        }
    };

    Ok(Json(json!({ "results": results })))
}

#[derive(Deserialize)]
pub struct InstallRequest {
    source: String,
    slug: String,
    #[serde(default)]
    version: String,
}

pub async fn install_plugin_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<InstallRequest>,
) -> Result<Json<Value>, ApiError> {
    let catalog = Catalog::parse(&req.source)?;

    let download_url =
        marketplace::download_url(&state.http, catalog, &req.slug, &req.version).await?;

    let jar = state
        .http
        .get(&download_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, format!("plugin download: {e}")))?
        .bytes()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, format!("plugin download: {e}")))?;

    // The panel hands out a one-shot signed URL for file uploads
    let client = panel_client(&state)?;
    let data = client
        .perform(
            reqwest::Method::GET,
            &format!("/api/client/servers/{id}/files/upload"),
            None,
        )
        .await?;

    #[derive(Deserialize)]
    struct UploadResponse {
        attributes: UploadAttributes,
    }
    #[derive(Deserialize)]
    struct UploadAttributes {
        url: String,
    }

    let upload: UploadResponse = serde_json::from_slice(&data)
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, format!("upload URL: {e}")))?;

    let part = reqwest::multipart::Part::bytes(jar.to_vec())
        .file_name(format!("{}.jar", req.slug))
        .mime_str("application/java-archive")
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let form = reqwest::multipart::Form::new().part("files", part);

    state
        .http
        .post(format!("{}&directory=/plugins", upload.attributes.url))
        .multipart(form)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, format!("plugin upload: {e}")))?;

    state
        .db
        .record_plugin_install(&id, &req.slug, &req.version, catalog.as_str())?;

    Ok(Json(json!({ "message": "Plugin installed" })))
}

pub async fn list_installed_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let plugins = state.db.installed_plugins(&id)?;
    Ok(Json(json!({ "plugins": plugins })))
}

pub async fn remove_plugin_handler(
    State(state): State<SharedState>,
    Path((id, plugin)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    state.db.remove_plugin(&id, &plugin)?;
    Ok(Json(json!({ "message": "Plugin removed" })))
}
