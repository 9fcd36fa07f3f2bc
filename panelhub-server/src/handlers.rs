//! HTTP route handlers
//!
//! Almost every handler is a thin adapter: decode the request, build a
//! panel client from current settings, forward, re-encode. The only
//! real logic lives in server creation (allocation resolution plus egg
//! defaults) in [`create_server_handler`].

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use panelhub_core::{detect, panel, PanelClient};

use crate::error::ApiError;
use crate::state::{AppState, SharedState};

/// Default docker image when the egg lookup fails
const DEFAULT_DOCKER_IMAGE: &str = "ghcr.io/pterodactyl/yolks:java_21";
/// Default startup command when the egg lookup fails
const DEFAULT_STARTUP: &str = "java -Xms128M -Xmx{{SERVER_MEMORY}}M -jar server.jar";

const RELEASES_URL: &str = "https://api.github.com/repos/panelhub/panelhub/releases/latest";

pub fn panel_client(state: &AppState) -> Result<PanelClient, ApiError> {
    Ok(PanelClient::from_settings(&state.http, &state.db)?)
}

/// Forward a bodyless request and relay the panel's JSON response.
async fn relay(client: &PanelClient, method: Method, path: &str) -> Result<Json<Value>, ApiError> {
    relay_with_body(client, method, path, None).await
}

async fn relay_with_body(
    client: &PanelClient,
    method: Method,
    path: &str,
    body: Option<&Value>,
) -> Result<Json<Value>, ApiError> {
    let data = client.perform(method, path, body).await?;
    // Some panel endpoints (deletes, power signals) reply with an empty
    // body on success.
    let value = serde_json::from_slice(&data).unwrap_or(Value::Null);
    Ok(Json(value))
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "panelhub-server"
    }))
}

// Settings

pub async fn get_settings_handler(
    State(state): State<SharedState>,
) -> Result<Json<Value>, ApiError> {
    let panel_url = state.db.get_setting("panel_url")?.unwrap_or_default();
    let debug = state.db.get_setting("debug")?.as_deref() == Some("true");
    let has_application_key = state
        .db
        .get_setting("application_key")?
        .filter(|k| !k.is_empty())
        .or(state.db.get_setting("api_key")?)
        .is_some_and(|k| !k.is_empty());
    let has_client_key = state
        .db
        .get_setting("client_key")?
        .is_some_and(|k| !k.is_empty());

    Ok(Json(json!({
        "panel_url": panel_url,
        "has_application_key": has_application_key,
        "has_client_key": has_client_key,
        "debug": debug,
        "registration": !state.db.has_admin()?,
    })))
}

#[derive(Deserialize)]
pub struct SaveSettingsRequest {
    #[serde(default)]
    panel_url: Option<String>,
    #[serde(default)]
    application_key: Option<String>,
    #[serde(default)]
    client_key: Option<String>,
    #[serde(default)]
    debug: Option<bool>,
}

pub async fn save_settings_handler(
    State(state): State<SharedState>,
    Json(req): Json<SaveSettingsRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(url) = req.panel_url.filter(|u| !u.is_empty()) {
        state.db.set_setting("panel_url", &url)?;
    }
    if let Some(key) = req.application_key.filter(|k| !k.is_empty()) {
        state.db.set_setting("application_key", &key)?;
    }
    if let Some(key) = req.client_key.filter(|k| !k.is_empty()) {
        state.db.set_setting("client_key", &key)?;
    }
    if let Some(debug) = req.debug {
        state
            .db
            .set_setting("debug", if debug { "true" } else { "false" })?;
    }

    Ok(Json(json!({ "message": "Settings saved" })))
}

/// Look for a panel installation on this host and save its URL.
pub async fn detect_panel_handler(
    State(state): State<SharedState>,
) -> Result<Json<Value>, ApiError> {
    let url = detect::detect_panel_url()
        .map_err(|e| ApiError::new(StatusCode::NOT_FOUND, e.to_string()))?;

    state.db.set_setting("panel_url", &url)?;

    Ok(Json(json!({
        "detected": true,
        "url": url,
        "message": "Panel detected, URL saved. Add an API key in settings.",
    })))
}

#[derive(Deserialize, Default)]
pub struct TestConnectionRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    key: Option<String>,
}

/// Probe the panel's application API with provided or saved
/// credentials.
pub async fn test_connection_handler(
    State(state): State<SharedState>,
    Json(req): Json<TestConnectionRequest>,
) -> Result<Json<Value>, ApiError> {
    let url = match req.url.filter(|u| !u.is_empty()) {
        Some(url) => url,
        None => state.db.get_setting("panel_url")?.unwrap_or_default(),
    };
    let key = match req.key.filter(|k| !k.is_empty()) {
        Some(key) => key,
        None => state
            .db
            .get_setting("application_key")?
            .filter(|k| !k.is_empty())
            .or(state.db.get_setting("api_key")?)
            .unwrap_or_default(),
    };

    if url.is_empty() || key.is_empty() {
        return Err(ApiError::bad_request("URL and API key are required"));
    }

    match panel::test_connection(&state.http, &url, &key).await {
        Ok(response) => Ok(Json(json!({
            "success": true,
            "message": "Connection successful!",
            "response": response,
        }))),
        // Test failures are a result, not an error response
        Err(e) => Ok(Json(json!({
            "success": false,
            "error": e.to_string(),
        }))),
    }
}

// Servers

pub async fn list_servers_handler(
    State(state): State<SharedState>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    relay(
        &client,
        Method::GET,
        "/api/application/servers?include=allocations,egg",
    )
    .await
}

pub async fn get_server_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    relay(
        &client,
        Method::GET,
        &format!("/api/application/servers/{id}?include=allocations,egg"),
    )
    .await
}

#[derive(Deserialize)]
pub struct CreateServerRequest {
    name: String,
    egg_id: i64,
    node_id: i64,
    memory: i64,
    disk: i64,
    cpu: i64,
    #[serde(default)]
    databases: i64,
    #[serde(default)]
    allocations: i64,
}

pub async fn create_server_handler(
    State(state): State<SharedState>,
    Json(req): Json<CreateServerRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let client = panel_client(&state)?;

    let allocation_id = client.find_or_create_allocation(req.node_id).await?;

    // Egg lookup fills in the docker image and startup command; fall
    // back to sane defaults when it fails so creation still goes
    // through.
    let (docker_image, startup) = match client
        .perform(
            Method::GET,
            &format!("/api/application/nests/1/eggs/{}?include=variables", req.egg_id),
            None,
        )
        .await
    {
        Ok(data) => egg_defaults(&data),
        Err(e) => {
            tracing::debug!("failed to fetch egg: {e}, using defaults");
            (DEFAULT_DOCKER_IMAGE.to_string(), DEFAULT_STARTUP.to_string())
        }
    };

    let server = json!({
        "name": req.name,
        "user": 1,
        "egg": req.egg_id,
        "docker_image": docker_image,
        "startup": startup,
        "environment": {
            "SERVER_JARFILE": "server.jar",
            "BUILD_NUMBER": "latest",
        },
        "limits": {
            "memory": req.memory,
            "swap": 0,
            "disk": req.disk,
            "io": 500,
            "cpu": req.cpu,
        },
        "feature_limits": {
            "databases": req.databases,
            "allocations": req.allocations,
            "backups": 3,
        },
        "allocation": {
            "default": allocation_id,
        },
    });

    let result = relay_with_body(&client, Method::POST, "/api/application/servers", Some(&server))
        .await?;
    Ok((StatusCode::CREATED, result))
}

/// Pull docker image and startup command out of an egg response,
/// defaulting any missing field.
fn egg_defaults(data: &[u8]) -> (String, String) {
    #[derive(Deserialize)]
    struct EggResponse {
        attributes: EggAttributes,
    }
    #[derive(Deserialize)]
    struct EggAttributes {
        #[serde(default)]
        docker_image: String,
        #[serde(default)]
        startup: String,
    }

    let attrs = serde_json::from_slice::<EggResponse>(data)
        .map(|e| e.attributes)
        .unwrap_or(EggAttributes {
            docker_image: String::new(),
            startup: String::new(),
        });

    let docker_image = if attrs.docker_image.is_empty() {
        DEFAULT_DOCKER_IMAGE.to_string()
    } else {
        attrs.docker_image
    };
    let startup = if attrs.startup.is_empty() {
        DEFAULT_STARTUP.to_string()
    } else {
        attrs.startup
    };
    (docker_image, startup)
}

pub async fn delete_server_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    client
        .perform(Method::DELETE, &format!("/api/application/servers/{id}"), None)
        .await?;
    Ok(Json(json!({ "message": "Server deleted" })))
}

#[derive(Deserialize)]
pub struct PowerRequest {
    signal: String,
}

pub async fn power_action_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<PowerRequest>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    client
        .perform(
            Method::POST,
            &format!("/api/client/servers/{id}/power"),
            Some(&json!({ "signal": req.signal })),
        )
        .await?;
    Ok(Json(json!({ "message": "Power action sent" })))
}

/// Fetch console websocket credentials for a server.
pub async fn console_credentials_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    let data = client
        .perform(
            Method::GET,
            &format!("/api/client/servers/{id}/websocket"),
            None,
        )
        .await?;

    #[derive(Deserialize)]
    struct WsCredentials {
        data: WsData,
    }
    #[derive(Deserialize)]
    struct WsData {
        token: String,
        socket: String,
    }

    let creds: WsCredentials = serde_json::from_slice(&data)
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, format!("websocket credentials: {e}")))?;

    Ok(Json(json!({
        "socket": creds.data.socket,
        "token": creds.data.token,
    })))
}

// Files

#[derive(Deserialize)]
pub struct ListFilesQuery {
    #[serde(default = "default_directory")]
    directory: String,
}

fn default_directory() -> String {
    "/".to_string()
}

pub async fn list_files_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    relay(
        &client,
        Method::GET,
        &format!(
            "/api/client/servers/{id}/files/list?directory={}",
            query.directory
        ),
    )
    .await
}

/// Fetch a signed upload URL for a server's file manager.
pub async fn upload_url_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    relay(
        &client,
        Method::GET,
        &format!("/api/client/servers/{id}/files/upload"),
    )
    .await
}

#[derive(Deserialize, serde::Serialize)]
pub struct DeleteFilesRequest {
    root: String,
    files: Vec<String>,
}

pub async fn delete_files_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<DeleteFilesRequest>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    let body = serde_json::to_value(&req)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    client
        .perform(
            Method::POST,
            &format!("/api/client/servers/{id}/files/delete"),
            Some(&body),
        )
        .await?;
    Ok(Json(json!({ "message": "Files deleted" })))
}

#[derive(Deserialize)]
pub struct DownloadFileQuery {
    file: String,
}

pub async fn download_file_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<DownloadFileQuery>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    relay(
        &client,
        Method::GET,
        &format!(
            "/api/client/servers/{id}/files/download?file={}",
            query.file
        ),
    )
    .await
}

// Nodes and eggs

pub async fn list_nodes_handler(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    relay(&client, Method::GET, "/api/application/nodes").await
}

pub async fn list_eggs_handler(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    relay(&client, Method::GET, "/api/application/nests?include=eggs").await
}

pub async fn sync_eggs_handler(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    let eggs = relay(&client, Method::GET, "/api/application/nests?include=eggs").await?;
    Ok(Json(json!({
        "message": "Eggs synced successfully",
        "data": eggs.0,
    })))
}

// Custom egg import is not wired to the panel yet; the route exists so
// the frontend flow completes.
pub async fn import_egg_handler() -> Json<Value> {
    Json(json!({ "message": "Egg imported" }))
}

// Per-server allocations

pub async fn list_allocations_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    relay(
        &client,
        Method::GET,
        &format!("/api/client/servers/{id}/network/allocations"),
    )
    .await
}

pub async fn add_allocation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    client
        .perform(
            Method::POST,
            &format!("/api/client/servers/{id}/network/allocations"),
            None,
        )
        .await?;
    Ok(Json(json!({ "message": "Allocation added" })))
}

pub async fn remove_allocation_handler(
    State(state): State<SharedState>,
    Path((id, alloc)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let client = panel_client(&state)?;
    client
        .perform(
            Method::DELETE,
            &format!("/api/client/servers/{id}/network/allocations/{alloc}"),
            None,
        )
        .await?;
    Ok(Json(json!({ "message": "Allocation removed" })))
}

// Updates

pub async fn check_updates_handler(
    State(state): State<SharedState>,
) -> Result<Json<Value>, ApiError> {
    let current = env!("CARGO_PKG_VERSION");

    #[derive(Deserialize)]
    struct Release {
        #[serde(default)]
        tag_name: String,
    }

    // Offline or rate-limited is reported as "no update", not an error
    let latest = match state.http.get(RELEASES_URL).send().await {
        Ok(resp) => resp
            .json::<Release>()
            .await
            .map(|r| r.tag_name)
            .unwrap_or_default(),
        Err(e) => {
            tracing::debug!("update check failed: {e}");
            String::new()
        }
    };

    let update_available = !latest.is_empty() && latest.trim_start_matches('v') != current;
    Ok(Json(json!({
        "current": current,
        "latest": if latest.is_empty() { current.to_string() } else { latest },
        "update_available": update_available,
    })))
}

const UPDATE_SCRIPT: &str =
    "cd /opt/panelhub && git pull && cargo build --release && systemctl restart panelhub";

pub async fn install_update_handler() -> Result<Json<Value>, ApiError> {
    let output = tokio::process::Command::new("bash")
        .arg("-c")
        .arg(UPDATE_SCRIPT)
        .output()
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("update failed: {combined}"),
        ));
    }

    Ok(Json(json!({
        "message": "Update installed",
        "output": combined,
    })))
}
