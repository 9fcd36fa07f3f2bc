//! Panel REST API client
//!
//! The panel exposes two credential scopes behind one base URL:
//! - Application keys authorize administrative endpoints
//!   (create/delete servers, manage nodes)
//! - Client keys authorize per-server endpoints under `/api/client`
//!   (power, console, files)
//!
//! The client picks the right key from the requested path, forwards the
//! request and normalizes panel error envelopes into [`PanelError`].
//! Responses are returned as raw bytes: response shapes vary per
//! endpoint, so each caller parses what it needs.

use std::fmt;

use reqwest::{Client, Method};
use serde::Deserialize;
use thiserror::Error;

use crate::db::SettingsProvider;
use crate::DEFAULT_GAME_PORT;

/// Path segment marking client-scoped panel routes
const CLIENT_API_MARKER: &str = "/api/client";

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("panel not configured: {0}")]
    Configuration(String),

    #[error("{0} API key is not configured")]
    CredentialMissing(CredentialScope),

    #[error("panel request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("panel error: {0}")]
    Remote(String),

    #[error("could not find or create a free allocation")]
    AllocationResolution,

    #[error("unexpected panel response: {0}")]
    InvalidResponse(String),
}

/// Which of the two bearer secrets a path requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    Application,
    Client,
}

impl fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialScope::Application => write!(f, "application"),
            CredentialScope::Client => write!(f, "client"),
        }
    }
}

/// Classify a panel endpoint path into its credential scope.
///
/// Plain substring match, not a URL grammar: everything containing the
/// client-API marker is client-scoped, everything else is
/// application-scoped.
pub fn scope_of(path: &str) -> CredentialScope {
    if path.contains(CLIENT_API_MARKER) {
        CredentialScope::Client
    } else {
        CredentialScope::Application
    }
}

/// Panel error envelope: `{"errors": [{code, status, detail}, ...]}`.
/// Only the detail is surfaced; code and status are ignored.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    detail: String,
}

/// A network allocation on a panel node
#[derive(Debug, Clone, Deserialize)]
pub struct Allocation {
    pub id: i64,
    pub port: u16,
    pub assigned: bool,
}

#[derive(Debug, Deserialize)]
struct AllocationList {
    data: Vec<AllocationItem>,
}

#[derive(Debug, Deserialize)]
struct AllocationItem {
    attributes: Allocation,
}

/// Panel API client
///
/// Constructed fresh per inbound request from the settings store, so
/// configuration changes take effect without a restart. The underlying
/// `reqwest::Client` is shared and cheap to clone.
pub struct PanelClient {
    http: Client,
    base_url: String,
    application_key: String,
    client_key: String,
    debug: bool,
}

impl PanelClient {
    /// Build a client from the settings store.
    ///
    /// Requires `panel_url` and at least one of `application_key` /
    /// `client_key`. A missing client key falls back to the application
    /// key; the panel accepts either for client routes when the key
    /// belongs to an admin. That reuse blurs the two trust scopes and
    /// is kept only for compatibility with older single-key setups.
    pub fn from_settings(
        http: &Client,
        settings: &dyn SettingsProvider,
    ) -> Result<Self, PanelError> {
        let url = settings.get("panel_url").unwrap_or_default();
        if url.is_empty() {
            return Err(PanelError::Configuration("panel URL is not set".into()));
        }

        // `api_key` is the legacy single-key setting name
        let application_key = settings
            .get("application_key")
            .filter(|k| !k.is_empty())
            .or_else(|| settings.get("api_key"))
            .unwrap_or_default();
        let mut client_key = settings.get("client_key").unwrap_or_default();

        if application_key.is_empty() && client_key.is_empty() {
            return Err(PanelError::Configuration("no API key is set".into()));
        }
        if client_key.is_empty() {
            client_key = application_key.clone();
        }

        let debug = settings.get("debug").as_deref() == Some("true");

        Ok(Self {
            http: http.clone(),
            base_url: url.trim_end_matches('/').to_string(),
            application_key,
            client_key,
            debug,
        })
    }

    /// Build a client from explicit values, application-scoped only.
    /// Used by the connection test before settings are saved.
    pub fn with_key(http: &Client, url: &str, key: &str) -> Self {
        Self {
            http: http.clone(),
            base_url: url.trim_end_matches('/').to_string(),
            application_key: key.to_string(),
            client_key: key.to_string(),
            debug: true,
        }
    }

    /// Select the bearer secret for a path, or report which scope is
    /// missing.
    fn credential_for(&self, path: &str) -> Result<&str, PanelError> {
        let scope = scope_of(path);
        let key = match scope {
            CredentialScope::Application => &self.application_key,
            CredentialScope::Client => &self.client_key,
        };
        if key.is_empty() {
            return Err(PanelError::CredentialMissing(scope));
        }
        Ok(key)
    }

    /// Forward one request to the panel and return the raw response
    /// body.
    ///
    /// Status >= 400 is normalized: the panel's error envelope is tried
    /// first, and its first entry's detail surfaced; otherwise the raw
    /// status and body are. Never retried — panel operations mutate
    /// remote state.
    pub async fn perform(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, PanelError> {
        let key = self.credential_for(path)?;
        let url = format!("{}{}", self.base_url, path);

        if self.debug {
            tracing::debug!(%method, %url, "panel request");
            if let Some(body) = body {
                tracing::debug!(body = %body, "panel request body");
            }
        }

        let mut req = self
            .http
            .request(method, &url)
            .bearer_auth(key)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?.to_vec();

        if self.debug {
            tracing::debug!(
                status = status.as_u16(),
                body = %String::from_utf8_lossy(&bytes),
                "panel response"
            );
        }

        if status.as_u16() >= 400 {
            return Err(decode_remote_error(status.as_u16(), &bytes));
        }

        Ok(bytes)
    }

    /// Fetch the allocations of a node.
    pub async fn node_allocations(&self, node_id: i64) -> Result<Vec<Allocation>, PanelError> {
        let data = self
            .perform(
                Method::GET,
                &format!("/api/application/nodes/{node_id}/allocations"),
                None,
            )
            .await?;
        let list: AllocationList = serde_json::from_slice(&data)
            .map_err(|e| PanelError::InvalidResponse(format!("allocation list: {e}")))?;
        Ok(list.data.into_iter().map(|a| a.attributes).collect())
    }

    /// Find a free allocation on a node, creating one if necessary.
    ///
    /// Single best-effort pass: scan for the first unassigned entry;
    /// otherwise create one at the next free port on 0.0.0.0, re-fetch
    /// and confirm it. Concurrent callers can race on the same port;
    /// there is no lock here, and the panel rejects the duplicate.
    pub async fn find_or_create_allocation(&self, node_id: i64) -> Result<i64, PanelError> {
        let allocations = self.node_allocations(node_id).await?;

        if let Some(id) = first_unassigned(&allocations) {
            tracing::debug!(node_id, allocation = id, "found free allocation");
            return Ok(id);
        }

        let port = next_free_port(&allocations);
        tracing::debug!(node_id, port, "no free allocations, creating one");

        self.perform(
            Method::POST,
            &format!("/api/application/nodes/{node_id}/allocations"),
            Some(&serde_json::json!({
                "ip": "0.0.0.0",
                "ports": [port.to_string()],
            })),
        )
        .await?;

        let allocations = self.node_allocations(node_id).await?;
        allocations
            .iter()
            .find(|a| a.port == port && !a.assigned)
            .map(|a| a.id)
            .ok_or(PanelError::AllocationResolution)
    }
}

/// Normalize a >= 400 panel response into a [`PanelError::Remote`].
fn decode_remote_error(status: u16, body: &[u8]) -> PanelError {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
        if let Some(first) = envelope.errors.first() {
            return PanelError::Remote(first.detail.clone());
        }
    }
    PanelError::Remote(format!(
        "API error (status {status}): {}",
        String::from_utf8_lossy(body)
    ))
}

/// First unassigned allocation in list order, if any.
fn first_unassigned(allocations: &[Allocation]) -> Option<i64> {
    allocations.iter().find(|a| !a.assigned).map(|a| a.id)
}

/// Next port to allocate: one past the highest port seen, starting from
/// the conventional default game port. Saturates at the top of the port
/// range; an unusable saturated port falls out of the confirm scan as
/// [`PanelError::AllocationResolution`].
fn next_free_port(allocations: &[Allocation]) -> u16 {
    let mut port = DEFAULT_GAME_PORT;
    for a in allocations {
        if a.port >= port {
            port = a.port.saturating_add(1);
        }
    }
    port
}

/// Check that the panel answers on its application API.
pub async fn test_connection(http: &Client, url: &str, key: &str) -> Result<String, PanelError> {
    let client = PanelClient::with_key(http, url, key);
    let data = client
        .perform(Method::GET, "/api/application/users", None)
        .await?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeSettings(HashMap<&'static str, &'static str>);

    impl SettingsProvider for FakeSettings {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|v| v.to_string())
        }
    }

    fn settings(entries: &[(&'static str, &'static str)]) -> FakeSettings {
        FakeSettings(entries.iter().copied().collect())
    }

    fn alloc(id: i64, port: u16, assigned: bool) -> Allocation {
        Allocation { id, port, assigned }
    }

    #[test]
    fn test_scope_classification() {
        assert_eq!(scope_of("/api/application/servers"), CredentialScope::Application);
        assert_eq!(scope_of("/api/application/nodes/1/allocations"), CredentialScope::Application);
        assert_eq!(scope_of("/api/client/servers/abc/power"), CredentialScope::Client);
        assert_eq!(scope_of("/api/client/servers/abc/files/list"), CredentialScope::Client);
        assert_eq!(scope_of("/"), CredentialScope::Application);
    }

    #[test]
    fn test_construction_requires_url() {
        let http = Client::new();
        let result = PanelClient::from_settings(&http, &settings(&[("application_key", "k")]));
        assert!(matches!(result, Err(PanelError::Configuration(_))));
    }

    #[test]
    fn test_construction_requires_some_key() {
        let http = Client::new();
        let result = PanelClient::from_settings(
            &http,
            &settings(&[("panel_url", "https://panel.example")]),
        );
        assert!(matches!(result, Err(PanelError::Configuration(_))));
    }

    #[test]
    fn test_client_key_falls_back_to_application_key() {
        let http = Client::new();
        let client = PanelClient::from_settings(
            &http,
            &settings(&[
                ("panel_url", "https://panel.example/"),
                ("application_key", "app-secret"),
            ]),
        )
        .unwrap();

        assert_eq!(client.base_url, "https://panel.example");
        assert_eq!(client.credential_for("/api/application/nodes").unwrap(), "app-secret");
        assert_eq!(client.credential_for("/api/client/servers/x/power").unwrap(), "app-secret");
    }

    #[test]
    fn test_legacy_single_key_name() {
        let http = Client::new();
        let client = PanelClient::from_settings(
            &http,
            &settings(&[
                ("panel_url", "https://panel.example"),
                ("api_key", "legacy-secret"),
            ]),
        )
        .unwrap();

        assert_eq!(client.credential_for("/api/application/users").unwrap(), "legacy-secret");
    }

    #[test]
    fn test_client_key_only() {
        let http = Client::new();
        let client = PanelClient::from_settings(
            &http,
            &settings(&[
                ("panel_url", "https://panel.example"),
                ("application_key", ""),
                ("client_key", "abc"),
            ]),
        )
        .unwrap();

        // Client-scoped calls route with the client key
        assert_eq!(client.credential_for("/api/client/servers/x/power").unwrap(), "abc");

        // Application-scoped calls must fail, not borrow the client key
        let err = client.credential_for("/api/application/servers").unwrap_err();
        assert!(matches!(
            err,
            PanelError::CredentialMissing(CredentialScope::Application)
        ));
    }

    #[test]
    fn test_distinct_keys_route_by_scope() {
        let http = Client::new();
        let client = PanelClient::from_settings(
            &http,
            &settings(&[
                ("panel_url", "https://panel.example"),
                ("application_key", "app-secret"),
                ("client_key", "client-secret"),
            ]),
        )
        .unwrap();

        assert_eq!(client.credential_for("/api/application/servers").unwrap(), "app-secret");
        assert_eq!(client.credential_for("/api/client/servers/x/files/list").unwrap(), "client-secret");
    }

    #[test]
    fn test_remote_error_uses_first_envelope_detail() {
        let body = br#"{"errors":[
            {"code":"NotFound","status":"404","detail":"The requested server was not found."},
            {"code":"Other","status":"404","detail":"second entry"}
        ]}"#;
        let err = decode_remote_error(404, body);
        match err {
            PanelError::Remote(detail) => {
                assert_eq!(detail, "The requested server was not found.")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_remote_error_falls_back_to_raw_body() {
        let err = decode_remote_error(502, b"<html>bad gateway</html>");
        match err {
            PanelError::Remote(msg) => {
                assert!(msg.contains("502"));
                assert!(msg.contains("<html>bad gateway</html>"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_remote_error_empty_envelope_falls_back() {
        let err = decode_remote_error(400, br#"{"errors":[]}"#);
        match err {
            PanelError::Remote(msg) => assert!(msg.contains("400")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_first_unassigned_prefers_list_order() {
        let allocations = [alloc(1, 25565, true), alloc(2, 25566, false), alloc(3, 25567, false)];
        assert_eq!(first_unassigned(&allocations), Some(2));
    }

    #[test]
    fn test_first_unassigned_none_free() {
        let allocations = [alloc(1, 25565, true), alloc(2, 25570, true)];
        assert_eq!(first_unassigned(&allocations), None);
    }

    #[test]
    fn test_next_free_port_bumps_past_highest() {
        let allocations = [alloc(1, 25565, true), alloc(2, 25570, true)];
        assert_eq!(next_free_port(&allocations), 25571);
    }

    #[test]
    fn test_next_free_port_empty_list_uses_default() {
        assert_eq!(next_free_port(&[]), 25565);
    }

    #[test]
    fn test_next_free_port_ignores_low_ports() {
        let allocations = [alloc(1, 8080, true)];
        assert_eq!(next_free_port(&allocations), 25565);
    }

    #[test]
    fn test_next_free_port_saturates_at_port_range_end() {
        // A node whose highest allocation sits at the top of the port
        // range must not wrap or panic; the resolver surfaces the
        // unusable port as AllocationResolution instead.
        let allocations = [alloc(1, 65535, true)];
        assert_eq!(next_free_port(&allocations), 65535);

        let allocations = [alloc(1, 65534, true)];
        assert_eq!(next_free_port(&allocations), 65535);
    }

    // Stub panel for driving the full search-or-create sequence

    #[derive(Default)]
    struct StubPanel {
        allocations: Vec<Allocation>,
        created_ports: Vec<String>,
        reflect_creations: bool,
    }

    type StubState = std::sync::Arc<std::sync::Mutex<StubPanel>>;

    async fn stub_list(
        axum::extract::State(stub): axum::extract::State<StubState>,
    ) -> axum::Json<serde_json::Value> {
        let stub = stub.lock().unwrap();
        let data: Vec<_> = stub
            .allocations
            .iter()
            .map(|a| {
                serde_json::json!({
                    "attributes": { "id": a.id, "port": a.port, "assigned": a.assigned }
                })
            })
            .collect();
        axum::Json(serde_json::json!({ "data": data }))
    }

    async fn stub_create(
        axum::extract::State(stub): axum::extract::State<StubState>,
        axum::Json(body): axum::Json<serde_json::Value>,
    ) -> axum::Json<serde_json::Value> {
        let mut stub = stub.lock().unwrap();
        let port = body["ports"][0].as_str().unwrap().to_string();
        stub.created_ports.push(port.clone());
        if stub.reflect_creations {
            let id = 100 + stub.allocations.len() as i64;
            stub.allocations.push(Allocation {
                id,
                port: port.parse().unwrap(),
                assigned: false,
            });
        }
        axum::Json(serde_json::json!({ "object": "null_resource" }))
    }

    async fn spawn_stub(stub: StubState) -> String {
        let app = axum::Router::new()
            .route(
                "/api/application/nodes/{node}/allocations",
                axum::routing::get(stub_list).post(stub_create),
            )
            .with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_resolver_returns_existing_free_allocation() {
        let stub: StubState = std::sync::Arc::new(std::sync::Mutex::new(StubPanel {
            allocations: vec![alloc(1, 25565, true), alloc(2, 25566, false)],
            reflect_creations: true,
            ..Default::default()
        }));
        let base = spawn_stub(stub.clone()).await;
        let client = PanelClient::with_key(&Client::new(), &base, "test-key");

        let id = client.find_or_create_allocation(7).await.unwrap();

        assert_eq!(id, 2);
        // Free slot found, so no create request goes out
        assert!(stub.lock().unwrap().created_ports.is_empty());
    }

    #[tokio::test]
    async fn test_resolver_creates_allocation_past_highest_port() {
        let stub: StubState = std::sync::Arc::new(std::sync::Mutex::new(StubPanel {
            allocations: vec![alloc(1, 25565, true), alloc(2, 25570, true)],
            reflect_creations: true,
            ..Default::default()
        }));
        let base = spawn_stub(stub.clone()).await;
        let client = PanelClient::with_key(&Client::new(), &base, "test-key");

        let id = client.find_or_create_allocation(7).await.unwrap();

        assert_eq!(stub.lock().unwrap().created_ports, vec!["25571"]);
        assert_eq!(id, 102);
    }

    #[tokio::test]
    async fn test_resolver_creates_default_port_on_empty_node() {
        let stub: StubState = std::sync::Arc::new(std::sync::Mutex::new(StubPanel {
            reflect_creations: true,
            ..Default::default()
        }));
        let base = spawn_stub(stub.clone()).await;
        let client = PanelClient::with_key(&Client::new(), &base, "test-key");

        let id = client.find_or_create_allocation(7).await.unwrap();

        assert_eq!(stub.lock().unwrap().created_ports, vec!["25565"]);
        assert_eq!(id, 100);
    }

    #[tokio::test]
    async fn test_resolver_fails_when_creation_not_reflected() {
        let stub: StubState = std::sync::Arc::new(std::sync::Mutex::new(StubPanel {
            allocations: vec![alloc(1, 25565, true)],
            reflect_creations: false,
            ..Default::default()
        }));
        let base = spawn_stub(stub.clone()).await;
        let client = PanelClient::with_key(&Client::new(), &base, "test-key");

        let err = client.find_or_create_allocation(7).await.unwrap_err();

        assert!(matches!(err, PanelError::AllocationResolution));
        // The create request was issued, the list just never showed it
        assert_eq!(stub.lock().unwrap().created_ports, vec!["25566"]);
    }
}
