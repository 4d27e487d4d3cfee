// # HTTP Remote Store
//
// This crate provides a RemoteStore backed by the Kubernetes REST API, for
// `SriovNetworkNodeState` custom resources.
//
// ## Behavior
//
// - One HTTP request per call; retry, backoff and heartbeat policy are owned
//   by `StatusWriter`
// - Status updates go through the `status` subresource and carry the
//   object's `resourceVersion`, so a stale write comes back as 409
// - HTTP status codes are mapped onto the core error kinds (401/403, 404,
//   409, 429, 5xx)
// - On heartbeat failure the pooled client is rebuilt, dropping every idle
//   connection
//
// ## Security Requirements
//
// - The bearer token NEVER appears in logs or Debug output
//
// ## API Reference
//
// - Get:    GET `/apis/sriovnetwork.openshift.io/v1/namespaces/:ns/sriovnetworknodestates/:name`
// - Update: PUT `/apis/sriovnetwork.openshift.io/v1/namespaces/:ns/sriovnetworknodestates/:name/status`

use async_trait::async_trait;
use nodestate_core::traits::{HeartbeatHandler, NodeState, NodeStateStatus, RemoteStore};
use nodestate_core::{Error, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// API group of the node state resource
pub const API_GROUP: &str = "sriovnetwork.openshift.io";

/// API version of the node state resource
pub const API_VERSION: &str = "v1";

/// Resource kind
pub const KIND: &str = "SriovNetworkNodeState";

/// Plural resource name used in URLs
const RESOURCE: &str = "sriovnetworknodestates";

/// Default namespace of node state objects
pub const DEFAULT_NAMESPACE: &str = "openshift-sriov-network-operator";

/// Default HTTP timeout for API requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Kubernetes REST remote store
///
/// # Connection Reset
///
/// The client sits behind a lock so that [`HeartbeatHandler::on_heartbeat_failure`]
/// can swap in a fresh one. Requests clone the current client and release
/// the lock before sending.
pub struct HttpRemoteStore {
    /// API server base URL, without trailing slash
    api_url: String,

    /// Namespace of the node state objects
    namespace: String,

    /// Bearer token
    /// ⚠️ NEVER log this value
    token: Option<String>,

    /// Extra trust root for the API server
    ca_certificate: Option<reqwest::Certificate>,

    /// HTTP request timeout
    timeout: Duration,

    /// Pooled HTTP client, replaced on heartbeat failure
    client: RwLock<reqwest::Client>,

    /// Number of client rebuilds so far
    rebuilds: AtomicUsize,
}

// Custom Debug implementation that hides the bearer token
impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemoteStore")
            .field("api_url", &self.api_url)
            .field("namespace", &self.namespace)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpRemoteStore {
    /// Create a new remote store
    ///
    /// # Parameters
    ///
    /// - `api_url`: API server URL (e.g., "https://172.30.0.1:443")
    /// - `namespace`: Namespace holding the node state objects
    pub fn new(api_url: impl Into<String>, namespace: impl Into<String>) -> Result<Self> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        if api_url.is_empty() {
            return Err(Error::config("API server URL cannot be empty"));
        }

        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(Error::config("namespace cannot be empty"));
        }

        let client = build_client(DEFAULT_HTTP_TIMEOUT, None)?;

        Ok(Self {
            api_url,
            namespace,
            token: None,
            ca_certificate: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
            client: RwLock::new(client),
            rebuilds: AtomicUsize::new(0),
        })
    }

    /// Authenticate with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.trim().is_empty()).then(|| token.trim().to_string());
        self
    }

    /// Trust the PEM-encoded certificate in addition to the system roots
    pub fn with_ca_certificate(mut self, pem: &[u8]) -> Result<Self> {
        let certificate = reqwest::Certificate::from_pem(pem)
            .map_err(|e| Error::config(format!("Invalid CA certificate: {}", e)))?;
        let client = build_client(self.timeout, Some(&certificate))?;

        self.ca_certificate = Some(certificate);
        self.client = RwLock::new(client);
        Ok(self)
    }

    /// Namespace of the node state objects
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of times the HTTP client was rebuilt
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/apis/{}/{}/namespaces/{}/{}/{}",
            self.api_url, API_GROUP, API_VERSION, self.namespace, RESOURCE, name
        )
    }

    fn status_url(&self, name: &str) -> String {
        format!("{}/status", self.object_url(name))
    }

    fn client(&self) -> reqwest::Client {
        match self.client.read() {
            Ok(client) => client.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and decode a node state object from a 2xx response
    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<NodeState> {
        let response = self
            .authorize(request)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::remote_store(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(map_status(status, what, &error_text));
        }

        let object: WireObject = response
            .json()
            .await
            .map_err(|e| Error::remote_store(format!("Failed to parse response: {}", e)))?;

        Ok(object.into())
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get(&self, name: &str) -> Result<NodeState> {
        tracing::debug!("Fetching node state {}/{}", self.namespace, name);

        let request = self.client().get(self.object_url(name));
        self.send(request, &format!("node state {}", name)).await
    }

    async fn update_status(&self, state: &NodeState) -> Result<NodeState> {
        tracing::debug!(
            "Updating node state {}/{} status at version {}",
            self.namespace,
            state.name,
            state.resource_version
        );

        let mut body = WireObject::from(state);
        if body.metadata.namespace.is_empty() {
            body.metadata.namespace = self.namespace.clone();
        }

        let request = self.client().put(self.status_url(&state.name)).json(&body);
        self.send(request, &format!("node state {} status", state.name))
            .await
    }
}

impl HeartbeatHandler for HttpRemoteStore {
    fn on_heartbeat_failure(&self) {
        let client = match build_client(self.timeout, self.ca_certificate.as_ref()) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Failed to rebuild HTTP client, keeping the old one: {}", e);
                return;
            }
        };

        match self.client.write() {
            Ok(mut current) => *current = client,
            Err(poisoned) => *poisoned.into_inner() = client,
        }
        let rebuilds = self.rebuilds.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("Closed all API server connections (rebuild #{})", rebuilds);
    }
}

fn build_client(
    timeout: Duration,
    ca_certificate: Option<&reqwest::Certificate>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(certificate) = ca_certificate {
        builder = builder.add_root_certificate(certificate.clone());
    }
    builder
        .build()
        .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))
}

/// Map a non-success HTTP status onto the core error kinds
fn map_status(status: StatusCode, what: &str, error_text: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::auth(format!(
            "Invalid token or insufficient permissions for {}. Status: {}",
            what, status
        )),
        404 => Error::not_found(what.to_string()),
        409 => Error::conflict(format!(
            "{} was modified concurrently. Status: {}",
            what, status
        )),
        429 => Error::remote_store(format!(
            "Rate limit exceeded. Please retry later. Status: {}",
            status
        )),
        500..=599 => Error::remote_store(format!(
            "API server error (transient): {} - {}",
            status, error_text
        )),
        _ => Error::remote_store(format!(
            "Request for {} failed: {} - {}",
            what, status, error_text
        )),
    }
}

/// Node state object as exchanged with the API server
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireObject {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
    metadata: WireMetadata,
    #[serde(default)]
    spec: serde_json::Value,
    #[serde(default)]
    status: NodeStateStatus,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMetadata {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    resource_version: String,
}

impl From<WireObject> for NodeState {
    fn from(object: WireObject) -> Self {
        NodeState {
            name: object.metadata.name,
            namespace: object.metadata.namespace,
            resource_version: object.metadata.resource_version,
            spec: object.spec,
            status: object.status,
        }
    }
}

impl From<&NodeState> for WireObject {
    fn from(state: &NodeState) -> Self {
        WireObject {
            api_version: format!("{}/{}", API_GROUP, API_VERSION),
            kind: KIND.to_string(),
            metadata: WireMetadata {
                name: state.name.clone(),
                namespace: state.namespace.clone(),
                resource_version: state.resource_version.clone(),
            },
            spec: state.spec.clone(),
            status: state.status.clone(),
        }
    }
}
