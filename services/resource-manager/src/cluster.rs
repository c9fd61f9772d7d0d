//! Cluster control-plane client.
//!
//! Abstracts the remote cluster API behind a trait: listing and describing
//! nodes, cordon-and-evict, and node removal. An HTTP implementation talks
//! to the cluster API; the mock keeps nodes in memory and records every
//! mutating call so tests can assert which external actions were issued.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from cluster API calls.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster API unavailable: {0}")]
    Unavailable(String),

    #[error("cluster API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Resource quantities as the cluster reports them (opaque strings, e.g.
/// "4" cpu or "8Gi" memory).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceFigures {
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub pods: String,
}

/// One node condition as reported by the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCondition {
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Raw node facts from the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Cordoned nodes accept no new pods.
    #[serde(default)]
    pub unschedulable: bool,
    /// Ready condition, when the cluster reported one.
    #[serde(default)]
    pub ready: Option<bool>,
    #[serde(default)]
    pub capacity: ResourceFigures,
    #[serde(default)]
    pub allocatable: ResourceFigures,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// Options for a cordon-and-evict call.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DrainOptions {
    /// Bounded grace period for pod eviction.
    pub grace_period_secs: u64,
    /// DaemonSet-backed pods are never evicted.
    pub ignore_daemonsets: bool,
    /// Whether pods backed by ephemeral-only storage may be deleted.
    pub delete_ephemeral_data: bool,
}

/// What a cordon-and-evict call accomplished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainOutcome {
    pub evicted_pods: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Cluster control-plane interface.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List all nodes.
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;

    /// Describe one node; `None` if it does not exist.
    async fn describe_node(&self, name: &str) -> Result<Option<Node>, ClusterError>;

    /// Cordon a node and evict its non-DaemonSet pods.
    async fn cordon_and_evict(
        &self,
        name: &str,
        options: DrainOptions,
    ) -> Result<DrainOutcome, ClusterError>;

    /// Remove a node from the cluster. Returns false if it was already gone.
    async fn remove_node(&self, name: &str) -> Result<bool, ClusterError>;
}

/// HTTP-backed cluster client.
pub struct HttpClusterClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClusterClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClusterError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ClusterError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let url = format!("{}/v1/nodes", self.base_url);
        debug!(url = %url, "listing nodes");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClusterError::Unavailable(e.to_string()))?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClusterError::Unavailable(e.to_string()))
    }

    async fn describe_node(&self, name: &str) -> Result<Option<Node>, ClusterError> {
        let url = format!("{}/v1/nodes/{}", self.base_url, name);
        debug!(url = %url, "describing node");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClusterError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::check(response).await?;
        let node = response
            .json()
            .await
            .map_err(|e| ClusterError::Unavailable(e.to_string()))?;
        Ok(Some(node))
    }

    async fn cordon_and_evict(
        &self,
        name: &str,
        options: DrainOptions,
    ) -> Result<DrainOutcome, ClusterError> {
        let url = format!("{}/v1/nodes/{}/drain", self.base_url, name);
        info!(node = %name, grace_period_secs = options.grace_period_secs, "cordon and evict");

        let response = self
            .client
            .post(&url)
            .json(&options)
            .send()
            .await
            .map_err(|e| ClusterError::Unavailable(e.to_string()))?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClusterError::Unavailable(e.to_string()))
    }

    async fn remove_node(&self, name: &str) -> Result<bool, ClusterError> {
        let url = format!("{}/v1/nodes/{}", self.base_url, name);
        info!(node = %name, "removing node from cluster");

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ClusterError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }

        Self::check(response).await?;
        Ok(true)
    }
}

/// A mutating call the mock cluster received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    CordonAndEvict { node: String },
    RemoveNode { node: String },
}

/// In-memory cluster for tests and development.
pub struct MockClusterClient {
    state: Mutex<MockClusterState>,
}

struct MockClusterState {
    nodes: BTreeMap<String, Node>,
    calls: Vec<ClusterCall>,
    fail_remove: bool,
}

impl MockClusterClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockClusterState {
                nodes: BTreeMap::new(),
                calls: Vec::new(),
                fail_remove: false,
            }),
        }
    }

    /// Seed a node into the mock cluster.
    pub fn add_node(&self, node: Node) {
        self.lock().nodes.insert(node.name.clone(), node);
    }

    /// Make `remove_node` fail, for exercising failure paths.
    pub fn fail_removals(&self) {
        self.lock().fail_remove = true;
    }

    /// Every mutating call issued so far.
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockClusterState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MockClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        Ok(self.lock().nodes.values().cloned().collect())
    }

    async fn describe_node(&self, name: &str) -> Result<Option<Node>, ClusterError> {
        Ok(self.lock().nodes.get(name).cloned())
    }

    async fn cordon_and_evict(
        &self,
        name: &str,
        _options: DrainOptions,
    ) -> Result<DrainOutcome, ClusterError> {
        let mut state = self.lock();
        state.calls.push(ClusterCall::CordonAndEvict {
            node: name.to_string(),
        });

        let Some(node) = state.nodes.get_mut(name) else {
            return Err(ClusterError::Api {
                status: 404,
                message: format!("node {name} not found"),
            });
        };

        node.unschedulable = true;
        Ok(DrainOutcome {
            evicted_pods: 0,
            message: Some("cordoned".to_string()),
        })
    }

    async fn remove_node(&self, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.lock();
        state.calls.push(ClusterCall::RemoveNode {
            node: name.to_string(),
        });

        if state.fail_remove {
            return Err(ClusterError::Unavailable(
                "mock cluster configured to fail removals".to_string(),
            ));
        }

        Ok(state.nodes.remove(name).is_some())
    }
}
