//! Worker domain model.
//!
//! Workers are mirrored facts about cluster nodes: this service owns the
//! decision logic (classification, transition guards), never the node
//! lifecycle itself. Node facts come from the cluster client; the views in
//! this module are what the API reports to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{ClusterError, Node, NodeCondition};
use crate::provisioner::ProvisionerError;

/// Label carried by elastic workers.
pub const ELASTIC_LABEL: &str = "corral.dev/worker-class";
/// Label value marking a worker elastic.
pub const ELASTIC_LABEL_VALUE: &str = "elastic";
/// Annotation holding an elastic worker's TTL expiry (RFC 3339).
pub const TTL_ANNOTATION: &str = "corral.dev/ttl-expiry";
/// Label recording which system provisioned a worker.
pub const PROVISIONED_BY_LABEL: &str = "corral.dev/provisioned-by";

/// Worker kind, derived from node metadata and never stored separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Must never be destroyed by this system.
    Permanent,
    /// Transient; eligible for destruction when drained or expired.
    Elastic,
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permanent => write!(f, "permanent"),
            Self::Elastic => write!(f, "elastic"),
        }
    }
}

/// Observed worker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Ready,
    /// Ready and running workload pods. Only derivable when the cluster
    /// client reports pod counts; plain node facts map to `Ready`.
    Busy,
    Draining,
    NotReady,
}

/// VM size for provisioned elastic workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerSize {
    Small,
    #[default]
    Medium,
    Large,
}

/// Concrete dimensions for a worker size.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SizeSpec {
    pub cpu: u32,
    pub memory_gb: u32,
    pub disk_gb: u32,
}

impl WorkerSize {
    pub fn spec(&self) -> SizeSpec {
        match self {
            Self::Small => SizeSpec {
                cpu: 2,
                memory_gb: 4,
                disk_gb: 50,
            },
            Self::Medium => SizeSpec {
                cpu: 4,
                memory_gb: 8,
                disk_gb: 100,
            },
            Self::Large => SizeSpec {
                cpu: 8,
                memory_gb: 16,
                disk_gb: 200,
            },
        }
    }
}

/// API view of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct Worker {
    pub name: String,
    pub kind: WorkerKind,
    pub status: WorkerStatus,
    pub capacity: crate::cluster::ResourceFigures,
    pub allocatable: crate::cluster::ResourceFigures,
    pub labels: std::collections::BTreeMap<String, String>,
    pub annotations: std::collections::BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    /// TTL expiry for elastic workers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_expiry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<NodeCondition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

impl Worker {
    /// Build the API view from node facts plus the derived classification.
    pub fn from_node(node: &Node, kind: WorkerKind, status: WorkerStatus) -> Self {
        let ttl_expiry = node
            .annotations
            .get(TTL_ANNOTATION)
            .and_then(|raw| raw.parse::<DateTime<Utc>>().ok());

        Self {
            name: node.name.clone(),
            kind,
            status,
            capacity: node.capacity.clone(),
            allocatable: node.allocatable.clone(),
            labels: node.labels.clone(),
            annotations: node.annotations.clone(),
            created_at: node.created_at,
            ttl_expiry,
            conditions: node.conditions.clone(),
            addresses: node.addresses.clone(),
        }
    }
}

/// A worker created through the provisioning collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedWorker {
    pub name: String,
    pub kind: WorkerKind,
    pub size: WorkerSize,
    pub resources: SizeSpec,
    pub ttl_hours: u32,
    pub ttl_expiry: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Errors from worker lifecycle operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker not found: {0}")]
    NotFound(String),

    /// Attempted destruction of a permanent or protected worker. Never
    /// overridable, never retried.
    #[error("safety violation: cannot destroy worker {name}: {reason}")]
    SafetyViolation { name: String, reason: String },

    #[error("worker {0} is not drained; drain it first or pass force explicitly")]
    NotDrained(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("timed out after {waited_secs}s waiting for {what}")]
    Timeout { what: String, waited_secs: u64 },

    #[error("cluster: {0}")]
    Cluster(#[from] ClusterError),

    #[error("provisioning: {0}")]
    Provisioning(#[from] ProvisionerError),
}
