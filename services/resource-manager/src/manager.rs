//! Worker lifecycle manager.
//!
//! Drives the guarded drain/destroy sequence and the list/provision
//! operations against the external collaborators. Cluster calls can take
//! seconds to minutes, so every operation on a worker runs under a
//! per-worker lock: two operations on the same worker serialize, operations
//! on different workers proceed in parallel, and the allocation ledger is
//! never involved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cluster::{ClusterClient, DrainOptions, Node};
use crate::guard::{DrainState, WorkerSafetyGuard};
use crate::provisioner::{CreateVmRequest, VmProvisioner};
use crate::worker::{
    ProvisionedWorker, Worker, WorkerError, WorkerKind, WorkerSize, ELASTIC_LABEL,
    ELASTIC_LABEL_VALUE, PROVISIONED_BY_LABEL, TTL_ANNOTATION,
};

/// Bounds and knobs for worker operations.
#[derive(Debug, Clone)]
pub struct WorkerOpsConfig {
    /// Grace period handed to cordon-and-evict.
    pub drain_grace_period_secs: u64,
    /// Whether eviction may delete pods backed by ephemeral-only storage.
    pub delete_ephemeral_data: bool,
    /// Poll interval for bounded drain waits.
    pub drain_poll_interval_secs: u64,
    /// Ceiling on workers per provision call.
    pub max_provision_count: u32,
    /// Ceiling on provision TTL, in hours.
    pub max_provision_ttl_hours: u32,
}

impl Default for WorkerOpsConfig {
    fn default() -> Self {
        Self {
            drain_grace_period_secs: 300,
            delete_ephemeral_data: true,
            drain_poll_interval_secs: 2,
            max_provision_count: 10,
            max_provision_ttl_hours: 168,
        }
    }
}

/// Outcome of a drain call.
#[derive(Debug, Clone, Serialize)]
pub struct DrainReport {
    pub worker_id: String,
    pub state: DrainState,
    pub evicted_pods: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of a destroy call.
///
/// Cluster removal and VM deletion are independent external calls; the
/// operation is not transactional across them. When the node is gone but
/// the VM deletion failed, the partial result is reported distinctly so the
/// caller can reconcile the provisioning side alone.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DestroyOutcome {
    Destroyed {
        worker_id: String,
        removed_from_cluster: bool,
        vm_deleted: bool,
    },
    PartialDestroy {
        worker_id: String,
        removed_from_cluster: bool,
        vm_deleted: bool,
        error: String,
    },
}

/// Coordinates worker operations across guard, cluster, and provisioner.
pub struct WorkerManager {
    cluster: Arc<dyn ClusterClient>,
    provisioner: Arc<dyn VmProvisioner>,
    guard: WorkerSafetyGuard,
    config: WorkerOpsConfig,

    /// Per-worker exclusivity keys.
    op_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkerManager {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        provisioner: Arc<dyn VmProvisioner>,
        guard: WorkerSafetyGuard,
        config: WorkerOpsConfig,
    ) -> Self {
        Self {
            cluster,
            provisioner,
            guard,
            config,
            op_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn worker_lock(&self, worker_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.op_locks.lock().await;
        Arc::clone(
            locks
                .entry(worker_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn to_worker(&self, node: &Node) -> Worker {
        let classifier = self.guard.classifier();
        Worker::from_node(node, classifier.classify(node), classifier.status(node))
    }

    /// List workers, optionally filtered by kind.
    pub async fn list_workers(
        &self,
        kind_filter: Option<WorkerKind>,
    ) -> Result<Vec<Worker>, WorkerError> {
        let nodes = self.cluster.list_nodes().await?;
        Ok(nodes
            .iter()
            .map(|node| self.to_worker(node))
            .filter(|worker| kind_filter.is_none_or(|kind| worker.kind == kind))
            .collect())
    }

    /// Detailed view of one worker.
    pub async fn get_worker_details(&self, worker_id: &str) -> Result<Worker, WorkerError> {
        let node = self
            .cluster
            .describe_node(worker_id)
            .await?
            .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;
        Ok(self.to_worker(&node))
    }

    /// Provision elastic workers backed by fresh VMs.
    pub async fn provision_workers(
        &self,
        count: u32,
        ttl_hours: u32,
        size: WorkerSize,
    ) -> Result<Vec<ProvisionedWorker>, WorkerError> {
        if count == 0 || count > self.config.max_provision_count {
            return Err(WorkerError::Validation(format!(
                "count must be between 1 and {}, got {count}",
                self.config.max_provision_count
            )));
        }
        if ttl_hours == 0 || ttl_hours > self.config.max_provision_ttl_hours {
            return Err(WorkerError::Validation(format!(
                "ttl_hours must be between 1 and {}, got {ttl_hours}",
                self.config.max_provision_ttl_hours
            )));
        }

        let spec = size.spec();
        let created_at = Utc::now();
        let ttl_expiry = created_at + chrono::Duration::hours(i64::from(ttl_hours));

        let mut provisioned = Vec::with_capacity(count as usize);
        for index in 0..count {
            let name = format!("elastic-{}-{}", created_at.timestamp(), index);

            let mut request = CreateVmRequest::new(&name, spec, ttl_hours);
            request
                .labels
                .insert(ELASTIC_LABEL.to_string(), ELASTIC_LABEL_VALUE.to_string());
            request.labels.insert(
                PROVISIONED_BY_LABEL.to_string(),
                "corral-resource-manager".to_string(),
            );
            request
                .labels
                .insert(TTL_ANNOTATION.to_string(), ttl_expiry.to_rfc3339());

            let worker_id = self.provisioner.create_vm(request).await?;
            info!(worker_id = %worker_id, size = ?size, ttl_hours, "provisioned elastic worker");

            provisioned.push(ProvisionedWorker {
                name: worker_id,
                kind: WorkerKind::Elastic,
                size,
                resources: spec,
                ttl_hours,
                ttl_expiry,
                created_at,
            });
        }

        Ok(provisioned)
    }

    /// Drain a worker: cordon it and evict its non-DaemonSet pods.
    ///
    /// Idempotent from `Draining`. Completion is observed via the cluster,
    /// not asserted here; see [`wait_for_drained`](Self::wait_for_drained).
    pub async fn drain_worker(&self, worker_id: &str) -> Result<DrainReport, WorkerError> {
        let lock = self.worker_lock(worker_id).await;
        let _guard = lock.lock().await;

        let node = self
            .cluster
            .describe_node(worker_id)
            .await?
            .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;

        self.guard.authorize_drain(&node)?;

        let options = DrainOptions {
            grace_period_secs: self.config.drain_grace_period_secs,
            ignore_daemonsets: true,
            delete_ephemeral_data: self.config.delete_ephemeral_data,
        };
        let outcome = self.cluster.cordon_and_evict(worker_id, options).await?;

        info!(
            worker_id = %worker_id,
            evicted_pods = outcome.evicted_pods,
            "drain initiated"
        );

        Ok(DrainReport {
            worker_id: worker_id.to_string(),
            state: DrainState::Draining,
            evicted_pods: outcome.evicted_pods,
            message: outcome.message,
        })
    }

    /// Poll until the worker is observed out of scheduling, bounded by the
    /// caller's timeout.
    ///
    /// On timeout, cluster-side state is left as last observed; nothing is
    /// rolled back.
    pub async fn wait_for_drained(
        &self,
        worker_id: &str,
        timeout_secs: u64,
    ) -> Result<DrainState, WorkerError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        let poll = Duration::from_secs(self.config.drain_poll_interval_secs.max(1));

        loop {
            let node = self
                .cluster
                .describe_node(worker_id)
                .await?
                .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;

            let state = self.guard.drain_state(&node);
            if state.satisfies_drain_guard() {
                return Ok(state);
            }

            if tokio::time::Instant::now() + poll > deadline {
                return Err(WorkerError::Timeout {
                    what: format!("worker {worker_id} to drain"),
                    waited_secs: timeout_secs,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Destroy an elastic worker: remove the node, then delete its VM.
    ///
    /// Not interruptible once the guards pass. The classification guard is
    /// absolute; no flag combination destroys a permanent or protected
    /// worker, and no external call is issued for one.
    pub async fn destroy_worker(
        &self,
        worker_id: &str,
        force: bool,
    ) -> Result<DestroyOutcome, WorkerError> {
        let lock = self.worker_lock(worker_id).await;
        let _guard = lock.lock().await;

        let node = self
            .cluster
            .describe_node(worker_id)
            .await?
            .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;

        self.guard.authorize_destroy(&node, force)?;

        if force && !self.guard.drain_state(&node).satisfies_drain_guard() {
            warn!(worker_id = %worker_id, "destroying without drain (force)");
        }

        let removed = self.cluster.remove_node(worker_id).await?;

        let outcome = match self.provisioner.delete_vm(worker_id).await {
            Ok(vm_deleted) => {
                info!(worker_id = %worker_id, removed_from_cluster = removed, vm_deleted, "worker destroyed");
                DestroyOutcome::Destroyed {
                    worker_id: worker_id.to_string(),
                    removed_from_cluster: removed,
                    vm_deleted,
                }
            }
            Err(e) => {
                // Node is already gone from the cluster; report the half
                // that failed instead of pretending success or rolling back.
                warn!(worker_id = %worker_id, error = %e, "node removed but VM deletion failed");
                DestroyOutcome::PartialDestroy {
                    worker_id: worker_id.to_string(),
                    removed_from_cluster: removed,
                    vm_deleted: false,
                    error: e.to_string(),
                }
            }
        };

        // The node is gone either way, so its exclusivity key has no
        // further operations to serialize.
        drop(_guard);
        self.op_locks.lock().await.remove(worker_id);

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::WorkerClassifier;
    use crate::cluster::MockClusterClient;
    use crate::provisioner::MockProvisioner;
    use crate::worker::{ELASTIC_LABEL, ELASTIC_LABEL_VALUE};

    fn manager_with(cluster: Arc<MockClusterClient>, provisioner: Arc<MockProvisioner>) -> WorkerManager {
        WorkerManager::new(
            cluster,
            provisioner,
            WorkerSafetyGuard::new(WorkerClassifier::default()),
            WorkerOpsConfig::default(),
        )
    }

    fn drained_elastic(name: &str) -> Node {
        let mut node = Node {
            name: name.to_string(),
            unschedulable: true,
            ready: Some(true),
            ..Node::default()
        };
        node.labels
            .insert(ELASTIC_LABEL.to_string(), ELASTIC_LABEL_VALUE.to_string());
        node
    }

    #[tokio::test]
    async fn destroy_prunes_the_worker_lock_entry() {
        let cluster = Arc::new(MockClusterClient::new());
        let provisioner = Arc::new(MockProvisioner::new());
        cluster.add_node(drained_elastic("elastic-9"));
        provisioner.add_vm("elastic-9");

        let manager = manager_with(cluster, provisioner);

        // Draining registers the exclusivity key.
        manager.drain_worker("elastic-9").await.unwrap();
        assert!(manager.op_locks.lock().await.contains_key("elastic-9"));

        manager.destroy_worker("elastic-9", false).await.unwrap();
        assert!(manager.op_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn partial_destroy_also_prunes_the_lock_entry() {
        let cluster = Arc::new(MockClusterClient::new());
        let provisioner = Arc::new(MockProvisioner::new());
        cluster.add_node(drained_elastic("elastic-10"));
        provisioner.fail_deletes();

        let manager = manager_with(cluster, provisioner);

        let outcome = manager.destroy_worker("elastic-10", false).await.unwrap();
        assert!(matches!(outcome, DestroyOutcome::PartialDestroy { .. }));
        assert!(manager.op_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn refused_destroy_keeps_the_lock_entry() {
        let cluster = Arc::new(MockClusterClient::new());
        let provisioner = Arc::new(MockProvisioner::new());
        cluster.add_node(Node {
            name: "db-host-9".to_string(),
            ready: Some(true),
            ..Node::default()
        });

        let manager = manager_with(cluster, provisioner);

        let err = manager.destroy_worker("db-host-9", true).await.unwrap_err();
        assert!(matches!(err, WorkerError::SafetyViolation { .. }));
        // The worker still exists; its key stays for future operations.
        assert!(manager.op_locks.lock().await.contains_key("db-host-9"));
    }
}
