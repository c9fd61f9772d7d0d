//! VM provisioning collaborator.
//!
//! Backs elastic workers with actual VMs. The trait mirrors the provisioning
//! service contract: create a VM for a new worker, delete the VM behind a
//! destroyed one. The mock records calls so tests can assert that no
//! deletion is ever issued for a protected worker.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::worker::SizeSpec;

/// Errors from the provisioning service.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("provisioning service unavailable: {0}")]
    Unavailable(String),

    #[error("provisioning service error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Request to create one VM.
#[derive(Debug, Clone, Serialize)]
pub struct CreateVmRequest {
    pub name: String,
    pub cpu: u32,
    pub memory_gb: u32,
    pub disk_gb: u32,
    pub ttl_hours: u32,
    /// Labels applied to the VM, including the elastic-worker marker.
    pub labels: BTreeMap<String, String>,
}

impl CreateVmRequest {
    pub fn new(name: impl Into<String>, spec: SizeSpec, ttl_hours: u32) -> Self {
        Self {
            name: name.into(),
            cpu: spec.cpu,
            memory_gb: spec.memory_gb,
            disk_gb: spec.disk_gb,
            ttl_hours,
            labels: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVmResponse {
    /// Worker id the VM was created for.
    pub worker_id: String,
}

/// VM provisioning interface.
#[async_trait]
pub trait VmProvisioner: Send + Sync {
    /// Create a VM; returns the worker id it backs.
    async fn create_vm(&self, request: CreateVmRequest) -> Result<String, ProvisionerError>;

    /// Delete the VM backing a worker. Returns false if no such VM exists.
    async fn delete_vm(&self, worker_id: &str) -> Result<bool, ProvisionerError>;
}

/// HTTP-backed provisioner client.
pub struct HttpProvisioner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProvisioner {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl VmProvisioner for HttpProvisioner {
    async fn create_vm(&self, request: CreateVmRequest) -> Result<String, ProvisionerError> {
        let url = format!("{}/v1/vms", self.base_url);
        info!(name = %request.name, cpu = request.cpu, memory_gb = request.memory_gb, "creating VM");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProvisionerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProvisionerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: CreateVmResponse = response
            .json()
            .await
            .map_err(|e| ProvisionerError::Unavailable(e.to_string()))?;
        Ok(body.worker_id)
    }

    async fn delete_vm(&self, worker_id: &str) -> Result<bool, ProvisionerError> {
        let url = format!("{}/v1/vms/{}", self.base_url, worker_id);
        info!(worker_id = %worker_id, "deleting VM");

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ProvisionerError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProvisionerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(true)
    }
}

/// A call the mock provisioner received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionerCall {
    CreateVm { name: String },
    DeleteVm { worker_id: String },
}

/// In-memory provisioner for tests and development.
pub struct MockProvisioner {
    state: Mutex<MockProvisionerState>,
}

struct MockProvisionerState {
    vms: BTreeMap<String, CreateVmRequest>,
    calls: Vec<ProvisionerCall>,
    fail_deletes: bool,
    fail_creates: bool,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockProvisionerState {
                vms: BTreeMap::new(),
                calls: Vec::new(),
                fail_deletes: false,
                fail_creates: false,
            }),
        }
    }

    /// Make `delete_vm` fail, for exercising the partial-destroy path.
    pub fn fail_deletes(&self) {
        self.lock().fail_deletes = true;
    }

    /// Make `create_vm` fail.
    pub fn fail_creates(&self) {
        self.lock().fail_creates = true;
    }

    /// Register an existing VM for a worker (as if provisioned earlier).
    pub fn add_vm(&self, worker_id: &str) {
        let request = CreateVmRequest::new(worker_id, crate::worker::WorkerSize::Medium.spec(), 1);
        self.lock().vms.insert(worker_id.to_string(), request);
    }

    /// Every call issued so far.
    pub fn calls(&self) -> Vec<ProvisionerCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockProvisionerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MockProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VmProvisioner for MockProvisioner {
    async fn create_vm(&self, request: CreateVmRequest) -> Result<String, ProvisionerError> {
        let mut state = self.lock();
        state.calls.push(ProvisionerCall::CreateVm {
            name: request.name.clone(),
        });

        if state.fail_creates {
            return Err(ProvisionerError::Unavailable(
                "mock provisioner configured to fail creates".to_string(),
            ));
        }

        let name = request.name.clone();
        state.vms.insert(name.clone(), request);
        Ok(name)
    }

    async fn delete_vm(&self, worker_id: &str) -> Result<bool, ProvisionerError> {
        let mut state = self.lock();
        state.calls.push(ProvisionerCall::DeleteVm {
            worker_id: worker_id.to_string(),
        });

        if state.fail_deletes {
            return Err(ProvisionerError::Unavailable(
                "mock provisioner configured to fail deletes".to_string(),
            ));
        }

        Ok(state.vms.remove(worker_id).is_some())
    }
}
