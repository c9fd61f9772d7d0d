//! Application state shared across request handlers.

use std::sync::Arc;

use corral_ledger::AllocationRegistry;

use crate::manager::WorkerManager;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<AllocationRegistry>,
    workers: Arc<WorkerManager>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(registry: Arc<AllocationRegistry>, workers: Arc<WorkerManager>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { registry, workers }),
        }
    }

    /// Get a reference to the allocation registry.
    pub fn registry(&self) -> &AllocationRegistry {
        &self.inner.registry
    }

    /// Get a reference to the worker manager.
    pub fn workers(&self) -> &WorkerManager {
        &self.inner.workers
    }
}
