//! The allocation registry: admission, release, queries, and expiry sweep.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use corral_id::AllocationId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::allocation::{Allocation, AllocationState, AllocationSummary, Priority};
use crate::capacity::{CapacityPool, CapacitySnapshot, ResourceDemand};

/// Input validation failures, rejected before any pool mutation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("job_id must not be empty")]
    EmptyJobId,

    #[error("workers must be at most {limit}, requested {requested}")]
    TooManyWorkers { requested: u32, limit: u32 },

    #[error("ttl_seconds must be positive, got {0}")]
    NonPositiveTtl(i64),
}

/// Ledger sizing and per-worker unit costs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub total_cpu: f64,
    pub total_memory_mb: i64,
    pub total_workers: u32,

    /// CPU cores charged per worker slot.
    pub worker_cpu: f64,
    /// Memory charged per worker slot, in MB.
    pub worker_memory_mb: i64,
    /// Ceiling on workers per single request.
    pub max_workers_per_request: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            total_cpu: 16.0,
            total_memory_mb: 32768,
            total_workers: 10,
            worker_cpu: 1.0,
            worker_memory_mb: 2048,
            max_workers_per_request: 100,
        }
    }
}

/// A request for resources on behalf of one job.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocationRequest {
    pub job_id: String,

    /// Named service instances to reserve alongside the workers.
    #[serde(default)]
    pub services: Vec<String>,

    /// Worker slots to reserve.
    #[serde(default)]
    pub workers: u32,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,

    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_ttl_seconds() -> i64 {
    3600
}

/// Result of a release call.
///
/// Release never fails outright: an unknown id is a `NotFound` value and a
/// repeat release reports `AlreadyReleased` without double-crediting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released {
        allocation_id: AllocationId,
        job_id: String,
        workers_freed: u32,
        cpu_freed: f64,
        memory_freed_mb: i64,
        released_at: DateTime<Utc>,
        duration_seconds: f64,
    },
    AlreadyReleased {
        allocation_id: AllocationId,
        released_at: Option<DateTime<Utc>>,
    },
    NotFound {
        allocation_id: AllocationId,
    },
}

/// Owns all allocation records and the capacity pool.
///
/// One mutex guards the pool and the records as a unit: check-and-reserve
/// and release are atomic with respect to each other. Operations are short
/// and never block on external calls while holding the lock.
pub struct AllocationRegistry {
    config: LedgerConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    pool: CapacityPool,
    allocations: HashMap<AllocationId, Allocation>,
}

impl AllocationRegistry {
    pub fn new(config: LedgerConfig) -> Self {
        let pool = CapacityPool::new(
            config.total_cpu,
            config.total_memory_mb,
            config.total_workers,
        );
        Self {
            config,
            inner: Mutex::new(Inner {
                pool,
                allocations: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves only ledger bookkeeping
        // behind; the data is still structurally valid, so recover the guard.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve resources for a job.
    ///
    /// A capacity shortfall is a normal outcome, not an error: the returned
    /// allocation is in terminal `Failed` state and carries the shortfall
    /// description. Only malformed input produces an `Err`.
    pub fn request_resources(
        &self,
        request: AllocationRequest,
    ) -> Result<Allocation, ValidationError> {
        self.request_resources_at(request, Utc::now())
    }

    /// Like [`request_resources`](Self::request_resources), with an explicit
    /// clock for deterministic tests.
    pub fn request_resources_at(
        &self,
        request: AllocationRequest,
        now: DateTime<Utc>,
    ) -> Result<Allocation, ValidationError> {
        if request.job_id.is_empty() {
            return Err(ValidationError::EmptyJobId);
        }
        if request.workers > self.config.max_workers_per_request {
            return Err(ValidationError::TooManyWorkers {
                requested: request.workers,
                limit: self.config.max_workers_per_request,
            });
        }
        if request.ttl_seconds <= 0 {
            return Err(ValidationError::NonPositiveTtl(request.ttl_seconds));
        }

        let demand = ResourceDemand {
            cpu: f64::from(request.workers) * self.config.worker_cpu,
            memory_mb: i64::from(request.workers) * self.config.worker_memory_mb,
            workers: request.workers,
        };

        let allocation_id = AllocationId::new();
        let mut allocation = Allocation {
            allocation_id,
            job_id: request.job_id.clone(),
            state: AllocationState::Pending,
            priority: request.priority,
            services: request.services,
            workers_requested: request.workers,
            worker_ids: Vec::new(),
            cpu_allocated: 0.0,
            memory_allocated_mb: 0,
            created_at: now,
            activated_at: None,
            released_at: None,
            ttl_seconds: request.ttl_seconds,
            error: None,
            metadata: request.metadata,
        };

        let mut inner = self.lock();
        match inner.pool.reserve(demand) {
            Ok(()) => {
                allocation.state = AllocationState::Active;
                allocation.activated_at = Some(now);
                allocation.cpu_allocated = demand.cpu;
                allocation.memory_allocated_mb = demand.memory_mb;
                allocation.worker_ids = (0..request.workers)
                    .map(|i| format!("worker-{}-{:03}", request.job_id, i))
                    .collect();

                info!(
                    allocation_id = %allocation_id,
                    job_id = %request.job_id,
                    workers = request.workers,
                    cpu = demand.cpu,
                    memory_mb = demand.memory_mb,
                    "allocation activated"
                );
            }
            Err(shortfall) => {
                allocation.state = AllocationState::Failed;
                allocation.error = Some(shortfall.to_string());

                warn!(
                    allocation_id = %allocation_id,
                    job_id = %request.job_id,
                    shortfall = %shortfall,
                    "allocation rejected"
                );
            }
        }

        inner.allocations.insert(allocation_id, allocation.clone());
        Ok(allocation)
    }

    /// Release an allocation and credit its reserved amounts back.
    pub fn release_resources(&self, allocation_id: AllocationId) -> ReleaseOutcome {
        self.release_resources_at(allocation_id, Utc::now())
    }

    /// Like [`release_resources`](Self::release_resources), with an explicit
    /// clock for deterministic tests.
    pub fn release_resources_at(
        &self,
        allocation_id: AllocationId,
        now: DateTime<Utc>,
    ) -> ReleaseOutcome {
        let mut inner = self.lock();

        let Some(allocation) = inner.allocations.get(&allocation_id) else {
            return ReleaseOutcome::NotFound { allocation_id };
        };

        if allocation.state.is_terminal() || allocation.state == AllocationState::Releasing {
            return ReleaseOutcome::AlreadyReleased {
                allocation_id,
                released_at: allocation.released_at,
            };
        }

        let reserved = allocation.reserved();
        let activated_at = allocation.activated_at;
        let job_id = allocation.job_id.clone();

        // Transition through Releasing before crediting the pool so the
        // record is never observable as Active with capacity returned.
        if let Some(a) = inner.allocations.get_mut(&allocation_id) {
            a.state = AllocationState::Releasing;
        }

        if !reserved.is_zero() {
            inner.pool.release(reserved);
        }

        if let Some(a) = inner.allocations.get_mut(&allocation_id) {
            a.state = AllocationState::Released;
            a.released_at = Some(now);
        }

        let duration_seconds = activated_at
            .map(|t| (now - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        info!(
            allocation_id = %allocation_id,
            job_id = %job_id,
            workers_freed = reserved.workers,
            duration_seconds,
            "allocation released"
        );

        ReleaseOutcome::Released {
            allocation_id,
            job_id,
            workers_freed: reserved.workers,
            cpu_freed: reserved.cpu,
            memory_freed_mb: reserved.memory_mb,
            released_at: now,
            duration_seconds,
        }
    }

    /// Snapshot of totals, allocated, available, and what is reserved.
    ///
    /// Reflects active allocations only: the active count and the reserved
    /// service set exclude released and failed records.
    pub fn get_capacity(&self) -> CapacitySnapshot {
        let inner = self.lock();
        let mut snapshot = inner.pool.snapshot();

        let mut services: BTreeSet<&str> = BTreeSet::new();
        let mut active = 0usize;
        for allocation in inner.allocations.values() {
            if allocation.state == AllocationState::Active {
                active += 1;
                services.extend(allocation.services.iter().map(String::as_str));
            }
        }

        snapshot.active_allocations = active;
        snapshot.reserved_services = services.into_iter().map(String::from).collect();
        snapshot
    }

    /// Look up one allocation by id.
    pub fn get_allocation(&self, allocation_id: AllocationId) -> Option<Allocation> {
        self.lock().allocations.get(&allocation_id).cloned()
    }

    /// List allocations, optionally filtered by state and/or job id.
    ///
    /// The filters are independent; passing neither lists everything.
    pub fn list_allocations(
        &self,
        state: Option<AllocationState>,
        job_id: Option<&str>,
    ) -> Vec<AllocationSummary> {
        self.list_allocations_at(state, job_id, Utc::now())
    }

    /// Like [`list_allocations`](Self::list_allocations), with an explicit
    /// clock for deterministic tests.
    pub fn list_allocations_at(
        &self,
        state: Option<AllocationState>,
        job_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<AllocationSummary> {
        let inner = self.lock();
        let mut summaries: Vec<AllocationSummary> = inner
            .allocations
            .values()
            .filter(|a| state.is_none_or(|s| a.state == s))
            .filter(|a| job_id.is_none_or(|j| a.job_id == j))
            .map(|a| AllocationSummary {
                allocation_id: a.allocation_id,
                job_id: a.job_id.clone(),
                state: a.state,
                priority: a.priority,
                workers: a.worker_ids.len() as u32,
                age_seconds: a.age_seconds(now),
                is_expired: a.is_expired(now),
            })
            .collect();

        summaries.sort_by_key(|s| s.allocation_id);
        summaries
    }

    /// Release every active allocation whose TTL has elapsed.
    ///
    /// Goes through the same release path as an explicit release; an
    /// allocation already released by a concurrent caller is simply skipped.
    /// Returns the ids that were released by this sweep.
    pub fn cleanup_expired_allocations(&self) -> Vec<AllocationId> {
        self.cleanup_expired_allocations_at(Utc::now())
    }

    /// Like [`cleanup_expired_allocations`](Self::cleanup_expired_allocations),
    /// with an explicit clock for deterministic tests.
    pub fn cleanup_expired_allocations_at(&self, now: DateTime<Utc>) -> Vec<AllocationId> {
        let expired: Vec<AllocationId> = {
            let inner = self.lock();
            inner
                .allocations
                .values()
                .filter(|a| a.state == AllocationState::Active && a.is_expired(now))
                .map(|a| a.allocation_id)
                .collect()
        };

        let mut released = Vec::new();
        for allocation_id in expired {
            debug!(allocation_id = %allocation_id, "ttl elapsed, releasing");
            match self.release_resources_at(allocation_id, now) {
                ReleaseOutcome::Released { .. } => released.push(allocation_id),
                // Lost the race to an explicit release; nothing to do.
                ReleaseOutcome::AlreadyReleased { .. } | ReleaseOutcome::NotFound { .. } => {}
            }
        }

        if !released.is_empty() {
            info!(count = released.len(), "swept expired allocations");
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn registry() -> AllocationRegistry {
        AllocationRegistry::new(LedgerConfig::default())
    }

    fn request(job_id: &str, workers: u32) -> AllocationRequest {
        AllocationRequest {
            job_id: job_id.to_string(),
            services: vec![],
            workers,
            priority: Priority::Normal,
            ttl_seconds: 3600,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn request_activates_and_reserves() {
        let registry = registry();

        let allocation = registry.request_resources(request("j1", 4)).unwrap();
        assert_eq!(allocation.state, AllocationState::Active);
        assert_eq!(allocation.cpu_allocated, 4.0);
        assert_eq!(allocation.memory_allocated_mb, 8192);
        assert_eq!(
            allocation.worker_ids,
            vec![
                "worker-j1-000",
                "worker-j1-001",
                "worker-j1-002",
                "worker-j1-003"
            ]
        );

        let capacity = registry.get_capacity();
        assert_eq!(capacity.available_workers, 6);
        assert_eq!(capacity.active_allocations, 1);
    }

    #[test]
    fn shortfall_yields_failed_allocation_not_error() {
        let registry = registry();

        let allocation = registry.request_resources(request("j1", 12)).unwrap();
        assert_eq!(allocation.state, AllocationState::Failed);
        assert_eq!(
            allocation.error.as_deref(),
            Some("insufficient workers: requested 12, available 10")
        );

        // Pool untouched, record retained for query.
        let capacity = registry.get_capacity();
        assert_eq!(capacity.available_workers, 10);
        assert_eq!(capacity.active_allocations, 0);
        assert!(registry.get_allocation(allocation.allocation_id).is_some());
    }

    #[test]
    fn validation_rejected_before_pool_mutation() {
        let registry = registry();

        assert_eq!(
            registry.request_resources(request("", 2)).unwrap_err(),
            ValidationError::EmptyJobId
        );
        assert_eq!(
            registry.request_resources(request("j1", 101)).unwrap_err(),
            ValidationError::TooManyWorkers {
                requested: 101,
                limit: 100
            }
        );

        let mut bad_ttl = request("j1", 2);
        bad_ttl.ttl_seconds = 0;
        assert_eq!(
            registry.request_resources(bad_ttl).unwrap_err(),
            ValidationError::NonPositiveTtl(0)
        );

        assert_eq!(registry.get_capacity().available_workers, 10);
        assert!(registry.list_allocations(None, None).is_empty());
    }

    #[test]
    fn release_credits_once() {
        let registry = registry();
        let allocation = registry.request_resources(request("j1", 4)).unwrap();

        let outcome = registry.release_resources(allocation.allocation_id);
        match outcome {
            ReleaseOutcome::Released {
                workers_freed,
                cpu_freed,
                memory_freed_mb,
                ..
            } => {
                assert_eq!(workers_freed, 4);
                assert_eq!(cpu_freed, 4.0);
                assert_eq!(memory_freed_mb, 8192);
            }
            other => panic!("expected Released, got {other:?}"),
        }
        assert_eq!(registry.get_capacity().available_workers, 10);

        // Second release is idempotent: no double credit.
        let again = registry.release_resources(allocation.allocation_id);
        assert!(matches!(again, ReleaseOutcome::AlreadyReleased { .. }));
        assert_eq!(registry.get_capacity().available_workers, 10);
    }

    #[test]
    fn release_unknown_id_is_not_found() {
        let registry = registry();
        let outcome = registry.release_resources(AllocationId::new());
        assert!(matches!(outcome, ReleaseOutcome::NotFound { .. }));
    }

    #[test]
    fn release_reports_duration_from_activation() {
        let registry = registry();
        let t0 = Utc::now();
        let allocation = registry
            .request_resources_at(request("j1", 1), t0)
            .unwrap();

        let outcome =
            registry.release_resources_at(allocation.allocation_id, t0 + Duration::seconds(42));
        match outcome {
            ReleaseOutcome::Released {
                duration_seconds, ..
            } => assert_eq!(duration_seconds, 42.0),
            other => panic!("expected Released, got {other:?}"),
        }
    }

    #[test]
    fn capacity_reflects_active_services_only() {
        let registry = registry();

        let mut a = request("j1", 1);
        a.services = vec!["search".into(), "cache".into()];
        let mut b = request("j2", 1);
        b.services = vec!["cache".into(), "db".into()];

        let alloc_a = registry.request_resources(a).unwrap();
        registry.request_resources(b).unwrap();

        let capacity = registry.get_capacity();
        assert_eq!(capacity.reserved_services, vec!["cache", "db", "search"]);

        registry.release_resources(alloc_a.allocation_id);
        let capacity = registry.get_capacity();
        assert_eq!(capacity.reserved_services, vec!["cache", "db"]);
    }

    #[test]
    fn list_filters_are_independent() {
        let registry = registry();
        registry.request_resources(request("j1", 1)).unwrap();
        registry.request_resources(request("j2", 1)).unwrap();
        let failed = registry.request_resources(request("j2", 12)).unwrap();
        assert_eq!(failed.state, AllocationState::Failed);

        assert_eq!(registry.list_allocations(None, None).len(), 3);
        assert_eq!(
            registry
                .list_allocations(Some(AllocationState::Active), None)
                .len(),
            2
        );
        assert_eq!(registry.list_allocations(None, Some("j2")).len(), 2);
        assert_eq!(
            registry
                .list_allocations(Some(AllocationState::Failed), Some("j2"))
                .len(),
            1
        );
    }

    #[test]
    fn sweep_releases_exactly_the_expired() {
        let registry = registry();
        let t0 = Utc::now();

        let mut r1 = request("j1", 1);
        r1.ttl_seconds = 100;
        let mut r2 = request("j2", 1);
        r2.ttl_seconds = 100;
        let mut r3 = request("j3", 1);
        r3.ttl_seconds = 100;

        let a1 = registry.request_resources_at(r1, t0).unwrap();
        let a2 = registry
            .request_resources_at(r2, t0 + Duration::seconds(50))
            .unwrap();
        let a3 = registry
            .request_resources_at(r3, t0 + Duration::seconds(200))
            .unwrap();

        // At t0+130 only a1 (age 130) has exceeded its ttl of 100; a2 is at
        // age 80 and a3 has not started yet.
        let released = registry.cleanup_expired_allocations_at(t0 + Duration::seconds(130));
        assert_eq!(released, vec![a1.allocation_id]);

        let get = |id| registry.get_allocation(id).unwrap().state;
        assert_eq!(get(a1.allocation_id), AllocationState::Released);
        assert_eq!(get(a2.allocation_id), AllocationState::Active);
        assert_eq!(get(a3.allocation_id), AllocationState::Active);
        assert_eq!(registry.get_capacity().available_workers, 8);
    }

    #[test]
    fn sweep_is_idempotent() {
        let registry = registry();
        let t0 = Utc::now();
        let mut r = request("j1", 2);
        r.ttl_seconds = 10;
        registry.request_resources_at(r, t0).unwrap();

        let first = registry.cleanup_expired_allocations_at(t0 + Duration::seconds(20));
        assert_eq!(first.len(), 1);
        let second = registry.cleanup_expired_allocations_at(t0 + Duration::seconds(20));
        assert!(second.is_empty());
        assert_eq!(registry.get_capacity().available_workers, 10);
    }

    #[test]
    fn zero_worker_request_holds_no_capacity() {
        let registry = registry();
        let mut r = request("j1", 0);
        r.services = vec!["search".into()];

        let allocation = registry.request_resources(r).unwrap();
        assert_eq!(allocation.state, AllocationState::Active);
        assert!(allocation.worker_ids.is_empty());

        let capacity = registry.get_capacity();
        assert_eq!(capacity.available_workers, 10);
        assert_eq!(capacity.reserved_services, vec!["search"]);

        let outcome = registry.release_resources(allocation.allocation_id);
        assert!(matches!(
            outcome,
            ReleaseOutcome::Released {
                workers_freed: 0,
                ..
            }
        ));
    }
}
