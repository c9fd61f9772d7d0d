//! Capacity accounting for the shared pool.

use serde::Serialize;
use tracing::warn;

/// A resource dimension tracked by the pool.
///
/// The declaration order is also the shortfall reporting order: when a
/// reservation fails on several dimensions at once, the first insufficient
/// dimension in this order is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Workers,
    Cpu,
    Memory,
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workers => write!(f, "workers"),
            Self::Cpu => write!(f, "cpu"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// The amount of each dimension a reservation needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceDemand {
    pub cpu: f64,
    pub memory_mb: i64,
    pub workers: u32,
}

impl ResourceDemand {
    pub const ZERO: Self = Self {
        cpu: 0.0,
        memory_mb: 0,
        workers: 0,
    };

    pub fn is_zero(&self) -> bool {
        self.workers == 0 && self.cpu == 0.0 && self.memory_mb == 0
    }
}

/// The dimension that lacked headroom for a reservation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shortfall {
    pub dimension: Dimension,
    pub requested: f64,
    pub available: f64,
}

impl std::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.dimension {
            Dimension::Workers => write!(
                f,
                "insufficient workers: requested {}, available {}",
                self.requested as u32, self.available as u32
            ),
            Dimension::Cpu => write!(
                f,
                "insufficient cpu: requested {}, available {}",
                self.requested, self.available
            ),
            Dimension::Memory => write!(
                f,
                "insufficient memory: requested {}MB, available {}MB",
                self.requested as i64, self.available as i64
            ),
        }
    }
}

/// The mutable ledger of total vs allocated capacity.
///
/// The pool is the single source of truth; it is never recomputed by summing
/// allocations. `reserve` and `release` are its only mutators.
#[derive(Debug, Clone)]
pub struct CapacityPool {
    total_cpu: f64,
    total_memory_mb: i64,
    total_workers: u32,

    allocated_cpu: f64,
    allocated_memory_mb: i64,
    allocated_workers: u32,
}

impl CapacityPool {
    /// Create a pool with the configured totals and nothing allocated.
    pub fn new(total_cpu: f64, total_memory_mb: i64, total_workers: u32) -> Self {
        Self {
            total_cpu,
            total_memory_mb,
            total_workers,
            allocated_cpu: 0.0,
            allocated_memory_mb: 0,
            allocated_workers: 0,
        }
    }

    pub fn available_cpu(&self) -> f64 {
        self.total_cpu - self.allocated_cpu
    }

    pub fn available_memory_mb(&self) -> i64 {
        self.total_memory_mb - self.allocated_memory_mb
    }

    pub fn available_workers(&self) -> u32 {
        self.total_workers - self.allocated_workers
    }

    /// Reserve capacity in every dimension, or nothing at all.
    ///
    /// Dimensions are checked in the fixed order workers, cpu, memory; the
    /// first insufficient one is returned and the pool is left untouched.
    pub fn reserve(&mut self, demand: ResourceDemand) -> Result<(), Shortfall> {
        if demand.workers > self.available_workers() {
            return Err(Shortfall {
                dimension: Dimension::Workers,
                requested: f64::from(demand.workers),
                available: f64::from(self.available_workers()),
            });
        }

        if demand.cpu > self.available_cpu() {
            return Err(Shortfall {
                dimension: Dimension::Cpu,
                requested: demand.cpu,
                available: self.available_cpu(),
            });
        }

        if demand.memory_mb > self.available_memory_mb() {
            return Err(Shortfall {
                dimension: Dimension::Memory,
                requested: demand.memory_mb as f64,
                available: self.available_memory_mb() as f64,
            });
        }

        self.allocated_workers += demand.workers;
        self.allocated_cpu += demand.cpu;
        self.allocated_memory_mb += demand.memory_mb;
        Ok(())
    }

    /// Credit capacity back to the pool.
    ///
    /// Saturating: `allocated` never drops below zero, even under duplicate
    /// or out-of-order release calls. A clamp indicates an accounting
    /// inconsistency upstream and is logged, but is not fatal.
    pub fn release(&mut self, demand: ResourceDemand) {
        if demand.workers > self.allocated_workers
            || demand.cpu > self.allocated_cpu
            || demand.memory_mb > self.allocated_memory_mb
        {
            warn!(
                release_workers = demand.workers,
                release_cpu = demand.cpu,
                release_memory_mb = demand.memory_mb,
                allocated_workers = self.allocated_workers,
                allocated_cpu = self.allocated_cpu,
                allocated_memory_mb = self.allocated_memory_mb,
                "release exceeds allocated capacity, clamping to zero"
            );
        }

        self.allocated_workers = self.allocated_workers.saturating_sub(demand.workers);
        self.allocated_cpu = (self.allocated_cpu - demand.cpu).max(0.0);
        self.allocated_memory_mb = (self.allocated_memory_mb - demand.memory_mb).max(0);
    }

    pub(crate) fn snapshot(&self) -> CapacitySnapshot {
        CapacitySnapshot {
            total_cpu: self.total_cpu,
            total_memory_mb: self.total_memory_mb,
            total_workers: self.total_workers,
            allocated_cpu: self.allocated_cpu,
            allocated_memory_mb: self.allocated_memory_mb,
            allocated_workers: self.allocated_workers,
            available_cpu: self.available_cpu(),
            available_memory_mb: self.available_memory_mb(),
            available_workers: self.available_workers(),
            active_allocations: 0,
            reserved_services: Vec::new(),
        }
    }
}

/// Point-in-time read of pool state, reflecting active allocations only.
#[derive(Debug, Clone, Serialize)]
pub struct CapacitySnapshot {
    pub total_cpu: f64,
    pub total_memory_mb: i64,
    pub total_workers: u32,
    pub allocated_cpu: f64,
    pub allocated_memory_mb: i64,
    pub allocated_workers: u32,
    pub available_cpu: f64,
    pub available_memory_mb: i64,
    pub available_workers: u32,
    pub active_allocations: usize,
    pub reserved_services: Vec<String>,
}
