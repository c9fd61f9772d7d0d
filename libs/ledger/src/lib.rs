//! # corral-ledger
//!
//! The in-memory resource allocation ledger. Tracks cluster capacity
//! (CPU, memory, worker slots), allocation lifecycle, and TTL-based expiry.
//!
//! Key concepts:
//!
//! - **CapacityPool**: the single source of truth for allocated vs total
//!   capacity. Reservation and release are its only two mutators, and they
//!   are inverses.
//! - **AllocationRegistry**: owns allocation records and serializes all
//!   reserve/release decisions on one lock, so two concurrent requests can
//!   never both observe headroom and both succeed beyond capacity.
//! - **Expiry sweep**: releases allocations whose TTL has elapsed through
//!   the same release path used for explicit release.
//!
//! # Invariants
//!
//! - `0 <= allocated <= total` for every dimension, at all times
//! - A released or failed allocation is never counted against capacity
//! - Release is idempotent: capacity is credited exactly once per allocation
//!
//! State is volatile by design; the ledger is constructed with configured
//! totals and torn down with the process.

mod allocation;
mod capacity;
mod registry;

pub use allocation::{Allocation, AllocationState, AllocationSummary, Priority};
pub use capacity::{CapacityPool, CapacitySnapshot, Dimension, ResourceDemand, Shortfall};
pub use registry::{
    AllocationRegistry, AllocationRequest, LedgerConfig, ReleaseOutcome, ValidationError,
};
