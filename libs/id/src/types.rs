//! Typed ID definitions for corral resources.
//!
//! Each ID type has a unique prefix that identifies the resource kind.
//! IDs are ULID-based for sortability and uniqueness.

use crate::define_id;

/// Identifies one resource allocation in the ledger.
define_id!(AllocationId, "alloc");
