//! # corral-id
//!
//! Typed identifiers for corral resources.
//!
//! ## Design Principles
//!
//! - IDs are system-generated; job identifiers are caller-controlled labels
//!   and are deliberately *not* typed IDs
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//! - IDs are typed to prevent mixing different resource kinds
//!
//! ## ID Format
//!
//! All resource IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Example: `alloc_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//!
//! This format provides:
//! - Type safety (prefix indicates resource kind)
//! - Sortability (ULID is time-ordered)
//! - Uniqueness (ULID has 80 bits of randomness)
//! - Human readability (clear prefixes)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_allocation_id() {
        let id = AllocationId::new();
        let parsed: AllocationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_wrong_prefix() {
        let foreign = format!("node_{}", Ulid::new());
        let err = AllocationId::parse(&foreign).unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn parse_rejects_empty() {
        assert_eq!(AllocationId::parse(""), Err(IdError::Empty));
    }

    #[test]
    fn serde_roundtrip() {
        let id = AllocationId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: AllocationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn ids_are_time_ordered() {
        let a = AllocationId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = AllocationId::new();
        assert!(a < b);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn roundtrip_any_ulid(bits in any::<u128>()) {
                let id = AllocationId::from_ulid(Ulid::from(bits));
                let parsed = AllocationId::parse(&id.to_string()).unwrap();
                prop_assert_eq!(id, parsed);
            }

            #[test]
            fn parse_never_panics_on_arbitrary_input(s in ".*") {
                let _ = AllocationId::parse(&s);
            }
        }
    }
}
