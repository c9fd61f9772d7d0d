//! Allocation records and lifecycle states.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use corral_id::AllocationId;
use serde::{Deserialize, Serialize};

use crate::capacity::ResourceDemand;

/// Allocation lifecycle state.
///
/// Transitions are linear: `Pending -> Active -> Releasing -> Released`,
/// with `Failed` as an alternative terminal state entered when the
/// reservation is rejected. `Released` and `Failed` records are retained
/// for query but excluded from capacity accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationState {
    Pending,
    Active,
    Releasing,
    Released,
    Failed,
}

impl AllocationState {
    /// Terminal states cannot transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Releasing => "releasing",
            Self::Released => "released",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for AllocationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "releasing" => Ok(Self::Releasing),
            "released" => Ok(Self::Released),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown allocation state: {other}")),
        }
    }
}

/// Job priority. Informational only; admission is strictly first-come.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// One reservation of pool capacity tied to a job.
///
/// Owned exclusively by the registry; callers hold only the id and receive
/// clones on query.
#[derive(Debug, Clone, Serialize)]
pub struct Allocation {
    pub allocation_id: AllocationId,
    pub job_id: String,
    pub state: AllocationState,
    pub priority: Priority,

    /// Named service instances this job asked for.
    pub services: Vec<String>,
    /// Worker slots requested.
    pub workers_requested: u32,
    /// Synthesized worker ids, `worker-<job_id>-<index>`.
    pub worker_ids: Vec<String>,

    /// Derived from worker count at admission time.
    pub cpu_allocated: f64,
    pub memory_allocated_mb: i64,

    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub ttl_seconds: i64,

    /// Shortfall description for failed allocations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Allocation {
    /// The amounts this allocation holds against the pool.
    ///
    /// Release always credits exactly these amounts back, never a
    /// recomputation.
    pub(crate) fn reserved(&self) -> ResourceDemand {
        ResourceDemand {
            cpu: self.cpu_allocated,
            memory_mb: self.memory_allocated_mb,
            workers: self.worker_ids.len() as u32,
        }
    }

    /// Age relative to activation (falls back to creation for records that
    /// never activated).
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        let reference = self.activated_at.unwrap_or(self.created_at);
        (now - reference).num_milliseconds() as f64 / 1000.0
    }

    /// Whether the TTL has elapsed. Terminal allocations never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.age_seconds(now) > self.ttl_seconds as f64
    }
}

/// Summary row returned by `list_allocations`.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationSummary {
    pub allocation_id: AllocationId,
    pub job_id: String,
    pub state: AllocationState,
    pub priority: Priority,
    pub workers: u32,
    pub age_seconds: f64,
    pub is_expired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;

    fn base_allocation(state: AllocationState) -> Allocation {
        Allocation {
            allocation_id: AllocationId::new(),
            job_id: "job-1".to_string(),
            state,
            priority: Priority::Normal,
            services: vec![],
            workers_requested: 2,
            worker_ids: vec!["worker-job-1-000".into(), "worker-job-1-001".into()],
            cpu_allocated: 2.0,
            memory_allocated_mb: 4096,
            created_at: Utc::now(),
            activated_at: Some(Utc::now()),
            released_at: None,
            ttl_seconds: 100,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn expiry_is_relative_to_activation() {
        let mut alloc = base_allocation(AllocationState::Active);
        let activated = Utc::now();
        alloc.activated_at = Some(activated);

        assert!(!alloc.is_expired(activated + Duration::seconds(99)));
        assert!(alloc.is_expired(activated + Duration::seconds(101)));
    }

    // ttl is 100; expiry requires age strictly greater than ttl.
    #[rstest]
    #[case(0, false)]
    #[case(99, false)]
    #[case(100, false)]
    #[case(101, true)]
    fn expiry_boundary_is_strict(#[case] age_secs: i64, #[case] expired: bool) {
        let alloc = base_allocation(AllocationState::Active);
        let activated = alloc.activated_at.unwrap();
        assert_eq!(
            alloc.is_expired(activated + Duration::seconds(age_secs)),
            expired
        );
    }

    #[test]
    fn terminal_allocations_never_expire() {
        let mut alloc = base_allocation(AllocationState::Released);
        let activated = alloc.activated_at.unwrap();
        assert!(!alloc.is_expired(activated + Duration::seconds(500)));

        alloc.state = AllocationState::Failed;
        assert!(!alloc.is_expired(activated + Duration::seconds(500)));
    }

    #[test]
    fn state_roundtrips_through_str() {
        for state in [
            AllocationState::Pending,
            AllocationState::Active,
            AllocationState::Releasing,
            AllocationState::Released,
            AllocationState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<AllocationState>(), Ok(state));
        }
    }
}
