//! Worker destruction safety guards.
//!
//! The drain/destroy sequence is a small linear state machine:
//!
//! ```text
//! Schedulable -> Draining -> Drained -> Destroyed
//! ```
//!
//! `Destroyed` is terminal; the worker ceases to exist in this model.
//! Transitions are authorized by pure guard predicates over observed node
//! facts, so every precondition is testable in isolation. The guards
//! themselves never touch the cluster.

use serde::Serialize;

use crate::classifier::WorkerClassifier;
use crate::cluster::Node;
use crate::worker::{WorkerError, WorkerKind};

/// Observed position in the drain/destroy sequence.
///
/// Derived from cluster facts, not asserted locally: a cordoned node counts
/// as draining, and drain completion is whatever the cluster last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainState {
    /// Accepting new pods.
    Schedulable,
    /// Cordoned; pods are being evicted.
    Draining,
    /// Cordoned with eviction reported complete.
    Drained,
    /// Removed from the cluster.
    Destroyed,
}

impl DrainState {
    /// Drain may start from `Schedulable` and is idempotent from `Draining`
    /// or `Drained`.
    pub fn can_drain(&self) -> bool {
        matches!(self, Self::Schedulable | Self::Draining | Self::Drained)
    }

    /// Destroy (without force) requires the node to be out of scheduling.
    pub fn satisfies_drain_guard(&self) -> bool {
        matches!(self, Self::Draining | Self::Drained)
    }
}

/// Authorizes drain and destroy transitions.
pub struct WorkerSafetyGuard {
    classifier: WorkerClassifier,
}

impl WorkerSafetyGuard {
    pub fn new(classifier: WorkerClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &WorkerClassifier {
        &self.classifier
    }

    /// Derive the drain state from observed node facts.
    pub fn drain_state(&self, node: &Node) -> DrainState {
        if node.unschedulable {
            DrainState::Draining
        } else {
            DrainState::Schedulable
        }
    }

    /// Guard the drain transition.
    pub fn authorize_drain(&self, node: &Node) -> Result<(), WorkerError> {
        if self.drain_state(node).can_drain() {
            Ok(())
        } else {
            Err(WorkerError::Validation(format!(
                "worker {} cannot be drained from its current state",
                node.name
            )))
        }
    }

    /// Guard the destroy transition.
    ///
    /// Three ordered checks, each a hard stop:
    ///
    /// 1. Classification: permanent or protected workers are never
    ///    destroyable. `force` does not override this.
    /// 2. Drain: a schedulable worker is refused unless `force` is set.
    /// 3. Execution is then up to the caller (cluster removal, VM deletion).
    pub fn authorize_destroy(&self, node: &Node, force: bool) -> Result<(), WorkerError> {
        if self.classifier.classify(node) != WorkerKind::Elastic {
            return Err(WorkerError::SafetyViolation {
                name: node.name.clone(),
                reason: "worker is permanent; only elastic workers can be destroyed".to_string(),
            });
        }

        if self.classifier.is_protected(&node.name) {
            return Err(WorkerError::SafetyViolation {
                name: node.name.clone(),
                reason: "worker name matches a protected pattern".to_string(),
            });
        }

        if !self.drain_state(node).satisfies_drain_guard() && !force {
            return Err(WorkerError::NotDrained(node.name.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{ELASTIC_LABEL, ELASTIC_LABEL_VALUE};

    fn guard() -> WorkerSafetyGuard {
        WorkerSafetyGuard::new(WorkerClassifier::default())
    }

    fn elastic(name: &str, unschedulable: bool) -> Node {
        let mut node = Node {
            name: name.to_string(),
            unschedulable,
            ready: Some(true),
            ..Node::default()
        };
        node.labels
            .insert(ELASTIC_LABEL.to_string(), ELASTIC_LABEL_VALUE.to_string());
        node
    }

    fn permanent(name: &str) -> Node {
        Node {
            name: name.to_string(),
            ready: Some(true),
            ..Node::default()
        }
    }

    #[test]
    fn permanent_worker_is_inviolable() {
        let guard = guard();
        let node = permanent("w1");

        for force in [false, true] {
            let err = guard.authorize_destroy(&node, force).unwrap_err();
            assert!(matches!(err, WorkerError::SafetyViolation { .. }));
        }
    }

    #[test]
    fn protected_name_vetoes_even_elastic() {
        let guard = guard();
        let node = elastic("permanent-7", true);

        for force in [false, true] {
            let err = guard.authorize_destroy(&node, force).unwrap_err();
            assert!(matches!(err, WorkerError::SafetyViolation { .. }));
        }
    }

    #[test]
    fn classification_guard_runs_before_drain_guard() {
        // A non-drained permanent worker must fail on classification,
        // not on drain ordering.
        let guard = guard();
        let err = guard.authorize_destroy(&permanent("w1"), false).unwrap_err();
        assert!(matches!(err, WorkerError::SafetyViolation { .. }));
    }

    #[test]
    fn undrained_elastic_requires_force() {
        let guard = guard();
        let node = elastic("elastic-1", false);

        let err = guard.authorize_destroy(&node, false).unwrap_err();
        assert!(matches!(err, WorkerError::NotDrained(_)));

        guard.authorize_destroy(&node, true).unwrap();
    }

    #[test]
    fn drained_elastic_destroys_without_force() {
        let guard = guard();
        let node = elastic("elastic-1", true);
        guard.authorize_destroy(&node, false).unwrap();
    }

    #[test]
    fn drain_is_idempotent_from_draining() {
        let guard = guard();
        guard.authorize_drain(&elastic("elastic-1", false)).unwrap();
        guard.authorize_drain(&elastic("elastic-1", true)).unwrap();
    }

    #[test]
    fn drain_state_progression() {
        assert!(DrainState::Schedulable.can_drain());
        assert!(!DrainState::Schedulable.satisfies_drain_guard());
        assert!(DrainState::Draining.satisfies_drain_guard());
        assert!(DrainState::Drained.satisfies_drain_guard());
        assert!(!DrainState::Destroyed.can_drain());
    }
}
