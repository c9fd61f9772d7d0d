//! Worker classification.
//!
//! Derives a worker's kind (permanent vs elastic) and protection status
//! from node metadata. Classification is a stateless query: nothing here
//! mutates cluster state or the ledger.

use crate::cluster::Node;
use crate::worker::{WorkerKind, WorkerStatus, ELASTIC_LABEL, ELASTIC_LABEL_VALUE, TTL_ANNOTATION};

/// Derives worker kind, status, and protection from node metadata.
#[derive(Debug, Clone)]
pub struct WorkerClassifier {
    /// Name prefixes that veto destruction regardless of classification.
    protected_prefixes: Vec<String>,
}

impl WorkerClassifier {
    pub fn new(protected_prefixes: Vec<String>) -> Self {
        Self { protected_prefixes }
    }

    /// A worker is elastic only if it carries an explicit elastic marker:
    /// the elastic-class label or a TTL annotation. Absence of both means
    /// permanent.
    pub fn classify(&self, node: &Node) -> WorkerKind {
        if node.labels.get(ELASTIC_LABEL).map(String::as_str) == Some(ELASTIC_LABEL_VALUE) {
            return WorkerKind::Elastic;
        }
        if node.annotations.contains_key(TTL_ANNOTATION) {
            return WorkerKind::Elastic;
        }
        WorkerKind::Permanent
    }

    /// Protection is an independent veto: a name matching any protected
    /// prefix blocks destruction even for nodes carrying the elastic marker.
    pub fn is_protected(&self, worker_name: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|prefix| worker_name.starts_with(prefix.as_str()))
    }

    /// Derive observed status from node facts. Cordoned nodes are draining
    /// whatever their Ready condition says.
    pub fn status(&self, node: &Node) -> WorkerStatus {
        if node.unschedulable {
            return WorkerStatus::Draining;
        }
        match node.ready {
            Some(true) => WorkerStatus::Ready,
            Some(false) | None => WorkerStatus::NotReady,
        }
    }
}

impl Default for WorkerClassifier {
    fn default() -> Self {
        Self::new(vec![
            "control-plane-".to_string(),
            "permanent-".to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn node(name: &str) -> Node {
        Node {
            name: name.to_string(),
            ready: Some(true),
            ..Node::default()
        }
    }

    fn elastic_node(name: &str) -> Node {
        let mut n = node(name);
        n.labels
            .insert(ELASTIC_LABEL.to_string(), ELASTIC_LABEL_VALUE.to_string());
        n
    }

    #[test]
    fn unmarked_node_is_permanent() {
        let classifier = WorkerClassifier::default();
        assert_eq!(classifier.classify(&node("w1")), WorkerKind::Permanent);
    }

    #[test]
    fn elastic_label_marks_elastic() {
        let classifier = WorkerClassifier::default();
        assert_eq!(
            classifier.classify(&elastic_node("w1")),
            WorkerKind::Elastic
        );
    }

    #[test]
    fn ttl_annotation_marks_elastic() {
        let classifier = WorkerClassifier::default();
        let mut n = node("w1");
        n.annotations.insert(
            TTL_ANNOTATION.to_string(),
            "2026-01-01T00:00:00Z".to_string(),
        );
        assert_eq!(classifier.classify(&n), WorkerKind::Elastic);
    }

    #[test]
    fn other_label_values_stay_permanent() {
        let classifier = WorkerClassifier::default();
        let mut n = node("w1");
        n.labels
            .insert(ELASTIC_LABEL.to_string(), "spot".to_string());
        assert_eq!(classifier.classify(&n), WorkerKind::Permanent);
    }

    #[rstest]
    #[case("control-plane-0", true)]
    #[case("permanent-worker-1", true)]
    #[case("elastic-17", false)]
    #[case("worker-a", false)]
    fn protection_matches_prefixes(#[case] name: &str, #[case] protected: bool) {
        let classifier = WorkerClassifier::default();
        assert_eq!(classifier.is_protected(name), protected);
    }

    #[test]
    fn protection_is_independent_of_marker() {
        // Elastic marker does not lift name-based protection.
        let classifier = WorkerClassifier::default();
        let n = elastic_node("permanent-3");
        assert_eq!(classifier.classify(&n), WorkerKind::Elastic);
        assert!(classifier.is_protected(&n.name));
    }

    #[test]
    fn cordoned_node_is_draining() {
        let classifier = WorkerClassifier::default();
        let mut n = node("w1");
        n.unschedulable = true;
        assert_eq!(classifier.status(&n), WorkerStatus::Draining);
    }

    #[rstest]
    #[case(Some(true), WorkerStatus::Ready)]
    #[case(Some(false), WorkerStatus::NotReady)]
    #[case(None, WorkerStatus::NotReady)]
    fn status_follows_ready_condition(
        #[case] ready: Option<bool>,
        #[case] expected: WorkerStatus,
    ) {
        let classifier = WorkerClassifier::default();
        let mut n = node("w1");
        n.ready = ready;
        assert_eq!(classifier.status(&n), expected);
    }
}
