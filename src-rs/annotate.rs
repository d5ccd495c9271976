use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::bridge::TopKProbability;
use crate::error::HostError;
use crate::scene::{DevResources, NodeId, SceneGraph};

/// Display-name prefix shared by every prediction link this plugin writes.
pub const PREDICTION_PREFIX: &str = "Prediction";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnnotateReport {
    pub node_found: bool,
    pub removed: usize,
    pub added: usize,
    pub failed: usize,
}

/// `"Prediction 1: Button (87%)"`
pub fn prediction_label(rank: usize, entry: &TopKProbability) -> String {
    format!(
        "{PREDICTION_PREFIX} {rank}: {} ({}%)",
        entry.class_name.name,
        (entry.probability * 100.0).round() as i64
    )
}

/// Replaces the node's prediction links with `top_k`, ranked from 1.
///
/// Stale `Prediction*` links are deleted concurrently and all deletions settle
/// before the first add; adds run in rank order. A node that no longer exists
/// is a no-op. Listing failures propagate, per-link failures are counted.
pub async fn annotate_top_k<H>(
    host: &H,
    node_id: &NodeId,
    top_k: &[TopKProbability],
) -> Result<AnnotateReport, HostError>
where
    H: SceneGraph + DevResources,
{
    let mut report = AnnotateReport::default();
    if host.node(node_id).is_none() {
        debug!(node = %node_id, "node gone before annotation; skipping");
        return Ok(report);
    }
    report.node_found = true;

    let existing = host.dev_resources(node_id).await?;
    let deletions = existing
        .iter()
        .filter(|link| link.name.starts_with(PREDICTION_PREFIX))
        .map(|link| host.delete_dev_resource(node_id, &link.url));
    for outcome in join_all(deletions).await {
        match outcome {
            Ok(()) => report.removed += 1,
            Err(err) => {
                warn!(node = %node_id, error = %err, "could not delete stale prediction link");
                report.failed += 1;
            }
        }
    }

    for (index, entry) in top_k.iter().enumerate() {
        let label = prediction_label(index + 1, entry);
        debug!(node = %node_id, url = %entry.class_name.url, %label, "adding prediction link");
        match host
            .add_dev_resource(node_id, &entry.class_name.url, &label)
            .await
        {
            Ok(()) => report.added += 1,
            Err(err) => {
                warn!(node = %node_id, error = %err, "could not add prediction link");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ClassName;
    use crate::document::fixtures::card_document;
    use crate::document::MemoryDocument;
    use crate::scene::{DevResource, SceneNode};
    use parking_lot::Mutex;

    /// Document wrapper whose deletes suspend before completing, logging every link call.
    struct SlowDeleteHost {
        doc: MemoryDocument,
        events: Mutex<Vec<String>>,
    }

    impl SceneGraph for SlowDeleteHost {
        fn selection(&self) -> Vec<NodeId> {
            self.doc.selection()
        }

        fn node(&self, id: &NodeId) -> Option<SceneNode> {
            self.doc.node(id)
        }

        fn descendants(&self, id: &NodeId) -> Vec<NodeId> {
            self.doc.descendants(id)
        }

        fn set_name(&self, id: &NodeId, name: &str) -> Result<(), HostError> {
            self.doc.set_name(id, name)
        }

        fn clone_node(&self, id: &NodeId) -> Result<NodeId, HostError> {
            self.doc.clone_node(id)
        }

        fn rescale(&self, id: &NodeId, ratio: f64) -> Result<(), HostError> {
            self.doc.rescale(id, ratio)
        }

        fn create_centered_frame(&self, size: f64) -> Result<NodeId, HostError> {
            self.doc.create_centered_frame(size)
        }

        fn insert_child(
            &self,
            parent: &NodeId,
            index: usize,
            child: &NodeId,
        ) -> Result<(), HostError> {
            self.doc.insert_child(parent, index, child)
        }

        fn remove(&self, id: &NodeId) {
            self.doc.remove(id)
        }
    }

    impl DevResources for SlowDeleteHost {
        async fn dev_resources(&self, id: &NodeId) -> Result<Vec<DevResource>, HostError> {
            self.doc.dev_resources(id).await
        }

        async fn add_dev_resource(
            &self,
            id: &NodeId,
            url: &str,
            name: &str,
        ) -> Result<(), HostError> {
            self.events.lock().push(format!("add {name}"));
            self.doc.add_dev_resource(id, url, name).await
        }

        async fn delete_dev_resource(&self, id: &NodeId, url: &str) -> Result<(), HostError> {
            self.events.lock().push(format!("delete-start {url}"));
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            self.events.lock().push(format!("delete-done {url}"));
            self.doc.delete_dev_resource(id, url).await
        }
    }

    fn entry(name: &str, url: &str, probability: f64) -> TopKProbability {
        TopKProbability {
            class_name: ClassName {
                name: name.to_string(),
                url: url.to_string(),
            },
            probability,
        }
    }

    #[test]
    fn label_rounds_probability_to_percent() {
        assert_eq!(
            prediction_label(1, &entry("Button", "u", 0.876)),
            "Prediction 1: Button (88%)"
        );
        assert_eq!(
            prediction_label(3, &entry("Card", "u", 0.005)),
            "Prediction 3: Card (1%)"
        );
    }

    #[tokio::test]
    async fn second_run_replaces_prediction_links_only() {
        let doc = card_document();
        let id: NodeId = "1:1".into();
        doc.add_dev_resource(&id, "https://storybook/card", "Storybook")
            .await
            .unwrap();

        annotate_top_k(
            &doc,
            &id,
            &[
                entry("Card", "https://docs/card", 0.7),
                entry("Modal", "https://docs/modal", 0.2),
                entry("Button", "https://docs/button", 0.1),
            ],
        )
        .await
        .unwrap();

        let report = annotate_top_k(
            &doc,
            &id,
            &[
                entry("Navbar", "https://docs/navbar", 0.6),
                entry("Card", "https://docs/card", 0.3),
            ],
        )
        .await
        .unwrap();
        assert_eq!(report.removed, 3);
        assert_eq!(report.added, 2);

        let names: Vec<String> = doc
            .dev_resources(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "Storybook",
                "Prediction 1: Navbar (60%)",
                "Prediction 2: Card (30%)"
            ]
        );
    }

    #[tokio::test]
    async fn missing_node_is_a_no_op() {
        let doc = card_document();
        let report = annotate_top_k(&doc, &"8:8".into(), &[entry("Card", "u", 1.0)])
            .await
            .unwrap();
        assert!(!report.node_found);
        assert_eq!(report.added, 0);
    }

    #[tokio::test]
    async fn duplicate_urls_within_one_payload_are_counted_as_failures() {
        let doc = card_document();
        let id: NodeId = "2:1".into();
        let report = annotate_top_k(
            &doc,
            &id,
            &[entry("Button", "https://docs/x", 0.5), entry("Chip", "https://docs/x", 0.4)],
        )
        .await
        .unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn every_delete_settles_before_ranked_adds_begin() {
        let doc = card_document();
        let id: NodeId = "1:4".into();
        for (url, name) in [
            ("https://docs/a", "Prediction 1: A (50%)"),
            ("https://docs/b", "Prediction 2: B (30%)"),
            ("https://docs/c", "Prediction 3: C (20%)"),
        ] {
            doc.add_dev_resource(&id, url, name).await.unwrap();
        }
        let host = SlowDeleteHost {
            doc,
            events: Mutex::new(Vec::new()),
        };

        let report = annotate_top_k(
            &host,
            &id,
            &[
                entry("Button", "https://docs/button", 0.8),
                entry("Chip", "https://docs/chip", 0.15),
                entry("Tag", "https://docs/tag", 0.05),
            ],
        )
        .await
        .unwrap();
        assert_eq!(report.removed, 3);
        assert_eq!(report.added, 3);

        let events = host.events.lock().clone();
        let first_add = events.iter().position(|e| e.starts_with("add ")).unwrap();
        let last_delete = events
            .iter()
            .rposition(|e| e.starts_with("delete-"))
            .unwrap();
        assert!(last_delete < first_add, "adds interleaved with deletes: {events:?}");
        // All three deletes were in flight together.
        assert!(events[..3].iter().all(|e| e.starts_with("delete-start")));

        let adds: Vec<&str> = events[first_add..].iter().map(String::as_str).collect();
        assert_eq!(
            adds,
            vec![
                "add Prediction 1: Button (80%)",
                "add Prediction 2: Chip (15%)",
                "add Prediction 3: Tag (5%)",
            ]
        );
    }
}
