use tracing::{debug, warn};

use crate::bridge::PredictionResult;
use crate::config::RESERVED_CONTAINER_NAMES;
use crate::scene::{NodeId, NodeKind, SceneGraph, SceneNode};

/// Name every candidate is reset to before predictions are applied.
pub const PLACEHOLDER_NAME: &str = "Frame";
pub const IMAGE_NAME: &str = "Image";
pub const PARAGRAPH_CONTAINER_NAME: &str = "Paragraph container";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub predicted: usize,
    pub exceptions: usize,
    pub parents_relabelled: usize,
    pub missing: usize,
}

/// Renames `nodes` from `predictions`, in order.
///
/// Per node: reset to the placeholder, take the last matching prediction,
/// then let the image and paragraph exceptions override it, and finally label
/// the parent `"<name> container"` when it carries the same name.
pub fn apply_predictions<G: SceneGraph>(
    graph: &G,
    nodes: &[NodeId],
    predictions: &[PredictionResult],
) -> ApplyReport {
    let mut report = ApplyReport::default();
    for id in nodes {
        let Some(node) = graph.node(id) else {
            report.missing += 1;
            continue;
        };

        let mut name = PLACEHOLDER_NAME.to_string();
        if let Some(hit) = predictions.iter().rev().find(|p| &p.node_id == id) {
            name = hit.prediction.clone();
            report.predicted += 1;
        }
        if let Some(exception) = exception_name(graph, &node) {
            name = exception.to_string();
            report.exceptions += 1;
        }
        if rename(graph, id, &name) && relabel_parent(graph, &node, &name) {
            report.parents_relabelled += 1;
        }
    }
    report
}

fn exception_name<G: SceneGraph>(graph: &G, node: &SceneNode) -> Option<&'static str> {
    if node.kind == NodeKind::Rectangle && node.first_fill().is_some_and(|f| f.is_image()) {
        return Some(IMAGE_NAME);
    }
    if node.kind.is_expandable() {
        let descendants = graph.descendants(&node.id);
        if descendants.len() > 1
            && descendants
                .iter()
                .all(|d| graph.node(d).is_some_and(|n| n.kind == NodeKind::Text))
        {
            return Some(PARAGRAPH_CONTAINER_NAME);
        }
    }
    None
}

fn rename<G: SceneGraph>(graph: &G, id: &NodeId, name: &str) -> bool {
    match graph.set_name(id, name) {
        Ok(()) => true,
        Err(err) => {
            warn!(node = %id, error = %err, "could not rename node");
            false
        }
    }
}

fn relabel_parent<G: SceneGraph>(graph: &G, node: &SceneNode, name: &str) -> bool {
    let Some(parent) = node.parent.as_ref().and_then(|p| graph.node(p)) else {
        return false;
    };
    if parent.name != name || RESERVED_CONTAINER_NAMES.contains(&parent.name.as_str()) {
        return false;
    }
    let label = format!("{name} container");
    debug!(parent = %parent.id, child = %node.id, %label, "relabelling parent");
    rename(graph, &parent.id, &label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EXCLUDED_TYPES;
    use crate::document::fixtures::card_document;
    use crate::document::MemoryDocument;
    use crate::selection::expand;

    fn prediction(id: &str, label: &str) -> PredictionResult {
        PredictionResult {
            node_id: id.into(),
            prediction: label.to_string(),
        }
    }

    fn name_of(doc: &MemoryDocument, id: &str) -> String {
        doc.node(&id.into()).unwrap().name
    }

    #[test]
    fn predictions_rename_and_unmatched_nodes_get_placeholder() {
        let doc = card_document();
        let nodes = expand(&doc, &doc.selection(), DEFAULT_EXCLUDED_TYPES, false);
        let report = apply_predictions(
            &doc,
            &nodes,
            &[prediction("1:4", "Navbar"), prediction("7:7", "Ghost")],
        );
        assert_eq!(name_of(&doc, "1:1"), "Frame");
        assert_eq!(name_of(&doc, "1:4"), "Navbar");
        assert_eq!(name_of(&doc, "1:5"), "Frame");
        assert_eq!(report.predicted, 1);
        // excluded kinds are never touched
        assert_eq!(name_of(&doc, "1:2"), "Title");
        assert_eq!(name_of(&doc, "1:6"), "Icon");
    }

    #[test]
    fn last_duplicate_prediction_wins() {
        let doc = card_document();
        apply_predictions(
            &doc,
            &["2:1".into()],
            &[prediction("2:1", "Badge"), prediction("2:1", "Button")],
        );
        assert_eq!(name_of(&doc, "2:1"), "Button");
    }

    #[test]
    fn image_rectangle_is_named_image_regardless_of_prediction() {
        let doc = card_document();
        apply_predictions(&doc, &["1:3".into()], &[]);
        assert_eq!(name_of(&doc, "1:3"), "Image");
        apply_predictions(&doc, &["1:3".into()], &[prediction("1:3", "Avatar")]);
        assert_eq!(name_of(&doc, "1:3"), "Image");
    }

    #[test]
    fn text_only_frame_becomes_paragraph_container() {
        let raw = r#"{"name":"d","pages":[{"id":"0:1","name":"p","children":[
            {"id":"1:1","type":"FRAME","name":"Copy","children":[
                {"id":"1:2","type":"TEXT","name":"a"},
                {"id":"1:3","type":"TEXT","name":"b"},
                {"id":"1:4","type":"TEXT","name":"c"}]},
            {"id":"2:1","type":"GROUP","name":"Single","children":[
                {"id":"2:2","type":"TEXT","name":"only"}]}]}]}"#;
        let doc = MemoryDocument::from_json(raw).unwrap();
        apply_predictions(
            &doc,
            &["1:1".into(), "2:1".into()],
            &[prediction("1:1", "Button"), prediction("2:1", "Label")],
        );
        assert_eq!(name_of(&doc, "1:1"), "Paragraph container");
        // one text child is not enough
        assert_eq!(name_of(&doc, "2:1"), "Label");
    }

    #[test]
    fn parent_sharing_the_child_name_is_relabelled() {
        let raw = r#"{"name":"d","pages":[{"id":"0:1","name":"p","children":[
            {"id":"1:1","type":"FRAME","name":"Button","children":[
                {"id":"1:2","type":"RECTANGLE","name":"bg"}]},
            {"id":"2:1","type":"FRAME","name":"Card","children":[
                {"id":"2:2","type":"RECTANGLE","name":"bg"}]}]}]}"#;
        let doc = MemoryDocument::from_json(raw).unwrap();
        let report = apply_predictions(
            &doc,
            &["1:2".into(), "2:2".into()],
            &[prediction("1:2", "Button"), prediction("2:2", "Card")],
        );
        assert_eq!(name_of(&doc, "1:1"), "Button container");
        assert_eq!(name_of(&doc, "2:1"), "Card");
        assert_eq!(report.parents_relabelled, 1);
    }

    #[test]
    fn parent_rule_sees_the_post_exception_name() {
        let raw = r#"{"name":"d","pages":[{"id":"0:1","name":"p","children":[
            {"id":"1:1","type":"FRAME","name":"frameA","children":[
                {"id":"1:2","type":"RECTANGLE","name":"rectA","fills":[{"type":"IMAGE"}]}]}]}]}"#;
        let doc = MemoryDocument::from_json(raw).unwrap();
        let nodes = expand(&doc, &["1:1".into()], DEFAULT_EXCLUDED_TYPES, false);
        assert_eq!(nodes.len(), 2);

        apply_predictions(&doc, &nodes, &[]);

        // frameA is "Frame" when rectA is processed, which matches rectA's
        // placeholder but not its final "Image" name.
        assert_eq!(name_of(&doc, "1:1"), "Frame");
        assert_eq!(name_of(&doc, "1:2"), "Image");
    }

    #[test]
    fn applying_twice_reaches_the_same_names() {
        let doc = card_document();
        let nodes = expand(&doc, &doc.selection(), DEFAULT_EXCLUDED_TYPES, false);
        let predictions = [
            prediction("1:1", "Card"),
            prediction("1:4", "Button"),
            prediction("1:5", "Button"),
        ];
        apply_predictions(&doc, &nodes, &predictions);
        let once = doc.snapshot();
        assert_eq!(name_of(&doc, "1:4"), "Button container");

        apply_predictions(&doc, &nodes, &predictions);
        assert_eq!(doc.snapshot(), once);
    }

    #[test]
    fn vanished_nodes_are_counted_not_fatal() {
        let doc = card_document();
        let report = apply_predictions(&doc, &["4:4".into()], &[prediction("4:4", "Button")]);
        assert_eq!(report.missing, 1);
        assert_eq!(report.predicted, 0);
    }
}
