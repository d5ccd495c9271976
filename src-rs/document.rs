//! In-memory document host backed by a JSON scene file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::render::{self, PaintNode};
use crate::scene::{
    DevResource, DevResources, ExportFormat, Exporter, NodeId, NodeKind, Paint, SceneGraph,
    SceneNode,
};

const MIN_RESCALE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFile {
    pub name: String,
    pub pages: Vec<PageFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page: Option<NodeId>,
    #[serde(default)]
    pub selection: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFile {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub children: Vec<NodeFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFile {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fills: Vec<Paint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dev_resources: Vec<DevResource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Free,
    Centered,
}

#[derive(Debug, Clone)]
struct NodeRecord {
    kind: NodeKind,
    name: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    fills: Vec<Paint>,
    characters: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    dev_resources: Vec<DevResource>,
    layout: Layout,
}

#[derive(Debug)]
struct DocumentTree {
    name: String,
    pages: Vec<NodeId>,
    current_page: NodeId,
    selection: Vec<NodeId>,
    nodes: HashMap<NodeId, NodeRecord>,
    next_transient: u64,
}

impl DocumentTree {
    fn from_file(file: DocumentFile) -> Result<Self> {
        let Some(first_page) = file.pages.first().map(|p| p.id.clone()) else {
            bail!("document '{}' has no pages", file.name);
        };
        let mut tree = DocumentTree {
            name: file.name,
            pages: Vec::new(),
            current_page: file.current_page.unwrap_or(first_page),
            selection: file.selection,
            nodes: HashMap::new(),
            next_transient: 1,
        };

        for page in file.pages {
            let mut children = Vec::with_capacity(page.children.len());
            for child in page.children {
                children.push(tree.insert_file_node(child, &page.id)?);
            }
            let record = NodeRecord {
                kind: NodeKind::Page,
                name: page.name,
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
                fills: Vec::new(),
                characters: None,
                parent: None,
                children,
                dev_resources: Vec::new(),
                layout: Layout::Free,
            };
            if tree.nodes.insert(page.id.clone(), record).is_some() {
                bail!("duplicate node id in document: {}", page.id);
            }
            tree.pages.push(page.id);
        }

        if !tree.pages.contains(&tree.current_page) {
            bail!("current page {} is not a page of the document", tree.current_page);
        }
        for id in &tree.selection {
            if !tree.nodes.contains_key(id) {
                bail!("selected node {id} does not exist");
            }
        }
        Ok(tree)
    }

    fn insert_file_node(&mut self, node: NodeFile, parent: &NodeId) -> Result<NodeId> {
        let id = node.id.clone();
        let mut children = Vec::with_capacity(node.children.len());
        for child in node.children {
            children.push(self.insert_file_node(child, &id)?);
        }
        let record = NodeRecord {
            kind: node.kind,
            name: node.name,
            x: node.x,
            y: node.y,
            width: node.width,
            height: node.height,
            fills: node.fills,
            characters: node.characters,
            parent: Some(parent.clone()),
            children,
            dev_resources: node.dev_resources,
            layout: Layout::Free,
        };
        if self.nodes.insert(id.clone(), record).is_some() {
            bail!("duplicate node id in document: {id}");
        }
        Ok(id)
    }

    fn to_file(&self) -> DocumentFile {
        let pages = self
            .pages
            .iter()
            .filter_map(|id| {
                let page = self.nodes.get(id)?;
                Some(PageFile {
                    id: id.clone(),
                    name: page.name.clone(),
                    children: page.children.iter().filter_map(|c| self.node_file(c)).collect(),
                })
            })
            .collect();
        DocumentFile {
            name: self.name.clone(),
            pages,
            current_page: Some(self.current_page.clone()),
            selection: self.selection.clone(),
        }
    }

    fn node_file(&self, id: &NodeId) -> Option<NodeFile> {
        let record = self.nodes.get(id)?;
        Some(NodeFile {
            id: id.clone(),
            kind: record.kind,
            name: record.name.clone(),
            x: record.x,
            y: record.y,
            width: record.width,
            height: record.height,
            fills: record.fills.clone(),
            characters: record.characters.clone(),
            children: record.children.iter().filter_map(|c| self.node_file(c)).collect(),
            dev_resources: record.dev_resources.clone(),
        })
    }

    fn get_mut(&mut self, id: &NodeId) -> Result<&mut NodeRecord, HostError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| HostError::MissingNode(id.clone()))
    }

    fn collect_descendants(&self, id: &NodeId, out: &mut Vec<NodeId>) {
        let Some(record) = self.nodes.get(id) else {
            return;
        };
        for child in &record.children {
            out.push(child.clone());
            self.collect_descendants(child, out);
        }
    }

    fn is_ancestor(&self, candidate: &NodeId, of: &NodeId) -> bool {
        let mut cursor = self.nodes.get(of).and_then(|r| r.parent.clone());
        while let Some(id) = cursor {
            if &id == candidate {
                return true;
            }
            cursor = self.nodes.get(&id).and_then(|r| r.parent.clone());
        }
        false
    }

    fn allocate_id(&mut self) -> NodeId {
        loop {
            let id = NodeId::new(format!("transient:{}", self.next_transient));
            self.next_transient += 1;
            if !self.nodes.contains_key(&id) {
                return id;
            }
        }
    }

    fn copy_subtree(&mut self, source: &NodeId, parent: Option<NodeId>) -> Option<NodeId> {
        let mut record = self.nodes.get(source)?.clone();
        let id = self.allocate_id();
        let source_children = std::mem::take(&mut record.children);
        record.parent = parent;
        self.nodes.insert(id.clone(), record);
        let copied: Vec<NodeId> = source_children
            .iter()
            .filter_map(|child| self.copy_subtree(child, Some(id.clone())))
            .collect();
        if let Some(record) = self.nodes.get_mut(&id) {
            record.children = copied;
        }
        Some(id)
    }

    fn detach(&mut self, id: &NodeId) {
        let parent = self.nodes.get(id).and_then(|r| r.parent.clone());
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| c != id);
        }
    }

    fn drop_subtree(&mut self, id: &NodeId) {
        if let Some(record) = self.nodes.remove(id) {
            for child in record.children {
                self.drop_subtree(&child);
            }
        }
        self.selection.retain(|s| s != id);
    }

    fn scale_subtree(&mut self, id: &NodeId, ratio: f64, is_root: bool) {
        let children = match self.nodes.get_mut(id) {
            Some(record) => {
                if !is_root {
                    record.x *= ratio;
                    record.y *= ratio;
                }
                record.width *= ratio;
                record.height *= ratio;
                record.children.clone()
            }
            None => return,
        };
        for child in children {
            self.scale_subtree(&child, ratio, false);
        }
    }

    fn paint_tree(&self, id: &NodeId, is_root: bool) -> Option<PaintNode> {
        let record = self.nodes.get(id)?;
        Some(PaintNode {
            kind: record.kind,
            x: if is_root { 0.0 } else { record.x },
            y: if is_root { 0.0 } else { record.y },
            width: record.width,
            height: record.height,
            fills: record.fills.clone(),
            characters: record.characters.clone(),
            children: record
                .children
                .iter()
                .filter_map(|c| self.paint_tree(c, false))
                .collect(),
        })
    }
}

/// A scene document held in memory. Every host call takes the document lock.
#[derive(Debug)]
pub struct MemoryDocument {
    tree: Mutex<DocumentTree>,
}

impl MemoryDocument {
    pub fn from_file(file: DocumentFile) -> Result<Self> {
        Ok(Self {
            tree: Mutex::new(DocumentTree::from_file(file)?),
        })
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: DocumentFile = serde_json::from_str(raw).context("invalid document JSON")?;
        Self::from_file(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read document: {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid document: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.snapshot())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
        fs::write(path, raw)
            .with_context(|| format!("failed to write document: {}", path.display()))?;
        Ok(())
    }

    pub fn snapshot(&self) -> DocumentFile {
        self.tree.lock().to_file()
    }

    pub fn name(&self) -> String {
        self.tree.lock().name.clone()
    }

    pub fn set_selection(&self, ids: Vec<NodeId>) -> Result<()> {
        let mut tree = self.tree.lock();
        for id in &ids {
            if !tree.nodes.contains_key(id) {
                bail!("cannot select unknown node {id}");
            }
        }
        tree.selection = ids;
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.tree.lock().nodes.len()
    }
}

impl SceneGraph for MemoryDocument {
    fn selection(&self) -> Vec<NodeId> {
        self.tree.lock().selection.clone()
    }

    fn node(&self, id: &NodeId) -> Option<SceneNode> {
        let tree = self.tree.lock();
        let record = tree.nodes.get(id)?;
        Some(
            SceneNode::new(
                id.clone(),
                record.kind,
                record.name.clone(),
                record.width,
                record.height,
                record.parent.clone(),
            )
            .with_children(record.children.clone())
            .with_fills(record.fills.clone()),
        )
    }

    fn descendants(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.tree.lock().collect_descendants(id, &mut out);
        out
    }

    fn set_name(&self, id: &NodeId, name: &str) -> Result<(), HostError> {
        let mut tree = self.tree.lock();
        tree.get_mut(id)?.name = name.to_string();
        Ok(())
    }

    fn clone_node(&self, id: &NodeId) -> Result<NodeId, HostError> {
        let mut tree = self.tree.lock();
        let record = tree
            .nodes
            .get(id)
            .ok_or_else(|| HostError::MissingNode(id.clone()))?;
        let Some(parent) = record.parent.clone() else {
            return Err(HostError::Structure(format!("cannot clone page {id}")));
        };
        let copy = tree
            .copy_subtree(id, Some(parent.clone()))
            .ok_or_else(|| HostError::MissingNode(id.clone()))?;
        let siblings = &mut tree.get_mut(&parent)?.children;
        let at = siblings.iter().position(|c| c == id).map_or(siblings.len(), |i| i + 1);
        siblings.insert(at, copy.clone());
        Ok(copy)
    }

    fn rescale(&self, id: &NodeId, ratio: f64) -> Result<(), HostError> {
        let mut tree = self.tree.lock();
        if !tree.nodes.contains_key(id) {
            return Err(HostError::MissingNode(id.clone()));
        }
        if !(ratio >= MIN_RESCALE) {
            return Err(HostError::InvalidScale {
                node: id.clone(),
                ratio,
            });
        }
        tree.scale_subtree(id, ratio, true);
        Ok(())
    }

    fn create_centered_frame(&self, size: f64) -> Result<NodeId, HostError> {
        let mut tree = self.tree.lock();
        let page = tree.current_page.clone();
        let id = tree.allocate_id();
        tree.nodes.insert(
            id.clone(),
            NodeRecord {
                kind: NodeKind::Frame,
                name: "Frame".to_string(),
                x: 0.0,
                y: 0.0,
                width: size,
                height: size,
                fills: vec![Paint::Solid {
                    color: "#FFFFFF".to_string(),
                }],
                characters: None,
                parent: Some(page.clone()),
                children: Vec::new(),
                dev_resources: Vec::new(),
                layout: Layout::Centered,
            },
        );
        tree.get_mut(&page)?.children.push(id.clone());
        Ok(id)
    }

    fn insert_child(
        &self,
        parent: &NodeId,
        index: usize,
        child: &NodeId,
    ) -> Result<(), HostError> {
        let mut tree = self.tree.lock();
        let parent_record = tree
            .nodes
            .get(parent)
            .ok_or_else(|| HostError::MissingNode(parent.clone()))?;
        if !parent_record.kind.has_children() {
            return Err(HostError::Structure(format!(
                "{} node {parent} cannot hold children",
                parent_record.kind
            )));
        }
        let (frame_w, frame_h, layout) =
            (parent_record.width, parent_record.height, parent_record.layout);
        if !tree.nodes.contains_key(child) {
            return Err(HostError::MissingNode(child.clone()));
        }
        if child == parent || tree.is_ancestor(child, parent) {
            return Err(HostError::Structure(format!(
                "cannot insert {child} into its own subtree"
            )));
        }

        tree.detach(child);
        let siblings = &mut tree.get_mut(parent)?.children;
        let at = index.min(siblings.len());
        siblings.insert(at, child.clone());

        let record = tree.get_mut(child)?;
        record.parent = Some(parent.clone());
        if layout == Layout::Centered {
            record.x = (frame_w - record.width) / 2.0;
            record.y = (frame_h - record.height) / 2.0;
        }
        Ok(())
    }

    fn remove(&self, id: &NodeId) {
        let mut tree = self.tree.lock();
        match tree.nodes.get(id) {
            Some(record) if record.kind != NodeKind::Page => {}
            _ => return,
        }
        tree.detach(id);
        tree.drop_subtree(id);
    }
}

impl Exporter for MemoryDocument {
    async fn export(&self, id: &NodeId, format: ExportFormat) -> Result<Vec<u8>, HostError> {
        let paint = self
            .tree
            .lock()
            .paint_tree(id, true)
            .ok_or_else(|| HostError::MissingNode(id.clone()))?;
        let raster = render::paint_subtree(&paint).ok_or_else(|| HostError::Export {
            node: id.clone(),
            reason: format!("node has no visible area ({}x{})", paint.width, paint.height),
        })?;
        render::encode(&raster, format).map_err(|err| HostError::Export {
            node: id.clone(),
            reason: err.to_string(),
        })
    }
}

impl DevResources for MemoryDocument {
    async fn dev_resources(&self, id: &NodeId) -> Result<Vec<DevResource>, HostError> {
        let tree = self.tree.lock();
        tree.nodes
            .get(id)
            .map(|r| r.dev_resources.clone())
            .ok_or_else(|| HostError::MissingNode(id.clone()))
    }

    async fn add_dev_resource(&self, id: &NodeId, url: &str, name: &str) -> Result<(), HostError> {
        let mut tree = self.tree.lock();
        let record = tree.get_mut(id)?;
        if record.dev_resources.iter().any(|r| r.url == url) {
            return Err(HostError::DuplicateResource {
                node: id.clone(),
                url: url.to_string(),
            });
        }
        record.dev_resources.push(DevResource {
            name: name.to_string(),
            url: url.to_string(),
        });
        Ok(())
    }

    async fn delete_dev_resource(&self, id: &NodeId, url: &str) -> Result<(), HostError> {
        let mut tree = self.tree.lock();
        tree.get_mut(id)?.dev_resources.retain(|r| r.url != url);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::card_document;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn descendants_are_listed_in_pre_order() {
        let doc = card_document();
        let ids: Vec<String> = doc
            .descendants(&"1:1".into())
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, vec!["1:2", "1:3", "1:4", "1:5", "1:6"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let raw = r#"{"name":"d","pages":[{"id":"0:1","name":"p","children":[
            {"id":"1:1","type":"FRAME","name":"a"},{"id":"1:1","type":"FRAME","name":"b"}]}]}"#;
        let err = MemoryDocument::from_json(raw).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate node id"));
    }

    #[test]
    fn clone_is_placed_after_source_with_fresh_ids() {
        let doc = card_document();
        let copy = doc.clone_node(&"1:4".into()).unwrap();
        let parent = doc.node(&"1:1".into()).unwrap();
        let children: Vec<&str> = parent.children().unwrap().iter().map(NodeId::as_str).collect();
        assert_eq!(children, vec!["1:2", "1:3", "1:4", copy.as_str()]);
        let copied = doc.descendants(&copy);
        assert_eq!(copied.len(), 2);
        assert!(copied.iter().all(|id| id.as_str().starts_with("transient:")));
        assert!(doc.clone_node(&"0:1".into()).is_err());
    }

    #[test]
    fn rescale_scales_descendants_and_rejects_tiny_ratios() {
        let doc = card_document();
        doc.rescale(&"1:4".into(), 0.5).unwrap();
        let group = doc.node(&"1:4".into()).unwrap();
        assert_eq!((group.width, group.height), (60.0, 20.0));
        let icon = doc.node(&"1:6".into()).unwrap();
        assert_eq!((icon.width, icon.height), (12.0, 12.0));

        let err = doc.rescale(&"1:4".into(), 0.0).unwrap_err();
        assert!(matches!(err, HostError::InvalidScale { .. }));
    }

    #[test]
    fn centered_frame_centers_inserted_child() {
        let doc = card_document();
        let frame = doc.create_centered_frame(224.0).unwrap();
        let copy = doc.clone_node(&"2:1".into()).unwrap();
        doc.insert_child(&frame, 0, &copy).unwrap();
        let raw = doc.snapshot();
        let frame_file = raw.pages[0]
            .children
            .iter()
            .find(|n| n.id == frame)
            .unwrap();
        assert_eq!(frame_file.children[0].x, 80.0);
        assert_eq!(frame_file.children[0].y, 96.0);

        doc.remove(&frame);
        assert!(doc.node(&copy).is_none());
        assert!(doc.node(&frame).is_none());
    }

    #[test]
    fn insert_child_rejects_cycles() {
        let doc = card_document();
        let err = doc.insert_child(&"1:4".into(), 0, &"1:1".into()).unwrap_err();
        assert!(matches!(err, HostError::Structure(_)));
    }

    #[test]
    fn remove_ignores_unknown_ids_and_pages() {
        let doc = card_document();
        let before = doc.node_count();
        doc.remove(&"9:9".into());
        doc.remove(&"0:1".into());
        assert_eq!(doc.node_count(), before);
    }

    #[tokio::test]
    async fn export_fails_for_zero_area_nodes() {
        let raw = r#"{"name":"d","pages":[{"id":"0:1","name":"p","children":[
            {"id":"1:1","type":"LINE","name":"rule","width":120,"height":0}]}]}"#;
        let doc = MemoryDocument::from_json(raw).unwrap();
        let err = doc.export(&"1:1".into(), ExportFormat::Jpg).await.unwrap_err();
        assert!(matches!(err, HostError::Export { .. }));
    }

    #[tokio::test]
    async fn dev_resources_reject_duplicate_urls() {
        let doc = card_document();
        let id: NodeId = "1:3".into();
        doc.add_dev_resource(&id, "https://a", "one").await.unwrap();
        let err = doc.add_dev_resource(&id, "https://a", "two").await.unwrap_err();
        assert!(matches!(err, HostError::DuplicateResource { .. }));
        doc.delete_dev_resource(&id, "https://a").await.unwrap();
        assert!(doc.dev_resources(&id).await.unwrap().is_empty());
    }

    #[test]
    fn save_round_trips_the_document_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("doc.json");
        let doc = card_document();
        doc.set_name(&"1:3".into(), "Image").unwrap();
        doc.save(&path).unwrap();
        let reloaded = MemoryDocument::load(&path).unwrap();
        assert_eq!(reloaded.snapshot(), doc.snapshot());
        assert_eq!(reloaded.node(&"1:3".into()).unwrap().name, "Image");
    }
}
