//! Capability traits over the host document.
//!
//! The plugin core never owns scene nodes. It reads [`SceneNode`] snapshots and
//! mutates the document through [`SceneGraph`]; export and dev-resource calls
//! suspend like the host's async API does.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HostError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Page,
    Frame,
    Group,
    Rectangle,
    Text,
    Vector,
    Component,
    ComponentSet,
    Instance,
    Ellipse,
    Line,
    Polygon,
    Star,
    BooleanOperation,
    Section,
    #[serde(other)]
    Other,
}

impl NodeKind {
    /// Kinds whose whole subtree is pulled in by selection expansion.
    pub fn is_expandable(self) -> bool {
        matches!(self, NodeKind::Frame | NodeKind::Group)
    }

    /// Kinds that carry an ordered child list.
    pub fn has_children(self) -> bool {
        matches!(
            self,
            NodeKind::Page
                | NodeKind::Frame
                | NodeKind::Group
                | NodeKind::Component
                | NodeKind::ComponentSet
                | NodeKind::Instance
                | NodeKind::BooleanOperation
                | NodeKind::Section
        )
    }

    /// Kinds that expose a fill list.
    pub fn has_fills(self) -> bool {
        !matches!(self, NodeKind::Page | NodeKind::Group | NodeKind::Other)
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            NodeKind::Page => "PAGE",
            NodeKind::Frame => "FRAME",
            NodeKind::Group => "GROUP",
            NodeKind::Rectangle => "RECTANGLE",
            NodeKind::Text => "TEXT",
            NodeKind::Vector => "VECTOR",
            NodeKind::Component => "COMPONENT",
            NodeKind::ComponentSet => "COMPONENT_SET",
            NodeKind::Instance => "INSTANCE",
            NodeKind::Ellipse => "ELLIPSE",
            NodeKind::Line => "LINE",
            NodeKind::Polygon => "POLYGON",
            NodeKind::Star => "STAR",
            NodeKind::BooleanOperation => "BOOLEAN_OPERATION",
            NodeKind::Section => "SECTION",
            NodeKind::Other => "OTHER",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Paint {
    Solid {
        color: String,
    },
    Image {
        #[serde(rename = "imageHash", default, skip_serializing_if = "Option::is_none")]
        image_hash: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl Paint {
    pub fn is_image(&self) -> bool {
        matches!(self, Paint::Image { .. })
    }
}

/// An informational link attached to a node (name + target URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevResource {
    pub name: String,
    pub url: String,
}

/// Read-only view of one host node at the moment it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub width: f64,
    pub height: f64,
    pub parent: Option<NodeId>,
    children: Option<Vec<NodeId>>,
    fills: Option<Vec<Paint>>,
}

impl SceneNode {
    pub fn new(
        id: NodeId,
        kind: NodeKind,
        name: impl Into<String>,
        width: f64,
        height: f64,
        parent: Option<NodeId>,
    ) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            width,
            height,
            parent,
            children: kind.has_children().then(Vec::new),
            fills: kind.has_fills().then(Vec::new),
        }
    }

    pub fn with_children(mut self, children: Vec<NodeId>) -> Self {
        if self.kind.has_children() {
            self.children = Some(children);
        }
        self
    }

    pub fn with_fills(mut self, fills: Vec<Paint>) -> Self {
        if self.kind.has_fills() {
            self.fills = Some(fills);
        }
        self
    }

    /// Direct children, or `None` for leaf kinds.
    pub fn children(&self) -> Option<&[NodeId]> {
        self.children.as_deref()
    }

    /// Fill list, or `None` for kinds without fills.
    pub fn fills(&self) -> Option<&[Paint]> {
        self.fills.as_deref()
    }

    pub fn first_fill(&self) -> Option<&Paint> {
        self.fills().and_then(|fills| fills.first())
    }

    pub fn largest_measure(&self) -> f64 {
        self.width.max(self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Jpg,
    Png,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Jpg => "jpg",
            ExportFormat::Png => "png",
        }
    }
}

/// Synchronous scene access. The host serializes every call.
pub trait SceneGraph {
    /// Top-level nodes currently selected on the active page.
    fn selection(&self) -> Vec<NodeId>;

    fn node(&self, id: &NodeId) -> Option<SceneNode>;

    /// Every descendant of `id` in depth-first pre-order, excluding `id`.
    fn descendants(&self, id: &NodeId) -> Vec<NodeId>;

    fn set_name(&self, id: &NodeId, name: &str) -> Result<(), HostError>;

    /// Deep-copies `id` next to the original and returns the copy's id.
    fn clone_node(&self, id: &NodeId) -> Result<NodeId, HostError>;

    fn rescale(&self, id: &NodeId, ratio: f64) -> Result<(), HostError>;

    /// Creates a fixed-size square frame that centers its children on both axes.
    fn create_centered_frame(&self, size: f64) -> Result<NodeId, HostError>;

    fn insert_child(&self, parent: &NodeId, index: usize, child: &NodeId)
        -> Result<(), HostError>;

    /// Removes `id` and its subtree. Unknown ids are ignored.
    fn remove(&self, id: &NodeId);
}

pub trait Exporter {
    async fn export(&self, id: &NodeId, format: ExportFormat) -> Result<Vec<u8>, HostError>;
}

pub trait DevResources {
    async fn dev_resources(&self, id: &NodeId) -> Result<Vec<DevResource>, HostError>;

    async fn add_dev_resource(&self, id: &NodeId, url: &str, name: &str)
        -> Result<(), HostError>;

    async fn delete_dev_resource(&self, id: &NodeId, url: &str) -> Result<(), HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_uses_host_wire_names() {
        let kind: NodeKind = serde_json::from_str("\"COMPONENT_SET\"").unwrap();
        assert_eq!(kind, NodeKind::ComponentSet);
        let unknown: NodeKind = serde_json::from_str("\"WASHI_TAPE\"").unwrap();
        assert_eq!(unknown, NodeKind::Other);
        assert_eq!(serde_json::to_string(&NodeKind::Text).unwrap(), "\"TEXT\"");
    }

    #[test]
    fn leaf_snapshots_have_no_children() {
        let rect = SceneNode::new("1:1".into(), NodeKind::Rectangle, "r", 10.0, 20.0, None)
            .with_children(vec!["1:2".into()]);
        assert!(rect.children().is_none());
        assert_eq!(rect.largest_measure(), 20.0);

        let group = SceneNode::new("1:3".into(), NodeKind::Group, "g", 1.0, 1.0, None)
            .with_fills(vec![Paint::Other]);
        assert!(group.fills().is_none());
        assert!(group.children().is_some());
    }

    #[test]
    fn paint_parses_image_and_unknown_fills() {
        let paints: Vec<Paint> = serde_json::from_str(
            r##"[{"type":"IMAGE","imageHash":"abc"},{"type":"GRADIENT_LINEAR"},{"type":"SOLID","color":"#ff0000"}]"##,
        )
        .unwrap();
        assert!(paints[0].is_image());
        assert_eq!(paints[1], Paint::Other);
        assert!(!paints[2].is_image());
    }
}
