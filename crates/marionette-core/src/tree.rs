//! Per-aspect runtime trees and their JSON rendering.
//!
//! Managers hand back subtrees behind a shared lock because the same subtree
//! is serialized for the client and then has its transient `modified` flags
//! reset before the next read.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One node of a model or simulation tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Node name, unique among its siblings.
    pub id: String,
    /// Leaf value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Child nodes in insertion order.
    #[serde(default)]
    pub children: Vec<TreeNode>,
    /// Set when the node changed since the client last read it.
    #[serde(skip)]
    pub modified: bool,
}

impl TreeNode {
    /// A branch node with no value.
    pub fn branch(id: impl Into<String>, children: Vec<TreeNode>) -> Self {
        Self {
            id: id.into(),
            value: None,
            children,
            modified: false,
        }
    }

    /// A leaf node carrying a value.
    pub fn leaf(id: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            value: Some(value.into()),
            children: Vec::new(),
            modified: false,
        }
    }

    /// Mark this node as changed.
    #[must_use]
    pub fn touched(mut self) -> Self {
        self.modified = true;
        self
    }

    /// Clear `modified` on this node and every descendant.
    pub fn clear_modified(&mut self) {
        self.modified = false;
        for child in &mut self.children {
            child.clear_modified();
        }
    }

    /// Whether this node or any descendant is modified.
    pub fn any_modified(&self) -> bool {
        self.modified || self.children.iter().any(TreeNode::any_modified)
    }
}

/// The tree belonging to one aspect.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AspectSubtree {
    /// Instance path of the owning aspect.
    pub instance_path: String,
    /// Root of the tree.
    pub root: TreeNode,
}

impl AspectSubtree {
    /// Wrap a root node for an aspect.
    pub fn new(instance_path: impl Into<String>, root: TreeNode) -> Self {
        Self {
            instance_path: instance_path.into(),
            root,
        }
    }

    /// Put the subtree behind a shared lock.
    pub fn shared(self) -> SharedSubtree {
        Arc::new(RwLock::new(self))
    }
}

/// Subtree shared between the manager and the dispatcher.
pub type SharedSubtree = Arc<RwLock<AspectSubtree>>;

/// Subtrees keyed by aspect instance path, in first-seen order.
pub type SubtreeMap = IndexMap<String, SharedSubtree>;

/// Converts subtrees into JSON objects and clears transient flags.
pub trait TreeSerializer: Send + Sync {
    /// Render a subtree as a JSON object.
    fn serialize(&self, subtree: &AspectSubtree) -> Map<String, Value>;

    /// Reset the transient exit/modified flags of a subtree.
    fn reset_exit_flags(&self, subtree: &mut AspectSubtree);
}

/// Renders each node as an object keyed by child ID.
///
/// Leaves become `{"value": ...}`; nodes flagged as modified also carry
/// `"modified": true`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonTreeSerializer;

impl JsonTreeSerializer {
    fn render(node: &TreeNode) -> Value {
        let mut object = Map::new();
        if let Some(value) = &node.value {
            let _ = object.insert("value".into(), value.clone());
        }
        if node.modified {
            let _ = object.insert("modified".into(), Value::Bool(true));
        }
        for child in &node.children {
            let _ = object.insert(child.id.clone(), Self::render(child));
        }
        Value::Object(object)
    }
}

impl TreeSerializer for JsonTreeSerializer {
    fn serialize(&self, subtree: &AspectSubtree) -> Map<String, Value> {
        let mut object = Map::new();
        let _ = object.insert(subtree.root.id.clone(), Self::render(&subtree.root));
        object
    }

    fn reset_exit_flags(&self, subtree: &mut AspectSubtree) {
        subtree.root.clear_modified();
    }
}
