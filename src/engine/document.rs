//! Document - Node arena and containment relation.
//!
//! Manages the host tree the lifecycle core attaches to:
//! - Generational node ids (stale ids never alias a new node)
//! - Parent/child containment with cycle rejection
//! - Deferred freeing of destroyed subtrees
//!
//! Every structural change is reported to mutation observers, see
//! [`super::mutations`].
//!
//! # Example
//!
//! ```ignore
//! use spark_life::engine::Document;
//!
//! let doc = Document::new();
//! let list = doc.create_node("ul");
//! let item = doc.create_node("li");
//! doc.append_child(list, item)?;
//! doc.append_child(doc.root(), list)?;
//!
//! assert!(doc.is_connected(item));
//! assert_eq!(doc.composed_path(item), vec![item, list, doc.root()]);
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use slotmap::SlotMap;
use tracing::{debug, trace};

use super::events::NativeListener;
use super::mutations::{MutationRecord, Observer};
use crate::error::DomError;

slotmap::new_key_type! {
    /// Identity of a node in a [`Document`].
    pub struct NodeId;
}

/// Identity of a native listener installed with `add_event_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Identity of a mutation observer installed with `observe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

// =============================================================================
// Document State
// =============================================================================

pub(crate) struct NodeData {
    pub(crate) tag: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) listeners: Vec<NativeListener>,
}

impl NodeData {
    fn new(tag: String) -> Self {
        Self {
            tag,
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

pub(crate) struct DocumentState {
    pub(crate) nodes: SlotMap<NodeId, NodeData>,
    pub(crate) root: NodeId,
    pub(crate) observers: Vec<Observer>,
    /// Destroyed subtree roots waiting for the next mutation checkpoint.
    pub(crate) graveyard: Vec<NodeId>,
    next_id: u64,
}

impl DocumentState {
    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn require(&self, node: NodeId) -> Result<&NodeData, DomError> {
        self.nodes.get(node).ok_or(DomError::NodeNotFound(node))
    }

    pub(crate) fn require_mut(&mut self, node: NodeId) -> Result<&mut NodeData, DomError> {
        self.nodes.get_mut(node).ok_or(DomError::NodeNotFound(node))
    }

    /// Inclusive containment: true when `node == ancestor` or `ancestor` is above it.
    pub(crate) fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return self.nodes.contains_key(id);
            }
            current = self.nodes.get(id).and_then(|data| data.parent);
        }
        false
    }

    pub(crate) fn composed_path(&self, node: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let Some(data) = self.nodes.get(id) else { break };
            path.push(id);
            current = data.parent;
        }
        path
    }

    /// Pre-order descendants, excluding `node` itself.
    pub(crate) fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let Some(data) = self.nodes.get(node) else { return out };

        let mut stack: Vec<NodeId> = data.children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(child) = self.nodes.get(id) {
                stack.extend(child.children.iter().rev().copied());
            }
        }
        out
    }

    /// Unlink `child` from `parent` and report the removal.
    fn unlink(&mut self, parent: NodeId, child: NodeId) {
        if let Some(data) = self.nodes.get_mut(parent) {
            data.children.retain(|id| *id != child);
        }
        if let Some(data) = self.nodes.get_mut(child) {
            data.parent = None;
        }
        self.record(MutationRecord::removal(parent, child));
    }

    /// Free destroyed subtrees that were not re-adopted since.
    pub(crate) fn collect_garbage(&mut self) {
        let graveyard = std::mem::take(&mut self.graveyard);
        for node in graveyard {
            match self.nodes.get(node) {
                Some(data) if data.parent.is_none() => {}
                _ => continue,
            }
            let mut subtree = self.descendants(node);
            subtree.push(node);
            trace!(node = ?node, freed = subtree.len(), "freeing destroyed subtree");
            for id in subtree {
                self.nodes.remove(id);
            }
        }

        let nodes = &self.nodes;
        self.observers.retain(|observer| nodes.contains_key(observer.root));
    }
}

// =============================================================================
// Document Handle
// =============================================================================

/// Shared handle to a node tree.
///
/// Cloning is cheap; all clones see the same tree. Single-threaded by
/// construction (`Rc`), matching the UI thread the tree lives on.
#[derive(Clone)]
pub struct Document {
    pub(crate) state: Rc<RefCell<DocumentState>>,
}

/// Non-owning handle to a [`Document`].
///
/// Callbacks stored inside the document hold this instead of a
/// [`Document`] so they never keep the tree alive.
#[derive(Clone)]
pub struct WeakDocument {
    state: Weak<RefCell<DocumentState>>,
}

impl WeakDocument {
    /// Upgrade to a strong handle if the document still exists.
    pub fn upgrade(&self) -> Option<Document> {
        self.state.upgrade().map(|state| Document { state })
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Document")
            .field("root", &state.root)
            .field("nodes", &state.nodes.len())
            .field("observers", &state.observers.len())
            .finish()
    }
}

impl Document {
    /// Create a document holding a single, always-connected root node.
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(NodeData::new("#root".to_string()));
        Self {
            state: Rc::new(RefCell::new(DocumentState {
                nodes,
                root,
                observers: Vec::new(),
                graveyard: Vec::new(),
                next_id: 0,
            })),
        }
    }

    pub fn downgrade(&self) -> WeakDocument {
        WeakDocument {
            state: Rc::downgrade(&self.state),
        }
    }

    /// True when both handles refer to the same document.
    pub fn ptr_eq(&self, other: &Document) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// The document root. Nodes are connected when they descend from it.
    pub fn root(&self) -> NodeId {
        self.state.borrow().root
    }

    /// Create a detached node.
    pub fn create_node(&self, tag: impl Into<String>) -> NodeId {
        self.state
            .borrow_mut()
            .nodes
            .insert(NodeData::new(tag.into()))
    }

    /// Check if a node id is live.
    pub fn exists(&self, node: NodeId) -> bool {
        self.state.borrow().nodes.contains_key(node)
    }

    pub fn tag(&self, node: NodeId) -> Option<String> {
        self.state.borrow().nodes.get(node).map(|data| data.tag.clone())
    }

    pub fn node_count(&self) -> usize {
        self.state.borrow().nodes.len()
    }

    // -------------------------------------------------------------------------
    // Containment queries
    // -------------------------------------------------------------------------

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.state.borrow().nodes.get(node).and_then(|data| data.parent)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.state
            .borrow()
            .nodes
            .get(node)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    /// All descendants of `node` in pre-order, excluding `node`.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        self.state.borrow().descendants(node)
    }

    /// Inclusive containment test.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.state.borrow().contains(ancestor, node)
    }

    /// True when `node` descends from the document root.
    pub fn is_connected(&self, node: NodeId) -> bool {
        let state = self.state.borrow();
        state.contains(state.root, node)
    }

    /// `node`, its parent, and so on up to the topmost ancestor.
    pub fn composed_path(&self, node: NodeId) -> Vec<NodeId> {
        self.state.borrow().composed_path(node)
    }

    // -------------------------------------------------------------------------
    // Structural mutation
    // -------------------------------------------------------------------------

    /// Append `child` as the last child of `parent`.
    ///
    /// A child that already has a parent is moved; the move is reported as
    /// a removal followed by an insertion.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` under `parent` before `reference` (or last when `None`).
    pub fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        let mut state = self.state.borrow_mut();
        state.require(parent)?;
        state.require(child)?;

        if state.contains(child, parent) {
            return Err(DomError::HierarchyRequest { parent, child });
        }
        if let Some(reference) = reference {
            if state.require(reference)?.parent != Some(parent) {
                return Err(DomError::NotAChild {
                    parent,
                    child: reference,
                });
            }
        }

        // Inserting a node before itself means "where it already is".
        let reference = match reference {
            Some(r) if r == child => {
                let siblings = &state.require(parent)?.children;
                let at = siblings.iter().position(|id| *id == child);
                at.and_then(|i| siblings.get(i + 1).copied())
            }
            other => other,
        };

        if let Some(old_parent) = state.require(child)?.parent {
            state.unlink(old_parent, child);
        }

        let data = state.require_mut(parent)?;
        let index = reference
            .and_then(|r| data.children.iter().position(|id| *id == r))
            .unwrap_or(data.children.len());
        data.children.insert(index, child);
        state.require_mut(child)?.parent = Some(parent);
        state.record(MutationRecord::insertion(parent, child));

        trace!(parent = ?parent, child = ?child, "node inserted");
        Ok(())
    }

    /// Remove `child` from `parent`.
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let mut state = self.state.borrow_mut();
        state.require(parent)?;
        if state.require(child)?.parent != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        state.unlink(parent, child);
        trace!(parent = ?parent, child = ?child, "node removed");
        Ok(())
    }

    /// Detach `node` from its parent. No-op for parentless nodes.
    pub fn detach(&self, node: NodeId) -> Result<(), DomError> {
        let parent = self.state.borrow().require(node)?.parent;
        match parent {
            Some(parent) => self.remove_child(parent, node),
            None => Ok(()),
        }
    }

    /// Detach `node` and free it with its whole subtree.
    ///
    /// Freeing happens at the next [`Document::flush_mutations`], after
    /// observers have seen the removal, so they can still walk the removed
    /// subtree. Re-attaching the node before then cancels the destruction.
    pub fn destroy(&self, node: NodeId) -> Result<(), DomError> {
        if node == self.root() {
            return Err(DomError::RootNode);
        }
        self.detach(node)?;
        self.state.borrow_mut().graveyard.push(node);
        debug!(node = ?node, "node destroyed");
        Ok(())
    }
}
