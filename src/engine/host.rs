//! Host Tree - What the delegator and the bridge need from a node tree.
//!
//! [`Document`] is the built-in implementation. A rendering layer with its
//! own tree implements [`HostTree`] over its nodes (identified by
//! [`NodeId`]) to drive delegation and lifecycle directly.
//!
//! # Contract
//!
//! - `add_listener` handlers receive events bubbling through `node`, with
//!   [`Event::composed_path`] listing the target first.
//! - `observe_mutations` delivers child-list records in batches, never from
//!   inside the mutating call.
//! - `descendants` is pre-order, excluding the node itself, and removed
//!   subtrees stay walkable until their batch has been delivered.

use super::document::{Document, ListenerId, NodeId, ObserverId, WeakDocument};
use super::events::{Event, NativeHandler};
use super::mutations::{MutationCallback, MutationRecord};
use crate::error::DomError;
use crate::types::ObserveOptions;

/// Node tree the lifecycle core runs against.
pub trait HostTree: Clone + 'static {
    /// Non-owning handle, held by callbacks stored inside the tree.
    type Weak: Clone + 'static;
    /// Handle for an installed native listener.
    type Listener: Copy + std::fmt::Debug + 'static;
    /// Handle for an installed mutation observer.
    type Observer: Copy + std::fmt::Debug + 'static;

    fn downgrade(&self) -> Self::Weak;

    fn upgrade(weak: &Self::Weak) -> Option<Self>;

    fn root(&self) -> NodeId;

    fn exists(&self, node: NodeId) -> bool;

    /// Descendants of `node` in pre-order, excluding `node`.
    fn descendants(&self, node: NodeId) -> Vec<NodeId>;

    fn add_listener(
        &self,
        node: NodeId,
        event_type: &str,
        handler: NativeHandler,
    ) -> Result<Self::Listener, DomError>;

    fn remove_listener(&self, node: NodeId, listener: Self::Listener) -> bool;

    fn observe_mutations(
        &self,
        root: NodeId,
        options: ObserveOptions,
        callback: MutationCallback,
    ) -> Result<Self::Observer, DomError>;
}

impl HostTree for Document {
    type Weak = WeakDocument;
    type Listener = ListenerId;
    type Observer = ObserverId;

    fn downgrade(&self) -> WeakDocument {
        Document::downgrade(self)
    }

    fn upgrade(weak: &WeakDocument) -> Option<Document> {
        weak.upgrade()
    }

    fn root(&self) -> NodeId {
        Document::root(self)
    }

    fn exists(&self, node: NodeId) -> bool {
        Document::exists(self, node)
    }

    fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        Document::descendants(self, node)
    }

    fn add_listener(
        &self,
        node: NodeId,
        event_type: &str,
        handler: NativeHandler,
    ) -> Result<ListenerId, DomError> {
        self.add_event_listener(node, event_type, move |event: &Event| handler(event))
    }

    fn remove_listener(&self, node: NodeId, listener: ListenerId) -> bool {
        self.remove_event_listener(node, listener)
    }

    fn observe_mutations(
        &self,
        root: NodeId,
        options: ObserveOptions,
        callback: MutationCallback,
    ) -> Result<ObserverId, DomError> {
        self.observe(root, options, move |records: &[MutationRecord]| callback(records))
    }
}
