//! Tree Lifecycle Bridge - Node attachment drives enter/exit.
//!
//! The bridge keeps a non-owning `NodeId -> Life` association and a single
//! mutation observer. For every batch it walks each record's added nodes,
//! then its removed nodes, and for each such node and every descendant
//! (pre-order) calls `enter` or `exit` on the associated controller.
//!
//! Transitions are idempotent, so nodes reported twice in one batch (for
//! example a subtree and one of its children) are harmless.
//!
//! # API
//!
//! - `associate(node, &life)` - Record the association (does not enter)
//! - `start_observing()` - Watch the whole document
//! - `process_batch(records)` - Drive the bridge from another source
//!
//! # Example
//!
//! ```ignore
//! let bridge = LifeBridge::new(&doc);
//! bridge.start_observing()?;
//!
//! let node = doc.create_node("panel");
//! let life = Life::new();
//! bridge.associate(node, &life);
//!
//! doc.append_child(doc.root(), node)?;
//! doc.flush_mutations();
//! assert!(life.alive());
//! ```

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use slotmap::SecondaryMap;
use tracing::{debug, error, trace};

use crate::engine::{Document, HostTree, MutationRecord, NodeId};
use crate::error::{panic_message, BridgeError, ScopeFailure};
use crate::life::Life;
use crate::types::{LifeEvent, ObserveOptions};

type Associations = Rc<RefCell<SecondaryMap<NodeId, Life>>>;

/// Connects a host tree's attachment events to lifecycle controllers.
pub struct LifeBridge<H: HostTree = Document> {
    host: H,
    associations: Associations,
    observer: Cell<Option<H::Observer>>,
}

impl<H: HostTree> std::fmt::Debug for LifeBridge<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifeBridge")
            .field("associations", &self.associations.borrow().len())
            .field("observer", &self.observer.get())
            .finish()
    }
}

impl<H: HostTree> LifeBridge<H> {
    pub fn new(host: &H) -> Self {
        Self {
            host: host.clone(),
            associations: Rc::new(RefCell::new(SecondaryMap::new())),
            observer: Cell::new(None),
        }
    }

    // ===== Associations =====

    /// Associate `node` with `life`, replacing any previous association.
    ///
    /// The controller is not entered here, even if the node is already
    /// connected; only later insertions drive it.
    pub fn associate(&self, node: NodeId, life: &Life) {
        if !self.host.exists(node) {
            debug!(node = ?node, "associate on a dead node ignored");
            return;
        }
        trace!(node = ?node, "life associated");
        self.associations.borrow_mut().insert(node, life.clone());
    }

    /// Remove the association for `node`, returning its controller.
    pub fn dissociate(&self, node: NodeId) -> Option<Life> {
        self.associations.borrow_mut().remove(node)
    }

    /// The controller associated with `node`, if any.
    pub fn life_of(&self, node: NodeId) -> Option<Life> {
        self.associations.borrow().get(node).cloned()
    }

    /// Number of live associations.
    pub fn association_count(&self) -> usize {
        self.associations.borrow().len()
    }

    /// Whether the mutation observer is installed.
    pub fn is_observing(&self) -> bool {
        self.observer.get().is_some()
    }

    // ===== Observation =====

    /// Watch the whole tree for insertions and removals.
    pub fn start_observing(&self) -> Result<(), BridgeError> {
        self.start_observing_with(self.host.root(), ObserveOptions::tree())
    }

    /// Watch `root` with `options`. A bridge observes at most once.
    pub fn start_observing_with(&self, root: NodeId, options: ObserveOptions) -> Result<(), BridgeError> {
        if self.observer.get().is_some() {
            return Err(BridgeError::AlreadyObserving);
        }

        let host = self.host.downgrade();
        let associations = self.associations.clone();
        let id = self.host.observe_mutations(
            root,
            options,
            Rc::new(move |records: &[MutationRecord]| process::<H>(&host, &associations, records)),
        )?;

        debug!(root = ?root, options = ?options, "bridge observing");
        self.observer.set(Some(id));
        Ok(())
    }

    /// Apply a batch of records as if delivered by the observer.
    pub fn process_batch(&self, records: &[MutationRecord]) {
        process::<H>(&self.host.downgrade(), &self.associations, records);
    }
}

// =============================================================================
// Batch processing
// =============================================================================

fn process<H: HostTree>(host: &H::Weak, associations: &Associations, records: &[MutationRecord]) {
    let Some(host) = H::upgrade(host) else { return };

    // Entries for freed nodes can never match again; drop them.
    let stale: Vec<Life> = {
        let mut associations = associations.borrow_mut();
        let dead: Vec<NodeId> = associations
            .keys()
            .filter(|node| !host.exists(*node))
            .collect();
        dead.into_iter()
            .filter_map(|node| associations.remove(node))
            .collect()
    };
    drop(stale);

    trace!(records = records.len(), "bridge processing batch");
    for record in records {
        for &node in &record.added {
            transition_subtree(&host, associations, node, LifeEvent::Enter);
        }
        for &node in &record.removed {
            transition_subtree(&host, associations, node, LifeEvent::Exit);
        }
    }
}

/// Transition `node` and then each of its descendants in pre-order.
fn transition_subtree<H: HostTree>(host: &H, associations: &Associations, node: NodeId, event: LifeEvent) {
    let mut nodes = vec![node];
    nodes.extend(host.descendants(node));

    for node in nodes {
        // Clone out so no borrow is held while subscribers run.
        let life = associations.borrow().get(node).cloned();
        let Some(life) = life else { continue };
        transition(&life, node, event);
    }
}

/// Run one transition with subscriber panics contained to this node.
fn transition(life: &Life, node: NodeId, event: LifeEvent) {
    trace!(node = ?node, event = %event, "bridge transition");
    let result = panic::catch_unwind(AssertUnwindSafe(|| match event {
        LifeEvent::Enter => life.enter(),
        LifeEvent::Exit => life.exit(),
    }));

    if let Err(payload) = result {
        let failure = ScopeFailure::SubscriberPanicked {
            event: event.as_str(),
            message: panic_message(payload.as_ref()),
        };
        error!(
            node = ?node,
            label = failure.as_label(),
            error = %failure,
            "lifecycle transition failed"
        );
    }
}
