//! Event Delegator - Many registrations, one native listener per type.
//!
//! Components register listener maps for their own nodes; the delegator
//! installs at most one native listener per event type on its root and
//! routes each event to the registrations whose target is on the event's
//! composed path.
//!
//! # Example
//!
//! ```ignore
//! use spark_life::{DelegationRegistry, EventDelegator, ListenerMap};
//!
//! let registry = DelegationRegistry::new(&doc);
//! let delegator = EventDelegator::new(&registry, Some(list));
//!
//! life.scoped(|_| {
//!     delegator.delegate(
//!         ListenerMap::new().on("click", |_, item| select(item)),
//!         item,
//!     )
//! }); // unsubscribed on exit
//! ```
//!
//! Cost per dispatched event is linear in the root's registrations, which
//! stays small for typical UI fan-out.

use std::cell::Cell;

use tracing::debug;

use super::listener_map::ListenerMap;
use super::registry::DelegationRegistry;
use crate::engine::{Document, HostTree, NodeId};
use crate::types::Unsubscribe;

/// Delegator bound to one root. A `None` root makes it inert.
pub struct EventDelegator<H: HostTree = Document> {
    registry: DelegationRegistry<H>,
    root: Cell<Option<NodeId>>,
}

impl<H: HostTree> std::fmt::Debug for EventDelegator<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDelegator")
            .field("root", &self.root.get())
            .field("registrations", &self.registration_count())
            .finish()
    }
}

impl<H: HostTree> EventDelegator<H> {
    pub fn new(registry: &DelegationRegistry<H>, root: Option<NodeId>) -> Self {
        Self {
            registry: registry.clone(),
            root: Cell::new(root),
        }
    }

    /// The delegation root, or `None` once inert.
    pub fn root(&self) -> Option<NodeId> {
        self.root.get()
    }

    /// Route events of every type in `listeners` that pass through `target`.
    ///
    /// Returns an idempotent unsubscribe for this one registration. On an
    /// inert delegator nothing is registered and the unsubscribe does nothing.
    pub fn delegate(&self, listeners: ListenerMap, target: NodeId) -> Unsubscribe {
        let Some(root) = self.root.get() else {
            return Box::new(|| {});
        };
        self.registry.register(root, listeners, target)
    }

    /// Uninstall every native listener of the root and drop all its state,
    /// whatever registrations are outstanding. The delegator becomes inert;
    /// earlier unsubscribes become no-ops.
    pub fn clear(&self) {
        let Some(root) = self.root.take() else { return };
        debug!(root = ?root, "delegator cleared");
        self.registry.clear_root(root);
    }

    /// Registrations currently held for this delegator's root.
    pub fn registration_count(&self) -> usize {
        self.root
            .get()
            .map(|root| self.registry.registration_count(root))
            .unwrap_or(0)
    }

    /// Event types with an installed native listener on the root, sorted.
    pub fn active_types(&self) -> Vec<String> {
        self.root
            .get()
            .map(|root| self.registry.active_types(root))
            .unwrap_or_default()
    }
}
