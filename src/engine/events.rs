//! Native Events - Per-node listeners and bubble dispatch.
//!
//! The host's own event mechanism, the one the delegator multiplexes over.
//! Dispatch walks the event's composed path from the target upwards and runs
//! every matching listener installed on each node.
//!
//! # API
//!
//! - `add_event_listener(node, type, fn)` - Install a native listener
//! - `remove_event_listener(node, id)` - Uninstall it
//! - `dispatch_event(target, type)` - Bubble an event from `target`

use std::cell::Cell;
use std::rc::Rc;

use tracing::trace;

use super::document::{Document, ListenerId, NodeId};
use crate::error::DomError;

/// Native listener callback (Rc so dispatch can run it without holding the tree).
pub type NativeHandler = Rc<dyn Fn(&Event)>;

pub(crate) struct NativeListener {
    pub(crate) id: ListenerId,
    pub(crate) event_type: String,
    pub(crate) handler: NativeHandler,
}

// =============================================================================
// Event
// =============================================================================

/// A dispatched event.
#[derive(Debug)]
pub struct Event {
    event_type: String,
    target: NodeId,
    path: Vec<NodeId>,
    current_target: Cell<Option<NodeId>>,
    propagation_stopped: Cell<bool>,
}

impl Event {
    /// Build an event with an explicit propagation path.
    ///
    /// `Document::dispatch_event` builds events itself; this exists for hosts
    /// that route events through their own mechanism.
    pub fn new(event_type: impl Into<String>, target: NodeId, path: Vec<NodeId>) -> Self {
        Self {
            event_type: event_type.into(),
            target,
            path,
            current_target: Cell::new(None),
            propagation_stopped: Cell::new(false),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The node the event was dispatched at.
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Nodes the event passes through, target first.
    pub fn composed_path(&self) -> &[NodeId] {
        &self.path
    }

    /// The node whose native listeners are currently running.
    pub fn current_target(&self) -> Option<NodeId> {
        self.current_target.get()
    }

    /// Stop bubbling after the listeners of the current node.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }
}

// =============================================================================
// Listener Registry + Dispatch
// =============================================================================

impl Document {
    /// Install a native listener for `event_type` on `node`.
    pub fn add_event_listener(
        &self,
        node: NodeId,
        event_type: impl Into<String>,
        handler: impl Fn(&Event) + 'static,
    ) -> Result<ListenerId, DomError> {
        let mut state = self.state.borrow_mut();
        state.require(node)?;
        let id = ListenerId(state.next_id());
        let event_type = event_type.into();
        trace!(node = ?node, event_type = %event_type, "native listener added");
        state.require_mut(node)?.listeners.push(NativeListener {
            id,
            event_type,
            handler: Rc::new(handler),
        });
        Ok(id)
    }

    /// Uninstall a native listener. Returns false if it was not installed.
    pub fn remove_event_listener(&self, node: NodeId, id: ListenerId) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(data) = state.nodes.get_mut(node) else { return false };
        let before = data.listeners.len();
        data.listeners.retain(|listener| listener.id != id);
        before != data.listeners.len()
    }

    /// Number of native listeners for `event_type` on `node`.
    pub fn listener_count(&self, node: NodeId, event_type: &str) -> usize {
        self.state
            .borrow()
            .nodes
            .get(node)
            .map(|data| {
                data.listeners
                    .iter()
                    .filter(|listener| listener.event_type == event_type)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Distinct event types with a native listener on `node`, sorted.
    pub fn listener_types(&self, node: NodeId) -> Vec<String> {
        let state = self.state.borrow();
        let Some(data) = state.nodes.get(node) else { return Vec::new() };
        let mut types: Vec<String> = data
            .listeners
            .iter()
            .map(|listener| listener.event_type.clone())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// Dispatch an event at `target`, bubbling through its composed path.
    ///
    /// Listeners added during dispatch run from the next dispatch on;
    /// listeners removed during dispatch do not run.
    pub fn dispatch_event(&self, target: NodeId, event_type: &str) -> Result<Event, DomError> {
        let path = {
            let state = self.state.borrow();
            state.require(target)?;
            state.composed_path(target)
        };
        let event = Event::new(event_type, target, path);

        for &node in event.composed_path() {
            let ids: Vec<ListenerId> = {
                let state = self.state.borrow();
                let Some(data) = state.nodes.get(node) else { continue };
                data.listeners
                    .iter()
                    .filter(|listener| listener.event_type == event_type)
                    .map(|listener| listener.id)
                    .collect()
            };

            event.current_target.set(Some(node));
            for id in ids {
                let handler = {
                    let state = self.state.borrow();
                    state.nodes.get(node).and_then(|data| {
                        data.listeners
                            .iter()
                            .find(|listener| listener.id == id)
                            .map(|listener| listener.handler.clone())
                    })
                };
                if let Some(handler) = handler {
                    handler(&event);
                }
            }

            if event.is_propagation_stopped() {
                break;
            }
        }

        event.current_target.set(None);
        Ok(event)
    }
}
