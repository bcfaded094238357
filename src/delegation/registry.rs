//! Delegation Registry - Per-root delegation state.
//!
//! One registry is shared by every delegator of a document. For each
//! delegation root it keeps:
//! - the registrations, in insertion order
//! - exactly one installed native listener per event type still required
//!
//! Native listeners hold the registry weakly and unsubscribe handles hold the
//! host weakly, so neither side keeps the other alive.
//!
//! Removed registrations are dropped only after the state borrow is released,
//! so handler captures may re-enter the registry from their `Drop`.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::rc::{Rc, Weak};

use slotmap::SecondaryMap;
use tracing::{debug, trace, warn};

use super::listener_map::ListenerMap;
use crate::engine::{Document, Event, HostTree, NodeId};
use crate::types::Unsubscribe;

struct Registration {
    listeners: ListenerMap,
    target: NodeId,
}

pub(crate) struct RootDelegation<L> {
    registrations: BTreeMap<u64, Registration>,
    /// Installed native listener per active event type.
    installed: HashMap<String, L>,
}

impl<L> Default for RootDelegation<L> {
    fn default() -> Self {
        Self {
            registrations: BTreeMap::new(),
            installed: HashMap::new(),
        }
    }
}

pub(crate) struct RegistryState<L> {
    roots: SecondaryMap<NodeId, RootDelegation<L>>,
    next_registration: u64,
}

impl<L> Default for RegistryState<L> {
    fn default() -> Self {
        Self {
            roots: SecondaryMap::new(),
            next_registration: 0,
        }
    }
}

type SharedState<H> = Rc<RefCell<RegistryState<<H as HostTree>::Listener>>>;
type WeakState<H> = Weak<RefCell<RegistryState<<H as HostTree>::Listener>>>;

/// Shared delegation state for one host tree.
pub struct DelegationRegistry<H: HostTree = Document> {
    host: H,
    state: SharedState<H>,
}

impl<H: HostTree> Clone for DelegationRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            state: self.state.clone(),
        }
    }
}

impl<H: HostTree> std::fmt::Debug for DelegationRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationRegistry")
            .field("roots", &self.root_count())
            .finish()
    }
}

impl<H: HostTree> DelegationRegistry<H> {
    pub fn new(host: &H) -> Self {
        Self {
            host: host.clone(),
            state: Rc::new(RefCell::new(RegistryState::default())),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Roots that currently hold delegation state.
    pub fn root_count(&self) -> usize {
        self.state.borrow().roots.len()
    }

    pub(crate) fn registration_count(&self, root: NodeId) -> usize {
        self.state
            .borrow()
            .roots
            .get(root)
            .map(|delegation| delegation.registrations.len())
            .unwrap_or(0)
    }

    pub(crate) fn active_types(&self, root: NodeId) -> Vec<String> {
        let state = self.state.borrow();
        let mut types: Vec<String> = state
            .roots
            .get(root)
            .map(|delegation| delegation.installed.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Add a registration under `root`, installing native listeners for any
    /// event type the root does not serve yet.
    pub(crate) fn register(&self, root: NodeId, listeners: ListenerMap, target: NodeId) -> Unsubscribe {
        if !self.host.exists(root) {
            warn!(root = ?root, "delegation root no longer exists; registration ignored");
            return Box::new(|| {});
        }

        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;

        let id = state.next_registration;
        state.next_registration += 1;

        if !state.roots.contains_key(root) {
            state.roots.insert(root, RootDelegation::default());
        }
        let Some(delegation) = state.roots.get_mut(root) else {
            return Box::new(|| {});
        };

        let missing: Vec<String> = listeners
            .types()
            .filter(|event_type| !delegation.installed.contains_key(*event_type))
            .map(str::to_string)
            .collect();
        delegation.registrations.insert(id, Registration { listeners, target });

        for event_type in missing {
            let weak_state = Rc::downgrade(&self.state);
            let handler_type = event_type.clone();
            let installed = self.host.add_listener(
                root,
                &event_type,
                Rc::new(move |event: &Event| dispatch(&weak_state, root, &handler_type, event)),
            );
            match installed {
                Ok(listener) => {
                    debug!(root = ?root, event_type = %event_type, "delegation handler installed");
                    delegation.installed.insert(event_type, listener);
                }
                Err(error) => {
                    warn!(root = ?root, event_type = %event_type, error = %error, "could not install delegation handler");
                }
            }
        }
        drop(guard);

        let weak_state = Rc::downgrade(&self.state);
        let host = self.host.downgrade();
        Box::new(move || unregister::<H>(&weak_state, &host, root, id))
    }

    /// Drop all state for `root` and uninstall its native listeners.
    pub(crate) fn clear_root(&self, root: NodeId) {
        let removed = self.state.borrow_mut().roots.remove(root);
        let Some(delegation) = removed else { return };

        for listener in delegation.installed.values() {
            self.host.remove_listener(root, *listener);
        }
        debug!(
            root = ?root,
            registrations = delegation.registrations.len(),
            "delegation root cleared"
        );
        drop(delegation);
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Native listener body: route `event` to registrations whose target is on
/// its path and whose map handles `event_type`, in insertion order.
///
/// The registration set is re-read before every call, so handlers may
/// delegate or unsubscribe freely while the event is in flight.
fn dispatch<L>(state: &Weak<RefCell<RegistryState<L>>>, root: NodeId, event_type: &str, event: &Event) {
    let Some(state) = state.upgrade() else { return };
    let path = event.composed_path();

    let mut cursor: Option<u64> = None;
    loop {
        let next = {
            let state = state.borrow();
            let Some(delegation) = state.roots.get(root) else { break };
            let lower = match cursor {
                None => Bound::Unbounded,
                Some(last) => Bound::Excluded(last),
            };
            let next = delegation
                .registrations
                .range((lower, Bound::Unbounded))
                .find_map(|(id, registration)| {
                    if !path.contains(&registration.target) {
                        return None;
                    }
                    registration
                        .listeners
                        .get(event_type)
                        .map(|handler| (*id, registration.target, handler.clone()))
                });
            next
        };

        let Some((id, target, handler)) = next else { break };
        cursor = Some(id);
        trace!(root = ?root, target = ?target, event_type = %event_type, "delegated dispatch");
        handler(event, target);
    }
}

// =============================================================================
// Unregistration
// =============================================================================

/// Remove one registration, then prune: uninstall every native listener for
/// types no remaining registration needs, or tear the root down entirely
/// when nothing remains. Repeat calls are no-ops.
fn unregister<H: HostTree>(state: &WeakState<H>, host: &H::Weak, root: NodeId, id: u64) {
    let Some(state) = state.upgrade() else { return };

    let (removed, teardown, stale) = {
        let mut guard = state.borrow_mut();
        let state = &mut *guard;
        let Some(delegation) = state.roots.get_mut(root) else { return };
        let Some(removed) = delegation.registrations.remove(&id) else { return };

        if delegation.registrations.is_empty() {
            debug!(root = ?root, "last registration removed; delegation root torn down");
            let teardown = state.roots.remove(root);
            let stale: Vec<H::Listener> = teardown
                .as_ref()
                .map(|delegation| delegation.installed.values().copied().collect())
                .unwrap_or_default();
            (removed, teardown, stale)
        } else {
            let required: HashSet<&str> = delegation
                .registrations
                .values()
                .flat_map(|registration| registration.listeners.types())
                .collect();
            let unused: Vec<String> = delegation
                .installed
                .keys()
                .filter(|event_type| !required.contains(event_type.as_str()))
                .cloned()
                .collect();
            let stale: Vec<H::Listener> = unused
                .into_iter()
                .filter_map(|event_type| {
                    debug!(root = ?root, event_type = %event_type, "delegation handler pruned");
                    delegation.installed.remove(&event_type)
                })
                .collect();
            (removed, None, stale)
        }
    };

    if let Some(host) = H::upgrade(host) {
        for listener in stale {
            host.remove_listener(root, listener);
        }
    }

    // Handler captures may re-enter the registry when dropped.
    drop(removed);
    drop(teardown);
}
