//! Listener maps - event type to handler, one map per `delegate` call.

use std::collections::HashMap;
use std::rc::Rc;

use crate::engine::{Event, NodeId};

/// Delegated handler. Receives the event and the registration's target,
/// which stands in for the native listener's receiver.
pub type DelegatedHandler = Rc<dyn Fn(&Event, NodeId)>;

/// Handlers keyed by event type.
///
/// ```ignore
/// let listeners = ListenerMap::new()
///     .on("click", |event, target| println!("{target:?} clicked"))
///     .on("keydown", |event, _| println!("{}", event.event_type()));
/// ```
#[derive(Clone, Default)]
pub struct ListenerMap {
    handlers: HashMap<String, DelegatedHandler>,
}

impl std::fmt::Debug for ListenerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.types().collect();
        types.sort_unstable();
        f.debug_struct("ListenerMap").field("types", &types).finish()
    }
}

impl ListenerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handler for `event_type`, replacing any previous one.
    pub fn on(mut self, event_type: impl Into<String>, handler: impl Fn(&Event, NodeId) + 'static) -> Self {
        self.handlers.insert(event_type.into(), Rc::new(handler));
        self
    }

    pub fn get(&self, event_type: &str) -> Option<&DelegatedHandler> {
        self.handlers.get(event_type)
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_replaces_same_type() {
        let map = ListenerMap::new()
            .on("click", |_, _| {})
            .on("click", |_, _| {})
            .on("keydown", |_, _| {});
        assert_eq!(map.len(), 2);
        assert!(map.contains("click"));
        assert!(map.get("input").is_none());

        let mut types: Vec<&str> = map.types().collect();
        types.sort_unstable();
        assert_eq!(types, vec!["click", "keydown"]);
    }

    #[test]
    fn test_empty() {
        assert!(ListenerMap::new().is_empty());
    }
}
