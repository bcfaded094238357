//! Mutation Observation - Batched child-list notifications.
//!
//! Every insertion and removal is queued on each observer watching the
//! affected part of the tree. Nothing is delivered until the host reaches a
//! checkpoint ([`Document::flush_mutations`]); at that point each observer
//! receives all of its queued records as one batch.
//!
//! # Example
//!
//! ```ignore
//! let observer = doc.observe(doc.root(), ObserveOptions::tree(), |batch| {
//!     for record in batch {
//!         println!("{:?}: +{:?} -{:?}", record.target, record.added, record.removed);
//!     }
//! })?;
//!
//! doc.append_child(doc.root(), node)?;
//! doc.flush_mutations(); // callback runs here
//! ```

use std::rc::Rc;

use tracing::trace;

use super::document::{Document, DocumentState, NodeId, ObserverId};
use crate::error::DomError;
use crate::types::ObserveOptions;

/// One child-list change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    /// The parent whose child list changed.
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

impl MutationRecord {
    pub fn insertion(target: NodeId, child: NodeId) -> Self {
        Self {
            target,
            added: vec![child],
            removed: Vec::new(),
        }
    }

    pub fn removal(target: NodeId, child: NodeId) -> Self {
        Self {
            target,
            added: Vec::new(),
            removed: vec![child],
        }
    }
}

/// Mutation observer callback. Receives one batch per checkpoint.
pub type MutationCallback = Rc<dyn Fn(&[MutationRecord])>;

pub(crate) struct Observer {
    pub(crate) id: ObserverId,
    pub(crate) root: NodeId,
    options: ObserveOptions,
    callback: MutationCallback,
    pending: Vec<MutationRecord>,
}

impl Observer {
    fn watches(&self, state: &DocumentState, target: NodeId) -> bool {
        if !self.options.contains(ObserveOptions::CHILD_LIST) {
            return false;
        }
        if target == self.root {
            return true;
        }
        self.options.contains(ObserveOptions::SUBTREE) && state.contains(self.root, target)
    }
}

impl DocumentState {
    /// Queue `record` on every observer watching its target.
    pub(crate) fn record(&mut self, record: MutationRecord) {
        let interested: Vec<usize> = self
            .observers
            .iter()
            .enumerate()
            .filter(|(_, observer)| observer.watches(self, record.target))
            .map(|(index, _)| index)
            .collect();

        for index in interested {
            self.observers[index].pending.push(record.clone());
        }
    }
}

impl Document {
    /// Watch child-list changes at or below `root`.
    pub fn observe(
        &self,
        root: NodeId,
        options: ObserveOptions,
        callback: impl Fn(&[MutationRecord]) + 'static,
    ) -> Result<ObserverId, DomError> {
        let mut state = self.state.borrow_mut();
        state.require(root)?;
        let id = ObserverId(state.next_id());
        state.observers.push(Observer {
            id,
            root,
            options,
            callback: Rc::new(callback),
            pending: Vec::new(),
        });
        trace!(root = ?root, options = ?options, "observer installed");
        Ok(id)
    }

    /// Stop an observer and drop its queued records.
    pub fn disconnect(&self, id: ObserverId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.observers.len();
        state.observers.retain(|observer| observer.id != id);
        before != state.observers.len()
    }

    /// Records queued across all observers.
    pub fn pending_mutations(&self) -> usize {
        self.state
            .borrow()
            .observers
            .iter()
            .map(|observer| observer.pending.len())
            .sum()
    }

    /// Deliver queued records, one batch per observer, until none remain.
    ///
    /// Mutations made by callbacks are delivered in a following round of the
    /// same call. Destroyed subtrees are freed once delivery is done.
    /// Returns the number of batches delivered.
    pub fn flush_mutations(&self) -> usize {
        let mut delivered = 0;
        loop {
            let batches: Vec<(MutationCallback, Vec<MutationRecord>)> = {
                let mut state = self.state.borrow_mut();
                state
                    .observers
                    .iter_mut()
                    .filter(|observer| !observer.pending.is_empty())
                    .map(|observer| {
                        (
                            observer.callback.clone(),
                            std::mem::take(&mut observer.pending),
                        )
                    })
                    .collect()
            };
            if batches.is_empty() {
                break;
            }

            for (callback, records) in batches {
                trace!(records = records.len(), "delivering mutation batch");
                callback(&records);
                delivered += 1;
            }
        }

        self.state.borrow_mut().collect_garbage();
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn recorder() -> (Rc<RefCell<Vec<Vec<MutationRecord>>>>, impl Fn(&[MutationRecord])) {
        let batches = Rc::new(RefCell::new(Vec::new()));
        let batches_clone = batches.clone();
        (batches, move |batch: &[MutationRecord]| {
            batches_clone.borrow_mut().push(batch.to_vec())
        })
    }

    #[test]
    fn test_batches_coalesce_until_flush() {
        let doc = Document::new();
        let (batches, callback) = recorder();
        doc.observe(doc.root(), ObserveOptions::tree(), callback).unwrap();

        let a = doc.create_node("a");
        let b = doc.create_node("b");
        doc.append_child(doc.root(), a).unwrap();
        doc.append_child(a, b).unwrap();
        assert!(batches.borrow().is_empty());
        assert_eq!(doc.pending_mutations(), 2);

        assert_eq!(doc.flush_mutations(), 1);
        let batches = batches.borrow();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0],
            vec![
                MutationRecord::insertion(doc.root(), a),
                MutationRecord::insertion(a, b)
            ]
        );
    }

    #[test]
    fn test_child_list_without_subtree() {
        let doc = Document::new();
        let (batches, callback) = recorder();
        doc.observe(doc.root(), ObserveOptions::CHILD_LIST, callback).unwrap();

        let a = doc.create_node("a");
        let b = doc.create_node("b");
        doc.append_child(doc.root(), a).unwrap();
        doc.append_child(a, b).unwrap();
        doc.flush_mutations();

        assert_eq!(batches.borrow()[0], vec![MutationRecord::insertion(doc.root(), a)]);
    }

    #[test]
    fn test_detached_subtree_is_not_observed() {
        let doc = Document::new();
        let (batches, callback) = recorder();
        doc.observe(doc.root(), ObserveOptions::tree(), callback).unwrap();

        let a = doc.create_node("a");
        let b = doc.create_node("b");
        doc.append_child(a, b).unwrap();
        assert_eq!(doc.flush_mutations(), 0);
        assert!(batches.borrow().is_empty());
    }

    #[test]
    fn test_move_reports_removal_then_insertion() {
        let doc = Document::new();
        let a = doc.create_node("a");
        let b = doc.create_node("b");
        let c = doc.create_node("c");
        doc.append_child(doc.root(), a).unwrap();
        doc.append_child(doc.root(), b).unwrap();
        doc.append_child(a, c).unwrap();

        let (batches, callback) = recorder();
        doc.observe(doc.root(), ObserveOptions::tree(), callback).unwrap();
        doc.append_child(b, c).unwrap();
        doc.flush_mutations();

        assert_eq!(
            batches.borrow()[0],
            vec![MutationRecord::removal(a, c), MutationRecord::insertion(b, c)]
        );
    }

    #[test]
    fn test_callback_mutations_flush_in_next_round() {
        let doc = Document::new();
        let late = doc.create_node("late");
        let (batches, callback) = recorder();

        let doc_clone = doc.downgrade();
        doc.observe(doc.root(), ObserveOptions::tree(), move |batch| {
            callback(batch);
            if let Some(doc) = doc_clone.upgrade() {
                if doc.parent(late).is_none() {
                    doc.append_child(doc.root(), late).unwrap();
                }
            }
        })
        .unwrap();

        let first = doc.create_node("first");
        doc.append_child(doc.root(), first).unwrap();
        assert_eq!(doc.flush_mutations(), 2);
        assert_eq!(batches.borrow().len(), 2);
        assert_eq!(batches.borrow()[1], vec![MutationRecord::insertion(doc.root(), late)]);
    }

    #[test]
    fn test_disconnect_drops_pending() {
        let doc = Document::new();
        let (batches, callback) = recorder();
        let id = doc.observe(doc.root(), ObserveOptions::tree(), callback).unwrap();

        let a = doc.create_node("a");
        doc.append_child(doc.root(), a).unwrap();
        assert!(doc.disconnect(id));
        assert!(!doc.disconnect(id));
        doc.flush_mutations();
        assert!(batches.borrow().is_empty());
    }
}
