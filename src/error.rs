//! Error types.
//!
//! - [`DomError`] - host tree operations that were rejected
//! - [`BridgeError`] - tree lifecycle bridge setup failures
//! - [`ScopeFailure`] - contained failures inside scoped setup/cleanup code
//!
//! `ScopeFailure` is never returned to callers. It exists so contained
//! failures are reported with one shape and one set of labels.

use std::any::Any;

use thiserror::Error;

use crate::engine::NodeId;

/// Errors produced by the host node tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    /// The node id is dead (destroyed) or was never issued by this document.
    #[error("node {0:?} does not exist in this document")]
    NodeNotFound(NodeId),

    /// Inserting `child` under `parent` would create a cycle.
    #[error("cannot insert {child:?} under {parent:?}: child is an inclusive ancestor of parent")]
    HierarchyRequest { parent: NodeId, child: NodeId },

    /// `child` (or a reference node) is not a child of `parent`.
    #[error("{child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },

    /// The document root cannot be destroyed.
    #[error("the document root cannot be destroyed")]
    RootNode,
}

/// Errors produced while wiring the tree lifecycle bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// `start_observing` was already called on this bridge.
    #[error("bridge is already observing")]
    AlreadyObserving,

    #[error(transparent)]
    Dom(#[from] DomError),
}

/// A failure contained by the lifecycle machinery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeFailure {
    /// A scoped setup function panicked.
    #[error("scoped setup panicked: {0}")]
    SetupPanicked(String),

    /// A scoped setup function returned an error.
    #[error("scoped setup failed: {0}")]
    SetupFailed(String),

    /// A scoped cleanup panicked while the controller was exiting.
    #[error("scoped cleanup panicked: {0}")]
    CleanupPanicked(String),

    /// A lifecycle subscriber panicked while the bridge was driving a transition.
    #[error("{event} subscriber panicked: {message}")]
    SubscriberPanicked { event: &'static str, message: String },
}

impl ScopeFailure {
    /// Short stable label (snake_case) for log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::SetupPanicked(_) => "scope_setup_panicked",
            Self::SetupFailed(_) => "scope_setup_failed",
            Self::CleanupPanicked(_) => "scope_cleanup_panicked",
            Self::SubscriberPanicked { .. } => "subscriber_panicked",
        }
    }
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
