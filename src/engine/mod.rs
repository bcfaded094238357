//! Host Engine - The node tree the lifecycle core runs against.
//!
//! The engine provides what the rendering layer would otherwise supply:
//! - Document: Node identity, parent/child containment, destruction
//! - Events: Native per-node listeners with bubble dispatch
//! - Mutations: Batched child-list notifications delivered at checkpoints
//! - Host: The `HostTree` trait other node trees implement
//!
//! # Architecture
//!
//! Nodes are NOT objects. They are generational keys into one arena:
//!
//! ```text
//! NodeId(1v1): #root (parent=None,  children=[2v1])
//! NodeId(2v1): ul    (parent=1v1,   children=[3v1])
//! NodeId(3v1): li    (parent=2v1,   children=[])
//! ```
//!
//! A freed slot is reused with a bumped version, so a stale id held by a
//! registry never resolves to the node that replaced it.

mod document;
mod events;
mod host;
mod mutations;

pub use document::*;
pub use events::*;
pub use host::HostTree;
pub use mutations::*;
