//! Bridge Module - Drive lifecycle controllers from tree attachment.
//!
//! A node associated with a [`Life`](crate::Life) enters when it (or an
//! ancestor) is inserted and exits when it (or an ancestor) is removed.

mod tree_bridge;

pub use tree_bridge::*;
