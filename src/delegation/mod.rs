//! Delegation Module - Event delegation over the host tree.
//!
//! - **ListenerMap** - Event type to handler, one per registration
//! - **Registry** - Shared per-root state and the multiplexed native handler
//! - **Delegator** - Root-bound `delegate`/`clear` API

mod delegator;
mod listener_map;
mod registry;

pub use delegator::*;
pub use listener_map::*;
pub use registry::DelegationRegistry;
