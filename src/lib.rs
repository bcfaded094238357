//! # spark-life
//!
//! Lifecycle controllers, event delegation, and tree-driven lifecycle for
//! reactive UI in Rust.
//!
//! Built on [spark-signals](https://github.com/RLabs-Inc/spark-signals): a
//! controller's `alive` flag is a signal, so effects that read it re-run on
//! every transition.
//!
//! ## Architecture
//!
//! Three pieces cooperate around a host node tree:
//! ```text
//! Document (insert/remove) → mutation batch → LifeBridge → Life::enter/exit
//!                                                             ↓
//!                                   scoped(setup) → cleanup + abort token
//!                                                             ↓
//!                         EventDelegator::delegate(...) → unsubscribe on exit
//! ```
//!
//! Everything is single-threaded (`Rc`/`RefCell`), matching the UI thread
//! the tree lives on.
//!
//! ## Modules
//!
//! - [`types`] - Shared aliases, `LifeEvent`, `ObserveOptions`
//! - [`error`] - Error enums
//! - [`engine`] - Host node tree: arena, native events, mutation observation,
//!   and the `HostTree` trait for other trees
//! - [`life`] - Lifecycle controller and abort token
//! - [`delegation`] - Event delegator
//! - [`bridge`] - Tree lifecycle bridge

pub mod bridge;
pub mod delegation;
pub mod engine;
pub mod error;
pub mod life;
pub mod types;

// Re-export commonly used items
pub use types::*;

pub use error::{BridgeError, DomError, ScopeFailure};

pub use engine::{
    Document, Event, HostTree, ListenerId, MutationCallback, MutationRecord, NativeHandler,
    NodeId, ObserverId, WeakDocument,
};

pub use life::{AbortController, AbortSignal, IntoScopedCleanup, Life, LifeSubscription, Logic};

pub use delegation::{DelegatedHandler, DelegationRegistry, EventDelegator, ListenerMap};

pub use bridge::LifeBridge;

// Re-export spark-signals for convenience
pub use spark_signals::{Signal, effect, signal};
