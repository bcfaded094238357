//! Life Module - Lifecycle controllers and their cancellation tokens.
//!
//! - **Controller** - `dormant <-> alive` state machine with scoped cleanups
//! - **Abort** - Per-period cancellation token (sync listeners + async future)
//! - **Scoped** - What a scoped setup may return

mod abort;
mod controller;
mod scoped;

pub use abort::*;
pub use controller::*;
pub use scoped::IntoScopedCleanup;
