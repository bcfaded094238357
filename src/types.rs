//! Core types shared by every subsystem.
//!
//! - [`Cleanup`] - one-shot callback returned from setup code
//! - [`Unsubscribe`] - idempotent removal handle for subscriptions
//! - [`LifeEvent`] - the two lifecycle transitions
//! - [`ObserveOptions`] - which tree mutations an observer sees

// =============================================================================
// Callback Types
// =============================================================================

/// Cleanup function returned by setup code.
///
/// Runs at most once; ownership is consumed by the call.
pub type Cleanup = Box<dyn FnOnce()>;

/// Removal handle returned by subscriptions and delegations.
///
/// Safe to call any number of times; only the first call has an effect.
pub type Unsubscribe = Box<dyn Fn()>;

// =============================================================================
// Lifecycle Events
// =============================================================================

/// A lifecycle transition a subscriber can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifeEvent {
    /// `dormant -> alive`
    Enter,
    /// `alive -> dormant`
    Exit,
}

impl LifeEvent {
    /// Stable lowercase name, used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
        }
    }
}

impl std::fmt::Display for LifeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Observation Options (bitflags)
// =============================================================================

bitflags::bitflags! {
    /// Which mutations a tree observer is notified about.
    ///
    /// Combine with bitwise OR: `ObserveOptions::CHILD_LIST | ObserveOptions::SUBTREE`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObserveOptions: u8 {
        const NONE = 0;
        /// Insertions and removals of the observed node's direct children.
        const CHILD_LIST = 1 << 0;
        /// Extend `CHILD_LIST` to every descendant of the observed node.
        const SUBTREE = 1 << 1;
    }
}

impl ObserveOptions {
    /// Child-list changes anywhere below the observed node.
    pub fn tree() -> Self {
        Self::CHILD_LIST | Self::SUBTREE
    }
}
