//! Cancellation Token - One abortable handle per alive period.
//!
//! An [`AbortController`] is minted by every `enter` and aborted by the
//! matching `exit`. Setup code receives the controller's [`AbortSignal`] and
//! watches it to stop in-flight work:
//!
//! - synchronously, with [`AbortSignal::on_abort`]
//! - asynchronously, with [`AbortSignal::cancelled`] or a tokio
//!   [`CancellationToken`] from [`AbortSignal::child_token`]
//!
//! A signal is aborted at most once and never reset. A signal that outlived
//! its period is simply an aborted signal.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::panic_message;
use crate::types::Unsubscribe;

struct SignalState {
    aborted: Cell<bool>,
    listeners: RefCell<BTreeMap<u64, Box<dyn FnOnce()>>>,
    next_id: Cell<u64>,
    token: CancellationToken,
}

/// Read side of a cancellation token.
#[derive(Clone)]
pub struct AbortSignal {
    state: Rc<SignalState>,
}

/// Write side of a cancellation token.
pub struct AbortController {
    signal: AbortSignal,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AbortController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortController")
            .field("signal", &self.signal)
            .finish()
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("listeners", &self.state.listeners.borrow().len())
            .finish()
    }
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            signal: AbortSignal {
                state: Rc::new(SignalState {
                    aborted: Cell::new(false),
                    listeners: RefCell::new(BTreeMap::new()),
                    next_id: Cell::new(0),
                    token: CancellationToken::new(),
                }),
            },
        }
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort the signal.
    ///
    /// Listeners run synchronously, once each, in registration order.
    /// A panicking listener is reported and does not stop the others.
    /// Aborting twice is a no-op.
    pub fn abort(&self) {
        let state = &self.signal.state;
        if state.aborted.replace(true) {
            return;
        }
        state.token.cancel();

        loop {
            let next = state.listeners.borrow_mut().pop_first();
            let Some((_, listener)) = next else { break };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(listener)) {
                error!(
                    error = %panic_message(payload.as_ref()),
                    "abort listener panicked"
                );
            }
        }
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.state.aborted.get()
    }

    /// Run `listener` when the signal aborts.
    ///
    /// On an already-aborted signal the listener runs immediately and the
    /// returned unsubscribe does nothing.
    pub fn on_abort(&self, listener: impl FnOnce() + 'static) -> Unsubscribe {
        if self.is_aborted() {
            listener();
            return Box::new(|| {});
        }

        let id = self.state.next_id.get();
        self.state.next_id.set(id + 1);
        self.state
            .listeners
            .borrow_mut()
            .insert(id, Box::new(listener));

        let weak: Weak<SignalState> = Rc::downgrade(&self.state);
        Box::new(move || {
            if let Some(state) = weak.upgrade() {
                let removed = state.listeners.borrow_mut().remove(&id);
                drop(removed);
            }
        })
    }

    /// Completes once the signal is aborted.
    pub async fn cancelled(&self) {
        self.state.token.cancelled().await
    }

    /// A tokio token cancelled together with this signal.
    ///
    /// Useful for handing cancellation to spawned tasks, which cannot hold
    /// the single-threaded signal itself.
    pub fn child_token(&self) -> CancellationToken {
        self.state.token.child_token()
    }

    /// True when both handles observe the same controller.
    pub fn same_as(&self, other: &AbortSignal) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_fires_listeners_once_in_order() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let order = Rc::new(RefCell::new(Vec::new()));

        for n in 0..3 {
            let order = order.clone();
            let _ = signal.on_abort(move || order.borrow_mut().push(n));
        }

        assert!(!signal.is_aborted());
        controller.abort();
        controller.abort();
        assert!(signal.is_aborted());
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribed_listener_does_not_fire() {
        let controller = AbortController::new();
        let fired = Rc::new(Cell::new(false));
        let fired_clone = fired.clone();

        let unsubscribe = controller.signal().on_abort(move || fired_clone.set(true));
        unsubscribe();
        unsubscribe();
        controller.abort();
        assert!(!fired.get());
    }

    #[test]
    fn test_late_listener_fires_immediately() {
        let controller = AbortController::new();
        controller.abort();

        let fired = Rc::new(Cell::new(0));
        let fired_clone = fired.clone();
        let _ = controller.signal().on_abort(move || fired_clone.set(fired_clone.get() + 1));
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let after = Rc::new(Cell::new(false));
        let after_clone = after.clone();

        let _ = signal.on_abort(|| panic!("listener failure"));
        let _ = signal.on_abort(move || after_clone.set(true));

        controller.abort();
        assert!(after.get());
    }

    #[test]
    fn test_child_token_follows_abort() {
        let controller = AbortController::new();
        let token = controller.signal().child_token();
        assert!(!token.is_cancelled());
        controller.abort();
        assert!(token.is_cancelled());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cancelled_future_completes() {
        let controller = AbortController::new();
        let signal = controller.signal();
        controller.abort();
        signal.cancelled().await;
        assert!(signal.is_aborted());
    }
}
