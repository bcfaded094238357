//! Lifecycle Controller - `dormant <-> alive` state machine.
//!
//! A [`Life`] belongs to one logical unit of work (usually a component).
//! It starts dormant. `enter` makes it alive and mints a cancellation token;
//! `exit` makes it dormant again, aborts the token, and runs every cleanup
//! collected while it was alive.
//!
//! # API
//!
//! - `enter()` / `exit()` - Transitions (idempotent)
//! - `scoped(setup)` - Run setup now, collect its cleanup for the next exit
//! - `when(event).subscribe(fn)` - Durable transition subscribers
//! - `adopt(logic)` - Wire `on_enter`/`on_exit`/`startup` in one call
//! - `alive()` - Reactive alive flag
//!
//! # Example
//!
//! ```ignore
//! use spark_life::{Life, LifeEvent};
//!
//! let life = Life::new();
//! let _unsubscribe = life.when(LifeEvent::Enter).subscribe(|| println!("mounted"));
//!
//! life.enter();
//! life.scoped(|signal| {
//!     let poller = start_polling(signal.child_token());
//!     move || poller.stop()
//! });
//! life.exit(); // signal aborted, then poller.stop() runs once
//! ```
//!
//! # Failures
//!
//! Setup and cleanup failures are contained and logged. Subscriber panics
//! are not caught: they surface to whoever drove the transition. An exit
//! subscriber panic resumes only after the period's cleanups have run.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::{Rc, Weak};

use spark_signals::{Signal, signal};
use tracing::{debug, error};

use super::abort::{AbortController, AbortSignal};
use super::scoped::{IntoScopedCleanup, run_cleanup, run_setup};
use crate::types::{Cleanup, LifeEvent, Unsubscribe};

type Subscriber = Rc<dyn Fn()>;

thread_local! {
    /// Counter for log-friendly controller ids.
    static LIFE_COUNTER: Cell<u64> = const { Cell::new(0) };
}

// =============================================================================
// Subscriber Set
// =============================================================================

/// Insertion-ordered subscribers, iterated live.
#[derive(Default)]
struct SubscriberSet {
    entries: BTreeMap<u64, Subscriber>,
}

impl SubscriberSet {
    /// Call every subscriber in insertion order.
    ///
    /// The set is re-read before each call: subscribers added during the pass
    /// run in it, subscribers removed before their turn do not.
    fn notify(set: &RefCell<SubscriberSet>) {
        let mut cursor: Option<u64> = None;
        loop {
            let next = {
                let set = set.borrow();
                let lower = match cursor {
                    None => Bound::Unbounded,
                    Some(last) => Bound::Excluded(last),
                };
                let next = set
                    .entries
                    .range((lower, Bound::Unbounded))
                    .next()
                    .map(|(id, callback)| (*id, callback.clone()));
                next
            };
            let Some((id, callback)) = next else { break };
            cursor = Some(id);
            callback();
        }
    }
}

// =============================================================================
// Life
// =============================================================================

struct LifeInner {
    id: u64,
    /// Transition guard. Not reactive, so transitions never subscribe the caller.
    alive_flag: Cell<bool>,
    /// Reactive mirror of `alive_flag` for effects and deriveds.
    alive: Signal<bool>,
    /// Bumped on every enter.
    period: Cell<u64>,
    controller: RefCell<Option<AbortController>>,
    scoped_cleanups: RefCell<Vec<Cleanup>>,
    on_enter: RefCell<SubscriberSet>,
    on_exit: RefCell<SubscriberSet>,
    next_subscriber: Cell<u64>,
}

/// Lifecycle controller handle.
///
/// Cloning is cheap; clones drive the same controller.
#[derive(Clone)]
pub struct Life {
    inner: Rc<LifeInner>,
}

impl Default for Life {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Life {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Life")
            .field("id", &self.inner.id)
            .field("alive", &self.inner.alive_flag.get())
            .field("scoped_cleanups", &self.inner.scoped_cleanups.borrow().len())
            .finish()
    }
}

impl Life {
    /// Create a dormant controller.
    pub fn new() -> Self {
        let id = LIFE_COUNTER.with(|counter| {
            let id = counter.get();
            counter.set(id + 1);
            id
        });
        Self {
            inner: Rc::new(LifeInner {
                id,
                alive_flag: Cell::new(false),
                alive: signal(false),
                period: Cell::new(0),
                controller: RefCell::new(None),
                scoped_cleanups: RefCell::new(Vec::new()),
                on_enter: RefCell::new(SubscriberSet::default()),
                on_exit: RefCell::new(SubscriberSet::default()),
                next_subscriber: Cell::new(0),
            }),
        }
    }

    fn downgrade(&self) -> Weak<LifeInner> {
        Rc::downgrade(&self.inner)
    }

    /// True when both handles drive the same controller.
    pub fn ptr_eq(&self, other: &Life) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the controller is alive.
    ///
    /// Reading this inside an effect or derived subscribes it to transitions.
    pub fn alive(&self) -> bool {
        self.inner.alive.get()
    }

    /// The reactive alive flag itself.
    pub fn alive_signal(&self) -> Signal<bool> {
        self.inner.alive.clone()
    }

    /// Cancellation token of the current alive period, if any.
    pub fn token(&self) -> Option<AbortSignal> {
        self.inner
            .controller
            .borrow()
            .as_ref()
            .map(AbortController::signal)
    }

    /// Number of cleanups waiting for the next exit.
    pub fn pending_cleanups(&self) -> usize {
        self.inner.scoped_cleanups.borrow().len()
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// `dormant -> alive`. No-op when already alive.
    ///
    /// Mints a fresh token, then runs enter subscribers in order.
    pub fn enter(&self) {
        let inner = &self.inner;
        if inner.alive_flag.get() {
            return;
        }

        let stale = std::mem::take(&mut *inner.scoped_cleanups.borrow_mut());
        drop(stale);

        inner.alive_flag.set(true);
        inner.period.set(inner.period.get() + 1);
        *inner.controller.borrow_mut() = Some(AbortController::new());
        inner.alive.set(true);
        debug!(life = inner.id, period = inner.period.get(), "enter");

        SubscriberSet::notify(&inner.on_enter);
    }

    /// `alive -> dormant`. No-op when already dormant.
    ///
    /// Aborts the token, runs exit subscribers in order, then runs each
    /// scoped cleanup of the period once, in registration order.
    pub fn exit(&self) {
        let inner = &self.inner;
        if !inner.alive_flag.get() {
            return;
        }

        inner.alive_flag.set(false);
        inner.alive.set(false);
        debug!(life = inner.id, period = inner.period.get(), "exit");

        // Detach the period's cleanups first so an enter triggered by an exit
        // subscriber starts a clean period without dropping them.
        let cleanups = std::mem::take(&mut *inner.scoped_cleanups.borrow_mut());

        let controller = inner.controller.borrow_mut().take();
        if let Some(controller) = controller {
            controller.abort();
        }

        // A panicking subscriber still propagates, but only after the
        // period's cleanups have run.
        let notified = catch_unwind(AssertUnwindSafe(|| SubscriberSet::notify(&inner.on_exit)));

        for cleanup in cleanups {
            if let Err(failure) = run_cleanup(cleanup) {
                error!(
                    life = inner.id,
                    label = failure.as_label(),
                    error = %failure,
                    "error executing a scoped cleanup"
                );
            }
        }

        if let Err(payload) = notified {
            resume_unwind(payload);
        }
    }

    // -------------------------------------------------------------------------
    // Scoped resources
    // -------------------------------------------------------------------------

    /// Run `setup` now with the current token; keep its cleanup for the next exit.
    ///
    /// Does nothing while dormant. A setup that panics or returns `Err` is
    /// reported and registers nothing. If setup itself ended the period it
    /// was running in, the returned cleanup runs immediately.
    pub fn scoped<S, R>(&self, setup: S)
    where
        S: FnOnce(AbortSignal) -> R,
        R: IntoScopedCleanup,
    {
        let inner = &self.inner;
        if !inner.alive_flag.get() {
            return;
        }
        let Some(signal) = self.token() else { return };
        let period = inner.period.get();

        let cleanup = match run_setup(setup, signal) {
            Ok(Some(cleanup)) => cleanup,
            Ok(None) => return,
            Err(failure) => {
                error!(
                    life = inner.id,
                    label = failure.as_label(),
                    error = %failure,
                    "error executing a scoped lifecycle function"
                );
                return;
            }
        };

        if inner.alive_flag.get() && inner.period.get() == period {
            inner.scoped_cleanups.borrow_mut().push(cleanup);
        } else if let Err(failure) = run_cleanup(cleanup) {
            error!(
                life = inner.id,
                label = failure.as_label(),
                error = %failure,
                "error executing a scoped cleanup"
            );
        }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Subscription point for one transition.
    pub fn when(&self, event: LifeEvent) -> LifeSubscription<'_> {
        LifeSubscription { life: self, event }
    }

    fn subscribers(&self, event: LifeEvent) -> &RefCell<SubscriberSet> {
        match event {
            LifeEvent::Enter => &self.inner.on_enter,
            LifeEvent::Exit => &self.inner.on_exit,
        }
    }

    fn subscribe(&self, event: LifeEvent, callback: Subscriber) -> Unsubscribe {
        let id = self.inner.next_subscriber.get();
        self.inner.next_subscriber.set(id + 1);
        self.subscribers(event)
            .borrow_mut()
            .entries
            .insert(id, callback);

        let weak = self.downgrade();
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                let life = Life { inner };
                let removed = life.subscribers(event).borrow_mut().entries.remove(&id);
                drop(removed);
            }
        })
    }

    /// Adopt a piece of logic for the lifetime of this controller.
    ///
    /// `on_enter`/`on_exit` become durable subscribers. `startup` runs as a
    /// scoped setup on every enter, so its cleanup is tied to each period.
    /// The returned handle removes everything that was wired.
    pub fn adopt(&self, logic: Logic) -> Unsubscribe {
        let mut wired: Vec<Unsubscribe> = Vec::new();

        if let Some(on_enter) = logic.on_enter {
            wired.push(self.subscribe(LifeEvent::Enter, on_enter));
        }
        if let Some(on_exit) = logic.on_exit {
            wired.push(self.subscribe(LifeEvent::Exit, on_exit));
        }
        if let Some(startup) = logic.startup {
            let weak = self.downgrade();
            wired.push(self.subscribe(
                LifeEvent::Enter,
                Rc::new(move || {
                    let Some(inner) = weak.upgrade() else { return };
                    let startup = startup.clone();
                    Life { inner }.scoped(move |signal| startup(signal));
                }),
            ));
        }

        Box::new(move || {
            for unsubscribe in &wired {
                unsubscribe();
            }
        })
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Returned by [`Life::when`].
pub struct LifeSubscription<'a> {
    life: &'a Life,
    event: LifeEvent,
}

impl LifeSubscription<'_> {
    /// Run `callback` on every future occurrence of the transition.
    ///
    /// Does not fire for a transition that already happened.
    pub fn subscribe(self, callback: impl Fn() + 'static) -> Unsubscribe {
        self.life.subscribe(self.event, Rc::new(callback))
    }
}

// =============================================================================
// Logic
// =============================================================================

type StartupFn = Rc<dyn Fn(AbortSignal) -> Result<Option<Cleanup>, String>>;

/// Logic adopted by a [`Life`].
///
/// ```ignore
/// life.adopt(
///     Logic::new()
///         .on_enter(|| println!("enter"))
///         .startup(|signal| {
///             let timer = Timer::start(signal);
///             move || timer.cancel()
///         }),
/// );
/// ```
#[derive(Default)]
pub struct Logic {
    on_enter: Option<Subscriber>,
    on_exit: Option<Subscriber>,
    startup: Option<StartupFn>,
}

impl Logic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_enter(mut self, callback: impl Fn() + 'static) -> Self {
        self.on_enter = Some(Rc::new(callback));
        self
    }

    pub fn on_exit(mut self, callback: impl Fn() + 'static) -> Self {
        self.on_exit = Some(Rc::new(callback));
        self
    }

    /// Setup run inside `scoped` on every enter.
    pub fn startup<F, R>(mut self, setup: F) -> Self
    where
        F: Fn(AbortSignal) -> R + 'static,
        R: IntoScopedCleanup,
    {
        self.startup = Some(Rc::new(move |signal| setup(signal).into_scoped_cleanup()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, impl Fn() + Clone + 'static) {
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        (count, move || count_clone.set(count_clone.get() + 1))
    }

    #[test]
    fn test_initial_state() {
        let life = Life::new();
        assert!(!life.alive());
        assert!(life.token().is_none());
        assert_eq!(life.pending_cleanups(), 0);
    }

    #[test]
    fn test_scoped_runs_when_alive() {
        let life = Life::new();
        let (calls, bump) = counter();

        life.enter();
        life.scoped(move |_| bump());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_scoped_skipped_when_dormant() {
        let life = Life::new();
        let (calls, bump) = counter();

        life.scoped(move |_| bump());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_signal_aborted_on_exit() {
        let life = Life::new();
        let (aborts, bump) = counter();

        life.enter();
        life.scoped(move |signal| {
            let _ = signal.on_abort(bump);
        });
        assert_eq!(aborts.get(), 0);
        life.exit();
        assert_eq!(aborts.get(), 1);
    }

    #[test]
    fn test_fresh_token_per_period() {
        let life = Life::new();
        life.enter();
        let first = life.token().unwrap();
        life.exit();
        assert!(first.is_aborted());
        assert!(life.token().is_none());

        life.enter();
        let second = life.token().unwrap();
        assert!(!second.is_aborted());
        assert!(!first.same_as(&second));
        assert!(first.is_aborted());
    }

    #[test]
    fn test_enter_subscriber_fires_once_per_transition() {
        let life = Life::new();
        let (calls, bump) = counter();

        let _unsubscribe = life.when(LifeEvent::Enter).subscribe(bump);
        assert_eq!(calls.get(), 0);
        life.enter();
        assert_eq!(calls.get(), 1);
        life.enter();
        assert_eq!(calls.get(), 1);

        life.exit();
        life.enter();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_exit_subscriber_fires_once_per_transition() {
        let life = Life::new();
        let (calls, bump) = counter();

        let _unsubscribe = life.when(LifeEvent::Exit).subscribe(bump);
        life.exit();
        assert_eq!(calls.get(), 0);

        life.enter();
        assert_eq!(calls.get(), 0);
        life.exit();
        assert_eq!(calls.get(), 1);
        life.exit();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_late_subscriber_is_not_retroactive() {
        let life = Life::new();
        let (calls, bump) = counter();

        life.enter();
        let _unsubscribe = life.when(LifeEvent::Enter).subscribe(bump);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let life = Life::new();
        let (calls, bump) = counter();

        let unsubscribe = life.when(LifeEvent::Enter).subscribe(bump);
        unsubscribe();
        unsubscribe();
        life.enter();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_subscriber_order_and_live_iteration() {
        let life = Life::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let late_unsubscribe: Rc<RefCell<Option<Unsubscribe>>> = Rc::new(RefCell::new(None));

        let order_first = order.clone();
        let life_clone = life.clone();
        let late_slot = late_unsubscribe.clone();
        let _first = life.when(LifeEvent::Enter).subscribe(move || {
            order_first.borrow_mut().push("first");
            if late_slot.borrow().is_none() {
                let order_added = order_first.clone();
                let unsubscribe = life_clone
                    .when(LifeEvent::Enter)
                    .subscribe(move || order_added.borrow_mut().push("added"));
                *late_slot.borrow_mut() = Some(unsubscribe);
            }
        });

        let order_second = order.clone();
        let _second = life
            .when(LifeEvent::Enter)
            .subscribe(move || order_second.borrow_mut().push("second"));

        life.enter();
        assert_eq!(*order.borrow(), vec!["first", "second", "added"]);
    }

    #[test]
    fn test_reentrant_enter_is_noop() {
        let life = Life::new();
        let (calls, bump) = counter();

        let life_clone = life.clone();
        let _unsubscribe = life.when(LifeEvent::Enter).subscribe(move || {
            bump();
            life_clone.enter();
        });
        life.enter();
        assert_eq!(calls.get(), 1);
        assert!(life.alive());
    }

    #[test]
    fn test_cleanup_runs_once_on_exit() {
        let life = Life::new();
        let (setups, bump_setup) = counter();
        let (cleanups, bump_cleanup) = counter();

        life.enter();
        life.scoped(move |_| {
            bump_setup();
            bump_cleanup
        });
        assert_eq!(setups.get(), 1);
        assert_eq!(cleanups.get(), 0);
        assert_eq!(life.pending_cleanups(), 1);

        life.exit();
        assert_eq!(cleanups.get(), 1);
        assert_eq!(life.pending_cleanups(), 0);

        life.exit();
        life.enter();
        life.exit();
        assert_eq!(cleanups.get(), 1);
    }

    #[test]
    fn test_cleanup_never_runs_without_exit() {
        let life = Life::new();
        let (cleanups, bump) = counter();

        life.enter();
        life.scoped(move |_| bump);
        assert_eq!(cleanups.get(), 0);
    }

    #[test]
    fn test_multiple_cleanups_run_in_order() {
        let life = Life::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        life.enter();
        for n in 0..3 {
            let order = order.clone();
            life.scoped(move |_| move || order.borrow_mut().push(n));
        }
        life.exit();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_exit_order_abort_subscribers_cleanups() {
        let life = Life::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let order_sub = order.clone();
        let _unsubscribe = life
            .when(LifeEvent::Exit)
            .subscribe(move || order_sub.borrow_mut().push("subscriber"));

        life.enter();
        let order_scope = order.clone();
        life.scoped(move |signal| {
            let order_abort = order_scope.clone();
            let _ = signal.on_abort(move || order_abort.borrow_mut().push("abort"));
            move || order_scope.borrow_mut().push("cleanup")
        });

        life.exit();
        assert_eq!(*order.borrow(), vec!["abort", "subscriber", "cleanup"]);
    }

    #[test]
    fn test_failing_cleanup_does_not_block_others() {
        let life = Life::new();
        let (cleanups, bump) = counter();

        fn failing_cleanup() {
            panic!("first cleanup fails");
        }

        life.enter();
        life.scoped(|_| failing_cleanup);
        life.scoped(move |_| bump);
        life.exit();

        assert_eq!(cleanups.get(), 1);
        assert!(!life.alive());
    }

    #[test]
    fn test_failing_setup_registers_nothing() {
        let life = Life::new();

        life.enter();
        life.scoped(|_| -> fn() { panic!("setup fails") });
        life.scoped(|_| Err::<fn(), _>("setup refused"));
        assert_eq!(life.pending_cleanups(), 0);
        assert!(life.alive());
    }

    #[test]
    fn test_setup_that_exits_runs_its_cleanup_now() {
        let life = Life::new();
        let (cleanups, bump) = counter();

        life.enter();
        let life_clone = life.clone();
        life.scoped(move |_| {
            life_clone.exit();
            bump
        });
        assert_eq!(cleanups.get(), 1);
        assert_eq!(life.pending_cleanups(), 0);
    }

    #[test]
    fn test_reenter_from_exit_subscriber_keeps_new_period() {
        let life = Life::new();
        let (old_cleanups, bump_old) = counter();
        let (new_cleanups, bump_new) = counter();

        life.enter();
        life.scoped(move |_| bump_old);

        let life_clone = life.clone();
        let reentered = Rc::new(Cell::new(false));
        let _unsubscribe = life.when(LifeEvent::Exit).subscribe(move || {
            if !reentered.replace(true) {
                life_clone.enter();
                let bump_new = bump_new.clone();
                life_clone.scoped(move |_| bump_new);
            }
        });

        life.exit();
        assert_eq!(old_cleanups.get(), 1);
        assert_eq!(new_cleanups.get(), 0);
        assert!(life.alive());
        assert_eq!(life.pending_cleanups(), 1);
    }

    #[test]
    #[should_panic(expected = "subscriber failure")]
    fn test_subscriber_panic_propagates() {
        let life = Life::new();
        let _unsubscribe = life
            .when(LifeEvent::Enter)
            .subscribe(|| panic!("subscriber failure"));
        life.enter();
    }

    #[test]
    fn test_exit_subscriber_panic_still_runs_cleanups() {
        let life = Life::new();
        let (cleanups, cleanup) = counter();
        let (later, bump_later) = counter();
        let _failing = life
            .when(LifeEvent::Exit)
            .subscribe(|| panic!("exit subscriber failure"));
        let _later = life.when(LifeEvent::Exit).subscribe(bump_later);

        life.enter();
        life.scoped(move |_| cleanup);
        let result = catch_unwind(AssertUnwindSafe(|| life.exit()));

        assert!(result.is_err());
        assert!(!life.alive());
        assert_eq!(cleanups.get(), 1);
        assert_eq!(later.get(), 0);
        assert_eq!(life.pending_cleanups(), 0);

        life.enter();
        assert!(life.alive());
    }

    #[test]
    fn test_adopt_on_enter_on_exit() {
        let life = Life::new();
        let (enters, bump_enter) = counter();
        let (exits, bump_exit) = counter();

        let _adopted = life.adopt(Logic::new().on_enter(bump_enter).on_exit(bump_exit));
        assert_eq!(enters.get(), 0);

        life.enter();
        assert_eq!(enters.get(), 1);
        assert_eq!(exits.get(), 0);
        life.exit();
        assert_eq!(exits.get(), 1);
    }

    #[test]
    fn test_adopt_startup_runs_every_enter() {
        let life = Life::new();
        let (startups, bump_startup) = counter();
        let (cleanups, bump_cleanup) = counter();
        let tokens: Rc<RefCell<Vec<AbortSignal>>> = Rc::new(RefCell::new(Vec::new()));

        let tokens_clone = tokens.clone();
        let _adopted = life.adopt(Logic::new().startup(move |signal: AbortSignal| {
            assert!(!signal.is_aborted());
            tokens_clone.borrow_mut().push(signal);
            bump_startup();
            bump_cleanup.clone()
        }));
        assert_eq!(startups.get(), 0);

        life.enter();
        assert_eq!(startups.get(), 1);
        life.exit();
        assert_eq!(cleanups.get(), 1);

        life.enter();
        assert_eq!(startups.get(), 2);
        life.exit();
        assert_eq!(cleanups.get(), 2);

        let tokens = tokens.borrow();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(AbortSignal::is_aborted));
        assert!(!tokens[0].same_as(&tokens[1]));
    }

    #[test]
    fn test_unadopt() {
        let life = Life::new();
        let (enters, bump) = counter();

        let adopted = life.adopt(Logic::new().on_enter(bump.clone()).startup(move |_| bump()));
        adopted();
        life.enter();
        assert_eq!(enters.get(), 0);
    }

    #[test]
    fn test_alive_signal_tracks_transitions() {
        let life = Life::new();
        let alive = life.alive_signal();
        assert!(!alive.get());
        life.enter();
        assert!(alive.get());
        life.exit();
        assert!(!alive.get());
    }
}
