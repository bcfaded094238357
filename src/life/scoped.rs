//! Scoped setup return values and contained execution.
//!
//! A `scoped` setup function may return:
//!
//! | returns                   | registers                    |
//! |---------------------------|------------------------------|
//! | `()`                      | nothing                      |
//! | any `FnOnce() + 'static`  | that closure                 |
//! | `Option<T>`               | `T`'s cleanup when `Some`    |
//! | `Result<T, E: Display>`   | `T`'s cleanup, or a failure  |

use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::error::{ScopeFailure, panic_message};
use crate::types::Cleanup;

use super::abort::AbortSignal;

/// Conversion from a setup return value to an optional cleanup.
pub trait IntoScopedCleanup {
    /// `Err` carries the message of a failed setup.
    fn into_scoped_cleanup(self) -> Result<Option<Cleanup>, String>;
}

impl IntoScopedCleanup for () {
    fn into_scoped_cleanup(self) -> Result<Option<Cleanup>, String> {
        Ok(None)
    }
}

impl<F> IntoScopedCleanup for F
where
    F: FnOnce() + 'static,
{
    fn into_scoped_cleanup(self) -> Result<Option<Cleanup>, String> {
        Ok(Some(Box::new(self)))
    }
}

impl<T: IntoScopedCleanup> IntoScopedCleanup for Option<T> {
    fn into_scoped_cleanup(self) -> Result<Option<Cleanup>, String> {
        match self {
            Some(inner) => inner.into_scoped_cleanup(),
            None => Ok(None),
        }
    }
}

impl<T: IntoScopedCleanup, E: Display> IntoScopedCleanup for Result<T, E> {
    fn into_scoped_cleanup(self) -> Result<Option<Cleanup>, String> {
        match self {
            Ok(inner) => inner.into_scoped_cleanup(),
            Err(error) => Err(error.to_string()),
        }
    }
}

/// Run a setup function, containing panics and returned errors.
pub(crate) fn run_setup<S, R>(setup: S, signal: AbortSignal) -> Result<Option<Cleanup>, ScopeFailure>
where
    S: FnOnce(AbortSignal) -> R,
    R: IntoScopedCleanup,
{
    match catch_unwind(AssertUnwindSafe(move || setup(signal))) {
        Ok(returned) => returned
            .into_scoped_cleanup()
            .map_err(ScopeFailure::SetupFailed),
        Err(payload) => Err(ScopeFailure::SetupPanicked(panic_message(payload.as_ref()))),
    }
}

/// Run one cleanup, containing a panic.
pub(crate) fn run_cleanup(cleanup: Cleanup) -> Result<(), ScopeFailure> {
    catch_unwind(AssertUnwindSafe(cleanup))
        .map_err(|payload| ScopeFailure::CleanupPanicked(panic_message(payload.as_ref())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::life::AbortController;
    use std::cell::Cell;
    use std::rc::Rc;

    fn signal() -> AbortSignal {
        AbortController::new().signal()
    }

    #[test]
    fn test_unit_registers_nothing() {
        assert!(matches!(run_setup(|_| (), signal()), Ok(None)));
    }

    #[test]
    fn test_closure_registers_cleanup() {
        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();
        let cleanup = run_setup(move |_| move || ran_clone.set(true), signal())
            .unwrap()
            .unwrap();
        assert!(!ran.get());
        cleanup();
        assert!(ran.get());
    }

    #[test]
    fn test_option_and_result() {
        let none: Option<fn()> = None;
        assert!(matches!(run_setup(move |_| none, signal()), Ok(None)));

        let ok: Result<fn(), String> = Ok(|| {});
        assert!(matches!(run_setup(move |_| ok, signal()), Ok(Some(_))));

        let failed = run_setup(|_| Err::<(), _>("socket closed"), signal());
        assert_eq!(
            failed.err(),
            Some(ScopeFailure::SetupFailed("socket closed".to_string()))
        );
    }

    #[test]
    fn test_setup_panic_is_contained() {
        let result = run_setup(|_| -> () { panic!("setup exploded") }, signal());
        assert_eq!(
            result.err(),
            Some(ScopeFailure::SetupPanicked("setup exploded".to_string()))
        );
    }

    #[test]
    fn test_cleanup_panic_is_contained() {
        fn exploding() {
            panic!("cleanup exploded");
        }

        let result = run_cleanup(Box::new(exploding));
        assert_eq!(
            result,
            Err(ScopeFailure::CleanupPanicked("cleanup exploded".to_string()))
        );
        assert_eq!(run_cleanup(Box::new(|| {})), Ok(()));
    }
}
