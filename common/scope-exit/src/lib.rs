//! Scope guards for deferred actions.
//!
//! A [`ScopeExit`] owns an action and performs it when dropped,
//! including when a panic unwinds through the owning scope.
//! The action can also be performed early with [`ScopeExit::run`],
//! or handed back without being performed with [`ScopeExit::dismiss`].

#![warn(missing_docs)]

use std::mem::{ManuallyDrop, forget};

/// Guard that performs an action when dropped.
///
/// The action is performed at most once.
pub struct ScopeExit<F>
    where F: FnOnce()
{
    f: ManuallyDrop<F>,
}

/// Type-erased guard, for storing actions chosen at run time.
pub type BoxedScopeExit = ScopeExit<Box<dyn FnOnce() + Send>>;

impl<F> ScopeExit<F>
    where F: FnOnce()
{
    /// Create a guard that performs `f` when dropped.
    pub fn new(f: F) -> Self
    {
        Self{f: ManuallyDrop::new(f)}
    }

    /// Perform the action now rather than at the end of the scope.
    pub fn run(self)
    {
        drop(self);
    }

    /// Disarm the guard, returning the action without performing it.
    pub fn dismiss(mut self) -> F
    {
        // SAFETY: self is forgotten, so self.f is not taken again.
        let f = unsafe { ManuallyDrop::take(&mut self.f) };
        forget(self);
        f
    }
}

impl<F> ScopeExit<F>
    where F: FnOnce() + Send + 'static
{
    /// Erase the type of the action.
    pub fn boxed(self) -> BoxedScopeExit
    {
        ScopeExit::new(Box::new(self.dismiss()))
    }
}

impl<F> Drop for ScopeExit<F>
    where F: FnOnce()
{
    fn drop(&mut self)
    {
        // SAFETY: self.f will not be used anymore.
        let f = unsafe { ManuallyDrop::take(&mut self.f) };
        f();
    }
}

/// Define an ad-hoc scope guard.
///
/// The code passed to this macro is performed at the end of the scope.
/// It is performed when the scope ends or when a panic passes through.
///
/// # Examples
///
/// ```
/// # use scope_exit::scope_exit;
/// use std::cell::Cell;
/// let x = Cell::new(0);
/// {
///     scope_exit! { x.set(1); }
///     x.set(2);
/// }
/// assert_eq!(x.get(), 1);
/// ```
#[macro_export]
macro_rules! scope_exit
{
    { $($tt:tt)* } => {
        let __scope_exit = $crate::ScopeExit::new(|| { $($tt)* });
    };
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        std::{
            cell::Cell,
            panic::{AssertUnwindSafe, catch_unwind},
            sync::{Arc, atomic::{AtomicUsize, Ordering::SeqCst}},
        },
    };

    #[test]
    fn runs_on_panic()
    {
        let x = Cell::new(0);
        let result = catch_unwind(AssertUnwindSafe(|| {
            scope_exit! { x.set(x.get() + 1); }
            panic!("unwind");
        }));
        assert!(result.is_err());
        assert_eq!(x.get(), 1);
    }

    #[test]
    fn run_performs_action_once()
    {
        let count = Cell::new(0);
        let guard = ScopeExit::new(|| count.set(count.get() + 1));
        guard.run();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn dismiss_does_not_perform_action()
    {
        let count = Cell::new(0);
        let guard = ScopeExit::new(|| count.set(count.get() + 1));
        let f = guard.dismiss();
        assert_eq!(count.get(), 0);
        f();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn boxed_preserves_action()
    {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let guard = ScopeExit::new(move || { count2.fetch_add(1, SeqCst); });
        let guard: BoxedScopeExit = guard.boxed();
        assert_eq!(count.load(SeqCst), 0);
        drop(guard);
        assert_eq!(count.load(SeqCst), 1);
    }
}
