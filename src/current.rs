//! The thread-local current-context pointer.
//!
//! Every thread has a current context; an unset slot resolves to the global
//! context. Freshly constructed members discover the context they belong to
//! through this pointer, so no construction site needs an explicit context
//! parameter.

use std::cell::RefCell;
use std::sync::Arc;

use crate::context::Context;

thread_local! {
    static CURRENT: RefCell<Option<Arc<Context>>> = const { RefCell::new(None) };
}

pub(crate) fn get() -> Option<Arc<Context>> {
    CURRENT.with(|c| c.borrow().clone())
}

pub(crate) fn replace(value: Option<Arc<Context>>) -> Option<Arc<Context>> {
    CURRENT.with(|c| c.replace(value))
}

/// Whether `context` is this thread's current context. Safe to call from a
/// destructor; a torn-down thread-local reads as "not current".
pub(crate) fn is_current(context: &Context) -> bool {
    CURRENT
        .try_with(|c| {
            c.borrow()
                .as_ref()
                .map_or(false, |cur| std::ptr::eq(Arc::as_ptr(cur), context))
        })
        .unwrap_or(false)
}

/// Binds a context as current for the guard's lifetime, restoring the prior
/// binding exactly on every exit path.
pub struct ScopedContext {
    prior: Option<Arc<Context>>,
}

impl ScopedContext {
    pub fn enter(context: &Arc<Context>) -> Self {
        let prior = replace(Some(context.clone()));
        Self { prior }
    }
}

impl Drop for ScopedContext {
    fn drop(&mut self) {
        replace(self.prior.take());
    }
}
