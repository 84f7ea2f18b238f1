//! Outstanding-work accounting.
//!
//! Every running worker in a context shares one [`Outstanding`] token. The
//! token holds the context alive, and holds the parent context's token alive,
//! so a subtree with running work keeps its ancestors charged. Dropping the
//! last clone runs a hook that clears the context's weak reference and wakes
//! its state-change condition, which is what makes [`Context::wait`]
//! (crate::context::Context::wait) joinable.

use std::sync::{Arc, Weak};

use crate::context::Context;

/// Shared handle representing one context's outstanding work.
#[derive(Clone)]
pub struct Outstanding {
    inner: Arc<OutstandingInner>,
}

pub(crate) struct OutstandingInner {
    context: Arc<Context>,
    _parent: Option<Outstanding>,
}

impl Outstanding {
    pub(crate) fn new(context: Arc<Context>, parent: Option<Outstanding>) -> Self {
        Self {
            inner: Arc::new(OutstandingInner {
                context,
                _parent: parent,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<OutstandingInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_weak(weak: &Weak<OutstandingInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

impl Drop for OutstandingInner {
    fn drop(&mut self) {
        self.context.on_outstanding_released();
    }
}

impl std::fmt::Debug for Outstanding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outstanding")
            .field("holders", &Arc::strong_count(&self.inner))
            .finish()
    }
}
