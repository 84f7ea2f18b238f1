//! Deferrable wiring records.
//!
//! An [`Autowired<T>`] slot is satisfied synchronously when the context chain
//! already holds `T`, and is otherwise linked into the registry's per-type
//! deferrable chain until a later registration satisfies it. Records are
//! consumed exactly once, by satisfaction or by cancellation, and any
//! finalization strategy attached to a record runs only after the context
//! lock has been released.

use std::any::TypeId;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::context::Context;
use crate::handle::AnyHandle;

/// Deferred work collected during a satisfaction cascade and executed after
/// the registry lock is dropped.
pub(crate) type Finalizer = Box<dyn FnOnce() + Send>;

/// Identity of a wiring record within its chain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct SlotId(usize);

/// Type-erased view of a deferrable slot, used by the registry to satisfy
/// records without knowing their declared type.
pub(crate) trait AnySlot: Send + Sync {
    fn declared_type(&self) -> TypeId;
    fn type_name(&self) -> &'static str;

    /// Attempt to satisfy the slot from `handle`. Fails when the handle's
    /// declared type is not the slot's. Satisfying an already-satisfied slot
    /// is a no-op.
    fn try_satisfy(&self, handle: &AnyHandle) -> bool;

    fn slot_id(&self) -> SlotId;
}

/// One record in a per-type singly linked chain. `next` links records waiting
/// on the same type; `dependent` links records waiting on this record's own
/// satisfaction.
pub(crate) struct Deferrable {
    pub(crate) slot: Arc<dyn AnySlot>,
    pub(crate) next: Option<Box<Deferrable>>,
    pub(crate) dependent: Option<Box<Deferrable>>,
    pub(crate) finalizer: Option<Finalizer>,
}

impl Deferrable {
    pub(crate) fn new(slot: Arc<dyn AnySlot>) -> Self {
        Self {
            slot,
            next: None,
            dependent: None,
            finalizer: None,
        }
    }
}

pub(crate) struct AutowiredInner<T: ?Sized> {
    cell: OnceLock<Arc<T>>,
}

impl<T: ?Sized> AutowiredInner<T> {
    pub(crate) fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub(crate) fn set(&self, value: Arc<T>) {
        let _ = self.cell.set(value);
    }

    pub(crate) fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }
}

impl<T: ?Sized + Send + Sync + 'static> AnySlot for AutowiredInner<T> {
    fn declared_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn try_satisfy(&self, handle: &AnyHandle) -> bool {
        match handle.downcast::<T>() {
            Some(value) => {
                let _ = self.cell.set(value);
                true
            }
            None => false,
        }
    }

    fn slot_id(&self) -> SlotId {
        SlotId((self as *const Self).cast::<()>() as usize)
    }
}

/// A typed wiring slot handed to the caller.
///
/// Dropping an unsatisfied slot cancels the pending record, leaving the
/// registry as it was before the autowire call.
pub struct Autowired<T: ?Sized + Send + Sync + 'static> {
    inner: Arc<AutowiredInner<T>>,
    context: Weak<Context>,
}

impl<T: ?Sized + Send + Sync + 'static> Autowired<T> {
    /// Autowire against the thread's current context.
    pub fn new() -> Self {
        Context::current().autowire::<T>()
    }

    pub(crate) fn from_parts(inner: Arc<AutowiredInner<T>>, context: Weak<Context>) -> Self {
        Self { inner, context }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.get()
    }

    pub fn is_satisfied(&self) -> bool {
        self.inner.cell.get().is_some()
    }

    /// Unlink the pending record, if any, and finalize it. A record that has
    /// already been satisfied or consumed leaves the registry untouched.
    pub fn cancel(self) {
        // Drop does the work.
    }

    /// Invoke `callback` with the satisfied value: immediately when the slot
    /// is already satisfied, otherwise once some future registration
    /// satisfies it. The callback runs outside the context lock. A cancelled
    /// slot drops the callback without invoking it.
    pub fn notify_when_autowired(&self, callback: impl FnOnce(Arc<T>) + Send + 'static) {
        if let Some(value) = self.inner.get() {
            callback(value);
            return;
        }
        let Some(context) = self.context.upgrade() else {
            return;
        };
        let notify = Arc::new(NotifySlot::<T> {
            cell: OnceLock::new(),
            callback: Mutex::new(Some(Box::new(callback))),
        });
        let finalizer: Finalizer = {
            let notify = notify.clone();
            Box::new(move || notify.run())
        };
        let mut record = Deferrable::new(notify.clone());
        record.finalizer = Some(finalizer);
        let attached =
            context.attach_dependent(TypeId::of::<T>(), AnySlot::slot_id(&*self.inner), record);
        if !attached {
            // The slot was satisfied between the check above and the chain
            // walk; deliver directly.
            if let Some(value) = self.inner.get() {
                if let Some(cb) = notify.callback.lock().take() {
                    cb(value);
                }
            }
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Drop for Autowired<T> {
    fn drop(&mut self) {
        if self.is_satisfied() {
            return;
        }
        if let Some(context) = self.context.upgrade() {
            context.cancel_deferred(TypeId::of::<T>(), AnySlot::slot_id(&*self.inner));
        }
    }
}

/// A notification-only record chained as a dependent of an [`Autowired`]
/// slot. Satisfaction stores the value; the finalizer delivers it to the
/// callback outside the lock.
pub(crate) struct NotifySlot<T: ?Sized + Send + Sync + 'static> {
    cell: OnceLock<Arc<T>>,
    callback: Mutex<Option<Box<dyn FnOnce(Arc<T>) + Send>>>,
}

impl<T: ?Sized + Send + Sync + 'static> NotifySlot<T> {
    fn run(&self) {
        if let Some(value) = self.cell.get() {
            if let Some(cb) = self.callback.lock().take() {
                cb(value.clone());
            }
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> AnySlot for NotifySlot<T> {
    fn declared_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn try_satisfy(&self, handle: &AnyHandle) -> bool {
        match handle.downcast::<T>() {
            Some(value) => {
                let _ = self.cell.set(value);
                true
            }
            None => false,
        }
    }

    fn slot_id(&self) -> SlotId {
        SlotId((self as *const Self).cast::<()>() as usize)
    }
}
