//! Type-erased value slots.
//!
//! An [`AnyHandle`] wraps a shared reference under one declared type, which
//! may be a concrete type or a trait object. The registry stores one handle
//! per occupied slot; autowiring recovers the typed reference by downcasting.

use std::any::{Any, TypeId};
use std::sync::Arc;

/// Identity of a registered object, independent of the type it was declared
/// under. Two handles produced from the same allocation compare equal even
/// when one is a concrete `Arc<T>` and the other a coerced `Arc<dyn Trait>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectId(usize);

impl ObjectId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// A shared reference to a member, erased down to its declared type id.
///
/// The handle records the declared type at construction; `downcast` succeeds
/// only for that exact type. This is the construction-time vtable that stands
/// in for a language-level dynamic cast.
#[derive(Clone)]
pub struct AnyHandle {
    type_id: TypeId,
    type_name: &'static str,
    object: ObjectId,
    inner: Arc<dyn Any + Send + Sync>,
}

impl AnyHandle {
    pub fn new<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            object: ObjectId(Arc::as_ptr(&value).cast::<()>() as usize),
            inner: Arc::new(value),
        }
    }

    /// The declared type this handle was constructed under.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Allocation identity of the underlying object.
    pub fn object_id(&self) -> ObjectId {
        self.object
    }

    /// Recover the typed reference. Returns `None` unless `T` is exactly the
    /// declared type.
    pub fn downcast<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner.downcast_ref::<Arc<T>>().cloned()
    }
}

impl std::fmt::Debug for AnyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyHandle")
            .field("type", &self.type_name)
            .field("object", &format_args!("0x{:x}", self.object.0))
            .finish()
    }
}
