//! Member declaration.
//!
//! A [`Member`] bundles one object with the set of types it is registered
//! under and the capabilities it carries. The builder methods mirror the
//! capability set: an object may be a context member, a worker, an event
//! receiver on any number of interfaces, an exception filter, a bolt, and a
//! packet subscriber, in any combination.

use std::sync::Arc;

use crate::contracts::{Bolt, ContextMember, CoreRunnable, ExceptionFilter, PacketSubscriber};
use crate::handle::{AnyHandle, ObjectId};

/// One object plus its declared types and capability set, ready for
/// [`Context::add`](crate::context::Context::add).
#[derive(Clone)]
pub struct Member {
    pub(crate) object: AnyHandle,
    pub(crate) casts: Vec<AnyHandle>,
    pub(crate) context_member: Option<Arc<dyn ContextMember>>,
    pub(crate) runnable: Option<Arc<dyn CoreRunnable>>,
    pub(crate) receivers: Vec<AnyHandle>,
    pub(crate) filter: Option<Arc<dyn ExceptionFilter>>,
    pub(crate) bolt: Option<Arc<dyn Bolt>>,
    pub(crate) subscriber: Option<PacketSubscriber>,
}

impl Member {
    /// Declare `object` under its concrete type.
    pub fn new<T: Send + Sync + 'static>(object: Arc<T>) -> Self {
        Self {
            object: AnyHandle::new::<T>(object),
            casts: Vec::new(),
            context_member: None,
            runnable: None,
            receivers: Vec::new(),
            filter: None,
            bolt: None,
            subscriber: None,
        }
    }

    /// Additionally declare the object under interface `T`, so that slots of
    /// that type can be satisfied by it. The handle must refer to the same
    /// allocation as the concrete object; pass a coerced clone:
    ///
    /// ```ignore
    /// Member::new(obj.clone()).with_interface::<dyn Greeter>(obj)
    /// ```
    pub fn with_interface<T: ?Sized + Send + Sync + 'static>(mut self, iface: Arc<T>) -> Self {
        let handle = AnyHandle::new::<T>(iface);
        debug_assert_eq!(
            handle.object_id(),
            self.object.object_id(),
            "interface handle must alias the member object"
        );
        self.casts.push(handle);
        self
    }

    pub fn with_context_member(mut self, member: Arc<dyn ContextMember>) -> Self {
        self.context_member = Some(member);
        self
    }

    pub fn with_runnable(mut self, runnable: Arc<dyn CoreRunnable>) -> Self {
        self.runnable = Some(runnable);
        self
    }

    /// Register the object as a receiver on event interface `E`.
    pub fn with_receiver<E: ?Sized + Send + Sync + 'static>(mut self, receiver: Arc<E>) -> Self {
        let handle = AnyHandle::new::<E>(receiver);
        debug_assert_eq!(
            handle.object_id(),
            self.object.object_id(),
            "receiver handle must alias the member object"
        );
        self.receivers.push(handle);
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn ExceptionFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_bolt(mut self, bolt: Arc<dyn Bolt>) -> Self {
        self.bolt = Some(bolt);
        self
    }

    pub fn with_subscriber(mut self, subscriber: PacketSubscriber) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    pub fn object_id(&self) -> ObjectId {
        self.object.object_id()
    }

    /// All declared types: the concrete type first, then every interface.
    pub(crate) fn declared(&self) -> impl Iterator<Item = &AnyHandle> {
        std::iter::once(&self.object).chain(self.casts.iter())
    }
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("concrete", &self.object.type_name())
            .field(
                "interfaces",
                &self.casts.iter().map(|c| c.type_name()).collect::<Vec<_>>(),
            )
            .field("is_context_member", &self.context_member.is_some())
            .field("is_runnable", &self.runnable.is_some())
            .field("receiver_count", &self.receivers.len())
            .field("is_filter", &self.filter.is_some())
            .field("is_bolt", &self.bolt.is_some())
            .field("is_subscriber", &self.subscriber.is_some())
            .finish()
    }
}
