//! Capability contracts.
//!
//! A member added to a context may carry any combination of these traits.
//! The [`Member`](crate::member::Member) builder records which capabilities an
//! object exposes; the context dispatches to each capability list during add,
//! initiate, shutdown, and teardown.

use std::any::TypeId;
use std::sync::Arc;

use crate::context::{Context, Sigil};
use crate::handle::{AnyHandle, ObjectId};
use crate::outstanding::Outstanding;

/// A member that participates in teardown notification.
///
/// Called once from the context destructor, after event delivery has been
/// severed.
pub trait ContextMember: Send + Sync {
    fn notify_context_teardown(&self);
}

/// A long-running worker owned by a context.
///
/// `start` receives the context's outstanding-work token; the worker must
/// hold it for as long as it is running and release it when it finishes, so
/// that [`Context::wait`] can observe quiescence.
pub trait CoreRunnable: Send + Sync {
    /// Diagnostic name, listed by [`Context::dump`].
    fn name(&self) -> Option<&str> {
        None
    }

    fn start(&self, outstanding: Outstanding);

    /// `graceful` requests the worker drain pending work before exiting.
    fn stop(&self, graceful: bool);

    /// Block until the worker has fully stopped.
    fn wait(&self);
}

/// Where an event delivery failed: which channel, and which receiver.
#[derive(Clone, Copy, Debug)]
pub struct FiringSite {
    pub event_type: TypeId,
    pub event_name: &'static str,
    pub receiver: ObjectId,
}

/// Observes errors raised inside the context tree.
///
/// Returning `true` marks the error handled; `false` leaves it for the next
/// filter or the parent chain.
pub trait ExceptionFilter: Send + Sync {
    fn filter(&self, err: &anyhow::Error) -> bool;

    /// Variant consulted when a receiver fails during event delivery.
    /// Defaults to the free-standing filter.
    fn filter_firing(&self, err: &anyhow::Error, site: &FiringSite) -> bool {
        let _ = site;
        self.filter(err)
    }
}

/// A member notified whenever a child context is created under a matching
/// sigil. An empty sigil list registers the bolt under the anonymous sigil,
/// matching every creation.
pub trait Bolt: Send + Sync {
    fn context_sigils(&self) -> Vec<Sigil>;

    fn context_created(&self, child: &Arc<Context>);
}

/// A packet subscription record, opaque to the core. The context forwards
/// these to the registered [`PacketFactory`] member and its ancestors.
#[derive(Clone, Debug)]
pub struct PacketSubscriber {
    handle: AnyHandle,
}

impl PacketSubscriber {
    pub fn new(handle: AnyHandle) -> Self {
        Self { handle }
    }

    pub fn object_id(&self) -> ObjectId {
        self.handle.object_id()
    }

    pub fn handle(&self) -> &AnyHandle {
        &self.handle
    }
}

/// External collaborator: the packet factory, when present as a member.
pub trait PacketFactory: Send + Sync {
    fn add_subscriber(&self, subscriber: PacketSubscriber);
    fn remove_subscriber(&self, object: ObjectId);
    fn subscribers(&self) -> Vec<PacketSubscriber>;
}

/// Introspection events fired on the global context's event channel.
pub trait AutowiringEvents: Send + Sync {
    /// A child context was created anywhere in the tree.
    fn new_context(&self, context: &Arc<Context>);

    /// A member committed to some context's registry.
    fn new_object(&self, context: &Arc<Context>, object: &AnyHandle);
}
