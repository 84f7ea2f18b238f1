//! The context node.
//!
//! A context is one node in the injection tree: it owns a member registry,
//! a worker list, a filter list, a bolt map, and its share of the event
//! plumbing, and it coordinates the lifecycle of everything it owns. One
//! mutex guards all of that state; a paired condition variable broadcasts
//! lifecycle transitions and work quiescence.
//!
//! Control flows top-down on initiate (ancestors first) and bottom-up on
//! shutdown (children first, in reverse insertion order).

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Condvar, Mutex};

use crate::autowire::{AnySlot, Autowired, AutowiredInner, Deferrable, Finalizer, SlotId};
use crate::contracts::{
    AutowiringEvents, Bolt, ContextMember, CoreRunnable, ExceptionFilter, FiringSite,
    PacketFactory, PacketSubscriber,
};
use crate::current;
use crate::errors::ContextError;
use crate::handle::ObjectId;
use crate::junction::{ContextId, JunctionBoxManager, ReceiverEntry};
use crate::member::Member;
use crate::outstanding::{Outstanding, OutstandingInner};
use crate::registry::{SatisfactionSource, TypeRegistry};

/// A type id used as a compile-time name for a context.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Sigil {
    id: TypeId,
    name: &'static str,
}

impl Sigil {
    pub fn of<S: 'static>() -> Self {
        Self {
            id: TypeId::of::<S>(),
            name: std::any::type_name::<S>(),
        }
    }

    /// The anonymous sigil. Bolts registered here observe every creation.
    pub fn anonymous() -> Self {
        Self::of::<()>()
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == TypeId::of::<()>()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Sigil of the global root context.
pub struct GlobalSigil;

/// How workers are asked to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Drain pending work before exiting.
    Graceful,
    /// Abandon pending work.
    Immediate,
}

#[derive(Default)]
struct ContextState {
    registry: TypeRegistry,
    children: Vec<Weak<Context>>,
    workers: Vec<Arc<dyn CoreRunnable>>,
    members: Vec<Arc<dyn ContextMember>>,
    filters: Vec<Arc<dyn ExceptionFilter>>,
    bolts: HashMap<Sigil, Vec<Arc<dyn Bolt>>>,
    receivers: Vec<ReceiverEntry>,
    delayed: Vec<ReceiverEntry>,
    snoopers: HashSet<ObjectId>,
    teardown_listeners: Vec<Box<dyn FnOnce(&Context) + Send>>,
    initiated: bool,
    shut_down: bool,
    outstanding: Weak<OutstandingInner>,
}

static GLOBAL: OnceLock<Arc<Context>> = OnceLock::new();

/// A node in the injection tree.
pub struct Context {
    parent: Option<Arc<Context>>,
    sigil: Sigil,
    junction_boxes: Arc<JunctionBoxManager>,
    state: Mutex<ContextState>,
    state_changed: Condvar,
    weak_self: Weak<Context>,
}

impl Context {
    fn new_node(
        parent: Option<Arc<Context>>,
        sigil: Sigil,
        junction_boxes: Arc<JunctionBoxManager>,
    ) -> Arc<Context> {
        Arc::new_cyclic(|weak| Context {
            parent,
            sigil,
            junction_boxes,
            state: Mutex::new(ContextState::default()),
            state_changed: Condvar::new(),
            weak_self: weak.clone(),
        })
    }

    /// The root of the tree, created on first use and never torn down.
    pub fn global() -> Arc<Context> {
        GLOBAL
            .get_or_init(|| {
                Self::new_node(
                    None,
                    Sigil::of::<GlobalSigil>(),
                    Arc::new(JunctionBoxManager::new()),
                )
            })
            .clone()
    }

    /// The context bound to the calling thread; the global context when the
    /// thread has no binding.
    pub fn current() -> Arc<Context> {
        current::get().unwrap_or_else(Self::global)
    }

    pub fn sigil(&self) -> Sigil {
        self.sigil
    }

    pub fn parent(&self) -> Option<Arc<Context>> {
        self.parent.clone()
    }

    fn id(&self) -> ContextId {
        ContextId(self as *const Context as usize)
    }

    pub fn is_initiated(&self) -> bool {
        self.state.lock().initiated
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Create a child context under sigil `S`. Bolts registered against `S`
    /// (then against the anonymous sigil) are notified at every ancestor
    /// level; bolts observe creation but never block it.
    pub fn create<S: 'static>(self: &Arc<Self>) -> Arc<Context> {
        self.create_node(Sigil::of::<S>(), Arc::new(JunctionBoxManager::new()))
    }

    /// Create a peer: same parent as this context, sharing this context's
    /// junction-box manager. Peers observe the same event channels but keep
    /// distinct member registries.
    pub fn create_peer<S: 'static>(self: &Arc<Self>) -> Arc<Context> {
        let sigil = Sigil::of::<S>();
        match &self.parent {
            Some(parent) => parent.create_node(sigil, self.junction_boxes.clone()),
            // A parentless peer of the root: sibling root, shared channels.
            None => {
                let peer = Self::new_node(None, sigil, self.junction_boxes.clone());
                fire_new_context(&peer);
                peer
            }
        }
    }

    fn create_node(
        self: &Arc<Self>,
        sigil: Sigil,
        junction_boxes: Arc<JunctionBoxManager>,
    ) -> Arc<Context> {
        let child = Self::new_node(Some(self.clone()), sigil, junction_boxes);
        {
            let mut st = self.state.lock();
            st.children.retain(|w| w.strong_count() > 0);
            st.children.push(Arc::downgrade(&child));
        }
        tracing::debug!(parent = self.sigil.name(), sigil = sigil.name(), "context created");
        self.broadcast_context_creation(sigil, &child);
        fire_new_context(&child);
        child
    }

    fn broadcast_context_creation(&self, sigil: Sigil, child: &Arc<Context>) {
        let (matched, anonymous) = {
            let st = self.state.lock();
            let matched = st.bolts.get(&sigil).cloned().unwrap_or_default();
            // Anonymous listeners are not notified a second time when the
            // sigil itself is anonymous.
            let anonymous = if sigil.is_anonymous() {
                Vec::new()
            } else {
                st.bolts.get(&Sigil::anonymous()).cloned().unwrap_or_default()
            };
            (matched, anonymous)
        };
        for bolt in matched {
            bolt.context_created(child);
        }
        for bolt in anonymous {
            bolt.context_created(child);
        }
        if let Some(parent) = &self.parent {
            parent.broadcast_context_creation(sigil, child);
        }
    }

    /// Register a member. The registry is updated first (rejecting ambiguous
    /// and duplicate registrations), then each capability is recorded, then
    /// the satisfaction opportunity is offered to every pending slot here and
    /// in every descendant, with lock handoff at each boundary. Finalization
    /// strategies run only after the context lock is released.
    pub fn add(self: &Arc<Self>, member: Member) -> Result<(), ContextError> {
        let source = SatisfactionSource::from_member(&member);
        let mut finalizers: Vec<Finalizer> = Vec::new();
        let mut start_worker: Option<Arc<dyn CoreRunnable>> = None;
        let mut stop_worker: Option<Arc<dyn CoreRunnable>> = None;
        {
            let mut st = self.state.lock();
            st.registry.validate(&member)?;
            st.registry.commit(&member, &mut finalizers);

            if let Some(m) = member.context_member.clone() {
                st.members.push(m);
            }
            if let Some(r) = member.runnable.clone() {
                st.workers.push(r.clone());
                if st.shut_down {
                    // Far too late: ensure the worker transitions to stopped.
                    stop_worker = Some(r);
                } else if st.initiated {
                    start_worker = Some(r);
                }
            }
            if let Some(f) = member.filter.clone() {
                st.filters.push(f);
            }
            if let Some(b) = member.bolt.clone() {
                let sigils = b.context_sigils();
                if sigils.is_empty() {
                    st.bolts.entry(Sigil::anonymous()).or_default().push(b);
                } else {
                    for s in sigils {
                        st.bolts.entry(s).or_default().push(b.clone());
                    }
                }
            }

            // Offer the new member to every remaining empty slot.
            st.registry.cascade(&source, &mut finalizers);
        }
        tracing::debug!(
            member = member.object.type_name(),
            context = self.sigil.name(),
            "member added"
        );

        // Descendants get the same satisfaction opportunity, child lock taken
        // only after the parent lock is released.
        self.cascade_into_children(&source, &mut finalizers);
        for fin in finalizers {
            fin();
        }

        // Event receivers: local set first, then ascend the junction-box
        // managers of every initiated ancestor.
        if !member.receivers.is_empty() {
            let entries: Vec<ReceiverEntry> = member
                .receivers
                .iter()
                .map(|h| ReceiverEntry {
                    home: self.id(),
                    handle: h.clone(),
                })
                .collect();
            {
                let mut st = self.state.lock();
                if !st.shut_down {
                    st.receivers.extend(entries.iter().cloned());
                }
            }
            for entry in &entries {
                self.add_event_receiver(entry);
            }
        }

        if let Some(subscriber) = member.subscriber.clone() {
            self.add_packet_subscriber(&subscriber);
        }

        if let Some(w) = stop_worker {
            w.stop(false);
        }
        if let Some(w) = start_worker {
            let token = self.increment_outstanding();
            let alive = !self.state.lock().shut_down;
            if alive {
                w.start(token);
            } else {
                w.stop(false);
            }
        }

        // Signal listeners that a new object exists.
        let object = member.object.clone();
        Self::global().fire::<dyn AutowiringEvents>(|ev| {
            ev.new_object(self, &object);
            Ok(())
        });
        Ok(())
    }

    /// Construct a `T` and add it under its concrete type.
    pub fn inject<T: Default + Send + Sync + 'static>(
        self: &Arc<Self>,
    ) -> Result<Arc<T>, ContextError> {
        let object = Arc::new(T::default());
        self.add(Member::new(object.clone()))?;
        Ok(object)
    }

    fn cascade_into_children(&self, source: &SatisfactionSource, finalizers: &mut Vec<Finalizer>) {
        for child in self.children() {
            {
                let mut st = child.state.lock();
                st.registry.cascade(source, finalizers);
            }
            child.cascade_into_children(source, finalizers);
        }
    }

    /// Held reference for `T` in this context only.
    pub fn find<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.state
            .lock()
            .registry
            .find(TypeId::of::<T>())
            .and_then(|h| h.downcast::<T>())
    }

    /// Held reference for `T`, searching this context and its ancestors.
    pub fn resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        if let Some(found) = self.find::<T>() {
            return Some(found);
        }
        self.parent.as_ref().and_then(|p| p.resolve::<T>())
    }

    /// Resolve a slot of type `T`: satisfied synchronously when this context
    /// or an ancestor already holds `T`, deferred onto this context's chain
    /// otherwise, so a later local addition may satisfy it.
    pub fn autowire<T: ?Sized + Send + Sync + 'static>(self: &Arc<Self>) -> Autowired<T> {
        let inner = Arc::new(AutowiredInner::<T>::new());
        {
            let mut st = self.state.lock();
            if let Some(handle) = st.registry.find(TypeId::of::<T>()) {
                drop(st);
                if let Some(value) = handle.downcast::<T>() {
                    inner.set(value);
                }
                return Autowired::from_parts(inner, self.weak_self.clone());
            }
            st.registry.link_deferred(inner.clone());
        }

        // Delegate ascending resolution. Satisfaction from an ancestor leaves
        // no entry in this registry; failure leaves the deferrable linked.
        let mut cur = self.parent.clone();
        while let Some(ctx) = cur {
            if let Some(value) = ctx.find::<T>() {
                inner.set(value);
                self.cancel_deferred(TypeId::of::<T>(), AnySlot::slot_id(&*inner));
                break;
            }
            cur = ctx.parent.clone();
        }
        Autowired::from_parts(inner, self.weak_self.clone())
    }

    pub(crate) fn cancel_deferred(&self, ty: TypeId, id: SlotId) {
        let mut finalizers = Vec::new();
        self.state.lock().registry.cancel(ty, id, &mut finalizers);
        for fin in finalizers {
            fin();
        }
    }

    pub(crate) fn attach_dependent(&self, ty: TypeId, target: SlotId, record: Deferrable) -> bool {
        self.state.lock().registry.attach_dependent(ty, target, record)
    }

    fn add_event_receiver(&self, entry: &ReceiverEntry) {
        {
            let mut st = self.state.lock();
            if st.shut_down {
                // Receivers arriving after shutdown are never installed.
                return;
            }
            if !st.initiated {
                st.delayed.push(entry.clone());
                return;
            }
        }
        self.junction_boxes.add_receiver(entry);
        if let Some(parent) = &self.parent {
            parent.add_event_receiver(entry);
        }
    }

    fn install_receivers(&self, entries: &[ReceiverEntry]) {
        if entries.is_empty() {
            return;
        }
        if self.state.lock().shut_down {
            return;
        }
        for entry in entries {
            self.junction_boxes.add_receiver(entry);
        }
        if let Some(parent) = &self.parent {
            parent.install_receivers(entries);
        }
    }

    fn remove_receivers_from_ancestry(&self, entries: &[ReceiverEntry]) {
        if entries.is_empty() {
            return;
        }
        for entry in entries {
            self.junction_boxes.remove_receiver(entry);
        }
        if let Some(parent) = &self.parent {
            parent.remove_receivers_from_ancestry(entries);
        }
    }

    fn add_packet_subscriber(&self, subscriber: &PacketSubscriber) {
        if let Some(factory) = self.find::<dyn PacketFactory>() {
            factory.add_subscriber(subscriber.clone());
        }
        if let Some(parent) = &self.parent {
            parent.add_packet_subscriber(subscriber);
        }
    }

    fn remove_packet_subscribers(&self, subscribers: &[PacketSubscriber]) {
        // Ancestor eviction first, then the local factory.
        if let Some(parent) = &self.parent {
            parent.remove_packet_subscribers(subscribers);
        }
        if let Some(factory) = self.find::<dyn PacketFactory>() {
            for sub in subscribers {
                factory.remove_subscriber(sub.object_id());
            }
        }
    }

    fn withdraw_packet_subscribers(&self) {
        let Some(parent) = &self.parent else {
            return;
        };
        let Some(factory) = self.find::<dyn PacketFactory>() else {
            return;
        };
        parent.remove_packet_subscribers(&factory.subscribers());
    }

    /// Transition to running. Idempotent; a no-op once initiated or shut
    /// down. Ancestors are initiated before any local worker starts, delayed
    /// receivers drain into the junction-box managers up the parent chain,
    /// and every worker starts with a freshly obtained outstanding token.
    pub fn initiate(self: &Arc<Self>) {
        {
            let mut st = self.state.lock();
            if st.initiated || st.shut_down {
                return;
            }
            st.initiated = true;
        }
        tracing::info!(context = self.sigil.name(), "Phase: initiate");

        if let Some(parent) = &self.parent {
            parent.initiate();
        }

        let delayed: Vec<ReceiverEntry> = {
            let mut st = self.state.lock();
            st.delayed.drain(..).collect()
        };
        self.install_receivers(&delayed);
        self.junction_boxes.initiate();

        let outstanding = self.increment_outstanding();
        let workers = {
            let st = self.state.lock();
            self.state_changed.notify_all();
            st.workers.clone()
        };
        for worker in workers {
            worker.start(outstanding.clone());
        }
    }

    /// Transition to shutdown. Idempotent. Event-receiver bookkeeping is
    /// cleared first (this manager and every ancestor's), children are
    /// signalled in reverse insertion order, then local workers are stopped
    /// with the forwarded mode. With `wait`, joins every worker before
    /// returning.
    pub fn signal_shutdown(self: &Arc<Self>, wait: bool, mode: ShutdownMode) {
        let receivers: Vec<ReceiverEntry>;
        {
            let mut st = self.state.lock();
            if st.shut_down {
                return;
            }
            st.shut_down = true;
            receivers = std::mem::take(&mut st.receivers);
            st.delayed.clear();
            self.state_changed.notify_all();
        }
        tracing::info!(context = self.sigil.name(), ?mode, "Phase: shutdown");

        self.remove_receivers_from_ancestry(&receivers);
        self.withdraw_packet_subscribers();

        // Locked snapshot, then teardown interleave outside the lock.
        let children = self.children();
        for child in children.iter().rev() {
            child.signal_shutdown(wait, mode);
        }

        // Workers stop in reverse insertion order, mirroring the child walk.
        let workers = self.state.lock().workers.clone();
        let graceful = mode == ShutdownMode::Graceful;
        for worker in workers.iter().rev() {
            worker.stop(graceful);
        }
        self.state_changed.notify_all();

        if wait {
            for worker in workers.iter().rev() {
                worker.wait();
            }
        }
    }

    /// Block until this context is initiated or shut down. Returns whether
    /// the context is still alive.
    pub fn delay_until_initiated(&self) -> bool {
        let mut st = self.state.lock();
        self.state_changed
            .wait_while(&mut st, |s| !s.initiated && !s.shut_down);
        !st.shut_down
    }

    /// Block until the outstanding-work reference has expired and the
    /// shut-down flag is set.
    pub fn wait(&self) {
        let mut st = self.state.lock();
        self.state_changed.wait_while(&mut st, |s| {
            s.outstanding.strong_count() > 0 || !s.shut_down
        });
    }

    /// Obtain the shared outstanding-work token, creating it (and charging
    /// the parent) when no worker holds one yet.
    pub(crate) fn increment_outstanding(self: &Arc<Self>) -> Outstanding {
        if let Some(existing) = Outstanding::from_weak(&self.state.lock().outstanding) {
            return existing;
        }
        let parent = self.parent.as_ref().map(|p| p.increment_outstanding());
        let token = Outstanding::new(self.clone(), parent);
        let mut st = self.state.lock();
        if let Some(existing) = Outstanding::from_weak(&st.outstanding) {
            // Lost the race; release our lock before the redundant token's
            // drop hook re-enters it.
            drop(st);
            drop(token);
            return existing;
        }
        st.outstanding = token.downgrade();
        token
    }

    pub(crate) fn on_outstanding_released(&self) {
        let mut st = self.state.lock();
        if st.outstanding.strong_count() == 0 {
            st.outstanding = Weak::new();
        }
        self.state_changed.notify_all();
    }

    /// Bind this context as the thread's current context, returning the
    /// displaced binding so call sites can stack.
    pub fn set_current(&self) -> Result<Arc<Context>, ContextError> {
        let me = self
            .weak_self
            .upgrade()
            .ok_or(ContextError::PrematureCurrentContext)?;
        let prior = current::replace(Some(me));
        Ok(prior.unwrap_or_else(Self::global))
    }

    /// Clear the thread's current-context binding.
    pub fn evict_current() {
        current::replace(None);
    }

    /// Fire an event on the junction box for interface `E`, delivering to
    /// every eligible receiver in insertion order. A receiver error is routed
    /// through the firing-site filter chain and never escapes the fire site.
    pub fn fire<E: ?Sized + Send + Sync + 'static>(
        &self,
        deliver: impl Fn(&E) -> anyhow::Result<()>,
    ) {
        let Some(bx) = self.junction_boxes.get(TypeId::of::<E>()) else {
            return;
        };
        let Some(receivers) = bx.snapshot() else {
            return;
        };
        for entry in receivers {
            let Some(receiver) = entry.handle.downcast::<E>() else {
                continue;
            };
            if let Err(err) = deliver(&receiver) {
                let site = FiringSite {
                    event_type: TypeId::of::<E>(),
                    event_name: bx.event_name(),
                    receiver: entry.handle.object_id(),
                };
                self.filter_firing_exception(&err, &site);
            }
        }
    }

    pub fn has_listeners<E: ?Sized + Send + Sync + 'static>(&self) -> bool {
        self.junction_boxes
            .get(TypeId::of::<E>())
            .map_or(false, |b| b.has_listeners())
    }

    /// Offer a free-standing error to the filter chain. Filters run in
    /// registration order; unhandled errors propagate to the parent context
    /// and, failing the whole chain, are returned to the caller.
    pub fn route_exception(&self, err: anyhow::Error) -> Result<(), ContextError> {
        if self.filter_exception(&err) {
            Ok(())
        } else {
            Err(ContextError::Unhandled(err))
        }
    }

    fn filter_exception(&self, err: &anyhow::Error) -> bool {
        let filters = self.state.lock().filters.clone();
        let mut handled = false;
        for filter in &filters {
            if filter.filter(err) {
                handled = true;
            }
        }
        if let Some(parent) = &self.parent {
            // A parent chain that reports handled is terminal.
            if parent.filter_exception(err) {
                return true;
            }
        }
        handled
    }

    fn filter_firing_exception(&self, err: &anyhow::Error, site: &FiringSite) {
        let mut handled = false;
        let mut cur: Option<&Context> = Some(self);
        while let Some(ctx) = cur {
            let filters = ctx.state.lock().filters.clone();
            for filter in &filters {
                if filter.filter_firing(err, site) {
                    handled = true;
                }
            }
            cur = ctx.parent.as_deref();
        }
        if !handled {
            tracing::error!(
                event = site.event_name,
                error = %err,
                "receiver error unhandled by any filter"
            );
        }
    }

    /// Install a foreign member's event receivers into this context's
    /// channels without membership.
    pub fn snoop(self: &Arc<Self>, member: &Member) {
        if member.receivers.is_empty() {
            return;
        }
        let entries: Vec<ReceiverEntry> = member
            .receivers
            .iter()
            .map(|h| ReceiverEntry {
                home: self.id(),
                handle: h.clone(),
            })
            .collect();
        {
            let mut st = self.state.lock();
            if st.shut_down {
                return;
            }
            st.snoopers.insert(member.object_id());
            st.receivers.extend(entries.iter().cloned());
        }
        for entry in &entries {
            self.add_event_receiver(entry);
        }
    }

    /// Withdraw a snooped member's receivers. Removal ascends only while the
    /// parent neither holds the member in its own receiver set nor snoops it,
    /// both checked under the parent lock.
    pub fn unsnoop(self: &Arc<Self>, member: &Member) {
        let entries: Vec<ReceiverEntry> = member
            .receivers
            .iter()
            .map(|h| ReceiverEntry {
                home: self.id(),
                handle: h.clone(),
            })
            .collect();
        {
            let mut st = self.state.lock();
            st.snoopers.remove(&member.object_id());
            st.receivers
                .retain(|r| r.handle.object_id() != member.object_id());
        }
        for entry in &entries {
            self.unsnoop_events(member.object_id(), entry);
        }
    }

    fn unsnoop_events(&self, snooper: ObjectId, entry: &ReceiverEntry) {
        self.junction_boxes.remove_receiver(entry);
        let Some(parent) = &self.parent else {
            return;
        };
        let ascend = {
            let st = parent.state.lock();
            !st.receivers.iter().any(|r| r.handle.object_id() == snooper)
                && !st.snoopers.contains(&snooper)
        };
        if ascend {
            parent.unsnoop_events(snooper, entry);
        }
    }

    /// Live children, in insertion order. Expired links are skipped.
    pub fn children(&self) -> Vec<Arc<Context>> {
        self.state
            .lock()
            .children
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Every live descendant, depth-first.
    pub fn descendants(&self) -> Vec<Arc<Context>> {
        let mut out = Vec::new();
        let mut stack = self.children();
        while let Some(ctx) = stack.pop() {
            stack.extend(ctx.children());
            out.push(ctx);
        }
        out
    }

    /// Run `listener` first thing in this context's destructor.
    pub fn add_teardown_listener(&self, listener: impl FnOnce(&Context) + Send + 'static) {
        self.state.lock().teardown_listeners.push(Box::new(listener));
    }

    /// Diagnostic listing: every registry entry with its holder, then every
    /// worker name. Acquires the context lock.
    pub fn dump(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        let st = self.state.lock();
        for (type_name, holder) in st.registry.entries() {
            match holder {
                Some(id) => writeln!(out, "{} 0x{:x}", type_name, id.as_usize())?,
                None => writeln!(out, "{}", type_name)?,
            }
        }
        for worker in &st.workers {
            writeln!(out, "Worker {}", worker.name().unwrap_or("(no name)"))?;
        }
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // A context may not be destroyed while it is some thread's current
        // context; the thread-local holds a strong reference, so reaching
        // this point while current is a program bug.
        assert!(
            !current::is_current(self),
            "context destroyed while current on this thread"
        );

        let state = self.state.get_mut();
        let listeners = std::mem::take(&mut state.teardown_listeners);
        let receivers = std::mem::take(&mut state.receivers);
        let members = std::mem::take(&mut state.members);

        for listener in listeners {
            listener(self);
        }

        // Make sure events stop arriving before members learn of teardown.
        self.remove_receivers_from_ancestry(&receivers);

        for member in members {
            member.notify_context_teardown();
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Context")
            .field("sigil", &self.sigil.name())
            .field("initiated", &st.initiated)
            .field("shut_down", &st.shut_down)
            .field("workers", &st.workers.len())
            .field("children", &st.children.len())
            .finish()
    }
}

fn fire_new_context(child: &Arc<Context>) {
    Context::global().fire::<dyn AutowiringEvents>(|ev| {
        ev.new_context(child);
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget(u32);

    #[test]
    fn premature_current_rejected() {
        let _ctx = Arc::new_cyclic(|weak: &Weak<Context>| {
            let ctx = Context {
                parent: None,
                sigil: Sigil::anonymous(),
                junction_boxes: Arc::new(JunctionBoxManager::new()),
                state: Mutex::new(ContextState::default()),
                state_changed: Condvar::new(),
                weak_self: weak.clone(),
            };
            assert!(matches!(
                ctx.set_current(),
                Err(ContextError::PrematureCurrentContext)
            ));
            ctx
        });
    }

    #[test]
    fn set_current_round_trips() {
        struct A;
        struct B;
        let a = Context::global().create::<A>();
        let b = Context::global().create::<B>();

        let prior = a.set_current().unwrap();
        let displaced = b.set_current().unwrap();
        assert!(Arc::ptr_eq(&displaced, &a));

        // Restoring the displaced value restores the original binding.
        let back = displaced.set_current().unwrap();
        assert!(Arc::ptr_eq(&back, &b));
        assert!(Arc::ptr_eq(&Context::current(), &a));

        let _ = prior;
        Context::evict_current();
        assert!(Arc::ptr_eq(&Context::current(), &Context::global()));
    }

    #[test]
    fn scoped_guard_restores_on_drop() {
        struct S;
        let ctx = Context::global().create::<S>();
        {
            let _guard = crate::current::ScopedContext::enter(&ctx);
            assert!(Arc::ptr_eq(&Context::current(), &ctx));
        }
        assert!(!current::is_current(&ctx));
        Context::evict_current();
    }

    #[test]
    fn dump_lists_members_and_workers() {
        struct D;
        let ctx = Context::global().create::<D>();
        ctx.add(Member::new(Arc::new(Widget(1)))).unwrap();

        let mut buf = Vec::new();
        ctx.dump(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Widget"));
        assert!(text.contains("0x"));
    }

    #[test]
    fn resolve_searches_ancestors() {
        struct R;
        let parent = Context::global().create::<R>();
        let child = parent.create::<R>();
        parent.add(Member::new(Arc::new(Widget(5)))).unwrap();

        assert!(child.find::<Widget>().is_none());
        assert_eq!(child.resolve::<Widget>().unwrap().0, 5);
    }

    #[test]
    fn children_enumeration_skips_expired() {
        struct P;
        struct C1;
        struct C2;
        let parent = Context::global().create::<P>();
        let kept = parent.create::<C1>();
        {
            let _dropped = parent.create::<C2>();
        }
        let children = parent.children();
        assert_eq!(children.len(), 1);
        assert!(Arc::ptr_eq(&children[0], &kept));
    }
}
