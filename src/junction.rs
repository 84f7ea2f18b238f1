//! Junction boxes: per-interface event dispatch tables.
//!
//! The manager owns one box per event interface and is shared between peer
//! contexts. It carries its own synchronization; the context lock is never
//! held across manager calls that reach user code.

use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::handle::AnyHandle;

/// Identity of a context node, used to tag receiver entries with their home.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct ContextId(pub(crate) usize);

/// One receiver registration on one event interface. The entry lives in the
/// local receiver set of exactly one context (its home) and is additionally
/// installed in every ancestor's manager while the home is initiated.
#[derive(Clone)]
pub(crate) struct ReceiverEntry {
    pub(crate) home: ContextId,
    pub(crate) handle: AnyHandle,
}

struct BoxInner {
    initiated: bool,
    receivers: Vec<ReceiverEntry>,
}

/// The dispatch table for one event interface. Receivers are kept in
/// insertion order; delivery is gated on initiation.
pub(crate) struct JunctionBox {
    event_name: &'static str,
    inner: Mutex<BoxInner>,
}

impl JunctionBox {
    fn new(event_name: &'static str, initiated: bool) -> Self {
        Self {
            event_name,
            inner: Mutex::new(BoxInner {
                initiated,
                receivers: Vec::new(),
            }),
        }
    }

    pub(crate) fn event_name(&self) -> &'static str {
        self.event_name
    }

    pub(crate) fn add_receiver(&self, entry: &ReceiverEntry) {
        let mut inner = self.inner.lock();
        let present = inner.receivers.iter().any(|r| {
            r.home == entry.home && r.handle.object_id() == entry.handle.object_id()
        });
        if !present {
            inner.receivers.push(entry.clone());
        }
    }

    pub(crate) fn remove_receiver(&self, entry: &ReceiverEntry) {
        let mut inner = self.inner.lock();
        inner.receivers.retain(|r| {
            !(r.home == entry.home && r.handle.object_id() == entry.handle.object_id())
        });
    }

    pub(crate) fn initiate(&self) {
        self.inner.lock().initiated = true;
    }

    /// Receivers eligible for delivery right now; `None` until initiated.
    pub(crate) fn snapshot(&self) -> Option<Vec<ReceiverEntry>> {
        let inner = self.inner.lock();
        inner.initiated.then(|| inner.receivers.clone())
    }

    pub(crate) fn has_listeners(&self) -> bool {
        !self.inner.lock().receivers.is_empty()
    }
}

/// Per-context (shared between peers) table of junction boxes, keyed by
/// event-interface type id. Boxes are created lazily on the first receiver
/// registration or lookup and inherit the manager's initiation state.
pub(crate) struct JunctionBoxManager {
    boxes: DashMap<TypeId, Arc<JunctionBox>>,
    initiated: AtomicBool,
}

impl JunctionBoxManager {
    pub(crate) fn new() -> Self {
        Self {
            boxes: DashMap::new(),
            initiated: AtomicBool::new(false),
        }
    }

    fn get_or_create(&self, ty: TypeId, event_name: &'static str) -> Arc<JunctionBox> {
        self.boxes
            .entry(ty)
            .or_insert_with(|| {
                Arc::new(JunctionBox::new(
                    event_name,
                    self.initiated.load(Ordering::Acquire),
                ))
            })
            .value()
            .clone()
    }

    pub(crate) fn get(&self, ty: TypeId) -> Option<Arc<JunctionBox>> {
        self.boxes.get(&ty).map(|b| b.value().clone())
    }

    pub(crate) fn add_receiver(&self, entry: &ReceiverEntry) {
        self.get_or_create(entry.handle.type_id(), entry.handle.type_name())
            .add_receiver(entry);
    }

    pub(crate) fn remove_receiver(&self, entry: &ReceiverEntry) {
        if let Some(bx) = self.get(entry.handle.type_id()) {
            bx.remove_receiver(entry);
        }
    }

    /// Enable delivery on every box, current and future.
    pub(crate) fn initiate(&self) {
        self.initiated.store(true, Ordering::Release);
        for bx in self.boxes.iter() {
            bx.initiate();
        }
    }
}
