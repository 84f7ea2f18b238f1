//! The per-context member registry.
//!
//! Maps declared type id to a value slot plus the head of the chain of
//! pending deferrables for that type. The registry is a pure data structure;
//! the owning context serializes access under its lock and executes collected
//! finalizers after releasing it.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::autowire::{AnySlot, Deferrable, Finalizer, SlotId};
use crate::errors::ContextError;
use crate::handle::{AnyHandle, ObjectId};
use crate::member::Member;

/// The declared types under which one object may be offered to empty slots.
/// Built once per add and carried through the child-context cascade.
pub(crate) struct SatisfactionSource {
    casts: HashMap<TypeId, AnyHandle>,
}

impl SatisfactionSource {
    pub(crate) fn from_member(member: &Member) -> Self {
        let mut casts = HashMap::new();
        for h in member.declared() {
            casts.insert(h.type_id(), h.clone());
        }
        Self { casts }
    }

    fn cast_for(&self, ty: TypeId) -> Option<&AnyHandle> {
        self.casts.get(&ty)
    }
}

struct TypeMemo {
    type_name: &'static str,
    value: Option<AnyHandle>,
    first: Option<Box<Deferrable>>,
}

/// Type-id → value slot map with deferred-wiring chains.
#[derive(Default)]
pub(crate) struct TypeRegistry {
    memos: HashMap<TypeId, TypeMemo>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let satisfied: Vec<&'static str> = self
            .memos
            .values()
            .filter(|m| m.value.is_some())
            .map(|m| m.type_name)
            .collect();
        let pending: Vec<&'static str> = self
            .memos
            .values()
            .filter(|m| m.first.is_some())
            .map(|m| m.type_name)
            .collect();
        f.debug_struct("TypeRegistry")
            .field("satisfied", &satisfied)
            .field("pending", &pending)
            .finish()
    }
}

impl TypeRegistry {
    /// Held reference for `ty`, if any.
    pub(crate) fn find(&self, ty: TypeId) -> Option<AnyHandle> {
        self.memos.get(&ty).and_then(|m| m.value.clone())
    }

    /// Reject additions that would replace an occupied slot. Runs before any
    /// mutation so a failed add leaves the registry untouched.
    pub(crate) fn validate(&self, member: &Member) -> Result<(), ContextError> {
        for h in member.declared() {
            let Some(memo) = self.memos.get(&h.type_id()) else {
                continue;
            };
            if let Some(existing) = &memo.value {
                return Err(if existing.object_id() == member.object_id() {
                    ContextError::DuplicateRegistration {
                        type_name: memo.type_name,
                    }
                } else {
                    ContextError::AmbiguousRegistration {
                        type_name: memo.type_name,
                    }
                });
            }
        }
        Ok(())
    }

    /// Occupy the slot for every declared type, detaching and satisfying each
    /// slot's deferrable chain. `validate` must have passed.
    pub(crate) fn commit(&mut self, member: &Member, finalizers: &mut Vec<Finalizer>) {
        for h in member.declared() {
            let memo = self.memos.entry(h.type_id()).or_insert_with(|| TypeMemo {
                type_name: h.type_name(),
                value: None,
                first: None,
            });
            debug_assert!(memo.value.is_none(), "validate must run before commit");
            memo.value = Some(h.clone());
            if let Some(chain) = memo.first.take() {
                walk_chain(chain, h, finalizers);
            }
        }
    }

    /// Offer `source` to every remaining empty slot. Slots whose declared
    /// type the source can produce are occupied and their chains satisfied;
    /// the first object to fill a slot wins permanently.
    pub(crate) fn cascade(&mut self, source: &SatisfactionSource, finalizers: &mut Vec<Finalizer>) {
        for (ty, memo) in self.memos.iter_mut() {
            if memo.value.is_some() {
                continue;
            }
            let Some(handle) = source.cast_for(*ty) else {
                continue;
            };
            memo.value = Some(handle.clone());
            if let Some(chain) = memo.first.take() {
                walk_chain(chain, handle, finalizers);
            }
        }
    }

    /// Link a deferrable at the head of its type's chain.
    pub(crate) fn link_deferred(&mut self, slot: Arc<dyn AnySlot>) {
        let memo = self
            .memos
            .entry(slot.declared_type())
            .or_insert_with(|| TypeMemo {
                type_name: slot.type_name(),
                value: None,
                first: None,
            });
        let mut record = Deferrable::new(slot);
        record.next = memo.first.take();
        memo.first = Some(Box::new(record));
    }

    /// Unlink the record identified by `id` from the chain for `ty` and
    /// collect its finalizers (including any dependents). Absent records are
    /// a silent no-op. An empty memo left behind is dropped so cancellation
    /// restores the pre-autowire state.
    pub(crate) fn cancel(&mut self, ty: TypeId, id: SlotId, finalizers: &mut Vec<Finalizer>) {
        let Some(memo) = self.memos.get_mut(&ty) else {
            return;
        };
        if let Some(removed) = unlink(&mut memo.first, id) {
            gather_finalizers(removed, finalizers);
        }
        if memo.value.is_none() && memo.first.is_none() {
            self.memos.remove(&ty);
        }
    }

    /// Push `record` onto the dependent chain of the record identified by
    /// `target`. Returns false when `target` is no longer in the chain.
    pub(crate) fn attach_dependent(
        &mut self,
        ty: TypeId,
        target: SlotId,
        mut record: Deferrable,
    ) -> bool {
        let Some(memo) = self.memos.get_mut(&ty) else {
            return false;
        };
        let mut cur = memo.first.as_deref_mut();
        while let Some(node) = cur {
            if node.slot.slot_id() == target {
                record.next = node.dependent.take();
                node.dependent = Some(Box::new(record));
                return true;
            }
            cur = node.next.as_deref_mut();
        }
        false
    }

    /// Diagnostic view: (declared type name, holder identity).
    pub(crate) fn entries(&self) -> Vec<(&'static str, Option<ObjectId>)> {
        self.memos
            .values()
            .map(|m| (m.type_name, m.value.as_ref().map(|v| v.object_id())))
            .collect()
    }
}

/// Satisfy every record on a detached chain, pushing dependent chains onto a
/// work stack and processing each chain to completion. Finalizers are only
/// collected here; the caller runs them after the context lock is released.
fn walk_chain(head: Box<Deferrable>, value: &AnyHandle, finalizers: &mut Vec<Finalizer>) {
    let mut stack: Vec<Box<Deferrable>> = vec![head];
    while let Some(node) = stack.pop() {
        let mut cur = Some(node);
        while let Some(mut n) = cur {
            n.slot.try_satisfy(value);
            if let Some(dep) = n.dependent.take() {
                stack.push(dep);
            }
            if let Some(fin) = n.finalizer.take() {
                finalizers.push(fin);
            }
            cur = n.next.take();
        }
    }
}

/// Splice the record with `id` out of the chain. Linear scan; chains are
/// expected to stay short.
fn unlink(mut cur: &mut Option<Box<Deferrable>>, id: SlotId) -> Option<Box<Deferrable>> {
    loop {
        let matches = match cur {
            None => return None,
            Some(node) => node.slot.slot_id() == id,
        };
        if matches {
            let mut removed = cur.take()?;
            *cur = removed.next.take();
            return Some(removed);
        }
        cur = match cur {
            Some(node) => &mut node.next,
            None => return None,
        };
    }
}

/// Collect finalizers from a removed record and its entire dependent subtree.
fn gather_finalizers(node: Box<Deferrable>, out: &mut Vec<Finalizer>) {
    let mut stack = vec![node];
    while let Some(mut n) = stack.pop() {
        if let Some(fin) = n.finalizer.take() {
            out.push(fin);
        }
        if let Some(dep) = n.dependent.take() {
            stack.push(dep);
        }
        if let Some(next) = n.next.take() {
            stack.push(next);
        }
    }
}
