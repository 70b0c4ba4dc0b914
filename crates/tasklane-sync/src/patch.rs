//! Optimistic patches: typed, pure transforms of an entity collection.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use tasklane_core::{Entity, OrderEntry};

/// How a pending mutation is reflected in a cached collection before the
/// server answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Op<E: Entity> {
    /// Add a record, replacing one with the same id if present.
    Insert(E),
    /// Merge changed fields into the record with `id`.
    Update { id: Uuid, patch: E::Patch },
    /// Drop every record whose id is listed.
    Remove(Vec<Uuid>),
    /// Set `sort_index` for the listed ids only; every other field is left alone.
    Reorder(Vec<OrderEntry>),
}

impl<E: Entity> Op<E> {
    /// Operation name for logs and events.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Insert(_) => "insert",
            Op::Update { .. } => "update",
            Op::Remove(_) => "remove",
            Op::Reorder(_) => "reorder",
        }
    }

    /// Pure form: `(prev, self) -> next`.
    pub fn apply(&self, items: &[E]) -> Vec<E> {
        let mut next = items.to_vec();
        self.apply_to(&mut next);
        next
    }

    /// Apply in place. Never duplicates an id and never removes anything the
    /// operation does not name.
    pub fn apply_to(&self, items: &mut Vec<E>) {
        match self {
            Op::Insert(record) => {
                match items.iter_mut().find(|e| e.id() == record.id()) {
                    Some(existing) => *existing = record.clone(),
                    None => items.push(record.clone()),
                }
            }
            Op::Update { id, patch } => {
                if let Some(existing) = items.iter_mut().find(|e| e.id() == *id) {
                    existing.apply_patch(patch);
                }
            }
            Op::Remove(ids) => {
                let ids: HashSet<Uuid> = ids.iter().copied().collect();
                items.retain(|e| !ids.contains(&e.id()));
            }
            Op::Reorder(entries) => {
                let positions: HashMap<Uuid, i64> =
                    entries.iter().map(|e| (e.id, e.sort_index)).collect();
                for item in items.iter_mut() {
                    if let Some(index) = positions.get(&item.id()) {
                        item.set_sort_index(*index);
                    }
                }
            }
        }
    }

    /// Point every reference to `from` at `to` (temporary id replaced by the
    /// server id after a create commits).
    pub fn rewrite_id(&mut self, from: Uuid, to: Uuid) {
        match self {
            Op::Insert(record) => {
                if record.id() == from {
                    record.set_id(to);
                }
            }
            Op::Update { id, .. } => {
                if *id == from {
                    *id = to;
                }
            }
            Op::Remove(ids) => ids.iter_mut().filter(|id| **id == from).for_each(|id| *id = to),
            Op::Reorder(entries) => entries
                .iter_mut()
                .filter(|e| e.id == from)
                .for_each(|e| e.id = to),
        }
    }
}

/// Drop later records whose id was already seen. Returns how many were dropped.
pub(crate) fn dedupe_by_id<E: Entity>(items: &mut Vec<E>) -> usize {
    let before = items.len();
    let mut seen = HashSet::with_capacity(before);
    items.retain(|e| seen.insert(e.id()));
    before - items.len()
}

/// Sort index that places a new record after every existing one.
pub fn next_sort_index<E: Entity>(items: Option<&[E]>) -> i64 {
    items
        .into_iter()
        .flatten()
        .filter_map(|e| e.sort_index())
        .max()
        .map_or(tasklane_core::defaults::FIRST_SORT_INDEX, |max| max + 1)
}
