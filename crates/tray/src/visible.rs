//! Per-parent ordered lists of the entries currently shown natively.
//!
//! Native menus place entries by position, so the position of an entry
//! is always derived from this table at the moment it is inserted:
//! children are kept in ascending ID order, which is also the order they
//! appear on screen.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::locks;

#[derive(Debug, Default)]
pub struct VisibleIndex {
    lists: RwLock<HashMap<u32, Vec<u32>>>,
}

impl VisibleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id` under `parent` in ascending order and returns its
    /// resulting position. Inserting an ID that is already visible
    /// returns its current position unchanged.
    pub fn insert(&self, parent: u32, id: u32) -> usize {
        let mut lists = locks::write(&self.lists);
        let list = lists.entry(parent).or_default();
        match list.binary_search(&id) {
            Ok(pos) => pos,
            Err(pos) => {
                list.insert(pos, id);
                pos
            }
        }
    }

    /// Current position of `id` under `parent`, if visible.
    pub fn position(&self, parent: u32, id: u32) -> Option<usize> {
        locks::read(&self.lists)
            .get(&parent)
            .and_then(|list| list.binary_search(&id).ok())
    }

    pub fn is_visible(&self, parent: u32, id: u32) -> bool {
        self.position(parent, id).is_some()
    }

    /// Removes `id` from `parent`'s list. Returns `false` if it was not
    /// visible.
    pub fn remove(&self, parent: u32, id: u32) -> bool {
        let mut lists = locks::write(&self.lists);
        let Some(list) = lists.get_mut(&parent) else {
            return false;
        };
        match list.binary_search(&id) {
            Ok(pos) => {
                list.remove(pos);
                if list.is_empty() {
                    lists.remove(&parent);
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Drops the whole list kept for `parent`.
    pub fn forget_parent(&self, parent: u32) {
        locks::write(&self.lists).remove(&parent);
    }

    /// Snapshot of the visible children of `parent`, in display order.
    pub fn children(&self, parent: u32) -> Vec<u32> {
        locks::read(&self.lists)
            .get(&parent)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns `true` if `id` appears in any list, as a child or as a
    /// parent key.
    pub fn references(&self, id: u32) -> bool {
        let lists = locks::read(&self.lists);
        lists.contains_key(&id) || lists.values().any(|l| l.contains(&id))
    }

    pub fn clear(&self) {
        locks::write(&self.lists).clear();
    }
}
