//! Menu item records and their parent/child relations.
//!
//! Items live in a flat map keyed by ID; the parent is stored as an ID
//! (0 for root entries) and is fixed at creation, so the tree can never
//! contain a cycle. The registry never touches the native surface.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::TrayError;
use crate::ids::{IdAllocator, ROOT_ID};
use crate::locks;
use crate::native::ItemKind;

/// Click handler attached to a menu item.
pub type ClickFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// A node of the menu tree.
#[derive(Clone)]
pub struct MenuItemRecord {
    pub id: u32,
    /// Parent item ID, [`ROOT_ID`] for top-level entries.
    pub parent: u32,
    pub kind: ItemKind,
    pub title: String,
    pub disabled: bool,
    pub checked: bool,
    pub on_click: Option<ClickFn>,
}

impl fmt::Debug for MenuItemRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuItemRecord")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("kind", &self.kind)
            .field("title", &self.title)
            .field("disabled", &self.disabled)
            .field("checked", &self.checked)
            .field("on_click", &self.on_click.is_some())
            .finish()
    }
}

impl fmt::Display for MenuItemRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parent == ROOT_ID {
            write!(f, "MenuItem[{}, {:?}]", self.id, self.title)
        } else {
            write!(
                f,
                "MenuItem[{}, parent {}, {:?}]",
                self.id, self.parent, self.title
            )
        }
    }
}

/// Thread-safe map of every live menu item.
///
/// Lookups (click dispatch, getters) take the shared lock; creation,
/// mutation and removal take the exclusive lock. Neither is held
/// across a native call.
#[derive(Default)]
pub struct Registry {
    ids: IdAllocator,
    items: RwLock<HashMap<u32, MenuItemRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an ID and stores a fresh text item under `parent`.
    pub fn create(
        &self,
        title: impl Into<String>,
        parent: u32,
    ) -> Result<MenuItemRecord, TrayError> {
        self.insert_new(ItemKind::Text, title.into(), parent)
    }

    /// Allocates an ID and stores a separator under `parent`.
    pub fn create_separator(&self, parent: u32) -> Result<MenuItemRecord, TrayError> {
        self.insert_new(ItemKind::Separator, String::new(), parent)
    }

    fn insert_new(
        &self,
        kind: ItemKind,
        title: String,
        parent: u32,
    ) -> Result<MenuItemRecord, TrayError> {
        let Some(id) = self.ids.next() else {
            tracing::error!("no menu item IDs left");
            return Err(TrayError::IdsExhausted);
        };
        let record = MenuItemRecord {
            id,
            parent,
            kind,
            title,
            disabled: false,
            checked: false,
            on_click: None,
        };
        locks::write(&self.items).insert(record.id, record.clone());
        Ok(record)
    }

    pub fn find(&self, id: u32) -> Option<MenuItemRecord> {
        locks::read(&self.items).get(&id).cloned()
    }

    pub fn contains(&self, id: u32) -> bool {
        locks::read(&self.items).contains_key(&id)
    }

    /// Returns the click handler of `id` under the shared lock.
    pub fn callback(&self, id: u32) -> Result<Option<ClickFn>, TrayError> {
        locks::read(&self.items)
            .get(&id)
            .map(|r| r.on_click.clone())
            .ok_or(TrayError::UnknownItem(id))
    }

    /// Applies `f` to the record of `id` and returns the updated copy.
    pub fn update(
        &self,
        id: u32,
        f: impl FnOnce(&mut MenuItemRecord),
    ) -> Result<MenuItemRecord, TrayError> {
        let mut items = locks::write(&self.items);
        let record = items.get_mut(&id).ok_or(TrayError::UnknownItem(id))?;
        f(record);
        Ok(record.clone())
    }

    pub fn set_title(
        &self,
        id: u32,
        title: impl Into<String>,
    ) -> Result<MenuItemRecord, TrayError> {
        let title = title.into();
        self.update(id, |r| r.title = title)
    }

    pub fn set_disabled(&self, id: u32, disabled: bool) -> Result<MenuItemRecord, TrayError> {
        self.update(id, |r| r.disabled = disabled)
    }

    pub fn set_checked(&self, id: u32, checked: bool) -> Result<MenuItemRecord, TrayError> {
        self.update(id, |r| r.checked = checked)
    }

    pub fn set_callback(&self, id: u32, on_click: Option<ClickFn>) -> Result<(), TrayError> {
        self.update(id, |r| r.on_click = on_click).map(|_| ())
    }

    /// Returns the IDs of the direct children of `parent`, ascending.
    pub fn children_of(&self, parent: u32) -> Vec<u32> {
        let mut children: Vec<u32> = locks::read(&self.items)
            .values()
            .filter(|r| r.parent == parent)
            .map(|r| r.id)
            .collect();
        children.sort_unstable();
        children
    }

    /// Returns the IDs of every record allocated at or after `limit`,
    /// ascending.
    pub fn ids_from(&self, limit: u32) -> Vec<u32> {
        let mut ids: Vec<u32> = locks::read(&self.items)
            .keys()
            .copied()
            .filter(|id| *id >= limit)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the IDs of every record allocated before `limit`, ascending.
    pub fn ids_below(&self, limit: u32) -> Vec<u32> {
        let mut ids: Vec<u32> = locks::read(&self.items)
            .keys()
            .copied()
            .filter(|id| *id < limit)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Erases the record of `id` only; children are the caller's concern.
    pub fn erase(&self, id: u32) -> Option<MenuItemRecord> {
        locks::write(&self.items).remove(&id)
    }

    /// Returns the next ID that would be allocated.
    pub fn next_id(&self) -> u32 {
        self.ids.current() + 1
    }

    pub fn len(&self) -> usize {
        locks::read(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
