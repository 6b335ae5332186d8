//! Keeps the native menus in step with the registry.
//!
//! Besides the visible index this module owns two handle tables: the
//! submenu each item has been promoted to (the root menu lives under
//! [`ROOT_ID`]) and the native menu each item was last inserted into.
//!
//! Every structural sequence (promote, insert, update, hide, delete) runs
//! under one sync mutex so that two application threads can never
//! interleave position computation and the native insert that depends
//! on it. `upsert` reads the item's record from the registry while
//! holding that mutex, so an item removed from the registry can never be
//! put back; the registry lock itself is never held across a native
//! call.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use tracing::{debug, trace};

use crate::error::TrayError;
use crate::ids::ROOT_ID;
use crate::locks;
use crate::native::{BitmapHandle, ItemKind, ItemSpec, MenuHandle, NativeError, NativeSurface};
use crate::registry::Registry;
use crate::visible::VisibleIndex;

#[derive(Debug, Default)]
pub struct MenuSync {
    visible: VisibleIndex,
    submenus: RwLock<HashMap<u32, MenuHandle>>,
    containers: RwLock<HashMap<u32, MenuHandle>>,
    serial: Mutex<()>,
}

impl MenuSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> &VisibleIndex {
        &self.visible
    }

    pub fn root(&self) -> Option<MenuHandle> {
        self.submenu(ROOT_ID)
    }

    /// Submenu owned by `id`, if it was ever promoted.
    pub fn submenu(&self, id: u32) -> Option<MenuHandle> {
        locks::read(&self.submenus).get(&id).copied()
    }

    /// Native menu `id` was last inserted into.
    pub fn container(&self, id: u32) -> Option<MenuHandle> {
        locks::read(&self.containers).get(&id).copied()
    }

    /// Creates the root popup menu and records it under [`ROOT_ID`].
    pub fn create_root(&self, surface: &dyn NativeSurface) -> Result<MenuHandle, TrayError> {
        let _serial = locks::lock(&self.serial);
        self.create_root_locked(surface)
    }

    fn create_root_locked(&self, surface: &dyn NativeSurface) -> Result<MenuHandle, TrayError> {
        let root = surface
            .create_root_menu()
            .map_err(TrayError::native("create menu"))?;
        locks::write(&self.submenus).insert(ROOT_ID, root);
        debug!(menu = %root, "root menu created");
        Ok(root)
    }

    /// Destroys the root menu, forgets every handle and visible entry,
    /// and creates a fresh root menu.
    ///
    /// A failure to destroy the old root is logged; the tables are
    /// cleared regardless so that the new root starts empty.
    pub fn rebuild_root(&self, surface: &dyn NativeSurface) -> Result<MenuHandle, TrayError> {
        let _serial = locks::lock(&self.serial);
        if let Some(old) = self.submenu(ROOT_ID)
            && let Err(e) = surface.destroy_menu(old)
        {
            tracing::warn!(menu = %old, "failed to destroy menu: {e}");
        }
        self.visible.clear();
        locks::write(&self.submenus).clear();
        locks::write(&self.containers).clear();
        self.create_root_locked(surface)
    }

    /// Adds item `id` to its parent's native menu, or updates it in place
    /// if it is already shown there. The current registry record is used;
    /// an ID no longer in the registry fails with `UnknownItem`.
    ///
    /// The parent is promoted to a submenu on its first child. A newly
    /// shown entry lands at the position its ID takes among the siblings
    /// visible right now; if it owns a submenu from an earlier life, the
    /// submenu is attached again.
    pub fn upsert(
        &self,
        surface: &dyn NativeSurface,
        registry: &Registry,
        id: u32,
        bitmap: Option<BitmapHandle>,
    ) -> Result<(), TrayError> {
        let _serial = locks::lock(&self.serial);
        let record = registry.find(id).ok_or(TrayError::UnknownItem(id))?;
        let parent = record.parent;

        let menu = match self.submenu(parent) {
            Some(menu) => menu,
            None => self.promote(surface, parent)?,
        };

        let mut spec = match record.kind {
            ItemKind::Separator => ItemSpec::separator(id),
            ItemKind::Text => ItemSpec {
                id,
                kind: ItemKind::Text,
                title: record.title,
                disabled: record.disabled,
                checked: record.checked,
                bitmap,
                submenu: None,
            },
        };

        if self.visible.is_visible(parent, id) {
            surface
                .update_item(menu, &spec)
                .map_err(TrayError::native("update item"))?;
            trace!(id, parent, "menu item updated");
            return Ok(());
        }

        spec.submenu = self.submenu(id);
        let position = self.visible.insert(parent, id);
        if let Err(e) = surface.insert_item(menu, position, &spec) {
            self.visible.remove(parent, id);
            return Err(TrayError::native("insert item")(e));
        }
        locks::write(&self.containers).insert(id, menu);
        debug!(id, parent, position, "menu item inserted");
        Ok(())
    }

    /// Turns `parent` into a submenu container.
    fn promote(&self, surface: &dyn NativeSurface, parent: u32) -> Result<MenuHandle, TrayError> {
        if parent == ROOT_ID {
            return Err(TrayError::NotReady);
        }
        let container = self.container(parent).ok_or(TrayError::Native {
            op: "convert to submenu",
            source: NativeError::NotFound(parent),
        })?;
        let submenu = surface
            .promote_to_submenu(container, parent)
            .map_err(TrayError::native("convert to submenu"))?;
        locks::write(&self.submenus).insert(parent, submenu);
        debug!(id = parent, menu = %submenu, "menu item promoted to submenu");
        Ok(submenu)
    }

    /// Takes `id` out of its parent's native menu without freeing it.
    /// Hiding an entry that is not shown is a no-op.
    pub fn hide(
        &self,
        surface: &dyn NativeSurface,
        id: u32,
        parent: u32,
    ) -> Result<(), TrayError> {
        let _serial = locks::lock(&self.serial);
        if !self.visible.is_visible(parent, id) {
            return Ok(());
        }
        let Some(menu) = self.submenu(parent) else {
            self.visible.remove(parent, id);
            return Ok(());
        };
        surface
            .remove_item(menu, id)
            .map_err(TrayError::native("remove item"))?;
        self.visible.remove(parent, id);
        debug!(id, parent, "menu item hidden");
        Ok(())
    }

    /// Deletes `id` natively and forgets everything recorded for it.
    ///
    /// A hidden entry that still owns a submenu has that submenu
    /// destroyed instead. Bookkeeping is dropped even if the native call
    /// fails; the error is still returned.
    pub fn delete(
        &self,
        surface: &dyn NativeSurface,
        id: u32,
        parent: u32,
    ) -> Result<(), TrayError> {
        let _serial = locks::lock(&self.serial);

        let result = match (self.visible.is_visible(parent, id), self.submenu(parent)) {
            (true, Some(menu)) => surface
                .delete_item(menu, id)
                .map_err(TrayError::native("delete item")),
            _ => match self.submenu(id) {
                Some(own) => surface
                    .destroy_menu(own)
                    .map_err(TrayError::native("destroy menu")),
                None => Ok(()),
            },
        };

        self.visible.remove(parent, id);
        self.visible.forget_parent(id);
        locks::write(&self.submenus).remove(&id);
        locks::write(&self.containers).remove(&id);
        debug!(id, parent, "menu item deleted");
        result
    }

    /// Returns `true` if any table still mentions `id`.
    pub fn references(&self, id: u32) -> bool {
        self.visible.references(id)
            || locks::read(&self.submenus).contains_key(&id)
            || locks::read(&self.containers).contains_key(&id)
    }
}
