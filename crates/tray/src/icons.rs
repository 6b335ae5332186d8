//! Process-lifetime icon cache and per-item bitmaps.
//!
//! Loaded icons are keyed by source: the path for file icons, a SHA-256
//! of the content for in-memory icons. Entries are never evicted; a
//! tray application only ever uses a handful of distinct icons.

use std::collections::HashMap;
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use crate::locks;
use crate::native::{BitmapHandle, IconHandle, IconSource, NativeError, NativeSurface};

/// Cache key for an icon source.
pub fn icon_key(source: IconSource<'_>) -> String {
    match source {
        IconSource::Path(path) => format!("path:{}", path.display()),
        IconSource::Bytes(bytes) => format!("sha256:{}", hex::encode(Sha256::digest(bytes))),
    }
}

#[derive(Debug, Default)]
pub struct IconCache {
    loaded: RwLock<HashMap<String, IconHandle>>,
    item_bitmaps: RwLock<HashMap<u32, BitmapHandle>>,
}

impl IconCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-through load. Two threads missing on the same key may both
    /// call the surface; the last writer wins and both handles are valid.
    pub fn load(
        &self,
        surface: &dyn NativeSurface,
        source: IconSource<'_>,
    ) -> Result<IconHandle, NativeError> {
        let key = icon_key(source);
        if let Some(handle) = self.cached(&key) {
            return Ok(handle);
        }

        let handle = surface.load_icon(source)?;
        tracing::debug!(key = %key, handle = handle.0, "icon loaded");
        locks::write(&self.loaded).insert(key, handle);
        Ok(handle)
    }

    pub fn cached(&self, key: &str) -> Option<IconHandle> {
        locks::read(&self.loaded).get(key).copied()
    }

    pub fn loaded_count(&self) -> usize {
        locks::read(&self.loaded).len()
    }

    pub fn set_item_bitmap(&self, id: u32, bitmap: BitmapHandle) {
        locks::write(&self.item_bitmaps).insert(id, bitmap);
    }

    pub fn item_bitmap(&self, id: u32) -> Option<BitmapHandle> {
        locks::read(&self.item_bitmaps).get(&id).copied()
    }

    pub fn forget_item(&self, id: u32) {
        locks::write(&self.item_bitmaps).remove(&id);
    }

    /// Drops every per-item bitmap. Loaded icons are kept.
    pub fn clear_items(&self) {
        locks::write(&self.item_bitmaps).clear();
    }
}
