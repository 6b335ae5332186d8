//! Public tray and menu item handles.
//!
//! [`Tray`] and [`MenuItem`] are cheap, cloneable handles onto a shared
//! [`TraySession`]. They can be used from any thread: every method
//! updates the registry first, then pushes the change to the native
//! menu. Native failures are logged here and also returned, so callers
//! may ignore them and carry on; a menu entry that failed to render is
//! not a reason to bring the tray down.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::warn;

use crate::config::TrayConfig;
use crate::dispatcher::Dispatcher;
use crate::error::TrayError;
use crate::executor::CallbackExecutor;
use crate::ids::ROOT_ID;
use crate::native::{IconSource, NativeSurface};
use crate::registry::{MenuItemRecord, Registry};
use crate::session::{LoopState, TraySession};

/// Logs a failed operation unless it only means "not ready yet".
fn logged<T>(what: &str, id: u32, result: Result<T, TrayError>) -> Result<T, TrayError> {
    if let Err(e) = &result
        && !e.is_not_ready()
    {
        warn!(id, "failed to {what}: {e}");
    }
    result
}

/// Handle to a tray icon and its root menu.
#[derive(Clone)]
pub struct Tray {
    session: Arc<TraySession>,
}

impl Tray {
    /// Creates a tray on `surface`. Callbacks run on plain threads.
    pub fn new(surface: Arc<dyn NativeSurface>) -> Self {
        Self::with_executor(surface, CallbackExecutor::Threads)
    }

    pub fn with_executor(surface: Arc<dyn NativeSurface>, executor: CallbackExecutor) -> Self {
        Self {
            session: Arc::new(TraySession::new(surface, executor)),
        }
    }

    pub fn session(&self) -> &Arc<TraySession> {
        &self.session
    }

    /// Initializes the tray and pumps messages on the calling thread
    /// until [`quit`](Self::quit) is called or the window is closed.
    pub fn run<R, E>(&self, on_ready: R, on_exit: E) -> Result<(), TrayError>
    where
        R: FnOnce() + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        self.register(on_ready, on_exit)?;
        self.run_loop()
    }

    /// Initializes the tray without pumping. The caller is expected to
    /// call [`run_loop`](Self::run_loop) somewhere.
    pub fn register<R, E>(&self, on_ready: R, on_exit: E) -> Result<(), TrayError>
    where
        R: FnOnce() + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        self.session.initialize(on_ready, on_exit)
    }

    /// Pumps messages on the calling thread until the session ends.
    pub fn run_loop(&self) -> Result<(), TrayError> {
        Dispatcher::new(Arc::clone(&self.session)).run()
    }

    /// Pumps messages on a dedicated thread.
    pub fn spawn_loop(&self) -> std::io::Result<JoinHandle<Result<(), TrayError>>> {
        let tray = self.clone();
        std::thread::Builder::new()
            .name("tray-pump".into())
            .spawn(move || tray.run_loop())
    }

    /// Asks the tray to close. Safe to call any number of times from any
    /// thread; the exit callback fires once.
    pub fn quit(&self) {
        self.session.quit();
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    pub fn state(&self) -> LoopState {
        self.session.state()
    }

    /// Removes every menu item and starts over with an empty menu.
    pub fn reset_menu(&self) -> Result<(), TrayError> {
        logged("reset menu", ROOT_ID, self.session.reset())
    }

    /// Sets the tray icon from `.ico` content.
    pub fn set_icon(&self, icon: &[u8]) -> Result<(), TrayError> {
        logged(
            "set tray icon",
            ROOT_ID,
            self.session.set_tray_icon(IconSource::Bytes(icon)),
        )
    }

    /// Sets the tray icon from a `.ico` file.
    pub fn set_icon_from_path(&self, path: impl AsRef<Path>) -> Result<(), TrayError> {
        logged(
            "set tray icon",
            ROOT_ID,
            self.session.set_tray_icon(IconSource::Path(path.as_ref())),
        )
    }

    pub fn set_tooltip(&self, tooltip: &str) -> Result<(), TrayError> {
        logged("set tooltip", ROOT_ID, self.session.set_tooltip(tooltip))
    }

    /// Registers an observer run every time the menu is about to open.
    pub fn on_tray_opened<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.session.add_opened_observer(Arc::new(f));
    }

    pub fn set_open_on_left_click(&self, open: bool) {
        self.session.set_open_on_left_click(open);
    }

    pub fn set_open_on_right_click(&self, open: bool) {
        self.session.set_open_on_right_click(open);
    }

    /// Applies click policy, tooltip and icon from `config`.
    pub fn apply_config(&self, config: &TrayConfig) -> Result<(), TrayError> {
        self.set_open_on_left_click(config.open_on_left_click);
        self.set_open_on_right_click(config.open_on_right_click);
        if let Some(tooltip) = &config.tooltip {
            self.set_tooltip(tooltip)?;
        }
        if let Some(path) = &config.icon_path {
            self.set_icon_from_path(path)?;
        }
        Ok(())
    }

    /// Adds an entry to the root menu.
    ///
    /// Fails only when no IDs are left. A native failure to show the
    /// entry is logged and the item is returned anyway.
    pub fn add_menu_item(&self, title: impl Into<String>) -> Result<MenuItem, TrayError> {
        let record = self.session.registry.create(title, ROOT_ID)?;
        Ok(MenuItem::created(&self.session, record.id))
    }

    /// Adds a separator bar to the root menu.
    pub fn add_separator(&self) -> Result<(), TrayError> {
        let record = self.session.registry.create_separator(ROOT_ID)?;
        MenuItem::created(&self.session, record.id);
        Ok(())
    }

    /// Looks up a live item by ID.
    pub fn item(&self, id: u32) -> Option<MenuItem> {
        self.session.registry.contains(id).then(|| MenuItem {
            id,
            session: Arc::clone(&self.session),
        })
    }
}

impl fmt::Debug for Tray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tray")
            .field("state", &self.session.state())
            .field("items", &self.session.registry.len())
            .finish()
    }
}

/// Handle to one menu entry.
#[derive(Clone)]
pub struct MenuItem {
    id: u32,
    session: Arc<TraySession>,
}

impl MenuItem {
    /// Wraps a fresh record and shows it. A failed first sync leaves the
    /// item in the registry; a later setter or `show` retries.
    fn created(session: &Arc<TraySession>, id: u32) -> Self {
        let _ = logged("add menu item", id, session.sync_item(id));
        Self {
            id,
            session: Arc::clone(session),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Parent item ID, `0` for root entries.
    pub fn parent_id(&self) -> u32 {
        self.record().map_or(ROOT_ID, |r| r.parent)
    }

    /// Parent handle, `None` for root entries or removed parents.
    pub fn parent(&self) -> Option<MenuItem> {
        match self.parent_id() {
            ROOT_ID => None,
            parent => self.session.registry.contains(parent).then(|| MenuItem {
                id: parent,
                session: Arc::clone(&self.session),
            }),
        }
    }

    fn record(&self) -> Option<MenuItemRecord> {
        self.session.registry.find(self.id)
    }

    pub fn title(&self) -> String {
        self.record().map(|r| r.title).unwrap_or_default()
    }

    pub fn disabled(&self) -> bool {
        self.record().is_some_and(|r| r.disabled)
    }

    pub fn checked(&self) -> bool {
        self.record().is_some_and(|r| r.checked)
    }

    /// Returns `false` once the item has been removed.
    pub fn exists(&self) -> bool {
        self.session.registry.contains(self.id)
    }

    /// Sets the click handler. It runs on the executor, never on the
    /// pump thread.
    pub fn set_callback<F>(&self, f: F) -> Result<(), TrayError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.session.registry.set_callback(self.id, Some(Arc::new(f)))
    }

    /// Adds a nested entry, promoting this item to a submenu if needed.
    pub fn add_sub_menu_item(&self, title: impl Into<String>) -> Result<MenuItem, TrayError> {
        let record = self.session.registry.create(title, self.id)?;
        Ok(MenuItem::created(&self.session, record.id))
    }

    /// Adds a separator bar to this item's submenu.
    pub fn add_separator(&self) -> Result<(), TrayError> {
        let record = self.session.registry.create_separator(self.id)?;
        MenuItem::created(&self.session, record.id);
        Ok(())
    }

    fn apply(
        &self,
        what: &str,
        f: impl FnOnce(&Registry) -> Result<MenuItemRecord, TrayError>,
    ) -> Result<(), TrayError> {
        let result = f(&self.session.registry).and_then(|r| self.session.sync_item(r.id));
        logged(what, self.id, result)
    }

    pub fn set_title(&self, title: impl Into<String>) -> Result<(), TrayError> {
        let title = title.into();
        self.apply("set title", |reg| reg.set_title(self.id, title))
    }

    pub fn enable(&self) -> Result<(), TrayError> {
        self.apply("enable menu item", |reg| reg.set_disabled(self.id, false))
    }

    pub fn disable(&self) -> Result<(), TrayError> {
        self.apply("disable menu item", |reg| reg.set_disabled(self.id, true))
    }

    pub fn check(&self) -> Result<(), TrayError> {
        self.apply("check menu item", |reg| reg.set_checked(self.id, true))
    }

    pub fn uncheck(&self) -> Result<(), TrayError> {
        self.apply("uncheck menu item", |reg| reg.set_checked(self.id, false))
    }

    /// Takes the item out of the menu. Its state and children are kept.
    pub fn hide(&self) -> Result<(), TrayError> {
        logged("hide menu item", self.id, self.session.hide_item(self.id))
    }

    /// Puts a hidden item back, at the slot its ID takes among the
    /// siblings visible now.
    pub fn show(&self) -> Result<(), TrayError> {
        logged("show menu item", self.id, self.session.sync_item(self.id))
    }

    /// Removes the item and everything below it.
    pub fn remove(&self) -> Result<(), TrayError> {
        logged("remove menu item", self.id, self.session.remove_item(self.id))
    }

    /// Sets the entry image from `.ico` content.
    pub fn set_icon(&self, icon: &[u8]) -> Result<(), TrayError> {
        logged(
            "set menu item icon",
            self.id,
            self.session.set_item_icon(self.id, IconSource::Bytes(icon)),
        )
    }

    /// Sets the entry image from a `.ico` file.
    pub fn set_icon_from_path(&self, path: impl AsRef<Path>) -> Result<(), TrayError> {
        logged(
            "set menu item icon",
            self.id,
            self.session.set_item_icon(self.id, IconSource::Path(path.as_ref())),
        )
    }
}

impl fmt::Display for MenuItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.record() {
            Some(record) => record.fmt(f),
            None => write!(f, "MenuItem[{}, removed]", self.id),
        }
    }
}

impl fmt::Debug for MenuItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuItem")
            .field("id", &self.id)
            .field("record", &self.record())
            .finish()
    }
}

impl PartialEq for MenuItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.session, &other.session)
    }
}

impl Eq for MenuItem {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessSurface, SurfaceOp};

    fn tray() -> (Arc<HeadlessSurface>, Tray) {
        let surface = Arc::new(HeadlessSurface::new());
        let tray = Tray::new(surface.clone());
        tray.register(|| {}, || {}).unwrap();
        (surface, tray)
    }

    #[test]
    fn setters_reflect_in_native_entry() {
        let (surface, tray) = tray();
        let item = tray.add_menu_item("Sync").unwrap();
        item.set_title("Sync now").unwrap();
        item.disable().unwrap();
        item.check().unwrap();

        let root = surface.root_menu().unwrap();
        let entry = &surface.entries(root)[0];
        assert_eq!(entry.title, "Sync now");
        assert!(entry.disabled);
        assert!(entry.checked);

        item.enable().unwrap();
        item.uncheck().unwrap();
        let entry = &surface.entries(root)[0];
        assert!(!entry.disabled && !entry.checked);
        assert!(!item.disabled() && !item.checked());
        assert_eq!(item.title(), "Sync now");
    }

    #[test]
    fn items_before_register_are_kept_but_not_shown() {
        let surface = Arc::new(HeadlessSurface::new());
        let tray = Tray::new(surface.clone());
        let early = tray.add_menu_item("early").unwrap();
        assert!(early.exists());

        tray.register(|| {}, || {}).unwrap();
        let root = surface.root_menu().unwrap();
        assert!(surface.ids(root).is_empty());

        early.show().unwrap();
        assert_eq!(surface.ids(root), vec![early.id()]);
    }

    #[test]
    fn parent_relations() {
        let (_surface, tray) = tray();
        let a = tray.add_menu_item("A").unwrap();
        let b = a.add_sub_menu_item("B").unwrap();
        assert_eq!(b.parent(), Some(a.clone()));
        assert_eq!(b.parent_id(), a.id());
        assert!(a.parent().is_none());
        assert_eq!(tray.item(b.id()), Some(b.clone()));
        assert_eq!(b.to_string(), format!("MenuItem[{}, parent {}, \"B\"]", b.id(), a.id()));
    }

    #[test]
    fn removed_item_rejects_setters() {
        let (_surface, tray) = tray();
        let a = tray.add_menu_item("A").unwrap();
        a.remove().unwrap();
        assert!(!a.exists());
        assert!(matches!(a.set_title("x"), Err(TrayError::UnknownItem(_))));
        assert!(matches!(a.remove(), Err(TrayError::UnknownItem(_))));
        assert_eq!(a.to_string(), format!("MenuItem[{}, removed]", a.id()));
        assert!(tray.item(a.id()).is_none());
    }

    #[test]
    fn native_failure_is_returned_and_state_kept() {
        let (surface, tray) = tray();
        let a = tray.add_menu_item("A").unwrap();
        surface.fail_next(SurfaceOp::Update);
        assert!(matches!(
            a.set_title("B"),
            Err(TrayError::Native { op: "update item", .. })
        ));
        // The registry already holds the new title; the next sync retries.
        assert_eq!(a.title(), "B");
        a.check().unwrap();
        let root = surface.root_menu().unwrap();
        assert_eq!(surface.entries(root)[0].title, "B");
    }

    #[test]
    fn apply_config_sets_policy_and_tooltip() {
        let (surface, tray) = tray();
        let config = TrayConfig {
            tooltip: Some("agent".into()),
            open_on_left_click: false,
            ..TrayConfig::default()
        };
        tray.apply_config(&config).unwrap();
        assert!(!tray.session().opens_on_left_click());
        assert!(tray.session().opens_on_right_click());
        assert_eq!(
            surface.notify_data().unwrap().tooltip.as_deref(),
            Some("agent")
        );
    }

    #[test]
    fn apply_config_with_missing_icon_fails() {
        let (_surface, tray) = tray();
        let config = TrayConfig {
            icon_path: Some("/no/such/icon.ico".into()),
            ..TrayConfig::default()
        };
        assert!(matches!(
            tray.apply_config(&config),
            Err(TrayError::Native { op: "load icon", .. })
        ));
    }

    #[test]
    fn separators_are_items() {
        let (surface, tray) = tray();
        let a = tray.add_menu_item("A").unwrap();
        tray.add_separator().unwrap();
        a.add_separator().unwrap();
        let root = surface.root_menu().unwrap();
        assert_eq!(surface.ids(root), vec![a.id(), a.id() + 1]);

        a.remove().unwrap();
        assert_eq!(tray.session().registry.len(), 1);
    }

    #[test]
    fn item_icon_from_file() {
        let (surface, tray) = tray();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("item.ico");
        std::fs::write(&path, b"\x00\x00\x01\x00").unwrap();

        let a = tray.add_menu_item("A").unwrap();
        let b = tray.add_menu_item("B").unwrap();
        a.set_icon_from_path(&path).unwrap();
        b.set_icon_from_path(&path).unwrap();

        assert_eq!(surface.icons_loaded(), 1);
        let root = surface.root_menu().unwrap();
        assert!(surface.entries(root).iter().all(|e| e.bitmap.is_some()));
    }
}
