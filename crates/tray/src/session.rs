//! Tray session state and lifecycle.
//!
//! A [`TraySession`] bundles everything one tray owns: the native
//! surface, the registry, the menu sync tables, the icon cache, the
//! notification-icon record and the exit gate. Sessions are plain values
//! shared through `Arc`, so tests can run several side by side against
//! separate headless surfaces.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Once, RwLock};

use tracing::{debug, info, warn};

use crate::error::TrayError;
use crate::executor::CallbackExecutor;
use crate::icons::IconCache;
use crate::locks;
use crate::native::{IconSource, NativeSurface, NotifyIconData, NotifyOp};
use crate::registry::Registry;
use crate::sync::MenuSync;

/// Callback run once when the session ends.
pub type ExitFn = Box<dyn FnOnce() + Send + 'static>;

/// Observer run on the pump right before the menu pops up.
pub type OpenedFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// Dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Uninitialized = 0,
    Ready = 1,
    Closing = 2,
    Terminated = 3,
}

impl LoopState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Ready,
            2 => Self::Closing,
            3 => Self::Terminated,
            _ => Self::Uninitialized,
        }
    }
}

/// Runs a stored callback at most once, however many paths reach it.
///
/// Firing an unarmed gate does nothing and leaves it usable, so a
/// shutdown path that runs before the callback is armed cannot swallow
/// it.
pub(crate) struct OnceGate {
    callback: Mutex<Option<ExitFn>>,
    fired: AtomicBool,
}

impl OnceGate {
    pub(crate) fn new() -> Self {
        Self {
            callback: Mutex::new(None),
            fired: AtomicBool::new(false),
        }
    }

    /// Arms the gate. Ignored once the gate has fired.
    pub(crate) fn arm(&self, f: ExitFn) {
        let mut callback = locks::lock(&self.callback);
        if !self.fired.load(Ordering::SeqCst) {
            *callback = Some(f);
        }
    }

    /// Fires the armed callback on the calling thread, outside the lock.
    /// Returns `true` for the one call that ran it.
    pub(crate) fn fire(&self) -> bool {
        let f = {
            let mut callback = locks::lock(&self.callback);
            let Some(f) = callback.take() else {
                return false;
            };
            self.fired.store(true, Ordering::SeqCst);
            f
        };
        f();
        true
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// State of one tray icon and its menu.
pub struct TraySession {
    pub(crate) surface: Arc<dyn NativeSurface>,
    pub(crate) registry: Registry,
    pub(crate) sync: MenuSync,
    pub(crate) icons: IconCache,
    pub(crate) executor: CallbackExecutor,
    notify: Mutex<Option<NotifyIconData>>,
    state: AtomicU8,
    initialized: AtomicBool,
    exit: OnceGate,
    quit_requested: AtomicBool,
    quit_once: Once,
    observers: RwLock<Vec<OpenedFn>>,
    open_on_left_click: AtomicBool,
    open_on_right_click: AtomicBool,
}

impl TraySession {
    pub fn new(surface: Arc<dyn NativeSurface>, executor: CallbackExecutor) -> Self {
        Self {
            surface,
            registry: Registry::new(),
            sync: MenuSync::new(),
            icons: IconCache::new(),
            executor,
            notify: Mutex::new(None),
            state: AtomicU8::new(LoopState::Uninitialized as u8),
            initialized: AtomicBool::new(false),
            exit: OnceGate::new(),
            quit_requested: AtomicBool::new(false),
            quit_once: Once::new(),
            observers: RwLock::new(Vec::new()),
            open_on_left_click: AtomicBool::new(true),
            open_on_right_click: AtomicBool::new(true),
        }
    }

    pub fn surface(&self) -> &dyn NativeSurface {
        &*self.surface
    }

    /// Native menu bookkeeping: visible lists and submenu handles.
    pub fn menu_sync(&self) -> &MenuSync {
        &self.sync
    }

    pub fn is_ready(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), TrayError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(TrayError::NotReady)
        }
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Moves the state forward to `state`. States never move backwards,
    /// so a late `Closing` cannot undo `Terminated`.
    pub(crate) fn set_state(&self, state: LoopState) {
        let prev = LoopState::from_u8(self.state.fetch_max(state as u8, Ordering::SeqCst));
        if (prev as u8) < (state as u8) {
            debug!(from = ?prev, to = ?state, "tray state changed");
        }
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Registers the native surface, creates the root menu and marks the
    /// session ready.
    ///
    /// `on_ready` is submitted to the executor once everything is in
    /// place; `on_exit` is kept for the dispatcher, which runs it
    /// synchronously exactly once. A quit requested before this call is
    /// carried out as soon as the session is ready.
    pub fn initialize<R, E>(&self, on_ready: R, on_exit: E) -> Result<(), TrayError>
    where
        R: FnOnce() + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        if self.is_ready() {
            return Err(TrayError::AlreadyInitialized);
        }
        self.exit.arm(Box::new(on_exit));

        self.surface
            .register()
            .map_err(TrayError::native("initialize tray"))?;
        *locks::lock(&self.notify) = Some(NotifyIconData::default());

        self.sync.create_root(&*self.surface)?;

        self.initialized.store(true, Ordering::SeqCst);
        self.set_state(LoopState::Ready);
        info!("tray initialized");

        self.executor.spawn(on_ready);

        if self.quit_requested.load(Ordering::SeqCst) {
            info!("quit was requested during startup");
            self.quit();
        }
        Ok(())
    }

    /// Removes every menu item created so far and rebuilds an empty root
    /// menu. The tray icon itself is left alone.
    ///
    /// Items created by other threads while the reset runs are kept in
    /// the registry.
    pub fn reset(&self) -> Result<(), TrayError> {
        self.reset_below(self.registry.next_id())
    }

    /// Removes items with IDs below `limit`, rebuilds the root menu and
    /// shows the surviving items again in it.
    pub(crate) fn reset_below(&self, limit: u32) -> Result<(), TrayError> {
        self.ensure_ready()?;
        for id in self.registry.ids_below(limit) {
            // Descendants of an earlier ID are already gone.
            if !self.registry.contains(id) {
                continue;
            }
            if let Err(e) = self.remove_item(id) {
                warn!(id, "failed to remove menu item during reset: {e}");
            }
        }
        self.icons.clear_items();
        self.sync.rebuild_root(&*self.surface)?;

        // Parents come before their children in ID order.
        for id in self.registry.ids_from(limit) {
            match self.sync_item(id) {
                Ok(()) | Err(TrayError::UnknownItem(_)) => {}
                Err(e) => warn!(id, "failed to restore menu item after reset: {e}"),
            }
        }
        info!("menu reset");
        Ok(())
    }

    /// Requests the session to close. Only the first call on a ready
    /// session has an effect.
    ///
    /// The close request is posted to the pump; independently of the
    /// pump, the tray icon is removed and the exit callback fires. Before
    /// initialization the request is only recorded, and `initialize`
    /// carries it out.
    pub fn quit(&self) {
        self.quit_requested.store(true, Ordering::SeqCst);
        if !self.is_ready() {
            debug!("quit requested before initialization");
            return;
        }
        self.quit_once.call_once(|| {
            self.set_state(LoopState::Closing);
            if let Err(e) = self.surface.post_close() {
                warn!("failed to post close request: {e}");
            }
            self.delete_notify_icon();
            self.fire_exit();
        });
    }

    pub(crate) fn fire_exit(&self) {
        if self.exit.fire() {
            info!("tray exited");
        }
    }

    pub fn exit_fired(&self) -> bool {
        self.exit.has_fired()
    }

    // -----------------------------------------------------------------
    // Notification icon
    // -----------------------------------------------------------------

    pub(crate) fn delete_notify_icon(&self) {
        let mut notify = locks::lock(&self.notify);
        if let Some(data) = notify.take()
            && let Err(e) = self.surface.notify_icon(NotifyOp::Delete, &data)
        {
            warn!("failed to delete tray icon: {e}");
        }
    }

    /// Adds the tray icon again after the shell restarted.
    pub(crate) fn readd_notify_icon(&self) {
        let notify = locks::lock(&self.notify);
        if let Some(data) = notify.as_ref() {
            match self.surface.notify_icon(NotifyOp::Add, data) {
                Ok(()) => info!("tray icon restored after shell restart"),
                Err(e) => warn!("failed to restore tray icon: {e}"),
            }
        }
    }

    /// Applies `f` to a copy of the notification data and commits it
    /// only if the native modify succeeds.
    fn modify_notify(&self, f: impl FnOnce(&mut NotifyIconData)) -> Result<(), TrayError> {
        let mut notify = locks::lock(&self.notify);
        let current = notify.as_ref().ok_or(TrayError::NotReady)?;
        let mut next = current.clone();
        f(&mut next);
        self.surface
            .notify_icon(NotifyOp::Modify, &next)
            .map_err(TrayError::native("modify tray icon"))?;
        *notify = Some(next);
        Ok(())
    }

    pub(crate) fn set_tray_icon(&self, source: IconSource<'_>) -> Result<(), TrayError> {
        self.ensure_ready()?;
        let icon = self
            .icons
            .load(&*self.surface, source)
            .map_err(TrayError::native("load icon"))?;
        self.modify_notify(|data| data.icon = Some(icon))
    }

    pub(crate) fn set_tooltip(&self, tooltip: &str) -> Result<(), TrayError> {
        self.ensure_ready()?;
        self.modify_notify(|data| data.tooltip = Some(tooltip.to_string()))
    }

    pub fn notify_data(&self) -> Option<NotifyIconData> {
        locks::lock(&self.notify).clone()
    }

    // -----------------------------------------------------------------
    // Menu items
    // -----------------------------------------------------------------

    /// Pushes the current registry state of `id` to the native menu.
    pub(crate) fn sync_item(&self, id: u32) -> Result<(), TrayError> {
        self.ensure_ready()?;
        self.sync
            .upsert(&*self.surface, &self.registry, id, self.icons.item_bitmap(id))
    }

    pub(crate) fn hide_item(&self, id: u32) -> Result<(), TrayError> {
        self.ensure_ready()?;
        let record = self.registry.find(id).ok_or(TrayError::UnknownItem(id))?;
        self.sync.hide(&*self.surface, id, record.parent)
    }

    /// Removes `id` and all its descendants, children first.
    ///
    /// Every record and table entry is gone afterwards even if some
    /// native deletes failed; the first failure is returned.
    pub(crate) fn remove_item(&self, id: u32) -> Result<(), TrayError> {
        let record = self.registry.find(id).ok_or(TrayError::UnknownItem(id))?;

        let mut first_err = None;
        for child in self.registry.children_of(id) {
            if let Err(e) = self.remove_item(child) {
                first_err.get_or_insert(e);
            }
        }

        // Erased first, so a concurrent setter cannot show it again.
        self.registry.erase(id);
        if let Err(e) = self.sync.delete(&*self.surface, id, record.parent) {
            first_err.get_or_insert(e);
        }
        self.icons.forget_item(id);
        debug!(id, "menu item removed");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn set_item_icon(&self, id: u32, source: IconSource<'_>) -> Result<(), TrayError> {
        self.ensure_ready()?;
        if !self.registry.contains(id) {
            return Err(TrayError::UnknownItem(id));
        }
        let icon = self
            .icons
            .load(&*self.surface, source)
            .map_err(TrayError::native("load icon"))?;
        let bitmap = self
            .surface
            .icon_to_bitmap(icon)
            .map_err(TrayError::native("convert icon to bitmap"))?;
        self.icons.set_item_bitmap(id, bitmap);

        let result = self
            .sync
            .upsert(&*self.surface, &self.registry, id, Some(bitmap));
        if let Err(TrayError::UnknownItem(_)) = result {
            // Removed while the icon was loading.
            self.icons.forget_item(id);
        }
        result
    }

    // -----------------------------------------------------------------
    // Popup
    // -----------------------------------------------------------------

    pub(crate) fn add_opened_observer(&self, f: OpenedFn) {
        locks::write(&self.observers).push(f);
    }

    pub(crate) fn opened_observers(&self) -> Vec<OpenedFn> {
        locks::read(&self.observers).clone()
    }

    pub(crate) fn set_open_on_left_click(&self, open: bool) {
        self.open_on_left_click.store(open, Ordering::SeqCst);
    }

    pub(crate) fn set_open_on_right_click(&self, open: bool) {
        self.open_on_right_click.store(open, Ordering::SeqCst);
    }

    pub(crate) fn opens_on_left_click(&self) -> bool {
        self.open_on_left_click.load(Ordering::SeqCst)
    }

    pub(crate) fn opens_on_right_click(&self) -> bool {
        self.open_on_right_click.load(Ordering::SeqCst)
    }

    /// Pops the root menu up at the pointer.
    pub(crate) fn show_menu(&self) -> Result<(), TrayError> {
        self.ensure_ready()?;
        let root = self.sync.root().ok_or(TrayError::NotReady)?;
        let at = self
            .surface
            .cursor_position()
            .map_err(TrayError::native("get cursor position"))?;
        self.surface
            .show_popup(root, at)
            .map_err(TrayError::native("track popup menu"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessSurface, SurfaceCall, SurfaceOp};
    use crate::ids::ROOT_ID;
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc;
    use std::time::Duration;

    fn session() -> (Arc<HeadlessSurface>, TraySession) {
        let surface = Arc::new(HeadlessSurface::new());
        let session = TraySession::new(surface.clone(), CallbackExecutor::Threads);
        (surface, session)
    }

    #[test]
    fn initialize_creates_root_and_fires_ready() {
        let (surface, session) = session();
        assert_eq!(session.state(), LoopState::Uninitialized);

        let (tx, rx) = mpsc::channel();
        session
            .initialize(move || tx.send(()).unwrap(), || {})
            .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(session.is_ready());
        assert_eq!(session.state(), LoopState::Ready);
        assert_eq!(session.sync.root(), surface.root_menu());
        assert!(surface.notify_data().is_some());
    }

    #[test]
    fn initialize_twice_fails() {
        let (_surface, session) = session();
        session.initialize(|| {}, || {}).unwrap();
        assert!(matches!(
            session.initialize(|| {}, || {}),
            Err(TrayError::AlreadyInitialized)
        ));
    }

    #[test]
    fn failed_registration_leaves_session_uninitialized() {
        let (surface, session) = session();
        surface.fail_next(SurfaceOp::Register);
        assert!(session.initialize(|| {}, || {}).is_err());
        assert!(!session.is_ready());
        assert_eq!(session.state(), LoopState::Uninitialized);
    }

    #[test]
    fn operations_before_init_are_not_ready() {
        let (_surface, session) = session();
        let rec = session.registry.create("A", ROOT_ID).unwrap();
        assert!(session.sync_item(rec.id).unwrap_err().is_not_ready());
        assert!(session.set_tooltip("x").unwrap_err().is_not_ready());
        assert!(session.show_menu().unwrap_err().is_not_ready());
        assert!(session.reset().unwrap_err().is_not_ready());
    }

    #[test]
    fn quit_fires_exit_once_under_contention() {
        let (_surface, session) = session();
        let exits = Arc::new(AtomicU32::new(0));
        let e = Arc::clone(&exits);
        session
            .initialize(
                || {},
                move || {
                    e.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        let session = Arc::new(session);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let s = Arc::clone(&session);
                std::thread::spawn(move || s.quit())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // A later end-of-session path must not fire it again either.
        session.fire_exit();
        assert_eq!(exits.load(Ordering::SeqCst), 1);
        assert!(session.exit_fired());
        assert_eq!(session.state(), LoopState::Closing);
    }

    #[test]
    fn quit_removes_tray_icon_and_posts_close() {
        let (surface, session) = session();
        session.initialize(|| {}, || {}).unwrap();
        session.quit();
        assert!(surface.notify_data().is_none());
        assert!(session.notify_data().is_none());
        assert!(surface.calls().contains(&SurfaceCall::PostClose));
    }

    #[test]
    fn tooltip_failure_keeps_previous_state() {
        let (surface, session) = session();
        session.initialize(|| {}, || {}).unwrap();
        session.set_tooltip("first").unwrap();

        surface.fail_next(SurfaceOp::Notify);
        assert!(session.set_tooltip("second").is_err());
        assert_eq!(
            session.notify_data().unwrap().tooltip.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn readd_after_shell_restart_uses_current_data() {
        let (surface, session) = session();
        session.initialize(|| {}, || {}).unwrap();
        session.set_tooltip("hello").unwrap();
        session.set_tray_icon(IconSource::Bytes(b"ico")).unwrap();

        session.readd_notify_icon();
        let data = surface.notify_data().unwrap();
        assert_eq!(data.tooltip.as_deref(), Some("hello"));
        assert!(data.icon.is_some());
    }

    #[test]
    fn remove_is_recursive() {
        let (surface, session) = session();
        session.initialize(|| {}, || {}).unwrap();
        let a = session.registry.create("A", ROOT_ID).unwrap();
        session.sync_item(a.id).unwrap();
        let b = session.registry.create("B", a.id).unwrap();
        session.sync_item(b.id).unwrap();
        let c = session.registry.create("C", b.id).unwrap();
        session.sync_item(c.id).unwrap();

        session.remove_item(a.id).unwrap();
        for id in [a.id, b.id, c.id] {
            assert!(!session.registry.contains(id));
            assert!(!session.sync.references(id));
        }
        assert!(surface.ids(surface.root_menu().unwrap()).is_empty());
        // Only the root menu survives.
        assert_eq!(surface.menu_count(), 1);
    }

    #[test]
    fn reset_clears_items_but_keeps_tray_icon() {
        let (surface, session) = session();
        session.initialize(|| {}, || {}).unwrap();
        session.set_tooltip("still here").unwrap();
        let old_root = surface.root_menu().unwrap();

        let a = session.registry.create("A", ROOT_ID).unwrap();
        session.sync_item(a.id).unwrap();
        let b = session.registry.create("B", a.id).unwrap();
        session.sync_item(b.id).unwrap();
        session.set_item_icon(b.id, IconSource::Bytes(b"ico")).unwrap();

        session.reset().unwrap();

        assert!(session.registry.is_empty());
        assert!(session.icons.item_bitmap(b.id).is_none());
        let new_root = surface.root_menu().unwrap();
        assert_ne!(old_root, new_root);
        assert!(surface.ids(new_root).is_empty());
        assert_eq!(
            surface.notify_data().unwrap().tooltip.as_deref(),
            Some("still here")
        );

        // The menu is usable again.
        let c = session.registry.create("C", ROOT_ID).unwrap();
        session.sync_item(c.id).unwrap();
        assert_eq!(surface.ids(new_root), vec![c.id]);
    }

    #[test]
    fn item_icon_survives_hide_and_show() {
        let (surface, session) = session();
        session.initialize(|| {}, || {}).unwrap();
        let a = session.registry.create("A", ROOT_ID).unwrap();
        session.sync_item(a.id).unwrap();
        session.set_item_icon(a.id, IconSource::Bytes(b"ico")).unwrap();
        let bitmap = session.icons.item_bitmap(a.id);
        assert!(bitmap.is_some());

        session.hide_item(a.id).unwrap();
        session.sync_item(a.id).unwrap();
        let root = surface.root_menu().unwrap();
        assert_eq!(surface.entries(root)[0].bitmap, bitmap);
    }

    #[test]
    fn quit_before_initialize_is_carried_out_once_ready() {
        let (surface, session) = session();
        session.quit();
        assert!(!session.exit_fired());
        assert!(surface.calls().is_empty());

        let exits = Arc::new(AtomicU32::new(0));
        let e = Arc::clone(&exits);
        session
            .initialize(
                || {},
                move || {
                    e.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        assert_eq!(exits.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), LoopState::Closing);
        assert!(surface.calls().contains(&SurfaceCall::PostClose));
        assert!(surface.notify_data().is_none());

        // Later shutdown paths do not fire it again.
        session.quit();
        session.fire_exit();
        assert_eq!(exits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unarmed_gate_stays_usable() {
        let gate = OnceGate::new();
        assert!(!gate.fire());
        assert!(!gate.has_fired());

        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        gate.arm(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(gate.fire());
        assert!(!gate.fire());
        assert!(gate.has_fired());

        // Arming after firing is ignored.
        let h = Arc::clone(&hits);
        gate.arm(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!gate.fire());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_sync_of_removed_item_is_rejected() {
        let (surface, session) = session();
        session.initialize(|| {}, || {}).unwrap();
        let a = session.registry.create("A", ROOT_ID).unwrap();
        session.sync_item(a.id).unwrap();

        let stale = session.registry.set_title(a.id, "A2").unwrap();
        session.remove_item(a.id).unwrap();

        assert!(matches!(
            session.sync_item(stale.id),
            Err(TrayError::UnknownItem(_))
        ));
        assert!(!session.registry.contains(a.id));
        assert!(!session.sync.references(a.id));
        assert!(surface.ids(surface.root_menu().unwrap()).is_empty());
    }

    #[test]
    fn icon_for_unknown_item_leaves_no_bitmap() {
        let (surface, session) = session();
        session.initialize(|| {}, || {}).unwrap();

        assert!(matches!(
            session.set_item_icon(999, IconSource::Bytes(b"ico")),
            Err(TrayError::UnknownItem(999))
        ));
        assert!(session.icons.item_bitmap(999).is_none());
        assert_eq!(surface.icons_loaded(), 0);
    }

    #[test]
    fn removed_item_drops_its_bitmap() {
        let (_surface, session) = session();
        session.initialize(|| {}, || {}).unwrap();
        let a = session.registry.create("A", ROOT_ID).unwrap();
        session.sync_item(a.id).unwrap();
        session.set_item_icon(a.id, IconSource::Bytes(b"ico")).unwrap();

        session.remove_item(a.id).unwrap();
        assert!(session.icons.item_bitmap(a.id).is_none());
    }

    #[test]
    fn items_created_during_reset_are_shown_in_new_root() {
        let (surface, session) = session();
        session.initialize(|| {}, || {}).unwrap();
        let old = session.registry.create("old", ROOT_ID).unwrap();
        session.sync_item(old.id).unwrap();
        let limit = session.registry.next_id();

        // Created by another thread while the reset is running.
        let late = session.registry.create("late", ROOT_ID).unwrap();
        session.sync_item(late.id).unwrap();
        let child = session.registry.create("late child", late.id).unwrap();
        session.sync_item(child.id).unwrap();

        session.reset_below(limit).unwrap();

        assert!(!session.registry.contains(old.id));
        let root = surface.root_menu().unwrap();
        assert_eq!(surface.ids(root), vec![late.id]);
        let sub = surface.submenu_of(root, late.id).unwrap();
        assert_eq!(surface.ids(sub), vec![child.id]);
    }
}
