//! In-memory [`NativeSurface`].
//!
//! Models native menus as position-indexed entry lists, the notification
//! icon as a plain record, and the message queue as a blocking FIFO. It
//! behaves like the platform subsystem where the tray core can observe
//! the difference: positions must be in range, updates and deletes
//! address entries by ID, deleting an entry frees its submenu while
//! removing it does not, and the quit message ends the pump.
//!
//! Every call is appended to a log so tests can assert on the exact
//! command sequence, and any operation can be made to fail once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};

use crate::locks;
use crate::native::{
    BitmapHandle, IconHandle, IconSource, ItemSpec, MenuHandle, NativeError, NativeMessage,
    NativeSurface, NotifyIconData, NotifyOp, Point, RawMessage,
};

/// Operation names used for call logging and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceOp {
    Register,
    CreateRootMenu,
    DestroyMenu,
    Promote,
    Insert,
    Update,
    Delete,
    Remove,
    CursorPosition,
    ShowPopup,
    Notify,
    LoadIcon,
    IconToBitmap,
    NextMessage,
    PostClose,
    DestroyWindow,
    UnregisterClass,
}

/// One logged surface call.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Register,
    CreateRootMenu(MenuHandle),
    DestroyMenu(MenuHandle),
    Promote {
        container: MenuHandle,
        item: u32,
        submenu: MenuHandle,
    },
    Insert {
        menu: MenuHandle,
        position: usize,
        id: u32,
    },
    Update {
        menu: MenuHandle,
        id: u32,
    },
    Delete {
        menu: MenuHandle,
        id: u32,
    },
    Remove {
        menu: MenuHandle,
        id: u32,
    },
    ShowPopup {
        menu: MenuHandle,
        at: Point,
    },
    Notify(NotifyOp),
    PostClose,
    PostQuit,
    DestroyWindow,
    UnregisterClass,
    Default(RawMessage),
}

enum Queued {
    Message(NativeMessage),
    Quit,
    Fail(NativeError),
}

#[derive(Default)]
struct State {
    next_handle: u64,
    registered: bool,
    window_alive: bool,
    class_registered: bool,
    root: Option<MenuHandle>,
    menus: HashMap<MenuHandle, Vec<ItemSpec>>,
    notify: Option<NotifyIconData>,
    icons_loaded: usize,
    cursor: Point,
    calls: Vec<SurfaceCall>,
    fail_once: HashSet<SurfaceOp>,
}

impl State {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn check(&mut self, op: SurfaceOp) -> Result<(), NativeError> {
        if self.fail_once.remove(&op) {
            return Err(NativeError::failed(-1, format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn menu_mut(&mut self, menu: MenuHandle) -> Result<&mut Vec<ItemSpec>, NativeError> {
        self.menus
            .get_mut(&menu)
            .ok_or_else(|| NativeError::failed(1401, format!("invalid menu handle {menu}")))
    }

    fn destroy(&mut self, menu: MenuHandle) {
        if let Some(entries) = self.menus.remove(&menu) {
            for sub in entries.into_iter().filter_map(|e| e.submenu) {
                self.destroy(sub);
            }
        }
    }
}

/// Headless menu surface. Cheap to create; one per session.
pub struct HeadlessSurface {
    state: Mutex<State>,
    queue: Mutex<VecDeque<Queued>>,
    available: Condvar,
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    fn enqueue(&self, item: Queued) {
        locks::lock(&self.queue).push_back(item);
        self.available.notify_one();
    }

    /// Queues a message for the pump.
    pub fn post(&self, msg: NativeMessage) {
        self.enqueue(Queued::Message(msg));
    }

    /// Makes the next retrieval fail, as a broken message queue would.
    pub fn break_pump(&self) {
        self.enqueue(Queued::Fail(NativeError::failed(-1, "message queue broken")));
    }

    /// Makes the next call of `op` fail.
    pub fn fail_next(&self, op: SurfaceOp) {
        locks::lock(&self.state).fail_once.insert(op);
    }

    pub fn set_cursor(&self, at: Point) {
        locks::lock(&self.state).cursor = at;
    }

    pub fn root_menu(&self) -> Option<MenuHandle> {
        locks::lock(&self.state).root
    }

    /// Entries of `menu` in display order.
    pub fn entries(&self, menu: MenuHandle) -> Vec<ItemSpec> {
        locks::lock(&self.state)
            .menus
            .get(&menu)
            .cloned()
            .unwrap_or_default()
    }

    /// IDs of the entries of `menu` in display order.
    pub fn ids(&self, menu: MenuHandle) -> Vec<u32> {
        self.entries(menu).iter().map(|e| e.id).collect()
    }

    /// Submenu attached to entry `id` of `menu`.
    pub fn submenu_of(&self, menu: MenuHandle, id: u32) -> Option<MenuHandle> {
        self.entries(menu)
            .into_iter()
            .find(|e| e.id == id)
            .and_then(|e| e.submenu)
    }

    pub fn menu_exists(&self, menu: MenuHandle) -> bool {
        locks::lock(&self.state).menus.contains_key(&menu)
    }

    pub fn menu_count(&self) -> usize {
        locks::lock(&self.state).menus.len()
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        locks::lock(&self.state).calls.clone()
    }

    /// Returns and clears the call log.
    pub fn take_calls(&self) -> Vec<SurfaceCall> {
        std::mem::take(&mut locks::lock(&self.state).calls)
    }

    pub fn notify_data(&self) -> Option<NotifyIconData> {
        locks::lock(&self.state).notify.clone()
    }

    pub fn icons_loaded(&self) -> usize {
        locks::lock(&self.state).icons_loaded
    }

    pub fn window_alive(&self) -> bool {
        locks::lock(&self.state).window_alive
    }

    pub fn class_registered(&self) -> bool {
        locks::lock(&self.state).class_registered
    }
}

impl NativeSurface for HeadlessSurface {
    fn register(&self) -> Result<(), NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::Register)?;
        if s.registered {
            return Err(NativeError::failed(1410, "class already exists"));
        }
        s.registered = true;
        s.class_registered = true;
        s.window_alive = true;
        s.notify = Some(NotifyIconData::default());
        s.calls.push(SurfaceCall::Register);
        Ok(())
    }

    fn create_root_menu(&self) -> Result<MenuHandle, NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::CreateRootMenu)?;
        let menu = MenuHandle(s.handle());
        s.menus.insert(menu, Vec::new());
        s.root = Some(menu);
        s.calls.push(SurfaceCall::CreateRootMenu(menu));
        Ok(menu)
    }

    fn destroy_menu(&self, menu: MenuHandle) -> Result<(), NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::DestroyMenu)?;
        s.menu_mut(menu)?;
        s.destroy(menu);
        if s.root == Some(menu) {
            s.root = None;
        }
        s.calls.push(SurfaceCall::DestroyMenu(menu));
        Ok(())
    }

    fn promote_to_submenu(
        &self,
        container: MenuHandle,
        item: u32,
    ) -> Result<MenuHandle, NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::Promote)?;
        let submenu = MenuHandle(s.handle());
        let entry = s
            .menu_mut(container)?
            .iter_mut()
            .find(|e| e.id == item)
            .ok_or(NativeError::NotFound(item))?;
        entry.submenu = Some(submenu);
        s.menus.insert(submenu, Vec::new());
        s.calls.push(SurfaceCall::Promote {
            container,
            item,
            submenu,
        });
        Ok(submenu)
    }

    fn insert_item(
        &self,
        menu: MenuHandle,
        position: usize,
        spec: &ItemSpec,
    ) -> Result<(), NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::Insert)?;
        let entries = s.menu_mut(menu)?;
        if position > entries.len() {
            return Err(NativeError::failed(
                87,
                format!("position {position} out of range ({} entries)", entries.len()),
            ));
        }
        entries.insert(position, spec.clone());
        s.calls.push(SurfaceCall::Insert {
            menu,
            position,
            id: spec.id,
        });
        Ok(())
    }

    fn update_item(&self, menu: MenuHandle, spec: &ItemSpec) -> Result<(), NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::Update)?;
        let entry = s
            .menu_mut(menu)?
            .iter_mut()
            .find(|e| e.id == spec.id)
            .ok_or(NativeError::NotFound(spec.id))?;
        let submenu = spec.submenu.or(entry.submenu);
        *entry = ItemSpec {
            submenu,
            ..spec.clone()
        };
        s.calls.push(SurfaceCall::Update { menu, id: spec.id });
        Ok(())
    }

    fn delete_item(&self, menu: MenuHandle, id: u32) -> Result<(), NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::Delete)?;
        let entries = s.menu_mut(menu)?;
        let pos = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(NativeError::NotFound(id))?;
        let entry = entries.remove(pos);
        if let Some(sub) = entry.submenu {
            s.destroy(sub);
        }
        s.calls.push(SurfaceCall::Delete { menu, id });
        Ok(())
    }

    fn remove_item(&self, menu: MenuHandle, id: u32) -> Result<(), NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::Remove)?;
        let entries = s.menu_mut(menu)?;
        let pos = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(NativeError::NotFound(id))?;
        entries.remove(pos);
        s.calls.push(SurfaceCall::Remove { menu, id });
        Ok(())
    }

    fn cursor_position(&self) -> Result<Point, NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::CursorPosition)?;
        Ok(s.cursor)
    }

    fn show_popup(&self, menu: MenuHandle, at: Point) -> Result<(), NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::ShowPopup)?;
        s.menu_mut(menu)?;
        s.calls.push(SurfaceCall::ShowPopup { menu, at });
        Ok(())
    }

    fn notify_icon(&self, op: NotifyOp, data: &NotifyIconData) -> Result<(), NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::Notify)?;
        match op {
            NotifyOp::Add => s.notify = Some(data.clone()),
            NotifyOp::Modify => match s.notify.as_mut() {
                Some(current) => *current = data.clone(),
                None => return Err(NativeError::failed(1168, "no notification icon")),
            },
            NotifyOp::Delete => s.notify = None,
        }
        s.calls.push(SurfaceCall::Notify(op));
        Ok(())
    }

    fn load_icon(&self, source: IconSource<'_>) -> Result<IconHandle, NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::LoadIcon)?;
        match source {
            IconSource::Path(path) => {
                if !path.is_file() {
                    return Err(NativeError::failed(
                        2,
                        format!("cannot load icon from {}", path.display()),
                    ));
                }
            }
            IconSource::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Err(NativeError::failed(1813, "empty icon data"));
                }
            }
        }
        s.icons_loaded += 1;
        Ok(IconHandle(s.handle()))
    }

    fn icon_to_bitmap(&self, _icon: IconHandle) -> Result<BitmapHandle, NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::IconToBitmap)?;
        Ok(BitmapHandle(s.handle()))
    }

    fn next_message(&self) -> Result<Option<NativeMessage>, NativeError> {
        locks::lock(&self.state).check(SurfaceOp::NextMessage)?;
        let mut queue = locks::lock(&self.queue);
        loop {
            if let Some(item) = queue.pop_front() {
                return match item {
                    Queued::Message(msg) => Ok(Some(msg)),
                    Queued::Quit => Ok(None),
                    Queued::Fail(err) => Err(err),
                };
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    fn post_close(&self) -> Result<(), NativeError> {
        {
            let mut s = locks::lock(&self.state);
            s.check(SurfaceOp::PostClose)?;
            if !s.window_alive {
                return Err(NativeError::failed(1400, "invalid window handle"));
            }
            s.calls.push(SurfaceCall::PostClose);
        }
        self.post(NativeMessage::Close);
        Ok(())
    }

    fn post_quit(&self) {
        locks::lock(&self.state).calls.push(SurfaceCall::PostQuit);
        self.enqueue(Queued::Quit);
    }

    fn destroy_window(&self) -> Result<(), NativeError> {
        {
            let mut s = locks::lock(&self.state);
            s.check(SurfaceOp::DestroyWindow)?;
            if !s.window_alive {
                return Err(NativeError::failed(1400, "invalid window handle"));
            }
            s.window_alive = false;
            s.calls.push(SurfaceCall::DestroyWindow);
        }
        self.post(NativeMessage::Destroy);
        Ok(())
    }

    fn unregister_class(&self) -> Result<(), NativeError> {
        let mut s = locks::lock(&self.state);
        s.check(SurfaceOp::UnregisterClass)?;
        s.class_registered = false;
        s.calls.push(SurfaceCall::UnregisterClass);
        Ok(())
    }

    fn default_handling(&self, raw: RawMessage) {
        locks::lock(&self.state)
            .calls
            .push(SurfaceCall::Default(raw));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::ItemKind;

    fn text(id: u32) -> ItemSpec {
        ItemSpec {
            id,
            kind: ItemKind::Text,
            title: format!("item {id}"),
            disabled: false,
            checked: false,
            bitmap: None,
            submenu: None,
        }
    }

    #[test]
    fn insert_respects_positions() {
        let s = HeadlessSurface::new();
        let root = s.create_root_menu().unwrap();
        s.insert_item(root, 0, &text(3)).unwrap();
        s.insert_item(root, 0, &text(1)).unwrap();
        s.insert_item(root, 1, &text(2)).unwrap();
        assert_eq!(s.ids(root), vec![1, 2, 3]);

        let err = s.insert_item(root, 9, &text(4)).unwrap_err();
        assert!(matches!(err, NativeError::Failed { code: 87, .. }));
    }

    #[test]
    fn delete_frees_submenu_but_remove_does_not() {
        let s = HeadlessSurface::new();
        let root = s.create_root_menu().unwrap();
        s.insert_item(root, 0, &text(1)).unwrap();
        s.insert_item(root, 1, &text(2)).unwrap();
        let sub1 = s.promote_to_submenu(root, 1).unwrap();
        let sub2 = s.promote_to_submenu(root, 2).unwrap();

        s.remove_item(root, 1).unwrap();
        assert!(s.menu_exists(sub1));

        s.delete_item(root, 2).unwrap();
        assert!(!s.menu_exists(sub2));
        assert!(s.ids(root).is_empty());
    }

    #[test]
    fn update_keeps_submenu_and_position() {
        let s = HeadlessSurface::new();
        let root = s.create_root_menu().unwrap();
        s.insert_item(root, 0, &text(1)).unwrap();
        s.insert_item(root, 1, &text(2)).unwrap();
        let sub = s.promote_to_submenu(root, 1).unwrap();

        let mut spec = text(1);
        spec.title = "renamed".into();
        spec.checked = true;
        s.update_item(root, &spec).unwrap();

        let entries = s.entries(root);
        assert_eq!(entries[0].title, "renamed");
        assert!(entries[0].checked);
        assert_eq!(entries[0].submenu, Some(sub));
        assert_eq!(s.ids(root), vec![1, 2]);
    }

    #[test]
    fn failure_injection_fires_once() {
        let s = HeadlessSurface::new();
        let root = s.create_root_menu().unwrap();
        s.fail_next(SurfaceOp::Insert);
        assert!(s.insert_item(root, 0, &text(1)).is_err());
        assert!(s.insert_item(root, 0, &text(1)).is_ok());
    }

    #[test]
    fn queue_delivers_in_order_until_quit() {
        let s = HeadlessSurface::new();
        s.post(NativeMessage::MenuCommand(1));
        s.post(NativeMessage::TaskbarCreated);
        s.post_quit();
        s.post(NativeMessage::MenuCommand(2));

        assert_eq!(s.next_message().unwrap(), Some(NativeMessage::MenuCommand(1)));
        assert_eq!(s.next_message().unwrap(), Some(NativeMessage::TaskbarCreated));
        assert_eq!(s.next_message().unwrap(), None);
    }

    #[test]
    fn next_message_blocks_until_posted() {
        let s = std::sync::Arc::new(HeadlessSurface::new());
        let poster = std::sync::Arc::clone(&s);
        let t = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            poster.post(NativeMessage::EndSession);
        });
        assert_eq!(s.next_message().unwrap(), Some(NativeMessage::EndSession));
        t.join().unwrap();
    }

    #[test]
    fn notify_modify_requires_icon() {
        let s = HeadlessSurface::new();
        let data = NotifyIconData::default();
        assert!(s.notify_icon(NotifyOp::Modify, &data).is_err());
        s.register().unwrap();
        assert!(s.notify_icon(NotifyOp::Modify, &data).is_ok());
        s.notify_icon(NotifyOp::Delete, &data).unwrap();
        assert!(s.notify_data().is_none());
    }
}
