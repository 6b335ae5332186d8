//! Contract between the tray core and the platform menu subsystem.
//!
//! The core never talks to the OS directly. Everything it needs (menus,
//! the notification icon, icon loading, the message queue) goes through
//! [`NativeSurface`]. Native menus address items by position on insert
//! and by command ID everywhere else; they have no notion of the
//! registry's tree.

use std::fmt;
use std::path::Path;

/// Opaque handle to a native popup menu or submenu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MenuHandle(pub u64);

/// Opaque handle to a loaded native icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IconHandle(pub u64);

/// Opaque handle to a small bitmap usable as a menu item image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitmapHandle(pub u64);

/// Screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Type flag of a native menu entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Text,
    Separator,
}

/// Display attributes sent with an insert or in-place update.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSpec {
    pub id: u32,
    pub kind: ItemKind,
    pub title: String,
    pub disabled: bool,
    pub checked: bool,
    pub bitmap: Option<BitmapHandle>,
    /// Attached when an item that already owns a submenu is (re)inserted.
    pub submenu: Option<MenuHandle>,
}

impl ItemSpec {
    pub fn separator(id: u32) -> Self {
        Self {
            id,
            kind: ItemKind::Separator,
            title: String::new(),
            disabled: false,
            checked: false,
            bitmap: None,
            submenu: None,
        }
    }
}

/// Where an icon comes from.
#[derive(Debug, Clone, Copy)]
pub enum IconSource<'a> {
    Path(&'a Path),
    /// Raw `.ico` content.
    Bytes(&'a [u8]),
}

/// Operation applied to the notification-area icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOp {
    Add,
    Modify,
    Delete,
}

/// State of the single notification-area icon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyIconData {
    pub icon: Option<IconHandle>,
    pub tooltip: Option<String>,
}

/// Mouse button reported with a tray-icon click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Other,
}

/// Message with no dedicated meaning to the tray, handed back for
/// default processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage {
    pub message: u32,
    pub wparam: usize,
    pub lparam: isize,
}

/// A message retrieved from the native queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeMessage {
    /// A menu entry was activated. `u32::MAX` means "no entry".
    MenuCommand(u32),
    /// The user released a mouse button over the tray icon.
    TrayClick(MouseButton),
    /// Close request for the hidden owner window.
    Close,
    /// The owner window was destroyed.
    Destroy,
    /// The user session is ending.
    EndSession,
    /// The shell restarted and dropped every notification icon.
    TaskbarCreated,
    Other(RawMessage),
}

/// Errors reported by a [`NativeSurface`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NativeError {
    #[error("native call failed (code {code}): {message}")]
    Failed { code: i32, message: String },

    #[error("no native menu entry with ID {0}")]
    NotFound(u32),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl NativeError {
    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self::Failed {
            code,
            message: message.into(),
        }
    }
}

/// The platform menu subsystem driven by the tray core.
///
/// Implementations must be callable from any thread; the core serializes
/// structural menu commands itself. Only [`next_message`](Self::next_message)
/// blocks.
pub trait NativeSurface: Send + Sync + 'static {
    /// Registers the window class, creates the hidden owner window and
    /// adds an empty notification icon.
    fn register(&self) -> Result<(), NativeError>;

    /// Creates the root popup menu.
    fn create_root_menu(&self) -> Result<MenuHandle, NativeError>;

    fn destroy_menu(&self, menu: MenuHandle) -> Result<(), NativeError>;

    /// Creates a submenu and attaches it to entry `item` of `container`.
    fn promote_to_submenu(
        &self,
        container: MenuHandle,
        item: u32,
    ) -> Result<MenuHandle, NativeError>;

    /// Inserts an entry at a 0-based position.
    fn insert_item(
        &self,
        menu: MenuHandle,
        position: usize,
        spec: &ItemSpec,
    ) -> Result<(), NativeError>;

    /// Updates an existing entry in place, keeping its position.
    fn update_item(&self, menu: MenuHandle, spec: &ItemSpec) -> Result<(), NativeError>;

    /// Deletes an entry and frees its submenu, if any.
    fn delete_item(&self, menu: MenuHandle, id: u32) -> Result<(), NativeError>;

    /// Detaches an entry without freeing its submenu.
    fn remove_item(&self, menu: MenuHandle, id: u32) -> Result<(), NativeError>;

    fn cursor_position(&self) -> Result<Point, NativeError>;

    /// Brings the owner window forward and tracks the popup at `at`.
    fn show_popup(&self, menu: MenuHandle, at: Point) -> Result<(), NativeError>;

    fn notify_icon(&self, op: NotifyOp, data: &NotifyIconData) -> Result<(), NativeError>;

    fn load_icon(&self, source: IconSource<'_>) -> Result<IconHandle, NativeError>;

    /// Renders an icon into a bitmap sized to the small-icon metrics.
    fn icon_to_bitmap(&self, icon: IconHandle) -> Result<BitmapHandle, NativeError>;

    /// Blocks until the next message. `Ok(None)` means the quit message
    /// was retrieved.
    fn next_message(&self) -> Result<Option<NativeMessage>, NativeError>;

    /// Posts a close request to the owner window.
    fn post_close(&self) -> Result<(), NativeError>;

    /// Posts the quit message that ends [`next_message`](Self::next_message).
    fn post_quit(&self);

    fn destroy_window(&self) -> Result<(), NativeError>;

    fn unregister_class(&self) -> Result<(), NativeError>;

    fn default_handling(&self, raw: RawMessage);
}

impl fmt::Display for MenuHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "menu#{}", self.0)
    }
}
