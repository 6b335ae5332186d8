//! Notification-area icon with a popup menu that can be edited from any
//! thread.
//!
//! The crate keeps the authoritative menu state in process and mirrors
//! it into a platform menu through the [`NativeSurface`] trait:
//! - [`Tray`] and [`MenuItem`] are the public handles
//! - [`TraySession`] owns the registry, the visible-index tables and the
//!   icon cache for one tray
//! - [`Dispatcher`] pumps native messages and fires callbacks
//! - [`HeadlessSurface`] is an in-memory surface for tests and demos
//!
//! # Threading
//! Menu edits may come from any thread. Click callbacks run on a
//! [`CallbackExecutor`], never on the pump thread. The exit callback runs
//! exactly once, whichever of `quit`, window close or end of session gets
//! there first.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod headless;
pub mod icons;
pub mod ids;
mod locks;
pub mod native;
pub mod registry;
pub mod session;
pub mod sync;
mod tray;
pub mod visible;

pub use config::TrayConfig;
pub use dispatcher::{Dispatcher, NO_COMMAND};
pub use error::TrayError;
pub use executor::CallbackExecutor;
pub use headless::{HeadlessSurface, SurfaceCall, SurfaceOp};
pub use ids::ROOT_ID;
pub use native::{
    IconSource, ItemKind, ItemSpec, MenuHandle, MouseButton, NativeError, NativeMessage,
    NativeSurface, Point,
};
pub use session::{LoopState, TraySession};
pub use tray::{MenuItem, Tray};
