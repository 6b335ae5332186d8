//! Error types for the tray core.

use crate::native::NativeError;

/// Errors produced by tray and menu operations.
#[derive(Debug, thiserror::Error)]
pub enum TrayError {
    /// The session has not finished initializing (or was torn down).
    #[error("tray not ready yet")]
    NotReady,

    #[error("tray already initialized")]
    AlreadyInitialized,

    /// The native surface rejected a command.
    #[error("native {op} failed: {source}")]
    Native {
        op: &'static str,
        #[source]
        source: NativeError,
    },

    #[error("no menu item with ID {0}")]
    UnknownItem(u32),

    /// Every menu item ID has been handed out.
    #[error("menu item IDs exhausted")]
    IdsExhausted,

    /// The message pump could not retrieve the next message.
    #[error("message loop failure: {0}")]
    MessagePump(#[source] NativeError),
}

impl TrayError {
    /// Wraps a surface error with the name of the failed operation.
    pub(crate) fn native(op: &'static str) -> impl FnOnce(NativeError) -> Self {
        move |source| Self::Native { op, source }
    }

    /// Returns `true` for errors that only mean "called too early".
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady)
    }
}
