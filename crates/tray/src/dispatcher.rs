//! The message pump.
//!
//! One thread owns the pump for the lifetime of the tray. It blocks only
//! while waiting for the next native message and handles messages
//! strictly in delivery order. Click handlers are handed to the
//! executor, so slow user code never stalls the pump; tray-opened
//! observers do run inline, right before the popup is shown.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::error::TrayError;
use crate::native::{MouseButton, NativeMessage};
use crate::session::{LoopState, TraySession};

/// Command ID the platform reports when no menu entry was chosen.
pub const NO_COMMAND: u32 = u32::MAX;

/// Drives a [`TraySession`] from its native message queue.
pub struct Dispatcher {
    session: Arc<TraySession>,
}

impl Dispatcher {
    pub fn new(session: Arc<TraySession>) -> Self {
        Self { session }
    }

    /// Pumps messages until the quit message arrives.
    ///
    /// Returns an error only if the queue itself fails, which ends the
    /// session.
    pub fn run(&self) -> Result<(), TrayError> {
        self.session.ensure_ready()?;
        info!("message loop started");

        loop {
            match self.session.surface().next_message() {
                Ok(Some(msg)) => self.dispatch(msg),
                Ok(None) => {
                    self.session.set_state(LoopState::Terminated);
                    info!("message loop finished");
                    return Ok(());
                }
                Err(e) => {
                    error!("message loop failure: {e}");
                    self.session.set_state(LoopState::Terminated);
                    return Err(TrayError::MessagePump(e));
                }
            }
        }
    }

    /// Handles a single message.
    pub fn dispatch(&self, msg: NativeMessage) {
        trace!(?msg, "dispatching native message");
        match msg {
            NativeMessage::MenuCommand(NO_COMMAND) => {}
            NativeMessage::MenuCommand(id) => self.activate(id),
            NativeMessage::TrayClick(button) => self.open_request(button),
            NativeMessage::Close => self.close(),
            NativeMessage::Destroy => {
                self.end_session();
                self.session.surface().post_quit();
            }
            NativeMessage::EndSession => {
                self.end_session();
                self.session.set_state(LoopState::Terminated);
            }
            NativeMessage::TaskbarCreated => self.session.readd_notify_icon(),
            NativeMessage::Other(raw) => self.session.surface().default_handling(raw),
        }
    }

    fn activate(&self, id: u32) {
        match self.session.registry.callback(id) {
            Ok(Some(on_click)) => {
                debug!(id, "menu item clicked");
                self.session.executor.spawn(move || on_click());
            }
            Ok(None) => trace!(id, "menu item clicked, no callback"),
            Err(e) => warn!("{e}"),
        }
    }

    fn open_request(&self, button: MouseButton) {
        let accepted = match button {
            MouseButton::Left => self.session.opens_on_left_click(),
            MouseButton::Right => self.session.opens_on_right_click(),
            MouseButton::Other => false,
        };
        if !accepted {
            trace!(?button, "tray click ignored");
            return;
        }

        for observer in self.session.opened_observers() {
            observer();
        }
        if let Err(e) = self.session.show_menu() {
            warn!("failed to show menu: {e}");
        }
    }

    fn close(&self) {
        self.session.set_state(LoopState::Closing);
        if let Err(e) = self.session.surface().destroy_window() {
            warn!("failed to destroy window: {e}");
        }
        if let Err(e) = self.session.surface().unregister_class() {
            warn!("failed to unregister window class: {e}");
        }
    }

    fn end_session(&self) {
        self.session.set_state(LoopState::Closing);
        self.session.delete_notify_icon();
        self.session.fire_exit();
    }
}
