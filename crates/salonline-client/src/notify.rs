//! Unread counting and the audible cue.

use std::io::Write;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("Audible cue failed: {0}")]
pub struct ChimeError(pub String);

/// Something that can play a short "new message" sound.
pub trait Chime: Send + Sync {
    fn play(&self) -> Result<(), ChimeError>;
}

/// Rings the terminal bell on stderr.
pub struct TerminalBell;

impl Chime for TerminalBell {
    fn play(&self) -> Result<(), ChimeError> {
        let mut stderr = std::io::stderr();
        stderr
            .write_all(b"\x07")
            .and_then(|_| stderr.flush())
            .map_err(|e| ChimeError(e.to_string()))
    }
}

pub struct Silent;

impl Chime for Silent {
    fn play(&self) -> Result<(), ChimeError> {
        Ok(())
    }
}

/// Result of reporting new operator messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// The view is open; the messages count as seen.
    Suppressed,
    Notified { unread: u32 },
}

pub struct NotificationController {
    unread: u32,
    view_open: bool,
    chime: Arc<dyn Chime>,
}

impl NotificationController {
    pub fn new(chime: Arc<dyn Chime>) -> Self {
        Self {
            unread: 0,
            view_open: false,
            chime,
        }
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }

    pub fn is_view_open(&self) -> bool {
        self.view_open
    }

    /// Report `count` new operator messages.
    pub fn on_new_operator_messages(&mut self, count: usize) -> Notification {
        if count == 0 || self.view_open {
            return Notification::Suppressed;
        }

        // Best effort; never blocks rendering.
        if let Err(e) = self.chime.play() {
            warn!(error = %e, "Ignoring audible cue failure");
        }

        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.unread = self.unread.saturating_add(count);
        debug!(count, unread = self.unread, "New operator messages while closed");
        Notification::Notified {
            unread: self.unread,
        }
    }

    /// The view opened. Returns how many unread messages were cleared.
    pub fn on_view_opened(&mut self) -> u32 {
        self.view_open = true;
        std::mem::take(&mut self.unread)
    }

    pub fn on_view_closed(&mut self) {
        self.view_open = false;
    }

    /// Drop the unread count without changing view state.
    pub fn clear(&mut self) {
        self.unread = 0;
    }
}
