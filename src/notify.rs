//! Outbound, fire-and-forget notifications to the panel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{Result, TrackerError};
use crate::protocol::Notification;

/// One-way channel with no delivery guarantee. Callers log and drop errors.
pub trait Notifier {
    fn send(&self, notification: &Notification) -> Result<()>;
}

/// Emits each notification as a JSON `debug` event; used when no panel is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for TracingNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        let payload = serde_json::to_string(notification)?;
        tracing::debug!(target: "turntrack::notify", %payload, "notification");
        Ok(())
    }
}

/// Keeps every notification it is handed. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    unreachable: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// While set, `send` fails without recording, like a closed panel.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TrackerError::transport("no receiving end"));
        }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}
