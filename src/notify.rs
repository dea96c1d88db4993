//! Desktop notifications.
//!
//! Notifications are a fire-and-forget side effect: callers push onto a queue
//! drained by a dedicated thread, and backend failures are logged and dropped.

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Trait for notification backends, allowing for mocking in tests.
pub trait NotificationBackend: Send + 'static {
    /// Show a notification with the given title and message.
    fn send(&self, title: &str, message: &str) -> Result<(), String>;
}

/// Desktop notification backend using notify-rust.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

impl NotificationBackend for DesktopNotifier {
    fn send(&self, title: &str, message: &str) -> Result<(), String> {
        notify_rust::Notification::new()
            .appname("App Blocker")
            .summary(title)
            .body(message)
            .timeout(notify_rust::Timeout::Milliseconds(5000))
            .show()
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug)]
struct Note {
    title: String,
    message: String,
}

/// Handle for queueing notifications. Cloning shares the same delivery thread.
#[derive(Debug, Clone)]
pub struct NotifySink {
    tx: Option<mpsc::UnboundedSender<Note>>,
}

impl NotifySink {
    /// Start a delivery thread for `backend`. Falls back to a disabled sink if the thread cannot start.
    pub fn spawn<B: NotificationBackend>(backend: B) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Note>();
        let spawned = std::thread::Builder::new()
            .name("notify".into())
            .spawn(move || {
                while let Some(note) = rx.blocking_recv() {
                    if let Err(e) = backend.send(&note.title, &note.message) {
                        warn!("Failed to send notification: {}", e);
                    }
                }
            });
        match spawned {
            Ok(_) => Self { tx: Some(tx) },
            Err(e) => {
                warn!("Notifications unavailable: {}", e);
                Self::disabled()
            }
        }
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, title: &str, message: &str) {
        let Some(tx) = &self.tx else { return };
        let note = Note {
            title: title.to_string(),
            message: message.to_string(),
        };
        if tx.send(note).is_err() {
            debug!("notification thread gone; dropped {:?}", message);
        }
    }
}
