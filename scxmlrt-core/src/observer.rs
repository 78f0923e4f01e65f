//! Outbound notifications.
//!
//! Observers are fire-and-forget sinks. They run synchronously on the
//! interpreter's thread, so they must not call back into the interpreter.

use parking_lot::Mutex;

/// Receives state activity, log output and lifecycle signals.
pub trait Observer: Send + Sync {
    fn on_state_entered(&self, _state: &str) {}

    fn on_state_exited(&self, _state: &str) {}

    fn on_log(&self, _label: &str, _message: &str) {}

    /// Emitted when no more events are queued; `changed` tells whether any
    /// transition fired since the previous notification.
    fn on_reached_stable_state(&self, _changed: bool) {}

    fn on_finished(&self) {}

    fn on_invoke_started(&self, _invoke_id: &str) {}

    fn on_invoke_stopped(&self, _invoke_id: &str) {}
}

/// A recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Entered(String),
    Exited(String),
    Log(String, String),
    Stable(bool),
    Finished,
    InvokeStarted(String),
    InvokeStopped(String),
}

/// Observer that keeps every notification in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    /// Drains the recorded notifications.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notifications.lock())
    }

    /// Log messages only, as `label: message`.
    pub fn logs(&self) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Log(label, msg) => Some(format!("{}: {}", label, msg)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, n: Notification) {
        self.notifications.lock().push(n);
    }
}

impl Observer for RecordingObserver {
    fn on_state_entered(&self, state: &str) {
        self.push(Notification::Entered(state.to_string()));
    }

    fn on_state_exited(&self, state: &str) {
        self.push(Notification::Exited(state.to_string()));
    }

    fn on_log(&self, label: &str, message: &str) {
        self.push(Notification::Log(label.to_string(), message.to_string()));
    }

    fn on_reached_stable_state(&self, changed: bool) {
        self.push(Notification::Stable(changed));
    }

    fn on_finished(&self) {
        self.push(Notification::Finished);
    }

    fn on_invoke_started(&self, invoke_id: &str) {
        self.push(Notification::InvokeStarted(invoke_id.to_string()));
    }

    fn on_invoke_stopped(&self, invoke_id: &str) {
        self.push(Notification::InvokeStopped(invoke_id.to_string()));
    }
}
