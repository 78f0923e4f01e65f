//! Async session runner.
//!
//! A [`Session`] moves an [`Interpreter`] onto a tokio task that waits on
//! three sources: remote events from the interpreter's inbox, commands from
//! the [`SessionHandle`], and the next delayed-send deadline. Observers are
//! bridged onto a broadcast channel of [`Signal`]s.

use crate::error::CoreError;
use crate::interpreter::Interpreter;
use crate::observer::Observer;
use crate::queue::EventSender;
use parking_lot::RwLock;
use scxmlrt_model::Event;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Interpreter notifications, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    StateEntered(String),
    StateExited(String),
    Log { label: String, message: String },
    Stable { changed: bool },
    Finished,
    InvokeStarted(String),
    InvokeStopped(String),
}

struct SignalObserver {
    tx: broadcast::Sender<Signal>,
}

impl SignalObserver {
    fn emit(&self, signal: Signal) {
        // No subscribers is fine.
        let _ = self.tx.send(signal);
    }
}

impl Observer for SignalObserver {
    fn on_state_entered(&self, state: &str) {
        self.emit(Signal::StateEntered(state.to_string()));
    }

    fn on_state_exited(&self, state: &str) {
        self.emit(Signal::StateExited(state.to_string()));
    }

    fn on_log(&self, label: &str, message: &str) {
        self.emit(Signal::Log {
            label: label.to_string(),
            message: message.to_string(),
        });
    }

    fn on_reached_stable_state(&self, changed: bool) {
        self.emit(Signal::Stable { changed });
    }

    fn on_finished(&self) {
        self.emit(Signal::Finished);
    }

    fn on_invoke_started(&self, invoke_id: &str) {
        self.emit(Signal::InvokeStarted(invoke_id.to_string()));
    }

    fn on_invoke_stopped(&self, invoke_id: &str) {
        self.emit(Signal::InvokeStopped(invoke_id.to_string()));
    }
}

enum Command {
    Cancel {
        send_id: String,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Last published view of the interpreter.
#[derive(Debug, Default, Clone)]
struct Snapshot {
    active: Vec<String>,
    leaves: Vec<String>,
    finished: bool,
}

impl Snapshot {
    fn of(interpreter: &Interpreter) -> Self {
        Self {
            active: interpreter.active_states(false),
            leaves: interpreter.active_states(true),
            finished: interpreter.is_finished(),
        }
    }
}

/// Spawns interpreters onto the tokio runtime.
pub struct Session;

impl Session {
    /// Starts `interpreter` (unless already started) on a new task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(mut interpreter: Interpreter) -> SessionHandle {
        let (signals, _) = broadcast::channel(interpreter.config().signal_capacity);
        interpreter.add_observer(Arc::new(SignalObserver {
            tx: signals.clone(),
        }));

        let snapshot = Arc::new(RwLock::new(Snapshot::of(&interpreter)));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let sender = interpreter.event_sender();
        let session_id = interpreter.session_id().to_string();

        let task = tokio::spawn(run(interpreter, commands_rx, Arc::clone(&snapshot)));

        SessionHandle {
            session_id,
            sender,
            commands: commands_tx,
            signals,
            snapshot,
            task,
        }
    }
}

async fn run(
    mut interpreter: Interpreter,
    mut commands: mpsc::UnboundedReceiver<Command>,
    snapshot: Arc<RwLock<Snapshot>>,
) -> Result<(), CoreError> {
    let session_id = interpreter.session_id().to_string();
    let result = drive(&mut interpreter, &mut commands, &snapshot).await;
    *snapshot.write() = Snapshot::of(&interpreter);
    match &result {
        Ok(()) => info!(session = %session_id, "session ended"),
        Err(e) => error!(session = %session_id, code = e.error_code(), "session failed: {}", e),
    }
    result
}

async fn drive(
    interpreter: &mut Interpreter,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    snapshot: &RwLock<Snapshot>,
) -> Result<(), CoreError> {
    if interpreter.phase() == crate::interpreter::Phase::Idle {
        interpreter.start()?;
    }
    *snapshot.write() = Snapshot::of(interpreter);

    while !interpreter.is_finished() {
        let deadline = interpreter.next_deadline();
        tokio::select! {
            event = interpreter.next_remote_event() => match event {
                Some(event) => interpreter.submit_event(event)?,
                None => break,
            },
            command = commands.recv() => match command {
                Some(Command::Cancel { send_id, reply }) => {
                    let _ = reply.send(interpreter.cancel_delayed_event(&send_id));
                }
                Some(Command::Shutdown) | None => {
                    debug!(session = %interpreter.session_id(), "shutdown requested");
                    interpreter.stop();
                }
            },
            _ = sleep_until(deadline) => {
                interpreter.fire_due_timers(Instant::now())?;
            }
        }
        *snapshot.write() = Snapshot::of(interpreter);
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handle to a spawned session.
pub struct SessionHandle {
    session_id: String,
    sender: EventSender,
    commands: mpsc::UnboundedSender<Command>,
    signals: broadcast::Sender<Signal>,
    snapshot: Arc<RwLock<Snapshot>>,
    task: JoinHandle<Result<(), CoreError>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queues an external event. Returns false if the session is gone.
    pub fn submit_event(&self, event: Event) -> bool {
        self.sender.send(event)
    }

    pub fn submit(&self, name: &str) -> bool {
        self.submit_event(Event::new(name))
    }

    /// Thread-safe event sender for this session.
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Cancels a pending delayed send. Returns false if nothing was pending
    /// or the session is gone.
    pub async fn cancel_delayed_event(&self, send_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::Cancel {
            send_id: send_id.to_string(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Active states after the last processed step.
    pub fn active_states(&self, compress: bool) -> Vec<String> {
        let snapshot = self.snapshot.read();
        if compress {
            snapshot.leaves.clone()
        } else {
            snapshot.active.clone()
        }
    }

    pub fn is_active(&self, state: &str) -> bool {
        self.snapshot.read().active.iter().any(|s| s == state)
    }

    pub fn is_finished(&self) -> bool {
        self.snapshot.read().finished
    }

    /// Receives signals emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.signals.subscribe()
    }

    /// Stops the session without running exit handlers.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Waits for the session task to end.
    pub async fn join(self) -> Result<(), CoreError> {
        self.task
            .await
            .map_err(|e| CoreError::Session(e.to_string()))?
    }
}
