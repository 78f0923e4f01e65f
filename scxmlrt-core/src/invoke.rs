//! Invoked services.
//!
//! An `<invoke>` starts a service when its state is still active at the end
//! of a macrostep, and cancels it when the state is exited. SCXML children
//! run as nested [`Interpreter`]s that the parent pumps after each of its
//! own macrosteps; other service types come from a [`ServiceRegistry`].

use crate::error::CoreError;
use crate::interpreter::Interpreter;
use crate::queue::EventSender;
use dashmap::DashMap;
use scxmlrt_model::{Event, StateId};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A running invoked service, as seen by the parent.
pub trait InvokableService: Send {
    fn id(&self) -> &str;

    /// Hands an event to the service. Returns false if it can no longer
    /// accept events.
    fn post_event(&mut self, event: Event) -> bool;

    /// Stops the service. It must not report `done.invoke` afterwards.
    fn cancel(&mut self);

    /// Processes whatever the service has queued.
    fn pump(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn fire_due_timers(&mut self, _now: Instant) -> Result<(), CoreError> {
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }
}

/// What a factory gets to start a service.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub invoke_id: String,
    pub src: Option<String>,
    /// Params and namelist values as an object, or null.
    pub data: Value,
    /// Events for the parent go here, tagged with `invoke_id`.
    pub parent: EventSender,
    pub parent_session_id: String,
}

/// Creates services of one invoke type.
pub trait ServiceFactory: Send + Sync {
    fn create(&self, request: InvokeRequest) -> Result<Box<dyn InvokableService>, String>;
}

/// Service factories by invoke type.
#[derive(Default)]
pub struct ServiceRegistry {
    factories: DashMap<String, Arc<dyn ServiceFactory>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service_type: impl Into<String>, factory: Arc<dyn ServiceFactory>) {
        self.factories.insert(service_type.into(), factory);
    }

    pub fn get(&self, service_type: &str) -> Option<Arc<dyn ServiceFactory>> {
        self.factories.get(service_type).map(|f| Arc::clone(f.value()))
    }

    pub fn contains(&self, service_type: &str) -> bool {
        self.factories.contains_key(service_type)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        types.sort();
        f.debug_struct("ServiceRegistry").field("types", &types).finish()
    }
}

/// How a child interpreter reaches its parent.
#[derive(Debug, Clone)]
pub struct ParentLink {
    pub sender: EventSender,
    /// The invoke id, also the child's session id.
    pub invoke_id: String,
    pub parent_session_id: String,
}

/// A child SCXML session.
pub struct ScxmlService {
    id: String,
    interpreter: Interpreter,
}

impl ScxmlService {
    pub fn new(id: impl Into<String>, interpreter: Interpreter) -> Self {
        Self {
            id: id.into(),
            interpreter,
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }
}

impl InvokableService for ScxmlService {
    fn id(&self) -> &str {
        &self.id
    }

    fn post_event(&mut self, event: Event) -> bool {
        // A finished child silently drops late events.
        self.interpreter.event_sender().send(event)
    }

    fn cancel(&mut self) {
        self.interpreter.stop();
    }

    fn pump(&mut self) -> Result<(), CoreError> {
        if self.interpreter.is_finished() {
            return Ok(());
        }
        self.interpreter.process_pending()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.interpreter.next_deadline()
    }

    fn fire_due_timers(&mut self, now: Instant) -> Result<(), CoreError> {
        if self.interpreter.is_finished() {
            return Ok(());
        }
        self.interpreter.fire_due_timers(now)
    }

    fn is_finished(&self) -> bool {
        self.interpreter.is_finished()
    }
}

/// One started invoke.
pub struct RunningInvoke {
    pub id: String,
    /// State owning the `<invoke>`.
    pub state: StateId,
    /// Position of the `<invoke>` within its state.
    pub index: usize,
    pub autoforward: bool,
    pub service: Box<dyn InvokableService>,
}

impl std::fmt::Debug for RunningInvoke {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningInvoke")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("index", &self.index)
            .field("autoforward", &self.autoforward)
            .finish()
    }
}

/// Bookkeeping for pending and running invokes of one interpreter.
#[derive(Debug, Default)]
pub struct InvokeManager {
    to_start: BTreeSet<StateId>,
    to_cancel: BTreeSet<StateId>,
    running: Vec<RunningInvoke>,
}

impl InvokeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a freshly entered state's invokes for starting.
    pub(crate) fn schedule_start(&mut self, state: StateId) {
        self.to_start.insert(state);
    }

    /// Forgets a pending start; returns true if there was one.
    pub(crate) fn unschedule_start(&mut self, state: StateId) -> bool {
        self.to_start.remove(&state)
    }

    /// Pending starts in document order.
    pub(crate) fn take_pending_starts(&mut self) -> Vec<StateId> {
        std::mem::take(&mut self.to_start).into_iter().collect()
    }

    /// Marks the running invokes of an exited state for cancellation.
    pub(crate) fn schedule_cancel(&mut self, state: StateId) {
        if self.running.iter().any(|r| r.state == state) {
            self.to_cancel.insert(state);
        }
    }

    /// Removes and returns every invoke marked for cancellation.
    pub(crate) fn take_cancellations(&mut self) -> Vec<RunningInvoke> {
        if self.to_cancel.is_empty() {
            return Vec::new();
        }
        let states = std::mem::take(&mut self.to_cancel);
        let (cancelled, kept) = std::mem::take(&mut self.running)
            .into_iter()
            .partition(|r| states.contains(&r.state));
        self.running = kept;
        cancelled
    }

    /// Removes and returns every invoke, pending cancellations included.
    pub(crate) fn take_all(&mut self) -> Vec<RunningInvoke> {
        self.to_start.clear();
        self.to_cancel.clear();
        std::mem::take(&mut self.running)
    }

    pub(crate) fn add(&mut self, invoke: RunningInvoke) {
        debug!(invoke_id = %invoke.id, "invoke running");
        self.running.push(invoke);
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.running.iter().any(|r| r.id == id)
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.running.iter().map(|r| r.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Delivers an event to one invoke. Returns false if no such invoke runs
    /// or it refused the event.
    pub(crate) fn post(&mut self, id: &str, event: Event) -> bool {
        match self.running.iter_mut().find(|r| r.id == id) {
            Some(invoke) => invoke.service.post_event(event),
            None => false,
        }
    }

    /// `(id, state, index, autoforward)` of the running invokes, in start
    /// order.
    pub(crate) fn entries(&self) -> Vec<(String, StateId, usize, bool)> {
        self.running
            .iter()
            .map(|r| (r.id.clone(), r.state, r.index, r.autoforward))
            .collect()
    }

    /// Lets every service process its queued events. A failing child is
    /// already stopped by its own interpreter; the parent keeps running.
    pub(crate) fn pump_all(&mut self) {
        for invoke in &mut self.running {
            if let Err(e) = invoke.service.pump() {
                warn!(invoke_id = %invoke.id, code = e.error_code(), "invoked service failed: {}", e);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.running
            .iter()
            .filter_map(|r| r.service.next_deadline())
            .min()
    }

    pub(crate) fn fire_due_timers(&mut self, now: Instant) {
        for invoke in &mut self.running {
            if let Err(e) = invoke.service.fire_due_timers(now) {
                warn!(invoke_id = %invoke.id, code = e.error_code(), "invoked service failed: {}", e);
            }
        }
    }
}
