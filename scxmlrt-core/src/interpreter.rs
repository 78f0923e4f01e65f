//! The statechart interpreter.
//!
//! An [`Interpreter`] owns one session: the active configuration, the data
//! model, the event queues, delayed sends and invoked children. It is driven
//! synchronously. Every call that can make progress ([`Interpreter::start`],
//! [`Interpreter::submit_event`], [`Interpreter::fire_due_timers`], ...)
//! runs macrosteps until the external queue is empty and then returns. Use
//! [`crate::Session`] for an async driver with real timers.

use crate::config::InterpreterConfig;
use crate::configuration::Configuration;
use crate::datamodel::{self, DataModel, Scope, SystemVariables};
use crate::error::{CoreError, DataModelError};
use crate::executor::{self, ExecutionContext, SCXML_EVENT_PROCESSOR};
use crate::filter::EventFilter;
use crate::ids::{IdGenerator, SequentialIds};
use crate::invoke::{
    InvokableService, InvokeManager, InvokeRequest, ParentLink, RunningInvoke, ScxmlService,
    ServiceRegistry,
};
use crate::observer::Observer;
use crate::queue::{EventQueues, EventSender};
use crate::selector::{self, EntrySet};
use crate::timer::DelayedEvents;
use scxmlrt_model::{
    BindingMode, ContainerId, Document, Event, InvokeInfo, InvokeSource, StateId, StateKind,
    TransitionId, ROOT,
};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

/// Where the interpreter is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built, not started.
    Idle,
    /// Taking eventless transitions or handling internal events.
    RunningMicrostep,
    /// Stable; waiting for an external event.
    StableWaitingForEvent,
    /// Handling an external event.
    ProcessingEvent,
    /// Reached a top-level final state, was stopped, or hit a fatal error.
    Finished,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::RunningMicrostep => "running_microstep",
            Phase::StableWaitingForEvent => "stable",
            Phase::ProcessingEvent => "processing_event",
            Phase::Finished => "finished",
        }
    }
}

/// Builder for [`Interpreter`].
pub struct InterpreterBuilder {
    document: Arc<Document>,
    config: InterpreterConfig,
    data_model: Option<Box<dyn DataModel>>,
    ids: Option<Arc<dyn IdGenerator>>,
    services: Option<Arc<ServiceRegistry>>,
    observers: Vec<Arc<dyn Observer>>,
    session_id: Option<String>,
    parent: Option<ParentLink>,
    event_filter: Option<Arc<dyn EventFilter>>,
}

impl InterpreterBuilder {
    pub fn new(document: impl Into<Arc<Document>>) -> Self {
        Self {
            document: document.into(),
            config: InterpreterConfig::default(),
            data_model: None,
            ids: None,
            services: None,
            observers: Vec::new(),
            session_id: None,
            parent: None,
            event_filter: None,
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the data model the document asks for.
    pub fn with_data_model(mut self, data_model: Box<dyn DataModel>) -> Self {
        self.data_model = Some(data_model);
        self
    }

    /// Source of send and invoke ids.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_services(mut self, services: Arc<ServiceRegistry>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Consulted for every external event before it is dispatched.
    pub fn with_event_filter(mut self, filter: Arc<dyn EventFilter>) -> Self {
        self.event_filter = Some(filter);
        self
    }

    pub(crate) fn with_parent(mut self, parent: ParentLink) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn build(self) -> Result<Interpreter, CoreError> {
        self.config.validate()?;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(SequentialIds::new()) as Arc<dyn IdGenerator>);
        let session_id = self
            .session_id
            .unwrap_or_else(|| format!("{}{}", self.config.session_prefix, ids.next_id()));
        let binding = self.config.binding.unwrap_or(self.document.binding);
        let data_model = self
            .data_model
            .unwrap_or_else(|| datamodel::for_document(&self.document));

        let ctx = ExecutionContext {
            session_id,
            name: self.document.name.clone(),
            config: self.config,
            ids,
            services: self.services.unwrap_or_default(),
            observers: self.observers,
            parent: self.parent,
            queues: EventQueues::new(),
            timers: DelayedEvents::new(),
            invokes: InvokeManager::new(),
            done_state: None,
            done_data: None,
        };

        Ok(Interpreter {
            document: self.document,
            data_model,
            configuration: Configuration::new(),
            ctx,
            binding,
            event_filter: self.event_filter,
            phase: Phase::Idle,
            running: false,
            data_ready: false,
            initial_values: Map::new(),
            initialized: HashSet::new(),
            changed: false,
        })
    }
}

/// One running statechart session.
pub struct Interpreter {
    document: Arc<Document>,
    data_model: Box<dyn DataModel>,
    configuration: Configuration,
    ctx: ExecutionContext,
    binding: BindingMode,
    event_filter: Option<Arc<dyn EventFilter>>,
    phase: Phase,
    running: bool,
    data_ready: bool,
    initial_values: Map<String, Value>,
    /// States whose data block already ran.
    initialized: HashSet<StateId>,
    /// Whether the configuration changed since the last stable state.
    changed: bool,
}

impl Interpreter {
    /// Creates an interpreter with default settings.
    pub fn new(document: impl Into<Arc<Document>>) -> Result<Self, CoreError> {
        InterpreterBuilder::new(document).build()
    }

    pub fn builder(document: impl Into<Arc<Document>>) -> InterpreterBuilder {
        InterpreterBuilder::new(document)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Sets up the data model with embedder-supplied values. Names given
    /// here keep their values over the document's own initialization.
    pub fn init(&mut self, values: Map<String, Value>) -> Result<(), CoreError> {
        if self.phase != Phase::Idle {
            return Err(CoreError::AlreadyStarted);
        }
        self.initial_values = values;
        self.setup_data_model()
    }

    /// Enters the initial configuration and runs until stable.
    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.phase != Phase::Idle {
            return Err(CoreError::AlreadyStarted);
        }
        info!(
            session = %self.ctx.session_id,
            name = %self.ctx.name,
            invoked = self.ctx.parent.is_some(),
            "starting interpreter"
        );
        self.phase = Phase::RunningMicrostep;
        self.running = true;
        let result = self.enter_initial_configuration();
        self.settle(result)
    }

    /// Stops the session without running exit handlers. An invoked child
    /// stopped this way does not report `done.invoke`.
    pub fn stop(&mut self) {
        if self.phase != Phase::Finished {
            info!(session = %self.ctx.session_id, "stopping interpreter");
            self.halt();
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Queues an external event and processes it. Events submitted before
    /// `start` wait for it; events after the session finished are dropped.
    pub fn submit_event(&mut self, event: Event) -> Result<(), CoreError> {
        match self.phase {
            Phase::Finished => {
                debug!(session = %self.ctx.session_id, event = %event.name, "dropping event for finished session");
                Ok(())
            }
            Phase::Idle => {
                self.ctx.queues.push_external(event);
                Ok(())
            }
            _ => {
                self.ctx.queues.push_external(event);
                self.resume()
            }
        }
    }

    pub fn submit(&mut self, name: &str) -> Result<(), CoreError> {
        self.submit_event(Event::new(name))
    }

    pub fn submit_with_data(&mut self, name: &str, data: Value) -> Result<(), CoreError> {
        self.submit_event(Event::new(name).with_data(data))
    }

    /// Raises `error.<category>` on the internal queue.
    pub fn submit_error(
        &mut self,
        category: &str,
        message: impl Into<String>,
        send_id: Option<String>,
    ) -> Result<(), CoreError> {
        match self.phase {
            Phase::Finished => Ok(()),
            Phase::Idle => {
                self.ctx
                    .queues
                    .push_internal(Event::error(category, message, send_id));
                Ok(())
            }
            _ => {
                self.ctx
                    .queues
                    .push_internal(Event::error(category, message, send_id));
                self.resume()
            }
        }
    }

    /// Processes events that arrived through the [`EventSender`].
    pub fn process_pending(&mut self) -> Result<(), CoreError> {
        if matches!(self.phase, Phase::Idle | Phase::Finished) {
            return Ok(());
        }
        self.ctx.queues.drain_inbox();
        if !self.ctx.queues.has_external() && !self.ctx.queues.has_internal() {
            return Ok(());
        }
        self.resume()
    }

    /// Waits for the next event submitted through the [`EventSender`].
    pub async fn next_remote_event(&mut self) -> Option<Event> {
        self.ctx.queues.recv_inbox().await
    }

    /// Thread-safe handle that queues external events for this session.
    pub fn event_sender(&self) -> EventSender {
        self.ctx.queues.sender()
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Delivers every delayed send due at `now` (including those of invoked
    /// children) and processes the results.
    pub fn fire_due_timers(&mut self, now: Instant) -> Result<(), CoreError> {
        if matches!(self.phase, Phase::Idle | Phase::Finished) {
            return Ok(());
        }
        self.ctx.fire_due(now);
        self.ctx.invokes.fire_due_timers(now);
        self.resume()
    }

    /// Earliest due time among this session's and its children's delayed
    /// sends.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.ctx.timers.next_deadline(), self.ctx.invokes.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Cancels a pending delayed send. Returns false if nothing was pending.
    pub fn cancel_delayed_event(&mut self, send_id: &str) -> bool {
        self.ctx.timers.cancel(send_id)
    }

    pub fn pending_delayed_events(&self) -> usize {
        self.ctx.timers.len()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn is_active(&self, name: &str) -> bool {
        self.document
            .state_by_name(name)
            .map(|s| self.configuration.contains(s))
            .unwrap_or(false)
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.document.state_by_name(name).is_some()
    }

    /// Active state names, sorted. With `compress`, only states without an
    /// active child are listed.
    pub fn active_states(&self, compress: bool) -> Vec<String> {
        self.configuration.names(&self.document, compress)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn session_id(&self) -> &str {
        &self.ctx.session_id
    }

    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    pub fn is_invoked(&self) -> bool {
        self.ctx.parent.is_some()
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.ctx.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn data_model(&self) -> &dyn DataModel {
        self.data_model.as_ref()
    }

    /// Ids of the currently running invokes, in start order.
    pub fn running_invokes(&self) -> Vec<String> {
        self.ctx.invokes.running_ids()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn Observer>) {
        self.ctx.observers.push(observer);
    }

    // =========================================================================
    // Algorithm
    // =========================================================================

    fn setup_data_model(&mut self) -> Result<(), CoreError> {
        let system = SystemVariables {
            session_id: self.ctx.session_id.clone(),
            name: self.ctx.name.clone(),
        };
        let result = self.data_model.setup(&system, &self.initial_values);
        self.data_ready = true;
        executor::recover(&mut self.ctx, result)?;
        Ok(())
    }

    fn enter_initial_configuration(&mut self) -> Result<(), CoreError> {
        if !self.data_ready {
            self.setup_data_model()?;
        }
        if self.binding == BindingMode::Early {
            let doc = Arc::clone(&self.document);
            for (index, node) in doc.states.iter().enumerate() {
                if let Some(data) = node.data {
                    self.initialized.insert(StateId(index as u32));
                    self.run_container(data)?;
                }
            }
        }
        let entry = selector::initial_entry_set(&self.document, &self.configuration);
        self.enter_states(entry)?;
        self.changed = true;
        self.run_macrosteps()
    }

    /// Runs macrosteps and reports fatal errors by stopping the session.
    fn resume(&mut self) -> Result<(), CoreError> {
        let result = self.run_macrosteps();
        self.settle(result)
    }

    fn settle(&mut self, result: Result<(), CoreError>) -> Result<(), CoreError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(session = %self.ctx.session_id, code = e.error_code(), "{}", e);
                self.halt();
            }
        }
        result
    }

    fn run_macrosteps(&mut self) -> Result<(), CoreError> {
        let limit = self.ctx.config.max_microsteps;
        let mut steps = 0usize;

        while self.running {
            self.phase = Phase::RunningMicrostep;
            while self.running {
                let mut enabled = self.select(None)?;
                if enabled.is_empty() {
                    let Some(event) = self.ctx.queues.pop_internal() else {
                        break;
                    };
                    trace!(session = %self.ctx.session_id, event = %event.name, "internal event");
                    self.data_model.bind_event(&event);
                    enabled = self.select(Some(&event))?;
                }
                if !enabled.is_empty() {
                    steps += 1;
                    if steps > limit {
                        return Err(CoreError::MicrostepLimit { limit });
                    }
                    self.microstep(&enabled)?;
                }
            }
            if !self.running {
                break;
            }

            self.cancel_exited_invokes();
            self.start_pending_invokes()?;
            self.ctx.invokes.pump_all();
            if self.ctx.queues.has_internal() {
                continue;
            }

            self.phase = Phase::ProcessingEvent;
            let Some(event) = self.ctx.queues.pop_external() else {
                break;
            };
            if let Some(filter) = &self.event_filter {
                if !filter.handle(&event) {
                    debug!(session = %self.ctx.session_id, event = %event.name, "event rejected by filter");
                    continue;
                }
            }
            debug!(session = %self.ctx.session_id, event = %event.name, "external event");
            self.data_model.bind_event(&event);
            self.apply_invoke_hooks(&event)?;
            let enabled = self.select(Some(&event))?;
            if !enabled.is_empty() {
                steps += 1;
                if steps > limit {
                    return Err(CoreError::MicrostepLimit { limit });
                }
                self.microstep(&enabled)?;
            }
        }

        if self.running {
            self.phase = Phase::StableWaitingForEvent;
            let changed = std::mem::take(&mut self.changed);
            self.ctx.notify(|o| o.on_reached_stable_state(changed));
            Ok(())
        } else {
            self.exit_interpreter()
        }
    }

    fn select(&mut self, event: Option<&Event>) -> Result<Vec<TransitionId>, CoreError> {
        let doc = &*self.document;
        let scope = Scope::new(doc, &self.configuration);
        let dm = self.data_model.as_mut();
        let ctx = &mut self.ctx;
        let mut fatal: Option<CoreError> = None;
        let mut guard = |t: TransitionId| -> bool {
            let Some(condition) = doc.transition(t).condition else {
                return true;
            };
            match dm.evaluate_to_bool(condition, &scope) {
                Ok(holds) => holds,
                Err(DataModelError::Execution(msg)) => {
                    ctx.raise_error("execution", msg, None);
                    false
                }
                Err(e) => {
                    fatal.get_or_insert(e.into());
                    false
                }
            }
        };
        let selected = selector::select_transitions(doc, &self.configuration, event, &mut guard);
        match fatal {
            Some(e) => Err(e),
            None => Ok(selected),
        }
    }

    fn microstep(&mut self, transitions: &[TransitionId]) -> Result<(), CoreError> {
        trace!(
            session = %self.ctx.session_id,
            transitions = ?transitions,
            "microstep"
        );
        self.exit_states(transitions)?;
        for &t in transitions {
            if let Some(content) = self.document.transition(t).content {
                self.run_container(content)?;
            }
        }
        let entry = selector::compute_entry_set(&self.document, &self.configuration, transitions);
        self.enter_states(entry)?;
        self.changed = true;
        Ok(())
    }

    fn exit_states(&mut self, transitions: &[TransitionId]) -> Result<(), CoreError> {
        let doc = Arc::clone(&self.document);
        let exits = selector::compute_exit_set(&doc, &self.configuration, transitions);
        for &s in &exits {
            self.ctx.invokes.unschedule_start(s);
        }
        self.configuration.record_history(&doc, &exits);
        for s in exits {
            let node = doc.state(s);
            for &container in &node.on_exit {
                self.run_container(container)?;
            }
            self.ctx.invokes.schedule_cancel(s);
            self.configuration.remove(s);
            trace!(session = %self.ctx.session_id, state = %node.name, "exited");
            self.ctx.notify(|o| o.on_state_exited(&node.name));
        }
        Ok(())
    }

    fn enter_states(&mut self, entry: EntrySet) -> Result<(), CoreError> {
        let doc = Arc::clone(&self.document);
        for &s in &entry.states {
            let node = doc.state(s);
            self.configuration.insert(s);
            if !node.invokes.is_empty() {
                self.ctx.invokes.schedule_start(s);
            }
            if s != ROOT {
                trace!(session = %self.ctx.session_id, state = %node.name, "entered");
                self.ctx.notify(|o| o.on_state_entered(&node.name));
            }

            if self.binding == BindingMode::Late && self.initialized.insert(s) {
                if let Some(data) = node.data {
                    self.run_container(data)?;
                }
            }
            for &container in &node.on_entry {
                self.run_container(container)?;
            }
            if entry.default_entry.contains(&s) {
                if let (_, Some(content)) = selector::default_initial(&doc, s) {
                    self.run_container(content)?;
                }
            }
            if let Some(&content) = entry.history_content.get(&s) {
                self.run_container(content)?;
            }

            if node.kind == StateKind::Final {
                self.enter_final(s)?;
            }
        }
        Ok(())
    }

    fn enter_final(&mut self, state: StateId) -> Result<(), CoreError> {
        let doc = Arc::clone(&self.document);
        let Some(parent) = doc.parent(state) else {
            return Ok(());
        };
        if parent == ROOT {
            self.running = false;
            return Ok(());
        }

        let parent_name = doc.name_of(parent).to_string();
        match doc.state(state).done_data {
            Some(container) => {
                self.ctx.done_state = Some(parent_name);
                let result = self.run_container(container);
                self.ctx.done_state = None;
                result?;
            }
            None => self
                .ctx
                .queues
                .push_internal(Event::internal(format!("done.state.{}", parent_name))),
        }

        if let Some(grandparent) = doc.parent(parent) {
            if doc.kind(grandparent) == StateKind::Parallel
                && doc
                    .child_states(grandparent)
                    .all(|region| self.configuration.is_in_final_state(&doc, region))
            {
                self.ctx.queues.push_internal(Event::internal(format!(
                    "done.state.{}",
                    doc.name_of(grandparent)
                )));
            }
        }
        Ok(())
    }

    fn run_container(&mut self, container: ContainerId) -> Result<bool, CoreError> {
        let doc = &*self.document;
        let scope = Scope::new(doc, &self.configuration);
        executor::execute(
            self.data_model.as_mut(),
            &scope,
            &mut self.ctx,
            doc.container(container),
        )
    }

    /// Leaves every active state and reports completion to the parent.
    fn exit_interpreter(&mut self) -> Result<(), CoreError> {
        let doc = Arc::clone(&self.document);
        let states: Vec<StateId> = self.configuration.iter().rev().collect();
        self.ctx.done_data = None;
        for s in states {
            let node = doc.state(s);
            for &container in &node.on_exit {
                self.run_container(container)?;
            }
            if node.kind == StateKind::Final && node.parent == Some(ROOT) {
                if let Some(container) = node.done_data {
                    self.run_container(container)?;
                }
            }
            self.configuration.remove(s);
            if s != ROOT {
                self.ctx.notify(|o| o.on_state_exited(&node.name));
            }
        }
        self.stop_all_invokes();

        if let Some(parent) = &self.ctx.parent {
            let data = self.ctx.done_data.take().unwrap_or(Value::Null);
            let event = Event::new(format!("done.invoke.{}", parent.invoke_id))
                .with_data(data)
                .with_invoke_id(parent.invoke_id.clone())
                .with_origin(self.ctx.origin(), SCXML_EVENT_PROCESSOR);
            if !parent.sender.send(event) {
                debug!(session = %self.ctx.session_id, "parent gone before done.invoke");
            }
        }
        self.finish();
        Ok(())
    }

    fn halt(&mut self) {
        self.stop_all_invokes();
        self.finish();
    }

    fn finish(&mut self) {
        self.running = false;
        self.phase = Phase::Finished;
        self.ctx.timers.clear();
        self.ctx.queues.clear();
        info!(session = %self.ctx.session_id, "interpreter finished");
        self.ctx.notify(|o| o.on_finished());
    }

    // =========================================================================
    // Invokes
    // =========================================================================

    fn cancel_exited_invokes(&mut self) {
        for invoke in self.ctx.invokes.take_cancellations() {
            self.stop_invoke(invoke);
        }
    }

    fn stop_all_invokes(&mut self) {
        for invoke in self.ctx.invokes.take_all() {
            self.stop_invoke(invoke);
        }
    }

    fn stop_invoke(&mut self, mut invoke: RunningInvoke) {
        invoke.service.cancel();
        info!(session = %self.ctx.session_id, invoke_id = %invoke.id, "invoke cancelled");
        self.ctx.notify(|o| o.on_invoke_stopped(&invoke.id));
    }

    fn start_pending_invokes(&mut self) -> Result<(), CoreError> {
        for state in self.ctx.invokes.take_pending_starts() {
            if !self.configuration.contains(state) {
                continue;
            }
            for index in 0..self.document.state(state).invokes.len() {
                self.start_invoke(state, index)?;
            }
        }
        Ok(())
    }

    fn start_invoke(&mut self, state: StateId, index: usize) -> Result<(), CoreError> {
        let doc = Arc::clone(&self.document);
        let info = &doc.state(state).invokes[index];

        let id = match &info.id {
            Some(id) => id.clone(),
            None => {
                let id = format!("{}{}", info.id_prefix, self.ctx.ids.next_id());
                if let Some(location) = &info.id_location {
                    let stored =
                        self.data_model
                            .set_property(location, Value::String(id.clone()), &info.location);
                    if executor::recover(&mut self.ctx, stored)?.is_none() {
                        return Ok(());
                    }
                }
                id
            }
        };

        let data = {
            let scope = Scope::new(&doc, &self.configuration);
            executor::payload(
                self.data_model.as_mut(),
                &scope,
                &mut self.ctx,
                &info.params,
                &info.namelist,
                None,
                None,
            )?
        };
        let Some(data) = data else {
            return Ok(());
        };

        let service = match self.create_service(&id, info, data) {
            Ok(service) => service,
            Err(msg) => {
                self.ctx
                    .raise_error("execution", format!("invoke {} failed: {}", id, msg), None);
                return Ok(());
            }
        };
        info!(session = %self.ctx.session_id, invoke_id = %id, state = %doc.name_of(state), "invoke started");
        self.ctx.invokes.add(RunningInvoke {
            id: id.clone(),
            state,
            index,
            autoforward: info.autoforward,
            service,
        });
        self.ctx.notify(|o| o.on_invoke_started(&id));
        Ok(())
    }

    fn create_service(
        &self,
        id: &str,
        info: &InvokeInfo,
        data: Value,
    ) -> Result<Box<dyn InvokableService>, String> {
        match &info.source {
            InvokeSource::Scxml { document } => {
                let mut child = InterpreterBuilder::new(Arc::clone(document))
                    .with_config(self.ctx.config.clone())
                    .with_id_generator(Arc::clone(&self.ctx.ids))
                    .with_services(Arc::clone(&self.ctx.services))
                    .with_session_id(id)
                    .with_parent(ParentLink {
                        sender: self.ctx.queues.sender(),
                        invoke_id: id.to_string(),
                        parent_session_id: self.ctx.session_id.clone(),
                    })
                    .build()
                    .map_err(|e| e.to_string())?;
                let values = match data {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                child.init(values).map_err(|e| e.to_string())?;
                child.start().map_err(|e| e.to_string())?;
                Ok(Box::new(ScxmlService::new(id, child)))
            }
            InvokeSource::Service { service_type, src } => {
                let factory = self
                    .ctx
                    .services
                    .get(service_type)
                    .ok_or_else(|| format!("no service registered for type '{}'", service_type))?;
                factory.create(InvokeRequest {
                    invoke_id: id.to_string(),
                    src: src.clone(),
                    data,
                    parent: self.ctx.queues.sender(),
                    parent_session_id: self.ctx.session_id.clone(),
                })
            }
        }
    }

    /// Runs `<finalize>` for events coming back from an invoke and forwards
    /// the event to every autoforwarding invoke except its sender.
    fn apply_invoke_hooks(&mut self, event: &Event) -> Result<(), CoreError> {
        let doc = Arc::clone(&self.document);
        let from = event.invoke_id.as_deref();
        for (id, state, index, autoforward) in self.ctx.invokes.entries() {
            if from == Some(id.as_str()) {
                if let Some(finalize) = doc.state(state).invokes[index].finalize {
                    self.run_container(finalize)?;
                }
            } else if autoforward {
                self.ctx.invokes.post(&id, event.clone());
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("session_id", &self.ctx.session_id)
            .field("name", &self.ctx.name)
            .field("phase", &self.phase)
            .field("active", &self.active_states(false))
            .finish()
    }
}
