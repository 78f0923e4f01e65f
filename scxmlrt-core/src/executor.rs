//! Executable content.
//!
//! [`execute`] walks an instruction tree against a data model. Every
//! instruction reports success as a bool; a failed instruction aborts the
//! rest of its enclosing block. Recoverable data-model failures become
//! `error.execution` events on the internal queue. Unsupported operations are
//! returned as fatal [`CoreError`]s.

use crate::config::InterpreterConfig;
use crate::datamodel::{DataModel, Scope};
use crate::error::{CoreError, DataModelError};
use crate::ids::IdGenerator;
use crate::invoke::{InvokeManager, ParentLink, ServiceRegistry};
use crate::observer::Observer;
use crate::queue::EventQueues;
use crate::timer::{parse_delay, DelayedEvents, Route};
use scxmlrt_model::{Event, EventKind, EvaluatorId, Instruction, Param, SendInfo};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// `_event.origintype` and the accepted long form of `<send type>`.
pub const SCXML_EVENT_PROCESSOR: &str = "http://www.w3.org/TR/scxml/#SCXMLEventProcessor";

/// Everything executable content can touch besides the data model.
pub struct ExecutionContext {
    pub(crate) session_id: String,
    pub(crate) name: String,
    pub(crate) config: InterpreterConfig,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) services: Arc<ServiceRegistry>,
    pub(crate) observers: Vec<Arc<dyn Observer>>,
    pub(crate) parent: Option<ParentLink>,
    pub(crate) queues: EventQueues,
    pub(crate) timers: DelayedEvents,
    pub(crate) invokes: InvokeManager,
    /// Set while the `<donedata>` of a non-top-level final state runs.
    pub(crate) done_state: Option<String>,
    /// Payload produced by the `<donedata>` of a top-level final state.
    pub(crate) done_data: Option<Value>,
}

impl ExecutionContext {
    pub(crate) fn raise_error(&mut self, category: &str, message: impl Into<String>, send_id: Option<String>) {
        let message = message.into();
        warn!(
            session = %self.session_id,
            category,
            send_id = send_id.as_deref().unwrap_or(""),
            "{}",
            message
        );
        self.queues
            .push_internal(Event::error(category, message, send_id));
    }

    pub(crate) fn notify(&self, f: impl Fn(&dyn Observer)) {
        for observer in &self.observers {
            f(observer.as_ref());
        }
    }

    /// Origin written into every sent event.
    pub(crate) fn origin(&self) -> String {
        format!("#_scxml_{}", self.session_id)
    }

    /// Delivers an event that is due now.
    pub(crate) fn deliver(&mut self, event: Event, route: Route) -> Result<(), String> {
        match route {
            Route::External => self.queues.push_external(event),
            Route::Internal => self.queues.push_internal(event),
            Route::Parent => match &self.parent {
                Some(parent) => {
                    if !parent.sender.send(event) {
                        return Err(format!("parent session {} is gone", parent.parent_session_id));
                    }
                }
                None => {
                    debug!(session = %self.session_id, event = %event.name, "not invoked, dropping event for #_parent");
                }
            },
            Route::Invoke(id) => {
                if !self.invokes.post(&id, event) {
                    return Err(format!("invoke '{}' is not running", id));
                }
            }
        }
        Ok(())
    }

    /// Fires every delayed send due at `now`.
    pub(crate) fn fire_due(&mut self, now: Instant) {
        for due in self.timers.take_due(now) {
            debug!(session = %self.session_id, send_id = %due.send_id, event = %due.event.name, "delayed send due");
            let send_id = due.send_id.clone();
            if let Err(msg) = self.deliver(due.event, due.route) {
                self.raise_error("communication", msg, Some(send_id));
            }
        }
    }
}

/// Maps a data-model result onto the error taxonomy: `Ok(None)` means a
/// recoverable failure was raised as `error.execution`.
pub(crate) fn recover<T>(
    ctx: &mut ExecutionContext,
    result: Result<T, DataModelError>,
) -> Result<Option<T>, CoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(DataModelError::Execution(msg)) => {
            ctx.raise_error("execution", msg, None);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs one instruction. Returns `Ok(false)` when it failed and the
/// enclosing block must stop.
pub fn execute(
    dm: &mut dyn DataModel,
    scope: &Scope<'_>,
    ctx: &mut ExecutionContext,
    instruction: &Instruction,
) -> Result<bool, CoreError> {
    match instruction {
        Instruction::Sequence { instructions } => {
            for instruction in instructions {
                if !execute(dm, scope, ctx, instruction)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        Instruction::If { conditions, blocks } => {
            for (i, condition) in conditions.iter().enumerate() {
                // A condition that cannot be evaluated counts as false.
                let holds = recover(ctx, dm.evaluate_to_bool(*condition, scope))?.unwrap_or(false);
                if holds {
                    return match blocks.get(i) {
                        Some(block) => execute(dm, scope, ctx, block),
                        None => Ok(true),
                    };
                }
            }
            match blocks.get(conditions.len()) {
                Some(otherwise) => execute(dm, scope, ctx, otherwise),
                None => Ok(true),
            }
        }

        Instruction::Foreach { foreach, block } => {
            let mut fatal: Option<CoreError> = None;
            let result = {
                let mut body = |dm: &mut dyn DataModel| -> bool {
                    match execute(dm, scope, ctx, block) {
                        Ok(ok) => ok,
                        Err(e) => {
                            fatal = Some(e);
                            false
                        }
                    }
                };
                dm.foreach(*foreach, scope, &mut body)
            };
            if let Some(e) = fatal {
                return Err(e);
            }
            Ok(recover(ctx, result)?.unwrap_or(false))
        }

        Instruction::Raise { event } => {
            ctx.queues.push_internal(Event::internal(event.clone()));
            Ok(true)
        }

        Instruction::Send(info) => send(dm, scope, ctx, info),

        Instruction::Cancel {
            send_id,
            send_id_expr,
        } => {
            let id = match send_id_expr {
                Some(expr) => match recover(ctx, dm.evaluate_to_string(*expr, scope))? {
                    Some(id) => id,
                    None => return Ok(false),
                },
                None => send_id.clone().unwrap_or_default(),
            };
            if !id.is_empty() && ctx.timers.cancel(&id) {
                debug!(session = %ctx.session_id, send_id = %id, "cancelled delayed send");
            }
            Ok(true)
        }

        Instruction::Assign { assignment } => {
            Ok(recover(ctx, dm.assign(*assignment, scope))?.is_some())
        }

        Instruction::Initialize { assignment } => {
            Ok(recover(ctx, dm.initialize(*assignment, scope))?.is_some())
        }

        Instruction::Script { script } => {
            Ok(recover(ctx, dm.evaluate_to_void(*script, scope))?.is_some())
        }

        Instruction::Log { label, expr } => {
            let message = match expr {
                None => String::new(),
                Some(expr) => match dm.evaluate_to_string(*expr, scope) {
                    Ok(message) => message,
                    Err(DataModelError::Execution(msg)) => {
                        warn!(session = %ctx.session_id, label = %label, "log expression failed: {}", msg);
                        return Ok(true);
                    }
                    Err(e) => return Err(e.into()),
                },
            };
            info!(target: "scxmlrt::log", session = %ctx.session_id, label = %label, "{}", message);
            ctx.notify(|o| o.on_log(label, &message));
            Ok(true)
        }

        Instruction::DoneData(info) => {
            let data = payload(
                dm,
                scope,
                ctx,
                &info.params,
                &[],
                info.content.as_ref(),
                info.content_expr,
            )?
            .unwrap_or(Value::Null);
            match ctx.done_state.clone() {
                Some(state) => ctx
                    .queues
                    .push_internal(Event::internal(format!("done.state.{}", state)).with_data(data)),
                None => ctx.done_data = Some(data),
            }
            Ok(true)
        }
    }
}

/// Builds an event payload from params and a namelist, or else from
/// content. `Ok(None)` means a param or name failed and `error.execution`
/// was raised.
pub(crate) fn payload(
    dm: &mut dyn DataModel,
    scope: &Scope<'_>,
    ctx: &mut ExecutionContext,
    params: &[Param],
    namelist: &[String],
    content: Option<&Value>,
    content_expr: Option<EvaluatorId>,
) -> Result<Option<Value>, CoreError> {
    if params.is_empty() && namelist.is_empty() {
        return match content_expr {
            Some(expr) => Ok(Some(
                recover(ctx, dm.evaluate_to_value(expr, scope))?.unwrap_or(Value::Null),
            )),
            None => Ok(Some(content.cloned().unwrap_or(Value::Null))),
        };
    }

    let mut map = Map::new();
    for param in params {
        let value = match (param.expr, &param.location) {
            (Some(expr), _) => dm.evaluate_to_value(expr, scope),
            (None, Some(location)) => read_location(dm, location),
            (None, None) => Err(DataModelError::execution(format!(
                "param '{}' has neither expr nor location",
                param.name
            ))),
        };
        match recover(ctx, value)? {
            Some(value) => {
                map.insert(param.name.clone(), value);
            }
            None => return Ok(None),
        }
    }
    for name in namelist {
        match recover(ctx, read_location(dm, name))? {
            Some(value) => {
                map.insert(name.clone(), value);
            }
            None => return Ok(None),
        }
    }
    Ok(Some(Value::Object(map)))
}

fn read_location(dm: &dyn DataModel, location: &str) -> Result<Value, DataModelError> {
    if !dm.has_property(location) {
        return Err(DataModelError::execution(format!(
            "{} is not a valid location",
            location
        )));
    }
    Ok(dm.property(location).unwrap_or(Value::Null))
}

/// Evaluates a literal-or-expression attribute pair. `Ok(None)` means the
/// expression failed and `error.execution` was raised.
fn string_attr(
    dm: &mut dyn DataModel,
    scope: &Scope<'_>,
    ctx: &mut ExecutionContext,
    literal: &Option<String>,
    expr: Option<EvaluatorId>,
) -> Result<Option<Option<String>>, CoreError> {
    match expr {
        Some(expr) => Ok(recover(ctx, dm.evaluate_to_string(expr, scope))?.map(Some)),
        None => Ok(Some(literal.clone())),
    }
}

fn is_scxml_type(send_type: &str) -> bool {
    matches!(send_type, "" | "scxml" | SCXML_EVENT_PROCESSOR)
}

fn send(
    dm: &mut dyn DataModel,
    scope: &Scope<'_>,
    ctx: &mut ExecutionContext,
    info: &SendInfo,
) -> Result<bool, CoreError> {
    // A failing eventexpr still raises error.execution, but the send goes
    // ahead with an empty name.
    let name = string_attr(dm, scope, ctx, &info.event, info.event_expr)?
        .flatten()
        .unwrap_or_default();

    // Explicit ids are visible in the event; generated ones only when they
    // were requested through idlocation.
    let (send_id, visible_id) = match &info.id {
        Some(id) => (id.clone(), Some(id.clone())),
        None => {
            let id = format!("{}{}", ctx.config.send_id_prefix, ctx.ids.next_id());
            match &info.id_location {
                Some(location) => {
                    let stored = dm.set_property(location, Value::String(id.clone()), &info.location);
                    if recover(ctx, stored)?.is_none() {
                        return Ok(false);
                    }
                    (id.clone(), Some(id))
                }
                None => (id, None),
            }
        }
    };

    let Some(target) = string_attr(dm, scope, ctx, &info.target, info.target_expr)? else {
        return Ok(false);
    };
    let Some(send_type) = string_attr(dm, scope, ctx, &info.send_type, info.type_expr)? else {
        return Ok(false);
    };
    if let Some(send_type) = send_type.as_deref() {
        if !is_scxml_type(send_type) {
            ctx.raise_error(
                "communication",
                format!("unsupported event processor type '{}' in {}", send_type, info.location),
                visible_id,
            );
            return Ok(false);
        }
    }

    let route = match target.as_deref() {
        None | Some("") => Route::External,
        Some("#_internal") => Route::Internal,
        Some("#_parent") => Route::Parent,
        Some(t) if t == ctx.origin() => Route::External,
        Some(t) if t.len() > 2 && t.starts_with("#_") && ctx.invokes.is_running(&t[2..]) => {
            Route::Invoke(t[2..].to_string())
        }
        Some(t) => {
            ctx.raise_error(
                "communication",
                format!("cannot dispatch to target '{}' in {}", t, info.location),
                visible_id,
            );
            return Ok(false);
        }
    };

    let Some(delay) = string_attr(dm, scope, ctx, &info.delay, info.delay_expr)? else {
        return Ok(false);
    };
    let delay = match delay.as_deref().map(str::trim) {
        None | Some("") => Duration::ZERO,
        Some(text) => match parse_delay(text) {
            Ok(delay) => delay,
            Err(msg) => {
                ctx.raise_error("execution", format!("{} in {}", msg, info.location), visible_id);
                return Ok(false);
            }
        },
    };

    let data = payload(
        dm,
        scope,
        ctx,
        &info.params,
        &info.namelist,
        info.content.as_ref(),
        info.content_expr,
    )?
    .unwrap_or(Value::Null);

    let event = Event {
        name,
        kind: if route == Route::Internal {
            EventKind::Internal
        } else {
            EventKind::External
        },
        data,
        send_id: visible_id,
        origin: Some(ctx.origin()),
        origin_type: Some(SCXML_EVENT_PROCESSOR.to_string()),
        invoke_id: ctx.parent.as_ref().map(|p| p.invoke_id.clone()),
        delay: (!delay.is_zero()).then_some(delay),
    };

    if !delay.is_zero() {
        debug!(
            session = %ctx.session_id,
            send_id = %send_id,
            event = %event.name,
            delay_ms = delay.as_millis() as u64,
            "scheduled delayed send"
        );
        ctx.timers
            .schedule(send_id, event, route, Instant::now() + delay);
        return Ok(true);
    }

    let visible = event.send_id.clone();
    if let Err(msg) = ctx.deliver(event, route) {
        ctx.raise_error("communication", msg, visible);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Configuration;
    use crate::datamodel::{JsonDataModel, SystemVariables};
    use crate::ids::SequentialIds;
    use crate::observer::RecordingObserver;
    use scxmlrt_model::{DataModelKind, Document, DocumentBuilder, SendInfo};
    use serde_json::json;

    struct Fixture {
        doc: Document,
        config: Configuration,
        dm: JsonDataModel,
        ctx: ExecutionContext,
        observer: Arc<RecordingObserver>,
    }

    impl Fixture {
        fn new(build: impl FnOnce(&mut DocumentBuilder)) -> Self {
            let mut b = DocumentBuilder::new("exec");
            b.data_model(DataModelKind::Json);
            b.state("s");
            build(&mut b);
            let doc = b.build().unwrap();
            let mut dm = JsonDataModel::new();
            dm.setup(
                &SystemVariables {
                    session_id: "s1".into(),
                    name: "exec".into(),
                },
                &Map::new(),
            )
            .unwrap();
            let observer = Arc::new(RecordingObserver::new());
            let ctx = ExecutionContext {
                session_id: "s1".into(),
                name: "exec".into(),
                config: InterpreterConfig::default(),
                ids: Arc::new(SequentialIds::new()),
                services: Arc::new(ServiceRegistry::new()),
                observers: vec![observer.clone()],
                parent: None,
                queues: EventQueues::new(),
                timers: DelayedEvents::new(),
                invokes: InvokeManager::new(),
                done_state: None,
                done_data: None,
            };
            Self {
                doc,
                config: Configuration::new(),
                dm,
                ctx,
                observer,
            }
        }

        fn run(&mut self, container: usize) -> bool {
            let scope = Scope::new(&self.doc, &self.config);
            let instruction = &self.doc.containers[container];
            execute(&mut self.dm, &scope, &mut self.ctx, instruction).unwrap()
        }

        fn internal_names(&mut self) -> Vec<String> {
            let mut names = Vec::new();
            while let Some(e) = self.ctx.queues.pop_internal() {
                names.push(e.name);
            }
            names
        }
    }

    #[test]
    fn test_sequence_stops_at_first_failure() {
        let mut f = Fixture::new(|b| {
            let ok = b.script("var a = 1");
            let bad = b.assign("missing", "1");
            let never = b.script("var c = 3");
            b.container(vec![ok, bad, never]);
        });
        assert!(!f.run(0));
        assert_eq!(f.dm.property("a"), Some(json!(1)));
        assert!(!f.dm.has_property("c"));
        assert_eq!(f.internal_names(), vec!["error.execution"]);
    }

    #[test]
    fn test_if_elseif_else() {
        let mut f = Fixture::new(|b| {
            let setup = b.script("var x = 5; var branch = ''");
            let first = b.assign("branch", "'first'");
            let second = b.assign("branch", "'second'");
            let other = b.assign("branch", "'other'");
            let choose = b.if_else(vec![("x > 10", vec![first]), ("x > 3", vec![second])], Some(vec![other]));
            b.container(vec![setup, choose]);
        });
        assert!(f.run(0));
        assert_eq!(f.dm.property("branch"), Some(json!("second")));
    }

    #[test]
    fn test_if_condition_error_counts_as_false() {
        let mut f = Fixture::new(|b| {
            let setup = b.script("var branch = ''");
            let first = b.assign("branch", "'first'");
            let other = b.assign("branch", "'other'");
            let choose = b.if_else(vec![("nope.value", vec![first])], Some(vec![other]));
            b.container(vec![setup, choose]);
        });
        assert!(f.run(0));
        assert_eq!(f.dm.property("branch"), Some(json!("other")));
        assert_eq!(f.internal_names(), vec!["error.execution"]);
    }

    #[test]
    fn test_foreach_body_failure_stops_iteration() {
        let mut f = Fixture::new(|b| {
            let setup = b.script("var items = [{\"v\": 1}, null, {\"v\": 3}]; var sum = 0");
            let add = b.assign("sum", "sum + item.v");
            let each = b.foreach("items", "item", None, vec![add]);
            b.container(vec![setup, each]);
        });
        assert!(!f.run(0));
        assert_eq!(f.dm.property("sum"), Some(json!(1)));
        assert_eq!(f.internal_names(), vec!["error.execution"]);
    }

    #[test]
    fn test_raise_goes_to_internal_queue() {
        let mut f = Fixture::new(|b| {
            let r = b.raise("ping");
            b.container(vec![r]);
        });
        assert!(f.run(0));
        let e = f.ctx.queues.pop_internal().unwrap();
        assert_eq!(e.name, "ping");
        assert_eq!(e.kind, EventKind::Internal);
    }

    #[test]
    fn test_send_external_with_params() {
        let mut f = Fixture::new(|b| {
            let setup = b.script("var n = 41");
            let expr = b.expr("n + 1");
            let send = b.send(SendInfo {
                event: Some("answer".into()),
                params: vec![Param {
                    name: "value".into(),
                    expr: Some(expr),
                    location: None,
                }],
                namelist: vec!["n".into()],
                ..Default::default()
            });
            b.container(vec![setup, send]);
        });
        assert!(f.run(0));
        let e = f.ctx.queues.pop_external().unwrap();
        assert_eq!(e.name, "answer");
        assert_eq!(e.data, json!({"value": 42, "n": 41}));
        assert_eq!(e.origin.as_deref(), Some("#_scxml_s1"));
        assert_eq!(e.origin_type.as_deref(), Some(SCXML_EVENT_PROCESSOR));
        assert_eq!(e.send_id, None);
    }

    #[test]
    fn test_send_delayed_and_cancel() {
        let mut f = Fixture::new(|b| {
            let send = b.send(SendInfo {
                event: Some("later".into()),
                id: Some("t1".into()),
                delay: Some("1s".into()),
                ..Default::default()
            });
            b.container(vec![send]);
            let cancel = b.cancel("t1");
            b.container(vec![cancel]);
        });
        assert!(f.run(0));
        assert!(f.ctx.timers.contains("t1"));
        assert!(!f.ctx.queues.has_external());
        assert!(f.run(1));
        assert!(f.ctx.timers.is_empty());
    }

    #[test]
    fn test_send_idlocation_stores_generated_id() {
        let mut f = Fixture::new(|b| {
            let setup = b.script("var handle = null");
            let send = b.send(SendInfo {
                event: Some("tick".into()),
                id_location: Some("handle".into()),
                delay: Some("10ms".into()),
                ..Default::default()
            });
            b.container(vec![setup, send]);
        });
        assert!(f.run(0));
        assert_eq!(f.dm.property("handle"), Some(json!("send-1")));
        assert!(f.ctx.timers.contains("send-1"));
    }

    #[test]
    fn test_send_bad_target_and_type() {
        let mut f = Fixture::new(|b| {
            let target = b.send(SendInfo {
                event: Some("x".into()),
                target: Some("#_nowhere".into()),
                ..Default::default()
            });
            b.container(vec![target]);
            let kind = b.send(SendInfo {
                event: Some("x".into()),
                send_type: Some("http://example.com/basichttp".into()),
                ..Default::default()
            });
            b.container(vec![kind]);
        });
        for container in 0..2 {
            assert!(!f.run(container));
            assert_eq!(f.internal_names(), vec!["error.communication"]);
        }
        assert!(!f.ctx.queues.has_external());
    }

    #[test]
    fn test_send_to_parent_when_not_invoked_is_dropped() {
        let mut f = Fixture::new(|b| {
            let parent = b.send(SendInfo {
                event: Some("x".into()),
                target: Some("#_parent".into()),
                ..Default::default()
            });
            let after = b.raise("after");
            b.container(vec![parent, after]);
        });
        assert!(f.run(0));
        assert_eq!(f.internal_names(), vec!["after"]);
        assert!(!f.ctx.queues.has_external());
    }

    #[test]
    fn test_send_with_failing_eventexpr_still_sends() {
        let mut f = Fixture::new(|b| {
            let event_expr = b.expr("undefined_thing.x");
            let send = b.send(SendInfo {
                event_expr: Some(event_expr),
                ..Default::default()
            });
            let after = b.raise("after");
            b.container(vec![send, after]);
        });
        assert!(f.run(0));
        assert_eq!(f.internal_names(), vec!["error.execution", "after"]);
        let sent = f.ctx.queues.pop_external().unwrap();
        assert_eq!(sent.name, "");
        assert_eq!(sent.origin.as_deref(), Some("#_scxml_s1"));
    }

    #[test]
    fn test_send_bad_delay_raises_execution_error() {
        let mut f = Fixture::new(|b| {
            let send = b.send(SendInfo {
                event: Some("x".into()),
                delay: Some("soon".into()),
                ..Default::default()
            });
            b.container(vec![send]);
        });
        assert!(!f.run(0));
        assert_eq!(f.internal_names(), vec!["error.execution"]);
    }

    #[test]
    fn test_send_internal_and_self_targets() {
        let mut f = Fixture::new(|b| {
            let internal = b.send(SendInfo {
                event: Some("in".into()),
                target: Some("#_internal".into()),
                ..Default::default()
            });
            let own = b.send(SendInfo {
                event: Some("self".into()),
                target: Some("#_scxml_s1".into()),
                ..Default::default()
            });
            b.container(vec![internal, own]);
        });
        assert!(f.run(0));
        assert_eq!(f.internal_names(), vec!["in"]);
        assert_eq!(f.ctx.queues.pop_external().unwrap().name, "self");
    }

    #[test]
    fn test_log_failure_is_swallowed() {
        let mut f = Fixture::new(|b| {
            let good = b.log("greeting", "'hi'");
            let bad = b.log("broken", "undefined_thing.x");
            let after = b.raise("after");
            b.container(vec![good, bad, after]);
        });
        assert!(f.run(0));
        assert_eq!(f.observer.logs(), vec!["greeting: hi"]);
        assert_eq!(f.internal_names(), vec!["after"]);
    }

    #[test]
    fn test_done_data_raises_done_state() {
        let mut f = Fixture::new(|b| {
            let expr = b.expr("1 + 1");
            b.container(vec![Instruction::DoneData(scxmlrt_model::DoneDataInfo {
                params: vec![Param {
                    name: "two".into(),
                    expr: Some(expr),
                    location: None,
                }],
                ..Default::default()
            })]);
        });
        f.ctx.done_state = Some("parent".into());
        assert!(f.run(0));
        let e = f.ctx.queues.pop_internal().unwrap();
        assert_eq!(e.name, "done.state.parent");
        assert_eq!(e.data, json!({"two": 2}));

        f.ctx.done_state = None;
        assert!(f.run(0));
        assert_eq!(f.ctx.done_data, Some(json!({"two": 2})));
    }
}
