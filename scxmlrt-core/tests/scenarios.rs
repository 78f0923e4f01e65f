//! Whole-chart scenarios driven through the public interpreter API.

use scxmlrt_core::{
    CoreError, EventSender, Interpreter, InterpreterConfig, InvokableService, InvokeRequest,
    Notification, Phase, RecordingObserver, ServiceFactory, ServiceRegistry,
};
use scxmlrt_model::{
    BindingMode, DataModelKind, Document, DocumentBuilder, DoneDataInfo, Event, HistoryKind,
    InvokeInfo, InvokeSource, SendInfo,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn started(doc: Document) -> (Interpreter, Arc<RecordingObserver>) {
    started_with(doc, Arc::new(ServiceRegistry::new()))
}

fn started_with(doc: Document, services: Arc<ServiceRegistry>) -> (Interpreter, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::new());
    let mut interp = Interpreter::builder(doc)
        .with_observer(observer.clone())
        .with_services(services)
        .build()
        .unwrap();
    interp.start().unwrap();
    (interp, observer)
}

fn later(ms: u64) -> Instant {
    Instant::now() + Duration::from_millis(ms)
}

fn send_to(event: &str, target: &str) -> SendInfo {
    SendInfo {
        event: Some(event.into()),
        target: Some(target.into()),
        ..Default::default()
    }
}

// ============================================================================
// Basic transitions
// ============================================================================

#[test]
fn test_simple_transition() {
    let mut b = DocumentBuilder::new("m");
    let s1 = b.state("s1");
    let s2 = b.state("s2");
    b.transition(s1).on("go").target(s2).add();
    let (mut interp, _) = started(b.build().unwrap());

    assert_eq!(interp.active_states(false), vec!["s1"]);
    interp.submit("go").unwrap();
    assert_eq!(interp.active_states(false), vec!["s2"]);
    assert!(!interp.is_active("s1"));
    assert!(interp.is_active("s2"));
}

#[test]
fn test_parallel_default_entry() {
    let mut b = DocumentBuilder::new("m");
    let p = b.parallel("P");
    let a = b.state_in(p, "A");
    b.state_in(a, "a1");
    b.state_in(a, "a2");
    let bb = b.state_in(p, "B");
    b.state_in(bb, "b1");
    b.state_in(bb, "b2");
    let (interp, _) = started(b.build().unwrap());

    assert_eq!(
        interp.active_states(false),
        vec!["A", "B", "P", "a1", "b1"]
    );
    assert_eq!(interp.active_states(true), vec!["a1", "b1"]);
    assert!(interp.configuration().check_legal(interp.document()).is_ok());
}

#[test]
fn test_event_descriptor_prefix_match() {
    let mut b = DocumentBuilder::new("m");
    let s1 = b.state("s1");
    let s2 = b.state("s2");
    let s3 = b.state("s3");
    b.transition(s1).on("error.*").target(s2).add();
    b.transition(s2).on("done").target(s3).add();
    let (mut interp, _) = started(b.build().unwrap());

    interp.submit("errors").unwrap();
    assert!(interp.is_active("s1"));
    interp.submit("error.platform.bad").unwrap();
    assert!(interp.is_active("s2"));
    interp.submit("done.state.x").unwrap();
    assert!(interp.is_active("s3"));
}

#[test]
fn test_eventless_chain_with_in_guard() {
    let mut b = DocumentBuilder::new("m");
    let start = b.state("start");
    let middle = b.state("middle");
    let end = b.state("end");
    b.transition(start).on("go").target(middle).add();
    b.transition(middle).cond("In(middle)").target(end).add();
    let (mut interp, observer) = started(b.build().unwrap());
    observer.take();

    interp.submit("go").unwrap();
    assert_eq!(interp.active_states(false), vec!["end"]);
    assert_eq!(
        observer.take(),
        vec![
            Notification::Exited("start".into()),
            Notification::Entered("middle".into()),
            Notification::Exited("middle".into()),
            Notification::Entered("end".into()),
            Notification::Stable(true),
        ]
    );
}

#[test]
fn test_stable_state_is_idempotent() {
    let mut b = DocumentBuilder::new("m");
    let s = b.state("s");
    let t = b.state("t");
    b.transition(s).on("go").target(t).add();
    let (mut interp, observer) = started(b.build().unwrap());
    observer.take();

    let before = interp.active_states(false);
    interp.process_pending().unwrap();
    assert_eq!(interp.active_states(false), before);
    assert_eq!(interp.pending_delayed_events(), 0);
    assert!(observer.take().is_empty());
    assert_eq!(interp.phase(), Phase::StableWaitingForEvent);
}

// ============================================================================
// Entry/exit ordering
// ============================================================================

#[test]
fn test_external_self_transition_exits_and_reenters_once() {
    let mut b = DocumentBuilder::new("m");
    let s = b.state("s");
    let enter = b.log("enter", "s");
    let exit = b.log("exit", "s");
    let fire = b.log("fire", "again");
    b.on_entry(s, vec![enter]);
    b.on_exit(s, vec![exit]);
    b.transition(s).on("again").target(s).content(vec![fire]).add();
    let (mut interp, observer) = started(b.build().unwrap());
    observer.take();

    interp.submit("again").unwrap();
    assert_eq!(observer.logs(), vec!["exit: s", "fire: again", "enter: s"]);
    assert!(interp.is_active("s"));
}

#[test]
fn test_internal_transition_keeps_source_active() {
    let mut b = DocumentBuilder::new("m");
    let p = b.state("p");
    let c1 = b.state_in(p, "c1");
    let c2 = b.state_in(p, "c2");
    let exit_p = b.log("exit", "p");
    let exit_c1 = b.log("exit", "c1");
    b.on_exit(p, vec![exit_p]);
    b.on_exit(c1, vec![exit_c1]);
    b.transition(p).on("switch").target(c2).internal().add();
    let (mut interp, observer) = started(b.build().unwrap());

    interp.submit("switch").unwrap();
    assert_eq!(observer.logs(), vec!["exit: c1"]);
    assert_eq!(interp.active_states(false), vec!["c2", "p"]);
}

#[test]
fn test_region_transitions_run_in_document_order() {
    let mut b = DocumentBuilder::new("m");
    let p = b.parallel("P");
    let ra = b.state_in(p, "A");
    let a1 = b.state_in(ra, "a1");
    let a2 = b.state_in(ra, "a2");
    let rb = b.state_in(p, "B");
    let b1 = b.state_in(rb, "b1");
    let b2 = b.state_in(rb, "b2");
    let log_a = b.log("A", "moved");
    let log_b = b.log("B", "moved");
    // Declared B first; document order still puts region A first.
    b.transition(b1).on("e").target(b2).content(vec![log_b]).add();
    b.transition(a1).on("e").target(a2).content(vec![log_a]).add();
    let (mut interp, observer) = started(b.build().unwrap());

    interp.submit("e").unwrap();
    assert_eq!(observer.logs(), vec!["A: moved", "B: moved"]);
    assert_eq!(interp.active_states(true), vec!["a2", "b2"]);
}

/// Transitions in two regions race with a transition of the parallel's
/// ancestor, selected through the third region. The ancestor wins outright.
#[test]
fn test_ancestor_preempts_transitions_in_two_regions() {
    let mut b = DocumentBuilder::new("m");
    let wrapper = b.state("wrapper");
    let p = b.parallel_in(wrapper, "P");
    let ra = b.state_in(p, "A");
    let a1 = b.state_in(ra, "a1");
    let a2 = b.state_in(ra, "a2");
    let rb = b.state_in(p, "B");
    b.state_in(rb, "b1");
    let rc = b.state_in(p, "C");
    let c1 = b.state_in(rc, "c1");
    let c2 = b.state_in(rc, "c2");
    let out = b.state("out");

    let log_a = b.log("A", "fired");
    let log_c = b.log("C", "fired");
    let log_w = b.log("wrapper", "fired");
    b.transition(a1).on("e").target(a2).content(vec![log_a]).add();
    b.transition(c1).on("e").target(c2).content(vec![log_c]).add();
    b.transition(wrapper).on("e").target(out).content(vec![log_w]).add();
    let (mut interp, observer) = started(b.build().unwrap());
    assert_eq!(interp.active_states(true), vec!["a1", "b1", "c1"]);

    interp.submit("e").unwrap();
    assert_eq!(observer.logs(), vec!["wrapper: fired"]);
    assert_eq!(interp.active_states(false), vec!["out"]);
}

#[test]
fn test_conflicting_region_targets_first_in_document_order_wins() {
    let mut b = DocumentBuilder::new("m");
    let p = b.parallel("P");
    let ra = b.state_in(p, "A");
    let a1 = b.state_in(ra, "a1");
    let rb = b.state_in(p, "B");
    let b1 = b.state_in(rb, "b1");
    let x = b.state("x");
    let y = b.state("y");
    b.transition(b1).on("e").target(y).add();
    b.transition(a1).on("e").target(x).add();
    let (mut interp, _) = started(b.build().unwrap());

    interp.submit("e").unwrap();
    assert_eq!(interp.active_states(false), vec!["x"]);
}

// ============================================================================
// Final states and done events
// ============================================================================

#[test]
fn test_done_state_events_with_done_data() {
    let mut b = DocumentBuilder::new("m");
    b.data_model(DataModelKind::Json);
    let root = b.root();
    b.data(root, &[("result", None)]);
    let job = b.state("job");
    let working = b.state_in(job, "working");
    let finished = b.final_in(job, "finished");
    let after = b.state("after");
    let answer = b.expr("6 * 7");
    b.done_data(
        finished,
        DoneDataInfo {
            params: vec![scxmlrt_model::Param {
                name: "answer".into(),
                expr: Some(answer),
                location: None,
            }],
            ..Default::default()
        },
    );
    b.transition(working).on("complete").target(finished).add();
    let store = b.assign("result", "_event.data.answer");
    b.transition(job)
        .on("done.state.job")
        .target(after)
        .content(vec![store])
        .add();
    let (mut interp, _) = started(b.build().unwrap());

    interp.submit("complete").unwrap();
    assert!(interp.is_active("after"));
    assert_eq!(interp.data_model().property("result"), Some(json!(42)));
}

#[test]
fn test_parallel_done_when_all_regions_final() {
    let mut b = DocumentBuilder::new("m");
    let p = b.parallel("P");
    let ra = b.state_in(p, "A");
    let a1 = b.state_in(ra, "a1");
    let a_done = b.final_in(ra, "a_done");
    let rb = b.state_in(p, "B");
    let b1 = b.state_in(rb, "b1");
    let b_done = b.final_in(rb, "b_done");
    let all = b.state("all");
    b.transition(a1).on("finish_a").target(a_done).add();
    b.transition(b1).on("finish_b").target(b_done).add();
    b.transition(p).on("done.state.P").target(all).add();
    let (mut interp, _) = started(b.build().unwrap());

    interp.submit("finish_a").unwrap();
    assert!(interp.is_active("a_done"));
    assert!(interp.is_active("P"));

    interp.submit("finish_b").unwrap();
    assert_eq!(interp.active_states(false), vec!["all"]);
}

#[test]
fn test_top_level_final_runs_exit_handlers() {
    let mut b = DocumentBuilder::new("m");
    let s = b.state("s");
    let end = b.final_state("end");
    let bye = b.log("exit", "end");
    b.on_exit(end, vec![bye]);
    b.transition(s).on("quit").target(end).add();
    let (mut interp, observer) = started(b.build().unwrap());

    interp.submit("quit").unwrap();
    assert_eq!(interp.phase(), Phase::Finished);
    assert_eq!(observer.logs(), vec!["exit: end"]);
    assert_eq!(observer.notifications().last(), Some(&Notification::Finished));
}

// ============================================================================
// History
// ============================================================================

#[test]
fn test_deep_history_round_trip() {
    let mut b = DocumentBuilder::new("m");
    let work = b.state("work");
    let h = b.history_in(work, "h", HistoryKind::Deep);
    let p = b.parallel_in(work, "P");
    let ra = b.state_in(p, "A");
    let a1 = b.state_in(ra, "a1");
    let a2 = b.state_in(ra, "a2");
    let rb = b.state_in(p, "B");
    let b1 = b.state_in(rb, "b1");
    let b2 = b.state_in(rb, "b2");
    let pause = b.state("pause");
    b.initial(h).target(p).add();
    b.transition(a1).on("step_a").target(a2).add();
    b.transition(b1).on("step_b").target(b2).add();
    b.transition(work).on("pause").target(pause).add();
    b.transition(pause).on("resume").target(h).add();
    let (mut interp, _) = started(b.build().unwrap());

    interp.submit("step_a").unwrap();
    interp.submit("step_b").unwrap();
    assert_eq!(interp.active_states(true), vec!["a2", "b2"]);

    interp.submit("pause").unwrap();
    assert_eq!(interp.active_states(false), vec!["pause"]);

    interp.submit("resume").unwrap();
    assert_eq!(interp.active_states(true), vec!["a2", "b2"]);
    assert!(interp.configuration().check_legal(interp.document()).is_ok());
}

#[test]
fn test_shallow_history_restores_child_with_default_entry_below() {
    let mut b = DocumentBuilder::new("m");
    let outer = b.state("outer");
    let h = b.history_in(outer, "h", HistoryKind::Shallow);
    let first = b.state_in(outer, "first");
    let second = b.state_in(outer, "second");
    b.state_in(second, "s1");
    let s2 = b.state_in(second, "s2");
    let away = b.state("away");
    b.initial(h).target(first).add();
    b.transition(first).on("next").target(s2).add();
    b.transition(outer).on("leave").target(away).add();
    b.transition(away).on("back").target(h).add();
    let (mut interp, _) = started(b.build().unwrap());

    interp.submit("leave").unwrap();
    interp.submit("back").unwrap();
    assert_eq!(interp.active_states(true), vec!["first"]);

    interp.submit("next").unwrap();
    assert_eq!(interp.active_states(true), vec!["s2"]);
    interp.submit("leave").unwrap();
    interp.submit("back").unwrap();
    // Shallow history remembers `second`, which re-enters its default child.
    assert_eq!(interp.active_states(true), vec!["s1"]);
}

// ============================================================================
// Delayed sends
// ============================================================================

fn delayed_chart(cancel_on_abort: bool) -> Document {
    let mut b = DocumentBuilder::new("m");
    let s1 = b.state("s1");
    let s2 = b.state("s2");
    let send = b.send(SendInfo {
        event: Some("tick".into()),
        id: Some("t1".into()),
        delay: Some("50ms".into()),
        ..Default::default()
    });
    b.on_entry(s1, vec![send]);
    b.transition(s1).on("tick").target(s2).add();
    let abort = if cancel_on_abort {
        vec![b.cancel("t1")]
    } else {
        Vec::new()
    };
    b.transition(s1).on("abort").content(abort).add();
    b.build().unwrap()
}

#[test]
fn test_delayed_send_fires() {
    let (mut interp, _) = started(delayed_chart(false));
    assert_eq!(interp.pending_delayed_events(), 1);
    assert!(interp.next_deadline().is_some());

    interp.fire_due_timers(Instant::now()).unwrap();
    assert!(interp.is_active("s1"));

    interp.fire_due_timers(later(100)).unwrap();
    assert!(interp.is_active("s2"));
    assert_eq!(interp.pending_delayed_events(), 0);
}

#[test]
fn test_cancelled_delayed_send_never_delivered() {
    let (mut interp, observer) = started(delayed_chart(true));
    interp.submit("abort").unwrap();
    assert_eq!(interp.pending_delayed_events(), 0);
    observer.take();

    interp.fire_due_timers(later(1000)).unwrap();
    assert!(interp.is_active("s1"));
    assert!(!observer
        .take()
        .iter()
        .any(|n| matches!(n, Notification::Entered(_))));
}

#[test]
fn test_cancel_delayed_event_from_api() {
    let (mut interp, _) = started(delayed_chart(false));
    assert!(interp.cancel_delayed_event("t1"));
    assert!(!interp.cancel_delayed_event("t1"));
    interp.fire_due_timers(later(1000)).unwrap();
    assert!(interp.is_active("s1"));
}

#[test]
fn test_delayed_sends_fire_in_due_order() {
    let mut b = DocumentBuilder::new("m");
    let s = b.state("s");
    let slow = b.send(SendInfo {
        event: Some("slow".into()),
        delay: Some("200ms".into()),
        ..Default::default()
    });
    let fast = b.send(SendInfo {
        event: Some("fast".into()),
        delay: Some("100ms".into()),
        ..Default::default()
    });
    b.on_entry(s, vec![slow, fast]);
    let got_fast = b.log("got", "fast");
    let got_slow = b.log("got", "slow");
    b.transition(s).on("fast").content(vec![got_fast]).add();
    b.transition(s).on("slow").content(vec![got_slow]).add();
    let (mut interp, observer) = started(b.build().unwrap());

    interp.fire_due_timers(later(500)).unwrap();
    assert_eq!(observer.logs(), vec!["got: fast", "got: slow"]);
}

// ============================================================================
// Executable content errors
// ============================================================================

#[test]
fn test_foreach_failure_on_second_element() {
    let mut b = DocumentBuilder::new("m");
    b.data_model(DataModelKind::Json);
    let root = b.root();
    b.data(
        root,
        &[
            ("items", Some("[{\"v\": 1}, null, {\"v\": 3}]")),
            ("sum", Some("0")),
            ("visited", Some("0")),
        ],
    );
    let s = b.state("s");
    let failed = b.state("failed");
    let count = b.assign("visited", "visited + 1");
    let add = b.assign("sum", "sum + item.v");
    let each = b.foreach("items", "item", Some("i"), vec![count, add]);
    b.on_entry(s, vec![each]);
    b.transition(s).on("error.execution").target(failed).add();
    let (interp, _) = started(b.build().unwrap());

    assert!(interp.is_active("failed"));
    assert_eq!(interp.data_model().property("sum"), Some(json!(1)));
    assert_eq!(interp.data_model().property("visited"), Some(json!(2)));
}

#[test]
fn test_failed_condition_raises_error_and_counts_as_false() {
    let mut b = DocumentBuilder::new("m");
    b.data_model(DataModelKind::Json);
    let s = b.state("s");
    let bad = b.state("bad");
    let errored = b.state("errored");
    b.transition(s).on("go").cond("missing.field > 1").target(bad).add();
    b.transition(s).on("error.execution").target(errored).add();
    let (mut interp, _) = started(b.build().unwrap());

    interp.submit("go").unwrap();
    assert!(interp.is_active("errored"));
}

#[test]
fn test_bad_send_target_raises_error_communication() {
    let mut b = DocumentBuilder::new("m");
    let s = b.state("s");
    let failed = b.state("failed");
    let send = b.send(send_to("nowhere", "#_bogus"));
    let never = b.log("never", "reached");
    b.on_entry(s, vec![send, never]);
    b.transition(s).on("error.communication").target(failed).add();
    let (interp, observer) = started(b.build().unwrap());

    assert!(interp.is_active("failed"));
    assert!(observer.logs().is_empty());
}

#[test]
fn test_send_to_parent_without_parent_is_dropped() {
    let mut b = DocumentBuilder::new("m");
    let s = b.state("s");
    let ok = b.state("ok");
    let bad = b.state("bad");
    let send = b.send(send_to("hello", "#_parent"));
    let after = b.raise("after");
    b.on_entry(s, vec![send, after]);
    b.transition(s).on("after").target(ok).add();
    b.transition(s).on("error.communication").target(bad).add();
    let (interp, _) = started(b.build().unwrap());

    assert_eq!(interp.active_states(false), vec!["ok"]);
}

#[test]
fn test_null_data_model_rejects_assignment() {
    let mut b = DocumentBuilder::new("m");
    let s = b.state("s");
    let t = b.state("t");
    let assign = b.assign("x", "1");
    b.transition(s).on("go").target(t).content(vec![assign]).add();
    let (mut interp, observer) = started(b.build().unwrap());

    let err = interp.submit("go").unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedOperation { .. }));
    assert!(err.is_fatal());
    assert_eq!(interp.phase(), Phase::Finished);
    assert_eq!(observer.notifications().last(), Some(&Notification::Finished));
}

#[test]
fn test_submit_error_reaches_transitions() {
    let mut b = DocumentBuilder::new("m");
    let s = b.state("s");
    let t = b.state("t");
    b.transition(s).on("error.platform").target(t).add();
    let (mut interp, _) = started(b.build().unwrap());

    interp
        .submit_error("platform", "disk on fire", None)
        .unwrap();
    assert!(interp.is_active("t"));
}

#[test]
fn test_event_payload_visible_to_conditions() {
    let mut b = DocumentBuilder::new("m");
    b.data_model(DataModelKind::Json);
    let s = b.state("s");
    let big = b.state("big");
    let small = b.state("small");
    b.transition(s).on("n").cond("_event.data.value > 10").target(big).add();
    b.transition(s).on("n").target(small).add();
    let doc = b.build().unwrap();

    let (mut interp, _) = started(doc.clone());
    interp.submit_with_data("n", json!({"value": 11})).unwrap();
    assert!(interp.is_active("big"));

    let (mut interp, _) = started(doc);
    interp.submit_with_data("n", json!({"value": 3})).unwrap();
    assert!(interp.is_active("small"));
}

// ============================================================================
// Event filter
// ============================================================================

#[test]
fn test_event_filter_discards_rejected_external_events() {
    let mut b = DocumentBuilder::new("m");
    b.data_model(DataModelKind::Json);
    let s = b.state("s");
    let t = b.state("t");
    let blocked = b.state("blocked");
    let internal = b.state("internal");
    let raise = b.raise("blocked.inside");
    b.on_entry(t, vec![raise]);
    b.transition(s).on("blocked").target(blocked).add();
    b.transition(s).on("go").target(t).add();
    b.transition(t).on("blocked").target(internal).add();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let filter = move |event: &Event| {
        counter.fetch_add(1, Ordering::SeqCst);
        !event.name.starts_with("blocked")
    };
    let mut interp = Interpreter::builder(b.build().unwrap())
        .with_event_filter(Arc::new(filter))
        .build()
        .unwrap();
    interp.start().unwrap();

    interp
        .submit_event(Event::new("blocked").with_data(json!({"x": 1})))
        .unwrap();
    assert!(interp.is_active("s"));
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    // Internal events never reach the filter.
    interp.submit("go").unwrap();
    assert!(interp.is_active("internal"));
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Binding
// ============================================================================

fn binding_chart(binding: BindingMode) -> Document {
    let mut b = DocumentBuilder::new("m");
    b.data_model(DataModelKind::Json);
    b.binding(binding);
    let s1 = b.state("s1");
    let s2 = b.state("s2");
    b.data(s2, &[("x", Some("5"))]);
    b.transition(s1).on("go").target(s2).add();
    b.build().unwrap()
}

#[test]
fn test_early_binding_initializes_everything_at_start() {
    let (interp, _) = started(binding_chart(BindingMode::Early));
    assert_eq!(interp.data_model().property("x"), Some(json!(5)));
}

#[test]
fn test_late_binding_initializes_on_first_entry() {
    let (mut interp, _) = started(binding_chart(BindingMode::Late));
    assert!(!interp.data_model().has_property("x"));
    interp.submit("go").unwrap();
    assert_eq!(interp.data_model().property("x"), Some(json!(5)));
}

#[test]
fn test_config_binding_overrides_document() {
    let observer = Arc::new(RecordingObserver::new());
    let mut interp = Interpreter::builder(binding_chart(BindingMode::Early))
        .with_config(InterpreterConfig::default().with_binding(BindingMode::Late))
        .with_observer(observer)
        .build()
        .unwrap();
    interp.start().unwrap();
    assert!(!interp.data_model().has_property("x"));
}

// ============================================================================
// Invoke
// ============================================================================

/// Child that reports `ready`, answers `ping` with `pong` and finishes on
/// `finish` with `{"result": 42}`.
fn child_chart() -> Arc<Document> {
    let mut b = DocumentBuilder::new("child");
    let idle = b.state("idle");
    let end = b.final_state("end");
    let ready = b.send(send_to("ready", "#_parent"));
    b.on_entry(idle, vec![ready]);
    let pong = b.send(send_to("pong", "#_parent"));
    b.transition(idle).on("ping").content(vec![pong]).add();
    b.transition(idle).on("finish").target(end).add();
    b.done_data(
        end,
        DoneDataInfo {
            content: Some(json!({"result": 42})),
            ..Default::default()
        },
    );
    Arc::new(b.build().unwrap())
}

#[test]
fn test_invoke_round_trip_with_finalize_and_done() {
    let mut b = DocumentBuilder::new("parent");
    b.data_model(DataModelKind::Json);
    let root = b.root();
    b.data(root, &[("heard", Some("0")), ("result", None)]);
    let running = b.state("running");
    let after = b.state("after");

    let bump = b.assign("heard", "heard + 1");
    let finalize = b.container(vec![bump]);
    let mut invoke = InvokeInfo::new(InvokeSource::Scxml {
        document: child_chart(),
    });
    invoke.id = Some("kid".into());
    invoke.finalize = Some(finalize);
    b.invoke(running, invoke);

    let ping = b.send(send_to("ping", "#_kid"));
    let finish = b.send(send_to("finish", "#_kid"));
    let keep = b.assign("result", "_event.data.result");
    b.transition(running).on("go").content(vec![ping]).add();
    b.transition(running).on("stop").content(vec![finish]).add();
    b.transition(running)
        .on("done.invoke.kid")
        .target(after)
        .content(vec![keep])
        .add();
    let (mut interp, observer) = started(b.build().unwrap());

    assert_eq!(interp.running_invokes(), vec!["kid"]);
    // `ready` arrived during start.
    assert_eq!(interp.data_model().property("heard"), Some(json!(1)));

    interp.submit("go").unwrap();
    assert_eq!(interp.data_model().property("heard"), Some(json!(2)));

    interp.submit("stop").unwrap();
    assert!(interp.is_active("after"));
    assert_eq!(interp.data_model().property("heard"), Some(json!(3)));
    assert_eq!(interp.data_model().property("result"), Some(json!(42)));
    assert!(interp.running_invokes().is_empty());

    let notes = observer.notifications();
    assert!(notes.contains(&Notification::InvokeStarted("kid".into())));
    assert!(notes.contains(&Notification::InvokeStopped("kid".into())));
}

#[test]
fn test_autoforward_skips_events_from_the_invoke() {
    let mut child = DocumentBuilder::new("echo");
    let listen = child.state("listen");
    let echo = child.send(send_to("echo", "#_parent"));
    child.transition(listen).on("shout").content(vec![echo]).add();
    let child = Arc::new(child.build().unwrap());

    let mut b = DocumentBuilder::new("parent");
    let waiting = b.state("waiting");
    let echoed = b.state_in(waiting, "echoed");
    let quiet = b.state_in(waiting, "quiet");
    b.initial(waiting).target(quiet).add();
    let mut invoke = InvokeInfo::new(InvokeSource::Scxml { document: child });
    invoke.id = Some("kid".into());
    invoke.autoforward = true;
    b.invoke(waiting, invoke);
    let count = b.log("echo", "heard");
    b.transition(quiet).on("echo").target(echoed).content(vec![count]).add();
    let (mut interp, observer) = started(b.build().unwrap());

    interp.submit("shout").unwrap();
    assert!(interp.is_active("echoed"));
    // One echo only: the echo itself is not forwarded back.
    assert_eq!(observer.logs(), vec!["echo: heard"]);
}

#[test]
fn test_leaving_state_cancels_invoke_without_done_event() {
    let mut b = DocumentBuilder::new("parent");
    let running = b.state("running");
    let elsewhere = b.state("elsewhere");
    let wrong = b.state("wrong");
    let mut invoke = InvokeInfo::new(InvokeSource::Scxml {
        document: child_chart(),
    });
    invoke.id = Some("kid".into());
    b.invoke(running, invoke);
    b.transition(running).on("leave").target(elsewhere).add();
    b.transition(elsewhere).on("done.invoke.kid").target(wrong).add();
    let (mut interp, observer) = started(b.build().unwrap());

    interp.submit("leave").unwrap();
    assert!(interp.is_active("elsewhere"));
    assert!(interp.running_invokes().is_empty());
    assert!(observer
        .notifications()
        .contains(&Notification::InvokeStopped("kid".into())));

    interp.process_pending().unwrap();
    assert!(interp.is_active("elsewhere"));
}

#[test]
fn test_state_left_in_same_macrostep_never_invokes() {
    let mut b = DocumentBuilder::new("parent");
    let transient = b.state("transient");
    let settled = b.state("settled");
    let mut invoke = InvokeInfo::new(InvokeSource::Scxml {
        document: child_chart(),
    });
    invoke.id = Some("kid".into());
    b.invoke(transient, invoke);
    b.transition(transient).target(settled).add();
    let (interp, observer) = started(b.build().unwrap());

    assert!(interp.is_active("settled"));
    assert!(!observer
        .notifications()
        .iter()
        .any(|n| matches!(n, Notification::InvokeStarted(_))));
}

#[test]
fn test_generated_invoke_id_uses_state_prefix() {
    let mut b = DocumentBuilder::new("parent");
    b.data_model(DataModelKind::Json);
    let root = b.root();
    b.data(root, &[("handle", None)]);
    let running = b.state("running");
    let mut invoke = InvokeInfo::new(InvokeSource::Scxml {
        document: child_chart(),
    });
    invoke.id_location = Some("handle".into());
    b.invoke(running, invoke);
    let (interp, _) = started(b.build().unwrap());

    let ids = interp.running_invokes();
    assert_eq!(ids.len(), 1);
    assert!(ids[0].starts_with("running."));
    assert_eq!(interp.data_model().property("handle"), Some(json!(ids[0].as_str())));
}

struct Echo {
    id: String,
    parent: EventSender,
}

impl InvokableService for Echo {
    fn id(&self) -> &str {
        &self.id
    }

    fn post_event(&mut self, event: Event) -> bool {
        self.parent.send(
            Event::new(format!("echo.{}", event.name))
                .with_data(event.data)
                .with_invoke_id(self.id.clone()),
        )
    }

    fn cancel(&mut self) {}
}

struct EchoFactory;

impl ServiceFactory for EchoFactory {
    fn create(&self, request: InvokeRequest) -> Result<Box<dyn InvokableService>, String> {
        Ok(Box::new(Echo {
            id: request.invoke_id,
            parent: request.parent,
        }))
    }
}

#[test]
fn test_registered_service_factory() {
    let services = Arc::new(ServiceRegistry::new());
    services.register("echo", Arc::new(EchoFactory));

    let mut b = DocumentBuilder::new("parent");
    let s = b.state("s");
    let t = b.state("t");
    let mut invoke = InvokeInfo::new(InvokeSource::Service {
        service_type: "echo".into(),
        src: None,
    });
    invoke.id = Some("svc".into());
    b.invoke(s, invoke);
    let hello = b.send(send_to("hello", "#_svc"));
    b.transition(s).on("go").content(vec![hello]).add();
    b.transition(s).on("echo.hello").target(t).add();
    let (mut interp, _) = started_with(b.build().unwrap(), services);

    interp.submit("go").unwrap();
    assert!(interp.is_active("t"));
}

#[test]
fn test_unknown_service_type_raises_error_execution() {
    let mut b = DocumentBuilder::new("parent");
    let s = b.state("s");
    let broken = b.state("broken");
    let invoke = InvokeInfo::new(InvokeSource::Service {
        service_type: "carrier-pigeon".into(),
        src: None,
    });
    b.invoke(s, invoke);
    b.transition(s).on("error.execution").target(broken).add();
    let (interp, _) = started(b.build().unwrap());

    assert!(interp.is_active("broken"));
    assert!(interp.running_invokes().is_empty());
}

#[test]
fn test_child_delayed_send_reaches_parent() {
    let mut child = DocumentBuilder::new("child");
    let wait = child.state("wait");
    let end = child.final_state("end");
    let send = child.send(SendInfo {
        event: Some("alarm".into()),
        target: Some("#_parent".into()),
        delay: Some("20ms".into()),
        ..Default::default()
    });
    child.on_entry(wait, vec![send]);
    child.transition(wait).on("never").target(end).add();
    let child = Arc::new(child.build().unwrap());

    let mut b = DocumentBuilder::new("parent");
    let s = b.state("s");
    let woke = b.state("woke");
    let mut invoke = InvokeInfo::new(InvokeSource::Scxml { document: child });
    invoke.id = Some("kid".into());
    b.invoke(s, invoke);
    b.transition(s).on("alarm").target(woke).add();
    let (mut interp, _) = started(b.build().unwrap());

    assert!(interp.next_deadline().is_some());
    assert_eq!(interp.pending_delayed_events(), 0);
    interp.fire_due_timers(later(50)).unwrap();
    assert!(interp.is_active("woke"));
}
