use super::*;
use crate::config::{EmitterConfig, UNLIMITED_LISTENERS};
use crate::error::EmitterError;
use crate::priority::{PRIORITY_DEFAULT, PRIORITY_HIGHEST};
use crate::scheduler::ManualScheduler;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn push(log: &Log, entry: &str) -> impl Fn(&Value) + Send + Sync + 'static {
    let log = log.clone();
    let entry = entry.to_string();
    move |_: &Value| log.lock().unwrap().push(entry.clone())
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = count.clone();
    (count, move |_: &Value| {
        inner.fetch_add(1, Ordering::SeqCst);
    })
}

/// Records the name of every event `emitter` emits, through the meta-event.
fn record_emitted(emitter: &EventEmitter) -> Log {
    let log = new_log();
    let sink = log.clone();
    emitter.on(EVENT_EMITTED, move |payload: &Value| {
        let name = payload[0].as_str().unwrap_or_default().to_string();
        sink.lock().unwrap().push(name);
    });
    log
}

fn manual_emitter(kind: &str, scheduler: &Arc<ManualScheduler>) -> Arc<EventEmitter> {
    EventEmitter::builder(kind).scheduler(scheduler.clone()).build()
}

#[test]
fn test_priority_order_and_emitted_counter() {
    let emitter = EventEmitter::new("app");
    let log = new_log();
    let data_seen = new_log();

    let sink = data_seen.clone();
    emitter.on_with(
        "go",
        move |data: &Value| sink.lock().unwrap().push(data.to_string()),
        ListenerOptions::new().priority(PRIORITY_DEFAULT),
    );
    emitter.on_with("go", push(&log, "L2"), ListenerOptions::new().priority(500));
    emitter.on_with("go", push(&log, "L1"), ListenerOptions::new().priority(PRIORITY_HIGHEST));
    emitter.on_with("go", push(&log, "L3"), ListenerOptions::new().priority(500));

    emitter.emit_event(["go"], &json!({"v": 1}));

    assert_eq!(entries(&log), vec!["L1", "L2", "L3"]);
    assert_eq!(entries(&data_seen), vec![r#"{"v":1}"#]);
    assert_eq!(emitter.emitted("go"), 1);
}

#[test]
fn test_emit_without_listeners_is_noop() {
    let emitter = EventEmitter::new("app");
    emitter.emit("nothing", &Value::Null);
    assert_eq!(emitter.emitted("nothing"), 0);
    assert!(!emitter.has_event("nothing"));
}

#[test]
fn test_once_listener_runs_once() {
    let emitter = EventEmitter::new("app");
    let (count, listener) = counter();
    let key = emitter.once("go", listener);

    emitter.emit("go", &Value::Null);
    emitter.emit("go", &Value::Null);

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!emitter.has_listener(&key));
    assert!(!emitter.has_event("go"));
}

#[test]
fn test_times_listener_runs_exactly_n_times() {
    let emitter = EventEmitter::new("app");
    let (count, listener) = counter();
    let key = emitter.add_listener_times("go", listener, 3);

    for _ in 0..5 {
        emitter.emit("go", &Value::Null);
    }

    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert!(!emitter.has_listener(&key));
    assert_eq!(emitter.remove_listener(&key), 0);
}

#[test]
fn test_zero_times_registers_nothing() {
    let emitter = EventEmitter::new("app");
    let (count, listener) = counter();
    let key = emitter.add_listener_times("go", listener, 0);

    emitter.emit("go", &Value::Null);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(!emitter.has_listener(&key));
}

#[test]
fn test_remove_listener_by_key_spans_events() {
    let emitter = EventEmitter::new("app");
    let (count, listener) = counter();
    let listener: Arc<ListenerFn> = Arc::new(listener);
    let (other_count, other) = counter();
    let other: Arc<ListenerFn> = Arc::new(other);

    let key = emitter.add_listener(
        ["open", "close"],
        vec![listener.clone(), other.clone()],
        ListenerOptions::default(),
    );
    let keep = emitter.on("close", |_: &Value| {});

    assert_eq!(emitter.listener_count("close"), 3);
    assert_eq!(emitter.remove_listener(&key), 4);

    assert!(!emitter.has_event("open"));
    assert_eq!(emitter.listener_count("close"), 1);
    assert!(emitter.has_listener(&keep));

    emitter.emit_event(["open", "close"], &Value::Null);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(other_count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_removing_unknown_key_is_harmless() {
    let emitter = EventEmitter::new("app");
    let key = emitter.on("go", |_: &Value| {});

    assert_eq!(emitter.remove_listener(&ListenerKey::new("never_registered")), 0);
    assert!(emitter.has_listener(&key));
    assert_eq!(emitter.listener_count("go"), 1);
}

#[test]
fn test_reused_key_groups_registrations() {
    let emitter = EventEmitter::new("app");
    let group = ListenerKey::new("group");
    emitter.on_with("a", |_: &Value| {}, ListenerOptions::new().key(group.clone()));
    emitter.on_with("b", |_: &Value| {}, ListenerOptions::new().key(group.clone()));

    assert_eq!(emitter.remove_listener(&group), 2);
    assert!(emitter.events().is_empty());
}

#[test]
fn test_remove_listener_fn_by_identity_and_priority() {
    let emitter = EventEmitter::new("app");
    let (count, listener) = counter();
    let listener: Arc<ListenerFn> = Arc::new(listener);

    emitter.add_listener(["go"], vec![listener.clone()], ListenerOptions::new().priority(100));
    emitter.add_listener(["go"], vec![listener.clone()], ListenerOptions::new().priority(500));
    emitter.on("go", |_: &Value| {});

    assert_eq!(emitter.remove_listener_fn(&listener, Some(100)), 1);
    assert_eq!(emitter.listener_count("go"), 2);

    emitter.emit("go", &Value::Null);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    assert_eq!(emitter.remove_listener_fn(&listener, None), 1);
    assert_eq!(emitter.listener_count("go"), 1);
}

#[test]
fn test_remove_event_drops_all_listeners() {
    let emitter = EventEmitter::new("app");
    emitter.on("go", |_: &Value| {});
    emitter.on("go", |_: &Value| {});
    emitter.on("stay", |_: &Value| {});

    assert_eq!(emitter.remove_event(["go", "missing"]), 2);
    assert!(!emitter.has_event("go"));
    assert!(emitter.has_event("stay"));
}

#[test]
fn test_emission_uses_listener_snapshot() {
    let emitter = EventEmitter::new("app");
    let log = new_log();
    let late_key = ListenerKey::new("late");

    let weak = Arc::downgrade(&emitter);
    let late = late_key.clone();
    let added_log = log.clone();
    emitter.on_with(
        "go",
        move |_: &Value| {
            if let Some(emitter) = weak.upgrade() {
                emitter.remove_listener(&late);
                let sink = added_log.clone();
                emitter.on("go", move |_: &Value| sink.lock().unwrap().push("added".into()));
            }
        },
        ListenerOptions::new().priority(PRIORITY_HIGHEST),
    );
    emitter.on_with("go", push(&log, "late"), ListenerOptions::new().key(late_key));

    emitter.emit("go", &Value::Null);
    assert_eq!(entries(&log), vec!["late"]);

    log.lock().unwrap().clear();
    emitter.emit("go", &Value::Null);
    assert_eq!(entries(&log), vec!["added"]);
}

#[test]
fn test_event_emitted_meta_event() {
    let emitter = EventEmitter::new("app");
    let payloads = new_log();
    let sink = payloads.clone();
    emitter.on(EVENT_EMITTED, move |payload: &Value| {
        sink.lock().unwrap().push(payload.to_string())
    });

    emitter.emit("go", &json!({"v": 1}));

    assert_eq!(entries(&payloads), vec![json!(["go", {"v": 1}]).to_string()]);
    assert_eq!(emitter.emitted(EVENT_EMITTED), 1);
    assert_eq!(emitter.emitted("go"), 0);
}

#[test]
fn test_emit_event_then_calls_final_callback_once() {
    let emitter = EventEmitter::new("app");
    let log = new_log();
    emitter.on("a", push(&log, "a"));
    emitter.on("b", push(&log, "b"));

    let sink = log.clone();
    emitter.emit_event_then(["a", "b"], &Value::Null, move |names| {
        let joined: Vec<&str> = names.iter().map(|name| name.as_str()).collect();
        sink.lock().unwrap().push(format!("done:{}", joined.join(",")));
    });

    assert_eq!(entries(&log), vec!["a", "b", "done:a,b"]);
}

#[test]
fn test_listener_limit_only_warns() {
    let emitter = EventEmitter::new("app");
    emitter.set_limit("go", 1);
    assert_eq!(emitter.limit("go"), 1);
    assert_eq!(emitter.limit("other"), 10);

    for _ in 0..3 {
        emitter.on("go", |_: &Value| {});
    }
    assert_eq!(emitter.listener_count("go"), 3);
}

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn count(&self, needle: &str) -> usize {
        String::from_utf8_lossy(&self.0.lock().unwrap()).matches(needle).count()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn with_captured_logs(f: impl FnOnce()) -> CapturedLogs {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    logs
}

const LEAK_WARNING: &str = "Possible listener leak";

#[test]
fn test_listener_limit_warns_past_default() {
    let emitter = EventEmitter::new("app");
    assert_eq!(emitter.limit("go"), 10);

    let logs = with_captured_logs(|| {
        for _ in 0..10 {
            emitter.on("go", |_: &Value| {});
        }
    });
    assert_eq!(logs.count(LEAK_WARNING), 0);

    let logs = with_captured_logs(|| {
        emitter.on("go", |_: &Value| {});
    });
    assert_eq!(logs.count(LEAK_WARNING), 1);
    assert_eq!(logs.count("'go'"), 1);
    assert_eq!(emitter.listener_count("go"), 11);
}

#[test]
fn test_unlimited_listeners_never_warn() {
    let emitter = EventEmitter::new("app");
    emitter.set_limit("go", UNLIMITED_LISTENERS);

    let logs = with_captured_logs(|| {
        for _ in 0..20 {
            emitter.on("go", |_: &Value| {});
        }
    });
    assert_eq!(logs.count(LEAK_WARNING), 0);
    assert_eq!(emitter.listener_count("go"), 20);
}

#[test]
fn test_async_listener_outside_runtime_runs_after_emit() {
    let emitter = EventEmitter::builder("app")
        .config(EmitterConfig {
            async_delay_ms: 20,
            ..EmitterConfig::default()
        })
        .build();
    let log = new_log();
    let (tx, rx) = std::sync::mpsc::channel();

    let sink = log.clone();
    emitter.on_with(
        "go",
        move |_: &Value| {
            sink.lock().unwrap().push("async_hi".to_string());
            let _ = tx.send(());
        },
        ListenerOptions::new().priority(PRIORITY_HIGHEST).is_async(true),
    );
    emitter.on("go", push(&log, "sync_lo"));

    emitter.emit("go", &Value::Null);
    log.lock().unwrap().push("after_emit".to_string());
    assert_eq!(entries(&log), vec!["sync_lo", "after_emit"]);

    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(entries(&log), vec!["sync_lo", "after_emit", "async_hi"]);
}

#[test]
fn test_async_listener_runs_through_scheduler() {
    let scheduler = Arc::new(ManualScheduler::new());
    let emitter = manual_emitter("app", &scheduler);
    let log = new_log();

    emitter.on_async("go", push(&log, "async"));
    emitter.on("go", push(&log, "sync"));

    emitter.emit("go", &Value::Null);
    assert_eq!(entries(&log), vec!["sync"]);
    assert_eq!(scheduler.pending(), 1);

    assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
    assert_eq!(entries(&log), vec!["sync", "async"]);
}

#[test]
fn test_async_once_listener_runs_once() {
    let scheduler = Arc::new(ManualScheduler::new());
    let emitter = manual_emitter("app", &scheduler);
    let (count, listener) = counter();

    emitter.on_with("go", listener, ListenerOptions::new().once().is_async(true));
    emitter.emit("go", &Value::Null);
    emitter.emit("go", &Value::Null);
    scheduler.run_pending();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!emitter.has_event("go"));
}

#[test]
fn test_reset_events_keeps_followers() {
    let source = EventEmitter::new("dialog");
    let follower = EventEmitter::new("app");
    source.attach_hard(&follower, AttachOptions::new()).unwrap();
    source.on("go", |_: &Value| {});
    source.emit("go", &Value::Null);

    source.reset_events();

    assert!(source.events().is_empty());
    assert_eq!(source.emitted("go"), 0);
    assert!(source.is_followed_by(follower.id()));
}

#[test]
fn test_attach_cascade_delivers_seven_events() {
    let scheduler = Arc::new(ManualScheduler::new());
    let source = manual_emitter("dialog", &scheduler);
    let follower = manual_emitter("app", &scheduler);
    let emitted = record_emitted(&follower);
    let payloads = new_log();
    let sink = payloads.clone();
    follower.on(NOTICED, move |payload: &Value| sink.lock().unwrap().push(payload.to_string()));

    assert!(source.attach(&follower, AttachOptions::new()).unwrap());
    assert!(source.is_followed_by(follower.id()));
    assert!(follower.is_following(source.id()));

    source.emit("x", &json!({"v": 1}));
    assert!(entries(&emitted).is_empty());
    scheduler.run_pending();

    let id = source.id();
    assert_eq!(
        entries(&emitted),
        vec![
            format!("{id}.x"),
            "dialog.x".to_string(),
            format!("noticed.{id}.x"),
            format!("noticed.{id}"),
            "noticed.dialog.x".to_string(),
            "noticed.dialog".to_string(),
            "noticed".to_string(),
        ]
    );
    let expected = json!({"id": id, "type": "dialog", "event": "x", "data": {"v": 1}});
    assert_eq!(entries(&payloads), vec![expected.to_string()]);
}

#[test]
fn test_attach_handshake_is_symmetric_and_idempotent() {
    let source = EventEmitter::new("dialog");
    let follower = EventEmitter::new("app");

    assert!(follower.attach_to(&source, AttachOptions::new().only(["x"])).unwrap());
    assert!(source.is_followed_by(follower.id()));
    assert!(!source.attach(&follower, AttachOptions::new()).unwrap());
    assert!(!follower.attach_to(&source, AttachOptions::new()).unwrap());

    let following = follower.following();
    assert_eq!(following.len(), 1);
    assert_eq!(following[0].id, source.id());
    assert_eq!(following[0].kind, "dialog");
    assert_eq!(following[0].only, vec!["x"]);
    assert_eq!(source.followers(), vec![CompactString::new(follower.id())]);
}

#[test]
fn test_mimic_reemits_event_instead_of_cascade() {
    let source = EventEmitter::new("dialog");
    let follower = EventEmitter::new("app");
    let emitted = record_emitted(&follower);
    let data_seen = new_log();
    let sink = data_seen.clone();
    follower.on("x", move |data: &Value| sink.lock().unwrap().push(data.to_string()));

    follower.mimic(["x"]);
    assert!(follower.is_mimic("x"));
    source.attach_hard(&follower, AttachOptions::new()).unwrap();

    source.emit("x", &json!({"v": 2}));
    assert_eq!(entries(&emitted), vec!["x"]);
    assert_eq!(entries(&data_seen), vec![r#"{"v":2}"#]);
}

#[test]
fn test_mimic_by_source_type() {
    let source = EventEmitter::new("dialog");
    let follower = EventEmitter::new("app");
    let emitted = record_emitted(&follower);
    source.attach_hard(&follower, AttachOptions::new()).unwrap();

    follower.mimic(["dialog.*"]);
    source.emit("open", &Value::Null);
    assert_eq!(entries(&emitted), vec!["open"]);

    follower.unmimic(["dialog.*"]);
    follower.mimic(["dialog.close"]);
    emitted.lock().unwrap().clear();
    source.emit("close", &Value::Null);
    source.emit("open", &Value::Null);

    let names = entries(&emitted);
    assert_eq!(names[0], "close");
    assert_eq!(names.len(), 1 + 7);
    assert_eq!(names.last().map(String::as_str), Some(NOTICED));
}

#[test]
fn test_only_and_excepts_filters() {
    let source = EventEmitter::new("dialog");
    let only_x = EventEmitter::new("app");
    let not_y = EventEmitter::new("app");
    let (only_count, only_listener) = counter();
    let (except_count, except_listener) = counter();
    only_x.on(NOTICED, only_listener);
    not_y.on(NOTICED, except_listener);

    source.attach_hard(&only_x, AttachOptions::new().only(["x"])).unwrap();
    source
        .attach_hard(&not_y, AttachOptions::new().excepts(["y"]))
        .unwrap();

    source.emit_event(["x", "y", "z"], &Value::Null);

    assert_eq!(only_count.load(Ordering::SeqCst), 1);
    assert_eq!(except_count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_notice_from_unfollowed_source_is_ignored() {
    let follower = EventEmitter::new("app");
    let emitted = record_emitted(&follower);
    follower.notice("stranger", "x", &Value::Null);
    assert!(entries(&emitted).is_empty());
}

#[test]
fn test_private_events_are_not_propagated() {
    let source = EventEmitter::new("dialog");
    let follower = EventEmitter::new("app");
    let (count, listener) = counter();
    follower.on(NOTICED, listener);
    source.attach_hard(&follower, AttachOptions::new()).unwrap();

    source.private_events(["secret"]);
    assert!(source.is_private("secret"));
    source.emit("secret", &Value::Null);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    source.public_events(["secret"]);
    source.emit("secret", &Value::Null);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_detach_removes_both_sides() {
    let source = EventEmitter::new("dialog");
    let follower = EventEmitter::new("app");
    let (count, listener) = counter();
    follower.on(NOTICED, listener);
    source.attach_hard(&follower, AttachOptions::new()).unwrap();

    assert!(follower.detach_from(&source).unwrap());
    assert!(!source.is_followed_by(follower.id()));
    assert!(!follower.is_following(source.id()));
    assert!(!source.detach(&follower).unwrap());

    source.emit("x", &Value::Null);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_attach_to_self_is_rejected() {
    let emitter = EventEmitter::new("app");
    let result = emitter.attach(&emitter, AttachOptions::new());
    assert!(matches!(result, Err(EmitterError::InvalidEmitter(_))));
    assert!(matches!(emitter.detach(&emitter), Err(EmitterError::InvalidEmitter(_))));
}

#[test]
fn test_attach_with_duplicate_id_is_rejected() {
    let first = EventEmitter::builder("app").id("same").build();
    let second = EventEmitter::builder("dialog").id("same").build();
    let result = first.attach_to(&second, AttachOptions::new());
    assert!(matches!(result, Err(EmitterError::InvalidEmitter(_))));
    assert!(!second.is_followed_by("same"));
}

#[test]
fn test_dropped_follower_is_pruned() {
    let source = EventEmitter::new("dialog");
    let follower = EventEmitter::new("app");
    let follower_id = follower.id().to_string();
    source.attach_hard(&follower, AttachOptions::new()).unwrap();
    drop(follower);

    source.emit("x", &Value::Null);
    assert!(!source.is_followed_by(&follower_id));
    assert!(source.followers().is_empty());
}

#[test]
fn test_follower_chain_propagates_hard_notices() {
    let button = EventEmitter::new("button");
    let dialog = EventEmitter::new("dialog");
    let app = EventEmitter::new("app");
    let (count, listener) = counter();
    app.on("dialog.click", listener);

    dialog.mimic(["button.*"]);
    button.attach_hard(&dialog, AttachOptions::new()).unwrap();
    dialog.attach_hard(&app, AttachOptions::new()).unwrap();

    button.emit("click", &Value::Null);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_generated_ids_embed_type() {
    let emitter = EventEmitter::new("dialog");
    assert!(emitter.id().starts_with("dialog_"));
    assert_eq!(emitter.kind(), "dialog");
    assert_ne!(emitter.id(), EventEmitter::new("dialog").id());
}

#[tokio::test]
async fn test_async_attach_with_tokio_scheduler() {
    let source = EventEmitter::new("dialog");
    let follower = EventEmitter::new("app");
    let (count, listener) = counter();
    follower.on(NOTICED, listener);
    source.attach(&follower, AttachOptions::new()).unwrap();

    source.emit("x", &Value::Null);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
