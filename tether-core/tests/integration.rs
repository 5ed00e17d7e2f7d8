//! Integration Tests for Reactive System
//!
//! These tests verify that containers, refs, effects, scopes, watchers and
//! the mutation gate work together correctly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use tether_core::{
    apply_patches, to_raw, undo_patches, ErrorPolicy, PatchOp, PropKey, Runtime, RuntimeConfig,
    Target, Value, WatchOptions, WatchSource,
};

type Log = Arc<Mutex<Vec<Value>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Wrapping is identity-stable and unwrapping returns the original target.
#[test]
fn wrap_is_identity_stable() {
    let rt = Runtime::new();
    let target = Target::object([("a", 1)]);

    let first = rt.wrap(&target);
    let second = rt.wrap(&target);
    assert!(first.ptr_eq(&second));

    let raw = to_raw(&Value::from(first));
    assert!(raw.as_target().unwrap().ptr_eq(&target));
}

/// A ref re-runs its effect only when the value actually changes.
#[test]
fn ref_triggers_only_on_change() {
    let rt = Runtime::new();
    let r = rt.create_ref(1);
    let seen = log();

    let (r_clone, seen_clone) = (r.clone(), seen.clone());
    let _effect = rt.effect(move || seen_clone.lock().push(r_clone.get()));
    assert_eq!(*seen.lock(), vec![Value::from(1)]);

    r.set(1);
    assert_eq!(seen.lock().len(), 1);

    r.set(2);
    assert_eq!(*seen.lock(), vec![Value::from(1), Value::from(2)]);
}

/// Branches inside an effect decide what it depends on next time.
#[test]
fn effect_resubscribes_on_each_run() {
    let rt = Runtime::new();
    let o = rt.wrap(&Target::object([
        ("flag", Value::from(true)),
        ("a", Value::from(1)),
        ("b", Value::from(2)),
    ]));
    let seen = log();

    let (o_clone, seen_clone) = (o.clone(), seen.clone());
    let _effect = rt.effect(move || {
        let flag = o_clone.get("flag").unwrap().as_bool().unwrap_or(false);
        let value = if flag {
            o_clone.get("a").unwrap()
        } else {
            o_clone.get("b").unwrap()
        };
        seen_clone.lock().push(value);
    });
    assert_eq!(*seen.lock(), vec![Value::from(1)]);

    rt.transaction(|| o.set("flag", false)).unwrap();
    assert_eq!(*seen.lock(), vec![Value::from(1), Value::from(2)]);

    // `a` is no longer read
    rt.transaction(|| o.set("a", 10)).unwrap();
    assert_eq!(seen.lock().len(), 2);

    rt.transaction(|| o.set("b", 20)).unwrap();
    assert_eq!(seen.lock().last(), Some(&Value::from(20)));
    assert_eq!(seen.lock().len(), 3);
}

/// A stopped effect never runs again.
#[test]
fn stopped_effect_ignores_writes() {
    let rt = Runtime::new();
    let o = rt.wrap(&Target::object([("a", 1)]));
    let r = rt.create_ref(0);
    let runs = Arc::new(AtomicUsize::new(0));

    let (o_clone, r_clone, runs_clone) = (o.clone(), r.clone(), runs.clone());
    let effect = rt.effect(move || {
        o_clone.get("a").unwrap();
        r_clone.get();
        runs_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    tether_core::stop(&effect);
    rt.transaction(|| o.set("a", 2)).unwrap();
    r.set(5);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!effect.is_active());
    assert_eq!(effect.dependency_count(), 0);
}

/// Stopping a scope stops its effects and runs its cleanups once.
#[test]
fn scope_stop_cascades() {
    let rt = Runtime::new();
    let r = rt.create_ref(0);
    let runs = Arc::new(AtomicUsize::new(0));
    let cleanups = Arc::new(AtomicUsize::new(0));

    let scope = rt.effect_scope(false);
    let effects = scope
        .run(|| {
            let nested = rt.effect_scope(false);
            let inner = nested.run(|| {
                let (r, runs) = (r.clone(), runs.clone());
                rt.effect(move || {
                    r.get();
                    runs.fetch_add(1, Ordering::SeqCst);
                })
            });

            let (r_clone, runs_clone) = (r.clone(), runs.clone());
            let outer = rt.effect(move || {
                r_clone.get();
                runs_clone.fetch_add(1, Ordering::SeqCst);
            });

            let counter = cleanups.clone();
            rt.on_scope_dispose(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            (outer, inner, nested)
        })
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    scope.stop();
    scope.stop();

    r.set(1);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert!(!effects.0.is_active());
    assert!(!effects.1.unwrap().is_active());
    assert!(!effects.2.is_active());
}

/// Writes outside a transaction are dropped; inside they land and fire once.
#[test]
fn mutation_gate_rejects_and_accepts() {
    let rt = Runtime::new();
    let o = rt.wrap(&Target::object([("a", 1)]));
    let seen = log();
    let ended = Arc::new(AtomicUsize::new(0));

    let (o_clone, seen_clone) = (o.clone(), seen.clone());
    let _effect = rt.effect(move || seen_clone.lock().push(o_clone.get("a").unwrap()));

    let ended_clone = ended.clone();
    rt.on_transaction_end(move || {
        ended_clone.fetch_add(1, Ordering::SeqCst);
    });

    o.set("a", 2).unwrap();
    assert_eq!(o.get("a").unwrap(), Value::from(1));
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(ended.load(Ordering::SeqCst), 0);

    rt.begin_transaction();
    o.set("a", 2).unwrap();
    rt.end_transaction();

    assert_eq!(o.get("a").unwrap(), Value::from(2));
    assert_eq!(*seen.lock(), vec![Value::from(1), Value::from(2)]);
    assert_eq!(ended.load(Ordering::SeqCst), 1);
}

/// A watcher reports the previous real value, not a placeholder.
#[test]
fn watch_reports_previous_values() {
    let rt = Runtime::new();
    let o = rt.wrap(&Target::object([("a", 1)]));
    let calls: Arc<Mutex<Vec<(Value, Option<Value>)>>> = Arc::new(Mutex::new(Vec::new()));

    let o_clone = o.clone();
    let calls_clone = calls.clone();
    let _handle = rt.watch(
        WatchSource::getter(move || o_clone.get("a").unwrap()),
        move |new, old, _| calls_clone.lock().push((new.clone(), old.cloned())),
        WatchOptions::new(),
    );
    assert!(calls.lock().is_empty());

    rt.transaction(|| o.set("a", 2)).unwrap();
    rt.transaction(|| o.set("a", 3)).unwrap();

    assert_eq!(
        *calls.lock(),
        vec![
            (Value::from(2), Some(Value::from(1))),
            (Value::from(3), Some(Value::from(2))),
        ]
    );
}

/// An immediate watcher fires at setup without a previous value.
#[test]
fn immediate_watch_starts_without_previous_value() {
    let rt = Runtime::new();
    let r = rt.create_ref("draft");
    let calls: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));

    let calls_clone = calls.clone();
    let handle = rt.watch(
        r.clone(),
        move |_, old, _| calls_clone.lock().push(old.cloned()),
        WatchOptions::new().immediate(),
    );
    r.set("final");
    handle.stop();
    r.set("ignored");

    assert_eq!(*calls.lock(), vec![None, Some(Value::from("draft"))]);
}

/// Recorded patches undo and redo a document edit.
#[test]
fn produce_undo_redo_round_trip() {
    let rt = Runtime::new();
    let doc = rt.wrap(&Target::object([
        ("title", Value::from("draft")),
        ("blocks", Value::from(json!(["intro", "body"]))),
    ]));
    let titles = log();

    let (d, t) = (doc.clone(), titles.clone());
    let _effect = rt.effect(move || t.lock().push(d.get("title").unwrap()));

    let patches = rt.produce(|| {
        doc.set("title", "final").unwrap();
        let blocks = doc.get("blocks").unwrap();
        blocks.as_reactive().unwrap().pop().unwrap();
    });

    assert_eq!(patches.len(), 2);
    assert_eq!(patches[1].op, PatchOp::Remove);
    assert_eq!(patches[1].path, vec![PropKey::from("blocks"), PropKey::Int(1)]);

    undo_patches(&doc, &patches).unwrap();
    assert_eq!(doc.to_json(), json!({"title": "draft", "blocks": ["intro", "body"]}));

    apply_patches(&doc, &patches).unwrap();
    assert_eq!(doc.to_json(), json!({"title": "final", "blocks": ["intro"]}));

    assert_eq!(
        *titles.lock(),
        vec![Value::from("draft"), Value::from("final"), Value::from("draft"), Value::from("final")]
    );
}

/// Under the logging policy a panicking effect does not take others down.
#[test]
fn log_policy_keeps_the_graph_running() {
    let rt = Runtime::with_config(RuntimeConfig::default().with_error_policy(ErrorPolicy::Log));
    let r = rt.create_ref(0);
    let seen = log();

    let r_clone = r.clone();
    let _faulty = rt.effect(move || {
        if r_clone.get() == Value::from(1) {
            panic!("bad value");
        }
    });

    let (r_clone, seen_clone) = (r.clone(), seen.clone());
    let _healthy = rt.effect(move || seen_clone.lock().push(r_clone.get()));

    r.set(1);
    r.set(2);

    assert_eq!(*seen.lock(), vec![Value::from(0), Value::from(1), Value::from(2)]);
    assert!(rt.active_effect().is_none());
}

/// Independent runtimes do not see each other's transactions.
#[test]
fn runtimes_are_independent() {
    let first = Runtime::new();
    let second = Runtime::new();
    let a = first.wrap(&Target::object([("n", 1)]));
    let b = second.wrap(&Target::object([("n", 1)]));

    first.transaction(|| {
        a.set("n", 2).unwrap();
        b.set("n", 2).unwrap();
    });

    assert_eq!(a.get("n").unwrap(), Value::from(2));
    assert_eq!(b.get("n").unwrap(), Value::from(1));
}
