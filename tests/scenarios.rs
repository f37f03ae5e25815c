//! Integration tests for the engine's literal testable scenarios: signature
//! determinism under argument reordering, injectable resolution order,
//! ignored-parameter exclusion, on-disk persistence reuse, and nested
//! context scoping across independently-constructed tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use camino::Utf8Path;

use purple_titanium::{Context, Engine, EngineError, FileStore, Format, PersistenceStore, RunOptions, Value};

#[test]
fn s1_signature_is_invariant_to_keyword_argument_order() {
    let mut engine = Engine::new();

    let a = engine
        .task("add")
        .version(1)
        .param("x", 1i64)
        .param("y", 2i64)
        .build(|_ctx, args| Ok(args.get_i64("x")? + args.get_i64("y")?))
        .unwrap();

    let b = engine
        .task("add")
        .version(1)
        .param("y", 2i64)
        .param("x", 1i64)
        .build(|_ctx, args| Ok(args.get_i64("x")? + args.get_i64("y")?))
        .unwrap();

    assert_eq!(a.signature(), b.signature());
}

#[test]
fn s2_missing_required_injectable_errors_at_construction() {
    let mut engine = Engine::new();

    let result = engine
        .task("needs_device")
        .version(1)
        .injectable::<String>("device", None, None, true)
        .build(|_ctx, args| Ok(args.get_str("device")?.to_string()));

    match result {
        Err(EngineError::MissingInjectable(name)) => assert_eq!(name, "device"),
        other => panic!("expected MissingInjectable, got {other:?}"),
    }
}

#[test]
fn s3_injectable_prefers_active_context_over_its_own_default() {
    let mut engine = Engine::new();

    let mut bindings = HashMap::new();
    bindings.insert("device".to_string(), Value::Str("cuda".into()));
    let _guard = Context::scope(bindings);

    let handle = engine
        .task("report_device")
        .version(1)
        .injectable::<String>("device", None, Some("cpu".to_string()), false)
        .build(|_ctx, args| Ok(args.get_str("device")?.to_string()))
        .unwrap();

    let report = engine.run(&[handle.erase()], RunOptions::default()).unwrap();
    assert_eq!(report.outputs[0].downcast_ref::<String>().unwrap(), "cuda");
}

#[test]
fn s4_ignored_parameter_does_not_affect_signature_but_is_visible_to_the_body() {
    let mut engine = Engine::new();

    let cuda = engine
        .task("load")
        .version(1)
        .param("path", "data.csv")
        .ignored("device", "cuda")
        .build(|_ctx, args| Ok(args.get_str("device")?.to_string()))
        .unwrap();

    let cpu = engine
        .task("load")
        .version(1)
        .param("path", "data.csv")
        .ignored("device", "cpu")
        .build(|_ctx, args| Ok(args.get_str("device")?.to_string()))
        .unwrap();

    assert_eq!(cuda.signature(), cpu.signature());

    let report = engine.run(&[cuda.erase(), cpu.erase()], RunOptions::default()).unwrap();
    assert_eq!(report.outputs[0].downcast_ref::<String>().unwrap(), "cuda");
    assert_eq!(report.outputs[1].downcast_ref::<String>().unwrap(), "cpu");
}

#[test]
fn s5_persisted_output_is_reused_across_separate_runs_without_recomputation() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn PersistenceStore> =
        Arc::new(FileStore::open(Utf8Path::from_path(dir.path()).unwrap()).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));

    let spawn = |engine: &mut Engine, calls: Arc<AtomicUsize>| {
        engine
            .task("expensive")
            .version(1)
            .param("n", 7i64)
            .build_cached(Format::Json, move |_ctx, args| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(args.get_i64("n")? * 2)
            })
            .unwrap()
    };

    let mut engine_a = Engine::new();
    let handle_a = spawn(&mut engine_a, calls.clone());
    let report_a = engine_a
        .run(
            &[handle_a.erase()],
            RunOptions {
                store: store.clone(),
                ..RunOptions::default()
            },
        )
        .unwrap();
    assert_eq!(*report_a.outputs[0].downcast_ref::<i64>().unwrap(), 14);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A fresh engine (simulating a new process) reconstructing the exact
    // same task must find the cache entry rather than recompute it.
    let mut engine_b = Engine::new();
    let handle_b = spawn(&mut engine_b, calls.clone());
    let report_b = engine_b
        .run(
            &[handle_b.erase()],
            RunOptions {
                store: store.clone(),
                ..RunOptions::default()
            },
        )
        .unwrap();
    assert_eq!(*report_b.outputs[0].downcast_ref::<i64>().unwrap(), 14);
    assert_eq!(
        calls.load(Ordering::SeqCst),
        1,
        "second run should hit the persisted cache instead of recomputing"
    );
}

#[test]
fn s5_corrupted_cache_entry_is_invalidated_and_the_task_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn PersistenceStore> =
        Arc::new(FileStore::open(Utf8Path::from_path(dir.path()).unwrap()).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));

    let spawn = |engine: &mut Engine, calls: Arc<AtomicUsize>| {
        engine
            .task("expensive")
            .version(1)
            .param("n", 7i64)
            .build_cached(Format::Json, move |_ctx, args| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(args.get_i64("n")? * 2)
            })
            .unwrap()
    };

    let mut engine_a = Engine::new();
    let handle_a = spawn(&mut engine_a, calls.clone());
    engine_a
        .run(
            &[handle_a.erase()],
            RunOptions {
                store: store.clone(),
                ..RunOptions::default()
            },
        )
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Corrupt the single on-disk cache entry by truncating it so its header
    // no longer parses.
    let cache_path = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .find(|p| p.extension().and_then(|e| e.to_str()) == Some("ptcache"))
        .expect("exactly one cache file should have been written");
    std::fs::write(&cache_path, b"not a valid cache entry").unwrap();

    // Re-running with the corrupted file on disk must recompute the task
    // (not propagate `CacheCorruption` as a run failure) and overwrite the
    // file with a fresh, valid entry.
    let mut engine_b = Engine::new();
    let handle_b = spawn(&mut engine_b, calls.clone());
    let report_b = engine_b
        .run(
            &[handle_b.erase()],
            RunOptions {
                store: store.clone(),
                ..RunOptions::default()
            },
        )
        .unwrap();
    assert_eq!(*report_b.outputs[0].downcast_ref::<i64>().unwrap(), 14);
    assert_eq!(
        calls.load(Ordering::SeqCst),
        2,
        "a corrupted cache entry must force exactly one recomputation"
    );

    // The overwritten file must itself be valid: a third run should hit the
    // cache again without a further recompute.
    let mut engine_c = Engine::new();
    let handle_c = spawn(&mut engine_c, calls.clone());
    let report_c = engine_c
        .run(
            &[handle_c.erase()],
            RunOptions {
                store: store.clone(),
                ..RunOptions::default()
            },
        )
        .unwrap();
    assert_eq!(*report_c.outputs[0].downcast_ref::<i64>().unwrap(), 14);
    assert_eq!(calls.load(Ordering::SeqCst), 2, "the repaired cache entry should now be reused");
}

#[test]
fn s2_version_bump_cascades_through_the_dependency_chain() {
    let build = |engine: &mut Engine, add_version: u64| {
        let a = engine
            .task("add")
            .version(add_version)
            .param("x", 1i64)
            .param("y", 2i64)
            .build(|_ctx, args| Ok(args.get_i64("x")? + args.get_i64("y")?))
            .unwrap();
        let b = engine
            .task("add")
            .version(add_version)
            .param("x", 2i64)
            .param("y", 3i64)
            .build(|_ctx, args| Ok(args.get_i64("x")? + args.get_i64("y")?))
            .unwrap();
        let c = engine
            .task("mul")
            .version(1)
            .dependency("x", a)
            .dependency("y", b)
            .build(|_ctx, args| Ok(*args.dependency::<i64>("x")? * *args.dependency::<i64>("y")?))
            .unwrap();
        (a, b, c)
    };

    let mut engine_v1 = Engine::new();
    let (a1, b1, c1) = build(&mut engine_v1, 1);

    let mut engine_v2 = Engine::new();
    let (a2, b2, c2) = build(&mut engine_v2, 2);

    assert_ne!(a1.signature(), a2.signature(), "add's own signature must change with its version");
    assert_ne!(b1.signature(), b2.signature());
    assert_ne!(
        c1.signature(),
        c2.signature(),
        "mul's signature must change too, purely because its dependencies' signatures changed"
    );

    let report = engine_v1.run(&[c1.erase()], RunOptions::default()).unwrap();
    assert_eq!(*report.outputs[0].downcast_ref::<i64>().unwrap(), 15);
}

#[test]
fn s6_nested_context_scopes_resolve_independently_per_construction() {
    let mut engine = Engine::new();

    let outer_handle = {
        let mut bindings = HashMap::new();
        bindings.insert("device".to_string(), Value::Str("cpu".into()));
        let _outer = Context::scope(bindings);

        engine
            .task("outer")
            .version(1)
            .injectable::<String>("device", None, None, true)
            .build(|_ctx, args| Ok(args.get_str("device")?.to_string()))
            .unwrap()
    };

    let inner_handle = {
        let mut outer_bindings = HashMap::new();
        outer_bindings.insert("device".to_string(), Value::Str("cpu".into()));
        let _outer = Context::scope(outer_bindings);

        let mut inner_bindings = HashMap::new();
        inner_bindings.insert("device".to_string(), Value::Str("cuda".into()));
        let _inner = Context::scope(inner_bindings);

        engine
            .task("inner")
            .version(1)
            .injectable::<String>("device", None, None, true)
            .build(|_ctx, args| Ok(args.get_str("device")?.to_string()))
            .unwrap()
    };

    let report = engine
        .run(&[outer_handle.erase(), inner_handle.erase()], RunOptions::default())
        .unwrap();
    assert_eq!(report.outputs[0].downcast_ref::<String>().unwrap(), "cpu");
    assert_eq!(report.outputs[1].downcast_ref::<String>().unwrap(), "cuda");
}

#[test]
fn dependency_chain_propagates_values_and_shares_signature_across_equal_calls() {
    let mut engine = Engine::new();

    let base = engine
        .task("base")
        .version(1)
        .param("n", 3i64)
        .build(|_ctx, args| Ok(args.get_i64("n")?))
        .unwrap();

    let double_first = engine
        .task("double")
        .version(1)
        .dependency("input", base)
        .build(|_ctx, args| {
            let input = args.dependency::<i64>("input")?;
            Ok(*input * 2)
        })
        .unwrap();

    let double_second = engine
        .task("double")
        .version(1)
        .dependency("input", base)
        .build(|_ctx, args| {
            let input = args.dependency::<i64>("input")?;
            Ok(*input * 2)
        })
        .unwrap();

    assert_eq!(double_first.signature(), double_second.signature());

    let report = engine
        .run(&[double_first.erase(), double_second.erase()], RunOptions::default())
        .unwrap();
    assert_eq!(*report.outputs[0].downcast_ref::<i64>().unwrap(), 6);
    assert_eq!(*report.outputs[1].downcast_ref::<i64>().unwrap(), 6);
}

#[test]
fn dependency_failure_propagates_as_dependency_failed() {
    let mut engine = Engine::new();

    let failing = engine
        .task("failing")
        .version(1)
        .build(|_ctx, _args| -> anyhow::Result<i64> { anyhow::bail!("boom") })
        .unwrap();

    let dependent = engine
        .task("dependent")
        .version(1)
        .dependency("input", failing)
        .build(|_ctx, args| {
            let input = args.dependency::<i64>("input")?;
            Ok(*input + 1)
        })
        .unwrap();

    let err = engine
        .run(&[dependent.erase()], RunOptions::default())
        .unwrap_err();

    match err {
        EngineError::TaskFailed(_) | EngineError::DependencyFailed(_) => {}
        other => panic!("expected TaskFailed or DependencyFailed, got {other:?}"),
    }
}

#[test]
fn run_parallel_matches_sequential_run_for_a_diamond_graph() {
    let mut engine = Engine::new();

    let base = engine
        .task("base")
        .version(1)
        .param("n", 5i64)
        .build(|_ctx, args| Ok(args.get_i64("n")?))
        .unwrap();

    let left = engine
        .task("left")
        .version(1)
        .dependency("input", base)
        .build(|_ctx, args| Ok(*args.dependency::<i64>("input")? + 1))
        .unwrap();

    let right = engine
        .task("right")
        .version(1)
        .dependency("input", base)
        .build(|_ctx, args| Ok(*args.dependency::<i64>("input")? * 2))
        .unwrap();

    let sum = engine
        .task("sum")
        .version(1)
        .dependency("left", left)
        .dependency("right", right)
        .build(|_ctx, args| Ok(*args.dependency::<i64>("left")? + *args.dependency::<i64>("right")?))
        .unwrap();

    let report = engine
        .run_parallel(&[sum.erase()], RunOptions::default())
        .unwrap();
    assert_eq!(*report.outputs[0].downcast_ref::<i64>().unwrap(), 16);
}
