use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sassette_bridge::{
    Bridge, BridgeBuilder, CompileFailure, Config, ConfigError, Engine, Error, HostLoop,
    ImportRecord, Importers, ImporterReply, RenderOutput, Value,
};
use sassette_test::ScriptedEngine;

fn bridge() -> (Arc<ScriptedEngine>, Bridge, HostLoop) {
    let engine = Arc::new(ScriptedEngine::new());
    let (bridge, host) = BridgeBuilder::new(Arc::clone(&engine) as Arc<dyn Engine>)
        .workers(2)
        .build();
    (engine, bridge, host)
}

fn run_async(bridge: &Bridge, host: &HostLoop, config: &Config) -> Result<RenderOutput, Error> {
    let slot: Arc<Mutex<Option<Result<RenderOutput, CompileFailure>>>> =
        Arc::new(Mutex::new(None));
    let ok = Arc::clone(&slot);
    let err = Arc::clone(&slot);
    bridge.compile_from_string_async(
        config,
        Box::new(move |output| {
            *ok.lock().unwrap() = Some(Ok(output));
        }),
        Box::new(move |failure| {
            *err.lock().unwrap() = Some(Err(failure));
        }),
    )?;
    host.run_until_idle();
    slot.lock()
        .unwrap()
        .take()
        .expect("no continuation fired")
        .map_err(Error::from)
}

#[test]
fn test_sync_compile_passthrough() {
    let (engine, bridge, _host) = bridge();
    let output = bridge
        .compile_from_string(&Config::with_data("a { color: red; }"))
        .unwrap();
    assert_eq!(output.css, "a { color: red; }\n");
    assert_eq!(engine.compiles(), 1);
}

#[test]
fn test_sync_compile_is_repeatable() {
    let (engine, bridge, _host) = bridge();
    let config = Config::with_data("a { color: red; }");
    let first = bridge.compile_from_string(&config).unwrap();
    let second = bridge.compile_from_string(&config).unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.compiles(), 2);
}

#[test]
fn test_async_compile_delivers_exactly_once() {
    let engine = Arc::new(ScriptedEngine::new());
    let (bridge, host) =
        BridgeBuilder::new(Arc::clone(&engine) as Arc<dyn Engine>).build();

    let successes = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));
    let on_ok = Arc::clone(&successes);
    let on_err = Arc::clone(&failures);
    bridge
        .compile_from_string_async(
            &Config::with_data("a { }"),
            Box::new(move |_output| {
                on_ok.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(move |_failure| {
                on_err.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    host.run_until_idle();

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert_eq!(bridge.pending_jobs(), 0);
}

#[test]
fn test_async_failure_routes_to_error_continuation() {
    let (_engine, bridge, host) = bridge();
    let err = run_async(&bridge, &host, &Config::with_data("a { }\n@fail broken rule"))
        .unwrap_err();
    match err {
        Error::Compile(failure) => {
            assert_eq!(failure.message, "broken rule");
            assert_eq!(failure.line, 2);
        }
        other => panic!("expected a compile failure, got {other:?}"),
    }
}

#[test]
fn test_importer_list_tried_in_declaration_order() {
    let (_engine, bridge, host) = bridge();
    let calls: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let importer = |name: &'static str, resolves: bool, calls: &Arc<Mutex<Vec<&'static str>>>| {
        let calls = Arc::clone(calls);
        Arc::new(move |_req: &sassette_bridge::ImportRequest| {
            calls.lock().unwrap().push(name);
            if resolves {
                Ok(ImporterReply::Import(ImportRecord::inline(name, "c { }")))
            } else {
                Ok(ImporterReply::NotHandled)
            }
        }) as sassette_bridge::HostImporter
    };

    let config = Config {
        importer: Importers::List(vec![
            importer("a", false, &calls),
            importer("b", false, &calls),
            importer("c", true, &calls),
        ]),
        ..Config::with_data("@import \"dep\";")
    };
    let output = run_async(&bridge, &host, &config).unwrap();

    assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(output.css, "c { }\n");
    assert_eq!(output.stats.included_files, vec!["c"]);
}

#[test]
fn test_async_importer_runs_on_host_thread() {
    let (_engine, bridge, host) = bridge();
    let host_thread = thread::current().id();
    let seen = Arc::new(Mutex::new(None));
    let recorded = Arc::clone(&seen);

    let config = Config {
        importer: Importers::Single(Arc::new(move |req| {
            *recorded.lock().unwrap() = Some(thread::current().id());
            Ok(ImporterReply::Import(ImportRecord::inline(
                req.url.clone(),
                "dep { }",
            )))
        })),
        ..Config::with_data("@import \"dep\";")
    };
    let output = run_async(&bridge, &host, &config).unwrap();

    assert_eq!(output.css, "dep { }\n");
    assert_eq!(seen.lock().unwrap().unwrap(), host_thread);
}

#[test]
fn test_custom_function_spliced_into_output() {
    let (_engine, bridge, host) = bridge();
    let mut config = Config::with_data("width: add(1, 2);");
    config.functions.insert(
        "add($a, $b)".to_string(),
        Arc::new(|args| {
            let sum: f64 = args
                .iter()
                .filter_map(Value::as_number)
                .sum();
            Ok(Value::number(sum))
        }),
    );
    let output = run_async(&bridge, &host, &config).unwrap();
    assert_eq!(output.css, "width: 3;\n");
}

#[test]
fn test_function_failure_surfaces_signature_in_compile_error() {
    let (_engine, bridge, _host) = bridge();
    let mut config = Config::with_data("width: boom();");
    config.functions.insert(
        "boom()".to_string(),
        Arc::new(|_args| Err(sassette_bridge::CallbackFailure::new("no can do"))),
    );
    let err = bridge.compile_from_string(&config).unwrap_err();
    match err {
        Error::Compile(failure) => {
            assert!(failure.message.contains("boom()"), "{}", failure.message);
            assert!(failure.message.contains("no can do"), "{}", failure.message);
        }
        other => panic!("expected a compile failure, got {other:?}"),
    }
}

#[test]
fn test_missing_required_option_rejected_before_engine() {
    let (engine, bridge, host) = bridge();
    let config = Config {
        indent_width: None,
        ..Config::with_data("a { }")
    };

    let err = bridge.compile_from_string(&config).unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::MissingField("indentWidth"))
    ));

    // The asynchronous path reports configuration errors synchronously
    // and never enqueues the job.
    let err = bridge
        .compile_from_string_async(
            &config,
            Box::new(|_output| panic!("must not run")),
            Box::new(|_failure| panic!("must not run")),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::MissingField("indentWidth"))
    ));
    host.run_until_idle();

    assert_eq!(engine.compiles(), 0);
    assert_eq!(bridge.pending_jobs(), 0);
}

#[test]
fn test_data_compile_reports_the_named_file() {
    let (_engine, bridge, _host) = bridge();
    let config = Config {
        file: Some("logical.scss".into()),
        ..Config::with_data("a { }")
    };
    let output = bridge.compile_from_string(&config).unwrap();
    assert_eq!(output.stats.included_files, vec!["logical.scss"]);

    let config = Config {
        file: Some("logical.scss".into()),
        ..Config::with_data("@fail broken")
    };
    let err = bridge.compile_from_string(&config).unwrap_err();
    match err {
        Error::Compile(failure) => {
            assert_eq!(failure.file.as_deref(), Some("logical.scss"));
        }
        other => panic!("expected a compile failure, got {other:?}"),
    }
}

#[test]
fn test_sync_compile_while_async_hop_waits_on_host() {
    let engine = Arc::new(ScriptedEngine::new());
    let (bridge, host) = BridgeBuilder::new(Arc::clone(&engine) as Arc<dyn Engine>)
        .workers(1)
        .build();

    let done = Arc::new(AtomicUsize::new(0));
    let on_done = Arc::clone(&done);
    let config = Config {
        importer: Importers::Single(Arc::new(|req| {
            Ok(ImporterReply::Import(ImportRecord::inline(
                req.url.clone(),
                "dep { }",
            )))
        })),
        ..Config::with_data("@import \"dep\";")
    };
    bridge
        .compile_from_string_async(
            &config,
            Box::new(move |_output| {
                on_done.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(|failure| panic!("unexpected failure: {failure}")),
        )
        .unwrap();

    // Give the worker time to take the engine lock and block on the hop.
    thread::sleep(Duration::from_millis(100));

    // This contends for the same engine; the synchronous path has to keep
    // answering the host queue while it waits or both jobs would hang.
    let output = bridge
        .compile_from_string(&Config::with_data("a { color: red; }"))
        .unwrap();
    assert_eq!(output.css, "a { color: red; }\n");

    host.run_until_idle();
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(engine.compiles(), 2);
    assert_eq!(bridge.pending_jobs(), 0);
}

#[test]
fn test_file_compile_records_included_files() {
    let dir = tempfile::tempdir().unwrap();
    let entry = dir.path().join("entry.scss");
    let dep = dir.path().join("_dep.scss");
    std::fs::write(&entry, "@import \"_dep.scss\";\nbody { }").unwrap();
    std::fs::write(&dep, "dep { }").unwrap();

    let (_engine, bridge, _host) = bridge();
    let config = Config {
        include_paths: vec![dir.path().to_path_buf()],
        ..Config::with_file(&entry)
    };
    let output = bridge.compile_from_file(&config).unwrap();

    assert_eq!(output.css, "dep { }\nbody { }\n");
    assert_eq!(
        output.stats.included_files,
        vec![entry.display().to_string(), dep.display().to_string()]
    );
}

#[test]
fn test_source_map_sources_match_included_files() {
    let (_engine, bridge, _host) = bridge();
    let config = Config {
        source_map: Some("out.css.map".to_string()),
        out_file: Some("out.css".to_string()),
        importer: Importers::Single(Arc::new(|req| {
            Ok(ImporterReply::Import(ImportRecord::inline(
                req.url.clone(),
                "dep { }",
            )))
        })),
        ..Config::with_data("@import \"_dep\";\na { }")
    };
    let output = bridge.compile_from_string(&config).unwrap();
    let map: serde_json::Value = serde_json::from_str(output.map.as_deref().unwrap()).unwrap();
    assert_eq!(map["version"], 3);
    assert_eq!(map["file"], "out.css");

    let sources: Vec<String> = map["sources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap().to_string())
        .collect();
    assert_eq!(sources, output.stats.included_files);
    assert_eq!(sources, vec!["_dep"]);
}

#[test]
fn test_async_compile_runs_off_the_host_thread() {
    let (engine, bridge, host) = bridge();
    let output = run_async(&bridge, &host, &Config::with_data("a { }")).unwrap();
    assert_eq!(output.css, "a { }\n");
    let compiled_on = engine.last_compile_thread().unwrap();
    assert_ne!(compiled_on, thread::current().id());
}

#[test]
fn test_engine_version_exposed() {
    let (_engine, bridge, _host) = bridge();
    assert_eq!(bridge.engine_version(), "3.6.6-scripted");
}

#[test]
fn test_many_async_jobs_all_complete() {
    let engine = Arc::new(ScriptedEngine::new());
    let (bridge, host) = BridgeBuilder::new(Arc::clone(&engine) as Arc<dyn Engine>)
        .workers(4)
        .build();

    let completions = Arc::new(AtomicUsize::new(0));
    const JOBS: usize = 32;
    for index in 0..JOBS {
        let done = Arc::clone(&completions);
        bridge
            .compile_from_string_async(
                &Config::with_data(format!("rule-{index} {{ }}")),
                Box::new(move |_output| {
                    done.fetch_add(1, Ordering::SeqCst);
                }),
                Box::new(|failure| panic!("unexpected failure: {failure}")),
            )
            .unwrap();
    }
    host.run_until_idle();

    assert_eq!(completions.load(Ordering::SeqCst), JOBS);
    assert_eq!(engine.compiles(), JOBS);
    assert_eq!(bridge.pending_jobs(), 0);
}
