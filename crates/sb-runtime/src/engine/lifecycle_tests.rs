use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sb_core::{EnumValue, ErrorKind, FunctionDescriptor, HostType, HostValue};

use super::runtime_test_support::*;
use super::*;
use crate::batched::{BatchedCategory, BatchedOutput};
use crate::host::{HostFunctionTable, RecordingDisplaySink, Severity};
use crate::interrupt::{ExecutionState, InterruptRegistry};

const SPIN: &str = "let x = 0; loop { x += 1; }";

fn registry() -> Arc<InterruptRegistry> {
    Arc::new(InterruptRegistry::new())
}

fn run_inline(source: &str) -> (HostValue, Arc<RecordingDisplaySink>) {
    let registry = registry();
    let (bridge, sink) = inline_bridge(source, &registry);
    let value = bridge.execute(&[]);
    assert_eq!(bridge.state(), ExecutionState::Exited);
    assert_eq!(registry.len(), 0);
    (value, sink)
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn top_level_value_is_the_result_without_entry_point() {
    let (value, sink) = run_inline("1+1");
    assert_eq!(value, HostValue::Int(2));
    assert!(sink.reports().is_empty());
}

#[test]
fn main_receives_the_argument_vector_as_one_array() {
    let registry = registry();
    let (bridge, sink) = inline_bridge("fn main(args) { args.len() }", &registry);
    let args = ["a", "b", "c"].map(HostValue::string);
    assert_eq!(bridge.execute(&args), HostValue::Int(3));
    assert!(sink.errors().is_empty());
}

#[test]
fn library_functions_dispatch_to_the_host() {
    let (value, sink) = run_inline("Lib::getPlayerName()");
    assert_eq!(value, HostValue::string("Sellswords"));
    assert!(sink.errors().is_empty());
}

#[test]
fn missing_source_file_reports_not_found_and_returns_void() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("missing.rhai");
    let registry = registry();
    let sink = Arc::new(RecordingDisplaySink::new());
    let bridge = ScriptBridge::new(options(ScriptSource::File(path.clone()), &registry, &sink));

    assert_eq!(bridge.execute(&[]), HostValue::Void);
    assert_eq!(
        sink.errors(),
        vec![format!("File not found: {}", path.display())]
    );
    assert_eq!(bridge.state(), ExecutionState::Exited);
    assert_eq!(registry.len(), 0);
}

#[test]
fn file_sources_are_evaluated() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("answer.rhai");
    std::fs::write(&path, "fn main() { 40 + Lib::myLevel() - 11 }").expect("write script");
    let registry = registry();
    let sink = Arc::new(RecordingDisplaySink::new());
    let bridge = ScriptBridge::new(options(ScriptSource::File(path), &registry, &sink));
    assert_eq!(bridge.execute(&[]), HostValue::Int(42));
}

#[test]
fn unreadable_source_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let registry = registry();
    let sink = Arc::new(RecordingDisplaySink::new());
    let bridge = ScriptBridge::new(options(
        ScriptSource::File(dir.path().to_path_buf()),
        &registry,
        &sink,
    ));
    assert_eq!(bridge.execute(&[]), HostValue::Void);
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Script file I/O error: "));
}

#[test]
fn main_without_parameters_ignores_arguments() {
    let registry = registry();
    let (bridge, _sink) = inline_bridge("fn main() { 7 }", &registry);
    assert_eq!(bridge.execute(&[HostValue::Int(1)]), HostValue::Int(7));
}

#[test]
fn main_with_unsupported_arity_is_a_protocol_error() {
    let (value, sink) = run_inline("fn main(a, b) { a }");
    assert_eq!(value, HostValue::Void);
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Script exception: Entry point \"main\""));
}

#[test]
fn closure_main_in_scope_is_the_entry_point() {
    let registry = registry();
    let (bridge, sink) = inline_bridge("let main = |args| args.len() + 100; 5", &registry);
    let args = ["north", "south"].map(HostValue::string);
    assert_eq!(bridge.execute(&args), HostValue::Int(102));
    assert!(sink.errors().is_empty(), "{:?}", sink.errors());
}

#[test]
fn closure_main_without_parameters_keeps_its_captures() {
    let registry = registry();
    let (bridge, sink) = inline_bridge("let bonus = 3; let main = || bonus + 4; 0", &registry);
    assert_eq!(bridge.execute(&[HostValue::Int(1)]), HostValue::Int(7));
    assert!(sink.errors().is_empty(), "{:?}", sink.errors());
}

#[test]
fn function_pointer_main_follows_its_target_arity() {
    let registry = registry();
    let (bridge, _sink) = inline_bridge(
        "fn start(args) { args[0] } let main = Fn(\"start\"); 0",
        &registry,
    );
    assert_eq!(
        bridge.execute(&[HostValue::string("first")]),
        HostValue::string("first")
    );

    let (value, sink) = run_inline("fn pair(a, b) { a } let main = Fn(\"pair\"); 0");
    assert_eq!(value, HostValue::Void);
    assert!(sink.errors()[0].starts_with("Script exception: Entry point \"main\""));
}

#[test]
fn non_callable_main_variables_are_ignored() {
    let (value, sink) = run_inline("let main = 41; main + 1");
    assert_eq!(value, HostValue::Int(42));
    assert!(sink.errors().is_empty());
}

#[test]
fn syntax_errors_are_reported_with_location() {
    let (value, sink) = run_inline("let = ;");
    assert_eq!(value, HostValue::Void);
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Script evaluator exception: "));
    assert!(errors[0].contains("\tat <script> (command line:1"));
}

#[test]
fn thrown_values_are_runtime_errors() {
    let (_, sink) = run_inline(r#"throw "the gnomes are restless""#);
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Script error: the gnomes are restless\n"));
}

#[test]
fn host_faults_report_the_host_message_and_call_stack() {
    let source = "fn inner() {\n    Lib::fail(\"The mall is closed.\")\n}\ninner();";
    let (_, sink) = run_inline(source);
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    let mut lines = errors[0].lines();
    assert_eq!(lines.next(), Some("The mall is closed."));
    assert!(lines
        .next()
        .is_some_and(|line| line.starts_with("\tat inner (command line:2:")));
    assert!(lines
        .next()
        .is_some_and(|line| line.starts_with("\tat <script> (command line:4")));
}

#[test]
fn scripts_can_catch_host_faults() {
    let (value, sink) = run_inline(
        r#"
        let outcome = "";
        try { Lib::fail("closed"); } catch (fault) { outcome = "caught " + fault.message; }
        outcome
        "#,
    );
    assert!(sink.errors().is_empty());
    assert_eq!(value, HostValue::string("caught closed"));
}

#[test]
fn runtime_exceptions_from_host_functions_are_protocol_errors() {
    let (_, sink) = run_inline(r#"Lib::abort("nope")"#);
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Script exception: nope\n"));
}

#[test]
fn unmatched_overloads_surface_as_protocol_errors() {
    let (_, sink) = run_inline("Lib::describeElement(42)");
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .starts_with("Script exception: No overload of \"describeElement\" accepts (int)."));
}

#[test]
fn blacklisted_functions_are_not_bound() {
    let (_, sink) = run_inline(r#"Lib::createMatcher("x")"#);
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Script error: "));
    assert!(errors[0].contains("createMatcher"));
}

#[test]
fn operation_limits_are_faults_not_halts() {
    let registry = registry();
    let sink = Arc::new(RecordingDisplaySink::new());
    let mut options = options(ScriptSource::Inline(SPIN.to_string()), &registry, &sink);
    options.config.max_operations = Some(1_000);
    let bridge = ScriptBridge::new(options);
    assert_eq!(bridge.execute(&[]), HostValue::Void);
    assert_eq!(sink.errors().len(), 1);
}

#[test]
fn a_bridge_instance_runs_only_once() {
    let registry = registry();
    let (bridge, sink) = inline_bridge("1", &registry);
    assert_eq!(bridge.execute(&[]), HostValue::Int(1));
    assert_eq!(bridge.execute(&[]), HostValue::Void);
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Script exception: "));
}

#[test]
fn interrupt_all_halts_every_running_instance_without_reports() {
    const INSTANCES: usize = 4;
    let registry = registry();
    let sinks = (0..INSTANCES)
        .map(|_| Arc::new(RecordingDisplaySink::new()))
        .collect::<Vec<_>>();
    let workers = sinks
        .iter()
        .map(|sink| {
            let bridge = ScriptBridge::new(options(
                ScriptSource::Inline(SPIN.to_string()),
                &registry,
                sink,
            ));
            thread::spawn(move || {
                let value = bridge.execute(&[]);
                (value, bridge.state())
            })
        })
        .collect::<Vec<_>>();

    wait_until(|| registry.len() == INSTANCES);
    assert_eq!(registry.interrupt_all(), INSTANCES);
    for worker in workers {
        let (value, state) = worker.join().expect("worker thread");
        assert_eq!(value, HostValue::Void);
        assert_eq!(state, ExecutionState::Exited);
    }
    assert!(sinks.iter().all(|sink| sink.reports().is_empty()));
    assert_eq!(registry.len(), 0);
    assert_eq!(registry.interrupt_all(), 0);
}

#[test]
fn interrupt_handle_cancels_a_single_instance() {
    let registry = registry();
    let (bridge, sink) = inline_bridge(SPIN, &registry);
    let handle = bridge.interrupt_handle();
    let worker = thread::spawn(move || bridge.execute(&[]));

    wait_until(|| handle.state() == ExecutionState::Running);
    assert!(handle.interrupt());
    assert_eq!(worker.join().expect("worker thread"), HostValue::Void);
    assert_eq!(handle.state(), ExecutionState::Exited);
    assert!(!handle.interrupt());
    assert!(sink.errors().is_empty());
}

#[test]
fn batched_writes_flush_in_first_append_order() {
    let registry = registry();
    let source = r#"
        Lib::batchWrite("A", "k", "x");
        Lib::batchWrite("B", "k", "y");
        Lib::batchWrite("A", "k", "z")
    "#;
    let (bridge, sink) = inline_bridge(source, &registry);
    assert!(bridge.batched().is_none());
    bridge.set_batched(Some(BatchedOutput::new()));

    assert_eq!(bridge.execute(&[]), HostValue::Boolean(true));
    let flushed = bridge.take_batched().expect("batched output").flush();
    assert_eq!(
        flushed,
        vec![
            BatchedCategory {
                category: "A".to_string(),
                entries: vec![("k".to_string(), "xz".to_string())],
            },
            BatchedCategory {
                category: "B".to_string(),
                entries: vec![("k".to_string(), "y".to_string())],
            },
        ]
    );
    assert!(sink.reports().is_empty());
}

#[test]
fn unbatched_writes_are_emitted_directly() {
    let (value, sink) = run_inline(r#"Lib::batchWrite("A", "k", "now")"#);
    assert_eq!(value, HostValue::Boolean(false));
    assert_eq!(sink.reports(), vec![(Severity::Info, "now".to_string())]);
}

#[test]
fn reply_buffer_and_batching_are_independent() {
    let registry = registry();
    let source = r#"Lib::printHtml("<b>hi</b>"); Lib::batchWrite("A", "k", "x")"#;
    let (bridge, sink) = inline_bridge(source, &registry);
    bridge.set_reply_buffer();

    assert_eq!(bridge.execute(&[]), HostValue::Boolean(false));
    assert_eq!(bridge.take_reply().as_deref(), Some("<b>hi</b>"));
    assert_eq!(bridge.take_reply(), None);
    assert_eq!(sink.reports(), vec![(Severity::Info, "x".to_string())]);
}

#[test]
fn print_goes_to_the_display_sink() {
    let (_, sink) = run_inline(r#"print("hello"); debug("quiet");"#);
    assert_eq!(sink.reports(), vec![(Severity::Info, "hello".to_string())]);
}

#[test]
fn script_callbacks_are_invoked_by_host_functions() {
    let (value, sink) = run_inline(
        r#"
        fn double(x) { x * 2 }
        let doubled = Lib::forEach([1, 2, 3], Fn("double"));
        let bumped = Lib::forEach([1, 2], |x| x + 1);
        doubled + bumped
        "#,
    );
    assert!(sink.errors().is_empty(), "{:?}", sink.errors());
    assert_eq!(
        value,
        HostValue::List(
            [2, 4, 6, 2, 3].into_iter().map(HostValue::Int).collect()
        )
    );
}

#[test]
fn callback_faults_name_the_script_source() {
    let (value, sink) = run_inline("Lib::forEach([1], |x| throw \"bad callback\")");
    assert_eq!(value, HostValue::Void);
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("bad callback"), "{}", errors[0]);
    assert!(errors[0].contains("(command line:1:"), "{}", errors[0]);
    assert!(!errors[0].contains("(:"), "{}", errors[0]);
}

#[test]
fn escaped_callbacks_fail_after_the_execution_ends() {
    let (value, sink) = run_inline("fn double(x) { x * 2 } Fn(\"double\")");
    assert!(sink.errors().is_empty());
    let HostValue::Function(callback) = value else {
        panic!("expected a function, got {:?}", value);
    };
    let error = callback
        .call(&[HostValue::Int(2)])
        .expect_err("execution has ended");
    assert_eq!(error.kind, ErrorKind::ScriptProtocol);
}

#[test]
fn enumerated_constants_round_trip_through_scripts() {
    let (value, sink) = run_inline("Element::spooky");
    assert!(sink.errors().is_empty());
    assert_eq!(value, HostValue::Enum(EnumValue::new("element", 2, "spooky")));

    let (value, _) = run_inline("Lib::describeElement(Element::cold)");
    assert_eq!(value, HostValue::string("cold"));

    let (value, _) = run_inline("Element::hot.power + Element::count()");
    assert_eq!(value, HostValue::Int(10));
}

#[test]
fn out_of_range_ordinals_are_protocol_errors() {
    let catalog = element_catalog();
    let shrinking = Arc::clone(&catalog);
    let host = HostFunctionTable::new().with_function(
        FunctionDescriptor::new("forget_elements", HostType::Void, Vec::new()),
        move |_, _, _| {
            shrinking.replace_constants("element", vec!["hot".to_string()]);
            Ok(HostValue::Void)
        },
    );
    let registry = registry();
    let sink = Arc::new(RecordingDisplaySink::new());
    let mut options = options(
        ScriptSource::Inline("let e = Element::spooky; Lib::forgetElements(); e".to_string()),
        &registry,
        &sink,
    );
    options.host_functions = Some(Arc::new(host));
    options.enumerated_types = Some(catalog);

    assert_eq!(ScriptBridge::new(options).execute(&[]), HostValue::Void);
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Script exception: Ordinal 2 is out of range"));
}

#[test]
fn config_renames_namespace_and_entry_point() {
    let config: BridgeConfig = serde_json::from_str(
        r#"{"entryPoint": "start", "libraryNamespace": "Host", "maxCallLevels": 16}"#,
    )
    .expect("config json");
    assert!(config.strict_variables);
    assert_eq!(config.max_call_levels, Some(16));

    let registry = registry();
    let sink = Arc::new(RecordingDisplaySink::new());
    let mut options = options(
        ScriptSource::Inline("fn main() { 0 } fn start() { Host::myLevel() }".to_string()),
        &registry,
        &sink,
    );
    options.config = config;
    assert_eq!(ScriptBridge::new(options).execute(&[]), HostValue::Int(13));
    assert!(sink.errors().is_empty());
}

#[test]
fn strict_variables_reject_undeclared_names() {
    let (value, sink) = run_inline("undeclared + 1");
    assert_eq!(value, HostValue::Void);
    assert_eq!(sink.errors().len(), 1);
}
