use std::fs;
use std::path::PathBuf;

use sb_core::{EnumeratedType, HostValue};

use super::*;

fn inline_args(source: &str) -> RunArgs {
    RunArgs {
        file: None,
        eval: Some(source.to_string()),
        fixture: None,
        config: None,
        batch: false,
        reply: false,
        timeout_ms: None,
        args: Vec::new(),
    }
}

fn write_temp(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write temp file");
    path
}

#[test]
fn inline_scripts_produce_a_value_line() {
    let outcome = execute_script(inline_args("Lib::myLevel() + 41")).expect("run");
    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.value, HostValue::Int(42));
    assert_eq!(outcome_lines(&outcome), vec!["RESULT:OK", "VALUE:42"]);
}

#[test]
fn arguments_after_the_separator_reach_main() {
    let mut args = inline_args("fn main(argv) { argv[0] + \"/\" + argv.len() }");
    args.args = vec!["north".to_string(), "south".to_string()];
    let outcome = execute_script(args).expect("run");
    assert_eq!(outcome.value, HostValue::string("north/2"));
}

#[test]
fn batched_runs_flush_in_append_order() {
    let mut args = inline_args(
        r#"
        Lib::batchWrite("room", "b", "first");
        Lib::batchWrite("log", "a", "second");
        Lib::batchWrite("room", "b", " again");
        Lib::batchWrite("room", "a", "third");
        "#,
    );
    args.batch = true;
    let outcome = execute_script(args).expect("run");
    assert_eq!(
        outcome_lines(&outcome)[2..],
        [
            "BATCH:room:b:first again",
            "BATCH:room:a:third",
            "BATCH:log:a:second",
        ]
    );
}

#[test]
fn reply_buffer_captures_html_output() {
    let mut args = inline_args(r#"Lib::printHtml("<b>hi</b>"); Lib::printHtml("!");"#);
    args.reply = true;
    let outcome = execute_script(args).expect("run");
    assert_eq!(outcome.reply.as_deref(), Some("<b>hi</b>!"));
    assert_eq!(
        outcome_lines(&outcome).last().map(String::as_str),
        Some(r#"REPLY_JSON:"<b>hi</b>!""#)
    );
}

#[test]
fn script_faults_mark_the_run_as_failed() {
    let outcome = execute_script(inline_args(r#"Lib::abort("no way")"#)).expect("run");
    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.status.exit_code(), 1);
    assert_eq!(outcome_lines(&outcome), vec!["RESULT:ERROR", "VALUE:"]);
}

#[test]
fn overloaded_to_int_accepts_strings_and_floats() {
    let outcome =
        execute_script(inline_args(r#"Lib::toInt("12") + Lib::toInt(2.9)"#)).expect("run");
    assert_eq!(outcome.value, HostValue::Int(14));
}

#[test]
fn to_int_rejects_floats_outside_the_int_range() {
    let outcome = execute_script(inline_args("Lib::toInt(1e300)")).expect("run");
    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.value, HostValue::Void);

    let outcome = execute_script(inline_args(
        r#"
        let message = "";
        try { Lib::toInt(-1e300); } catch (fault) { message = fault.message; }
        message
        "#,
    ))
    .expect("run");
    assert_eq!(outcome.status, RunStatus::Ok);
    let HostValue::String(message) = outcome.value else {
        panic!("expected the fault message, got {:?}", outcome.value);
    };
    assert!(message.ends_with("cannot be narrowed to int."), "{}", message);
}

#[test]
fn timeouts_halt_runaway_scripts() {
    let mut args = inline_args("loop { }");
    args.timeout_ms = Some(50);
    let outcome = execute_script(args).expect("run");
    assert_eq!(outcome.status, RunStatus::Halted);
    assert_eq!(outcome.value, HostValue::Void);
    assert_eq!(outcome.status.exit_code(), 2);
}

#[test]
fn fast_scripts_finish_before_their_timeout() {
    let mut args = inline_args("1 + 1");
    args.timeout_ms = Some(60_000);
    let outcome = execute_script(args).expect("run");
    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.value, HostValue::Int(2));
}

#[test]
fn fixture_and_config_files_shape_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixture = write_temp(
        &dir,
        "fixture.json",
        r#"{
            "playerName": "Sellswords",
            "enumeratedTypes": [{"name": "element", "constants": ["hot", "cold"]}],
            "proxyFields": {
                "Element": {
                    "fields": [{"name": "power", "type": {"kind": "int"}}],
                    "values": {"hot": {"power": 7}}
                }
            }
        }"#,
    );
    let config = write_temp(
        &dir,
        "config.json",
        r#"{"libraryNamespace": "Host", "entryPoint": "start"}"#,
    );
    let script = write_temp(
        &dir,
        "demo.rhai",
        "fn start() { Host::getPlayerName() + \":\" + Element::hot.power + \":\" + Element::cold }",
    );

    let mut args = inline_args("");
    args.eval = None;
    args.file = Some(script);
    args.fixture = Some(fixture);
    args.config = Some(config);
    let outcome = execute_script(args).expect("run");
    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.value, HostValue::string("Sellswords:7:cold"));
}

#[test]
fn invalid_fixture_is_a_cli_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut args = inline_args("1");
    args.fixture = Some(write_temp(&dir, "fixture.json", "[1, 2"));
    let error = execute_script(args).expect_err("invalid fixture");
    assert_eq!(error.code, "CLI_FIXTURE_INVALID");
}

#[test]
fn function_listing_shows_namespace_arity_and_types() {
    let fixture = Fixture {
        enumerated_types: vec![EnumeratedType::new("element", ["hot", "cold"])],
        ..Fixture::default()
    };
    let lines = function_lines(&fixture, "Lib");
    assert!(lines.contains(&"FUNCTION:Lib::getPlayerName/0".to_string()));
    assert!(lines.contains(&"FUNCTION:Lib::toInt/1".to_string()));
    assert!(lines.contains(&"FUNCTION:Lib::batchWrite/3".to_string()));
    assert!(!lines.iter().any(|line| line.contains("createMatcher")));
    assert_eq!(lines.last().map(String::as_str), Some("TYPE:Element:hot,cold"));
}

#[test]
fn argument_errors_return_clap_exit_codes() {
    assert_eq!(run_cli_from_args(["sb-cli", "run"]), 2);
    assert_eq!(
        run_cli_from_args(["sb-cli", "run", "--file", "a.rhai", "--eval", "1"]),
        2
    );
}
