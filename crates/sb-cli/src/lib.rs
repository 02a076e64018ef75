use std::collections::BTreeSet;
use std::ffi::OsString;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use sb_core::HostValue;
use sb_runtime::{
    BatchedCategory, BatchedOutput, BridgeOptions, HostCommandSurface, InterruptRegistry,
    LibraryIndex, ScriptBridge, ScriptSource, StaticTypeCatalog,
};

mod cli_args;
mod console;
mod demo_host;
mod error_map;
mod fixture;
mod logging;

pub(crate) use cli_args::{Cli, FunctionsArgs, Mode, RunArgs};
pub(crate) use console::ConsoleDisplaySink;
pub(crate) use demo_host::demo_host;
pub(crate) use error_map::{emit_error, map_timer_failed, CliError};
pub(crate) use fixture::{load_config, load_fixture, Fixture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunStatus {
    Ok,
    Error,
    Halted,
}

impl RunStatus {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Halted => "HALTED",
        }
    }

    fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Error => 1,
            Self::Halted => 2,
        }
    }
}

#[derive(Debug)]
pub(crate) struct RunOutcome {
    pub(crate) status: RunStatus,
    pub(crate) value: HostValue,
    pub(crate) batches: Vec<BatchedCategory>,
    pub(crate) reply: Option<String>,
}

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    logging::init_logging();
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Mode::Run(args) => run_script(args),
        Mode::Functions(args) => list_functions(args),
    }
}

fn run_script(args: RunArgs) -> Result<i32, CliError> {
    let outcome = execute_script(args)?;
    for line in outcome_lines(&outcome) {
        println!("{}", line);
    }
    Ok(outcome.status.exit_code())
}

pub(crate) fn execute_script(args: RunArgs) -> Result<RunOutcome, CliError> {
    let fixture = load_fixture(args.fixture.as_deref())?;
    let config = load_config(args.config.as_deref())?;
    let source = match (args.file, args.eval) {
        (Some(path), _) => ScriptSource::File(path),
        (None, Some(source)) => ScriptSource::Inline(source),
        (None, None) => {
            return Err(CliError {
                code: "CLI_SOURCE_MISSING",
                message: "Either --file or --eval is required.".to_string(),
            })
        }
    };

    let sink = Arc::new(ConsoleDisplaySink::default());
    let mut options = BridgeOptions::new(source, Arc::new(InterruptRegistry::new()));
    options.config = config;
    options.host_functions = Some(Arc::new(demo_host(&fixture)));
    options.enumerated_types = Some(Arc::new(StaticTypeCatalog::new(
        fixture.enumerated_types.clone(),
    )));
    options.proxy_shapes = fixture.proxy_shapes();
    options.display = Some(sink.clone());

    let bridge = ScriptBridge::new(options);
    if args.batch {
        bridge.set_batched(Some(BatchedOutput::new()));
    }
    if args.reply {
        bridge.set_reply_buffer();
    }

    let script_args = args
        .args
        .into_iter()
        .map(HostValue::String)
        .collect::<Vec<_>>();
    let timeout = args.timeout_ms.map(Duration::from_millis);
    let (value, timed_out) = execute_with_timeout(&bridge, &script_args, timeout)?;

    let status = if sink.error_count() > 0 {
        RunStatus::Error
    } else if timed_out {
        RunStatus::Halted
    } else {
        RunStatus::Ok
    };
    Ok(RunOutcome {
        status,
        value,
        batches: bridge
            .take_batched()
            .map(|mut batched| batched.flush())
            .unwrap_or_default(),
        reply: bridge.take_reply(),
    })
}

/// Runs `bridge`, interrupting it from a timer thread once `timeout` elapses.
/// Reports whether the interrupt landed while the script was still running.
fn execute_with_timeout(
    bridge: &ScriptBridge,
    args: &[HostValue],
    timeout: Option<Duration>,
) -> Result<(HostValue, bool), CliError> {
    let Some(timeout) = timeout else {
        return Ok((bridge.execute(args), false));
    };

    let handle = bridge.interrupt_handle();
    let (done, finished) = mpsc::channel::<()>();
    let timer = thread::spawn(move || match finished.recv_timeout(timeout) {
        Err(RecvTimeoutError::Timeout) => handle.interrupt(),
        _ => false,
    });
    let value = bridge.execute(args);
    drop(done);
    let timed_out = timer.join().map_err(|_| map_timer_failed())?;
    if timed_out {
        tracing::debug!(timeout_ms = timeout.as_millis() as u64, "script timed out");
    }
    Ok((value, timed_out))
}

pub(crate) fn outcome_lines(outcome: &RunOutcome) -> Vec<String> {
    let mut lines = vec![
        format!("RESULT:{}", outcome.status.label()),
        format!("VALUE:{}", outcome.value),
    ];
    for batch in &outcome.batches {
        for (key, text) in &batch.entries {
            lines.push(format!("BATCH:{}:{}:{}", batch.category, key, text));
        }
    }
    if let Some(reply) = &outcome.reply {
        lines.push(format!(
            "REPLY_JSON:{}",
            serde_json::to_string(reply).unwrap_or_else(|_| "\"\"".to_string())
        ));
    }
    lines
}

fn list_functions(args: FunctionsArgs) -> Result<i32, CliError> {
    let fixture = load_fixture(args.fixture.as_deref())?;
    let config = load_config(args.config.as_deref())?;
    println!("RESULT:OK");
    for line in function_lines(&fixture, &config.library_namespace) {
        println!("{}", line);
    }
    Ok(0)
}

pub(crate) fn function_lines(fixture: &Fixture, namespace: &str) -> Vec<String> {
    let host = demo_host(fixture);
    let index = LibraryIndex::build(host.functions());
    let mut lines = index
        .names()
        .map(|name| {
            let arities = index
                .overloads(name)
                .unwrap_or_default()
                .iter()
                .map(|descriptor| descriptor.arity())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|arity| arity.to_string())
                .collect::<Vec<_>>();
            format!("FUNCTION:{}::{}/{}", namespace, name, arities.join(","))
        })
        .collect::<Vec<_>>();
    lines.extend(fixture.enumerated_types.iter().map(|ty| {
        format!("TYPE:{}:{}", ty.external_name(), ty.constants.join(","))
    }));
    lines
}

#[cfg(test)]
mod tests;
