use rhai::{Dynamic, EvalAltResult, ParseError, Position};
use sb_core::{BridgeError, ErrorKind};

const TOP_LEVEL_FRAME: &str = "<script>";

/// A host-side error in flight through the engine. Scripts may catch it; its
/// `to_string()` is the host message.
#[derive(Debug, Clone)]
pub(crate) struct HostFault(pub(crate) BridgeError);

/// Wraps a host-side error so it can travel through the engine.
pub(crate) fn into_eval_error(error: BridgeError, position: Position) -> Box<EvalAltResult> {
    if error.kind.is_halt() {
        return Box::new(EvalAltResult::ErrorTerminated(Dynamic::UNIT, position));
    }
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(HostFault(error)),
        position,
    ))
}

pub(crate) fn classify_parse_error(error: &ParseError, source: &str) -> BridgeError {
    BridgeError::new(ErrorKind::EngineSyntax, error.err_type().to_string()).with_stack(format!(
        "\tat {} ({})",
        TOP_LEVEL_FRAME,
        location(source, error.position())
    ))
}

/// Maps an engine error to the bridge taxonomy and renders the script call stack,
/// innermost frame first.
pub(crate) fn classify_script_error(error: EvalAltResult, source: &str) -> BridgeError {
    let mut calls: Vec<(String, String, Position)> = Vec::new();
    let mut current = error;
    loop {
        current = match current {
            EvalAltResult::ErrorInFunctionCall(name, call_source, inner, position) => {
                let call_source = if call_source.is_empty() {
                    source.to_string()
                } else {
                    call_source
                };
                calls.push((name, call_source, position));
                *inner
            }
            EvalAltResult::ErrorInModule(name, inner, position) => {
                calls.push((name, source.to_string(), position));
                *inner
            }
            other => break classify_innermost(other, &calls, source),
        }
    }
}

fn classify_innermost(
    error: EvalAltResult,
    calls: &[(String, String, Position)],
    source: &str,
) -> BridgeError {
    let position = error.position();
    let classified = match error {
        EvalAltResult::ErrorTerminated(..) => return BridgeError::halted(),
        // A fault that already carries a stack was raised by a nested execution.
        EvalAltResult::ErrorRuntime(value, _)
            if value
                .read_lock::<HostFault>()
                .is_some_and(|fault| fault.0.stack.is_some()) =>
        {
            return value.cast::<HostFault>().0;
        }
        EvalAltResult::ErrorRuntime(value, _) if value.is::<HostFault>() => {
            value.cast::<HostFault>().0
        }
        EvalAltResult::ErrorSystem(message, _) => BridgeError::new(ErrorKind::EngineRuntime, message),
        EvalAltResult::ErrorParsing(error_type, _) => {
            BridgeError::new(ErrorKind::EngineSyntax, error_type.to_string())
        }
        EvalAltResult::ErrorRuntime(value, _) => {
            BridgeError::new(ErrorKind::EngineRuntime, value.to_string())
        }
        mut other => {
            other.clear_position();
            BridgeError::new(ErrorKind::EngineRuntime, other.to_string())
        }
    };
    classified.with_stack(render_stack(position, calls, source))
}

fn render_stack(innermost: Position, calls: &[(String, String, Position)], source: &str) -> String {
    let mut frames = Vec::with_capacity(calls.len() + 1);
    let mut here = innermost;
    for (name, call_source, call_site) in calls.iter().rev() {
        frames.push(format!("\tat {} ({})", name, location(call_source, here)));
        here = *call_site;
    }
    frames.push(format!(
        "\tat {} ({})",
        TOP_LEVEL_FRAME,
        location(source, here)
    ));
    frames.join("\n")
}

fn location(source: &str, position: Position) -> String {
    match (position.line(), position.position()) {
        (Some(line), Some(column)) => format!("{}:{}:{}", source, line, column),
        (Some(line), None) => format!("{}:{}", source, line),
        _ => source.to_string(),
    }
}
