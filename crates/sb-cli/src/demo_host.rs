use sb_core::{coerce_value, BridgeError, FunctionDescriptor, HostType, HostValue};
use sb_runtime::{HostFunctionTable, Invocation, Severity};

use crate::fixture::Fixture;

fn text_arg(args: &[HostValue], index: usize) -> String {
    args.get(index).map(ToString::to_string).unwrap_or_default()
}

fn emit(invocation: &Invocation<'_>, text: &str) {
    invocation.report(Severity::Info, text);
}

/// A small host command surface for trying scripts from the command line.
pub(crate) fn demo_host(fixture: &Fixture) -> HostFunctionTable {
    let player_name = fixture.player_name.clone();
    let level = fixture.level;

    HostFunctionTable::new()
        .with_function(
            FunctionDescriptor::new("print", HostType::Void, vec![HostType::String]),
            |_, args, invocation| {
                emit(invocation, &text_arg(args, 0));
                Ok(HostValue::Void)
            },
        )
        .with_function(
            FunctionDescriptor::new("print_html", HostType::Void, vec![HostType::String]),
            |_, args, invocation| {
                let html = text_arg(args, 0);
                if !invocation.write_reply(&html) {
                    emit(invocation, &html);
                }
                Ok(HostValue::Void)
            },
        )
        .with_function(
            FunctionDescriptor::new("get_player_name", HostType::String, Vec::new()),
            move |_, _, _| Ok(HostValue::string(player_name.clone())),
        )
        .with_function(
            FunctionDescriptor::new("my_level", HostType::Int, Vec::new()),
            move |_, _, _| Ok(HostValue::Int(level)),
        )
        .with_function(
            FunctionDescriptor::new("to_int", HostType::Int, vec![HostType::String]),
            |_, args, _| match args.first() {
                Some(value @ HostValue::Float(_)) => coerce_value(value.clone(), &HostType::Int),
                Some(HostValue::String(text)) => text
                    .trim()
                    .parse::<i64>()
                    .map(HostValue::Int)
                    .map_err(|_| BridgeError::host(format!("\"{}\" is not a number.", text))),
                _ => Ok(HostValue::Int(0)),
            },
        )
        .with_overload(FunctionDescriptor::new(
            "to_int",
            HostType::Int,
            vec![HostType::Float],
        ))
        .with_function(
            FunctionDescriptor::new(
                "batch_write",
                HostType::Boolean,
                vec![HostType::String, HostType::String, HostType::String],
            ),
            |_, args, invocation| {
                let (category, key, text) =
                    (text_arg(args, 0), text_arg(args, 1), text_arg(args, 2));
                if invocation.append_batched(&category, &key, &text) {
                    return Ok(HostValue::Boolean(true));
                }
                emit(invocation, &text);
                Ok(HostValue::Boolean(false))
            },
        )
        .with_function(
            FunctionDescriptor::new("abort", HostType::Void, vec![HostType::String]),
            |_, args, invocation| Err(invocation.runtime_exception(text_arg(args, 0))),
        )
        .with_function(
            FunctionDescriptor::new(
                "for_each",
                HostType::list_of(HostType::Any),
                vec![HostType::list_of(HostType::Any), HostType::Function],
            ),
            |_, args, invocation| match args {
                [HostValue::List(values), HostValue::Function(callback)] => {
                    let mut results = Vec::with_capacity(values.len());
                    for value in values {
                        if invocation.is_interrupted() {
                            return Err(BridgeError::halted());
                        }
                        results.push(callback.call(std::slice::from_ref(value))?);
                    }
                    Ok(HostValue::List(results))
                }
                _ => Err(BridgeError::host("for_each expects a list and a function.")),
            },
        )
        .with_function(
            FunctionDescriptor::new("create_matcher", HostType::Matcher, vec![HostType::String]),
            |_, _, _| Err(BridgeError::host("Matchers cannot be created from scripts.")),
        )
}
