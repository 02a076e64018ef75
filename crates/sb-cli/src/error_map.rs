use std::fmt::Display;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub(crate) struct CliError {
    pub(crate) code: &'static str,
    pub(crate) message: String,
}

fn map_error(code: &'static str, error: impl Display) -> CliError {
    CliError {
        code,
        message: error.to_string(),
    }
}

pub(crate) fn emit_error(error: CliError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    println!(
        "ERROR_MSG_JSON:{}",
        serde_json::to_string(&error.message).unwrap_or_else(|_| "\"Unknown error\"".to_string())
    );
    1
}

pub(crate) fn map_fixture_read(error: std::io::Error) -> CliError {
    map_error("CLI_FIXTURE_READ", error)
}

pub(crate) fn map_fixture_invalid(error: serde_json::Error) -> CliError {
    map_error("CLI_FIXTURE_INVALID", error)
}

pub(crate) fn map_config_read(error: std::io::Error) -> CliError {
    map_error("CLI_CONFIG_READ", error)
}

pub(crate) fn map_config_invalid(error: serde_json::Error) -> CliError {
    map_error("CLI_CONFIG_INVALID", error)
}

pub(crate) fn map_timer_failed() -> CliError {
    map_error("CLI_TIMER", "timeout thread panicked")
}
