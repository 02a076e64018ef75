use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SourceNotFound,
    SourceIo,
    /// Cooperative cancellation. Never reported as a fault.
    EvaluationHalted,
    EngineSyntax,
    EngineRuntime,
    HostException,
    ScriptProtocol,
    Marshal,
    NoMatchingOverload,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::SourceNotFound => "BRIDGE_SOURCE_NOT_FOUND",
            Self::SourceIo => "BRIDGE_SOURCE_IO",
            Self::EvaluationHalted => "BRIDGE_EVALUATION_HALTED",
            Self::EngineSyntax => "BRIDGE_ENGINE_SYNTAX",
            Self::EngineRuntime => "BRIDGE_ENGINE_RUNTIME",
            Self::HostException => "BRIDGE_HOST_EXCEPTION",
            Self::ScriptProtocol => "BRIDGE_SCRIPT_PROTOCOL",
            Self::Marshal => "BRIDGE_MARSHAL",
            Self::NoMatchingOverload => "BRIDGE_NO_MATCHING_OVERLOAD",
        }
    }

    /// Category shown to the caller. Marshalling contract violations surface as protocol errors.
    pub fn reported_as(self) -> Self {
        match self {
            Self::Marshal | Self::NoMatchingOverload => Self::ScriptProtocol,
            other => other,
        }
    }

    pub fn is_halt(self) -> bool {
        self == Self::EvaluationHalted
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{}: {message}", kind.code())]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub message: String,
    pub stack: Option<String>,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        let stack = stack.into();
        if !stack.is_empty() {
            self.stack = Some(stack);
        }
        self
    }

    pub fn source_not_found(path: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::SourceNotFound, format!("File not found: {}", path))
    }

    pub fn source_io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SourceIo, message)
    }

    pub fn halted() -> Self {
        Self::new(ErrorKind::EvaluationHalted, "Evaluation halted.")
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HostException, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ScriptProtocol, message)
    }

    pub fn marshal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Marshal, message)
    }

    pub fn no_matching_overload(function: &str, arg_types: &[&str]) -> Self {
        Self::new(
            ErrorKind::NoMatchingOverload,
            format!(
                "No overload of \"{}\" accepts ({}).",
                function,
                arg_types.join(", ")
            ),
        )
    }

    /// The line handed to the display sink.
    pub fn report_text(&self) -> String {
        let head = match self.kind.reported_as() {
            ErrorKind::SourceNotFound => self.message.clone(),
            ErrorKind::SourceIo => format!("Script file I/O error: {}", self.message),
            ErrorKind::EvaluationHalted => self.message.clone(),
            ErrorKind::EngineSyntax => format!("Script evaluator exception: {}", self.message),
            ErrorKind::EngineRuntime => format!("Script error: {}", self.message),
            ErrorKind::HostException => self.message.clone(),
            _ => format!("Script exception: {}", self.message),
        };
        match &self.stack {
            Some(stack) => format!("{}\n{}", head, stack),
            None => head,
        }
    }
}
