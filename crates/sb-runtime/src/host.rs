use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sb_core::{BridgeError, EnumeratedType, FunctionDescriptor, HostValue};

use crate::batched::BatchedOutput;
use crate::interrupt::RunControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Receives every user-visible status or error line a bridge produces.
pub trait DisplaySink: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

#[derive(Debug, Default)]
pub struct TracingDisplaySink;

impl DisplaySink for TracingDisplaySink {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(target: "script", "{}", message),
            Severity::Warning => tracing::warn!(target: "script", "{}", message),
            Severity::Error => tracing::error!(target: "script", "{}", message),
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingDisplaySink {
    reports: Mutex<Vec<(Severity, String)>>,
}

impl RecordingDisplaySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(Severity, String)> {
        self.reports.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.reports
            .lock()
            .iter()
            .filter(|(severity, _)| *severity == Severity::Error)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl DisplaySink for RecordingDisplaySink {
    fn report(&self, severity: Severity, message: &str) {
        self.reports.lock().push((severity, message.to_string()));
    }
}

/// Per-execution state host functions may touch through an [`Invocation`].
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) batched: Mutex<Option<BatchedOutput>>,
    pub(crate) reply: Mutex<Option<String>>,
}

/// The view a host function gets of the bridge instance that called it.
pub struct Invocation<'a> {
    session: &'a SessionState,
    display: &'a dyn DisplaySink,
    control: &'a RunControl,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        session: &'a SessionState,
        display: &'a dyn DisplaySink,
        control: &'a RunControl,
    ) -> Self {
        Self {
            session,
            display,
            control,
        }
    }

    pub fn is_batching(&self) -> bool {
        self.session.batched.lock().is_some()
    }

    /// Returns `false` when the bridge is not batching; the caller should emit directly.
    pub fn append_batched(&self, category: &str, key: &str, text: &str) -> bool {
        match self.session.batched.lock().as_mut() {
            Some(batched) => {
                batched.append(category, key, text);
                true
            }
            None => false,
        }
    }

    /// Returns `false` when no reply buffer is attached.
    pub fn write_reply(&self, text: &str) -> bool {
        match self.session.reply.lock().as_mut() {
            Some(reply) => {
                reply.push_str(text);
                true
            }
            None => false,
        }
    }

    pub fn report(&self, severity: Severity, message: &str) {
        self.display.report(severity, message);
    }

    pub fn runtime_exception(&self, message: impl Into<String>) -> BridgeError {
        BridgeError::protocol(message)
    }

    pub fn is_interrupted(&self) -> bool {
        self.control.is_interrupted()
    }
}

/// Host built-in functions exposed to scripts.
pub trait HostCommandSurface: Send + Sync {
    fn functions(&self) -> &[FunctionDescriptor];

    fn call(
        &self,
        descriptor: &FunctionDescriptor,
        args: &[HostValue],
        invocation: &Invocation<'_>,
    ) -> Result<HostValue, BridgeError>;
}

#[derive(Debug, Default)]
pub struct EmptyHostCommandSurface {
    functions: Vec<FunctionDescriptor>,
}

impl HostCommandSurface for EmptyHostCommandSurface {
    fn functions(&self) -> &[FunctionDescriptor] {
        &self.functions
    }

    fn call(
        &self,
        descriptor: &FunctionDescriptor,
        _args: &[HostValue],
        _invocation: &Invocation<'_>,
    ) -> Result<HostValue, BridgeError> {
        Err(BridgeError::host(format!(
            "Host function \"{}\" is not available.",
            descriptor.name
        )))
    }
}

pub type HostHandler = Arc<
    dyn Fn(&FunctionDescriptor, &[HostValue], &Invocation<'_>) -> Result<HostValue, BridgeError>
        + Send
        + Sync,
>;

/// Closure-backed command surface. Overloads share one handler per host name.
#[derive(Default, Clone)]
pub struct HostFunctionTable {
    functions: Vec<FunctionDescriptor>,
    handlers: BTreeMap<String, HostHandler>,
}

impl HostFunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function<F>(mut self, descriptor: FunctionDescriptor, handler: F) -> Self
    where
        F: Fn(&FunctionDescriptor, &[HostValue], &Invocation<'_>) -> Result<HostValue, BridgeError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers
            .insert(descriptor.name.clone(), Arc::new(handler));
        self.functions.push(descriptor);
        self
    }

    /// Adds another signature for a name that already has a handler.
    pub fn with_overload(mut self, descriptor: FunctionDescriptor) -> Self {
        self.functions.push(descriptor);
        self
    }
}

impl HostCommandSurface for HostFunctionTable {
    fn functions(&self) -> &[FunctionDescriptor] {
        &self.functions
    }

    fn call(
        &self,
        descriptor: &FunctionDescriptor,
        args: &[HostValue],
        invocation: &Invocation<'_>,
    ) -> Result<HostValue, BridgeError> {
        let handler = self.handlers.get(&descriptor.name).ok_or_else(|| {
            BridgeError::host(format!(
                "Host function \"{}\" has no handler.",
                descriptor.name
            ))
        })?;
        handler(descriptor, args, invocation)
    }
}

/// Host enumerated types. The snapshot and the live lookup may disagree if the host
/// grows or shrinks a constant table after proxies were built.
pub trait EnumeratedTypeCatalog: Send + Sync {
    fn enumerated_types(&self) -> Vec<EnumeratedType>;
    fn constant_name(&self, type_name: &str, ordinal: usize) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct StaticTypeCatalog {
    types: RwLock<Vec<EnumeratedType>>,
}

impl StaticTypeCatalog {
    pub fn new(types: Vec<EnumeratedType>) -> Self {
        Self {
            types: RwLock::new(types),
        }
    }

    pub fn replace_constants(&self, type_name: &str, constants: Vec<String>) -> bool {
        let mut types = self.types.write();
        match types.iter_mut().find(|entry| entry.name == type_name) {
            Some(entry) => {
                entry.constants = constants;
                true
            }
            None => false,
        }
    }
}

impl EnumeratedTypeCatalog for StaticTypeCatalog {
    fn enumerated_types(&self) -> Vec<EnumeratedType> {
        self.types.read().clone()
    }

    fn constant_name(&self, type_name: &str, ordinal: usize) -> Option<String> {
        self.types
            .read()
            .iter()
            .find(|entry| entry.name == type_name)
            .and_then(|entry| entry.constant(ordinal))
            .map(ToString::to_string)
    }
}
