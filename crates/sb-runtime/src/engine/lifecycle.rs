use std::fmt;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use rhai::{Array, CallFnOptions, Dynamic, Engine, FnPtr, Scope, AST};
use sb_core::{BridgeError, HostValue};
use serde::Deserialize;

use crate::batched::BatchedOutput;
use crate::helpers::error_map::{classify_parse_error, classify_script_error};
use crate::helpers::rhai_bridge::{register_value_types, Marshaller, ScriptContext};
use crate::host::{
    DisplaySink, EmptyHostCommandSurface, EnumeratedTypeCatalog, HostCommandSurface,
    SessionState, Severity, StaticTypeCatalog, TracingDisplaySink,
};
use crate::interrupt::{
    ExecutionState, InterruptHandle, InterruptRegistry, Registration, RunControl,
};
use crate::library::{bind, LibraryContext, LibraryIndex};
use crate::proxy::{EnumProxyRegistry, ProxyShapeTable};

pub const DEFAULT_ENTRY_POINT: &str = "main";
pub const DEFAULT_LIBRARY_NAMESPACE: &str = "Lib";
pub const INLINE_SOURCE_NAME: &str = "command line";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    File(PathBuf),
    Inline(String),
}

impl ScriptSource {
    fn load(&self) -> Result<String, BridgeError> {
        match self {
            Self::Inline(source) => Ok(source.clone()),
            Self::File(path) => std::fs::read_to_string(path).map_err(|error| {
                if error.kind() == IoErrorKind::NotFound {
                    BridgeError::source_not_found(path.display())
                } else {
                    BridgeError::source_io(format!("{}: {}", path.display(), error))
                }
            }),
        }
    }
}

/// The name diagnostics use for the source.
impl fmt::Display for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Inline(_) => f.write_str(INLINE_SOURCE_NAME),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    pub entry_point: String,
    pub library_namespace: String,
    pub max_call_levels: Option<usize>,
    pub max_operations: Option<u64>,
    pub strict_variables: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            library_namespace: DEFAULT_LIBRARY_NAMESPACE.to_string(),
            max_call_levels: None,
            max_operations: None,
            strict_variables: true,
        }
    }
}

#[derive(Clone)]
pub struct BridgeOptions {
    pub source: ScriptSource,
    pub config: BridgeConfig,
    pub host_functions: Option<Arc<dyn HostCommandSurface>>,
    pub enumerated_types: Option<Arc<dyn EnumeratedTypeCatalog>>,
    pub proxy_shapes: ProxyShapeTable,
    pub display: Option<Arc<dyn DisplaySink>>,
    pub registry: Arc<InterruptRegistry>,
}

impl BridgeOptions {
    pub fn new(source: ScriptSource, registry: Arc<InterruptRegistry>) -> Self {
        Self {
            source,
            config: BridgeConfig::default(),
            host_functions: None,
            enumerated_types: None,
            proxy_shapes: ProxyShapeTable::default(),
            display: None,
            registry,
        }
    }
}

/// One script invocation. Each instance runs at most once.
pub struct ScriptBridge {
    source: ScriptSource,
    config: BridgeConfig,
    host: Arc<dyn HostCommandSurface>,
    types: Arc<dyn EnumeratedTypeCatalog>,
    shapes: ProxyShapeTable,
    display: Arc<dyn DisplaySink>,
    registry: Arc<InterruptRegistry>,
    control: Arc<RunControl>,
    session: Arc<SessionState>,
}

impl ScriptBridge {
    pub fn new(options: BridgeOptions) -> Self {
        Self {
            source: options.source,
            config: options.config,
            host: options
                .host_functions
                .unwrap_or_else(|| Arc::new(EmptyHostCommandSurface::default())),
            types: options
                .enumerated_types
                .unwrap_or_else(|| Arc::new(StaticTypeCatalog::default())),
            shapes: options.proxy_shapes,
            display: options
                .display
                .unwrap_or_else(|| Arc::new(TracingDisplaySink)),
            registry: options.registry,
            control: Arc::new(RunControl::new()),
            session: Arc::new(SessionState::default()),
        }
    }

    pub fn source(&self) -> &ScriptSource {
        &self.source
    }

    pub fn state(&self) -> ExecutionState {
        self.control.state()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle::new(Arc::clone(&self.control))
    }

    pub fn batched(&self) -> Option<BatchedOutput> {
        self.session.batched.lock().clone()
    }

    /// Host functions append to `batched` instead of emitting directly from now on.
    pub fn set_batched(&self, batched: Option<BatchedOutput>) {
        *self.session.batched.lock() = batched;
    }

    pub fn take_batched(&self) -> Option<BatchedOutput> {
        self.session.batched.lock().take()
    }

    pub fn set_reply_buffer(&self) {
        *self.session.reply.lock() = Some(String::new());
    }

    pub fn take_reply(&self) -> Option<String> {
        self.session.reply.lock().take()
    }

    /// Runs the script and returns its result. Faults are reported to the display sink
    /// and yield `Void`; a cancelled run yields `Void` without a report.
    pub fn execute(&self, args: &[HostValue]) -> HostValue {
        if !self.control.begin() {
            self.report(&BridgeError::protocol(
                "A script bridge instance can only be executed once.",
            ));
            return HostValue::Void;
        }

        let marshaller = Marshaller::new(Arc::clone(&self.types));
        let proxies = EnumProxyRegistry::new(self.shapes.clone());
        let result = {
            let _guard = ExecutionGuard {
                control: &self.control,
                registration: Some(self.registry.register(&self.control)),
                proxies: &proxies,
                marshaller: &marshaller,
            };
            tracing::debug!(
                source = %self.source,
                active = self.registry.len(),
                "script execution started"
            );
            self.run(args, &marshaller, &proxies)
        };

        match result {
            Ok(value) => value,
            Err(error) if error.kind.is_halt() => {
                tracing::debug!(source = %self.source, "script execution halted");
                HostValue::Void
            }
            Err(error) => {
                self.report(&error);
                HostValue::Void
            }
        }
    }

    fn report(&self, error: &BridgeError) {
        tracing::warn!(source = %self.source, code = error.kind.code(), "script fault reported");
        self.display.report(Severity::Error, &error.report_text());
    }

    fn run(
        &self,
        args: &[HostValue],
        marshaller: &Marshaller,
        proxies: &EnumProxyRegistry,
    ) -> Result<HostValue, BridgeError> {
        let source_name = self.source.to_string();
        let text = self.source.load()?;

        let engine = self.build_engine(marshaller, proxies);
        let mut ast = engine
            .compile(text)
            .map_err(|error| classify_parse_error(&error, &source_name))?;
        ast.set_source(source_name.as_str());
        let context = Arc::new(ScriptContext {
            engine,
            ast,
            source_name: source_name.clone(),
        });
        marshaller.attach(&context);

        let mut scope = Scope::new();
        let value = context
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &context.ast)
            .map_err(|error| classify_script_error(*error, &source_name))?;
        let value = self
            .call_entry_point(&context, &mut scope, args, marshaller)
            .map_err(|error| match error {
                EntryError::Script(error) => classify_script_error(*error, &source_name),
                EntryError::Bridge(error) => error,
            })?
            .unwrap_or(value);

        marshaller.to_host(value, None)
    }

    fn build_engine(&self, marshaller: &Marshaller, proxies: &EnumProxyRegistry) -> Engine {
        let mut engine = Engine::new();
        engine.set_strict_variables(self.config.strict_variables);
        if let Some(levels) = self.config.max_call_levels {
            engine.set_max_call_levels(levels);
        }
        if let Some(operations) = self.config.max_operations {
            engine.set_max_operations(operations);
        }

        let control = Arc::clone(&self.control);
        engine.on_progress(move |_| control.is_interrupted().then_some(Dynamic::UNIT));
        let display = Arc::clone(&self.display);
        engine.on_print(move |text| display.report(Severity::Info, text));
        engine.on_debug(|text, source, position| {
            tracing::debug!(
                target: "script",
                source = source.unwrap_or_default(),
                %position,
                "{}",
                text
            );
        });

        register_value_types(&mut engine, marshaller, &self.control);
        let namespace = self.config.library_namespace.as_str();
        let index = LibraryIndex::build(self.host.functions());
        bind(
            &index,
            &mut engine,
            namespace,
            &LibraryContext {
                host: Arc::clone(&self.host),
                marshaller: marshaller.clone(),
                session: Arc::clone(&self.session),
                display: Arc::clone(&self.display),
                control: Arc::clone(&self.control),
            },
        );
        proxies.register_all(self.types.as_ref(), &mut engine, marshaller, &[namespace]);
        engine
    }

    /// The entry point is a `fn` definition or, failing that, a closure left in the
    /// top-level scope under the same name. `Ok(None)` when the script defines neither.
    fn call_entry_point(
        &self,
        context: &ScriptContext,
        scope: &mut Scope,
        args: &[HostValue],
        marshaller: &Marshaller,
    ) -> Result<Option<Dynamic>, EntryError> {
        let entry = self.config.entry_point.as_str();
        let argv = || {
            args.iter()
                .map(|arg| marshaller.to_engine(arg))
                .collect::<Array>()
        };

        let arities = entry_arities(&context.ast, entry);
        if !arities.is_empty() {
            let options = CallFnOptions::new().eval_ast(false);
            let result = match entry_shape(entry, &arities)? {
                EntryShape::ArgumentArray => context.engine.call_fn_with_options::<Dynamic>(
                    options,
                    scope,
                    &context.ast,
                    entry,
                    (argv(),),
                ),
                EntryShape::Bare => context
                    .engine
                    .call_fn_with_options::<Dynamic>(options, scope, &context.ast, entry, ()),
            };
            return result.map(Some).map_err(EntryError::Script);
        }

        let Some(closure) = scope.get_value::<FnPtr>(entry) else {
            return Ok(None);
        };
        // Captured variables are curried in front of the declared parameters.
        let arities = entry_arities(&context.ast, closure.fn_name())
            .into_iter()
            .filter_map(|arity| arity.checked_sub(closure.curry().len()))
            .collect::<Vec<_>>();
        let shape = if arities.is_empty() {
            EntryShape::ArgumentArray
        } else {
            entry_shape(entry, &arities)?
        };
        tracing::trace!(entry, closure = closure.fn_name(), "calling entry point closure");
        let result = match shape {
            EntryShape::ArgumentArray => {
                closure.call::<Dynamic>(&context.engine, &context.ast, (argv(),))
            }
            EntryShape::Bare => closure.call::<Dynamic>(&context.engine, &context.ast, ()),
        };
        result.map(Some).map_err(EntryError::Script)
    }
}

enum EntryShape {
    ArgumentArray,
    Bare,
}

fn entry_shape(entry: &str, arities: &[usize]) -> Result<EntryShape, EntryError> {
    if arities.contains(&1) {
        Ok(EntryShape::ArgumentArray)
    } else if arities.contains(&0) {
        Ok(EntryShape::Bare)
    } else {
        Err(EntryError::Bridge(BridgeError::protocol(format!(
            "Entry point \"{}\" must take no parameters or a single argument array.",
            entry
        ))))
    }
}

enum EntryError {
    Script(Box<rhai::EvalAltResult>),
    Bridge(BridgeError),
}

fn entry_arities(ast: &AST, entry: &str) -> Vec<usize> {
    ast.iter_functions()
        .filter(|function| function.name == entry)
        .map(|function| function.params.len())
        .collect()
}

/// Releases everything an execution acquired, whichever way `run` ends.
struct ExecutionGuard<'a> {
    control: &'a RunControl,
    registration: Option<Registration>,
    proxies: &'a EnumProxyRegistry,
    marshaller: &'a Marshaller,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.control.exit();
        drop(self.registration.take());
        self.marshaller.detach();
        self.proxies.cleanup();
        tracing::debug!("script execution exited");
    }
}
