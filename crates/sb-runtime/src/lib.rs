mod batched;
mod engine;
mod host;
mod interrupt;
mod library;
mod proxy;

mod helpers {
    pub(crate) mod error_map;
    pub(crate) mod rhai_bridge;
}

pub use batched::{BatchedCategory, BatchedOutput};
pub use engine::{
    BridgeConfig, BridgeOptions, ScriptBridge, ScriptSource, DEFAULT_ENTRY_POINT,
    DEFAULT_LIBRARY_NAMESPACE, INLINE_SOURCE_NAME,
};
pub use helpers::rhai_bridge::{EnumConstant, HostFunction, Marshaller};
pub use host::{
    DisplaySink, EmptyHostCommandSurface, EnumeratedTypeCatalog, HostCommandSurface,
    HostFunctionTable, HostHandler, Invocation, RecordingDisplaySink, Severity,
    StaticTypeCatalog, TracingDisplaySink,
};
pub use interrupt::{ExecutionState, InterruptHandle, InterruptRegistry};
pub use library::{resolve_overload, LibraryIndex};
pub use proxy::{
    EnumProxyRegistry, EnumeratedTypeProxy, ProxyShape, ProxyShapeTable, StaticProxyShape,
};
