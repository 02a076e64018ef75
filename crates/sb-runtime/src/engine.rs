mod lifecycle;

pub use lifecycle::{
    BridgeConfig, BridgeOptions, ScriptBridge, ScriptSource, DEFAULT_ENTRY_POINT,
    DEFAULT_LIBRARY_NAMESPACE, INLINE_SOURCE_NAME,
};

#[cfg(test)]
mod lifecycle_tests;
