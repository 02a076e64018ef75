use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Module, Position, INT};
use sb_core::{capitalize, BridgeError, EnumeratedType, FieldDescriptor, HostValue};

use crate::helpers::error_map::into_eval_error;
use crate::helpers::rhai_bridge::{EnumConstant, Marshaller};
use crate::host::EnumeratedTypeCatalog;

const BUILTIN_GETTERS: [&str; 3] = ["name", "ordinal", "type_name"];

/// Extra per-constant fields an enumerated type exposes beyond its name and ordinal.
pub trait ProxyShape: Send + Sync {
    fn fields(&self) -> &[FieldDescriptor];
    fn value(&self, constant: &str, field: &str) -> Option<HostValue>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticProxyShape {
    fields: Vec<FieldDescriptor>,
    values: BTreeMap<String, BTreeMap<String, HostValue>>,
}

impl StaticProxyShape {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self {
            fields,
            values: BTreeMap::new(),
        }
    }

    pub fn with_values(
        mut self,
        constant: impl Into<String>,
        values: BTreeMap<String, HostValue>,
    ) -> Self {
        self.values.insert(constant.into(), values);
        self
    }
}

impl ProxyShape for StaticProxyShape {
    fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    fn value(&self, constant: &str, field: &str) -> Option<HostValue> {
        self.values
            .get(constant)
            .and_then(|values| values.get(field))
            .cloned()
    }
}

/// Shapes keyed by external type name, filled in once at startup.
#[derive(Clone, Default)]
pub struct ProxyShapeTable {
    shapes: BTreeMap<String, Arc<dyn ProxyShape>>,
}

impl ProxyShapeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shape(
        mut self,
        external_name: impl Into<String>,
        shape: impl ProxyShape + 'static,
    ) -> Self {
        self.shapes.insert(external_name.into(), Arc::new(shape));
        self
    }

    pub fn get(&self, external_name: &str) -> Option<Arc<dyn ProxyShape>> {
        self.shapes.get(external_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

impl fmt::Debug for ProxyShapeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.shapes.keys()).finish()
    }
}

/// Script-side view of one host enumerated type, built from a catalog snapshot.
pub struct EnumeratedTypeProxy {
    ty: EnumeratedType,
    shape: Option<Arc<dyn ProxyShape>>,
}

impl EnumeratedTypeProxy {
    pub fn new(ty: EnumeratedType, shape: Option<Arc<dyn ProxyShape>>) -> Self {
        Self { ty, shape }
    }

    pub fn type_name(&self) -> &str {
        &self.ty.name
    }

    pub fn external_name(&self) -> String {
        self.ty.external_name()
    }

    pub fn count(&self) -> usize {
        self.ty.constants.len()
    }

    pub fn constant(&self, ordinal: usize) -> Option<EnumConstant> {
        self.ty
            .constant(ordinal)
            .map(|name| EnumConstant::new(&self.ty.name, ordinal, name))
    }

    pub fn by_name(&self, name: &str) -> Option<EnumConstant> {
        self.ty
            .ordinal_of(name)
            .map(|ordinal| EnumConstant::new(&self.ty.name, ordinal, name))
    }

    pub fn constants(&self) -> Vec<EnumConstant> {
        self.ty
            .constants
            .iter()
            .enumerate()
            .map(|(ordinal, name)| EnumConstant::new(&self.ty.name, ordinal, name))
            .collect()
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        self.shape.as_deref().map(|shape| shape.fields()).unwrap_or(&[])
    }

    /// `None` when the shape does not declare `field`; `Void` when it declares it without a value.
    pub fn field(&self, constant: &str, field: &str) -> Option<HostValue> {
        let shape = self.shape.as_deref()?;
        shape.fields().iter().find(|entry| entry.name == field)?;
        Some(shape.value(constant, field).unwrap_or_default())
    }

    fn module(self: &Arc<Self>) -> Module {
        let mut module = Module::new();
        let mut identifiers = BTreeSet::new();
        for constant in self.constants() {
            let identifier = constant_identifier(constant.name());
            if !identifiers.insert(identifier.clone()) {
                tracing::warn!(
                    type_name = %self.ty.name,
                    constant = constant.name(),
                    %identifier,
                    "enumerated constant identifier already taken; reachable through get() only"
                );
                continue;
            }
            module.set_var(identifier, Dynamic::from(constant));
        }

        let proxy = Arc::clone(self);
        module.set_native_fn(
            "get",
            move |name: ImmutableString| -> Result<Dynamic, Box<EvalAltResult>> {
                Ok(proxy
                    .by_name(name.as_str())
                    .map(Dynamic::from)
                    .unwrap_or(Dynamic::UNIT))
            },
        );
        let proxy = Arc::clone(self);
        module.set_native_fn(
            "get",
            move |ordinal: INT| -> Result<Dynamic, Box<EvalAltResult>> {
                Ok(usize::try_from(ordinal)
                    .ok()
                    .and_then(|ordinal| proxy.constant(ordinal))
                    .map(Dynamic::from)
                    .unwrap_or(Dynamic::UNIT))
            },
        );
        let proxy = Arc::clone(self);
        module.set_native_fn("all", move || -> Result<Array, Box<EvalAltResult>> {
            Ok(proxy.constants().into_iter().map(Dynamic::from).collect())
        });
        let count = self.count() as INT;
        module.set_native_fn("count", move || -> Result<INT, Box<EvalAltResult>> {
            Ok(count)
        });
        module
    }
}

type ProxyMap = Arc<RwLock<BTreeMap<String, Arc<EnumeratedTypeProxy>>>>;

/// Builds and owns the enumerated-type proxies of one execution.
#[derive(Default)]
pub struct EnumProxyRegistry {
    shapes: ProxyShapeTable,
    proxies: ProxyMap,
}

impl EnumProxyRegistry {
    pub fn new(shapes: ProxyShapeTable) -> Self {
        Self {
            shapes,
            proxies: ProxyMap::default(),
        }
    }

    /// Installs one static module per enumerated type under its capitalized name.
    /// Types whose external name is empty or already in use (including `reserved`) are skipped.
    pub fn register_all(
        &self,
        catalog: &dyn EnumeratedTypeCatalog,
        engine: &mut Engine,
        marshaller: &Marshaller,
        reserved: &[&str],
    ) -> usize {
        register_constant_type(engine);

        let mut taken = reserved
            .iter()
            .map(|name| (*name).to_string())
            .collect::<BTreeSet<_>>();
        let mut fields = BTreeSet::new();
        let mut registered = 0usize;
        for ty in catalog.enumerated_types() {
            let external_name = ty.external_name();
            if external_name.is_empty() || !taken.insert(external_name.clone()) {
                tracing::warn!(
                    type_name = %ty.name,
                    %external_name,
                    "skipping enumerated type without a usable script name"
                );
                continue;
            }

            let proxy = Arc::new(EnumeratedTypeProxy::new(
                ty,
                self.shapes.get(&external_name),
            ));
            fields.extend(proxy.fields().iter().map(|field| field.name.clone()));
            engine.register_static_module(external_name.as_str(), proxy.module().into());
            self.proxies
                .write()
                .insert(proxy.type_name().to_string(), proxy);
            registered += 1;
        }

        for field in fields {
            if BUILTIN_GETTERS.contains(&field.as_str()) {
                tracing::warn!(%field, "proxy field shadows a built-in property; ignored");
                continue;
            }
            self.register_field_getter(engine, marshaller, field);
        }

        tracing::debug!(registered, "registered enumerated type proxies");
        registered
    }

    fn register_field_getter(&self, engine: &mut Engine, marshaller: &Marshaller, field: String) {
        let proxies = Arc::clone(&self.proxies);
        let marshaller = marshaller.clone();
        let name = field.clone();
        engine.register_get(
            name.as_str(),
            move |constant: &mut EnumConstant| -> Result<Dynamic, Box<EvalAltResult>> {
                let proxy = proxies.read().get(constant.type_name()).cloned();
                let value = proxy
                    .and_then(|proxy| proxy.field(constant.name(), &field))
                    .ok_or_else(|| {
                        into_eval_error(
                            BridgeError::protocol(format!(
                                "Enumerated type \"{}\" has no field \"{}\".",
                                constant.type_name(),
                                field
                            )),
                            Position::NONE,
                        )
                    })?;
                Ok(marshaller.to_engine(&value))
            },
        );
    }

    pub fn proxy(&self, type_name: &str) -> Option<Arc<EnumeratedTypeProxy>> {
        self.proxies.read().get(type_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.proxies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.read().is_empty()
    }

    /// Drops every cached proxy. Calling it again is harmless.
    pub fn cleanup(&self) {
        let released = std::mem::take(&mut *self.proxies.write()).len();
        if released > 0 {
            tracing::debug!(released, "released enumerated type proxies");
        }
    }
}

fn register_constant_type(engine: &mut Engine) {
    engine
        .register_type_with_name::<EnumConstant>("EnumConstant")
        .register_get("name", |constant: &mut EnumConstant| {
            constant.name().to_string()
        })
        .register_get("ordinal", |constant: &mut EnumConstant| {
            constant.ordinal() as INT
        })
        .register_get("type_name", |constant: &mut EnumConstant| {
            constant.type_name().to_string()
        })
        .register_fn("to_string", |constant: &mut EnumConstant| {
            constant.name().to_string()
        })
        .register_fn("to_debug", |constant: &mut EnumConstant| {
            format!("{}::{}", capitalize(constant.type_name()), constant.name())
        })
        .register_fn("==", |left: &mut EnumConstant, right: EnumConstant| {
            *left == right
        })
        .register_fn("!=", |left: &mut EnumConstant, right: EnumConstant| {
            *left != right
        });
}

/// Words the script parser rejects as bare identifiers, sorted.
const RESERVED_WORDS: &[&str] = &[
    "Fn", "as", "async", "await", "break", "call", "case", "catch", "const", "continue",
    "curry", "debug", "default", "do", "else", "eval", "exit", "export", "false", "fn", "for",
    "global", "go", "goto", "if", "import", "in", "is", "is_def_fn", "is_def_var", "is_shared",
    "let", "loop", "match", "module", "new", "nil", "null", "package", "print", "private",
    "protected", "public", "return", "shared", "spawn", "static", "super", "switch", "sync",
    "this", "thread", "throw", "true", "try", "type_of", "until", "use", "var", "void", "while",
    "with", "yield",
];

/// Script identifier for a constant name. Anything outside `[A-Za-z0-9_]` becomes `_`.
/// A letter must come before any digit, so names whose first non-underscore character is
/// not a letter (including empty names) get an `n` prefix. Reserved words get a `_` suffix.
pub(crate) fn constant_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if !out
        .trim_start_matches('_')
        .starts_with(|ch: char| ch.is_ascii_alphabetic())
    {
        out.insert(0, 'n');
    }
    if RESERVED_WORDS.binary_search(&out.as_str()).is_ok() {
        out.push('_');
    }
    out
}
