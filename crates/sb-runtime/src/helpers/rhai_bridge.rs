use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rhai::{
    Array, Dynamic, Engine, EvalAltResult, FnPtr, FuncRegistration, ImmutableString, Map, Module,
    Position, AST, FLOAT, INT,
};
use sb_core::{coerce_value, BridgeError, EnumValue, FunctionRef, HostCallable, HostType, HostValue};

use crate::helpers::error_map::{classify_script_error, into_eval_error, HostFault};
use crate::host::EnumeratedTypeCatalog;
use crate::interrupt::RunControl;

/// Highest argument count `HostFunction.invoke(..)` accepts from scripts.
pub(crate) const MAX_INVOKE_ARITY: usize = 8;

/// Highest argument count [`set_dynamic_arity!`] can register.
pub(crate) const MAX_DYNAMIC_ARITY: usize = 12;

/// Registers `$call` under `$registration` as a native function taking the leading typed
/// parameters followed by `$arity` parameters of any type. `$call` receives the call
/// position, the leading parameters and the remaining arguments in order.
/// Evaluates to `false` when `$arity` exceeds [`MAX_DYNAMIC_ARITY`].
macro_rules! set_dynamic_arity {
    (@arm $registration:ident, $module:expr, $call:ident, [$($lead:ident: $lead_ty:ty),*], [$($arg:ident),*]) => {{
        $registration.set_into_module(
            $module,
            move |context: ::rhai::NativeCallContext $(, $lead: $lead_ty)* $(, $arg: ::rhai::Dynamic)*|
                -> Result<::rhai::Dynamic, Box<::rhai::EvalAltResult>> {
                $call(context.position() $(, $lead)*, vec![$($arg),*])
            },
        );
        true
    }};
    ($registration:expr, $module:expr, $arity:expr, $call:expr $(, $lead:ident: $lead_ty:ty)*) => {{
        let registration = $registration;
        let call = $call;
        match $arity {
            0 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], []),
            1 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a]),
            2 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a, b]),
            3 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a, b, c]),
            4 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a, b, c, d]),
            5 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a, b, c, d, e]),
            6 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a, b, c, d, e, f]),
            7 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a, b, c, d, e, f, g]),
            8 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a, b, c, d, e, f, g, h]),
            9 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a, b, c, d, e, f, g, h, i]),
            10 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a, b, c, d, e, f, g, h, i, j]),
            11 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a, b, c, d, e, f, g, h, i, j, k]),
            12 => set_dynamic_arity!(@arm registration, $module, call, [$($lead: $lead_ty),*], [a, b, c, d, e, f, g, h, i, j, k, l]),
            _ => false,
        }
    }};
}
pub(crate) use set_dynamic_arity;

/// The compiled script and the engine evaluating it, alive for one execution.
pub(crate) struct ScriptContext {
    pub(crate) engine: Engine,
    pub(crate) ast: AST,
    pub(crate) source_name: String,
}

/// Engine-side handle of a host enumerated constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumConstant {
    type_name: ImmutableString,
    ordinal: usize,
    name: ImmutableString,
}

impl EnumConstant {
    pub(crate) fn new(type_name: &str, ordinal: usize, name: &str) -> Self {
        Self {
            type_name: type_name.into(),
            ordinal,
            name: name.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        self.type_name.as_str()
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

impl From<&EnumValue> for EnumConstant {
    fn from(value: &EnumValue) -> Self {
        Self::new(&value.type_name, value.ordinal, &value.name)
    }
}

/// Engine-side wrapper of a host function reference. Scripts call it with `f.invoke(..)`.
#[derive(Clone)]
pub struct HostFunction(FunctionRef);

/// A script function pointer seen from the host side.
struct ScriptCallback {
    fn_ptr: FnPtr,
    context: Weak<ScriptContext>,
    marshaller: Marshaller,
}

impl HostCallable for ScriptCallback {
    fn name(&self) -> &str {
        self.fn_ptr.fn_name()
    }

    fn call(&self, args: &[HostValue]) -> Result<HostValue, BridgeError> {
        let context = self.context.upgrade().ok_or_else(|| {
            BridgeError::protocol(format!(
                "Script function \"{}\" was called after its execution ended.",
                self.fn_ptr.fn_name()
            ))
        })?;
        let args = args
            .iter()
            .map(|arg| self.marshaller.to_engine(arg))
            .collect::<Vec<_>>();
        let result = self
            .fn_ptr
            .call::<Dynamic>(&context.engine, &context.ast, args)
            .map_err(|error| classify_script_error(*error, &context.source_name))?;
        self.marshaller.to_host(result, None)
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

/// Converts between host values and rhai values.
#[derive(Clone)]
pub struct Marshaller {
    types: Arc<dyn EnumeratedTypeCatalog>,
    script: Arc<RwLock<Weak<ScriptContext>>>,
}

impl Marshaller {
    pub fn new(types: Arc<dyn EnumeratedTypeCatalog>) -> Self {
        Self {
            types,
            script: Arc::new(RwLock::new(Weak::new())),
        }
    }

    pub(crate) fn attach(&self, context: &Arc<ScriptContext>) {
        *self.script.write() = Arc::downgrade(context);
    }

    /// Script callbacks handed out earlier fail cleanly from now on.
    pub(crate) fn detach(&self) {
        *self.script.write() = Weak::new();
    }

    pub fn to_engine(&self, value: &HostValue) -> Dynamic {
        match value {
            HostValue::Void => Dynamic::UNIT,
            HostValue::Boolean(value) => Dynamic::from_bool(*value),
            HostValue::Int(value) => Dynamic::from_int(*value),
            HostValue::Float(value) => Dynamic::from_float(*value),
            HostValue::String(value) => Dynamic::from(value.clone()),
            HostValue::Enum(value) => Dynamic::from(EnumConstant::from(value)),
            HostValue::Function(function) => {
                let callback = function
                    .callable()
                    .as_any()
                    .and_then(|any| any.downcast_ref::<ScriptCallback>());
                match callback {
                    Some(callback) => Dynamic::from(callback.fn_ptr.clone()),
                    None => Dynamic::from(HostFunction(function.clone())),
                }
            }
            HostValue::Record(record) => Dynamic::from_map(self.entries_to_map(&record.fields)),
            HostValue::Map(entries) => Dynamic::from_map(self.entries_to_map(entries)),
            HostValue::List(values) => Dynamic::from_array(
                values
                    .iter()
                    .map(|value| self.to_engine(value))
                    .collect::<Array>(),
            ),
        }
    }

    fn entries_to_map(&self, entries: &BTreeMap<String, HostValue>) -> Map {
        let mut map = Map::new();
        for (key, value) in entries {
            map.insert(key.as_str().into(), self.to_engine(value));
        }
        map
    }

    /// Unit always becomes `Void`. With an expected type, the structural value is
    /// coerced to it (numeric widening/narrowing, map to record).
    pub fn to_host(
        &self,
        value: Dynamic,
        expected: Option<&HostType>,
    ) -> Result<HostValue, BridgeError> {
        let value = self.structural(value)?;
        match expected {
            Some(ty) => coerce_value(value, ty),
            None => Ok(value),
        }
    }

    fn structural(&self, value: Dynamic) -> Result<HostValue, BridgeError> {
        let value = value.flatten();
        if value.is_unit() {
            return Ok(HostValue::Void);
        }
        if value.is::<bool>() {
            return Ok(HostValue::Boolean(value.cast::<bool>()));
        }
        if value.is::<INT>() {
            return Ok(HostValue::Int(value.cast::<INT>()));
        }
        if value.is::<FLOAT>() {
            return Ok(HostValue::Float(value.cast::<FLOAT>()));
        }
        if value.is::<ImmutableString>() {
            return Ok(HostValue::String(
                value.cast::<ImmutableString>().to_string(),
            ));
        }
        if value.is::<char>() {
            return Ok(HostValue::String(value.cast::<char>().to_string()));
        }
        if value.is::<Array>() {
            let array = value.cast::<Array>();
            let mut out = Vec::with_capacity(array.len());
            for item in array {
                out.push(self.structural(item)?);
            }
            return Ok(HostValue::List(out));
        }
        if value.is::<Map>() {
            let map = value.cast::<Map>();
            let mut out = BTreeMap::new();
            for (key, value) in map {
                out.insert(key.to_string(), self.structural(value)?);
            }
            return Ok(HostValue::Map(out));
        }
        if value.is::<EnumConstant>() {
            return self.enum_value(&value.cast::<EnumConstant>()).map(HostValue::Enum);
        }
        if value.is::<HostFunction>() {
            return Ok(HostValue::Function(value.cast::<HostFunction>().0));
        }
        if value.is::<FnPtr>() {
            let callback = ScriptCallback {
                fn_ptr: value.cast::<FnPtr>(),
                context: self.script.read().clone(),
                marshaller: self.clone(),
            };
            return Ok(HostValue::Function(FunctionRef::new(Arc::new(callback))));
        }

        Err(BridgeError::marshal(format!(
            "Unsupported engine value type \"{}\".",
            value.type_name()
        )))
    }

    /// Looks the ordinal up in the live constant table.
    fn enum_value(&self, constant: &EnumConstant) -> Result<EnumValue, BridgeError> {
        let name = self
            .types
            .constant_name(constant.type_name(), constant.ordinal())
            .ok_or_else(|| {
                BridgeError::marshal(format!(
                    "Ordinal {} is out of range for enumerated type \"{}\".",
                    constant.ordinal(),
                    constant.type_name()
                ))
            })?;
        Ok(EnumValue::new(constant.type_name(), constant.ordinal(), name))
    }
}

/// Registers the engine types that carry host function references.
pub(crate) fn register_value_types(
    engine: &mut Engine,
    marshaller: &Marshaller,
    control: &Arc<RunControl>,
) {
    engine
        .register_type_with_name::<HostFunction>("HostFunction")
        .register_fn("to_string", |function: &mut HostFunction| {
            format!("function {}", function.0.name())
        })
        .register_type_with_name::<HostFault>("HostFault")
        .register_get("message", |fault: &mut HostFault| fault.0.message.clone())
        .register_fn("to_string", |fault: &mut HostFault| fault.0.message.clone());

    let mut module = Module::new();
    for arity in 0..=MAX_INVOKE_ARITY {
        let marshaller = marshaller.clone();
        let control = Arc::clone(control);
        let invoke = move |position: Position,
                          function: HostFunction,
                          args: Vec<Dynamic>|
              -> Result<Dynamic, Box<EvalAltResult>> {
            if control.is_interrupted() {
                return Err(into_eval_error(BridgeError::halted(), position));
            }
            let values = args
                .into_iter()
                .map(|arg| marshaller.to_host(arg, None))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|error| into_eval_error(error, position))?;
            let result = function
                .0
                .call(&values)
                .map_err(|error| into_eval_error(error, position))?;
            Ok(marshaller.to_engine(&result))
        };
        set_dynamic_arity!(
            FuncRegistration::new("invoke").in_global_namespace(),
            &mut module,
            arity,
            invoke,
            function: HostFunction
        );
    }
    engine.register_global_module(module.into());
}
