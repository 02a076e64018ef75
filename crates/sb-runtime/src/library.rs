use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexMap;
use rhai::{Dynamic, Engine, EvalAltResult, FuncRegistration, Module, Position};
use sb_core::{
    coerce_value, match_score, to_camel_case, BridgeError, FunctionDescriptor, HostValue,
};

use crate::helpers::error_map::into_eval_error;
use crate::helpers::rhai_bridge::{set_dynamic_arity, Marshaller, MAX_DYNAMIC_ARITY};
use crate::host::{DisplaySink, HostCommandSurface, Invocation, SessionState};
use crate::interrupt::RunControl;

/// Host functions grouped by their camelCase script name, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct LibraryIndex {
    entries: IndexMap<String, Vec<FunctionDescriptor>>,
}

impl LibraryIndex {
    /// Descriptors mentioning a type scripts cannot hold (return type or any parameter,
    /// nested or not) are left out.
    pub fn build(functions: &[FunctionDescriptor]) -> Self {
        let mut entries: IndexMap<String, Vec<FunctionDescriptor>> = IndexMap::new();
        let mut blacklisted = 0usize;
        for descriptor in functions {
            if !descriptor.types().all(|ty| ty.is_engine_representable()) {
                tracing::trace!(signature = %descriptor.signature(), "blacklisted host function");
                blacklisted += 1;
                continue;
            }
            let external_name = to_camel_case(&descriptor.name);
            if external_name.is_empty() {
                tracing::warn!(function = %descriptor.name, "host function has no usable script name");
                continue;
            }
            entries
                .entry(external_name)
                .or_default()
                .push(descriptor.clone());
        }
        tracing::debug!(
            bound = entries.len(),
            blacklisted,
            "indexed host library functions"
        );
        Self { entries }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn overloads(&self, external_name: &str) -> Option<&[FunctionDescriptor]> {
        self.entries.get(external_name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Picks the same-arity candidate with the best total [`match_score`]. Ties go to the
/// candidate declared first.
pub fn resolve_overload<'a>(
    external_name: &str,
    candidates: &'a [FunctionDescriptor],
    args: &[HostValue],
) -> Result<&'a FunctionDescriptor, BridgeError> {
    let mut best: Option<(u32, &FunctionDescriptor)> = None;
    for candidate in candidates.iter().filter(|c| c.arity() == args.len()) {
        let score = candidate
            .params
            .iter()
            .zip(args)
            .map(|(ty, arg)| match_score(arg, ty))
            .sum::<Option<u32>>();
        if let Some(score) = score {
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, candidate));
            }
        }
    }
    best.map(|(_, descriptor)| descriptor).ok_or_else(|| {
        let arg_types = args.iter().map(HostValue::type_name).collect::<Vec<_>>();
        BridgeError::no_matching_overload(external_name, &arg_types)
    })
}

/// Everything a library stub needs to reach the host on behalf of one execution.
#[derive(Clone)]
pub(crate) struct LibraryContext {
    pub(crate) host: Arc<dyn HostCommandSurface>,
    pub(crate) marshaller: Marshaller,
    pub(crate) session: Arc<SessionState>,
    pub(crate) display: Arc<dyn DisplaySink>,
    pub(crate) control: Arc<RunControl>,
}

struct LibraryStub {
    external_name: String,
    overloads: Vec<FunctionDescriptor>,
    context: LibraryContext,
}

impl LibraryStub {
    fn dispatch(
        &self,
        position: Position,
        args: Vec<Dynamic>,
    ) -> Result<Dynamic, Box<EvalAltResult>> {
        let fail = |error: BridgeError| into_eval_error(error, position);
        let context = &self.context;
        if context.control.is_interrupted() {
            return Err(fail(BridgeError::halted()));
        }

        let values = args
            .into_iter()
            .map(|arg| context.marshaller.to_host(arg, None))
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;
        let descriptor =
            resolve_overload(&self.external_name, &self.overloads, &values).map_err(fail)?;
        let values = values
            .into_iter()
            .zip(&descriptor.params)
            .map(|(value, ty)| coerce_value(value, ty))
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;
        tracing::trace!(signature = %descriptor.signature(), "library dispatch");

        let invocation = Invocation::new(
            &context.session,
            context.display.as_ref(),
            &context.control,
        );
        let result = context
            .host
            .call(descriptor, &values, &invocation)
            .map_err(fail)?;
        let result = coerce_value(result, &descriptor.return_type).map_err(fail)?;
        Ok(context.marshaller.to_engine(&result))
    }
}

/// Installs the library as a static module named `namespace`, one native function per
/// `(script name, arity)` with parameters of any type. Returns the number of functions
/// installed.
pub(crate) fn bind(
    index: &LibraryIndex,
    engine: &mut Engine,
    namespace: &str,
    context: &LibraryContext,
) -> usize {
    let mut module = Module::new();
    let mut installed = 0usize;
    for (external_name, overloads) in &index.entries {
        let arities = overloads
            .iter()
            .map(FunctionDescriptor::arity)
            .collect::<BTreeSet<_>>();
        let stub = Arc::new(LibraryStub {
            external_name: external_name.clone(),
            overloads: overloads.clone(),
            context: context.clone(),
        });
        for arity in arities {
            let stub = Arc::clone(&stub);
            let registered = set_dynamic_arity!(
                FuncRegistration::new(external_name.as_str()),
                &mut module,
                arity,
                move |position: Position, args: Vec<Dynamic>| stub.dispatch(position, args)
            );
            if registered {
                installed += 1;
            } else {
                tracing::warn!(
                    name = %external_name,
                    arity,
                    max = MAX_DYNAMIC_ARITY,
                    "host function takes too many parameters to bind"
                );
            }
        }
    }
    engine.register_static_module(namespace, module.into());
    tracing::debug!(namespace, installed, "bound host library");
    installed
}
