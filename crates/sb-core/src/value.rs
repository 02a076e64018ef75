use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::BridgeError;
use crate::types::{FieldDescriptor, HostType};

/// Something the opposite side can call with host values.
pub trait HostCallable: Send + Sync {
    fn name(&self) -> &str;
    fn call(&self, args: &[HostValue]) -> Result<HostValue, BridgeError>;

    /// Lets a runtime recognise callables it created itself.
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// Opaque function reference. Two references are equal only if they share the same callable.
#[derive(Clone)]
pub struct FunctionRef(Arc<dyn HostCallable>);

impl FunctionRef {
    pub fn new(callable: Arc<dyn HostCallable>) -> Self {
        Self(callable)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn call(&self, args: &[HostValue]) -> Result<HostValue, BridgeError> {
        self.0.call(args)
    }

    pub fn callable(&self) -> &Arc<dyn HostCallable> {
        &self.0
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef({})", self.name())
    }
}

impl PartialEq for FunctionRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordValue {
    pub type_name: String,
    pub fields: BTreeMap<String, HostValue>,
}

impl RecordValue {
    pub fn new(type_name: impl Into<String>, fields: BTreeMap<String, HostValue>) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub type_name: String,
    pub ordinal: usize,
    pub name: String,
}

impl EnumValue {
    pub fn new(type_name: impl Into<String>, ordinal: usize, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ordinal,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    Void,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    Record(RecordValue),
    Enum(EnumValue),
    Function(FunctionRef),
    List(Vec<HostValue>),
    Map(BTreeMap<String, HostValue>),
}

impl HostValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Void => "void",
            Self::Boolean(_) => "boolean",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Record(record) => record.type_name.as_str(),
            Self::Enum(value) => value.type_name.as_str(),
            Self::Function(_) => "function",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => Ok(()),
            Self::Boolean(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::String(value) => f.write_str(value),
            Self::Enum(value) => f.write_str(&value.name),
            Self::Function(function) => write!(f, "function {}", function.name()),
            Self::Record(record) => {
                write!(f, "{} ", record.type_name)?;
                write_entries(f, &record.fields)
            }
            Self::List(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                f.write_str("]")
            }
            Self::Map(values) => write_entries(f, values),
        }
    }
}

fn write_entries(f: &mut fmt::Formatter<'_>, entries: &BTreeMap<String, HostValue>) -> fmt::Result {
    f.write_str("{")?;
    for (index, (key, value)) in entries.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}: {}", key, value)?;
    }
    f.write_str("}")
}

const EXACT_MATCH: u32 = 3;
const COERCIBLE_MATCH: u32 = 2;
const NARROWING_MATCH: u32 = 1;
const ANY_MATCH: u32 = 1;

/// How well `value` fits a parameter of type `ty`; `None` when it cannot be converted at all.
pub fn match_score(value: &HostValue, ty: &HostType) -> Option<u32> {
    match (ty, value) {
        (HostType::Any, _) => Some(ANY_MATCH),
        (HostType::Void, HostValue::Void) => Some(EXACT_MATCH),
        (_, HostValue::Void) => Some(ANY_MATCH),
        (HostType::Boolean, HostValue::Boolean(_))
        | (HostType::Int, HostValue::Int(_))
        | (HostType::Float, HostValue::Float(_))
        | (HostType::String, HostValue::String(_))
        | (HostType::Function, HostValue::Function(_)) => Some(EXACT_MATCH),
        (HostType::Float, HostValue::Int(_)) => Some(COERCIBLE_MATCH),
        (HostType::Int, HostValue::Float(value)) if value.is_finite() => Some(NARROWING_MATCH),
        (HostType::Enumerated { name }, HostValue::Enum(value)) if value.type_name == *name => {
            Some(EXACT_MATCH)
        }
        (HostType::Record { type_name, .. }, HostValue::Record(record))
            if record.type_name == *type_name =>
        {
            Some(EXACT_MATCH)
        }
        (HostType::Record { fields, .. }, HostValue::Map(entries)) => {
            for field in fields {
                let entry = entries.get(&field.name)?;
                match_score(entry, &field.r#type)?;
            }
            Some(COERCIBLE_MATCH)
        }
        (HostType::List { element_type }, HostValue::List(values)) => values
            .iter()
            .map(|value| match_score(value, element_type))
            .min_by_key(|score| score.unwrap_or(0))
            .unwrap_or(Some(EXACT_MATCH)),
        (HostType::Map { value_type }, HostValue::Map(entries)) => entries
            .values()
            .map(|value| match_score(value, value_type))
            .min_by_key(|score| score.unwrap_or(0))
            .unwrap_or(Some(EXACT_MATCH)),
        _ => None,
    }
}

/// Converts `value` to the declared host type. `Void` passes through unchanged.
pub fn coerce_value(value: HostValue, ty: &HostType) -> Result<HostValue, BridgeError> {
    match (ty, value) {
        (_, HostValue::Void) => Ok(HostValue::Void),
        (HostType::Any, value) => Ok(value),
        (HostType::Void, _) => Ok(HostValue::Void),
        (HostType::Float, HostValue::Int(value)) => Ok(HostValue::Float(value as f64)),
        (HostType::Int, HostValue::Float(value)) => {
            if value.is_finite() && value.abs() < i64::MAX as f64 {
                Ok(HostValue::Int(value.trunc() as i64))
            } else {
                Err(BridgeError::marshal(format!(
                    "Float {} cannot be narrowed to int.",
                    value
                )))
            }
        }
        (HostType::Record { type_name, fields }, HostValue::Map(entries)) => {
            coerce_record(type_name, fields, entries)
        }
        (HostType::List { element_type }, HostValue::List(values)) => values
            .into_iter()
            .map(|value| coerce_value(value, element_type))
            .collect::<Result<Vec<_>, _>>()
            .map(HostValue::List),
        (HostType::Map { value_type }, HostValue::Map(entries)) => entries
            .into_iter()
            .map(|(key, value)| coerce_value(value, value_type).map(|value| (key, value)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(HostValue::Map),
        (ty, value) => {
            if match_score(&value, ty).is_some() {
                Ok(value)
            } else {
                Err(BridgeError::marshal(format!(
                    "Expected {} but found {}.",
                    ty.name(),
                    value.type_name()
                )))
            }
        }
    }
}

fn coerce_record(
    type_name: &str,
    fields: &[FieldDescriptor],
    mut entries: BTreeMap<String, HostValue>,
) -> Result<HostValue, BridgeError> {
    let mut values = BTreeMap::new();
    for field in fields {
        let Some(entry) = entries.remove(&field.name) else {
            return Err(BridgeError::marshal(format!(
                "Record \"{}\" is missing field \"{}\".",
                type_name, field.name
            )));
        };
        values.insert(field.name.clone(), coerce_value(entry, &field.r#type)?);
    }
    Ok(HostValue::Record(RecordValue::new(type_name, values)))
}
