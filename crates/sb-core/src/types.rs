use serde::{Deserialize, Serialize};

use crate::naming::capitalize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HostType {
    Void,
    Boolean,
    Int,
    Float,
    String,
    /// Regex match state. Has no engine representation.
    Matcher,
    Any,
    Enumerated {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    Record {
        type_name: String,
        fields: Vec<FieldDescriptor>,
    },
    Function,
    #[serde(rename_all = "camelCase")]
    List {
        element_type: Box<HostType>,
    },
    #[serde(rename_all = "camelCase")]
    Map {
        value_type: Box<HostType>,
    },
}

impl HostType {
    pub fn list_of(element_type: HostType) -> Self {
        Self::List {
            element_type: Box::new(element_type),
        }
    }

    pub fn map_of(value_type: HostType) -> Self {
        Self::Map {
            value_type: Box::new(value_type),
        }
    }

    pub fn enumerated(name: impl Into<String>) -> Self {
        Self::Enumerated { name: name.into() }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Void => "void".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Int => "int".to_string(),
            Self::Float => "float".to_string(),
            Self::String => "string".to_string(),
            Self::Matcher => "matcher".to_string(),
            Self::Any => "any".to_string(),
            Self::Enumerated { name } => name.clone(),
            Self::Record { type_name, .. } => type_name.clone(),
            Self::Function => "function".to_string(),
            Self::List { element_type } => format!("{}[]", element_type.name()),
            Self::Map { value_type } => format!("map<{}>", value_type.name()),
        }
    }

    pub fn is_engine_representable(&self) -> bool {
        match self {
            Self::Matcher => false,
            Self::Record { fields, .. } => fields
                .iter()
                .all(|field| field.r#type.is_engine_representable()),
            Self::List { element_type } => element_type.is_engine_representable(),
            Self::Map { value_type } => value_type.is_engine_representable(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub r#type: HostType,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, r#type: HostType) -> Self {
        Self {
            name: name.into(),
            r#type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDescriptor {
    pub name: String,
    pub return_type: HostType,
    pub params: Vec<HostType>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, return_type: HostType, params: Vec<HostType>) -> Self {
        Self {
            name: name.into(),
            return_type,
            params,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Return type first, then parameters in order.
    pub fn types(&self) -> impl Iterator<Item = &HostType> {
        std::iter::once(&self.return_type).chain(self.params.iter())
    }

    pub fn signature(&self) -> String {
        format!(
            "{} {}({})",
            self.return_type.name(),
            self.name,
            self.params
                .iter()
                .map(HostType::name)
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumeratedType {
    pub name: String,
    pub constants: Vec<String>,
}

impl EnumeratedType {
    pub fn new<I, S>(name: impl Into<String>, constants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            constants: constants.into_iter().map(Into::into).collect(),
        }
    }

    /// Name under which the type's prototype is visible to scripts.
    pub fn external_name(&self) -> String {
        capitalize(&self.name)
    }

    pub fn constant(&self, ordinal: usize) -> Option<&str> {
        self.constants.get(ordinal).map(String::as_str)
    }

    pub fn ordinal_of(&self, constant: &str) -> Option<usize> {
        self.constants.iter().position(|name| name == constant)
    }
}
