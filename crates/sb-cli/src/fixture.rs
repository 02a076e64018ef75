use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use sb_core::{EnumeratedType, FieldDescriptor, HostValue};
use sb_runtime::{BridgeConfig, ProxyShapeTable, StaticProxyShape};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error_map::{
    map_config_invalid, map_config_read, map_fixture_invalid, map_fixture_read, CliError,
};

pub(crate) const DEFAULT_PLAYER_NAME: &str = "Adventurer";
pub(crate) const DEFAULT_LEVEL: i64 = 1;

/// Demo host data: player details, enumerated types and their extra proxy fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct Fixture {
    pub(crate) player_name: String,
    pub(crate) level: i64,
    pub(crate) enumerated_types: Vec<EnumeratedType>,
    /// Keyed by the type's script name, e.g. `Element`.
    pub(crate) proxy_fields: BTreeMap<String, ProxyFixture>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            player_name: DEFAULT_PLAYER_NAME.to_string(),
            level: DEFAULT_LEVEL,
            enumerated_types: Vec::new(),
            proxy_fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ProxyFixture {
    pub(crate) fields: Vec<FieldDescriptor>,
    /// constant name -> field name -> value
    pub(crate) values: BTreeMap<String, BTreeMap<String, JsonValue>>,
}

impl Fixture {
    pub(crate) fn proxy_shapes(&self) -> ProxyShapeTable {
        self.proxy_fields
            .iter()
            .fold(ProxyShapeTable::new(), |table, (external_name, proxy)| {
                let shape = proxy.values.iter().fold(
                    StaticProxyShape::new(proxy.fields.clone()),
                    |shape, (constant, values)| {
                        shape.with_values(
                            constant.clone(),
                            values
                                .iter()
                                .map(|(field, value)| (field.clone(), json_to_host(value)))
                                .collect(),
                        )
                    },
                );
                table.with_shape(external_name.clone(), shape)
            })
    }
}

pub(crate) fn json_to_host(value: &JsonValue) -> HostValue {
    match value {
        JsonValue::Null => HostValue::Void,
        JsonValue::Bool(value) => HostValue::Boolean(*value),
        JsonValue::Number(number) => match number.as_i64() {
            Some(value) => HostValue::Int(value),
            None => HostValue::Float(number.as_f64().unwrap_or_default()),
        },
        JsonValue::String(value) => HostValue::string(value.clone()),
        JsonValue::Array(values) => HostValue::List(values.iter().map(json_to_host).collect()),
        JsonValue::Object(entries) => HostValue::Map(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), json_to_host(value)))
                .collect(),
        ),
    }
}

pub(crate) fn load_fixture(path: Option<&Path>) -> Result<Fixture, CliError> {
    let Some(path) = path else {
        return Ok(Fixture::default());
    };
    let raw = fs::read_to_string(path).map_err(map_fixture_read)?;
    serde_json::from_str(&raw).map_err(map_fixture_invalid)
}

pub(crate) fn load_config(path: Option<&Path>) -> Result<BridgeConfig, CliError> {
    let Some(path) = path else {
        return Ok(BridgeConfig::default());
    };
    let raw = fs::read_to_string(path).map_err(map_config_read)?;
    serde_json::from_str(&raw).map_err(map_config_invalid)
}
