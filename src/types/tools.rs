//! MCP Tool Types
//!
//! Tool descriptors, their input schemas, and the `tools/call` request and
//! result shapes. Descriptors are built explicitly with [`ToolBuilder`], or
//! derived from a Rust argument struct with [`ToolBuilder::from_args`].

use indexmap::IndexMap;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject, SingleOrVec};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// JSON Schema dialect advertised on every input schema
pub const SCHEMA_DIALECT: &str = "https://json-schema.org/draft/2020-12/schema#";

/// Type of a single tool parameter
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase", from = "Value")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Array,
    #[default]
    Object,
}

impl From<Value> for ParameterType {
    /// Anything that is not one of the five basic kinds falls back to `object`
    fn from(value: Value) -> Self {
        let name = match &value {
            Value::String(name) => Some(name.as_str()),
            Value::Array(names) => names
                .iter()
                .filter_map(Value::as_str)
                .find(|name| *name != "null"),
            _ => None,
        };
        match name {
            Some("string") => ParameterType::String,
            Some("number") | Some("integer") => ParameterType::Number,
            Some("boolean") => ParameterType::Boolean,
            Some("array") => ParameterType::Array,
            _ => ParameterType::Object,
        }
    }
}

/// Schema of one named parameter
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParameterSchema {
    #[serde(rename = "type", default)]
    pub kind: ParameterType,
    #[serde(default)]
    pub description: String,
    /// Element schema for array parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,
    /// Mirrored into [`InputSchema::required`]; not serialized itself
    #[serde(skip)]
    pub required: bool,
}

impl ParameterSchema {
    pub fn new(kind: ParameterType) -> Self {
        Self {
            kind,
            description: String::new(),
            items: None,
            required: true,
        }
    }
}

/// Object schema describing a tool's arguments
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InputSchema {
    #[serde(rename = "type", default = "object_type")]
    pub kind: String,
    #[serde(default)]
    pub properties: IndexMap<String, ParameterSchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(
        rename = "additionalProperties",
        default,
        deserialize_with = "lenient_bool"
    )]
    pub additional_properties: bool,
    #[serde(rename = "$schema", default = "schema_dialect")]
    pub schema: String,
}

fn object_type() -> String {
    "object".to_string()
}

fn schema_dialect() -> String {
    SCHEMA_DIALECT.to_string()
}

/// `additionalProperties` may be a schema object in foreign descriptors
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_bool().unwrap_or(true))
}

impl Default for InputSchema {
    fn default() -> Self {
        Self {
            kind: object_type(),
            properties: IndexMap::new(),
            required: Vec::new(),
            additional_properties: false,
            schema: schema_dialect(),
        }
    }
}

impl InputSchema {
    /// Build from parameters, deriving the `required` list from their flags
    pub fn from_parameters(properties: IndexMap<String, ParameterSchema>) -> Self {
        let required = properties
            .iter()
            .filter(|(_, schema)| schema.required)
            .map(|(name, _)| name.clone())
            .collect();
        Self {
            properties,
            required,
            ..Default::default()
        }
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

/// A tool descriptor
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: InputSchema,
}

/// A named parameter ready to be added to a [`ToolBuilder`]
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub schema: ParameterSchema,
}

/// Builder for tool parameters
pub struct ParameterBuilder {
    name: String,
    schema: ParameterSchema,
}

impl ParameterBuilder {
    /// A required parameter of the given type
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            schema: ParameterSchema::new(kind),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.schema.description = description.into();
        self
    }

    /// Parameters are required unless marked optional
    pub fn optional(mut self) -> Self {
        self.schema.required = false;
        self
    }

    /// Element schema of an array parameter
    pub fn items(mut self, items: ParameterSchema) -> Self {
        self.schema.items = Some(Box::new(items));
        self
    }

    pub fn build(self) -> ToolParameter {
        ToolParameter {
            name: self.name,
            schema: self.schema,
        }
    }
}

/// Builder for tool descriptors
pub struct ToolBuilder {
    name: String,
    description: String,
    parameters: IndexMap<String, ParameterSchema>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: IndexMap::new(),
        }
    }

    /// Derive the parameter list from the fields of `A`.
    ///
    /// Field doc comments become descriptions and `Option<T>` fields are
    /// optional; every other field is required.
    pub fn from_args<A: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        let mut builder = Self::new(name, description);
        let root = SchemaGenerator::default().into_root_schema_for::<A>();

        if let Some(object) = root.schema.object {
            for (field, schema) in &object.properties {
                let mut parameter = parameter_from_schema(schema);
                parameter.required = object.required.contains(field);
                builder.parameters.insert(field.clone(), parameter);
            }
        }
        builder
    }

    /// Add a parameter; a later parameter with the same name replaces the earlier one
    pub fn add_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.insert(parameter.name, parameter.schema);
        self
    }

    pub fn string_param(self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.add_parameter(
            ParameterBuilder::new(name, ParameterType::String)
                .description(description)
                .build(),
        )
    }

    pub fn number_param(self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.add_parameter(
            ParameterBuilder::new(name, ParameterType::Number)
                .description(description)
                .build(),
        )
    }

    pub fn boolean_param(self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.add_parameter(
            ParameterBuilder::new(name, ParameterType::Boolean)
                .description(description)
                .build(),
        )
    }

    pub fn object_param(self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.add_parameter(
            ParameterBuilder::new(name, ParameterType::Object)
                .description(description)
                .build(),
        )
    }

    pub fn array_param(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        items: ParameterType,
    ) -> Self {
        self.add_parameter(
            ParameterBuilder::new(name, ParameterType::Array)
                .description(description)
                .items(ParameterSchema::new(items))
                .build(),
        )
    }

    pub fn build(self) -> Tool {
        Tool {
            name: self.name,
            description: self.description,
            input_schema: InputSchema::from_parameters(self.parameters),
        }
    }
}

fn parameter_from_schema(schema: &Schema) -> ParameterSchema {
    match schema {
        Schema::Bool(_) => ParameterSchema::new(ParameterType::Object),
        Schema::Object(object) => parameter_from_object(object),
    }
}

fn parameter_from_object(object: &SchemaObject) -> ParameterSchema {
    let kind = match &object.instance_type {
        Some(SingleOrVec::Single(kind)) => parameter_type(Some(kind.as_ref().clone())),
        Some(SingleOrVec::Vec(kinds)) => {
            parameter_type(kinds.iter().find(|k| **k != InstanceType::Null).cloned())
        }
        None => ParameterType::Object,
    };

    let items = match kind {
        ParameterType::Array => object
            .array
            .as_ref()
            .and_then(|array| array.items.as_ref())
            .and_then(|items| match items {
                SingleOrVec::Single(item) => Some(parameter_from_schema(item)),
                SingleOrVec::Vec(items) => items.first().map(parameter_from_schema),
            })
            .map(Box::new),
        _ => None,
    };

    ParameterSchema {
        kind,
        description: object
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.description.clone())
            .unwrap_or_default(),
        items,
        required: true,
    }
}

fn parameter_type(kind: Option<InstanceType>) -> ParameterType {
    match kind {
        Some(InstanceType::String) => ParameterType::String,
        Some(InstanceType::Integer) | Some(InstanceType::Number) => ParameterType::Number,
        Some(InstanceType::Boolean) => ParameterType::Boolean,
        Some(InstanceType::Array) => ParameterType::Array,
        _ => ParameterType::Object,
    }
}

/// Result of `tools/list`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

/// Request metadata carried in `_meta`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RequestMeta {
    #[serde(
        rename = "progressToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub progress_token: Option<Value>,
}

/// Parameters of `tools/call`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub arguments: Map<String, Value>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<RequestMeta>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Map<String, Value>, D::Error> {
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One content item of a call result
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Content {
    #[serde(rename = "type", default = "text_type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

fn text_type() -> String {
    "text".to_string()
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: text_type(),
            text: text.into(),
        }
    }
}

/// Result of `tools/call`.
///
/// When `is_error` is set the content carries diagnostics, not a payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CallToolResult {
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    #[serde(default)]
    pub content: Vec<Content>,
}

impl CallToolResult {
    pub fn success<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            is_error: false,
            content: texts.into_iter().map(Content::text).collect(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![Content::text(message)],
        }
    }

    /// Text of the first content item, or `""`
    pub fn text(&self) -> &str {
        self.content.first().map(|c| c.text.as_str()).unwrap_or("")
    }
}
