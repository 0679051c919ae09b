//! Tool input schemas: required-property validation and discovery schema elements
//!
//! A tool declares its input either as an ordered list of [`ToolProperty`]
//! entries or as an explicit JSON-schema document. Both produce the same
//! `{type: "object", properties, required}` element for `tools/list` and the
//! same missing-property report for `tools/call`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("input schema must be a JSON object")]
    NotAnObject,
    #[error("input schema `required` must be an array of strings")]
    InvalidRequired,
    #[error("input schema `type` must be \"object\"")]
    NotObjectType,
}

/// Every required property that is absent or explicitly null.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("One or more required tool properties are missing values. Please provide: {}", .missing.join(", "))]
pub struct MissingProperties {
    pub missing: Vec<String>,
}

pub trait InputSchema: Send + Sync {
    fn required_properties(&self) -> Vec<String>;

    fn schema_element(&self) -> Value;

    fn validate(&self, arguments: &Map<String, Value>) -> Result<(), MissingProperties> {
        let missing = self
            .required_properties()
            .into_iter()
            .filter(|name| arguments.get(name).map_or(true, Value::is_null))
            .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingProperties { missing })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub is_array: bool,
    #[serde(default)]
    pub enum_values: Vec<String>,
}

impl ToolProperty {
    pub fn new(name: impl Into<String>, property_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            property_type: property_type.into(),
            description: String::new(),
            required: false,
            is_array: false,
            enum_values: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    fn scalar_schema(&self) -> Map<String, Value> {
        let mut schema = Map::new();
        let property_type = if self.property_type.trim().is_empty() {
            "string"
        } else {
            self.property_type.trim()
        };
        schema.insert("type".to_string(), json!(property_type));
        if !self.enum_values.is_empty() {
            schema.insert("enum".to_string(), json!(self.enum_values));
        }
        schema
    }

    fn schema(&self) -> Value {
        let mut schema = if self.is_array {
            let mut array = Map::new();
            array.insert("type".to_string(), json!("array"));
            array.insert("items".to_string(), Value::Object(self.scalar_schema()));
            array
        } else {
            self.scalar_schema()
        };

        if !self.description.is_empty() {
            schema.insert("description".to_string(), json!(self.description));
        }
        Value::Object(schema)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyListSchema {
    properties: Vec<ToolProperty>,
}

impl PropertyListSchema {
    pub fn new(properties: Vec<ToolProperty>) -> Self {
        Self { properties }
    }

    pub fn properties(&self) -> &[ToolProperty] {
        &self.properties
    }
}

impl InputSchema for PropertyListSchema {
    fn required_properties(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|property| property.required)
            .map(|property| property.name.clone())
            .collect()
    }

    fn schema_element(&self) -> Value {
        let properties = self
            .properties
            .iter()
            .map(|property| (property.name.clone(), property.schema()))
            .collect::<Map<_, _>>();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_properties(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchemaDocument {
    document: Map<String, Value>,
    required: Vec<String>,
}

impl JsonSchemaDocument {
    pub fn parse(document: Value) -> Result<Self, SchemaError> {
        let Value::Object(mut document) = document else {
            return Err(SchemaError::NotAnObject);
        };

        match document.get("type") {
            None => {
                document.insert("type".to_string(), json!("object"));
            }
            Some(Value::String(kind)) if kind == "object" => {}
            Some(_) => return Err(SchemaError::NotObjectType),
        }

        let required = match document.get("required") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(SchemaError::InvalidRequired)?,
            Some(_) => return Err(SchemaError::InvalidRequired),
        };

        Ok(Self { document, required })
    }
}

impl InputSchema for JsonSchemaDocument {
    fn required_properties(&self) -> Vec<String> {
        self.required.clone()
    }

    fn schema_element(&self) -> Value {
        let mut element = self.document.clone();
        element
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        Value::Object(element)
    }
}

/// How a tool declares its input.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInputShape {
    Properties(Vec<ToolProperty>),
    Schema(Value),
}

impl Default for ToolInputShape {
    fn default() -> Self {
        Self::Properties(Vec::new())
    }
}

impl ToolInputShape {
    pub fn into_schema(self) -> Result<Box<dyn InputSchema>, SchemaError> {
        match self {
            Self::Properties(properties) => Ok(Box::new(PropertyListSchema::new(properties))),
            Self::Schema(document) => Ok(Box::new(JsonSchemaDocument::parse(document)?)),
        }
    }
}
