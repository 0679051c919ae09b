//! Argument converter chain
//!
//! Converters are tried in a fixed order and the first one whose
//! [`ArgumentConverter::can_convert`] accepts a target wins. Resolution happens
//! once, when a tool is registered.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::tools::context::BoundValue;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("cannot convert value {value} to `{target}`: {reason}")]
    Invalid {
        value: String,
        target: &'static str,
        reason: String,
    },
}

/// Raw argument as it arrives from the transport or the host.
#[derive(Debug, Clone, PartialEq)]
pub enum RawArgument {
    Null,
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<Option<&Value>> for RawArgument {
    fn from(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Null,
            Some(value) => Self::Json(value.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    String,
    Structured,
    Sequence,
}

type DeserializeFn = fn(Value) -> Result<BoundValue, serde_json::Error>;

/// The typed value a handler expects for one argument.
#[derive(Clone, Copy)]
pub struct TargetType {
    name: &'static str,
    kind: TargetKind,
    deserialize: DeserializeFn,
}

impl fmt::Debug for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

fn deserialize_boxed<T: DeserializeOwned + Send + 'static>(
    value: Value,
) -> Result<BoundValue, serde_json::Error> {
    serde_json::from_value::<T>(value).map(|typed| Box::new(typed) as BoundValue)
}

impl TargetType {
    pub fn string() -> Self {
        Self {
            name: type_name::<String>(),
            kind: TargetKind::String,
            deserialize: deserialize_boxed::<String>,
        }
    }

    pub fn structured<T: DeserializeOwned + Send + 'static>() -> Self {
        Self {
            name: type_name::<T>(),
            kind: TargetKind::Structured,
            deserialize: deserialize_boxed::<T>,
        }
    }

    pub fn sequence<T: DeserializeOwned + Send + 'static>() -> Self {
        Self {
            name: type_name::<Vec<T>>(),
            kind: TargetKind::Sequence,
            deserialize: deserialize_boxed::<Vec<T>>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }
}

pub trait ArgumentConverter: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_convert(&self, target: &TargetType) -> bool;

    fn convert(&self, raw: RawArgument, target: &TargetType) -> Result<BoundValue, ConversionError>;
}

/// Accepts string targets and yields the raw value's text form.
#[derive(Debug, Default)]
pub struct StringConverter;

impl ArgumentConverter for StringConverter {
    fn name(&self) -> &'static str {
        "string"
    }

    fn can_convert(&self, target: &TargetType) -> bool {
        target.kind == TargetKind::String
    }

    fn convert(&self, raw: RawArgument, _target: &TargetType) -> Result<BoundValue, ConversionError> {
        let text = match raw {
            RawArgument::Null | RawArgument::Json(Value::Null) => String::new(),
            RawArgument::Json(Value::String(text)) | RawArgument::Text(text) => text,
            RawArgument::Json(other) => other.to_string(),
            RawArgument::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        };
        Ok(Box::new(text))
    }
}

/// Accepts any concrete, non-collection target and deserializes it from JSON.
///
/// An absent argument is handed to the target as `null`, so `Option<T>` binds to `None`.
#[derive(Debug, Default)]
pub struct StructuredConverter;

impl ArgumentConverter for StructuredConverter {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn can_convert(&self, target: &TargetType) -> bool {
        matches!(target.kind, TargetKind::String | TargetKind::Structured)
    }

    fn convert(&self, raw: RawArgument, target: &TargetType) -> Result<BoundValue, ConversionError> {
        let value = match raw {
            RawArgument::Null => Value::Null,
            RawArgument::Json(value) => value,
            RawArgument::Text(text) => parse_json(text.as_bytes(), target)?,
            RawArgument::Bytes(bytes) => parse_json(&bytes, target)?,
        };

        let shown = value.to_string();
        (target.deserialize)(value).map_err(|err| ConversionError::Invalid {
            value: shown,
            target: target.name,
            reason: err.to_string(),
        })
    }
}

fn parse_json(raw: &[u8], target: &TargetType) -> Result<Value, ConversionError> {
    serde_json::from_slice(raw).map_err(|err| ConversionError::Invalid {
        value: String::from_utf8_lossy(raw).into_owned(),
        target: target.name,
        reason: err.to_string(),
    })
}

#[derive(Clone)]
pub struct ConverterChain {
    converters: Vec<Arc<dyn ArgumentConverter>>,
}

impl fmt::Debug for ConverterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.converters.iter().map(|converter| converter.name()))
            .finish()
    }
}

impl Default for ConverterChain {
    fn default() -> Self {
        Self::new(vec![
            Arc::new(StringConverter) as Arc<dyn ArgumentConverter>,
            Arc::new(StructuredConverter),
        ])
    }
}

impl ConverterChain {
    pub fn new(converters: Vec<Arc<dyn ArgumentConverter>>) -> Self {
        Self { converters }
    }

    pub fn resolve(&self, target: &TargetType) -> Option<Arc<dyn ArgumentConverter>> {
        self.converters
            .iter()
            .find(|converter| converter.can_convert(target))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    fn unbox<T: 'static>(value: BoundValue) -> T {
        *value.downcast::<T>().expect("expected type")
    }

    #[test]
    fn string_target_prefers_identity_converter() {
        let chain = ConverterChain::default();
        let converter = chain.resolve(&TargetType::string()).expect("resolves");
        assert_eq!(converter.name(), "string");
        assert!(StructuredConverter.can_convert(&TargetType::string()));

        let reversed = ConverterChain::new(vec![
            Arc::new(StructuredConverter) as Arc<dyn ArgumentConverter>,
            Arc::new(StringConverter),
        ]);
        let converter = reversed.resolve(&TargetType::string()).expect("resolves");
        assert_eq!(converter.name(), "structured");
    }

    #[test]
    fn sequences_have_no_converter() {
        let chain = ConverterChain::default();
        assert!(chain.resolve(&TargetType::sequence::<String>()).is_none());
    }

    #[test]
    fn string_converter_handles_every_source() {
        let target = TargetType::string();
        let convert = |raw| unbox::<String>(StringConverter.convert(raw, &target).expect("converts"));

        assert_eq!(convert(RawArgument::Null), "");
        assert_eq!(convert(RawArgument::Json(json!("hi"))), "hi");
        assert_eq!(convert(RawArgument::Json(json!({"a": 1}))), "{\"a\":1}");
        assert_eq!(convert(RawArgument::Text("plain".to_string())), "plain");
        assert_eq!(convert(RawArgument::Bytes(b"bytes".to_vec())), "bytes");
    }

    #[test]
    fn structured_converter_reads_json_text_and_bytes() {
        let target = TargetType::structured::<Point>();
        let expected = Point { x: 1, y: 2 };

        let from_json = StructuredConverter
            .convert(RawArgument::Json(json!({"x": 1, "y": 2})), &target)
            .expect("json");
        assert_eq!(unbox::<Point>(from_json), expected);

        let from_text = StructuredConverter
            .convert(RawArgument::Text("{\"x\":1,\"y\":2}".to_string()), &target)
            .expect("text");
        assert_eq!(unbox::<Point>(from_text), expected);

        let from_bytes = StructuredConverter
            .convert(RawArgument::Bytes(b"{\"x\":1,\"y\":2}".to_vec()), &target)
            .expect("bytes");
        assert_eq!(unbox::<Point>(from_bytes), expected);
    }

    #[test]
    fn structured_converter_binds_null_to_optional_targets_only() {
        let optional = TargetType::structured::<Option<u32>>();
        let value = StructuredConverter
            .convert(RawArgument::Null, &optional)
            .expect("null binds to None");
        assert_eq!(unbox::<Option<u32>>(value), None);

        let err = StructuredConverter
            .convert(RawArgument::Null, &TargetType::structured::<Point>())
            .err()
            .expect("null rejected for a struct");
        assert!(matches!(err, ConversionError::Invalid { ref value, .. } if value == "null"));
    }

    #[test]
    fn structured_converter_rejects_mismatched_values() {
        let target = TargetType::structured::<Point>();

        let err = StructuredConverter
            .convert(RawArgument::Json(json!("nope")), &target)
            .err()
            .expect("string rejected");
        let message = err.to_string();
        assert!(message.contains("\"nope\""));
        assert!(message.contains("Point"));
    }
}
