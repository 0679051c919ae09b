//! JSON-RPC 2.0 message model and codec
//!
//! Classification looks only at which of `id`, `method`, `result` and `error`
//! are present before committing to a concrete variant decode.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

pub use rust_mcp_sdk::schema::RequestId;

/// Keeps an explicit `null` as `Some(Value::Null)`; an absent field stays `None`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, deserialize_with = "present")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    #[serde(default, deserialize_with = "present")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcResponse {
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcErrorResponse {
    #[serde(default)]
    pub id: Option<RequestId>,
    pub error: JsonRpcError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("message must be a JSON object")]
    NotAnObject,
    #[error("jsonrpc version must be \"2.0\"")]
    InvalidVersion,
    #[error("response must have result or error")]
    MissingResult,
    #[error("invalid message shape")]
    InvalidShape,
    #[error("invalid {kind}: {source}")]
    InvalidField {
        kind: &'static str,
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// JSON-RPC error code a peer should receive for this failure.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Parse(_) => -32700,
            _ => -32600,
        }
    }
}

impl JsonRpcMessage {
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(JsonRpcRequest {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(JsonRpcNotification {
            method: method.into(),
            params,
        })
    }

    pub fn response(id: RequestId, result: Value) -> Self {
        Self::Response(JsonRpcResponse { id, result })
    }

    pub fn error(id: Option<RequestId>, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self::Error(JsonRpcErrorResponse {
            id,
            error: JsonRpcError {
                code,
                message: message.into(),
                data,
            },
        })
    }

    /// Request id carried by requests, responses and errors.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(request) => Some(&request.id),
            Self::Response(response) => Some(&response.id),
            Self::Error(error) => error.id.as_ref(),
            Self::Notification(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) | Self::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("jsonrpc".to_string(), json!(JSONRPC_VERSION));

        match self {
            Self::Request(request) => {
                object.insert("id".to_string(), json!(request.id));
                object.insert("method".to_string(), json!(request.method));
                if let Some(params) = &request.params {
                    object.insert("params".to_string(), params.clone());
                }
            }
            Self::Notification(notification) => {
                object.insert("method".to_string(), json!(notification.method));
                if let Some(params) = &notification.params {
                    object.insert("params".to_string(), params.clone());
                }
            }
            Self::Response(response) => {
                object.insert("id".to_string(), json!(response.id));
                object.insert("result".to_string(), response.result.clone());
            }
            Self::Error(error) => {
                object.insert("id".to_string(), json!(error.id));
                object.insert("error".to_string(), json!(error.error));
            }
        }

        Value::Object(object)
    }
}

pub fn decode(raw: &[u8]) -> Result<JsonRpcMessage, DecodeError> {
    let value: Value = serde_json::from_slice(raw)?;
    decode_value(value)
}

pub fn decode_value(value: Value) -> Result<JsonRpcMessage, DecodeError> {
    let Value::Object(object) = &value else {
        return Err(DecodeError::NotAnObject);
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(DecodeError::InvalidVersion);
    }

    let has_id = object.contains_key("id");
    let has_method = object.contains_key("method");

    match (has_id, has_method) {
        (true, false) => {
            if object.contains_key("error") {
                decode_as(value, "error response").map(JsonRpcMessage::Error)
            } else if object.contains_key("result") {
                decode_as(value, "response").map(JsonRpcMessage::Response)
            } else {
                Err(DecodeError::MissingResult)
            }
        }
        (false, true) => decode_as(value, "notification").map(JsonRpcMessage::Notification),
        (true, true) => decode_as(value, "request").map(JsonRpcMessage::Request),
        (false, false) => Err(DecodeError::InvalidShape),
    }
}

pub fn encode(message: &JsonRpcMessage) -> Vec<u8> {
    message.to_value().to_string().into_bytes()
}

fn decode_as<T: de::DeserializeOwned>(value: Value, kind: &'static str) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|source| DecodeError::InvalidField { kind, source })
}

impl Serialize for JsonRpcMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        decode_value(value).map_err(de::Error::custom)
    }
}
