//! JSON-RPC response builders
//!
//! Maps internal failures onto JSON-RPC error messages.

use serde_json::{json, Value};
use tracing::error;

use crate::errors::AppError;
use crate::mcp::message::{JsonRpcMessage, RequestId};
use crate::tools::ToolCallError;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

pub fn app_error_to_json_rpc(id: Option<RequestId>, err: AppError) -> JsonRpcMessage {
    match err {
        AppError::BadRequest { code, message } => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            "Invalid params",
            Some(json!({
                "code": code,
                "message": message,
                "details": {}
            })),
        ),
        AppError::NotFound { code, message } => json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Not found",
            Some(json!({
                "code": code,
                "message": message,
                "details": {}
            })),
        ),
        AppError::Internal { message, .. } => {
            error!(error = %message, "request failed with internal error");
            json_rpc_error(id, INTERNAL_ERROR, "Internal error")
        }
    }
}

pub fn tool_call_error_to_json_rpc(id: Option<RequestId>, err: ToolCallError) -> JsonRpcMessage {
    let message = err.to_string();
    match err {
        ToolCallError::UnknownTool(name) => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            &message,
            Some(json!({
                "code": "tool_not_found",
                "message": message,
                "details": { "name": name }
            })),
        ),
        ToolCallError::MissingProperties(missing) => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            &message,
            Some(json!({
                "code": "missing_properties",
                "message": message,
                "details": { "missing": missing.missing }
            })),
        ),
        ToolCallError::Conversion { argument, .. } => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            &message,
            Some(json!({
                "code": "conversion_failed",
                "message": message,
                "details": { "argument": argument }
            })),
        ),
        ToolCallError::Completion { tool, source } => {
            error!(tool = %tool, error = %source, "tool completed without a result");
            json_rpc_error(id, INTERNAL_ERROR, "Internal error")
        }
    }
}

pub fn json_rpc_error(id: Option<RequestId>, code: i64, message: &str) -> JsonRpcMessage {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<RequestId>,
    code: i64,
    message: &str,
    data: Option<Value>,
) -> JsonRpcMessage {
    JsonRpcMessage::error(id, code, message, data)
}

pub fn json_rpc_result(id: RequestId, result: Value) -> JsonRpcMessage {
    JsonRpcMessage::response(id, result)
}

/// Best-effort id recovery from a payload that failed to decode.
pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::schema::MissingProperties;

    #[test]
    fn unknown_tool_carries_name_and_code() {
        let response = tool_call_error_to_json_rpc(
            Some(RequestId::Integer(4)),
            ToolCallError::UnknownTool("nope".to_string()),
        )
        .to_value();

        assert_eq!(response["id"], 4);
        assert_eq!(response["error"]["code"], INVALID_PARAMS);
        assert_eq!(response["error"]["message"], "Unknown tool: nope");
        assert_eq!(response["error"]["data"]["code"], "tool_not_found");
        assert_eq!(response["error"]["data"]["details"]["name"], "nope");
    }

    #[test]
    fn missing_properties_are_listed() {
        let response = tool_call_error_to_json_rpc(
            Some(RequestId::Integer(5)),
            ToolCallError::MissingProperties(MissingProperties {
                missing: vec!["text".to_string()],
            }),
        )
        .to_value();

        assert_eq!(response["error"]["code"], INVALID_PARAMS);
        assert_eq!(response["error"]["data"]["details"]["missing"], json!(["text"]));
        assert!(response["error"]["message"]
            .as_str()
            .expect("message")
            .ends_with("Please provide: text"));
    }

    #[test]
    fn internal_errors_hide_details() {
        let response =
            app_error_to_json_rpc(None, AppError::internal("db exploded")).to_value();
        assert_eq!(response["id"], Value::Null);
        assert_eq!(response["error"]["code"], INTERNAL_ERROR);
        assert_eq!(response["error"]["message"], "Internal error");
        assert!(response["error"].get("data").is_none());
    }

    #[test]
    fn request_id_recovery_accepts_strings_and_integers() {
        assert_eq!(value_to_request_id(&json!("a")), Some(RequestId::String("a".to_string())));
        assert_eq!(value_to_request_id(&json!(3)), Some(RequestId::Integer(3)));
        assert_eq!(value_to_request_id(&json!(null)), None);
    }
}
