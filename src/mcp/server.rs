//! Per-session Model Context Protocol server
//!
//! Handles `initialize` negotiation, `ping`, `tools/list` and `tools/call` for
//! one client. Every request is audited with sensitive parameters redacted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_mcp_sdk::schema::{
    CallToolRequestParams, Implementation, InitializeResult, ServerCapabilities,
    ServerCapabilitiesTools,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::errors::AppError;
use crate::mcp::message::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId};
use crate::mcp::rpc::{
    app_error_to_json_rpc, json_rpc_error, json_rpc_result, tool_call_error_to_json_rpc,
    INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use crate::session::ClientId;
use crate::tools::context::ToolCallRequest;
use crate::tools::ToolRegistry;

/// Newest first; the first entry is offered when the client asks for nothing we know.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

#[derive(Debug)]
pub struct ServerHandle {
    client_id: ClientId,
    tools: Arc<ToolRegistry>,
    protocol_version: Mutex<Option<&'static str>>,
    initialized: AtomicBool,
}

impl ServerHandle {
    pub fn new(client_id: ClientId, tools: Arc<ToolRegistry>) -> Self {
        Self {
            client_id,
            tools,
            protocol_version: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn protocol_version(&self) -> Option<&'static str> {
        *self.protocol_version.lock()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        let JsonRpcRequest { id, method, params } = request;
        let audit_params = redact_audit_params(params.as_ref());

        let response = match method.as_str() {
            "initialize" => self.initialize(id, params.as_ref()),
            "ping" => json_rpc_result(id, json!({})),
            "tools/list" => {
                let tools = self
                    .tools
                    .list_tools()
                    .iter()
                    .map(|tool| tool.descriptor())
                    .collect::<Vec<_>>();
                json_rpc_result(id, json!({ "tools": tools }))
            }
            "tools/call" => self.call_tool(id, params).await,
            _ => json_rpc_error(Some(id), METHOD_NOT_FOUND, "Method not found"),
        };

        info!(
            client_id = %self.client_id,
            method = %method,
            params = %audit_params,
            outcome = if response.is_error() { "failure" } else { "success" },
            "mcp action audited"
        );

        response
    }

    pub fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                self.initialized.store(true, Ordering::Release);
                debug!(client_id = %self.client_id, "client initialized");
            }
            other => debug!(client_id = %self.client_id, method = %other, "notification ignored"),
        }
    }

    fn initialize(&self, id: RequestId, params: Option<&Value>) -> JsonRpcMessage {
        let protocol_version = match negotiate_protocol_version(params) {
            Ok(version) => version,
            Err(err) => return app_error_to_json_rpc(Some(id), err),
        };
        *self.protocol_version.lock() = Some(protocol_version);

        let initialize_result = InitializeResult {
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                description: None,
                icons: vec![],
                website_url: None,
            },
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools {
                    list_changed: Some(false),
                }),
                ..Default::default()
            },
            protocol_version: protocol_version.to_string(),
            instructions: None,
            meta: None,
        };

        match serde_json::to_value(initialize_result) {
            Ok(result) => json_rpc_result(id, result),
            Err(err) => app_error_to_json_rpc(Some(id), AppError::internal(err.to_string())),
        }
    }

    async fn call_tool(&self, id: RequestId, params: Option<Value>) -> JsonRpcMessage {
        let Some(raw_params) = params else {
            return json_rpc_error(Some(id), INVALID_PARAMS, "Invalid params");
        };

        let tool_call: CallToolRequestParams = match serde_json::from_value(raw_params) {
            Ok(value) => value,
            Err(_) => return json_rpc_error(Some(id), INVALID_PARAMS, "Invalid params"),
        };

        let request = ToolCallRequest::new(tool_call.name, tool_call.arguments.unwrap_or_default());
        match self.tools.call_tool(request).await {
            Ok(result) => match serde_json::to_value(result) {
                Ok(result) => json_rpc_result(id, result),
                Err(_) => json_rpc_error(Some(id), INTERNAL_ERROR, "Internal error"),
            },
            Err(err) => tool_call_error_to_json_rpc(Some(id), err),
        }
    }
}

/// Picks the version to answer `initialize` with.
///
/// A known offered version is echoed back; anything else gets our newest.
pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<&'static str, AppError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_protocol_version",
                "initialize params.protocolVersion is required",
            )
        })?;

    Ok(SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|supported| *supported == offered_version)
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0]))
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}
