//! Axum HTTP handlers for the web server
//!
//! Provides the SSE handshake, the message intake endpoint, and general metadata endpoints.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response, Sse},
    Json,
};
use axum_extra::{headers::HeaderMapExt, TypedHeader};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::AppError;
use crate::http::session_header::McpSessionId;
use crate::http::stream::SessionStream;
use crate::mcp::message::{decode_value, JsonRpcMessage};
use crate::mcp::rpc::{
    json_rpc_error, json_rpc_error_with_data, value_to_request_id, INVALID_REQUEST, PARSE_ERROR,
};
use crate::session::SessionToken;
use crate::AppState;

pub const SSE_ENDPOINT: &str = "/sse";
pub const MESSAGE_ENDPOINT: &str = "/message";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub instance_id: String,
    pub sse_endpoint: &'static str,
    pub message_endpoint: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        instance_id: state.instance_id().to_string(),
        sse_endpoint: SSE_ENDPOINT,
        message_endpoint: MESSAGE_ENDPOINT,
    })
}

pub async fn sse_endpoint(State(state): State<AppState>) -> Result<Response, AppError> {
    let (session, outbound) = state.open_session()?;
    let token = session.token();

    let stream = SessionStream::new(&token, outbound, state.sessions());
    let mut response = Sse::new(stream).into_response();
    response
        .headers_mut()
        .typed_insert(McpSessionId(token.to_string()));
    Ok(response)
}

pub async fn message_endpoint(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    session_header: Option<TypedHeader<McpSessionId>>,
    body: Bytes,
) -> Response {
    let raw_token = query
        .session_id
        .filter(|value| !value.trim().is_empty())
        .or_else(|| session_header.map(|TypedHeader(McpSessionId(value))| value));
    let Some(raw_token) = raw_token else {
        return AppError::bad_request(
            "missing_session_id",
            "sessionId query parameter or Mcp-Session-Id header is required",
        )
        .into_response();
    };

    let Ok(token) = raw_token.parse::<SessionToken>() else {
        return AppError::bad_request(
            "invalid_session_id",
            "session id must look like <instance_id>:<client_id>",
        )
        .into_response();
    };

    let messages = match decode_body(&body) {
        Ok(messages) => messages,
        Err(error) => return (StatusCode::BAD_REQUEST, Json(error)).into_response(),
    };

    let count = messages.len();
    match state.route_messages(&token, messages).await {
        Ok(delivery) => {
            debug!(session = %token, messages = count, delivery = ?delivery, "messages accepted");
            StatusCode::ACCEPTED.into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// Decodes a single message or a non-empty batch. Nothing is routed unless
/// every entry decodes.
fn decode_body(body: &[u8]) -> Result<Vec<JsonRpcMessage>, JsonRpcMessage> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|_| json_rpc_error(None, PARSE_ERROR, "Parse error"))?;

    let items = match payload {
        Value::Array(items) if items.is_empty() => {
            return Err(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"))
        }
        Value::Array(items) => items,
        single => vec![single],
    };

    items
        .into_iter()
        .map(|item| {
            let id = item.get("id").and_then(value_to_request_id);
            decode_value(item).map_err(|err| {
                json_rpc_error_with_data(
                    id,
                    err.rpc_code(),
                    "Invalid Request",
                    Some(json!({ "reason": err.to_string() })),
                )
            })
        })
        .collect()
}
