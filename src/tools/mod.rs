//! Tool catalog and the `tools/call` invocation pipeline
//!
//! A call is resolved by name, its arguments are checked against the tool's
//! required properties, bound through the converter chain, and handed to the
//! tool's handler inside an [`ExecutionContext`]. The handler's single result
//! is translated into a `CallToolResult`.

pub mod builtin;
pub mod context;
pub mod convert;
pub mod output;
pub mod schema;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use regex::Regex;
use rust_mcp_sdk::schema::CallToolResult;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::tools::context::{BoundValue, CompletionError, ExecutionContext, ToolCallRequest};
use crate::tools::convert::{ArgumentConverter, ConversionError, ConverterChain, RawArgument, TargetType};
use crate::tools::output::error_result;
use crate::tools::schema::{InputSchema, MissingProperties, SchemaError, ToolInputShape, ToolProperty};

/// Failure reported by a tool handler. Becomes an `isError` tool result.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl From<String> for ToolError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ToolError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<CompletionError> for ToolError {
    fn from(err: CompletionError) -> Self {
        Self(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ToolRegistryError {
    #[error("tool `{0}` is already registered")]
    Duplicate(String),
    #[error("tool name `{0}` must match ^[A-Za-z0-9_-]{{1,128}}$")]
    InvalidName(String),
    #[error("tool `{tool}` has an invalid input schema: {source}")]
    Schema { tool: String, source: SchemaError },
    #[error("tool `{tool}` argument `{argument}`: no converter for `{target}`")]
    NoConverter {
        tool: String,
        argument: String,
        target: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error(transparent)]
    MissingProperties(#[from] MissingProperties),
    #[error("argument `{argument}`: {source}")]
    Conversion {
        argument: String,
        source: ConversionError,
    },
    #[error("tool `{tool}` produced no result: {source}")]
    Completion {
        tool: String,
        source: CompletionError,
    },
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, context: Arc<ExecutionContext>) -> Result<(), ToolError>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ToolError>> + Send + 'static,
{
    async fn invoke(&self, context: Arc<ExecutionContext>) -> Result<(), ToolError> {
        (self)(context).await
    }
}

/// Everything needed to register a tool.
pub struct ToolRegistration {
    name: String,
    description: String,
    input_shape: ToolInputShape,
    parameters: Vec<(String, TargetType)>,
    handler: Arc<dyn ToolHandler>,
}

impl ToolRegistration {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_shape: ToolInputShape::default(),
            parameters: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_properties(mut self, properties: Vec<ToolProperty>) -> Self {
        self.input_shape = ToolInputShape::Properties(properties);
        self
    }

    pub fn with_schema(mut self, document: Value) -> Self {
        self.input_shape = ToolInputShape::Schema(document);
        self
    }

    /// Binds argument `name` to a typed value the handler can take from its context.
    pub fn bind(mut self, name: impl Into<String>, target: TargetType) -> Self {
        self.parameters.push((name.into(), target));
        self
    }
}

struct BoundParameter {
    name: String,
    target: TargetType,
    converter: Arc<dyn ArgumentConverter>,
}

pub struct RegisteredTool {
    name: String,
    description: String,
    schema: Box<dyn InputSchema>,
    parameters: Vec<BoundParameter>,
    handler: Arc<dyn ToolHandler>,
}

/// Entry of a `tools/list` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn required_properties(&self) -> Vec<String> {
        self.schema.required_properties()
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.schema_element(),
        }
    }

    fn bind_arguments(
        &self,
        arguments: &Map<String, Value>,
    ) -> Result<HashMap<String, BoundValue>, ToolCallError> {
        self.parameters
            .iter()
            .map(|parameter| {
                let raw = RawArgument::from(arguments.get(&parameter.name));
                parameter
                    .converter
                    .convert(raw, &parameter.target)
                    .map(|value| (parameter.name.clone(), value))
                    .map_err(|source| ToolCallError::Conversion {
                        argument: parameter.name.clone(),
                        source,
                    })
            })
            .collect()
    }
}

fn tool_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid tool name pattern"))
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<RegisteredTool>>,
    converters: ConverterChain,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.len())
            .field("converters", &self.converters)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_converters(converters: ConverterChain) -> Self {
        Self {
            tools: DashMap::new(),
            converters,
        }
    }

    pub fn register(&self, registration: ToolRegistration) -> Result<Arc<RegisteredTool>, ToolRegistryError> {
        let ToolRegistration {
            name,
            description,
            input_shape,
            parameters,
            handler,
        } = registration;

        if !tool_name_pattern().is_match(&name) {
            return Err(ToolRegistryError::InvalidName(name));
        }

        let schema = input_shape
            .into_schema()
            .map_err(|source| ToolRegistryError::Schema {
                tool: name.clone(),
                source,
            })?;

        let parameters = parameters
            .into_iter()
            .map(|(argument, target)| {
                let converter =
                    self.converters
                        .resolve(&target)
                        .ok_or_else(|| ToolRegistryError::NoConverter {
                            tool: name.clone(),
                            argument: argument.clone(),
                            target: target.name(),
                        })?;
                Ok(BoundParameter {
                    name: argument,
                    target,
                    converter,
                })
            })
            .collect::<Result<Vec<_>, ToolRegistryError>>()?;

        let tool = Arc::new(RegisteredTool {
            name: name.clone(),
            description,
            schema,
            parameters,
            handler,
        });

        match self.tools.entry(name) {
            Entry::Occupied(entry) => Err(ToolRegistryError::Duplicate(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(tool = %tool.name, "tool registered");
                entry.insert(Arc::clone(&tool));
                Ok(tool)
            }
        }
    }

    pub fn try_get_tool(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of every registered tool, ordered by name.
    pub fn list_tools(&self) -> Vec<Arc<RegisteredTool>> {
        let mut tools = self
            .tools
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect::<Vec<_>>();
        tools.sort_by(|left, right| left.name.cmp(&right.name));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn call_tool(&self, request: ToolCallRequest) -> Result<CallToolResult, ToolCallError> {
        let tool = self
            .try_get_tool(&request.name)
            .ok_or_else(|| ToolCallError::UnknownTool(request.name.clone()))?;

        tool.schema.validate(&request.arguments)?;
        let bound = tool.bind_arguments(&request.arguments)?;

        let (context, reader) = ExecutionContext::new(request, bound);
        let outcome = tool.handler.invoke(Arc::clone(&context)).await;
        drop(context);

        if let Err(err) = outcome {
            warn!(tool = %tool.name, error = %err, "tool handler failed");
            return Ok(error_result(err.to_string()));
        }

        let output = reader.wait().await.map_err(|source| ToolCallError::Completion {
            tool: tool.name.clone(),
            source,
        })?;

        Ok(output.into_call_tool_result())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::tools::builtin::echo_tool;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object arguments")
    }

    async fn noop(_ctx: Arc<ExecutionContext>) -> Result<(), ToolError> {
        Ok(())
    }

    async fn fail(_ctx: Arc<ExecutionContext>) -> Result<(), ToolError> {
        Err(ToolError::from("disk on fire"))
    }

    async fn write_twice(ctx: Arc<ExecutionContext>) -> Result<(), ToolError> {
        ctx.set_result("first")?;
        match ctx.set_result("second") {
            Err(CompletionError::AlreadyCompleted) => Ok(()),
            other => Err(ToolError(format!("unexpected second write outcome: {other:?}"))),
        }
    }

    async fn span(ctx: Arc<ExecutionContext>) -> Result<(), ToolError> {
        let range = ctx
            .take_argument::<Range>("range")
            .ok_or_else(|| ToolError::from("range not bound"))?;
        ctx.set_result(json!({"width": range.end - range.start}))?;
        Ok(())
    }

    async fn page(ctx: Arc<ExecutionContext>) -> Result<(), ToolError> {
        let limit = ctx
            .take_argument::<Option<u32>>("limit")
            .ok_or_else(|| ToolError::from("limit not bound"))?;
        ctx.set_result(json!({"limit": limit}))?;
        Ok(())
    }

    async fn raw_block(ctx: Arc<ExecutionContext>) -> Result<(), ToolError> {
        ctx.set_result(json!({"type": "text", "text": "raw"}))?;
        Ok(())
    }

    fn registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register(echo_tool()).expect("echo registers");
        registry
    }

    async fn call(registry: &ToolRegistry, name: &str, arguments: Value) -> Result<Value, ToolCallError> {
        registry
            .call_tool(ToolCallRequest::new(name, args(arguments)))
            .await
            .map(|result| serde_json::to_value(result).expect("result serializes"))
    }

    #[tokio::test]
    async fn echo_returns_text_block() {
        let result = call(&registry(), "echo", json!({"text": "hi"}))
            .await
            .expect("call succeeds");
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn missing_required_argument_is_listed() {
        let err = call(&registry(), "echo", json!({})).await.expect_err("must fail");
        match err {
            ToolCallError::MissingProperties(missing) => {
                assert_eq!(missing.missing, vec!["text".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_by_name() {
        let err = call(&registry(), "missing", json!({})).await.expect_err("must fail");
        assert_eq!(err.to_string(), "Unknown tool: missing");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = registry();
        let err = registry.register(echo_tool()).err().expect("duplicate");
        assert!(matches!(err, ToolRegistryError::Duplicate(ref name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let registry = ToolRegistry::new();
        let err = registry
            .register(ToolRegistration::new("has space", "", noop))
            .err()
            .expect("invalid name");
        assert!(matches!(err, ToolRegistryError::InvalidName(_)));
    }

    #[test]
    fn unresolvable_parameter_fails_registration() {
        let registry = ToolRegistry::new();
        let err = registry
            .register(
                ToolRegistration::new("tags", "", noop)
                    .bind("tags", TargetType::sequence::<String>()),
            )
            .err()
            .expect("no converter");
        assert!(matches!(err, ToolRegistryError::NoConverter { ref argument, .. } if argument == "tags"));
        assert!(registry.is_empty());
    }

    #[test]
    fn list_is_sorted_snapshot_with_schemas() {
        let registry = registry();
        registry
            .register(
                ToolRegistration::new("add", "Adds numbers", noop).with_schema(json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}},
                    "required": ["a"]
                })),
            )
            .expect("add registers");

        let descriptors = registry
            .list_tools()
            .iter()
            .map(|tool| tool.descriptor())
            .collect::<Vec<_>>();

        assert_eq!(descriptors[0].name, "add");
        assert_eq!(descriptors[0].input_schema["required"], json!(["a"]));
        assert_eq!(descriptors[1].name, "echo");
        assert_eq!(descriptors[1].input_schema["required"], json!(["text"]));
    }

    #[derive(Debug, Deserialize)]
    struct Range {
        start: u32,
        end: u32,
    }

    #[tokio::test]
    async fn structured_arguments_reach_the_handler_typed() {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolRegistration::new("span", "Width of a range", span)
                    .with_properties(vec![ToolProperty::new("range", "object").required()])
                    .bind("range", TargetType::structured::<Range>()),
            )
            .expect("span registers");

        let result = call(&registry, "span", json!({"range": {"start": 2, "end": 9}}))
            .await
            .expect("call succeeds");
        assert_eq!(result["content"][0]["text"], "{\"width\":7}");

        let err = call(&registry, "span", json!({"range": "wide"}))
            .await
            .expect_err("conversion fails");
        assert!(matches!(err, ToolCallError::Conversion { ref argument, .. } if argument == "range"));
    }

    #[tokio::test]
    async fn handler_error_becomes_error_result() {
        let registry = ToolRegistry::new();
        registry
            .register(ToolRegistration::new("fail", "", fail))
            .expect("fail registers");

        let result = call(&registry, "fail", json!({})).await.expect("call completes");
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "disk on fire");
    }

    #[tokio::test]
    async fn handler_without_result_is_an_invariant_failure() {
        let registry = ToolRegistry::new();
        registry
            .register(ToolRegistration::new("silent", "", noop))
            .expect("silent registers");

        let err = call(&registry, "silent", json!({})).await.expect_err("no result");
        assert!(matches!(
            err,
            ToolCallError::Completion {
                source: CompletionError::Abandoned,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn second_result_write_is_rejected() {
        let registry = ToolRegistry::new();
        registry
            .register(ToolRegistration::new("twice", "", write_twice))
            .expect("twice registers");

        let result = call(&registry, "twice", json!({})).await.expect("call completes");
        assert_eq!(result["content"][0]["text"], "first");
    }

    #[tokio::test]
    async fn omitted_optional_argument_binds_to_none() {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolRegistration::new("page", "Pages results", page)
                    .with_properties(vec![ToolProperty::new("limit", "integer")])
                    .bind("limit", TargetType::structured::<Option<u32>>()),
            )
            .expect("page registers");

        let result = call(&registry, "page", json!({})).await.expect("call succeeds");
        assert_eq!(result["content"][0]["text"], "{\"limit\":null}");

        let result = call(&registry, "page", json!({"limit": 5}))
            .await
            .expect("call succeeds");
        assert_eq!(result["content"][0]["text"], "{\"limit\":5}");
    }

    #[tokio::test]
    async fn content_block_written_as_json_is_passed_through() {
        let registry = ToolRegistry::new();
        registry
            .register(ToolRegistration::new("block", "", raw_block))
            .expect("block registers");

        let result = call(&registry, "block", json!({})).await.expect("call completes");
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "raw");
    }
}
