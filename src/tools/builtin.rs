//! Tools every instance registers at startup

use std::sync::Arc;

use crate::tools::context::ExecutionContext;
use crate::tools::convert::TargetType;
use crate::tools::schema::ToolProperty;
use crate::tools::{ToolError, ToolRegistration, ToolRegistry, ToolRegistryError};

pub fn echo_tool() -> ToolRegistration {
    ToolRegistration::new("echo", "Echo the given text back to the caller", echo)
        .with_properties(vec![ToolProperty::new("text", "string")
            .description("Text to echo")
            .required()])
        .bind("text", TargetType::string())
}

async fn echo(ctx: Arc<ExecutionContext>) -> Result<(), ToolError> {
    let text = ctx
        .take_argument::<String>("text")
        .ok_or_else(|| ToolError::from("text argument was not bound"))?;
    ctx.set_result(text)?;
    Ok(())
}

pub fn register_builtin_tools(registry: &ToolRegistry) -> Result<(), ToolRegistryError> {
    registry.register(echo_tool())?;
    Ok(())
}
