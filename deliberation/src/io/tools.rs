//! Tool dispatch contract.

use anyhow::Result;
use async_trait::async_trait;

use crate::core::types::Tool;

/// Abstraction over the external tools actions run against.
///
/// Implementations return the tool's text output. An `Err` is a hard failure
/// and is recorded on the action as `ERROR: ...`. Cancellation drops the
/// returned future, so implementations must not rely on running to completion.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool: Tool, description: &str) -> Result<String>;
}
