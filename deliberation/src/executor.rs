//! Dispatch of a goal's next pending action.
//!
//! The tool call runs under the cycle context and the adaptive tool timeout.
//! Interpretation of the result lives in [`crate::core::outcome`].

use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::context::{CycleContext, Interrupted};
use crate::core::outcome::{ActionEffect, ActionResult, apply_action_result, begin_action};
use crate::core::types::{Goal, Tool};
use crate::io::tools::ToolExecutor;

/// Result recorded for a synthesis action; the synthesis itself runs when
/// the goal completes.
pub const SYNTHESIS_READY: &str = "Synthesis ready";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub tool: Tool,
    pub description: String,
    pub effect: ActionEffect,
}

/// Run the goal's first pending action, limiting the tool call to
/// `tool_timeout(tool)`.
///
/// Returns `Ok(None)` when nothing is pending. When the cycle is interrupted
/// mid-call the action stays in progress for the next preflight to time out.
#[instrument(skip_all, fields(goal_id = %goal.id))]
pub async fn execute_next_action(
    tools: &dyn ToolExecutor,
    ctx: &CycleContext,
    goal: &mut Goal,
    tool_timeout: impl Fn(Tool) -> Duration,
) -> Result<Option<ExecutionReport>, Interrupted> {
    let Some(index) = goal.first_pending_action() else {
        return Ok(None);
    };
    let tool = goal.actions[index].tool;
    let description = goal.actions[index].description.clone();
    begin_action(goal, index, Utc::now());
    info!(tool = tool.as_str(), description = %description, "executing action");

    let result = match tool {
        Tool::Synthesis => ActionResult::Success(SYNTHESIS_READY.to_string()),
        Tool::Search | Tool::WebParseUnified => {
            let limit = tool_timeout(tool);
            match ctx
                .run_limited(limit, tools.execute(tool, &description))
                .await?
            {
                Some(reply) => ActionResult::classify(reply.map_err(|err| format!("{err:#}"))),
                None => ActionResult::Error(format!(
                    "{} timed out after {}s",
                    tool.as_str(),
                    limit.as_secs()
                )),
            }
        }
    };
    if !result.is_success() {
        warn!(tool = tool.as_str(), result = ?result, "action failed");
    }

    let effect = apply_action_result(goal, index, result, Utc::now());
    if effect.outcome_turned_bad {
        warn!(failure_count = goal.failure_count, "goal outcome turned bad after repeated failures");
    }
    Ok(Some(ExecutionReport {
        tool,
        description,
        effect,
    }))
}
