use braid_core::{Interaction, InteractionPayload, TaskFrame, ToolCall};
use std::collections::HashSet;

/// A call the dispatcher still has to run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingCall {
    pub call: ToolCall,
    pub chained: bool,
    /// The `ToolCall` interaction already exists; only the result is missing.
    pub recorded: bool,
}

/// The oracle's view of a branch: every interaction except hidden tool results.
pub fn oracle_view(context: &[&Interaction]) -> Vec<Interaction> {
    context
        .iter()
        .filter(|i| i.payload.is_oracle_visible())
        .map(|i| (*i).clone())
        .collect()
}

/// The frame of the task currently running on the branch.
pub fn current_frame<'a>(context: &[&'a Interaction]) -> Option<&'a TaskFrame> {
    context.iter().rev().find_map(|i| i.payload.task_frame())
}

/// Number of consecutive chained calls ending at the tip.
pub(crate) fn chain_depth(context: &[&Interaction]) -> u32 {
    let mut depth = 0;
    for interaction in context.iter().rev() {
        match &interaction.payload {
            InteractionPayload::ToolCall { chained: true, .. } => depth += 1,
            InteractionPayload::ToolCall { chained: false, .. } => break,
            InteractionPayload::ToolResult { .. } => {}
            _ => break,
        }
    }
    depth
}

/// Calls of the latest oracle batch that no later interaction resolved.
///
/// A batch ends with its task: once a task result or a new task frame
/// follows it, its leftover calls are abandoned.
pub(crate) fn unresolved_batch_calls(context: &[&Interaction]) -> Vec<ToolCall> {
    let Some(position) = context.iter().rposition(|i| {
        matches!(
            i.payload,
            InteractionPayload::OracleResponse { .. }
                | InteractionPayload::TaskResult { .. }
                | InteractionPayload::TaskDefinition { .. }
                | InteractionPayload::TaskChain { .. }
        )
    }) else {
        return Vec::new();
    };
    let InteractionPayload::OracleResponse { tool_calls, .. } = &context[position].payload else {
        return Vec::new();
    };
    let resolved: HashSet<&str> = context[position + 1..]
        .iter()
        .filter_map(|i| i.payload.resolved_call_id())
        .collect();
    tool_calls
        .iter()
        .filter(|c| !resolved.contains(c.id.as_str()))
        .cloned()
        .collect()
}

/// The next call to execute on this branch, if any.
///
/// A recorded call without a result comes first, then a chain requested by
/// the last result, then the remaining calls of the oracle batch.
pub(crate) fn next_pending_call(context: &[&Interaction]) -> Option<PendingCall> {
    match context.last().map(|i| &i.payload) {
        Some(InteractionPayload::ToolCall { call, chained }) => {
            return Some(PendingCall {
                call: call.clone(),
                chained: *chained,
                recorded: true,
            });
        }
        Some(InteractionPayload::ToolResult {
            next_tool: Some(next),
            ..
        }) => {
            return Some(PendingCall {
                call: next.clone(),
                chained: true,
                recorded: false,
            });
        }
        _ => {}
    }
    unresolved_batch_calls(context)
        .into_iter()
        .next()
        .map(|call| PendingCall {
            call,
            chained: false,
            recorded: false,
        })
}
