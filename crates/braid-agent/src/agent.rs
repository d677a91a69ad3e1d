use crate::config::{Catalog, ToolFailurePolicy};
use crate::context::{self, PendingCall};
use crate::oracle::{Oracle, OracleReply, OracleRequest};
use crate::retry::consult_with_retry;
use crate::task;
use braid_core::{
    AgentId, AgentStatus, BraidError, BraidResult, BranchId, Interaction, InteractionId,
    InteractionPayload, TaskFrame, ToolCall, WaitCondition,
};
use braid_history::{InteractionStack, InteractionStore};
use braid_security::NamespaceStore;
use braid_tools::{AgentCall, ToolContext, ToolOutcome, ToolRegistry, ToolResponse};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared services every agent of a session works against.
#[derive(Clone)]
pub struct AgentEnv {
    pub catalog: Arc<Catalog>,
    pub tools: Arc<ToolRegistry>,
    pub oracle: Arc<dyn Oracle>,
    pub namespaces: Arc<NamespaceStore>,
    pub store: Arc<dyn InteractionStore>,
}

/// Config and automaton state of one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Cursor {
    config: String,
    state: Option<String>,
}

impl Cursor {
    fn initial(catalog: &Catalog, config: &str) -> Self {
        Self {
            config: config.to_string(),
            state: catalog.machine(config).map(|m| m.initial().to_string()),
        }
    }
}

/// A child agent requested by a tool, waiting for the session to act on it.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCallRequest {
    pub call_id: String,
    pub call: AgentCall,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The agent was not running.
    Idle,
    /// Interactions were appended and the agent keeps running.
    Progressed,
    /// A tool asked for a child agent.
    SpawnRequested(AgentCallRequest),
    /// The agent is waiting on a human or a wait condition.
    Suspended,
    Finished,
    Failed(String),
}

/// What one call to [`Agent::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub outcome: StepOutcome,
    pub tools_executed: Vec<String>,
    pub oracle_calls: u32,
    pub tool_errors: u32,
}

impl StepReport {
    fn new() -> Self {
        Self {
            outcome: StepOutcome::Idle,
            tools_executed: Vec::new(),
            oracle_calls: 0,
            tool_errors: 0,
        }
    }
}

/// The suspension an agent is currently parked on.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWait {
    pub interaction_id: InteractionId,
    pub target_agent_id: Option<AgentId>,
    pub call_id: Option<String>,
    pub condition: WaitCondition,
}

enum CallOutcome {
    Done { is_error: bool },
    Completed { content: String, is_error: bool },
    Spawn(AgentCallRequest),
    Suspended,
}

/// One autonomous actor: a branching interaction history plus the
/// dispatcher that grows it one step at a time.
///
/// Every interaction is handed to the [`InteractionStore`] as soon as it is
/// appended, so [`Agent::restore`] can rebuild the agent after a crash.
pub struct Agent {
    id: AgentId,
    env: AgentEnv,
    stack: InteractionStack,
    active_branch: BranchId,
    cursors: HashMap<BranchId, Cursor>,
    status: AgentStatus,
    steps_taken: u32,
    max_steps: u32,
}

impl Agent {
    /// Creates an agent running `task` under `config`.
    ///
    /// Fails with [`BraidError::Validation`] if the config, task or template
    /// cannot be resolved or the arguments do not fit the task's parameters.
    pub async fn create(
        env: AgentEnv,
        config: &str,
        task: &str,
        args: &BTreeMap<String, Value>,
    ) -> BraidResult<Self> {
        let frame = task::frame_for(&env.catalog, config, task, args)?;
        let max_steps = env.catalog.config(config)?.max_steps;
        let cursor = Cursor::initial(&env.catalog, config);

        let mut agent = Self {
            id: AgentId::new(),
            env,
            stack: InteractionStack::new(),
            active_branch: BranchId::MAIN,
            cursors: HashMap::from([(BranchId::MAIN, cursor)]),
            status: AgentStatus::Running,
            steps_taken: 0,
            max_steps,
        };
        let main = agent.stack.branch_record(BranchId::MAIN)?;
        agent.env.store.record_branch(agent.id, &main).await?;
        agent
            .append(InteractionPayload::TaskDefinition { frame })
            .await?;

        info!(agent = %agent.id, config, task, "Agent created");
        Ok(agent)
    }

    /// Rebuilds an agent from its persisted history.
    ///
    /// The active branch is the branch of the last interaction. Status is
    /// derived from that branch's top; the step counter starts over.
    pub async fn restore(id: AgentId, env: AgentEnv) -> BraidResult<Self> {
        let history = env.store.load(id).await?;
        if history.is_empty() {
            return Err(BraidError::UnknownAgent(id));
        }
        let stack = InteractionStack::from_records(&history.branches, history.interactions)?;
        let active_branch = stack
            .interactions()
            .last()
            .map(|i| i.branch_id)
            .unwrap_or(BranchId::MAIN);

        let mut agent = Self {
            id,
            env,
            stack,
            active_branch,
            cursors: HashMap::new(),
            status: AgentStatus::Running,
            steps_taken: 0,
            max_steps: 0,
        };
        for record in agent.stack.branch_records() {
            if let Some(cursor) = agent.derive_cursor(record.id).await? {
                agent.cursors.insert(record.id, cursor);
            }
        }
        agent.status = agent.derive_status()?;
        agent.max_steps = agent
            .cursors
            .get(&active_branch)
            .and_then(|c| agent.env.catalog.config(&c.config).ok())
            .map(|c| c.max_steps)
            .unwrap_or(u32::MAX);

        info!(
            agent = %id,
            branch = %active_branch,
            status = %agent.status,
            interactions = agent.stack.interactions().len(),
            "Agent restored"
        );
        Ok(agent)
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn active_branch(&self) -> BranchId {
        self.active_branch
    }

    pub fn stack(&self) -> &InteractionStack {
        &self.stack
    }

    pub fn steps_taken(&self) -> u32 {
        self.steps_taken
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn set_max_steps(&mut self, max_steps: u32) {
        self.max_steps = max_steps;
    }

    /// The interactions visible on the active branch.
    pub fn context(&self) -> BraidResult<Vec<&Interaction>> {
        self.stack.get_context(self.active_branch)
    }

    /// What the oracle is shown: the active context minus hidden results.
    pub fn oracle_context(&self) -> BraidResult<Vec<Interaction>> {
        Ok(context::oracle_view(&self.context()?))
    }

    pub fn current_frame(&self) -> BraidResult<TaskFrame> {
        let ctx = self.context()?;
        context::current_frame(&ctx).cloned().ok_or_else(|| {
            BraidError::InvalidState(format!(
                "agent {} has no task on branch {}",
                self.id, self.active_branch
            ))
        })
    }

    pub fn current_config(&self) -> BraidResult<&str> {
        Ok(&self.cursor()?.config)
    }

    pub fn current_state(&self) -> Option<&str> {
        self.cursors
            .get(&self.active_branch)
            .and_then(|c| c.state.as_deref())
    }

    /// Tools of the current state, or of the config when it has no machine.
    pub fn available_tools(&self) -> BraidResult<Vec<String>> {
        let cursor = self.cursor()?;
        let config = self.env.catalog.config(&cursor.config)?;
        let state_tools = cursor.state.as_deref().and_then(|state| {
            self.env
                .catalog
                .machine(&cursor.config)
                .and_then(|m| m.state(state))
                .map(|s| s.tools.clone())
        });
        Ok(state_tools.unwrap_or_else(|| config.tools.clone()))
    }

    /// Content of the latest task result on the active branch.
    pub fn final_result(&self) -> Option<(String, bool)> {
        let ctx = self.context().ok()?;
        ctx.iter().rev().find_map(|i| match &i.payload {
            InteractionPayload::TaskResult {
                content, is_error, ..
            } => Some((content.clone(), *is_error)),
            _ => None,
        })
    }

    /// Advances the agent by one step.
    ///
    /// Recoverable failures (unresolvable config, exhausted oracle retries,
    /// invalid chain parameters) end the agent as FAILED. Errors that mean the
    /// history itself is inconsistent are returned to the caller.
    pub async fn step(&mut self) -> BraidResult<StepReport> {
        let mut report = StepReport::new();
        if self.status != AgentStatus::Running {
            return Ok(report);
        }
        self.steps_taken += 1;
        debug!(agent = %self.id, step = self.steps_taken, "Agent step");

        report.outcome = match self.dispatch(&mut report).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_invariant_violation() => return Err(e),
            Err(e) => self.fail(e.to_string()).await?,
        };

        // Tool triggers already fired as calls were recorded.
        if !self.status.is_terminal() {
            self.advance_state(&[]).await?;
        }
        if self.status == AgentStatus::Running && self.steps_taken >= self.max_steps {
            warn!(
                agent = %self.id,
                max_steps = self.max_steps,
                "Step limit reached, stopping agent"
            );
            self.status = AgentStatus::Stopped;
        }
        Ok(report)
    }

    async fn dispatch(&mut self, report: &mut StepReport) -> BraidResult<StepOutcome> {
        let top = self
            .stack
            .top(self.active_branch)?
            .map(|i| i.payload.clone())
            .ok_or_else(|| {
                BraidError::InvalidState(format!("branch {} is empty", self.active_branch))
            })?;

        match top {
            InteractionPayload::TaskDefinition { .. } | InteractionPayload::TaskChain { .. } => {
                self.consult_oracle(false, report).await
            }
            // The oracle was asked but never answered.
            InteractionPayload::AskOracle { .. } => self.consult_oracle(true, report).await,
            InteractionPayload::OracleResponse {
                content,
                tool_calls,
            } if tool_calls.is_empty() => {
                self.complete_task(content.unwrap_or_default(), false).await
            }
            InteractionPayload::OracleResponse { .. }
            | InteractionPayload::ToolCall { .. }
            | InteractionPayload::ToolResult { .. }
            | InteractionPayload::HumanResponse { .. }
            | InteractionPayload::AgentResult { .. }
            | InteractionPayload::ExternalInput { .. } => self.run_calls(report).await,
            InteractionPayload::AgentCall {
                call_id,
                config,
                task,
                arguments,
            } => Ok(StepOutcome::SpawnRequested(AgentCallRequest {
                call_id,
                call: AgentCall {
                    config,
                    task,
                    arguments,
                },
            })),
            InteractionPayload::AskHuman { .. } | InteractionPayload::Waiting { .. } => {
                self.status = AgentStatus::Waiting;
                Ok(StepOutcome::Suspended)
            }
            InteractionPayload::TaskResult {
                content, is_error, ..
            } => {
                if is_error {
                    self.status = AgentStatus::Failed;
                    Ok(StepOutcome::Failed(content))
                } else {
                    self.status = AgentStatus::Finished;
                    Ok(StepOutcome::Finished)
                }
            }
        }
    }

    async fn consult_oracle(
        &mut self,
        already_asked: bool,
        report: &mut StepReport,
    ) -> BraidResult<StepOutcome> {
        let frame = self.current_frame()?;
        let cursor = self.cursor()?.clone();
        let config = self.env.catalog.config(&cursor.config)?.clone();
        let system_name = cursor
            .state
            .as_deref()
            .and_then(|s| self.env.catalog.machine(&cursor.config)?.state(s))
            .and_then(|s| s.prompt_template.clone())
            .unwrap_or_else(|| config.prompt_template.clone());
        let system = self.env.catalog.template(&system_name)?;
        let prompt = self.env.catalog.template(&frame.prompt_template)?;
        let tools = self.available_tools()?;

        let history = {
            let ctx = self.context()?;
            let visible = if already_asked {
                &ctx[..ctx.len().saturating_sub(1)]
            } else {
                &ctx[..]
            };
            context::oracle_view(visible)
        };
        let ask_id = match self.stack.tip(self.active_branch)? {
            Some(tip) if already_asked => tip,
            _ => {
                self.append(InteractionPayload::AskOracle {
                    config: cursor.config.clone(),
                    state: cursor.state.clone(),
                    template: system_name,
                    tools: tools.clone(),
                    context_len: history.len(),
                })
                .await?
            }
        };

        let request = OracleRequest {
            agent_id: self.id,
            branch_id: self.active_branch,
            config: cursor.config,
            state: cursor.state,
            system,
            prompt,
            parameters: frame.parameters,
            history,
            tools: self.env.tools.descriptors_for(&tools),
        };
        report.oracle_calls += 1;

        let oracle = Arc::clone(&self.env.oracle);
        match consult_with_retry(oracle.as_ref(), &request, &config.retry).await {
            Ok(reply) => {
                let (content, tool_calls) = match reply {
                    OracleReply::Text(text) => (Some(text), Vec::new()),
                    OracleReply::ToolUse {
                        content,
                        tool_calls,
                    } => {
                        let calls = tool_calls
                            .into_iter()
                            .enumerate()
                            .map(|(k, req)| {
                                ToolCall::new(format!("{ask_id}.{k}"), req.name, req.arguments)
                            })
                            .collect::<Vec<_>>();
                        (content, calls)
                    }
                };
                info!(agent = %self.id, tool_calls = tool_calls.len(), "Oracle responded");
                self.append(InteractionPayload::OracleResponse {
                    content,
                    tool_calls,
                })
                .await?;
                Ok(StepOutcome::Progressed)
            }
            Err(e) => self.fail(e.to_string()).await,
        }
    }

    /// Runs pending calls until the batch is done or a call suspends the agent.
    async fn run_calls(&mut self, report: &mut StepReport) -> BraidResult<StepOutcome> {
        let config = self.env.catalog.config(self.current_config()?)?.clone();
        let mut ran_any = false;

        loop {
            let pending = context::next_pending_call(&self.context()?);
            let Some(pending) = pending else { break };
            ran_any = true;

            if pending.chained && !pending.recorded {
                let depth = context::chain_depth(&self.context()?);
                if depth >= config.max_chain_depth {
                    warn!(
                        agent = %self.id,
                        tool = %pending.call.name,
                        depth,
                        "Tool chain depth limit reached"
                    );
                    let call = pending.call;
                    self.record_call(&call, true).await?;
                    self.append_result(
                        &call,
                        ToolResponse::error(format!(
                            "Tool chain exceeded the maximum depth of {}",
                            config.max_chain_depth
                        )),
                        None,
                    )
                    .await?;
                    report.tool_errors += 1;
                    continue;
                }
            }

            match self.execute_call(pending, report).await? {
                CallOutcome::Done { is_error } => {
                    if is_error && config.tool_failure_policy == ToolFailurePolicy::Abort {
                        self.skip_remaining_calls().await?;
                        break;
                    }
                }
                CallOutcome::Completed { content, is_error } => {
                    return self.complete_task(content, is_error).await;
                }
                CallOutcome::Spawn(request) => return Ok(StepOutcome::SpawnRequested(request)),
                CallOutcome::Suspended => return Ok(StepOutcome::Suspended),
            }
        }

        if ran_any {
            Ok(StepOutcome::Progressed)
        } else {
            self.consult_oracle(false, report).await
        }
    }

    async fn execute_call(
        &mut self,
        pending: PendingCall,
        report: &mut StepReport,
    ) -> BraidResult<CallOutcome> {
        let PendingCall {
            call,
            chained,
            recorded,
        } = pending;
        // The active set is fixed before the call can move the automaton.
        let frame = self.current_frame()?;
        let active = self.available_tools()?;
        if !recorded {
            self.record_call(&call, chained).await?;
        }
        report.tools_executed.push(call.name.clone());

        let ctx = ToolContext {
            agent_id: self.id,
            branch_id: self.active_branch,
            task_name: frame.task_name,
            parameters: frame.parameters,
            namespaces: Arc::clone(&self.env.namespaces),
        };
        info!(
            agent = %self.id,
            tool = %call.name,
            call_id = %call.id,
            chained,
            "Executing tool call"
        );

        let tools = Arc::clone(&self.env.tools);
        let outcome = match tools.invoke(&ctx, &call, &active).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_invariant_violation() => return Err(e),
            Err(e) => {
                warn!(agent = %self.id, tool = %call.name, error = %e, "Tool failed");
                ToolResponse::error(e.to_string()).into()
            }
        };

        match outcome {
            ToolOutcome::Response(response) => {
                if response.is_error {
                    report.tool_errors += 1;
                }
                let next_tool = response.next_tool.as_ref().map(|name| {
                    ToolCall::new(
                        format!("{}-next", call.id),
                        name.clone(),
                        response.next_tool_args.clone().unwrap_or_else(|| json!({})),
                    )
                });
                let is_error = response.is_error;
                let completes_task = response.completes_task;
                let content = response.content.clone();
                self.append_result(&call, response, next_tool).await?;
                if completes_task {
                    Ok(CallOutcome::Completed { content, is_error })
                } else {
                    Ok(CallOutcome::Done { is_error })
                }
            }
            ToolOutcome::AgentCall(agent_call) => {
                info!(
                    agent = %self.id,
                    config = %agent_call.config,
                    task = %agent_call.task,
                    "Child agent requested"
                );
                self.append(InteractionPayload::AgentCall {
                    call_id: call.id.clone(),
                    config: agent_call.config.clone(),
                    task: agent_call.task.clone(),
                    arguments: agent_call.arguments.clone(),
                })
                .await?;
                Ok(CallOutcome::Spawn(AgentCallRequest {
                    call_id: call.id,
                    call: agent_call,
                }))
            }
            ToolOutcome::AskHuman { prompt } => {
                self.append(InteractionPayload::AskHuman {
                    call_id: Some(call.id),
                    prompt,
                })
                .await?;
                self.status = AgentStatus::Waiting;
                Ok(CallOutcome::Suspended)
            }
            ToolOutcome::Wait(WaitCondition::ChildTerminal) => {
                report.tool_errors += 1;
                self.append_result(
                    &call,
                    ToolResponse::error("child_terminal waits are created by agent calls"),
                    None,
                )
                .await?;
                Ok(CallOutcome::Done { is_error: true })
            }
            ToolOutcome::Wait(condition) => {
                self.append(InteractionPayload::Waiting {
                    target_agent_id: None,
                    call_id: Some(call.id),
                    condition,
                })
                .await?;
                self.status = AgentStatus::Waiting;
                Ok(CallOutcome::Suspended)
            }
        }
    }

    /// Appends a tool call and fires the transitions it triggers.
    async fn record_call(&mut self, call: &ToolCall, chained: bool) -> BraidResult<()> {
        self.append(InteractionPayload::ToolCall {
            call: call.clone(),
            chained,
        })
        .await?;
        self.advance_state(std::slice::from_ref(&call.name)).await
    }

    async fn append_result(
        &mut self,
        call: &ToolCall,
        response: ToolResponse,
        next_tool: Option<ToolCall>,
    ) -> BraidResult<InteractionId> {
        self.append(InteractionPayload::ToolResult {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: response.content,
            is_error: response.is_error,
            include_in_context: response.include_in_context,
            next_tool,
            completes_task: response.completes_task,
        })
        .await
    }

    async fn skip_remaining_calls(&mut self) -> BraidResult<()> {
        let remaining = context::unresolved_batch_calls(&self.context()?);
        if !remaining.is_empty() {
            warn!(agent = %self.id, skipped = remaining.len(), "Aborting tool batch after failure");
        }
        for call in remaining {
            self.append_result(
                &call,
                ToolResponse::error("Skipped after an earlier tool in the batch failed"),
                None,
            )
            .await?;
        }
        Ok(())
    }

    /// Records the task result, then chains into the next task or finishes.
    async fn complete_task(&mut self, content: String, is_error: bool) -> BraidResult<StepOutcome> {
        let frame = self.current_frame()?;
        let abandoned = context::unresolved_batch_calls(&self.context()?).len();
        if abandoned > 0 {
            warn!(agent = %self.id, abandoned, "Task completed with tool calls outstanding");
        }
        self.append(InteractionPayload::TaskResult {
            task_name: frame.task_name.clone(),
            content: content.clone(),
            is_error,
        })
        .await?;

        if is_error {
            warn!(agent = %self.id, task = %frame.task_name, "Task failed");
            self.status = AgentStatus::Failed;
            return Ok(StepOutcome::Failed(content));
        }

        match task::next_frame(&self.env.catalog, &frame, &content) {
            Ok(Some(next)) => {
                if next.config != frame.config {
                    let cursor = Cursor::initial(&self.env.catalog, &next.config);
                    self.cursors.insert(self.active_branch, cursor);
                }
                info!(
                    agent = %self.id,
                    from = %frame.task_name,
                    to = %next.task_name,
                    config = %next.config,
                    "Chaining to next task"
                );
                self.append(InteractionPayload::TaskChain {
                    previous_task: frame.task_name,
                    frame: next,
                })
                .await?;
                Ok(StepOutcome::Progressed)
            }
            Ok(None) => {
                info!(agent = %self.id, task = %frame.task_name, "Agent finished");
                self.status = AgentStatus::Finished;
                Ok(StepOutcome::Finished)
            }
            Err(e) => {
                self.fail(format!("cannot chain from task '{}': {e}", frame.task_name))
                    .await
            }
        }
    }

    async fn fail(&mut self, reason: String) -> BraidResult<StepOutcome> {
        error!(agent = %self.id, reason = %reason, "Agent failed");
        let task_name = self
            .current_frame()
            .map(|f| f.task_name)
            .unwrap_or_default();
        self.append(InteractionPayload::TaskResult {
            task_name,
            content: reason.clone(),
            is_error: true,
        })
        .await?;
        self.status = AgentStatus::Failed;
        Ok(StepOutcome::Failed(reason))
    }

    async fn advance_state(&mut self, executed: &[String]) -> BraidResult<()> {
        let Some(cursor) = self.cursors.get(&self.active_branch).cloned() else {
            return Ok(());
        };
        let Some(state) = cursor.state else {
            return Ok(());
        };
        let catalog = Arc::clone(&self.env.catalog);
        let Some(machine) = catalog.machine(&cursor.config) else {
            return Ok(());
        };
        if let Some(next) = machine
            .next_state(&state, executed, &self.env.namespaces, self.id)
            .await
        {
            info!(
                agent = %self.id,
                config = %cursor.config,
                from = %state,
                to = %next,
                "State transition"
            );
            if let Some(c) = self.cursors.get_mut(&self.active_branch) {
                c.state = Some(next);
            }
        }
        Ok(())
    }

    // ----- Session hooks -----

    /// Parks the agent until `child` is terminal.
    pub async fn await_child(&mut self, call_id: &str, child: AgentId) -> BraidResult<()> {
        self.append(InteractionPayload::Waiting {
            target_agent_id: Some(child),
            call_id: Some(call_id.to_string()),
            condition: WaitCondition::ChildTerminal,
        })
        .await?;
        self.status = AgentStatus::Waiting;
        Ok(())
    }

    /// Answers an agent call the session refused with an error result.
    pub async fn reject_agent_call(&mut self, call_id: &str, reason: &str) -> BraidResult<()> {
        let tool_name = self
            .context()?
            .iter()
            .rev()
            .find_map(|i| match &i.payload {
                InteractionPayload::ToolCall { call, .. } if call.id == call_id => {
                    Some(call.name.clone())
                }
                _ => None,
            })
            .unwrap_or_else(|| "agent_call".to_string());
        let call = ToolCall::new(call_id, tool_name, Value::Null);
        self.append_result(&call, ToolResponse::error(reason), None)
            .await?;
        Ok(())
    }

    pub fn pending_wait(&self) -> Option<PendingWait> {
        if self.status != AgentStatus::Waiting {
            return None;
        }
        match self.stack.top(self.active_branch).ok()?? {
            Interaction {
                id,
                payload:
                    InteractionPayload::Waiting {
                        target_agent_id,
                        call_id,
                        condition,
                    },
                ..
            } => Some(PendingWait {
                interaction_id: *id,
                target_agent_id: *target_agent_id,
                call_id: call_id.clone(),
                condition: condition.clone(),
            }),
            _ => None,
        }
    }

    /// The open human request, as `(request id, prompt)`.
    pub fn pending_human_request(&self) -> Option<(InteractionId, String)> {
        if self.status != AgentStatus::Waiting {
            return None;
        }
        match self.stack.top(self.active_branch).ok()?? {
            Interaction {
                id,
                payload: InteractionPayload::AskHuman { prompt, .. },
                ..
            } => Some((*id, prompt.clone())),
            _ => None,
        }
    }

    /// Records the terminal state of the awaited child and resumes.
    pub async fn resolve_child(
        &mut self,
        child: AgentId,
        status: AgentStatus,
        content: String,
    ) -> BraidResult<()> {
        let wait = self
            .pending_wait()
            .filter(|w| w.target_agent_id == Some(child))
            .ok_or_else(|| {
                BraidError::InvalidState(format!("agent {} is not waiting on {child}", self.id))
            })?;
        self.append(InteractionPayload::AgentResult {
            call_id: wait.call_id,
            child_id: child,
            status,
            content,
            is_error: status != AgentStatus::Finished,
        })
        .await?;
        self.status = AgentStatus::Running;
        info!(agent = %self.id, child = %child, child_status = %status, "Child resolved");
        Ok(())
    }

    /// Resumes a waiting agent with input from outside.
    pub async fn deliver_input(&mut self, source: &str, content: Value) -> BraidResult<()> {
        let wait = self.pending_wait().ok_or_else(|| {
            BraidError::InvalidState(format!("agent {} is not waiting", self.id))
        })?;
        self.append(InteractionPayload::ExternalInput {
            call_id: wait.call_id,
            source: source.to_string(),
            content,
        })
        .await?;
        self.status = AgentStatus::Running;
        debug!(agent = %self.id, source, "External input delivered");
        Ok(())
    }

    pub async fn respond_to_human(
        &mut self,
        request_id: InteractionId,
        content: String,
    ) -> BraidResult<()> {
        let call_id = match self.stack.top(self.active_branch)? {
            Some(Interaction {
                id,
                payload: InteractionPayload::AskHuman { call_id, .. },
                ..
            }) if *id == request_id && self.status == AgentStatus::Waiting => call_id.clone(),
            _ => {
                return Err(BraidError::InvalidState(format!(
                    "agent {} has no open human request {request_id}",
                    self.id
                )))
            }
        };
        self.append(InteractionPayload::HumanResponse {
            request_id,
            call_id,
            content,
        })
        .await?;
        self.status = AgentStatus::Running;
        info!(agent = %self.id, request = %request_id, "Human response recorded");
        Ok(())
    }

    /// Ends the agent as FAILED with `reason` as its result.
    pub async fn cancel(&mut self, reason: &str) -> BraidResult<()> {
        if self.status.is_terminal() {
            return Err(BraidError::InvalidState(format!(
                "agent {} is already {}",
                self.id, self.status
            )));
        }
        self.fail(format!("cancelled: {reason}")).await?;
        Ok(())
    }

    // ----- Branching -----

    /// Forks the active branch at `from_index` (default: its tip).
    ///
    /// The new branch is persisted but not activated.
    pub async fn fork(&mut self, name: &str, from_index: Option<usize>) -> BraidResult<BranchId> {
        let source = self.active_branch;
        let len = self.stack.len(source)?;
        let id = self.stack.create_branch(name, source, from_index)?;
        let record = self.stack.branch_record(id)?;
        self.env.store.record_branch(self.id, &record).await?;

        let cursor = match from_index {
            Some(index) if index < len => self.derive_cursor(id).await?,
            _ => self.cursors.get(&source).cloned(),
        };
        if let Some(cursor) = cursor {
            self.cursors.insert(id, cursor);
        }
        info!(agent = %self.id, branch = %id, name, parent = %source, "Forked branch");
        Ok(id)
    }

    /// Makes `branch` the active branch. Status follows the branch's top.
    pub fn switch_branch(&mut self, branch: BranchId) -> BraidResult<()> {
        if !self.stack.has_branch(branch) {
            return Err(BraidError::UnknownBranch(branch));
        }
        self.active_branch = branch;
        self.status = self.derive_status()?;
        info!(agent = %self.id, branch = %branch, status = %self.status, "Switched branch");
        Ok(())
    }

    // ----- Internals -----

    async fn append(&mut self, payload: InteractionPayload) -> BraidResult<InteractionId> {
        let interaction = self.stack.push(self.active_branch, payload)?.clone();
        self.env.store.append(self.id, &interaction).await?;
        Ok(interaction.id)
    }

    fn cursor(&self) -> BraidResult<&Cursor> {
        self.cursors.get(&self.active_branch).ok_or_else(|| {
            BraidError::InvalidState(format!(
                "agent {} has no task on branch {}",
                self.id, self.active_branch
            ))
        })
    }

    fn derive_status(&self) -> BraidResult<AgentStatus> {
        Ok(match self.stack.top(self.active_branch)?.map(|i| &i.payload) {
            Some(InteractionPayload::TaskResult { is_error: true, .. }) => AgentStatus::Failed,
            Some(InteractionPayload::TaskResult { .. }) => AgentStatus::Finished,
            Some(InteractionPayload::Waiting { .. })
            | Some(InteractionPayload::AskHuman { .. }) => AgentStatus::Waiting,
            _ => AgentStatus::Running,
        })
    }

    /// Recovers a branch's config and state by replaying its history.
    ///
    /// The cursor resets when a task frame switches config, takes the state
    /// recorded by each oracle consultation and advances on every recorded
    /// tool call, the same way the live agent moves.
    async fn derive_cursor(&self, branch: BranchId) -> BraidResult<Option<Cursor>> {
        let ctx = self.stack.get_context(branch)?;
        let mut cursor: Option<Cursor> = None;
        for interaction in &ctx {
            match &interaction.payload {
                InteractionPayload::TaskDefinition { frame }
                | InteractionPayload::TaskChain { frame, .. } => {
                    let same_config = cursor.as_ref().is_some_and(|c| c.config == frame.config);
                    if !same_config {
                        cursor = Some(Cursor::initial(&self.env.catalog, &frame.config));
                    }
                }
                InteractionPayload::AskOracle {
                    state: Some(recorded),
                    ..
                } => {
                    if let Some(c) = cursor.as_mut() {
                        c.state = Some(recorded.clone());
                    }
                }
                InteractionPayload::ToolCall { call, .. } => {
                    let Some(c) = cursor.as_mut() else { continue };
                    let Some(state) = c.state.clone() else { continue };
                    let Some(machine) = self.env.catalog.machine(&c.config) else {
                        continue;
                    };
                    if let Some(next) = machine
                        .next_state(
                            &state,
                            std::slice::from_ref(&call.name),
                            &self.env.namespaces,
                            self.id,
                        )
                        .await
                    {
                        c.state = Some(next);
                    }
                }
                _ => {}
            }
        }
        Ok(cursor)
    }
}
