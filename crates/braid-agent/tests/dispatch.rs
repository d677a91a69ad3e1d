//! Step dispatcher behaviour against scripted oracles and in-process tools.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use braid_agent::*;
use braid_core::{
    AgentId, AgentStatus, BraidError, BraidResult, BranchId, InteractionId, InteractionKind,
    InteractionPayload, ToolCall,
};
use braid_history::{FileInteractionStore, InMemoryInteractionStore, InteractionStore};
use braid_security::NamespaceStore;
use braid_tools::{
    AgentCall, Tool, ToolContext, ToolDescriptor, ToolOutcome, ToolRegistry, ToolResponse,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct FnTool<F> {
    descriptor: ToolDescriptor,
    f: F,
}

impl<F> FnTool<F>
where
    F: Fn(&ToolCall) -> ToolOutcome + Send + Sync + 'static,
{
    fn arc(name: &str, f: F) -> Arc<dyn Tool> {
        Arc::new(Self {
            descriptor: ToolDescriptor {
                name: name.to_string(),
                description: format!("test tool {name}"),
                parameters_schema: json!({"type": "object"}),
            },
            f,
        })
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(&ToolCall) -> ToolOutcome + Send + Sync,
{
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, _ctx: &ToolContext, call: &ToolCall) -> BraidResult<ToolOutcome> {
        Ok((self.f)(call))
    }
}

fn ok_tool(name: &str) -> Arc<dyn Tool> {
    let reply = format!("{name} ok");
    FnTool::arc(name, move |_| ToolResponse::success(reply.clone()).into())
}

fn config(name: &str, tools: &[&str]) -> AgentConfig {
    let mut config = AgentConfig::new(name, tools.iter().map(|t| t.to_string()).collect(), "sys");
    config.retry = RetryPolicy::none();
    config
}

fn base_catalog(config: AgentConfig) -> Catalog {
    Catalog::new()
        .with_template("sys", "You are a worker.")
        .with_template("do", "Do the task.")
        .with_config(config)
        .unwrap()
        .with_task(TaskSpec::new("t", "do"))
}

fn env_with_store(
    catalog: Catalog,
    tools: Vec<Arc<dyn Tool>>,
    oracle: Arc<dyn Oracle>,
    store: Arc<dyn InteractionStore>,
) -> AgentEnv {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    AgentEnv {
        catalog: Arc::new(catalog),
        tools: Arc::new(registry),
        oracle,
        namespaces: Arc::new(NamespaceStore::new()),
        store,
    }
}

fn env(catalog: Catalog, tools: Vec<Arc<dyn Tool>>, oracle: Arc<dyn Oracle>) -> AgentEnv {
    env_with_store(catalog, tools, oracle, Arc::new(InMemoryInteractionStore::new()))
}

fn use_tools(names: &[&str]) -> OracleReply {
    OracleReply::tools(names.iter().map(|n| ToolRequest::new(*n, json!({}))).collect())
}

async fn run_to_rest(agent: &mut Agent, max: usize) {
    for _ in 0..max {
        if agent.status() != AgentStatus::Running {
            return;
        }
        agent.step().await.unwrap();
    }
}

fn kinds(agent: &Agent) -> Vec<InteractionKind> {
    agent.context().unwrap().iter().map(|i| i.kind()).collect()
}

fn tool_results(agent: &Agent) -> Vec<(String, String, bool)> {
    agent
        .context()
        .unwrap()
        .iter()
        .filter_map(|i| match &i.payload {
            InteractionPayload::ToolResult {
                tool_name,
                content,
                is_error,
                ..
            } => Some((tool_name.clone(), content.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

fn state_machine_catalog() -> Catalog {
    let spec = StateMachineSpec {
        initial: "S1".into(),
        states: vec![
            StateSpec {
                name: "S1".into(),
                tools: vec!["a".into(), "b".into()],
                prompt_template: None,
            },
            StateSpec {
                name: "S2".into(),
                tools: vec!["c".into()],
                prompt_template: None,
            },
        ],
        transitions: vec![TransitionSpec {
            from: "S1".into(),
            to: "S2".into(),
            trigger: Trigger::ToolCall("b".into()),
        }],
    };
    base_catalog(config("sm", &["a", "b", "c"]).with_state_machine(spec))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn text_reply_finishes_task() {
    let oracle = Arc::new(ScriptedOracle::new(vec![OracleReply::Text("done".into())]));
    let mut agent = Agent::create(
        env(base_catalog(config("main", &[])), vec![], oracle),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    let report = agent.step().await.unwrap();
    assert_eq!(report.outcome, StepOutcome::Progressed);
    assert_eq!(report.oracle_calls, 1);

    let report = agent.step().await.unwrap();
    assert_eq!(report.outcome, StepOutcome::Finished);
    assert_eq!(agent.status(), AgentStatus::Finished);
    assert_eq!(agent.final_result(), Some(("done".to_string(), false)));
    assert_eq!(
        kinds(&agent),
        vec![
            InteractionKind::TaskDefinition,
            InteractionKind::AskOracle,
            InteractionKind::OracleResponse,
            InteractionKind::TaskResult,
        ]
    );

    // Terminal agents do nothing.
    assert_eq!(agent.step().await.unwrap().outcome, StepOutcome::Idle);
}

#[tokio::test]
async fn state_machine_advances_on_tool_call() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        use_tools(&["b"]),
        OracleReply::Text("done".into()),
    ]));
    let tools = vec![ok_tool("a"), ok_tool("b"), ok_tool("c")];
    let mut agent = Agent::create(
        env(state_machine_catalog(), tools, oracle),
        "sm",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();
    assert_eq!(agent.current_state(), Some("S1"));
    assert_eq!(agent.available_tools().unwrap(), vec!["a", "b"]);

    agent.step().await.unwrap();
    assert_eq!(agent.current_state(), Some("S1"));

    let report = agent.step().await.unwrap();
    assert_eq!(report.tools_executed, vec!["b"]);
    assert_eq!(agent.current_state(), Some("S2"));
    assert_eq!(agent.available_tools().unwrap(), vec!["c"]);

    // The next consultation records the new state.
    agent.step().await.unwrap();
    let ask = agent
        .context()
        .unwrap()
        .iter()
        .rev()
        .find_map(|i| match &i.payload {
            InteractionPayload::AskOracle { state, tools, .. } => {
                Some((state.clone(), tools.clone()))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(ask, (Some("S2".to_string()), vec!["c".to_string()]));
}

#[tokio::test]
async fn task_sequence_passes_result() {
    let catalog = Catalog::new()
        .with_template("sys", "sys")
        .with_template("do", "do")
        .with_config(config("main", &[]))
        .unwrap()
        .with_task(TaskSpec::new("t1", "do").with_sequence(vec!["t2".into()], Some("x")))
        .with_task(
            TaskSpec::new("t2", "do").with_parameter(ParamSpec::required("x", ParamKind::String)),
        );
    let oracle = Arc::new(FnOracle::new(|req: &OracleRequest| {
        Ok(match req.parameters.get("x") {
            Some(x) => OracleReply::Text(format!("got {}", x.as_str().unwrap_or_default())),
            None => OracleReply::Text("42".into()),
        })
    }));
    let mut agent = Agent::create(env(catalog, vec![], oracle), "main", "t1", &BTreeMap::new())
        .await
        .unwrap();

    agent.step().await.unwrap();
    agent.step().await.unwrap();
    let frame = agent.current_frame().unwrap();
    assert_eq!(frame.task_name, "t2");
    assert_eq!(frame.parameters["x"], json!("42"));
    assert_eq!(agent.status(), AgentStatus::Running);

    run_to_rest(&mut agent, 10).await;
    assert_eq!(agent.status(), AgentStatus::Finished);
    assert_eq!(agent.final_result().unwrap().0, "got 42");

    let ctx = agent.context().unwrap();
    let chain = ctx
        .iter()
        .find_map(|i| match &i.payload {
            InteractionPayload::TaskChain { previous_task, .. } => Some(previous_task.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(chain, "t1");
}

fn counting_tool() -> Arc<dyn Tool> {
    FnTool::arc("count", |call| {
        let n = call.arguments["n"].as_i64().unwrap_or(0);
        if n > 0 {
            ToolResponse::success(format!("n={n}"))
                .hidden()
                .then("count", json!({"n": n - 1}))
                .into()
        } else {
            ToolResponse::success("bottom").into()
        }
    })
}

#[tokio::test]
async fn tool_chain_runs_without_oracle_and_hides_intermediates() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        OracleReply::tools(vec![ToolRequest::new("count", json!({"n": 3}))]),
        OracleReply::Text("done".into()),
    ]));
    let mut agent = Agent::create(
        env(base_catalog(config("main", &["count"])), vec![counting_tool()], oracle.clone()),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    agent.step().await.unwrap();
    let report = agent.step().await.unwrap();
    assert_eq!(report.oracle_calls, 0);
    assert_eq!(report.tools_executed.len(), 4);

    let ctx = agent.context().unwrap();
    let chained: Vec<bool> = ctx
        .iter()
        .filter_map(|i| match &i.payload {
            InteractionPayload::ToolCall { chained, .. } => Some(*chained),
            _ => None,
        })
        .collect();
    assert_eq!(chained, vec![false, true, true, true]);

    let results = tool_results(&agent);
    assert_eq!(results.len(), 4);
    assert_eq!(results[3].1, "bottom");

    // All persisted, three hidden from the oracle.
    assert_eq!(ctx.len(), 11);
    assert_eq!(agent.oracle_context().unwrap().len(), 8);
    assert_eq!(oracle.remaining().await, 1);
}

#[tokio::test]
async fn tool_chain_depth_is_bounded() {
    let mut limited = config("main", &["count"]);
    limited.max_chain_depth = 2;
    let oracle = Arc::new(ScriptedOracle::new(vec![OracleReply::tools(vec![
        ToolRequest::new("count", json!({"n": 5})),
    ])]));
    let mut agent = Agent::create(
        env(base_catalog(limited), vec![counting_tool()], oracle),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    agent.step().await.unwrap();
    let report = agent.step().await.unwrap();
    assert_eq!(report.tools_executed.len(), 3);
    assert_eq!(report.tool_errors, 1);

    let results = tool_results(&agent);
    let last = results.last().unwrap();
    assert!(last.2);
    assert!(last.1.contains("maximum depth"));
}

#[tokio::test]
async fn batch_runs_in_order_and_continues_after_failure() {
    let oracle = Arc::new(ScriptedOracle::new(vec![use_tools(&["fail", "ok"])]));
    let tools = vec![
        FnTool::arc("fail", |_| ToolResponse::error("boom").into()),
        ok_tool("ok"),
    ];
    let mut agent = Agent::create(
        env(base_catalog(config("main", &["fail", "ok"])), tools, oracle),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    agent.step().await.unwrap();
    let report = agent.step().await.unwrap();
    assert_eq!(report.tools_executed, vec!["fail", "ok"]);
    assert_eq!(report.tool_errors, 1);
    assert_eq!(
        tool_results(&agent),
        vec![
            ("fail".to_string(), "boom".to_string(), true),
            ("ok".to_string(), "ok ok".to_string(), false),
        ]
    );
    assert_eq!(agent.status(), AgentStatus::Running);
}

#[tokio::test]
async fn abort_policy_skips_rest_of_batch() {
    let mut aborting = config("main", &["fail", "ok"]);
    aborting.tool_failure_policy = ToolFailurePolicy::Abort;
    let oracle = Arc::new(ScriptedOracle::new(vec![use_tools(&["fail", "ok"])]));
    let tools = vec![
        FnTool::arc("fail", |_| ToolResponse::error("boom").into()),
        ok_tool("ok"),
    ];
    let mut agent = Agent::create(
        env(base_catalog(aborting), tools, oracle),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    agent.step().await.unwrap();
    let report = agent.step().await.unwrap();
    assert_eq!(report.tools_executed, vec!["fail"]);
    let results = tool_results(&agent);
    assert_eq!(results.len(), 2);
    assert!(results[1].2);
    assert!(results[1].1.starts_with("Skipped"));
}

#[tokio::test]
async fn tool_outside_active_set_is_recoverable() {
    let oracle = Arc::new(ScriptedOracle::new(vec![use_tools(&["c"])]));
    let tools = vec![ok_tool("a"), ok_tool("b"), ok_tool("c")];
    let mut agent = Agent::create(
        env(state_machine_catalog(), tools, oracle),
        "sm",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    agent.step().await.unwrap();
    agent.step().await.unwrap();
    let results = tool_results(&agent);
    assert!(results[0].2);
    assert_eq!(agent.status(), AgentStatus::Running);
}

#[tokio::test]
async fn completing_tool_finishes_and_abandons_rest() {
    let oracle = Arc::new(ScriptedOracle::new(vec![use_tools(&["finish", "a"])]));
    let tools = vec![
        FnTool::arc("finish", |_| ToolResponse::success("answer").complete().into()),
        ok_tool("a"),
    ];
    let mut agent = Agent::create(
        env(base_catalog(config("main", &["finish", "a"])), tools, oracle),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    agent.step().await.unwrap();
    let report = agent.step().await.unwrap();
    assert_eq!(report.outcome, StepOutcome::Finished);
    assert_eq!(report.tools_executed, vec!["finish"]);
    assert_eq!(agent.final_result(), Some(("answer".to_string(), false)));
}

#[tokio::test]
async fn exhausted_oracle_retries_fail_the_agent() {
    let mut retrying = config("main", &[]);
    retrying.retry.max_retries = 1;
    let oracle = Arc::new(ScriptedOracle::with_results(vec![
        Err(BraidError::OracleCallFailed("timeout".into())),
        Err(BraidError::OracleCallFailed("timeout".into())),
        Ok(OracleReply::Text("too late".into())),
    ]));
    let mut agent = Agent::create(
        env(base_catalog(retrying), vec![], oracle.clone()),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    let report = agent.step().await.unwrap();
    assert!(matches!(report.outcome, StepOutcome::Failed(_)));
    assert_eq!(agent.status(), AgentStatus::Failed);
    let (content, is_error) = agent.final_result().unwrap();
    assert!(is_error);
    assert!(content.contains("timeout"));
    assert_eq!(oracle.remaining().await, 1);
}

#[tokio::test]
async fn step_limit_stops_agent() {
    let mut bounded = config("main", &["a"]);
    bounded.max_steps = 3;
    let oracle = Arc::new(FnOracle::new(|_req: &OracleRequest| Ok(use_tools(&["a"]))));
    let mut agent = Agent::create(
        env(base_catalog(bounded), vec![ok_tool("a")], oracle),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    run_to_rest(&mut agent, 10).await;
    assert_eq!(agent.status(), AgentStatus::Stopped);
    assert_ne!(agent.status(), AgentStatus::Finished);
    assert_eq!(agent.steps_taken(), 3);
    assert!(agent.final_result().is_none());
    assert_eq!(agent.step().await.unwrap().outcome, StepOutcome::Idle);
}

#[tokio::test]
async fn human_request_suspends_until_answered() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        use_tools(&["ask"]),
        OracleReply::Text("thanks".into()),
    ]));
    let tools = vec![FnTool::arc("ask", |_| ToolOutcome::AskHuman {
        prompt: "proceed?".into(),
    })];
    let mut agent = Agent::create(
        env(base_catalog(config("main", &["ask"])), tools, oracle),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    agent.step().await.unwrap();
    let report = agent.step().await.unwrap();
    assert_eq!(report.outcome, StepOutcome::Suspended);
    assert_eq!(agent.status(), AgentStatus::Waiting);

    let (request_id, prompt) = agent.pending_human_request().unwrap();
    assert_eq!(prompt, "proceed?");

    let err = agent
        .respond_to_human(InteractionId(request_id.0 + 100), "yes".into())
        .await
        .unwrap_err();
    assert!(matches!(err, BraidError::InvalidState(_)));
    assert_eq!(agent.status(), AgentStatus::Waiting);

    agent.respond_to_human(request_id, "yes".into()).await.unwrap();
    assert_eq!(agent.status(), AgentStatus::Running);

    run_to_rest(&mut agent, 5).await;
    assert_eq!(agent.status(), AgentStatus::Finished);
    let history = agent.oracle_context().unwrap();
    assert!(history.iter().any(|i| matches!(
        &i.payload,
        InteractionPayload::HumanResponse { content, call_id: Some(_), .. } if content == "yes"
    )));
}

#[tokio::test]
async fn agent_call_waits_for_child() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        use_tools(&["delegate"]),
        OracleReply::Text("merged".into()),
    ]));
    let tools = vec![FnTool::arc("delegate", |_| {
        ToolOutcome::AgentCall(AgentCall {
            config: "main".into(),
            task: "t".into(),
            arguments: BTreeMap::new(),
        })
    })];
    let mut agent = Agent::create(
        env(base_catalog(config("main", &["delegate"])), tools, oracle),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    agent.step().await.unwrap();
    let StepOutcome::SpawnRequested(request) = agent.step().await.unwrap().outcome else {
        panic!("expected a spawn request");
    };
    assert_eq!(request.call.task, "t");

    let child = AgentId::new();
    agent.await_child(&request.call_id, child).await.unwrap();
    assert_eq!(agent.status(), AgentStatus::Waiting);
    let wait = agent.pending_wait().unwrap();
    assert_eq!(wait.target_agent_id, Some(child));

    assert!(agent
        .resolve_child(AgentId::new(), AgentStatus::Finished, "x".into())
        .await
        .is_err());
    agent
        .resolve_child(child, AgentStatus::Finished, "child says hi".into())
        .await
        .unwrap();
    assert_eq!(agent.status(), AgentStatus::Running);

    run_to_rest(&mut agent, 5).await;
    assert_eq!(agent.final_result().unwrap().0, "merged");
}

#[tokio::test]
async fn rejected_agent_call_becomes_error_result() {
    let oracle = Arc::new(ScriptedOracle::new(vec![use_tools(&["delegate"])]));
    let tools = vec![FnTool::arc("delegate", |_| {
        ToolOutcome::AgentCall(AgentCall {
            config: "main".into(),
            task: "t".into(),
            arguments: BTreeMap::new(),
        })
    })];
    let mut agent = Agent::create(
        env(base_catalog(config("main", &["delegate"])), tools, oracle),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();

    agent.step().await.unwrap();
    let StepOutcome::SpawnRequested(request) = agent.step().await.unwrap().outcome else {
        panic!("expected a spawn request");
    };
    agent
        .reject_agent_call(&request.call_id, "depth limit")
        .await
        .unwrap();
    assert_eq!(agent.status(), AgentStatus::Running);
    assert_eq!(
        tool_results(&agent),
        vec![("delegate".to_string(), "depth limit".to_string(), true)]
    );
}

#[tokio::test]
async fn invalid_task_arguments_produce_no_agent() {
    let catalog = Catalog::new()
        .with_template("sys", "sys")
        .with_template("do", "do")
        .with_config(config("main", &[]))
        .unwrap()
        .with_task(
            TaskSpec::new("t", "do").with_parameter(ParamSpec::required("n", ParamKind::Integer)),
        );
    let store = Arc::new(InMemoryInteractionStore::new());
    let oracle = Arc::new(ScriptedOracle::new(vec![]));
    let env = env_with_store(catalog, vec![], oracle, store.clone());

    let missing = Agent::create(env.clone(), "main", "t", &BTreeMap::new()).await;
    assert!(matches!(missing, Err(BraidError::Validation(_))));

    let mut args = BTreeMap::new();
    args.insert("n".to_string(), json!("many"));
    assert!(Agent::create(env.clone(), "main", "t", &args).await.is_err());
    assert!(Agent::create(env, "ghost", "t", &BTreeMap::new()).await.is_err());

    assert!(store.agents().await.unwrap().is_empty());
}

#[tokio::test]
async fn fork_and_switch_branches() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        OracleReply::Text("main answer".into()),
        OracleReply::Text("alt answer".into()),
    ]));
    let mut agent = Agent::create(
        env(base_catalog(config("main", &[])), vec![], oracle),
        "main",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();
    agent.step().await.unwrap();
    assert_eq!(agent.context().unwrap().len(), 3);

    let alt = agent.fork("alt", Some(1)).await.unwrap();
    assert!(matches!(
        agent.fork("bad", Some(99)).await,
        Err(BraidError::IndexOutOfRange { .. })
    ));

    agent.switch_branch(alt).unwrap();
    assert_eq!(agent.context().unwrap().len(), 1);
    run_to_rest(&mut agent, 5).await;
    assert_eq!(agent.final_result().unwrap().0, "alt answer");

    agent.switch_branch(BranchId::MAIN).unwrap();
    assert_eq!(agent.status(), AgentStatus::Running);
    assert_eq!(agent.context().unwrap().len(), 3);

    assert!(matches!(
        agent.switch_branch(BranchId(42)),
        Err(BraidError::UnknownBranch(_))
    ));
}

#[tokio::test]
async fn restore_resumes_from_file_store() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn InteractionStore> =
        Arc::new(FileInteractionStore::new(tmp.path().to_path_buf()).await.unwrap());
    let tools = || vec![ok_tool("a"), ok_tool("b"), ok_tool("c")];

    let first = Arc::new(ScriptedOracle::new(vec![use_tools(&["b"])]));
    let mut agent = Agent::create(
        env_with_store(state_machine_catalog(), tools(), first, store.clone()),
        "sm",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();
    agent.step().await.unwrap();
    agent.step().await.unwrap();
    let id = agent.id();
    let before: Vec<_> = agent
        .stack()
        .interactions()
        .iter()
        .map(|i| i.payload.clone())
        .collect();
    drop(agent);

    let second = Arc::new(ScriptedOracle::new(vec![OracleReply::Text("resumed".into())]));
    let mut restored = Agent::restore(
        id,
        env_with_store(state_machine_catalog(), tools(), second, store),
    )
    .await
    .unwrap();
    let after: Vec<_> = restored
        .stack()
        .interactions()
        .iter()
        .map(|i| i.payload.clone())
        .collect();
    assert_eq!(before, after);
    assert_eq!(restored.status(), AgentStatus::Running);
    assert_eq!(restored.current_state(), Some("S2"));
    assert_eq!(restored.available_tools().unwrap(), vec!["c"]);

    run_to_rest(&mut restored, 5).await;
    assert_eq!(restored.status(), AgentStatus::Finished);
    assert_eq!(restored.final_result().unwrap().0, "resumed");
}

#[tokio::test]
async fn forked_branches_keep_their_own_state() {
    let oracle = Arc::new(ScriptedOracle::new(vec![use_tools(&["b"])]));
    let tools = vec![ok_tool("a"), ok_tool("b"), ok_tool("c")];
    let mut agent = Agent::create(
        env(state_machine_catalog(), tools, oracle),
        "sm",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();
    agent.step().await.unwrap();
    assert_eq!(agent.context().unwrap().len(), 3);
    agent.step().await.unwrap();
    assert_eq!(agent.current_state(), Some("S2"));

    // Index 3 is the oracle response, before `b` ran.
    let before_b = agent.fork("before_b", Some(3)).await.unwrap();
    let at_tip = agent.fork("at_tip", None).await.unwrap();
    assert_eq!(agent.available_tools().unwrap(), vec!["c"]);

    agent.switch_branch(before_b).unwrap();
    assert_eq!(agent.current_state(), Some("S1"));
    assert_eq!(agent.available_tools().unwrap(), vec!["a", "b"]);

    agent.switch_branch(at_tip).unwrap();
    assert_eq!(agent.current_state(), Some("S2"));

    // Running `b` on the early fork moves only that branch.
    agent.switch_branch(before_b).unwrap();
    let report = agent.step().await.unwrap();
    assert_eq!(report.tools_executed, vec!["b"]);
    assert_eq!(agent.available_tools().unwrap(), vec!["c"]);
    assert_eq!(tool_results(&agent).len(), 1);

    agent.switch_branch(BranchId::MAIN).unwrap();
    assert_eq!(agent.available_tools().unwrap(), vec!["c"]);
    assert_eq!(tool_results(&agent).len(), 1);
}

#[tokio::test]
async fn restore_keeps_state_across_same_config_chain() {
    let store: Arc<dyn InteractionStore> = Arc::new(InMemoryInteractionStore::new());
    let catalog = || {
        state_machine_catalog()
            .with_task(TaskSpec::new("t1", "do").with_sequence(vec!["t2".into()], None))
            .with_task(TaskSpec::new("t2", "do"))
    };
    let tools = || {
        vec![
            ok_tool("a"),
            FnTool::arc("b", |_| ToolResponse::success("first done").complete().into()),
            ok_tool("c"),
        ]
    };

    let oracle = Arc::new(ScriptedOracle::new(vec![use_tools(&["b"])]));
    let mut agent = Agent::create(
        env_with_store(catalog(), tools(), oracle, store.clone()),
        "sm",
        "t1",
        &BTreeMap::new(),
    )
    .await
    .unwrap();
    agent.step().await.unwrap();
    agent.step().await.unwrap();
    assert_eq!(agent.current_frame().unwrap().task_name, "t2");
    assert_eq!(agent.current_state(), Some("S2"));

    let oracle = Arc::new(ScriptedOracle::new(vec![]));
    let restored = Agent::restore(agent.id(), env_with_store(catalog(), tools(), oracle, store))
        .await
        .unwrap();
    assert_eq!(restored.current_frame().unwrap().task_name, "t2");
    assert_eq!(restored.current_state(), Some("S2"));
    assert_eq!(restored.available_tools().unwrap(), vec!["c"]);
}

#[tokio::test]
async fn restore_replays_each_transition_of_a_suspended_batch() {
    let spec = StateMachineSpec {
        initial: "S1".into(),
        states: vec![
            StateSpec {
                name: "S1".into(),
                tools: vec!["a".into(), "ask".into()],
                prompt_template: None,
            },
            StateSpec {
                name: "S2".into(),
                tools: vec!["ask".into(), "b".into()],
                prompt_template: None,
            },
            StateSpec {
                name: "S3".into(),
                tools: vec!["c".into()],
                prompt_template: None,
            },
        ],
        transitions: vec![
            TransitionSpec {
                from: "S1".into(),
                to: "S2".into(),
                trigger: Trigger::ToolCall("a".into()),
            },
            TransitionSpec {
                from: "S2".into(),
                to: "S3".into(),
                trigger: Trigger::ToolCall("b".into()),
            },
        ],
    };
    let catalog = || {
        base_catalog(config("sm", &["a", "ask", "b", "c"]).with_state_machine(spec.clone()))
    };
    let tools = || {
        vec![
            ok_tool("a"),
            ok_tool("b"),
            ok_tool("c"),
            FnTool::arc("ask", |_| ToolOutcome::AskHuman {
                prompt: "continue?".into(),
            }),
        ]
    };
    let store: Arc<dyn InteractionStore> = Arc::new(InMemoryInteractionStore::new());
    let oracle = Arc::new(ScriptedOracle::new(vec![use_tools(&["a", "ask", "b"])]));
    let mut agent = Agent::create(
        env_with_store(catalog(), tools(), oracle, store.clone()),
        "sm",
        "t",
        &BTreeMap::new(),
    )
    .await
    .unwrap();
    agent.step().await.unwrap();
    agent.step().await.unwrap();
    assert_eq!(agent.status(), AgentStatus::Waiting);
    assert_eq!(agent.current_state(), Some("S2"));

    let id = agent.id();
    let restore_env = || {
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        env_with_store(catalog(), tools(), oracle, store.clone())
    };
    let suspended = Agent::restore(id, restore_env()).await.unwrap();
    assert_eq!(suspended.status(), AgentStatus::Waiting);
    assert_eq!(suspended.current_state(), Some("S2"));

    let (request, _) = agent.pending_human_request().unwrap();
    agent.respond_to_human(request, "yes".into()).await.unwrap();
    let report = agent.step().await.unwrap();
    assert_eq!(report.tools_executed, vec!["b"]);
    assert_eq!(agent.current_state(), Some("S3"));

    let resumed = Agent::restore(id, restore_env()).await.unwrap();
    assert_eq!(resumed.current_state(), Some("S3"));
    assert_eq!(resumed.available_tools().unwrap(), vec!["c"]);
}

#[tokio::test]
async fn restore_unknown_agent_fails() {
    let oracle = Arc::new(ScriptedOracle::new(vec![]));
    let err = Agent::restore(AgentId::new(), env(Catalog::new(), vec![], oracle))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BraidError::UnknownAgent(_)));
}
