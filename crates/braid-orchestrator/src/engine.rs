use crate::monitor::{is_productive, AgentMonitor};
use crate::spawner::SubAgentSpawner;
use crate::types::{
    AgentMetrics, AgentSummary, HumanRequest, RoundReport, RunReport, SessionConfig,
};
use braid_agent::{Agent, AgentCallRequest, AgentEnv, Catalog, Oracle, StepOutcome};
use braid_core::{AgentId, AgentStatus, BraidError, BraidResult, InteractionId, WaitCondition};
use braid_history::{InMemoryInteractionStore, InteractionStore};
use braid_security::NamespaceStore;
use braid_tools::ToolRegistry;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owner and cooperative scheduler of a set of agents.
///
/// Each round steps every RUNNING agent once, in registration order, and
/// then resumes WAITING agents whose condition is satisfied. An agent resumed
/// in round `r` is first stepped in round `r + 1`.
///
/// The resolution schedules differ by condition. A child wait only resolves
/// against children that were already terminal when the round began, so a
/// child finishing in round `r` frees its parent at the end of `r + 1`. Tick
/// and signal waits resolve in the round their condition becomes true.
/// Answering a human request resumes the agent immediately.
pub struct Session {
    config: SessionConfig,
    env: AgentEnv,
    agents: HashMap<AgentId, Agent>,
    order: Vec<AgentId>,
    spawner: SubAgentSpawner,
    monitor: Arc<AgentMonitor>,
    round: u64,
    /// Tick waits in progress: the `Waiting` interaction and the round it was first seen.
    tick_waits: HashMap<AgentId, (InteractionId, u64)>,
    signals: HashMap<AgentId, VecDeque<(String, Value)>>,
}

impl Session {
    /// Creates a session with an in-memory history store and an empty
    /// namespace store.
    pub fn new(catalog: Arc<Catalog>, tools: Arc<ToolRegistry>, oracle: Arc<dyn Oracle>) -> Self {
        let config = SessionConfig::default();
        Self {
            spawner: spawner_for(&config),
            config,
            env: AgentEnv {
                catalog,
                tools,
                oracle,
                namespaces: Arc::new(NamespaceStore::new()),
                store: Arc::new(InMemoryInteractionStore::new()),
            },
            agents: HashMap::new(),
            order: Vec::new(),
            monitor: Arc::new(AgentMonitor::new()),
            round: 0,
            tick_waits: HashMap::new(),
            signals: HashMap::new(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.spawner = spawner_for(&config);
        self.config = config;
        self
    }

    /// Persists every agent of this session to `store`.
    pub fn with_store(mut self, store: Arc<dyn InteractionStore>) -> Self {
        self.env.store = store;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    pub fn namespaces(&self) -> &Arc<NamespaceStore> {
        &self.env.namespaces
    }

    /// Rounds completed so far.
    pub fn round(&self) -> u64 {
        self.round
    }

    // ----- Agents -----

    /// Creates and registers a root agent running `task` under `config`.
    ///
    /// Invalid arguments or an unresolvable config, task or template fail
    /// with [`BraidError::Validation`] and register nothing.
    pub async fn create_agent_from_task(
        &mut self,
        config: &str,
        task: &str,
        args: BTreeMap<String, Value>,
    ) -> BraidResult<AgentId> {
        let agent = Agent::create(self.env.clone(), config, task, &args).await?;
        let id = agent.id();
        self.spawner.register_root(id);
        self.register(agent).await;
        info!(agent = %id, config, task, "Session agent registered");
        Ok(id)
    }

    /// Reloads a persisted agent from the session's store and registers it.
    pub async fn restore_agent(&mut self, id: AgentId) -> BraidResult<AgentId> {
        if self.agents.contains_key(&id) {
            return Err(BraidError::InvalidState(format!(
                "agent {id} is already part of this session"
            )));
        }
        let agent = Agent::restore(id, self.env.clone()).await?;
        self.spawner.register_root(id);
        self.register(agent).await;
        Ok(id)
    }

    async fn register(&mut self, mut agent: Agent) {
        if let Some(cap) = self.config.max_steps_per_agent {
            agent.set_max_steps(agent.max_steps().min(cap));
        }
        let id = agent.id();
        self.monitor.register(id).await;
        self.order.push(id);
        self.agents.insert(id, agent);
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Direct access for branch operations. Stepping an agent outside the
    /// scheduler bypasses spawn handling and wait resolution.
    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(&id)
    }

    /// Agent ids in registration order.
    pub fn agent_ids(&self) -> &[AgentId] {
        &self.order
    }

    pub fn status(&self, id: AgentId) -> BraidResult<AgentStatus> {
        Ok(self.get(id)?.status())
    }

    pub fn children_of(&self, id: AgentId) -> Vec<AgentId> {
        self.spawner.children_of(id)
    }

    pub async fn metrics(&self, id: AgentId) -> BraidResult<AgentMetrics> {
        self.monitor
            .get(id)
            .await
            .ok_or(BraidError::UnknownAgent(id))
    }

    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        self.monitor.aggregate().await
    }

    pub fn summaries(&self) -> Vec<AgentSummary> {
        self.order
            .iter()
            .filter_map(|id| self.agents.get(id))
            .map(|agent| AgentSummary {
                id: agent.id(),
                status: agent.status(),
                parent: self.spawner.parent_of(agent.id()),
                depth: self.spawner.depth_of(agent.id()),
                task: agent.current_frame().ok().map(|f| f.task_name),
                result: agent.final_result().map(|(content, _)| content),
            })
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.agents.values().all(|a| a.status().is_terminal())
    }

    fn get(&self, id: AgentId) -> BraidResult<&Agent> {
        self.agents.get(&id).ok_or(BraidError::UnknownAgent(id))
    }

    fn get_mut(&mut self, id: AgentId) -> BraidResult<&mut Agent> {
        self.agents.get_mut(&id).ok_or(BraidError::UnknownAgent(id))
    }

    // ----- Scheduling -----

    /// Runs one scheduler round.
    ///
    /// Only errors that leave an agent's history inconsistent, or failures
    /// of the history store, are returned. Everything else ends up in the
    /// affected agent's history.
    pub async fn step(&mut self) -> BraidResult<RoundReport> {
        self.round += 1;
        let round = self.round;
        let terminal_at_start: HashSet<AgentId> = self
            .agents
            .iter()
            .filter(|(_, a)| a.status().is_terminal())
            .map(|(id, _)| *id)
            .collect();
        let mut report = RoundReport {
            round,
            ..RoundReport::default()
        };

        // Children registered during the round join the order but wait for the next one.
        let order = self.order.clone();
        for id in order {
            let Some(agent) = self.agents.get_mut(&id) else {
                continue;
            };
            if agent.status() != AgentStatus::Running {
                continue;
            }
            let step = agent.step().await?;
            report.stepped += 1;
            if is_productive(&step) {
                self.monitor.record_step(id, &step).await;
            }
            if let StepOutcome::SpawnRequested(request) = step.outcome {
                self.spawn_child(id, request).await?;
            }
        }

        report.resolved = self.resolve_waits(&terminal_at_start).await?;
        report.ticking = self.tick_waits.len();
        debug!(
            round,
            stepped = report.stepped,
            resolved = report.resolved,
            ticking = report.ticking,
            "Round complete"
        );
        Ok(report)
    }

    /// Steps rounds until every agent is terminal, the session is blocked on
    /// outside input, or `max_rounds` is reached.
    pub async fn run(&mut self) -> BraidResult<RunReport> {
        let mut rounds = 0;
        let mut blocked = false;
        while !self.all_terminal() && rounds < self.config.max_rounds {
            let report = self.step().await?;
            rounds += 1;
            if report.is_idle() && !self.all_terminal() {
                blocked = true;
                break;
            }
        }

        let all_terminal = self.all_terminal();
        if blocked {
            info!(rounds, "Session blocked on external input");
        } else if !all_terminal {
            warn!(rounds, max_rounds = self.config.max_rounds, "Session round limit reached");
        } else {
            info!(rounds, agents = self.order.len(), "Session complete");
        }
        Ok(RunReport {
            rounds,
            all_terminal,
            blocked,
            agents: self.summaries(),
        })
    }

    async fn spawn_child(&mut self, parent: AgentId, request: AgentCallRequest) -> BraidResult<()> {
        // The step that asked for the child may also have hit the step limit.
        let status = self.status(parent)?;
        if status.is_terminal() {
            warn!(parent = %parent, status = %status, "Agent call from a terminal agent dropped");
            let reason = format!("agent is {status}, child not spawned");
            return self
                .get_mut(parent)?
                .reject_agent_call(&request.call_id, &reason)
                .await;
        }

        let created = match self.spawner.check(parent) {
            Ok(_) => {
                let call = &request.call;
                Agent::create(self.env.clone(), &call.config, &call.task, &call.arguments).await
            }
            Err(e) => Err(e),
        };

        match created {
            Ok(child) => {
                let child_id = child.id();
                self.spawner.record_child(parent, child_id);
                self.monitor.record_spawn(parent).await;
                self.register(child).await;
                self.get_mut(parent)?
                    .await_child(&request.call_id, child_id)
                    .await?;
                info!(
                    parent = %parent,
                    child = %child_id,
                    config = %request.call.config,
                    task = %request.call.task,
                    "Spawned child agent"
                );
                Ok(())
            }
            Err(e @ (BraidError::Validation(_) | BraidError::InvalidState(_))) => {
                warn!(parent = %parent, error = %e, "Agent call rejected");
                self.get_mut(parent)?
                    .reject_agent_call(&request.call_id, &e.to_string())
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Resumes every waiting agent whose condition is satisfied.
    async fn resolve_waits(&mut self, terminal_at_start: &HashSet<AgentId>) -> BraidResult<usize> {
        let mut resolved = 0;
        for id in self.order.clone() {
            if self.agents.get(&id).is_some_and(|a| a.status().is_terminal()) {
                self.tick_waits.remove(&id);
                self.signals.remove(&id);
                continue;
            }
            let Some(wait) = self.agents.get(&id).and_then(Agent::pending_wait) else {
                self.tick_waits.remove(&id);
                continue;
            };

            match wait.condition {
                WaitCondition::ChildTerminal => {
                    let Some(child) = wait.target_agent_id else {
                        continue;
                    };
                    let Some((status, content)) = self.child_outcome(child, terminal_at_start)
                    else {
                        continue;
                    };
                    self.get_mut(id)?
                        .resolve_child(child, status, content)
                        .await?;
                    resolved += 1;
                }
                WaitCondition::TickCount { ticks } => {
                    let since = match self.tick_waits.get(&id) {
                        Some((waiting, since)) if *waiting == wait.interaction_id => *since,
                        _ => {
                            self.tick_waits
                                .insert(id, (wait.interaction_id, self.round));
                            self.round
                        }
                    };
                    if self.round >= since.saturating_add(ticks) {
                        self.tick_waits.remove(&id);
                        let round = self.round;
                        self.get_mut(id)?
                            .deliver_input("scheduler", json!({ "ticks": ticks, "round": round }))
                            .await?;
                        resolved += 1;
                    }
                }
                WaitCondition::ExternalSignal { name } => {
                    let Some(payload) = self.take_signal(id, &name) else {
                        continue;
                    };
                    self.get_mut(id)?
                        .deliver_input("signal", json!({ "signal": name, "payload": payload }))
                        .await?;
                    resolved += 1;
                }
            }
        }
        Ok(resolved)
    }

    /// Status and result handed to a parent once `child` is terminal.
    fn child_outcome(
        &self,
        child: AgentId,
        terminal_at_start: &HashSet<AgentId>,
    ) -> Option<(AgentStatus, String)> {
        let Some(agent) = self.agents.get(&child) else {
            warn!(child = %child, "Awaited child is not part of this session");
            return Some((
                AgentStatus::Failed,
                format!("child agent {child} is not part of this session"),
            ));
        };
        if !terminal_at_start.contains(&child) {
            return None;
        }
        let status = agent.status();
        let content = match status {
            AgentStatus::Stopped => format!("stopped after {} steps", agent.steps_taken()),
            _ => agent
                .final_result()
                .map(|(content, _)| content)
                .unwrap_or_default(),
        };
        Some((status, content))
    }

    fn take_signal(&mut self, id: AgentId, name: &str) -> Option<Value> {
        let queue = self.signals.get_mut(&id)?;
        let position = queue.iter().position(|(n, _)| n == name)?;
        queue.remove(position).map(|(_, payload)| payload)
    }

    // ----- External input -----

    /// Every open `AskHuman`, in registration order.
    pub fn pending_human_requests(&self) -> Vec<HumanRequest> {
        self.order
            .iter()
            .filter_map(|id| self.agents.get(id))
            .filter_map(|agent| {
                agent
                    .pending_human_request()
                    .map(|(request_id, prompt)| HumanRequest {
                        agent_id: agent.id(),
                        request_id,
                        prompt,
                    })
            })
            .collect()
    }

    /// Answers a human request. The agent is RUNNING again immediately.
    pub async fn respond_to_human(
        &mut self,
        agent: AgentId,
        request_id: InteractionId,
        content: impl Into<String>,
    ) -> BraidResult<()> {
        self.get_mut(agent)?
            .respond_to_human(request_id, content.into())
            .await
    }

    /// Queues a named signal for `agent`. It is consumed by the first
    /// resolution phase in which the agent waits on that name.
    pub fn signal(&mut self, agent: AgentId, name: &str, payload: Value) -> BraidResult<()> {
        let status = self.status(agent)?;
        if status.is_terminal() {
            return Err(BraidError::InvalidState(format!(
                "agent {agent} is {status} and cannot receive signals"
            )));
        }
        self.signals
            .entry(agent)
            .or_default()
            .push_back((name.to_string(), payload));
        info!(agent = %agent, signal = name, "Signal queued");
        Ok(())
    }

    /// Signals queued for `agent` and not yet consumed.
    pub fn queued_signals(&self, agent: AgentId) -> usize {
        self.signals.get(&agent).map_or(0, VecDeque::len)
    }

    /// Marks the agent FAILED. Its parent, if waiting, resumes next round.
    pub async fn cancel(&mut self, agent: AgentId, reason: &str) -> BraidResult<()> {
        self.get_mut(agent)?.cancel(reason).await?;
        self.tick_waits.remove(&agent);
        self.signals.remove(&agent);
        info!(agent = %agent, reason, "Agent cancelled");
        Ok(())
    }

    // ----- Shared state -----

    pub async fn create_namespace(&self, name: &str, open_access: bool) -> BraidResult<()> {
        self.env.namespaces.create_namespace(name, open_access).await
    }

    pub async fn grant_access(&self, name: &str, agent: AgentId) -> BraidResult<()> {
        self.env.namespaces.grant_access(name, agent).await
    }

    pub async fn revoke_access(&self, name: &str, agent: AgentId) -> BraidResult<()> {
        self.env.namespaces.revoke_access(name, agent).await
    }

    pub async fn get_shared_state(
        &self,
        namespace: &str,
        key: &str,
        requester: AgentId,
    ) -> BraidResult<Option<Value>> {
        self.env.namespaces.get(namespace, key, requester).await
    }

    /// Writes a value and returns the previous one.
    pub async fn set_shared_state(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        requester: AgentId,
    ) -> BraidResult<Option<Value>> {
        self.env.namespaces.set(namespace, key, value, requester).await
    }
}

fn spawner_for(config: &SessionConfig) -> SubAgentSpawner {
    SubAgentSpawner::new()
        .with_max_depth(config.max_spawn_depth)
        .with_max_children(config.max_children_per_agent)
}
