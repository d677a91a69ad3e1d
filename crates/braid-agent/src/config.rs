use crate::retry::RetryPolicy;
use crate::state_machine::StateMachine;
use braid_core::{BraidError, BraidResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

/// What to do with the remaining calls of an oracle batch once one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailurePolicy {
    /// Keep executing the remaining calls.
    #[default]
    Continue,
    /// Record the remaining calls as skipped and return to the oracle.
    Abort,
}

/// Named tool set plus prompt template, optionally driven by a state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub tools: Vec<String>,
    pub prompt_template: String,
    #[serde(default)]
    pub state_machine: Option<StateMachineSpec>,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: u32,
    #[serde(default)]
    pub tool_failure_policy: ToolFailurePolicy,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_steps() -> u32 {
    50
}

fn default_max_chain_depth() -> u32 {
    16
}

impl AgentConfig {
    /// A config with defaults for every optional knob.
    pub fn new(
        name: impl Into<String>,
        tools: Vec<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            tools,
            prompt_template: prompt_template.into(),
            state_machine: None,
            max_steps: default_max_steps(),
            max_chain_depth: default_max_chain_depth(),
            tool_failure_policy: ToolFailurePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_state_machine(mut self, spec: StateMachineSpec) -> Self {
        self.state_machine = Some(spec);
        self
    }
}

/// Declarative automaton over config variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineSpec {
    pub initial: String,
    pub states: Vec<StateSpec>,
    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,
}

/// One automaton state, bound to a tool set and optionally its own template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSpec {
    pub name: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub prompt_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub from: String,
    pub to: String,
    pub trigger: Trigger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Fires when the step executed a tool with this name.
    ToolCall(String),
    /// Fires when the namespace matches after the step.
    StatePattern(StatePattern),
}

/// Subset predicate over one namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePattern {
    pub namespace: String,
    #[serde(default)]
    pub equals: BTreeMap<String, serde_json::Value>,
}

/// Declared type of a task parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub kind: ParamKind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

fn default_required() -> bool {
    true
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
        }
    }
}

/// A task definition in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub prompt_template: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
    /// Follow-up tasks run after this one, in order.
    #[serde(default)]
    pub task_sequence: Vec<String>,
    /// Parameter name this task's result is bound to in the next task.
    #[serde(default)]
    pub pass_result_as: Option<String>,
    /// Config to switch to when chaining.
    #[serde(default)]
    pub chain_config: Option<String>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt_template: prompt_template.into(),
            parameters: Vec::new(),
            task_sequence: Vec::new(),
            pass_result_as: None,
            chain_config: None,
        }
    }

    pub fn with_parameter(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_sequence(mut self, sequence: Vec<String>, pass_result_as: Option<&str>) -> Self {
        self.task_sequence = sequence;
        self.pass_result_as = pass_result_as.map(String::from);
        self
    }
}

/// A resolved prompt template. Rendering is left to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub body: String,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    templates: HashMap<String, String>,
    #[serde(default)]
    configs: Vec<AgentConfig>,
    #[serde(default)]
    tasks: Vec<TaskSpec>,
}

/// Every config, task and template a session can resolve by name.
///
/// State machines are compiled when a config is added, so a transition to an
/// undeclared state is rejected at load time.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    configs: HashMap<String, AgentConfig>,
    machines: HashMap<String, StateMachine>,
    tasks: HashMap<String, TaskSpec>,
    templates: HashMap<String, String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(source: &str) -> BraidResult<Self> {
        let file: CatalogFile = toml::from_str(source)
            .map_err(|e| BraidError::Config(format!("Invalid catalog: {e}")))?;

        let mut catalog = Self::new();
        for (name, body) in file.templates {
            catalog.add_template(name, body);
        }
        for config in file.configs {
            catalog.add_config(config)?;
        }
        for task in file.tasks {
            catalog.add_task(task);
        }
        info!(
            configs = catalog.configs.len(),
            tasks = catalog.tasks.len(),
            templates = catalog.templates.len(),
            "Catalog loaded"
        );
        Ok(catalog)
    }

    pub async fn load(path: &Path) -> BraidResult<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            BraidError::Config(format!("Failed to read catalog '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn add_config(&mut self, config: AgentConfig) -> BraidResult<()> {
        if let Some(spec) = &config.state_machine {
            let machine = StateMachine::compile(&config.name, spec, &config.tools)?;
            self.machines.insert(config.name.clone(), machine);
        } else {
            self.machines.remove(&config.name);
        }
        self.configs.insert(config.name.clone(), config);
        Ok(())
    }

    pub fn add_task(&mut self, task: TaskSpec) {
        self.tasks.insert(task.name.clone(), task);
    }

    pub fn add_template(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(name.into(), body.into());
    }

    pub fn with_config(mut self, config: AgentConfig) -> BraidResult<Self> {
        self.add_config(config)?;
        Ok(self)
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.add_task(task);
        self
    }

    pub fn with_template(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.add_template(name, body);
        self
    }

    pub fn config(&self, name: &str) -> BraidResult<&AgentConfig> {
        self.configs
            .get(name)
            .ok_or_else(|| BraidError::Validation(format!("Unknown config: {name}")))
    }

    pub fn task(&self, name: &str) -> BraidResult<&TaskSpec> {
        self.tasks
            .get(name)
            .ok_or_else(|| BraidError::Validation(format!("Unknown task: {name}")))
    }

    pub fn template(&self, name: &str) -> BraidResult<PromptTemplate> {
        self.templates
            .get(name)
            .map(|body| PromptTemplate {
                name: name.to_string(),
                body: body.clone(),
            })
            .ok_or_else(|| BraidError::Validation(format!("Unknown prompt template: {name}")))
    }

    /// The compiled state machine of a config, if it declares one.
    pub fn machine(&self, config: &str) -> Option<&StateMachine> {
        self.machines.get(config)
    }
}
