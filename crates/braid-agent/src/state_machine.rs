use crate::config::{StateMachineSpec, StateSpec, TransitionSpec, Trigger};
use braid_core::{AgentId, BraidError, BraidResult};
use braid_security::NamespaceStore;
use std::collections::HashSet;
use tracing::debug;

/// A validated state machine over config variants.
#[derive(Debug, Clone)]
pub struct StateMachine {
    initial: String,
    states: Vec<StateSpec>,
    transitions: Vec<TransitionSpec>,
}

impl StateMachine {
    /// Checks that every referenced state is declared and that state tool
    /// sets stay within the owning config's tools, when it declares any.
    pub fn compile(
        config_name: &str,
        spec: &StateMachineSpec,
        config_tools: &[String],
    ) -> BraidResult<Self> {
        let mut names = HashSet::new();
        for state in &spec.states {
            if !names.insert(state.name.as_str()) {
                return Err(BraidError::Config(format!(
                    "config '{config_name}': duplicate state '{}'",
                    state.name
                )));
            }
            if !config_tools.is_empty() {
                if let Some(tool) = state.tools.iter().find(|t| !config_tools.contains(t)) {
                    return Err(BraidError::Config(format!(
                        "config '{config_name}': state '{}' uses undeclared tool '{tool}'",
                        state.name
                    )));
                }
            }
        }

        let undeclared = |state: &str| -> BraidResult<()> {
            if names.contains(state) {
                Ok(())
            } else {
                Err(BraidError::Config(format!(
                    "config '{config_name}': undeclared state '{state}'"
                )))
            }
        };
        undeclared(&spec.initial)?;
        for transition in &spec.transitions {
            undeclared(&transition.from)?;
            undeclared(&transition.to)?;
        }

        Ok(Self {
            initial: spec.initial.clone(),
            states: spec.states.clone(),
            transitions: spec.transitions.clone(),
        })
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    pub fn state(&self, name: &str) -> Option<&StateSpec> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn states(&self) -> &[StateSpec] {
        &self.states
    }

    /// The state after a completed step.
    ///
    /// Transitions leaving `current` are tried in declaration order and the
    /// first one whose trigger matches wins. A state pattern the agent may not
    /// read never matches.
    pub async fn next_state(
        &self,
        current: &str,
        executed_tools: &[String],
        namespaces: &NamespaceStore,
        agent_id: AgentId,
    ) -> Option<String> {
        for transition in self.transitions.iter().filter(|t| t.from == current) {
            let fired = match &transition.trigger {
                Trigger::ToolCall(name) => executed_tools.iter().any(|t| t == name),
                Trigger::StatePattern(pattern) => namespaces
                    .matches(&pattern.namespace, agent_id, &pattern.equals)
                    .await
                    .unwrap_or(false),
            };
            if fired {
                debug!(from = %current, to = %transition.to, "State transition fired");
                return Some(transition.to.clone());
            }
        }
        None
    }
}
