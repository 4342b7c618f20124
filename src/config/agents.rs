use super::ConfigError;
use crate::shared::ids::{validate_identifier_value, AgentId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

fn default_temperature() -> f32 {
    0.0
}

fn default_enabled() -> bool {
    true
}

/// Immutable description of one agent. Managed by the agent CRUD surface;
/// read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub max_steps: u32,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AgentConfig {
    pub fn validate(&self, agent_id: &str) -> Result<(), ConfigError> {
        let fail = |reason: String| ConfigError::Agent {
            agent_id: agent_id.to_string(),
            reason,
        };
        if self.model.trim().is_empty() {
            return Err(fail("model must be non-empty".to_string()));
        }
        if self.max_steps == 0 {
            return Err(fail("max_steps must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(fail(format!(
                "temperature {} is outside the 0.0..=1.0 range",
                self.temperature
            )));
        }
        let mut seen = HashSet::new();
        for tool in &self.tools {
            validate_identifier_value("tool name", tool).map_err(&fail)?;
            if !seen.insert(tool.as_str()) {
                return Err(fail(format!("tool `{tool}` is listed more than once")));
            }
        }
        Ok(())
    }
}

/// Name-keyed, read-only view over the configured agents.
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    agents: BTreeMap<AgentId, AgentConfig>,
}

impl AgentCatalog {
    pub fn new(agents: BTreeMap<AgentId, AgentConfig>) -> Self {
        Self { agents }
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentConfig> {
        self.agents.get(agent_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &AgentId> {
        self.agents.keys()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
