use super::{AgentCatalog, AgentConfig, ConfigError};
use crate::shared::ids::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

fn default_api_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    120
}

fn default_max_output_tokens() -> u32 {
    1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    pub state_root: PathBuf,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub agents: BTreeMap<AgentId, AgentConfig>,
}

impl EngineSettings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_root.as_os_str().is_empty() {
            return Err(ConfigError::Settings(
                "state_root must be non-empty".to_string(),
            ));
        }
        if self.provider.api_base.trim().is_empty() {
            return Err(ConfigError::Settings(
                "provider.api_base must be non-empty".to_string(),
            ));
        }
        if self.provider.request_timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "provider.request_timeout_seconds must be at least 1".to_string(),
            ));
        }
        for (agent_id, agent) in &self.agents {
            agent.validate(agent_id.as_str())?;
        }
        Ok(())
    }

    pub fn agent_catalog(&self) -> AgentCatalog {
        AgentCatalog::new(self.agents.clone())
    }
}
