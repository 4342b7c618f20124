pub mod agents;
pub mod error;
pub mod settings;

pub use agents::{AgentCatalog, AgentConfig};
pub use error::ConfigError;
pub use settings::{EngineSettings, ProviderSettings};

pub fn load_settings(path: &std::path::Path) -> Result<EngineSettings, ConfigError> {
    let settings = EngineSettings::from_path(path)?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn settings_round_trip_with_defaults() {
        let settings: EngineSettings = serde_yaml::from_str(
            r#"
state_root: /var/lib/planwright
agents:
  drawings_assistant:
    model: claude-sonnet-4-5
    system_prompt: You help field engineers find drawings.
    max_steps: 6
    tools: [search_drawings, create_rfi]
"#,
        )
        .expect("parse settings");

        settings.validate().expect("validation succeeds");
        assert_eq!(settings.provider.api_base, "https://api.anthropic.com");
        assert_eq!(settings.provider.request_timeout_seconds, 120);

        let catalog = settings.agent_catalog();
        let agent = catalog.get("drawings_assistant").expect("agent exists");
        assert_eq!(agent.max_steps, 6);
        assert!(agent.enabled);
        assert_eq!(agent.temperature, 0.0);
    }

    #[test]
    fn load_settings_reads_yaml_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("engine.yaml");
        fs::write(
            &path,
            r#"
state_root: /var/lib/planwright
provider:
  request_timeout_seconds: 30
agents: {}
"#,
        )
        .expect("write settings");

        let settings = load_settings(&path).expect("load settings");
        assert_eq!(settings.provider.request_timeout_seconds, 30);
        assert!(settings.agent_catalog().is_empty());
    }

    #[test]
    fn agent_validation_rejects_zero_max_steps() {
        let settings: EngineSettings = serde_yaml::from_str(
            r#"
state_root: /var/lib/planwright
agents:
  broken:
    model: claude-sonnet-4-5
    system_prompt: prompt
    max_steps: 0
"#,
        )
        .expect("parse settings");

        let err = settings.validate().expect_err("validation should fail");
        match err {
            ConfigError::Agent { agent_id, reason } => {
                assert_eq!(agent_id, "broken");
                assert!(reason.contains("max_steps"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn agent_validation_rejects_out_of_range_temperature() {
        let agent: AgentConfig = serde_yaml::from_str(
            r#"
model: claude-sonnet-4-5
system_prompt: prompt
temperature: 1.5
max_steps: 4
"#,
        )
        .expect("parse agent");

        let err = agent.validate("hot").expect_err("validation should fail");
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn agent_validation_rejects_bad_and_duplicate_tool_names() {
        let bad: AgentConfig = serde_yaml::from_str(
            r#"
model: claude-sonnet-4-5
system_prompt: prompt
max_steps: 4
tools: ["search drawings"]
"#,
        )
        .expect("parse agent");
        let err = bad.validate("a").expect_err("bad tool name should fail");
        assert!(err.to_string().contains("tool name"));

        let duplicated: AgentConfig = serde_yaml::from_str(
            r#"
model: claude-sonnet-4-5
system_prompt: prompt
max_steps: 4
tools: [create_rfi, create_rfi]
"#,
        )
        .expect("parse agent");
        let err = duplicated
            .validate("b")
            .expect_err("duplicate tool should fail");
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn agent_id_keys_reject_invalid_identifiers() {
        let err = serde_yaml::from_str::<EngineSettings>(
            r#"
state_root: /var/lib/planwright
agents:
  "bad agent":
    model: claude-sonnet-4-5
    system_prompt: prompt
    max_steps: 4
"#,
        )
        .expect_err("invalid agent id should fail at parse");
        assert!(err.to_string().contains("agent id"));
    }
}
