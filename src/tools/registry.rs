use super::{Tool, ToolDeclaration};
use crate::shared::ids::validate_identifier_value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool `{name}` is already registered")]
    DuplicateTool { name: String },
    #[error("tool name `{name}` is invalid: {reason}")]
    InvalidToolName { name: String, reason: String },
}

/// Closed, name-keyed capability table. Populated once at process start and
/// shared read-only across every concurrent run afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        validate_identifier_value("tool name", &name).map_err(|reason| {
            RegistryError::InvalidToolName {
                name: name.clone(),
                reason,
            }
        })?;
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool { name });
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for the agent's allow-list, in allow-list order. Names the
    /// registry does not know are skipped; the model never sees them.
    pub fn declarations_for(&self, allow_list: &[String]) -> Vec<ToolDeclaration> {
        allow_list
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
