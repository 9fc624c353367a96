use crate::schema::fix_input_schema;
use crate::tool::{Tool, ToolDefinition};
use crate::tool_id::{normalize, ToolId};
use desk_core::tools::{
    AIDER_TOOL_GROUP_NAME, HELPERS_TOOL_GROUP_NAME, POWER_TOOL_GROUP_NAME,
    SUBAGENTS_TOOL_GROUP_NAME, TODO_TOOL_GROUP_NAME,
};
use indexmap::IndexMap;
use std::sync::Arc;

/// Built-in tool groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolGroup {
    Power,
    Aider,
    Todo,
    Subagents,
    Helpers,
}

impl ToolGroup {
    pub fn name(self) -> &'static str {
        match self {
            ToolGroup::Power => POWER_TOOL_GROUP_NAME,
            ToolGroup::Aider => AIDER_TOOL_GROUP_NAME,
            ToolGroup::Todo => TODO_TOOL_GROUP_NAME,
            ToolGroup::Subagents => SUBAGENTS_TOOL_GROUP_NAME,
            ToolGroup::Helpers => HELPERS_TOOL_GROUP_NAME,
        }
    }
}

/// Where a registered tool comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSource {
    Builtin(ToolGroup),
    External { server_name: String },
}

/// A tool as offered to the model for one run.
#[derive(Clone)]
pub struct ToolEntry {
    pub id: ToolId,
    pub source: ToolSource,
    pub tool: Arc<dyn Tool>,
}

/// The tool set of a single run, keyed by model-facing name.
/// Insertion order is kept so the model sees a stable tool list.
pub struct ToolRegistry {
    tools: IndexMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: IndexMap::new(),
        }
    }

    /// Register a tool under `group---<definition name>`. Returns error if the
    /// model-facing name is already taken.
    pub fn register(&mut self, source: ToolSource, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let group = match &source {
            ToolSource::Builtin(group) => group.name().to_string(),
            ToolSource::External { server_name } => server_name.clone(),
        };
        let id = ToolId::new(group, tool.definition().name);
        let key = id.model_name();
        if self.tools.contains_key(&key) {
            return Err(RegistryError::DuplicateName(key));
        }
        self.tools.insert(key, ToolEntry { id, source, tool });
        Ok(())
    }

    /// Look up a tool by model-facing name.
    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.get(&normalize(name))
    }

    /// Keep only entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&ToolEntry) -> bool) {
        self.tools.retain(|_, entry| keep(entry));
    }

    /// Tool definitions sent to the model, with namespaced names and
    /// schemas adjusted for the provider.
    pub fn definitions(&self, provider: &str) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|(name, entry)| {
                let def = entry.tool.definition();
                ToolDefinition {
                    name: name.clone(),
                    description: def.description,
                    input_schema: fix_input_schema(provider, &def.input_schema),
                }
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Full name of the tool whose bare tool part equals `name`.
    pub fn find_by_suffix(&self, name: &str) -> Option<String> {
        self.tools
            .iter()
            .find(|(_, entry)| entry.id.matches_suffix(name))
            .map(|(key, _)| key.clone())
    }

    pub fn entries(&self) -> impl Iterator<Item = &ToolEntry> {
        self.tools.values()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool with name '{0}' is already registered")]
    DuplicateName(String),
}
