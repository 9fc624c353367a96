//! Namespaced tool identifiers.
//!
//! A tool is addressed as `<group-or-server>---<tool>`. The canonical form keeps
//! the original casing and keys the approval map; the model-facing form is
//! lower-cased with whitespace runs collapsed to `_`.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use desk_core::tools::TOOL_GROUP_NAME_SEPARATOR as SEPARATOR;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolId {
    group: String,
    tool: String,
}

impl ToolId {
    pub fn new(group: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            tool: tool.into(),
        }
    }

    /// Split on the first separator. Returns `None` when there is no group part.
    pub fn parse(id: &str) -> Option<Self> {
        let (group, tool) = id.split_once(SEPARATOR)?;
        if group.is_empty() || tool.is_empty() {
            return None;
        }
        Some(Self::new(group, tool))
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Id as stored in approval maps.
    pub fn canonical(&self) -> String {
        format!("{}{}{}", self.group, SEPARATOR, self.tool)
    }

    /// Id as declared to the model.
    pub fn model_name(&self) -> String {
        normalize(&self.canonical())
    }

    /// True when `name` refers to this tool only by its bare tool part.
    pub fn matches_suffix(&self, name: &str) -> bool {
        self.model_name()
            .ends_with(&format!("{}{}", SEPARATOR, normalize(name)))
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.group, SEPARATOR, self.tool)
    }
}

/// Lower-case and replace whitespace runs with a single `_`.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_space = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else {
            out.extend(c.to_lowercase());
            in_space = false;
        }
    }
    out
}
