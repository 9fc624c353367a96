//! Built-in tool groups.
//!
//! - **power** (`file_edit`, `file_read`, `file_write`, `glob`, `grep`, `bash`, `fetch`):
//!   direct filesystem, shell and network access
//! - **aider** (`get_context_files`, `add_context_files`, `drop_context_files`, `run_prompt`):
//!   delegation to a pair-programming collaborator
//! - **todo**: a task list persisted in the project
//! - **subagents** (`run_task`): delegation to nested agent runs
//! - **helpers**: targets for repaired tool calls; always present

pub mod aider;
pub mod bash;
pub mod fetch;
pub mod file_edit;
pub mod file_read;
pub mod file_write;
pub mod glob;
pub mod grep;
pub mod helpers;
pub mod subagents;
pub mod todo;
mod walk;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::tool::Tool;

pub use aider::{
    AddContextFilesTool, ContextFile, DropContextFilesTool, GetContextFilesTool, PairProgrammer,
    PairResponse, RunPromptTool,
};
pub use bash::BashTool;
pub use fetch::FetchTool;
pub use file_edit::FileEditTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use helpers::{InvalidToolArgumentsTool, NoSuchToolTool};
pub use subagents::{RunTaskTool, SubagentRunner};
pub use todo::{ClearItemsTool, GetItemsTool, SetItemsTool, UpdateItemCompletionTool};

pub fn power_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(FileEditTool),
        Arc::new(FileReadTool),
        Arc::new(FileWriteTool),
        Arc::new(GlobTool),
        Arc::new(GrepTool),
        Arc::new(BashTool),
        Arc::new(FetchTool::new()),
    ]
}

pub fn aider_tools(pair: Arc<dyn PairProgrammer>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GetContextFilesTool::new(pair.clone())),
        Arc::new(AddContextFilesTool::new(pair.clone())),
        Arc::new(DropContextFilesTool::new(pair.clone())),
        Arc::new(RunPromptTool::new(pair)),
    ]
}

pub fn todo_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SetItemsTool),
        Arc::new(GetItemsTool),
        Arc::new(UpdateItemCompletionTool),
        Arc::new(ClearItemsTool),
    ]
}

pub fn subagent_tools(
    subagents: Vec<desk_core::SubagentConfig>,
    runner: Arc<dyn SubagentRunner>,
) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(RunTaskTool::new(subagents, runner))]
}

pub fn helper_tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(NoSuchToolTool), Arc::new(InvalidToolArgumentsTool)]
}

/// Resolve a tool-supplied path against the project root. Absolute paths
/// are kept as given.
pub(crate) fn resolve(base: &Path, requested: &str) -> PathBuf {
    let path = Path::new(requested);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Result text for a denied call.
pub(crate) fn denied(action: &str, reason: Option<String>) -> String {
    format!("{action} denied by user. Reason: {}", reason.unwrap_or_default())
}

/// Check if content appears to be binary (contains null bytes in first 8KB).
pub(crate) fn is_binary(bytes: &[u8]) -> bool {
    let check_len = bytes.len().min(8192);
    bytes[..check_len].contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let base = Path::new("/project");
        assert_eq!(resolve(base, "src/lib.rs"), PathBuf::from("/project/src/lib.rs"));
        assert_eq!(resolve(base, "/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_denied_message() {
        assert_eq!(
            denied("Bash command execution", Some("too risky".to_string())),
            "Bash command execution denied by user. Reason: too risky"
        );
        assert_eq!(denied("File read of 'a'", None), "File read of 'a' denied by user. Reason: ");
    }

    #[test]
    fn test_binary_detection() {
        assert!(is_binary(b"PNG\0\x01"));
        assert!(!is_binary(b"fn main() {}\n"));
    }

    #[test]
    fn test_group_sizes() {
        assert_eq!(power_tools().len(), 7);
        assert_eq!(todo_tools().len(), 4);
        assert_eq!(helper_tools().len(), 2);
    }
}
