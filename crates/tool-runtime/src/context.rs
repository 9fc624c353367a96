//! Project context assembled ahead of the user's prompt.
//!
//! Loads project rule files from `.aider-desk/rules` and turns the repository
//! map and the working context files into user/assistant message pairs.

use std::path::{Component, Path};
use tracing::{debug, info, warn};

use crate::conversation::ConversationMessage;
use crate::tools::{is_binary, ContextFile};

/// Project-relative directory holding rule files.
pub const RULES_DIR: &str = ".aider-desk/rules";

/// Concatenated rule files, each followed by a blank line. Sorted by name,
/// YAML frontmatter stripped. Empty when the directory is missing.
pub fn load_rules(project_dir: &Path) -> String {
    let rules_dir = project_dir.join(RULES_DIR);
    let Ok(entries) = std::fs::read_dir(&rules_dir) else {
        return String::new();
    };

    let mut paths: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "md"))
        .collect();
    paths.sort();

    let mut rules = String::new();
    for path in paths {
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                debug!(path = %path.display(), "Loaded rule file");
                rules.push_str(&strip_frontmatter(&content));
                rules.push_str("\n\n");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to read rule file"),
        }
    }
    if !rules.is_empty() {
        info!(dir = %rules_dir.display(), "Loaded project rules");
    }
    rules
}

/// Strip YAML frontmatter (between `---` delimiters) from markdown content.
fn strip_frontmatter(content: &str) -> String {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return content.to_string();
    }
    if let Some(end) = trimmed[3..].find("\n---") {
        let after = &trimmed[3 + end + 4..];
        after.trim_start_matches('\n').to_string()
    } else {
        content.to_string()
    }
}

/// The repository map as a user message and its acknowledgement.
pub fn repo_map_messages(repo_map: &str) -> Vec<ConversationMessage> {
    if repo_map.trim().is_empty() {
        return Vec::new();
    }
    vec![
        ConversationMessage::user(repo_map),
        ConversationMessage::assistant("Ok, I will use the repository map as a reference."),
    ]
}

/// Short manifest of the working files, used when file contents are not inlined.
pub fn working_files_messages(files: &[ContextFile]) -> Vec<ConversationMessage> {
    if files.is_empty() {
        return Vec::new();
    }
    let list = files
        .iter()
        .map(|f| format!("- {}", f.path))
        .collect::<Vec<_>>()
        .join("\n");
    vec![
        ConversationMessage::user(format!(
            "The following files are currently in the working context:\n\n{list}"
        )),
        ConversationMessage::assistant("OK, I have noted the files in the context."),
    ]
}

fn is_rule_file(path: &str) -> bool {
    let rules: Vec<Component> = Path::new(RULES_DIR).components().collect();
    let components: Vec<Component> = Path::new(path)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    components.starts_with(&rules)
}

/// `<file>` block with line-numbered content, or `None` for unreadable and
/// binary files.
fn file_block(project_dir: &Path, file: &ContextFile) -> Option<String> {
    let absolute = project_dir.join(&file.path);
    let bytes = match std::fs::read(&absolute) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %file.path, error = %e, "Error reading context file");
            return None;
        }
    };
    if is_binary(&bytes) {
        debug!(path = %file.path, "Skipping binary context file");
        return None;
    }

    let text = String::from_utf8_lossy(&bytes);
    let numbered = text
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{} | {line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    let display_path = Path::new(&file.path)
        .strip_prefix(project_dir)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| file.path.clone());

    Some(format!(
        "<file>\n  <path>{display_path}</path>\n  <content-with-line-numbers>\n{numbered}</content-with-line-numbers>\n</file>"
    ))
}

const READ_ONLY_PREAMBLE_AIDER: &str = "The following files are already part of the Aider context as READ-ONLY reference material. You can analyze and reference their content, but you must NOT modify, edit, or suggest changes to these files. Use them only for understanding context and making informed decisions about other files:\n\n";
const READ_ONLY_PREAMBLE: &str = "The following files are provided as READ-ONLY reference material. You can analyze and reference their content, but you must NOT modify, edit, or suggest changes to these files. Use them only for understanding context and making informed decisions:\n\n";
const READ_ONLY_ACK: &str = "Understood. I will use the provided files as read-only references and will not attempt to modify their content.";
const EDITABLE_PREAMBLE_AIDER: &str = "The following files are available for editing and modification. These files are already loaded in the Aider context, so you can directly use Aider tools to modify them without needing to add them to the context first. The content shown below is current and up-to-date:\n\n";
const EDITABLE_ACK_AIDER: &str = "Acknowledged. These files are already part of the Aider context and are available for direct editing using Aider tools. I do not need to re-add them.";
const EDITABLE_PREAMBLE: &str = "The following files are available for editing and modification. The content shown below is current and up-to-date, so you can reference it directly without needing to read the files again. You may suggest changes or modifications to these files:\n\n";
const EDITABLE_ACK: &str = "Understood. The content of these files is current, and I will refer to them as editable files without needing to read them again.";

/// Context file contents as message pairs: read-only files first, then
/// editable ones. Rule files are skipped since they reach the system prompt.
pub fn context_files_messages(
    project_dir: &Path,
    files: &[ContextFile],
    use_aider_tools: bool,
) -> Vec<ConversationMessage> {
    let (read_only, editable): (Vec<&ContextFile>, Vec<&ContextFile>) = files
        .iter()
        .filter(|f| !is_rule_file(&f.path))
        .partition(|f| f.read_only);

    let mut messages = Vec::new();
    let mut push_pair = |group: &[&ContextFile], preamble: &str, ack: &str| {
        let blocks: Vec<String> = group
            .iter()
            .filter_map(|f| file_block(project_dir, f))
            .collect();
        if !blocks.is_empty() {
            messages.push(ConversationMessage::user(format!("{preamble}{}", blocks.join("\n\n"))));
            messages.push(ConversationMessage::assistant(ack));
        }
    };

    if use_aider_tools {
        push_pair(&read_only, READ_ONLY_PREAMBLE_AIDER, READ_ONLY_ACK);
        push_pair(&editable, EDITABLE_PREAMBLE_AIDER, EDITABLE_ACK_AIDER);
    } else {
        push_pair(&read_only, READ_ONLY_PREAMBLE, READ_ONLY_ACK);
        push_pair(&editable, EDITABLE_PREAMBLE, EDITABLE_ACK);
    }
    messages
}
