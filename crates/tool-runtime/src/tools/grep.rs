use async_trait::async_trait;
use desk_core::tools::{qualified, POWER_TOOL_GREP, POWER_TOOL_GROUP_NAME};
use regex::RegexBuilder;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use super::walk::glob_paths;
use super::{denied, is_binary};
use crate::approval::ApprovalDecision;
use crate::tool::{
    optional_bool, optional_u64, required_str, Tool, ToolContext, ToolDefinition, ToolError,
    ToolResult,
};

/// Regex search over the files matched by a glob.
pub struct GrepTool;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GrepMatch {
    file_path: String,
    line_number: usize,
    line_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Vec<String>>,
}

enum GrepOutcome {
    NoFiles,
    Matches(Vec<GrepMatch>),
}

#[async_trait]
impl Tool for GrepTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: POWER_TOOL_GREP.to_string(),
            description: "Searches for content matching a regular expression pattern within files specified by a glob pattern. Returns matching lines and their context.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "filePattern": {
                        "type": "string",
                        "description": "A glob pattern specifying the files to search within (e.g., src/**/*.tsx, *.py)."
                    },
                    "searchTerm": {
                        "type": "string",
                        "description": "The regular expression to search for within the files."
                    },
                    "contextLines": {
                        "type": "integer",
                        "description": "The number of lines of context to show before and after each matching line. Default: 0."
                    },
                    "caseSensitive": {
                        "type": "boolean",
                        "description": "Whether the search should be case sensitive. Default: false."
                    }
                },
                "required": ["filePattern", "searchTerm"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let file_pattern = required_str(&input, "filePattern")?.to_string();
        let search_term = required_str(&input, "searchTerm")?.to_string();
        let context_lines = optional_u64(&input, "contextLines").unwrap_or(0) as usize;
        let case_sensitive = optional_bool(&input, "caseSensitive").unwrap_or(false);
        ctx.notify_started(POWER_TOOL_GROUP_NAME, POWER_TOOL_GREP, &input);

        let key = qualified(POWER_TOOL_GROUP_NAME, POWER_TOOL_GREP);
        let question =
            format!("Approve grep search for '{search_term}' in files matching '{file_pattern}'?");
        if let ApprovalDecision::Denied(reason) = ctx.approve(&key, &question, None).await {
            return Ok(ToolResult::success(
                &ctx.call_id,
                denied(
                    &format!("Grep search for '{search_term}' in files matching '{file_pattern}'"),
                    reason,
                ),
            ));
        }

        let root = ctx.working_directory.clone();
        let search = {
            let file_pattern = file_pattern.clone();
            let search_term = search_term.clone();
            tokio::task::spawn_blocking(move || {
                grep(&root, &file_pattern, &search_term, context_lines, case_sensitive)
            })
        };

        let content = match search.await {
            Ok(Ok(GrepOutcome::NoFiles)) => {
                format!("No files found matching pattern '{file_pattern}'.")
            }
            Ok(Ok(GrepOutcome::Matches(matches))) if matches.is_empty() => format!(
                "No matches found for pattern '{search_term}' in files matching '{file_pattern}'."
            ),
            Ok(Ok(GrepOutcome::Matches(matches))) => {
                debug!(count = matches.len(), "grep matches");
                serde_json::to_string(&matches)
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
            }
            Ok(Err(e)) => format!("Error during grep: {e}"),
            Err(e) => return Err(ToolError::ExecutionFailed(e.to_string())),
        };

        Ok(ToolResult::success(&ctx.call_id, content))
    }
}

fn grep(
    root: &Path,
    file_pattern: &str,
    search_term: &str,
    context_lines: usize,
    case_sensitive: bool,
) -> anyhow::Result<GrepOutcome> {
    let files = glob_paths(root, file_pattern, &[], false)?;
    if files.is_empty() {
        return Ok(GrepOutcome::NoFiles);
    }

    let regex = RegexBuilder::new(search_term)
        .case_insensitive(!case_sensitive)
        .build()?;

    let mut matches = Vec::new();
    for file in files {
        let bytes = std::fs::read(&file)?;
        if is_binary(&bytes) {
            continue;
        }
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.split('\n').collect();
        let file_path = file
            .strip_prefix(root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");

        for (index, line) in lines.iter().enumerate() {
            if !regex.is_match(line) {
                continue;
            }
            let context = (context_lines > 0).then(|| {
                let start = index.saturating_sub(context_lines);
                let end = (index + context_lines).min(lines.len() - 1);
                lines[start..=end].iter().map(|l| l.to_string()).collect()
            });
            matches.push(GrepMatch {
                file_path: file_path.clone(),
                line_number: index + 1,
                line_content: line.to_string(),
                context,
            });
        }
    }

    Ok(GrepOutcome::Matches(matches))
}
