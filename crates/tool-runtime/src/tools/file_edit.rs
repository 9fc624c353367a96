//! Search-and-replace editing of a single file.

use async_trait::async_trait;
use desk_core::tools::{qualified, POWER_TOOL_FILE_EDIT, POWER_TOOL_GROUP_NAME};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{denied, resolve};
use crate::approval::ApprovalDecision;
use crate::tool::{
    optional_bool, required_str, Tool, ToolContext, ToolDefinition, ToolError, ToolResult,
};

pub struct FileEditTool;

const DESCRIPTION: &str = r#"Atomically finds and replaces a specific string or pattern within a specified file. This tool is useful for making targeted changes to file content. Before editing, make sure you read the file and you know the actual content. When editing multiple lines, include the entire line in the search term, not just the part you want to change. <example>
searchTerm: "
const myFunction = () => {
  let value = 10;
",
replaceText: "
const myFunction = () => {
  let newValue = 5;
  let value = 10;
"</example>"#;

#[async_trait]
impl Tool for FileEditTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: POWER_TOOL_FILE_EDIT.to_string(),
            description: DESCRIPTION.to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "filePath": {
                        "type": "string",
                        "description": "The path to the file to be edited (relative to the project root)."
                    },
                    "searchTerm": {
                        "type": "string",
                        "description": "The string or regular expression to find in the file.\n*EXACTLY MATCH* the existing file content, character for character, including all comments, docstrings, etc.\nInclude enough lines in each to uniquely match each set of lines that need to change.\nDo not use escape characters \\ in the string like \\n or \\\" and others. Do not start the search term with a \\ character."
                    },
                    "replacementText": {
                        "type": "string",
                        "description": "The string to replace the searchTerm with. Do not use escape characters \\ in the string like \\n or \\\" and others"
                    },
                    "isRegex": {
                        "type": "boolean",
                        "description": "Whether the searchTerm should be treated as a regular expression. Use regex only when it is really needed. Default: false."
                    },
                    "replaceAll": {
                        "type": "boolean",
                        "description": "Whether to replace all occurrences or just the first one. Default: false."
                    }
                },
                "required": ["filePath", "searchTerm", "replacementText"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let file_path = required_str(&input, "filePath")?;
        let search_term = required_str(&input, "searchTerm")?;
        let replacement = required_str(&input, "replacementText")?;
        let is_regex = optional_bool(&input, "isRegex").unwrap_or(false);
        let replace_all = optional_bool(&input, "replaceAll").unwrap_or(false);
        ctx.notify_started(POWER_TOOL_GROUP_NAME, POWER_TOOL_FILE_EDIT, &input);

        if search_term == replacement {
            return Ok(ToolResult::success(
                &ctx.call_id,
                "Already updated - no changes were needed.",
            ));
        }

        let key = qualified(POWER_TOOL_GROUP_NAME, POWER_TOOL_FILE_EDIT);
        let question = format!("Approve editing file '{file_path}'?");
        if let ApprovalDecision::Denied(reason) = ctx.approve(&key, &question, None).await {
            return Ok(ToolResult::success(
                &ctx.call_id,
                denied(&format!("File edit to '{file_path}'"), reason),
            ));
        }

        let path = resolve(&ctx.working_directory, file_path);
        let original = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResult::success(
                    &ctx.call_id,
                    format!("Error: File '{file_path}' not found."),
                ));
            }
            Err(e) => {
                return Ok(ToolResult::success(
                    &ctx.call_id,
                    format!("Error editing file '{file_path}': {e}"),
                ));
            }
        };

        let modified = if is_regex {
            match Regex::new(search_term) {
                Ok(re) if replace_all => re.replace_all(&original, replacement).into_owned(),
                Ok(re) => re.replace(&original, replacement).into_owned(),
                Err(e) => {
                    return Ok(ToolResult::success(
                        &ctx.call_id,
                        format!("Error editing file '{file_path}': {e}"),
                    ));
                }
            }
        } else {
            let search = sanitize(search_term);
            let replacement = sanitize(replacement);
            if replace_all {
                original.replace(&search, &replacement)
            } else {
                original.replacen(&search, &replacement, 1)
            }
        };

        if modified == original {
            debug!(path = %path.display(), "search term not found");
            return Ok(ToolResult::success(
                &ctx.call_id,
                format!(
                    "Warning: Given 'searchTerm' was not found in the file. Content remains the same. {}",
                    retry_hint(search_term)
                ),
            ));
        }

        let message = match tokio::fs::write(&path, modified).await {
            Ok(()) => format!("Successfully edited '{file_path}'."),
            Err(e) => format!("Error editing file '{file_path}': {e}"),
        };
        Ok(ToolResult::success(&ctx.call_id, message))
    }
}

fn is_escapable(c: char) -> bool {
    matches!(c, 'n' | 'r' | 't' | '"' | '\'')
}

/// Undo escaping the model applied to literal text. Left alone when the text
/// holds a single escape sequence, which is taken as intentional.
fn sanitize(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let has_single_escape = chars.windows(2).enumerate().any(|(i, pair)| {
        pair[0] == '\\' && is_escapable(pair[1]) && chars.get(i + 2) != Some(&'\\')
    });
    if has_single_escape {
        return text.to_string();
    }

    let trimmed = text.trim_start_matches('\\');
    let mut out = String::with_capacity(trimmed.len());
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if is_escapable(next) {
                    chars.next();
                    out.push(match next {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => other,
                    });
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

fn retry_hint(search_term: &str) -> &'static str {
    if search_term.starts_with("\\\n") {
        "Do not start the search term with a \\ character. No escape characters are needed."
    } else if search_term.contains("\\\"") {
        "Try not using the \\ in the string like \\\" and others, but use only \"."
    } else {
        "When you try again make sure to exactly match content, character for character, including all comments, docstrings, etc."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::scripted::ScriptedPrompt;
    use crate::approval::PromptAnswer;
    use crate::tool::testing::{context_with, test_context};
    use std::sync::Arc;

    async fn edit(dir: &std::path::Path, args: Value) -> String {
        FileEditTool
            .execute(args, &test_context(dir))
            .await
            .unwrap()
            .content
    }

    #[tokio::test]
    async fn test_replace_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "foo foo").unwrap();

        let out = edit(
            dir.path(),
            serde_json::json!({"filePath": "a.txt", "searchTerm": "foo", "replacementText": "bar"}),
        )
        .await;

        assert_eq!(out, "Successfully edited 'a.txt'.");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "bar foo");
    }

    #[tokio::test]
    async fn test_replace_all_with_regex() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "v1 v22 v333").unwrap();

        edit(
            dir.path(),
            serde_json::json!({
                "filePath": "a.txt",
                "searchTerm": r"v\d+",
                "replacementText": "v0",
                "isRegex": true,
                "replaceAll": true
            }),
        )
        .await;

        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "v0 v0 v0");
    }

    #[tokio::test]
    async fn test_identical_terms_short_circuit() {
        let out = edit(
            std::path::Path::new("/nonexistent"),
            serde_json::json!({"filePath": "a.txt", "searchTerm": "x", "replacementText": "x"}),
        )
        .await;
        assert_eq!(out, "Already updated - no changes were needed.");
    }

    #[tokio::test]
    async fn test_not_found_warning_with_hint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let out = edit(
            dir.path(),
            serde_json::json!({"filePath": "a.txt", "searchTerm": "goodbye", "replacementText": "x"}),
        )
        .await;
        assert!(out.starts_with("Warning: Given 'searchTerm' was not found in the file."));
        assert!(out.ends_with("including all comments, docstrings, etc."));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = edit(
            dir.path(),
            serde_json::json!({"filePath": "gone.txt", "searchTerm": "a", "replacementText": "b"}),
        )
        .await;
        assert_eq!(out, "Error: File 'gone.txt' not found.");
    }

    #[tokio::test]
    async fn test_denied_edit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "foo").unwrap();
        let prompt = Arc::new(ScriptedPrompt::new([PromptAnswer::new("n")]));
        let ctx = context_with(dir.path(), false, prompt.clone());

        let result = FileEditTool
            .execute(
                serde_json::json!({"filePath": "a.txt", "searchTerm": "foo", "replacementText": "bar"}),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(result.content, "File edit to 'a.txt' denied by user. Reason: ");
        assert_eq!(prompt.asked()[0].text, "Approve editing file 'a.txt'?");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "foo");
    }

    #[test]
    fn test_sanitize_unescapes_when_every_escape_is_doubled() {
        assert_eq!(sanitize(r"\\a\n\"), "a\n\\");
    }

    #[test]
    fn test_sanitize_keeps_single_escape() {
        assert_eq!(sanitize(r"a\nb"), r"a\nb");
    }

    #[test]
    fn test_sanitize_plain_text() {
        assert_eq!(sanitize("fn main() {}"), "fn main() {}");
    }

    #[test]
    fn test_retry_hints() {
        assert!(retry_hint("\\\nfoo").starts_with("Do not start"));
        assert!(retry_hint("say \\\"hi\\\"").starts_with("Try not using"));
        assert!(retry_hint("plain").starts_with("When you try again"));
    }
}
