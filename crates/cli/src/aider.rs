//! Pair-programming collaborator backed by the `aider` command.
//!
//! Each delegated prompt runs one non-interactive aider process over the
//! current context files; edits it applies are reported back as updated
//! files.

use anyhow::{Context, Result};
use async_trait::async_trait;
use desk_tool_runtime::{ContextFile, PairProgrammer, PairResponse};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AiderConfig;

const APPLIED_EDIT_PREFIX: &str = "Applied edit to ";

pub struct AiderProcess {
    config: AiderConfig,
    project_dir: PathBuf,
    files: Mutex<Vec<ContextFile>>,
}

impl AiderProcess {
    pub fn new(config: AiderConfig, project_dir: PathBuf, files: Vec<ContextFile>) -> Self {
        Self {
            config,
            project_dir,
            files: Mutex::new(files),
        }
    }

    fn command_args(&self, prompt: &str, files: &[ContextFile]) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.extend(
            ["--yes-always", "--no-pretty", "--no-stream", "--no-auto-commits"]
                .into_iter()
                .map(String::from),
        );
        for file in files {
            args.push(if file.read_only { "--read" } else { "--file" }.to_string());
            args.push(file.path.clone());
        }
        args.push("--message".to_string());
        args.push(prompt.to_string());
        args
    }
}

#[async_trait]
impl PairProgrammer for AiderProcess {
    async fn context_files(&self) -> Vec<ContextFile> {
        self.files.lock().await.clone()
    }

    async fn add_file(&self, file: ContextFile) -> bool {
        let mut files = self.files.lock().await;
        if files.iter().any(|f| f.path == file.path) {
            return false;
        }
        debug!(path = %file.path, read_only = file.read_only, "Adding context file");
        files.push(file);
        true
    }

    async fn drop_file(&self, path: &str) {
        self.files.lock().await.retain(|f| f.path != path);
    }

    async fn run_prompt(&self, prompt: &str) -> Result<Vec<PairResponse>> {
        let files = self.context_files().await;
        let args = self.command_args(prompt, &files);
        info!(command = %self.config.command, files = files.len(), "Running aider prompt");

        let output = Command::new(&self.config.command)
            .args(&args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to start '{}'", self.config.command))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "aider exited with an error");
            anyhow::bail!("aider exited with {}: {}", output.status, stderr.trim());
        }

        Ok(vec![PairResponse {
            message_id: Uuid::new_v4().to_string(),
            edited_files: applied_edits(&stdout),
            content: stdout,
        }])
    }
}

/// Files named by aider's `Applied edit to <path>` lines, in order, once each.
fn applied_edits(output: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for line in output.lines() {
        if let Some(path) = line.trim().strip_prefix(APPLIED_EDIT_PREFIX) {
            let path = path.trim().to_string();
            if !path.is_empty() && !files.contains(&path) {
                files.push(path);
            }
        }
    }
    files
}
