use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use desk_tool_runtime::{ContextFile, ConversationMessage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persisted conversation of one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Creation timestamp, `YYYYMMDD-HHMMSS`
    pub id: String,
    /// Derived from the first prompt
    pub name: String,
    pub provider: String,
    pub model: String,
    pub project_dir: PathBuf,
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub context_files: Vec<ContextFile>,
    pub messages: Vec<ConversationMessage>,
}

impl Session {
    pub fn new(provider: String, model: String, project_dir: PathBuf, system_prompt: Option<String>) -> Self {
        let now = Utc::now();
        let id = now.format("%Y%m%d-%H%M%S").to_string();
        Self {
            id: id.clone(),
            name: id,
            provider,
            model,
            project_dir,
            system_prompt,
            created_at: now,
            updated_at: now,
            context_files: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Name the session after its first user prompt.
    pub fn update_name_from_first_message(&mut self) {
        let first_prompt = self.messages.iter().find_map(|m| match m {
            ConversationMessage::User(text) => Some(text.as_str()),
            _ => None,
        });
        if let Some(text) = first_prompt {
            let sanitized = sanitize_session_name(text);
            if !sanitized.is_empty() {
                self.name = sanitized;
            }
        }
    }
}

/// Lightweight summary of a session for listing.
#[derive(Debug)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Sessions stored as one JSON file each.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn ensure_dir(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create sessions dir: {}", self.dir.display()))?;
        Ok(&self.dir)
    }

    pub fn save(&self, session: &mut Session) -> Result<()> {
        session.updated_at = Utc::now();
        let path = self.ensure_dir()?.join(format!("{}.json", session.id));
        let json = serde_json::to_string_pretty(session).context("failed to serialize session")?;
        std::fs::write(&path, json).with_context(|| format!("failed to write session: {}", path.display()))?;
        debug!(id = %session.id, path = %path.display(), "Session saved");
        Ok(())
    }

    /// Load by exact ID, falling back to an ID prefix or name substring.
    pub fn load(&self, id_or_name: &str) -> Result<Session> {
        let exact_path = self.ensure_dir()?.join(format!("{id_or_name}.json"));
        if exact_path.exists() {
            return load_from_path(&exact_path);
        }

        let needle = id_or_name.to_lowercase();
        let mut matches: Vec<Session> = self
            .all()?
            .into_iter()
            .filter(|s| s.id.starts_with(id_or_name) || s.name.to_lowercase().contains(&needle))
            .collect();

        match matches.len() {
            0 => anyhow::bail!("no session found matching '{}'", id_or_name),
            1 => Ok(matches.remove(0)),
            n => anyhow::bail!(
                "ambiguous session '{}': {} matches found. Use a more specific identifier.",
                id_or_name,
                n
            ),
        }
    }

    /// All sessions, most recent first.
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries: Vec<SessionSummary> = self
            .all()?
            .into_iter()
            .map(|s| SessionSummary {
                message_count: s.messages.len(),
                id: s.id,
                name: s.name,
                provider: s.provider,
                updated_at: s.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    fn all(&self) -> Result<Vec<Session>> {
        let entries = std::fs::read_dir(self.ensure_dir()?).context("failed to read sessions directory")?;
        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match load_from_path(&path) {
                    Ok(session) => sessions.push(session),
                    Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable session"),
                }
            }
        }
        Ok(sessions)
    }
}

fn load_from_path(path: &Path) -> Result<Session> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read session: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse session: {}", path.display()))
}

/// Sanitize a user message into a valid session name.
/// Takes the first ~50 chars, replaces non-alphanumeric with dashes, lowercases.
fn sanitize_session_name(text: &str) -> String {
    let mut result = String::new();
    let mut prev_dash = false;
    for c in text.chars().take(50) {
        if c.is_alphanumeric() || c == '_' {
            result.extend(c.to_lowercase());
            prev_dash = false;
        } else if !prev_dash && !result.is_empty() {
            result.push('-');
            prev_dash = true;
        }
    }
    result.trim_end_matches('-').to_string()
}
