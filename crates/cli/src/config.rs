use anyhow::{Context, Result};
use desk_core::{AgentProfile, McpServerConfig, SubagentConfig, ToolApprovalState};
use desk_tool_runtime::ApprovalStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

/// Command used to start the pair-programming collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiderConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for AiderConfig {
    fn default() -> Self {
        Self {
            command: "aider".to_string(),
            args: Vec::new(),
        }
    }
}

/// CLI configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Provider used when neither the flag nor the env var names one
    pub default_provider: String,

    /// Default model per provider
    pub default_models: HashMap<String, String>,

    /// API keys keyed by provider name
    pub api_keys: HashMap<String, String>,

    /// API base URLs keyed by provider name
    pub base_urls: HashMap<String, String>,

    pub aider: AiderConfig,

    pub profile: AgentProfile,

    /// External tool servers by name
    pub mcp_servers: BTreeMap<String, McpServerConfig>,

    /// Profiles the agent can delegate tasks to
    pub subagents: Vec<SubagentConfig>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            default_provider: "anthropic".to_string(),
            default_models: HashMap::new(),
            api_keys: HashMap::new(),
            base_urls: HashMap::new(),
            aider: AiderConfig::default(),
            profile: AgentProfile::default(),
            mcp_servers: BTreeMap::new(),
            subagents: Vec::new(),
        }
    }
}

/// Env var prefix for a provider: `anthropic` → `ANTHROPIC`.
fn env_prefix(provider: &str) -> String {
    let provider = if provider == "claude" { "anthropic" } else { provider };
    provider.to_uppercase().replace('-', "_")
}

impl CliConfig {
    /// Return the default config directory path: ~/.config/desk-agent/
    pub fn default_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("desk-agent");
        Ok(config_dir)
    }

    /// Return the default config file path.
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load config from the given path, or the default path.
    /// Writes and returns the default config if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!(config_path = %path.display(), "Loading config");
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            let config: Self =
                toml::from_str(&content).with_context(|| format!("failed to parse config: {}", path.display()))?;
            Ok(config)
        } else {
            info!(config_path = %path.display(), "Config file not found, writing defaults");
            let config = Self::default();
            if let Err(e) = config.save(path) {
                debug!(error = %e, "Could not write default config");
            }
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir: {}", parent.display()))?;
        }
        let toml_str = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, toml_str).with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Resolve the provider name.
    /// Priority: cli flag or env (handled by clap) > config file.
    pub fn resolve_provider(&self, cli_override: Option<&str>) -> String {
        cli_override.unwrap_or(&self.default_provider).to_string()
    }

    /// Resolve an API key for the given provider.
    /// Priority: cli_override > env var > config file.
    pub fn resolve_api_key(
        &self,
        provider: &str,
        cli_override: Option<&str>,
        env: &HashMap<String, String>,
    ) -> Option<String> {
        if let Some(key) = cli_override {
            return Some(key.to_string());
        }
        let env_var = format!("{}_API_KEY", env_prefix(provider));
        if let Some(key) = env.get(&env_var).filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        self.api_keys.get(provider).cloned()
    }

    /// Resolve the model name for a provider.
    /// Priority: cli_override > env var > config file > provider default.
    pub fn resolve_model(&self, provider: &str, cli_override: Option<&str>, env: &HashMap<String, String>) -> String {
        if let Some(model) = cli_override {
            return model.to_string();
        }
        let env_var = format!("{}_MODEL", env_prefix(provider));
        if let Some(model) = env.get(&env_var).filter(|m| !m.is_empty()) {
            return model.clone();
        }
        if let Some(model) = self.default_models.get(provider) {
            return model.clone();
        }
        desk_llm::default_model(provider).unwrap_or_default().to_string()
    }

    /// Resolve the API base URL. Priority: cli_override > env var > config file.
    pub fn resolve_base_url(
        &self,
        provider: &str,
        cli_override: Option<&str>,
        env: &HashMap<String, String>,
    ) -> Option<String> {
        if let Some(url) = cli_override {
            return Some(url.to_string());
        }
        let env_var = format!("{}_BASE_URL", env_prefix(provider));
        env.get(&env_var)
            .filter(|u| !u.is_empty())
            .cloned()
            .or_else(|| self.base_urls.get(provider).cloned())
    }

    /// Return the sessions directory path.
    pub fn sessions_dir() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("sessions"))
    }
}

/// Tool approval states backed by the config file's profile.
///
/// "Always" answers given at the prompt are written back so later
/// sessions skip the question.
pub struct ConfigApprovalStore {
    path: PathBuf,
    states: RwLock<BTreeMap<String, ToolApprovalState>>,
}

impl ConfigApprovalStore {
    pub fn new(path: PathBuf, states: BTreeMap<String, ToolApprovalState>) -> Self {
        Self {
            path,
            states: RwLock::new(states),
        }
    }
}

impl ApprovalStore for ConfigApprovalStore {
    fn state(&self, key: &str) -> Option<ToolApprovalState> {
        self.states.read().ok()?.get(key).copied()
    }

    fn persist(&self, key: &str, state: ToolApprovalState) -> anyhow::Result<()> {
        self.states
            .write()
            .map_err(|_| anyhow::anyhow!("approval store lock poisoned"))?
            .insert(key.to_string(), state);

        // Re-read so edits made to the file since startup survive.
        let mut config = CliConfig::load(&self.path)?;
        config.profile.tool_approvals.insert(key.to_string(), state);
        config.save(&self.path)?;
        info!(tool = key, state = ?state, "Persisted tool approval");
        Ok(())
    }
}
