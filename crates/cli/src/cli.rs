use clap::Parser;
use std::path::PathBuf;

/// Autonomous coding agent for the terminal.
///
/// Runs prompts through a multi-turn tool-using loop against a project
/// directory, asking before risky tool calls.
#[derive(Parser, Debug)]
#[command(name = "desk-agent", about = "Autonomous coding agent for the terminal")]
pub struct CliArgs {
    /// LLM provider (defaults to the config file's provider)
    #[arg(long, env = "DESK_AGENT_PROVIDER")]
    pub provider: Option<String>,

    /// Model name override (uses provider default if not set)
    #[arg(long)]
    pub model: Option<String>,

    /// API key (overrides env var and config file)
    #[arg(long)]
    pub api_key: Option<String>,

    /// API base URL override
    #[arg(long)]
    pub base_url: Option<String>,

    /// Path to config file (default: ~/.config/desk-agent/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Project directory the agent works in (default: current directory)
    #[arg(long, short = 'C')]
    pub project_dir: Option<PathBuf>,

    /// Resume a previous session by name or ID
    #[arg(long)]
    pub session: Option<String>,

    /// List all saved sessions
    #[arg(long)]
    pub list_sessions: bool,

    /// System prompt override
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Maximum model turns per prompt
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Execute every tool without asking
    #[arg(long)]
    pub auto_approve: bool,

    /// Run a single prompt and exit
    #[arg(long, short = 'p')]
    pub prompt: Option<String>,
}
