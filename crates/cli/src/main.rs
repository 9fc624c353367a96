mod aider;
mod cli;
mod config;
mod repl;
mod session;
mod terminal;

use anyhow::{Context, Result};
use clap::Parser;
use desk_mcp::{McpRegistry, McpToolSource, StdioConnectionFactory};
use desk_tool_runtime::{AgenticLoop, Conversation};
use std::sync::Arc;
use tracing::info;

use crate::aider::AiderProcess;
use crate::cli::CliArgs;
use crate::config::{CliConfig, ConfigApprovalStore};
use crate::repl::Repl;
use crate::session::{Session, SessionStore};
use crate::terminal::{Input, TerminalPrompt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    desk_core::env::load_dotenv();
    let args = CliArgs::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => CliConfig::default_config_path()?,
    };
    let config = CliConfig::load(&config_path).context("failed to load configuration")?;
    let store = SessionStore::new(CliConfig::sessions_dir()?);

    if args.list_sessions {
        terminal::print_sessions(&store.list()?)?;
        return Ok(());
    }

    let resumed = match &args.session {
        Some(id) => {
            info!(session = %id, "Resuming session");
            Some(store.load(id).with_context(|| format!("failed to load session '{}'", id))?)
        }
        None => None,
    };

    let project_dir = match (&args.project_dir, &resumed) {
        (Some(dir), _) => dir.clone(),
        (None, Some(session)) => session.project_dir.clone(),
        (None, None) => std::env::current_dir().context("failed to determine current directory")?,
    };
    let project_dir = project_dir
        .canonicalize()
        .with_context(|| format!("project directory not found: {}", project_dir.display()))?;

    // Provider settings: flag > env var > config file > provider default.
    let env = desk_core::env::load_llm_env(&project_dir);
    let provider_name = config.resolve_provider(args.provider.as_deref());
    let model = config.resolve_model(&provider_name, args.model.as_deref(), &env);
    let api_key = config.resolve_api_key(&provider_name, args.api_key.as_deref(), &env);
    let base_url = config.resolve_base_url(&provider_name, args.base_url.as_deref(), &env);
    let provider = desk_llm::create_provider(&provider_name, api_key.as_deref(), &model, base_url.as_deref())
        .context("failed to create LLM provider")?;

    let mut profile = config.profile.clone();
    profile.provider = provider_name.clone();
    profile.model = model.clone();
    if let Some(max_iterations) = args.max_iterations {
        profile.max_iterations = max_iterations;
    }
    if args.auto_approve {
        profile.auto_approve = true;
    }

    let session = match resumed {
        Some(session) => {
            terminal::print_info(&format!(
                "Resumed session: {} ({} messages)",
                session.name,
                session.messages.len()
            ))?;
            session
        }
        None => Session::new(
            provider_name.clone(),
            model.clone(),
            project_dir.clone(),
            args.system_prompt.clone(),
        ),
    };
    let system_prompt = args.system_prompt.clone().or_else(|| session.system_prompt.clone());

    let mut conversation = Conversation::new();
    conversation.extend(session.messages.clone());

    let input = Arc::new(Input::stdin());
    let registry = Arc::new(McpRegistry::new(Arc::new(StdioConnectionFactory::new())));
    let pair = Arc::new(AiderProcess::new(
        config.aider.clone(),
        project_dir.clone(),
        session.context_files.clone(),
    ));
    let agent = AgenticLoop::new(provider, Arc::new(TerminalPrompt::new(input.clone())))
        .with_approval_store(Arc::new(ConfigApprovalStore::new(
            config_path.clone(),
            profile.tool_approvals.clone(),
        )))
        .with_external_tools(Arc::new(McpToolSource::new(
            registry.clone(),
            config.mcp_servers.clone(),
        )))
        .with_pair_programmer(pair.clone())
        .with_subagents(config.subagents.clone());

    let mut repl = Repl {
        agent,
        pair,
        profile,
        project_dir,
        system_prompt,
        conversation,
        session,
        store,
    };

    let outcome = match args.prompt {
        Some(prompt) => repl.run_prompt(prompt).await,
        None => {
            terminal::print_banner(&provider_name, &model, &repl.project_dir.display().to_string())?;
            repl.interactive(&input).await
        }
    };

    repl.save().await;
    registry.close().await;
    terminal::print_info(&format!("Session saved: {}", repl.session.id))?;
    outcome
}
