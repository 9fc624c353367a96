//! Interactive prompt loop.

use anyhow::Result;
use desk_core::AgentProfile;
use desk_tool_runtime::{
    AgentEvent, AgenticLoop, ContextFile, Conversation, EventSink, PairProgrammer, RunRequest,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::session::{Session, SessionStore};
use crate::terminal::{print_info, print_prompt_marker, Input, Renderer};

const HELP: &str = "\
Commands:
  /add <path>    add an editable file to the context
  /read <path>   add a read-only file to the context
  /drop <path>   remove a file from the context
  /files         list context files
  /clear         forget the conversation so far
  /exit          save the session and quit
Anything else is sent to the agent.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Help,
    Exit,
    Add { path: String, read_only: bool },
    Drop(String),
    Files,
    Clear,
    Prompt(String),
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if matches!(line, "exit" | "quit") {
        return Command::Exit;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Prompt(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match (name, arg) {
        ("help", _) => Command::Help,
        ("exit" | "quit", _) => Command::Exit,
        ("add", path) if !path.is_empty() => Command::Add {
            path: path.to_string(),
            read_only: false,
        },
        ("read", path) if !path.is_empty() => Command::Add {
            path: path.to_string(),
            read_only: true,
        },
        ("drop", path) if !path.is_empty() => Command::Drop(path.to_string()),
        ("files", _) => Command::Files,
        ("clear", _) => Command::Clear,
        _ => Command::Unknown(line.to_string()),
    }
}

/// State carried between prompts of one session.
pub struct Repl {
    pub agent: AgenticLoop,
    pub pair: Arc<dyn PairProgrammer>,
    pub profile: AgentProfile,
    pub project_dir: PathBuf,
    pub system_prompt: Option<String>,
    pub conversation: Conversation,
    pub session: Session,
    pub store: SessionStore,
}

impl Repl {
    pub async fn interactive(&mut self, input: &Input) -> Result<()> {
        loop {
            print_prompt_marker()?;
            let line = tokio::select! {
                line = input.next_line() => line,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                print_info("\nGoodbye.")?;
                break;
            };

            match parse_command(&line) {
                Command::Empty => {}
                Command::Exit => {
                    print_info("Goodbye.")?;
                    break;
                }
                Command::Help => print_info(HELP)?,
                Command::Add { path, read_only } => {
                    let added = self.pair.add_file(ContextFile { path: path.clone(), read_only }).await;
                    if added {
                        print_info(&format!("Added file: {path}"))?;
                    } else {
                        print_info(&format!("Not added - file '{path}' was already in the context."))?;
                    }
                    self.save().await;
                }
                Command::Drop(path) => {
                    self.pair.drop_file(&path).await;
                    print_info(&format!("Dropped file: {path}"))?;
                    self.save().await;
                }
                Command::Files => {
                    let files = self.pair.context_files().await;
                    if files.is_empty() {
                        print_info("No files in the context.")?;
                    }
                    for file in files {
                        let marker = if file.read_only { " (read-only)" } else { "" };
                        print_info(&format!("- {}{marker}", file.path))?;
                    }
                }
                Command::Clear => {
                    self.conversation.clear();
                    print_info("Conversation cleared.")?;
                    self.save().await;
                }
                Command::Unknown(text) => print_info(&format!("Unknown command: {text}. Type /help for commands."))?,
                Command::Prompt(text) => self.run_prompt(text).await?,
            }
        }
        Ok(())
    }

    /// Run one prompt to completion, rendering its events. Ctrl+C
    /// interrupts the run; the partial result is kept.
    pub async fn run_prompt(&mut self, prompt: String) -> Result<()> {
        let request = RunRequest {
            project_dir: self.project_dir.clone(),
            profile: self.profile.clone(),
            prompt,
            history: self.conversation.messages().to_vec(),
            context_files: self.pair.context_files().await,
            repo_map: None,
            system_prompt: self.system_prompt.clone(),
        };

        let (sink, mut rx) = EventSink::channel(None);
        let render = tokio::spawn(async move {
            let mut renderer = Renderer::stdout();
            while let Some(envelope) = rx.recv().await {
                if let Err(e) = renderer.render(&envelope.event) {
                    debug!(error = %e, "Failed to render event");
                }
                if matches!(envelope.event, AgentEvent::RunComplete { .. }) && envelope.group.is_none() {
                    break;
                }
            }
        });

        let messages = {
            let run = self.agent.run(request, sink);
            tokio::pin!(run);
            loop {
                tokio::select! {
                    messages = &mut run => break messages,
                    _ = tokio::signal::ctrl_c() => {
                        print_info("\nInterrupting...")?;
                        self.agent.interrupt();
                    }
                }
            }
        };
        if let Err(e) = render.await {
            debug!(error = %e, "Render task failed");
        }

        self.conversation.extend(messages);
        self.save().await;
        Ok(())
    }

    /// Sync the session with the conversation and write it out.
    pub async fn save(&mut self) {
        self.session.messages = self.conversation.messages().to_vec();
        self.session.context_files = self.pair.context_files().await;
        self.session.update_name_from_first_message();
        if let Err(e) = self.store.save(&mut self.session) {
            warn!(error = %e, "Failed to save session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aider::AiderProcess;
    use crate::config::AiderConfig;
    use desk_tool_runtime::approval::scripted::ScriptedPrompt;
    use desk_tool_runtime::provider::mock::MockLlmProvider;
    use desk_tool_runtime::ConversationMessage;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("   "), Command::Empty);
        assert_eq!(parse_command("quit"), Command::Exit);
        assert_eq!(parse_command("/exit"), Command::Exit);
        assert_eq!(
            parse_command("/add src/main.rs"),
            Command::Add {
                path: "src/main.rs".to_string(),
                read_only: false
            }
        );
        assert_eq!(
            parse_command("/read  docs/API.md "),
            Command::Add {
                path: "docs/API.md".to_string(),
                read_only: true
            }
        );
        assert_eq!(parse_command("/drop a.rs"), Command::Drop("a.rs".to_string()));
        assert_eq!(parse_command("/add"), Command::Unknown("/add".to_string()));
        assert_eq!(
            parse_command("refactor the parser"),
            Command::Prompt("refactor the parser".to_string())
        );
    }

    #[tokio::test]
    async fn test_prompt_extends_conversation_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("All done.");
        let pair: Arc<dyn PairProgrammer> = Arc::new(AiderProcess::new(
            AiderConfig::default(),
            dir.path().to_path_buf(),
            vec![ContextFile {
                path: "notes.md".to_string(),
                read_only: true,
            }],
        ));

        let session = Session::new(
            "mock".to_string(),
            "mock-model".to_string(),
            dir.path().to_path_buf(),
            None,
        );
        let session_id = session.id.clone();
        let mut repl = Repl {
            agent: AgenticLoop::new(provider.clone(), Arc::new(ScriptedPrompt::default())),
            pair,
            profile: AgentProfile {
                use_power_tools: false,
                use_todo_tools: false,
                ..Default::default()
            },
            project_dir: dir.path().to_path_buf(),
            system_prompt: Some("You are terse.".to_string()),
            conversation: Conversation::default(),
            session,
            store: SessionStore::new(dir.path().join("sessions")),
        };

        repl.run_prompt("say done".to_string()).await.unwrap();

        let messages = repl.conversation.messages();
        assert!(matches!(&messages[0], ConversationMessage::User(text) if text == "say done"));
        assert!(matches!(messages.last(), Some(ConversationMessage::Assistant(_))));
        assert_eq!(provider.requests()[0].system_prompt.as_deref(), Some("You are terse."));

        let saved = repl.store.load(&session_id).unwrap();
        assert_eq!(saved.name, "say-done");
        assert_eq!(saved.messages.len(), messages.len());
        assert_eq!(saved.context_files[0].path, "notes.md");
    }
}
