use anyhow::Result;
use async_trait::async_trait;
use crossterm::{
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use desk_tool_runtime::{
    AgentEvent, ApprovalQuestion, CompletedOrder, LogLevel, PromptAnswer, PromptSurface, UsageReport,
};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::session::SessionSummary;

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const USER_PROMPT: Color = Color::Green;
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const REASONING: Color = Color::DarkCyan;
    const TOOL_CALL: Color = Color::Yellow;
    const TOOL_RESULT: Color = Color::DarkGreen;
    const WARNING: Color = Color::DarkYellow;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Longest tool result echoed to the terminal, in characters.
const MAX_RESULT_CHARS: usize = 500;

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}... ({} chars total)", &text[..end], text.chars().count()),
        None => text.to_string(),
    }
}

fn print_colored<W: Write>(out: &mut W, color: Color, text: &str) -> io::Result<()> {
    queue!(out, SetForegroundColor(color), Print(text), ResetColor)
}

/// Renders a run's event stream. Completed responses are shown in sequence
/// order.
pub struct Renderer<W: Write> {
    out: W,
    order: CompletedOrder,
    last_loading: Option<String>,
    /// Whether the cursor sits mid-line after streamed text.
    mid_line: bool,
}

impl Renderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            order: CompletedOrder::new(),
            last_loading: None,
            mid_line: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn end_line(&mut self) -> io::Result<()> {
        if self.mid_line {
            queue!(self.out, Print("\n"))?;
            self.mid_line = false;
        }
        Ok(())
    }

    pub fn render(&mut self, event: &AgentEvent) -> io::Result<()> {
        let ready = match event {
            AgentEvent::RunComplete { .. } => {
                let mut held = self.order.flush();
                held.push(event.clone());
                held
            }
            _ => self.order.push(event.clone()),
        };
        for event in &ready {
            self.render_event(event)?;
        }
        self.out.flush()
    }

    fn render_event(&mut self, event: &AgentEvent) -> io::Result<()> {
        match event {
            AgentEvent::TextDelta { text, .. } => {
                print_colored(&mut self.out, Colors::ASSISTANT_TEXT, text)?;
                self.mid_line = !text.ends_with('\n');
            }
            AgentEvent::ReasoningDelta { text, .. } => {
                print_colored(&mut self.out, Colors::REASONING, text)?;
                self.mid_line = !text.ends_with('\n');
            }
            AgentEvent::ToolCallStarted { group, tool, args, .. } => {
                self.end_line()?;
                let args = truncate(&args.to_string(), MAX_RESULT_CHARS);
                print_colored(&mut self.out, Colors::TOOL_CALL, &format!("[tool: {group}---{tool}] {args}\n"))?;
            }
            AgentEvent::ToolResult {
                group,
                tool,
                result,
                usage,
                ..
            } => {
                self.end_line()?;
                let result = truncate(result, MAX_RESULT_CHARS);
                print_colored(
                    &mut self.out,
                    Colors::TOOL_RESULT,
                    &format!("  [{group}---{tool} result]: {result}\n"),
                )?;
                if let Some(usage) = usage {
                    self.render_usage(usage)?;
                }
            }
            AgentEvent::StepComplete { usage, .. } => {
                self.end_line()?;
                if let Some(usage) = usage {
                    self.render_usage(usage)?;
                }
            }
            AgentEvent::Log { level, message } => {
                self.end_line()?;
                let (color, label) = match level {
                    LogLevel::Info => (Colors::DIM, "info"),
                    LogLevel::Warning => (Colors::WARNING, "warning"),
                    LogLevel::Error => (Colors::ERROR, "error"),
                };
                print_colored(&mut self.out, color, &format!("[{label}] {message}\n"))?;
            }
            AgentEvent::Loading { message } => {
                if let Some(text) = message {
                    if self.last_loading.as_deref() != Some(text.as_str()) {
                        self.end_line()?;
                        print_colored(&mut self.out, Colors::DIM, &format!("({text})\n"))?;
                    }
                }
                self.last_loading = message.clone();
            }
            AgentEvent::RunComplete { response_id } => {
                debug!(%response_id, "Run complete");
                self.end_line()?;
                self.last_loading = None;
            }
        }
        Ok(())
    }

    fn render_usage(&mut self, usage: &UsageReport) -> io::Result<()> {
        let mut line = format!(
            "  {} | tokens: {} sent, {} received",
            usage.model, usage.sent_tokens, usage.received_tokens
        );
        if let Some(read) = usage.cache_read_tokens {
            line.push_str(&format!(", {read} cache read"));
        }
        if let Some(write) = usage.cache_write_tokens {
            line.push_str(&format!(", {write} cache write"));
        }
        line.push_str(&format!(
            " | cost: ${:.4} (total ${:.4})\n",
            usage.message_cost, usage.agent_total_cost
        ));
        print_colored(&mut self.out, Colors::DIM, &line)
    }
}

/// Print the startup banner.
pub fn print_banner(provider: &str, model: &str, project_dir: &str) -> Result<()> {
    let mut stdout = io::stdout();
    print_colored(&mut stdout, Colors::HEADER, "desk-agent")?;
    queue!(stdout, Print(" - Autonomous coding agent\n"))?;
    print_colored(
        &mut stdout,
        Colors::DIM,
        &format!(
            "Provider: {provider} | Model: {model}\nProject: {project_dir}\n\
             Type /help for commands. Ctrl+C interrupts the current run.\n---\n"
        ),
    )?;
    stdout.flush()?;
    Ok(())
}

pub fn print_prompt_marker() -> Result<()> {
    let mut stdout = io::stdout();
    queue!(stdout, Print("\n"))?;
    print_colored(&mut stdout, Colors::USER_PROMPT, "you> ")?;
    stdout.flush()?;
    Ok(())
}

/// Print a session listing.
pub fn print_sessions(sessions: &[SessionSummary]) -> Result<()> {
    let mut stdout = io::stdout();
    if sessions.is_empty() {
        print_colored(&mut stdout, Colors::DIM, "No saved sessions found.\n")?;
        stdout.flush()?;
        return Ok(());
    }

    print_colored(&mut stdout, Colors::HEADER, "Saved Sessions:\n")?;
    print_colored(
        &mut stdout,
        Colors::DIM,
        &format!(
            "{:<20} {:<40} {:<12} {:<6}\n{}\n",
            "ID",
            "NAME",
            "PROVIDER",
            "MSGS",
            "-".repeat(80)
        ),
    )?;
    for s in sessions {
        let name = if s.name.chars().count() > 38 {
            format!("{}...", s.name.chars().take(35).collect::<String>())
        } else {
            s.name.clone()
        };
        queue!(
            stdout,
            Print(format!(
                "{:<20} {:<40} {:<12} {:<6}\n",
                s.id, name, s.provider, s.message_count
            ))
        )?;
    }
    stdout.flush()?;
    Ok(())
}

/// Print an error message.
pub fn print_error(msg: &str) -> Result<()> {
    let mut stdout = io::stdout();
    print_colored(&mut stdout, Colors::ERROR, &format!("Error: {msg}\n"))?;
    stdout.flush()?;
    Ok(())
}

/// Print an info message.
pub fn print_info(msg: &str) -> Result<()> {
    let mut stdout = io::stdout();
    print_colored(&mut stdout, Colors::DIM, &format!("{msg}\n"))?;
    stdout.flush()?;
    Ok(())
}

/// Lines typed on stdin.
///
/// A single reader thread feeds both the REPL and approval prompts, so an
/// abandoned prompt never leaves a blocked read behind.
pub struct Input {
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl Input {
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.trim_end_matches(['\n', '\r']).to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self::from_channel(rx)
    }

    pub fn from_channel(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { lines: Mutex::new(rx) }
    }

    /// Next line, or `None` at end of input.
    pub async fn next_line(&self) -> Option<String> {
        self.lines.lock().await.recv().await
    }
}

/// Interpret a typed reply to an approval question.
///
/// The first word selects a choice by shortkey or label; the rest is kept
/// as free text. An empty line picks the default. Anything else denies,
/// keeping the whole line as the reason.
pub fn parse_answer(line: &str, question: &ApprovalQuestion) -> PromptAnswer {
    let line = line.trim();
    if line.is_empty() {
        return PromptAnswer::new(&question.default_answer);
    }

    let (first, rest) = match line.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (line, ""),
    };
    let first = first.trim_end_matches([':', ',']).to_lowercase();
    let chosen = question.choices.iter().find(|c| {
        let label = c
            .label
            .chars()
            .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        first == c.shortkey || label.split_whitespace().next() == Some(first.as_str())
    });

    match chosen {
        Some(choice) => {
            let mut answer = PromptAnswer::new(&choice.shortkey);
            if !rest.is_empty() {
                answer = answer.with_input(rest);
            }
            answer
        }
        None => PromptAnswer::new("n").with_input(line),
    }
}

/// Asks approval questions on the terminal, one at a time.
pub struct TerminalPrompt {
    input: Arc<Input>,
    asking: Mutex<()>,
}

impl TerminalPrompt {
    pub fn new(input: Arc<Input>) -> Self {
        Self {
            input,
            asking: Mutex::new(()),
        }
    }

    fn print_question(question: &ApprovalQuestion) -> io::Result<()> {
        let mut stdout = io::stdout();
        print_colored(&mut stdout, Colors::TOOL_CALL, &format!("\n{}\n", question.text))?;
        if let Some(subject) = &question.subject {
            print_colored(&mut stdout, Colors::DIM, &format!("{subject}\n"))?;
        }
        let choices: Vec<&str> = question.choices.iter().map(|c| c.label.as_str()).collect();
        print_colored(
            &mut stdout,
            Colors::USER_PROMPT,
            &format!("{} [{}] ", choices.join(" / "), question.default_answer),
        )?;
        stdout.flush()
    }
}

#[async_trait]
impl PromptSurface for TerminalPrompt {
    async fn ask(&self, question: ApprovalQuestion) -> PromptAnswer {
        let _turn = self.asking.lock().await;
        if let Err(e) = Self::print_question(&question) {
            debug!(error = %e, "Failed to print approval question");
        }
        match self.input.next_line().await {
            Some(line) => parse_answer(&line, &question),
            // Input closed: nobody can answer.
            None => PromptAnswer::new("n"),
        }
    }
}
