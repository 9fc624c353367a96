use async_trait::async_trait;
use desk_core::{AgentProfile, SubagentConfig, ToolApprovalState};
use futures::future::join_all;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::approval::{ApprovalGate, ApprovalStore, InMemoryApprovalStore, PromptSurface};
use crate::context::{context_files_messages, repo_map_messages, working_files_messages};
use crate::conversation::{AssistantContent, ConversationMessage};
use crate::events::{
    AgentEvent, EventSink, LogLevel, ANSWER_RESPONSE_START_TAG, THINKING_RESPONSE_START_TAG,
};
use crate::prompt::system_prompt;
use crate::provider::{CacheHint, LlmError, ToolAwareLlmProvider, TurnRequest};
use crate::registry::{ToolGroup, ToolRegistry, ToolSource};
use crate::repair::{repair_with_model, resolve_call};
use crate::stream::{FinishReason, RawToolCall, StreamEvent, TurnCollector};
use crate::tool::{Tool, ToolCall, ToolContext, ToolResult};
use crate::tool_id::ToolId;
use crate::tools::{self, ContextFile, PairProgrammer, SubagentRunner};
use crate::usage::usage_report;

/// Retries after an unknown or other finish reason before giving up.
const MAX_AMBIGUOUS_RETRIES: u32 = 3;
/// Retries of a transient provider error within one iteration.
const MAX_PROVIDER_RETRIES: u32 = 5;
/// Pause before retrying a transient provider error without a retry-after hint.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// A tool advertised by an external server.
pub struct ExternalTool {
    pub server_name: String,
    pub tool: Arc<dyn Tool>,
}

/// Source of tools that live outside this process.
#[async_trait]
pub trait ExternalTools: Send + Sync {
    /// Bring server connections in line with the project before a run.
    async fn prepare(&self, project_dir: &Path, profile: &AgentProfile) -> anyhow::Result<()>;

    /// Tools of the servers the profile enables.
    async fn tools(&self, profile: &AgentProfile) -> Vec<ExternalTool>;
}

/// One prompt to run through the loop.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub project_dir: PathBuf,
    pub profile: AgentProfile,
    pub prompt: String,
    /// Earlier messages of the conversation.
    pub history: Vec<ConversationMessage>,
    pub context_files: Vec<ContextFile>,
    pub repo_map: Option<String>,
    /// Replaces the generated system prompt.
    pub system_prompt: Option<String>,
}

/// The core agentic loop that orchestrates LLM ↔ Tool execution.
///
/// Flow: User → LLM → ToolCalls → Execute → Results → LLM → ... → Final Text
///
/// Runs are serialized: a second `run` waits until the first has emitted its
/// `RunComplete` event.
pub struct AgenticLoop {
    provider: Arc<dyn ToolAwareLlmProvider>,
    prompt: Arc<dyn PromptSurface>,
    approvals: Option<Arc<dyn ApprovalStore>>,
    external: Option<Arc<dyn ExternalTools>>,
    pair: Option<Arc<dyn PairProgrammer>>,
    subagents: Vec<SubagentConfig>,
    run_lock: tokio::sync::Mutex<()>,
    current: Mutex<Option<CancellationToken>>,
}

/// A resolved call together with what it produced.
struct ExecutedCall {
    call: ToolCall,
    tool_id: Option<ToolId>,
    result: ToolResult,
}

impl AgenticLoop {
    pub fn new(provider: Arc<dyn ToolAwareLlmProvider>, prompt: Arc<dyn PromptSurface>) -> Self {
        Self {
            provider,
            prompt,
            approvals: None,
            external: None,
            pair: None,
            subagents: Vec::new(),
            run_lock: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
        }
    }

    /// Persist approval states here instead of the profile's in-memory copy.
    pub fn with_approval_store(mut self, store: Arc<dyn ApprovalStore>) -> Self {
        self.approvals = Some(store);
        self
    }

    pub fn with_external_tools(mut self, external: Arc<dyn ExternalTools>) -> Self {
        self.external = Some(external);
        self
    }

    pub fn with_pair_programmer(mut self, pair: Arc<dyn PairProgrammer>) -> Self {
        self.pair = Some(pair);
        self
    }

    /// Profiles offered through `subagents---run_task`.
    pub fn with_subagents(mut self, subagents: Vec<SubagentConfig>) -> Self {
        self.subagents = subagents;
        self
    }

    /// Abort the current run, if any. Pending approvals resolve to denials.
    pub fn interrupt(&self) {
        if let Ok(current) = self.current.lock() {
            if let Some(token) = current.as_ref() {
                info!("Interrupting agent run");
                token.cancel();
            }
        }
    }

    fn set_current(&self, token: Option<CancellationToken>) {
        if let Ok(mut current) = self.current.lock() {
            *current = token;
        }
    }

    /// Run one prompt. Returns the messages the run added to the
    /// conversation, starting with the user's prompt.
    pub async fn run(&self, request: RunRequest, events: EventSink) -> Vec<ConversationMessage> {
        self.run_with_cancel(request, events, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        request: RunRequest,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Vec<ConversationMessage> {
        let _guard = self.run_lock.lock().await;
        self.set_current(Some(cancel.clone()));

        let mut response_id = Uuid::new_v4().to_string();
        let messages = self.drive(&request, &events, &cancel, &mut response_id).await;

        self.set_current(None);
        events.emit(AgentEvent::RunComplete { response_id });
        messages
    }

    async fn drive(
        &self,
        request: &RunRequest,
        events: &EventSink,
        cancel: &CancellationToken,
        response_id: &mut String,
    ) -> Vec<ConversationMessage> {
        let profile = &request.profile;
        debug!(provider = %profile.provider, model = %profile.model, "Starting agent run");

        let user_message = ConversationMessage::user(&request.prompt);
        let mut messages = prepare_messages(request);
        messages.extend(request.history.iter().cloned());
        messages.push(user_message.clone());
        let mut result_messages = vec![user_message];

        if let Some(external) = &self.external {
            if let Err(e) = external.prepare(&request.project_dir, profile).await {
                error!(error = %e, "Error reinitializing MCP clients");
                events.log(LogLevel::Error, format!("Error reinitializing MCP clients: {e}"));
            }
        }

        let store = self.approvals.clone().unwrap_or_else(|| {
            Arc::new(InMemoryApprovalStore::new(profile.tool_approvals.clone())) as Arc<dyn ApprovalStore>
        });
        let gate = Arc::new(ApprovalGate::new(
            profile.auto_approve,
            store,
            self.prompt.clone(),
            cancel.clone(),
        ));
        let registry = self.assemble_tools(profile, &gate).await;
        info!(tools = registry.len(), "Running prompt");
        debug!(tools = ?registry.names(), "Available tools");

        let context = ToolContext {
            working_directory: request.project_dir.clone(),
            call_id: String::new(),
            approval: gate,
            events: events.clone(),
            cancel: cancel.clone(),
        };
        let system_prompt = request
            .system_prompt
            .clone()
            .unwrap_or_else(|| system_prompt(&request.project_dir, profile));
        let definitions = registry.definitions(&profile.provider);
        let cache = CacheHint::for_model(&profile.provider, &profile.model);

        let mut iteration: u32 = 0;
        let mut retry_count: u32 = 0;
        let mut total_cost = 0.0;

        loop {
            iteration += 1;
            if iteration > profile.max_iterations {
                warn!(max_iterations = profile.max_iterations, "Max iterations reached, stopping agent");
                events.log(
                    LogLevel::Warning,
                    format!(
                        "The Agent has reached the maximum number of allowed iterations ({}). To allow more iterations, increase max_iterations in the agent profile.",
                        profile.max_iterations
                    ),
                );
                break;
            }
            debug!(iteration, "Starting iteration");

            let turn_request = TurnRequest {
                system_prompt: Some(system_prompt.clone()),
                messages: messages.clone(),
                tools: definitions.clone(),
                temperature: profile.temperature,
                max_tokens: profile.max_tokens,
                cache,
            };

            let turn = match self.stream_with_retries(&turn_request, events, cancel, response_id).await {
                Ok(turn) => turn,
                Err(e) => {
                    if cancel.is_cancelled() {
                        info!("Prompt aborted by user");
                        break;
                    }
                    error!(error = %e, "Error during prompt");
                    events.log(LogLevel::Error, user_facing_error(&e));
                    break;
                }
            };

            if cancel.is_cancelled() {
                info!("Prompt aborted by user");
                break;
            }

            let finish_reason = turn.finish_reason();
            if let Some(message) = &turn.error {
                error!(%message, "Error during prompt");
                events.log(LogLevel::Error, message.clone());
                break;
            }
            if finish_reason == FinishReason::Error {
                error!("Model turn finished with an error");
                break;
            }

            let executed = self
                .execute_tools(&registry, &context, &turn_request, turn.tool_calls())
                .await;
            if cancel.is_cancelled() {
                info!("Prompt aborted by user");
                break;
            }

            let step = process_step(&turn, executed, profile, events, &mut total_cost, response_id);
            messages.extend(step.iter().cloned());
            result_messages.extend(step);

            if finish_reason.is_ambiguous() && retry_count < MAX_AMBIGUOUS_RETRIES {
                warn!(%finish_reason, "Ambiguous finish reason, retrying");
                retry_count += 1;
                continue;
            }
            retry_count = 0;

            if finish_reason == FinishReason::Length {
                events.log(
                    LogLevel::Warning,
                    "The Agent has reached the maximum number of allowed tokens. To allow more tokens, increase max_tokens in the agent profile.",
                );
            }

            if finish_reason != FinishReason::ToolCalls {
                info!(%finish_reason, "Prompt finished");
                break;
            }
        }

        result_messages
    }

    /// Build the run's tool set. Tools whose approval state is `Never` are
    /// left out; helpers are always present.
    async fn assemble_tools(&self, profile: &AgentProfile, gate: &ApprovalGate) -> ToolRegistry {
        let mut registry = ToolRegistry::new();

        if let Some(external) = &self.external {
            for external_tool in external.tools(profile).await {
                register_all(
                    &mut registry,
                    ToolSource::External {
                        server_name: external_tool.server_name,
                    },
                    vec![external_tool.tool],
                );
            }
        }
        if profile.use_aider_tools {
            match &self.pair {
                Some(pair) => register_all(
                    &mut registry,
                    ToolSource::Builtin(ToolGroup::Aider),
                    tools::aider_tools(pair.clone()),
                ),
                None => warn!("Aider tools enabled without a pair programmer, skipping"),
            }
        }
        if profile.use_power_tools {
            register_all(&mut registry, ToolSource::Builtin(ToolGroup::Power), tools::power_tools());
        }
        if profile.use_todo_tools {
            register_all(&mut registry, ToolSource::Builtin(ToolGroup::Todo), tools::todo_tools());
        }
        if profile.use_subagents && self.subagents.iter().any(SubagentConfig::is_available) {
            let runner = Arc::new(NestedRunner {
                provider: self.provider.clone(),
                prompt: self.prompt.clone(),
                approvals: self.approvals.clone(),
                external: self.external.clone(),
                pair: self.pair.clone(),
                parent: profile.clone(),
            });
            register_all(
                &mut registry,
                ToolSource::Builtin(ToolGroup::Subagents),
                tools::subagent_tools(self.subagents.clone(), runner),
            );
        }
        register_all(&mut registry, ToolSource::Builtin(ToolGroup::Helpers), tools::helper_tools());

        registry.retain(|entry| {
            if entry.source == ToolSource::Builtin(ToolGroup::Helpers) {
                return true;
            }
            let keep = gate.state(&entry.id.canonical()) != ToolApprovalState::Never;
            if !keep {
                debug!(tool = %entry.id, "Skipping tool with 'never' approval state");
            }
            keep
        });
        registry
    }

    /// Stream one model turn, retrying transient provider errors without
    /// spending an iteration.
    async fn stream_with_retries(
        &self,
        request: &TurnRequest,
        events: &EventSink,
        cancel: &CancellationToken,
        response_id: &str,
    ) -> Result<TurnCollector, LlmError> {
        let mut attempt: u32 = 0;
        loop {
            match self.stream_turn(request.clone(), events, cancel, response_id).await {
                Err(e) if e.is_retryable() && attempt < MAX_PROVIDER_RETRIES && !cancel.is_cancelled() => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Transient provider error, retrying");
                    wait_before_retry(&e, cancel).await;
                }
                result => return result,
            }
        }
    }

    /// Stream one model turn, forwarding chunks as events.
    async fn stream_turn(
        &self,
        request: TurnRequest,
        events: &EventSink,
        cancel: &CancellationToken,
        response_id: &str,
    ) -> Result<TurnCollector, LlmError> {
        let mut turn = TurnCollector::default();
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(turn),
            stream = self.provider.stream_with_tools(request) => stream?,
        };

        let mut has_reasoning = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = stream.next() => next,
            };
            let Some(event) = next else { break };
            let event = event?;

            match &event {
                StreamEvent::TextDelta { text } => {
                    if has_reasoning {
                        events.emit(AgentEvent::TextDelta {
                            response_id: response_id.to_string(),
                            text: ANSWER_RESPONSE_START_TAG.to_string(),
                        });
                        has_reasoning = false;
                    }
                    if !text.trim().is_empty() || !turn.text.trim().is_empty() {
                        events.emit(AgentEvent::TextDelta {
                            response_id: response_id.to_string(),
                            text: text.clone(),
                        });
                    }
                }
                StreamEvent::ReasoningDelta { text } => {
                    if !has_reasoning {
                        events.emit(AgentEvent::ReasoningDelta {
                            response_id: response_id.to_string(),
                            text: THINKING_RESPONSE_START_TAG.to_string(),
                        });
                        has_reasoning = true;
                    }
                    events.emit(AgentEvent::ReasoningDelta {
                        response_id: response_id.to_string(),
                        text: text.clone(),
                    });
                }
                StreamEvent::ToolCallStart { .. } => events.loading(Some("Preparing tool...")),
                StreamEvent::ToolCallEnd { .. } => events.loading(Some("Executing tool...")),
                _ => {}
            }
            turn.push(&event);
        }
        Ok(turn)
    }

    /// Resolve and execute the turn's tool calls concurrently. Results come
    /// back in the order the model requested them.
    async fn execute_tools(
        &self,
        registry: &ToolRegistry,
        context: &ToolContext,
        request: &TurnRequest,
        calls: Vec<RawToolCall>,
    ) -> Vec<ExecutedCall> {
        if calls.is_empty() {
            return Vec::new();
        }
        info!(count = calls.len(), "Executing tool calls");
        let resolved: Vec<ToolCall> = calls.iter().map(|raw| resolve_call(registry, raw)).collect();
        join_all(
            resolved
                .into_iter()
                .map(|call| self.execute_call(registry, context, request, call)),
        )
        .await
    }

    async fn execute_call(
        &self,
        registry: &ToolRegistry,
        context: &ToolContext,
        request: &TurnRequest,
        mut call: ToolCall,
    ) -> ExecutedCall {
        let Some(entry) = registry.get(&call.name) else {
            let result = ToolResult::error(&call.id, format!("Tool '{}' is not available.", call.name));
            return ExecutedCall {
                call,
                tool_id: None,
                result,
            };
        };
        let ctx = context.for_call(&call.id);

        let mut result = match entry.tool.execute(call.input.clone(), &ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %entry.id, error = %e, "Error during tool call");
                match repair_with_model(self.provider.as_ref(), request.clone(), &call, &e.to_string()).await {
                    Some(input) => {
                        call.input = input.clone();
                        entry
                            .tool
                            .execute(input, &ctx)
                            .await
                            .unwrap_or_else(|e| ToolResult::error(&call.id, e.to_string()))
                    }
                    None => ToolResult::error(&call.id, e.to_string()),
                }
            }
        };
        result.tool_call_id = call.id.clone();

        ExecutedCall {
            call,
            tool_id: Some(entry.id.clone()),
            result,
        }
    }
}

/// Runs subagents as nested loops on this loop's collaborators.
struct NestedRunner {
    provider: Arc<dyn ToolAwareLlmProvider>,
    prompt: Arc<dyn PromptSurface>,
    approvals: Option<Arc<dyn ApprovalStore>>,
    external: Option<Arc<dyn ExternalTools>>,
    pair: Option<Arc<dyn PairProgrammer>>,
    /// Profile of the delegating run.
    parent: AgentProfile,
}

#[async_trait]
impl SubagentRunner for NestedRunner {
    async fn run_subagent(
        &self,
        subagent: &SubagentConfig,
        prompt: &str,
        ctx: &ToolContext,
    ) -> anyhow::Result<Vec<ConversationMessage>> {
        let nested = AgenticLoop {
            provider: self.provider.clone(),
            prompt: self.prompt.clone(),
            approvals: self.approvals.clone(),
            external: self
                .external
                .clone()
                .map(|external| Arc::new(AlreadyConnected(external)) as Arc<dyn ExternalTools>),
            pair: self.pair.clone(),
            subagents: Vec::new(),
            run_lock: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
        };

        // The provider is shared, so model and pricing follow the parent.
        let mut profile = subagent.profile.clone();
        profile.name = subagent.name.clone();
        profile.provider = self.parent.provider.clone();
        profile.model = self.parent.model.clone();
        profile.pricing = self.parent.pricing.clone();
        profile.use_todo_tools = false;
        profile.use_subagents = false;

        let request = RunRequest {
            project_dir: ctx.working_directory.clone(),
            profile,
            prompt: prompt.to_string(),
            system_prompt: Some(subagent.system_prompt.clone()),
            ..Default::default()
        };
        let messages = nested
            .run_with_cancel(request, ctx.events.with_group(subagent.name.clone()), ctx.cancel.child_token())
            .await;
        if ctx.cancel.is_cancelled() {
            anyhow::bail!("interrupted");
        }
        Ok(messages)
    }
}

/// External tools as the delegating run left them. A nested run must not
/// reconcile servers, or it would close those its parent still uses.
struct AlreadyConnected(Arc<dyn ExternalTools>);

#[async_trait]
impl ExternalTools for AlreadyConnected {
    async fn prepare(&self, _project_dir: &Path, _profile: &AgentProfile) -> anyhow::Result<()> {
        Ok(())
    }

    async fn tools(&self, profile: &AgentProfile) -> Vec<ExternalTool> {
        self.0.tools(profile).await
    }
}

fn register_all(registry: &mut ToolRegistry, source: ToolSource, tools: Vec<Arc<dyn Tool>>) {
    for tool in tools {
        if let Err(e) = registry.register(source.clone(), tool) {
            warn!(error = %e, "Skipping tool");
        }
    }
}

/// Synthetic context placed ahead of the history.
fn prepare_messages(request: &RunRequest) -> Vec<ConversationMessage> {
    let profile = &request.profile;
    let mut messages = Vec::new();
    if profile.include_repo_map {
        if let Some(repo_map) = &request.repo_map {
            messages.extend(repo_map_messages(repo_map));
        }
    }
    if profile.include_context_files {
        messages.extend(context_files_messages(
            &request.project_dir,
            &request.context_files,
            profile.use_aider_tools,
        ));
    } else {
        messages.extend(working_files_messages(&request.context_files));
    }
    messages
}

/// Emit the step's response and tool-result events and return its messages.
fn process_step(
    turn: &TurnCollector,
    executed: Vec<ExecutedCall>,
    profile: &AgentProfile,
    events: &EventSink,
    total_cost: &mut f64,
    response_id: &mut String,
) -> Vec<ConversationMessage> {
    let usage = usage_report(
        &profile.provider,
        &profile.model,
        turn.usage,
        &turn.provider_metadata,
        profile.pricing.as_ref(),
        *total_cost,
    );
    *total_cost = usage.agent_total_cost;
    info!(
        finish_reason = %turn.finish_reason(),
        tool_results = executed.len(),
        sent_tokens = usage.sent_tokens,
        received_tokens = usage.received_tokens,
        "Step finished"
    );

    // Usage rides on the tool results when there are any.
    let step_usage = executed.is_empty().then(|| usage.clone());

    let text = turn.text.trim();
    let reasoning = turn.reasoning.trim();
    if !reasoning.is_empty() || !text.is_empty() {
        let content = if !reasoning.is_empty() && !text.is_empty() {
            format!("{THINKING_RESPONSE_START_TAG}{reasoning}{ANSWER_RESPONSE_START_TAG}{text}")
        } else if !reasoning.is_empty() {
            turn.reasoning.clone()
        } else {
            turn.text.clone()
        };
        events.emit(AgentEvent::StepComplete {
            sequence: events.next_sequence(),
            response_id: response_id.clone(),
            content,
            usage: step_usage.clone(),
        });
    }

    for executed_call in &executed {
        let (group, tool) = match &executed_call.tool_id {
            Some(id) => (id.group().to_string(), id.tool().to_string()),
            None => (String::new(), executed_call.call.name.clone()),
        };
        events.emit(AgentEvent::ToolResult {
            call_id: executed_call.call.id.clone(),
            group,
            tool,
            args: executed_call.call.input.clone(),
            result: executed_call.result.content.clone(),
            usage: Some(usage.clone()),
        });
    }

    events.loading(None);
    *response_id = Uuid::new_v4().to_string();

    let mut messages = Vec::new();
    if !turn.text.is_empty() || !turn.reasoning.is_empty() || !executed.is_empty() {
        messages.push(ConversationMessage::Assistant(AssistantContent {
            text: (!turn.text.is_empty()).then(|| turn.text.clone()),
            reasoning: (!turn.reasoning.is_empty()).then(|| turn.reasoning.clone()),
            tool_calls: executed.iter().map(|e| e.call.clone()).collect(),
            usage: step_usage,
        }));
    }
    messages.extend(
        executed
            .into_iter()
            .map(|e| ConversationMessage::ToolResult(e.result)),
    );
    messages
}

/// Error text shown to the user, with a hint for credential problems.
fn user_facing_error(error: &LlmError) -> String {
    let message = error.to_string();
    if message.contains("API key") || message.contains("credentials") {
        format!("{message}. Configure credentials in the config file or the provider's API key environment variable.")
    } else {
        message
    }
}

async fn wait_before_retry(error: &LlmError, cancel: &CancellationToken) {
    let delay = error.retry_after().unwrap_or(RETRY_DELAY);
    debug!(delay_ms = delay.as_millis() as u64, "Retrying after provider error");
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::scripted::{PendingPrompt, ScriptedPrompt};
    use crate::approval::PromptAnswer;
    use crate::events::EventEnvelope;
    use crate::provider::mock::{end, MockLlmProvider};
    use crate::tool::{ToolDefinition, ToolError};
    use crate::tools::aider::testing::FakePair;
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn harness(answers: Vec<PromptAnswer>) -> (AgenticLoop, Arc<MockLlmProvider>, Arc<ScriptedPrompt>) {
        let provider = Arc::new(MockLlmProvider::new());
        let prompt = Arc::new(ScriptedPrompt::new(answers));
        let agent = AgenticLoop::new(provider.clone(), prompt.clone());
        (agent, provider, prompt)
    }

    fn request(dir: &Path, prompt: &str) -> RunRequest {
        RunRequest {
            project_dir: dir.to_path_buf(),
            prompt: prompt.to_string(),
            system_prompt: Some("You are a test agent.".to_string()),
            ..Default::default()
        }
    }

    fn drain(rx: &mut UnboundedReceiver<EventEnvelope>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            events.push(envelope.event);
        }
        events
    }

    async fn run(agent: &AgenticLoop, request: RunRequest) -> (Vec<ConversationMessage>, Vec<AgentEvent>) {
        let (sink, mut rx) = EventSink::channel(Some("prompt-1".to_string()));
        let messages = agent.run(request, sink).await;
        (messages, drain(&mut rx))
    }

    fn logs(events: &[AgentEvent], level: LogLevel) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::Log { level: l, message } if *l == level => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn tool_names(provider: &MockLlmProvider) -> Vec<String> {
        provider.requests()[0].tools.iter().map(|t| t.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_simple_text_response() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        provider.queue_text("Hello, I'm an AI assistant!");

        let (messages, events) = run(&agent, request(dir.path(), "Hello")).await;

        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], ConversationMessage::User(t) if t == "Hello"));
        assert!(matches!(
            &messages[1],
            ConversationMessage::Assistant(c) if c.text.as_deref() == Some("Hello, I'm an AI assistant!") && c.usage.is_some()
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::StepComplete { content, usage: Some(_), .. } if content == "Hello, I'm an AI assistant!"
        )));
        assert!(matches!(events.last(), Some(AgentEvent::RunComplete { .. })));
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_call_and_response() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "remember the milk").unwrap();
        let (agent, provider, prompt) = harness(vec![]);
        provider.queue_tool_call("call_1", "power---file_read", r#"{"filePath":"notes.txt"}"#);
        provider.queue_text("The note says to remember the milk.");

        let (messages, events) = run(&agent, request(dir.path(), "What does the note say?")).await;

        // user, assistant (tool call), tool result, assistant (text)
        assert_eq!(messages.len(), 4);
        match &messages[2] {
            ConversationMessage::ToolResult(r) => {
                assert_eq!(r.tool_call_id, "call_1");
                assert!(r.content.starts_with("Here is the most recent content of 'notes.txt'"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
        assert!(matches!(&messages[1], ConversationMessage::Assistant(c) if c.usage.is_none()));
        assert!(prompt.asked().is_empty());

        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolResult { group, tool, usage: Some(_), .. } if group == "power" && tool == "file_read"
        )));
        let second = &provider.requests()[1].messages;
        assert!(matches!(second.last(), Some(ConversationMessage::ToolResult(_))));
    }

    #[tokio::test]
    async fn test_denied_command_never_runs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "precious").unwrap();
        let (agent, provider, prompt) = harness(vec![PromptAnswer::new("n").with_input("do not delete files")]);
        provider.queue_tool_call("call_1", "power---bash", r#"{"command":"rm -f keep.txt"}"#);
        provider.queue_text("Understood, I will not delete it.");

        let (messages, _) = run(&agent, request(dir.path(), "clean up")).await;

        assert!(dir.path().join("keep.txt").exists());
        assert_eq!(prompt.asked().len(), 1);
        assert_eq!(prompt.asked()[0].text, "Approve executing bash command?");
        match &messages[2] {
            ConversationMessage::ToolResult(r) => assert_eq!(
                r.content,
                "Bash command execution denied by user. Reason: do not delete files"
            ),
            other => panic!("expected tool result, got {other:?}"),
        }
        assert_eq!(messages.len(), 4);
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_never_tools_are_not_offered() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        provider.queue_text("ok");

        let mut req = request(dir.path(), "hi");
        req.profile
            .tool_approvals
            .insert("power---bash".to_string(), ToolApprovalState::Never);
        run(&agent, req).await;

        let names = tool_names(&provider);
        assert!(!names.contains(&"power---bash".to_string()));
        assert!(names.contains(&"power---file_read".to_string()));
        assert!(names.contains(&"helpers---no_such_tool".to_string()));
        assert!(names.contains(&"todo---set_items".to_string()));
    }

    #[tokio::test]
    async fn test_iteration_bound() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        for i in 0..3 {
            provider.queue_tool_call(&format!("call_{i}"), "power---glob", r#"{"pattern":"*.md"}"#);
        }

        let mut req = request(dir.path(), "look around");
        req.profile.max_iterations = 2;
        let (_, events) = run(&agent, req).await;

        assert_eq!(provider.requests().len(), 2);
        let warnings = logs(&events, LogLevel::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("maximum number of allowed iterations (2)"));
        assert!(matches!(events.last(), Some(AgentEvent::RunComplete { .. })));
    }

    #[tokio::test]
    async fn test_length_warns_once_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        provider.queue_response(vec![
            StreamEvent::TextDelta { text: "This answer is cut".to_string() },
            end(FinishReason::Length),
        ]);
        provider.queue_text("never requested");

        let (messages, events) = run(&agent, request(dir.path(), "explain")).await;

        assert_eq!(provider.requests().len(), 1);
        assert_eq!(messages.len(), 2);
        let warnings = logs(&events, LogLevel::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("maximum number of allowed tokens"));
    }

    #[tokio::test]
    async fn test_ambiguous_finish_retried_three_times() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        for _ in 0..5 {
            provider.queue_response(vec![
                StreamEvent::TextDelta { text: "hmm".to_string() },
                end(FinishReason::Unknown),
            ]);
        }

        run(&agent, request(dir.path(), "go")).await;
        assert_eq!(provider.requests().len(), 4);
        assert_eq!(provider.remaining(), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_gets_credentials_hint() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        provider.queue_error(LlmError::AuthError);

        let (messages, events) = run(&agent, request(dir.path(), "hi")).await;

        assert_eq!(messages.len(), 1);
        let errors = logs(&events, LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Authentication failed: invalid API key. Configure credentials"));
        assert!(matches!(events.last(), Some(AgentEvent::RunComplete { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        provider.queue_error(LlmError::RateLimited { retry_after_secs: 2 });
        provider.queue_text("recovered");

        let (messages, _) = run(&agent, request(dir.path(), "hi")).await;

        assert_eq!(provider.requests().len(), 2);
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_does_not_spend_an_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        provider.queue_error(LlmError::RateLimited { retry_after_secs: 1 });
        provider.queue_text("recovered");

        let mut req = request(dir.path(), "hi");
        req.profile.max_iterations = 1;
        let (messages, events) = run(&agent, req).await;

        assert_eq!(provider.requests().len(), 2);
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[1],
            ConversationMessage::Assistant(c) if c.text.as_deref() == Some("recovered")
        ));
        assert!(logs(&events, LogLevel::Error).is_empty());
        assert!(logs(&events, LogLevel::Warning).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_give_up_after_bounded_retries() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        for _ in 0..=MAX_PROVIDER_RETRIES {
            provider.queue_error(LlmError::NetworkError("connection reset".to_string()));
        }
        provider.queue_text("never requested");

        let (messages, events) = run(&agent, request(dir.path(), "hi")).await;

        assert_eq!(provider.requests().len(), MAX_PROVIDER_RETRIES as usize + 1);
        assert_eq!(provider.remaining(), 1);
        assert_eq!(messages.len(), 1);
        let errors = logs(&events, LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("connection reset"));
    }

    #[tokio::test]
    async fn test_stream_error_event_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        provider.queue_response(vec![StreamEvent::Error {
            message: "overloaded_error: Overloaded".to_string(),
        }]);

        let (messages, events) = run(&agent, request(dir.path(), "hi")).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(logs(&events, LogLevel::Error), vec!["overloaded_error: Overloaded".to_string()]);
    }

    #[tokio::test]
    async fn test_reasoning_and_answer_tags() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        provider.queue_response(vec![
            StreamEvent::ReasoningDelta { text: "Weighing options. ".to_string() },
            StreamEvent::TextDelta { text: "Use a map.".to_string() },
            end(FinishReason::Stop),
        ]);

        let (messages, events) = run(&agent, request(dir.path(), "which collection?")).await;

        let expected = format!("{THINKING_RESPONSE_START_TAG}Weighing options.{ANSWER_RESPONSE_START_TAG}Use a map.");
        assert!(events.iter().any(|e| matches!(e, AgentEvent::StepComplete { content, .. } if *content == expected)));
        let deltas: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::TextDelta { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec![ANSWER_RESPONSE_START_TAG, "Use a map."]);
        assert!(matches!(
            &messages[1],
            ConversationMessage::Assistant(c) if c.reasoning.as_deref() == Some("Weighing options. ")
        ));
    }

    #[tokio::test]
    async fn test_bare_tool_name_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let (agent, provider, _) = harness(vec![]);
        provider.queue_tool_call("call_1", "file_read", r#"{"filePath":"a.txt"}"#);
        provider.queue_tool_call("call_2", "read_everything", "{}");
        provider.queue_text("done");

        let (messages, _) = run(&agent, request(dir.path(), "read a")).await;

        match (&messages[1], &messages[2]) {
            (ConversationMessage::Assistant(c), ConversationMessage::ToolResult(r)) => {
                assert_eq!(c.tool_calls[0].name, "power---file_read");
                assert!(r.content.contains("alpha"));
            }
            other => panic!("unexpected messages {other:?}"),
        }
        match &messages[4] {
            ConversationMessage::ToolResult(r) => {
                assert!(r.content.starts_with("Tool 'read_everything' does not exist."))
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_interrupt_denies_pending_approval() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockLlmProvider::new());
        let agent = Arc::new(AgenticLoop::new(provider.clone(), Arc::new(PendingPrompt)));
        provider.queue_tool_call("call_1", "power---bash", r#"{"command":"ls"}"#);
        provider.queue_text("never requested");

        let (sink, mut rx) = EventSink::channel(None);
        let handle = {
            let agent = agent.clone();
            let req = request(dir.path(), "list");
            tokio::spawn(async move { agent.run(req, sink).await })
        };
        while let Some(envelope) = rx.recv().await {
            if matches!(envelope.event, AgentEvent::ToolCallStarted { .. }) {
                break;
            }
        }
        agent.interrupt();

        let messages = handle.await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(provider.requests().len(), 1);
        let rest = drain(&mut rx);
        assert!(matches!(rest.last(), Some(AgentEvent::RunComplete { .. })));
    }

    #[tokio::test]
    async fn test_aider_tools_need_pair_programmer() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockLlmProvider::new());
        let agent = AgenticLoop::new(provider.clone(), Arc::new(ScriptedPrompt::default()))
            .with_pair_programmer(Arc::new(FakePair::default()));
        provider.queue_text("ok");

        let mut req = request(dir.path(), "hi");
        req.profile.use_aider_tools = true;
        run(&agent, req).await;

        let names = tool_names(&provider);
        assert!(names.contains(&"aider---run_prompt".to_string()));
        assert!(names.contains(&"aider---get_context_files".to_string()));
    }

    struct DocsTool;

    #[async_trait]
    impl Tool for DocsTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "Search Docs".to_string(),
                description: "Search the documentation".to_string(),
                input_schema: serde_json::json!({"type": "object", "properties": {}}),
            }
        }

        async fn execute(&self, _input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success(&ctx.call_id, "docs"))
        }
    }

    #[derive(Default)]
    struct FakeServers {
        prepared: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl ExternalTools for FakeServers {
        async fn prepare(&self, project_dir: &Path, _profile: &AgentProfile) -> anyhow::Result<()> {
            self.prepared.lock().unwrap().push(project_dir.to_path_buf());
            anyhow::bail!("docker not found")
        }

        async fn tools(&self, _profile: &AgentProfile) -> Vec<ExternalTool> {
            vec![ExternalTool {
                server_name: "Docs".to_string(),
                tool: Arc::new(DocsTool),
            }]
        }
    }

    #[tokio::test]
    async fn test_external_tools_are_namespaced() {
        let dir = tempfile::tempdir().unwrap();
        let servers = Arc::new(FakeServers::default());
        let provider = Arc::new(MockLlmProvider::new());
        let agent = AgenticLoop::new(provider.clone(), Arc::new(ScriptedPrompt::default()))
            .with_external_tools(servers.clone());
        provider.queue_text("ok");
        provider.queue_text("ok");

        let (_, events) = run(&agent, request(dir.path(), "hi")).await;
        assert!(tool_names(&provider).contains(&"docs---search_docs".to_string()));
        assert_eq!(servers.prepared.lock().unwrap().len(), 1);
        assert_eq!(
            logs(&events, LogLevel::Error),
            vec!["Error reinitializing MCP clients: docker not found".to_string()]
        );

        let mut req = request(dir.path(), "again");
        req.profile
            .tool_approvals
            .insert("Docs---Search Docs".to_string(), ToolApprovalState::Never);
        run(&agent, req).await;
        let names: Vec<String> = provider.requests()[1].tools.iter().map(|t| t.name.clone()).collect();
        assert!(!names.contains(&"docs---search_docs".to_string()));
    }

    struct DivideTool;

    #[async_trait]
    impl Tool for DivideTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "divide".to_string(),
                description: "Divide a by b".to_string(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                }),
            }
        }

        async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            let a = input["a"].as_f64().unwrap_or_default();
            let b = input["b"].as_f64().unwrap_or_default();
            if b == 0.0 {
                return Err(ToolError::InvalidInput("division by zero".to_string()));
            }
            Ok(ToolResult::success(&ctx.call_id, format!("{}", a / b)))
        }
    }

    struct CalcServer;

    #[async_trait]
    impl ExternalTools for CalcServer {
        async fn prepare(&self, _project_dir: &Path, _profile: &AgentProfile) -> anyhow::Result<()> {
            Ok(())
        }

        async fn tools(&self, _profile: &AgentProfile) -> Vec<ExternalTool> {
            vec![ExternalTool {
                server_name: "calc".to_string(),
                tool: Arc::new(DivideTool),
            }]
        }
    }

    fn calc_harness() -> (AgenticLoop, Arc<MockLlmProvider>) {
        let provider = Arc::new(MockLlmProvider::new());
        let agent = AgenticLoop::new(provider.clone(), Arc::new(ScriptedPrompt::default()))
            .with_external_tools(Arc::new(CalcServer));
        (agent, provider)
    }

    #[tokio::test]
    async fn test_failed_call_is_rerun_with_corrected_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider) = calc_harness();
        provider.queue_tool_call("call_1", "calc---divide", r#"{"a":6,"b":0}"#);
        // The model's answer to the replayed failure.
        provider.queue_tool_call("call_1", "calc---divide", r#"{"a":6,"b":3}"#);
        provider.queue_text("6 / 3 = 2");

        let (messages, events) = run(&agent, request(dir.path(), "divide 6 by 3")).await;

        assert_eq!(provider.requests().len(), 3);
        let replayed = &provider.requests()[1].messages;
        assert!(matches!(
            replayed.last(),
            Some(ConversationMessage::ToolResult(r)) if r.is_error && r.content.contains("division by zero")
        ));

        match (&messages[1], &messages[2]) {
            (ConversationMessage::Assistant(c), ConversationMessage::ToolResult(r)) => {
                assert_eq!(c.tool_calls[0].input, serde_json::json!({"a": 6, "b": 3}));
                assert_eq!(r.tool_call_id, "call_1");
                assert!(!r.is_error);
                assert_eq!(r.content, "2");
            }
            other => panic!("unexpected messages {other:?}"),
        }
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolResult { tool, result, .. } if tool == "divide" && result == "2"
        )));
        assert_eq!(messages.len(), 4);
    }

    #[tokio::test]
    async fn test_repair_naming_another_tool_keeps_the_error() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider) = calc_harness();
        provider.queue_tool_call("call_1", "calc---divide", r#"{"a":6,"b":0}"#);
        provider.queue_tool_call("call_1", "power---file_read", r#"{"filePath":"math.txt"}"#);
        provider.queue_text("Cannot divide by zero.");

        let (messages, _) = run(&agent, request(dir.path(), "divide 6 by 0")).await;

        assert_eq!(provider.requests().len(), 3);
        match (&messages[1], &messages[2]) {
            (ConversationMessage::Assistant(c), ConversationMessage::ToolResult(r)) => {
                assert_eq!(c.tool_calls[0].name, "calc---divide");
                assert_eq!(c.tool_calls[0].input, serde_json::json!({"a": 6, "b": 0}));
                assert!(r.is_error);
                assert!(r.content.contains("division by zero"));
            }
            other => panic!("unexpected messages {other:?}"),
        }
    }

    fn reviewer() -> SubagentConfig {
        SubagentConfig {
            id: "reviewer".to_string(),
            name: "Reviewer".to_string(),
            description: "Reviews code changes.".to_string(),
            system_prompt: "You are the reviewer.".to_string(),
            invocation_mode: desk_core::InvocationMode::Automatic,
            enabled: true,
            profile: AgentProfile::default(),
        }
    }

    #[tokio::test]
    async fn test_run_task_delegates_to_nested_run() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        let agent = agent.with_subagents(vec![reviewer()]);
        provider.queue_tool_call(
            "call_1",
            "subagents---run_task",
            r#"{"subagentId":"reviewer","prompt":"Review lib.rs"}"#,
        );
        provider.queue_text("Looks good.");
        provider.queue_text("The reviewer approved lib.rs.");

        let (sink, mut rx) = EventSink::channel(None);
        let messages = agent.run(request(dir.path(), "Get lib.rs reviewed"), sink).await;
        let mut envelopes = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            envelopes.push(envelope);
        }

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].tools.iter().any(|t| t.name == "subagents---run_task"));
        let nested = &requests[1];
        assert_eq!(nested.system_prompt.as_deref(), Some("You are the reviewer."));
        assert!(matches!(nested.messages.last(), Some(ConversationMessage::User(t)) if t == "Review lib.rs"));
        assert!(nested.tools.iter().all(|t| !t.name.starts_with("subagents---") && !t.name.starts_with("todo---")));

        assert_eq!(messages.len(), 4);
        match &messages[2] {
            ConversationMessage::ToolResult(r) => {
                assert!(!r.is_error);
                let value: Value = serde_json::from_str(&r.content).unwrap();
                let nested_messages = value["messages"].as_array().unwrap();
                assert_eq!(nested_messages.len(), 2);
                assert!(r.content.contains("Looks good."));
            }
            other => panic!("unexpected message {other:?}"),
        }

        let completions: Vec<_> = envelopes
            .iter()
            .filter(|e| matches!(e.event, AgentEvent::RunComplete { .. }))
            .map(|e| e.group.clone())
            .collect();
        assert_eq!(completions, vec![Some("Reviewer".to_string()), None]);
    }

    #[tokio::test]
    async fn test_run_task_not_offered_without_subagents() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        let mut disabled = reviewer();
        disabled.enabled = false;
        let agent = agent.with_subagents(vec![disabled]);
        provider.queue_text("ok");

        run(&agent, request(dir.path(), "hi")).await;

        assert!(!tool_names(&provider).iter().any(|n| n.starts_with("subagents---")));
    }

    #[tokio::test]
    async fn test_context_precedes_history() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, provider, _) = harness(vec![]);
        provider.queue_text("ok");

        let mut req = request(dir.path(), "next question");
        req.profile.include_repo_map = true;
        req.profile.include_context_files = false;
        req.repo_map = Some("src/lib.rs".to_string());
        req.context_files = vec![ContextFile {
            path: "src/lib.rs".to_string(),
            read_only: false,
        }];
        req.history = vec![
            ConversationMessage::user("first question"),
            ConversationMessage::assistant("first answer"),
        ];
        run(&agent, req).await;

        let sent = &provider.requests()[0].messages;
        assert_eq!(sent.len(), 7);
        assert!(matches!(&sent[0], ConversationMessage::User(t) if t == "src/lib.rs"));
        assert!(matches!(&sent[2], ConversationMessage::User(t) if t.contains("- src/lib.rs")));
        assert!(matches!(&sent[4], ConversationMessage::User(t) if t == "first question"));
        assert!(matches!(&sent[6], ConversationMessage::User(t) if t == "next question"));
    }
}
