//! Tool approval gate.
//!
//! Decides whether a requested tool call may execute, consulting in order the
//! profile's auto-approve switch, the run-scoped approvals, the persisted
//! per-tool state and finally the user.

use async_trait::async_trait;
use desk_core::ToolApprovalState;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A question put to the human operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalQuestion {
    /// Canonical tool id or another stable question key.
    pub key: String,
    pub text: String,
    pub subject: Option<String>,
    pub default_answer: String,
    pub choices: Vec<ApprovalChoice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalChoice {
    pub label: String,
    pub shortkey: String,
}

/// The operator's reply: the chosen shortkey and optional free text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptAnswer {
    pub answer: String,
    pub user_input: Option<String>,
}

impl PromptAnswer {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            user_input: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    /// Denied, with whatever the user typed as a reason.
    Denied(Option<String>),
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::Approved)
    }
}

/// Where questions are shown and answered (terminal, UI, test script).
#[async_trait]
pub trait PromptSurface: Send + Sync {
    async fn ask(&self, question: ApprovalQuestion) -> PromptAnswer;
}

/// Persisted per-tool approval states.
pub trait ApprovalStore: Send + Sync {
    fn state(&self, key: &str) -> Option<ToolApprovalState>;

    /// Record a state for future runs.
    fn persist(&self, key: &str, state: ToolApprovalState) -> anyhow::Result<()>;
}

/// Approval states held in memory only, seeded from a profile.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    states: RwLock<BTreeMap<String, ToolApprovalState>>,
}

impl InMemoryApprovalStore {
    pub fn new(states: BTreeMap<String, ToolApprovalState>) -> Self {
        Self {
            states: RwLock::new(states),
        }
    }
}

impl ApprovalStore for InMemoryApprovalStore {
    fn state(&self, key: &str) -> Option<ToolApprovalState> {
        self.states.read().ok()?.get(key).copied()
    }

    fn persist(&self, key: &str, state: ToolApprovalState) -> anyhow::Result<()> {
        self.states
            .write()
            .map_err(|_| anyhow::anyhow!("approval store lock poisoned"))?
            .insert(key.to_string(), state);
        Ok(())
    }
}

/// Decides tool executions for one run.
///
/// Shared by every executor of the run; concurrent calls may wait on
/// the prompt surface independently.
pub struct ApprovalGate {
    auto_approve: bool,
    store: Arc<dyn ApprovalStore>,
    prompt: Arc<dyn PromptSurface>,
    approved_for_run: Mutex<HashSet<String>>,
    cancel: CancellationToken,
}

impl ApprovalGate {
    pub fn new(
        auto_approve: bool,
        store: Arc<dyn ApprovalStore>,
        prompt: Arc<dyn PromptSurface>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            auto_approve,
            store,
            prompt,
            approved_for_run: Mutex::new(HashSet::new()),
            cancel,
        }
    }

    /// Stored state for a key, `Always` when unset.
    pub fn state(&self, key: &str) -> ToolApprovalState {
        self.store.state(key).unwrap_or(ToolApprovalState::Always)
    }

    fn is_approved_for_run(&self, key: &str) -> bool {
        self.approved_for_run
            .lock()
            .map(|set| set.contains(key))
            .unwrap_or(false)
    }

    fn approve_for_run(&self, key: &str) {
        if let Ok(mut set) = self.approved_for_run.lock() {
            set.insert(key.to_string());
        }
    }

    pub async fn decide(&self, key: &str, text: &str, subject: Option<&str>) -> ApprovalDecision {
        if self.auto_approve {
            return ApprovalDecision::Approved;
        }

        if self.is_approved_for_run(key) || self.state(key) == ToolApprovalState::Always {
            return ApprovalDecision::Approved;
        }

        let question = ApprovalQuestion {
            key: key.to_string(),
            text: text.to_string(),
            subject: subject.map(String::from),
            default_answer: "y".to_string(),
            choices: vec![
                choice("(Y)es", "y"),
                choice("(N)o", "n"),
                choice("(A)lways", "a"),
                choice("Always for This (R)un", "r"),
            ],
        };

        let reply = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(key, "Approval prompt cancelled");
                return ApprovalDecision::Denied(None);
            }
            reply = self.prompt.ask(question) => reply,
        };

        match reply.answer.as_str() {
            "r" => {
                self.approve_for_run(key);
                ApprovalDecision::Approved
            }
            "a" => {
                if let Err(e) = self.store.persist(key, ToolApprovalState::Always) {
                    warn!(key, error = %e, "Failed to persist approval");
                }
                ApprovalDecision::Approved
            }
            "y" => ApprovalDecision::Approved,
            _ => ApprovalDecision::Denied(reply.user_input),
        }
    }
}

fn choice(label: &str, shortkey: &str) -> ApprovalChoice {
    ApprovalChoice {
        label: label.to_string(),
        shortkey: shortkey.to_string(),
    }
}

/// Prompt surfaces for tests and non-interactive use.
#[cfg(any(test, feature = "test-utils"))]
pub mod scripted {
    use super::*;
    use std::collections::VecDeque;

    /// Replays queued answers in order and records every question asked.
    /// Answers `n` once the queue is empty.
    #[derive(Default)]
    pub struct ScriptedPrompt {
        answers: Mutex<VecDeque<PromptAnswer>>,
        asked: Mutex<Vec<ApprovalQuestion>>,
    }

    impl ScriptedPrompt {
        pub fn new(answers: impl IntoIterator<Item = PromptAnswer>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().collect()),
                asked: Mutex::new(Vec::new()),
            }
        }

        pub fn asked(&self) -> Vec<ApprovalQuestion> {
            self.asked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PromptSurface for ScriptedPrompt {
        async fn ask(&self, question: ApprovalQuestion) -> PromptAnswer {
            self.asked.lock().unwrap().push(question);
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| PromptAnswer::new("n"))
        }
    }

    /// Never answers; used to exercise cancellation.
    pub struct PendingPrompt;

    #[async_trait]
    impl PromptSurface for PendingPrompt {
        async fn ask(&self, _question: ApprovalQuestion) -> PromptAnswer {
            std::future::pending().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::{PendingPrompt, ScriptedPrompt};
    use super::*;

    fn gate_with(
        auto_approve: bool,
        states: &[(&str, ToolApprovalState)],
        prompt: Arc<dyn PromptSurface>,
    ) -> (ApprovalGate, Arc<InMemoryApprovalStore>) {
        let store = Arc::new(InMemoryApprovalStore::new(
            states
                .iter()
                .map(|(k, s)| (k.to_string(), *s))
                .collect(),
        ));
        let gate = ApprovalGate::new(
            auto_approve,
            store.clone(),
            prompt,
            CancellationToken::new(),
        );
        (gate, store)
    }

    #[tokio::test]
    async fn test_auto_approve_never_prompts() {
        let prompt = Arc::new(ScriptedPrompt::default());
        let (gate, _) = gate_with(true, &[("power---bash", ToolApprovalState::Ask)], prompt.clone());

        let decision = gate.decide("power---bash", "Approve?", None).await;
        assert!(decision.is_approved());
        assert!(prompt.asked().is_empty());
    }

    #[tokio::test]
    async fn test_unset_state_approves_silently() {
        let prompt = Arc::new(ScriptedPrompt::default());
        let (gate, _) = gate_with(false, &[], prompt.clone());

        assert!(gate.decide("github---search", "Approve?", None).await.is_approved());
        assert!(prompt.asked().is_empty());
    }

    #[tokio::test]
    async fn test_ask_prompts_with_four_choices() {
        let prompt = Arc::new(ScriptedPrompt::new([PromptAnswer::new("y")]));
        let (gate, _) = gate_with(false, &[("power---bash", ToolApprovalState::Ask)], prompt.clone());

        let decision = gate
            .decide("power---bash", "Approve executing bash command?", Some("Command: ls"))
            .await;
        assert!(decision.is_approved());

        let asked = prompt.asked();
        assert_eq!(asked.len(), 1);
        assert_eq!(asked[0].default_answer, "y");
        assert_eq!(asked[0].subject.as_deref(), Some("Command: ls"));
        let keys: Vec<_> = asked[0].choices.iter().map(|c| c.shortkey.as_str()).collect();
        assert_eq!(keys, vec!["y", "n", "a", "r"]);
    }

    #[tokio::test]
    async fn test_yes_applies_to_single_call() {
        let prompt = Arc::new(ScriptedPrompt::new([PromptAnswer::new("y"), PromptAnswer::new("y")]));
        let (gate, _) = gate_with(false, &[("power---bash", ToolApprovalState::Ask)], prompt.clone());

        gate.decide("power---bash", "Approve?", None).await;
        gate.decide("power---bash", "Approve?", None).await;
        assert_eq!(prompt.asked().len(), 2);
    }

    #[tokio::test]
    async fn test_run_scoped_approval() {
        let prompt = Arc::new(ScriptedPrompt::new([PromptAnswer::new("r")]));
        let (gate, store) = gate_with(false, &[("power---bash", ToolApprovalState::Ask)], prompt.clone());

        assert!(gate.decide("power---bash", "Approve?", None).await.is_approved());
        assert!(gate.decide("power---bash", "Approve?", None).await.is_approved());
        assert_eq!(prompt.asked().len(), 1);
        assert_eq!(store.state("power---bash"), Some(ToolApprovalState::Ask));
    }

    #[tokio::test]
    async fn test_always_persists() {
        let prompt = Arc::new(ScriptedPrompt::new([PromptAnswer::new("a")]));
        let (gate, store) = gate_with(false, &[("power---bash", ToolApprovalState::Ask)], prompt.clone());

        assert!(gate.decide("power---bash", "Approve?", None).await.is_approved());
        assert_eq!(store.state("power---bash"), Some(ToolApprovalState::Always));
        assert!(gate.decide("power---bash", "Approve?", None).await.is_approved());
        assert_eq!(prompt.asked().len(), 1);
    }

    #[tokio::test]
    async fn test_denial_carries_reason() {
        let prompt = Arc::new(ScriptedPrompt::new([
            PromptAnswer::new("n").with_input("use git instead"),
        ]));
        let (gate, _) = gate_with(false, &[("power---bash", ToolApprovalState::Ask)], prompt);

        let decision = gate.decide("power---bash", "Approve?", None).await;
        assert_eq!(
            decision,
            ApprovalDecision::Denied(Some("use git instead".to_string()))
        );
    }

    #[tokio::test]
    async fn test_cancel_denies_pending_prompt() {
        let cancel = CancellationToken::new();
        let store = Arc::new(InMemoryApprovalStore::new(
            [("power---bash".to_string(), ToolApprovalState::Ask)].into(),
        ));
        let gate = Arc::new(ApprovalGate::new(
            false,
            store,
            Arc::new(PendingPrompt),
            cancel.clone(),
        ));

        let pending = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.decide("power---bash", "Approve?", None).await })
        };
        cancel.cancel();
        assert_eq!(pending.await.unwrap(), ApprovalDecision::Denied(None));
    }

    #[tokio::test]
    async fn test_concurrent_decisions() {
        let prompt = Arc::new(ScriptedPrompt::new([PromptAnswer::new("y"), PromptAnswer::new("n")]));
        let (gate, _) = gate_with(
            false,
            &[
                ("power---bash", ToolApprovalState::Ask),
                ("power---file_write", ToolApprovalState::Ask),
            ],
            prompt.clone(),
        );

        let (a, b) = tokio::join!(
            gate.decide("power---bash", "Approve bash?", None),
            gate.decide("power---file_write", "Approve write?", None),
        );
        assert_eq!(prompt.asked().len(), 2);
        assert_ne!(a.is_approved(), b.is_approved());
    }
}
