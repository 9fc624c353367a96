//! Progress events emitted by an agent run.
//!
//! Every callback of a run funnels into one tagged event stream. Consumers
//! read it from the receiver returned by [`EventSink::channel`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::usage::UsageReport;

pub const THINKING_RESPONSE_START_TAG: &str = "---\n► **THINKING**\n";
pub const ANSWER_RESPONSE_START_TAG: &str = "---\n► **ANSWER**\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Streamed answer text for the in-flight response.
    TextDelta { response_id: String, text: String },
    /// Streamed reasoning text for the in-flight response.
    ReasoningDelta { response_id: String, text: String },
    /// A tool executor started; emitted before approval.
    ToolCallStarted {
        call_id: String,
        group: String,
        tool: String,
        args: Value,
    },
    ToolResult {
        call_id: String,
        group: String,
        tool: String,
        args: Value,
        result: String,
        usage: Option<UsageReport>,
    },
    /// A model step finished. `sequence` orders sibling responses.
    StepComplete {
        sequence: u64,
        response_id: String,
        content: String,
        usage: Option<UsageReport>,
    },
    Log { level: LogLevel, message: String },
    /// Transient status line; `None` clears it.
    Loading { message: Option<String> },
    /// Terminal marker, sent exactly once per run.
    RunComplete { response_id: String },
}

/// An event together with the prompt context it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub group: Option<String>,
    pub event: AgentEvent,
}

/// Cloneable sender side of a run's event stream.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EventEnvelope>,
    group: Option<String>,
    sequence: Arc<AtomicU64>,
}

impl EventSink {
    pub fn channel(group: Option<String>) -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                group,
                sequence: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// A sink on the same stream that tags its events with `group`. The
    /// sequence counter stays shared, so nested runs order with their parent.
    pub fn with_group(&self, group: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            group: Some(group.into()),
            sequence: self.sequence.clone(),
        }
    }

    /// A sink whose events are discarded.
    pub fn disconnected() -> Self {
        Self::channel(None).0
    }

    pub fn emit(&self, event: AgentEvent) {
        // A closed receiver means nobody is listening; the run continues regardless.
        let _ = self.tx.send(EventEnvelope {
            group: self.group.clone(),
            event,
        });
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(AgentEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub fn loading(&self, message: Option<&str>) {
        self.emit(AgentEvent::Loading {
            message: message.map(String::from),
        });
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}

/// Releases completed-response events in sequence order; every other
/// event passes straight through.
///
/// Sibling runs sharing a sink may finish out of order, so a step that
/// arrives ahead of its predecessors is held until they have been released.
#[derive(Debug, Default)]
pub struct CompletedOrder {
    next: u64,
    held: BTreeMap<u64, AgentEvent>,
}

impl CompletedOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events ready for display after `event` arrived.
    pub fn push(&mut self, event: AgentEvent) -> Vec<AgentEvent> {
        let sequence = match &event {
            AgentEvent::StepComplete { sequence, .. } => *sequence,
            _ => return vec![event],
        };
        if sequence < self.next {
            return vec![event];
        }
        self.held.insert(sequence, event);

        let mut ready = Vec::new();
        while let Some(event) = self.held.remove(&self.next) {
            ready.push(event);
            self.next += 1;
        }
        ready
    }

    /// Everything still held, in sequence order.
    pub fn flush(&mut self) -> Vec<AgentEvent> {
        if let Some(last) = self.held.keys().next_back() {
            self.next = last + 1;
        }
        std::mem::take(&mut self.held).into_values().collect()
    }
}
