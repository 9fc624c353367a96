//! OpenAI-compatible chat-completions implementation of [`ToolAwareLlmProvider`].
//!
//! One provider serves OpenAI itself, the routers that speak its wire
//! format (OpenRouter, Requesty) and Gemini's compatible endpoint. They differ in base URL, default model and
//! where usage metadata lands; see [`OpenAiFlavor`].
//!
//! [`ToolAwareLlmProvider`]: desk_tool_runtime::ToolAwareLlmProvider

mod sse;
mod streaming;
mod translate;

pub use self::streaming::{OpenAiCompatibleProvider, OpenAiFlavor};
