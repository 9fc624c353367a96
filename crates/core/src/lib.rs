pub mod config;
pub mod env;
pub mod error;
pub mod tools;

pub use config::{AgentProfile, InvocationMode, McpServerConfig, SubagentConfig, ToolApprovalState};
pub use error::*;
