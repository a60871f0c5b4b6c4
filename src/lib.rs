//! reasonact - ReAct (Reason + Act) agent for local LLM servers
//!
//! Drives Ollama or an OpenAI-compatible server (llama-cpp-python,
//! llama-server) through a think / act / observe loop with a small set of
//! local tools, and probes how those servers report end-of-turn tokens.

pub mod agent;
pub mod config;
pub mod core;
pub mod probe;
pub mod tools;
pub mod utils;

pub mod cli;

pub use agent::{Agent, AgentEvent, AgentObserver, AgentOutcome, OutcomeStatus};
pub use config::Settings;
pub use crate::core::llm::{build_backend, ChatBackend};
pub use tools::registry::ToolRegistry;
