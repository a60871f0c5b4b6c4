use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

/// Which wire dialect the inference server speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ollama native API (`/api/chat`)
    Ollama,
    /// OpenAI-compatible server, e.g. llama-cpp-python or llama-server (`/v1/chat/completions`)
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub backend: BackendKind,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
            request_timeout_secs: 300,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            api_key: None,
        }
    }
}

/// Loop flavour the agent runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// `|Thought:| / |Action:| / |Final Answer:|` text protocol
    Text,
    /// Plan first, then native tool calling
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SafeguardMode {
    /// Run every command as suggested
    Off,
    /// Refuse commands matching the unsafe-pattern list
    Patterns,
    /// Pattern list, then ask the model whether the command is irreversible
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub mode: AgentMode,
    pub max_steps: usize,
    pub stream: bool,
    pub safeguard: SafeguardMode,
    pub verify_final_answer: bool,
    pub show_context: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: AgentMode::Text,
            max_steps: 10,
            stream: true,
            safeguard: SafeguardMode::Model,
            verify_final_answer: true,
            show_context: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub shell_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());
        Self::load(&format!("config/{}", config_env))
    }

    /// Layer built-in defaults, an optional config file and `APP__` environment overrides
    pub fn load(file: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::with_name(file).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
