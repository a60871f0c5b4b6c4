mod settings;

pub use settings::{
    AgentConfig, AgentMode, BackendKind, LlmConfig, LoggingConfig, SafeguardMode, Settings,
    ToolsConfig,
};
