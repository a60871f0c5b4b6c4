use crate::config::{AgentMode, BackendKind, SafeguardMode, Settings};
use crate::core::eog::TemplateFamily;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "reasonact")]
#[command(author, version, about = "ReAct agent for local LLM servers", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides for the `[llm]` settings section
#[derive(Args)]
pub struct BackendArgs {
    /// Wire dialect of the inference server
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Server base URL, e.g. http://localhost:11434
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[arg(short = 'M', long, global = true)]
    pub model: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Solve a query with the ReAct loop
    Run {
        query: String,

        #[arg(short, long)]
        mode: Option<AgentMode>,

        #[arg(long)]
        max_steps: Option<usize>,

        /// Wait for whole responses instead of streaming tokens
        #[arg(long)]
        no_stream: bool,

        #[arg(long)]
        safeguard: Option<SafeguardMode>,

        /// Skip the final-answer verification pass
        #[arg(long)]
        no_verify: bool,

        /// Hide context window utilisation
        #[arg(long)]
        no_context: bool,
    },

    /// Report how the server exposes end-of-turn tokens
    Probe {
        #[arg(short, long, default_value = crate::probe::DEFAULT_PROMPT)]
        prompt: String,

        #[arg(short, long, value_enum, default_value = "llama3")]
        family: TemplateFamily,
    },

    /// Show the model's context window size
    Context,

    /// List the tools available to the agent
    Tools,
}

impl BackendArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(backend) = self.backend {
            settings.llm.backend = backend;
        }
        if let Some(base_url) = &self.base_url {
            settings.llm.base_url = base_url.clone();
        }
        if let Some(model) = &self.model {
            settings.llm.model = model.clone();
        }
    }
}
