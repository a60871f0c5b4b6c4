use anyhow::Result;
use clap::Parser;
use colored::Color;
use reasonact::cli::{Cli, Commands, ConsoleObserver};
use reasonact::core::eog::TemplateFamily;
use reasonact::{build_backend, probe, utils, Agent, ChatBackend, Settings, ToolRegistry};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        utils::print_error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::new()?;
    cli.backend.apply(&mut settings);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let backend = build_backend(&settings.llm)?;
    let tools = ToolRegistry::with_defaults(&settings.tools);

    match cli.command {
        Commands::Run {
            query,
            mode,
            max_steps,
            no_stream,
            safeguard,
            no_verify,
            no_context,
        } => {
            let mut agent_config = settings.agent.clone();
            if let Some(mode) = mode {
                agent_config.mode = mode;
            }
            if let Some(max_steps) = max_steps {
                agent_config.max_steps = max_steps;
            }
            if let Some(safeguard) = safeguard {
                agent_config.safeguard = safeguard;
            }
            agent_config.stream &= !no_stream;
            agent_config.verify_final_answer &= !no_verify;
            agent_config.show_context &= !no_context;

            handle_run(backend, tools, agent_config, &query).await
        }
        Commands::Probe { prompt, family } => {
            handle_probe(backend.as_ref(), &tools, &prompt, family).await
        }
        Commands::Context => handle_context(backend.as_ref()).await,
        Commands::Tools => {
            handle_tools(&tools);
            Ok(())
        }
    }
}

async fn handle_run(
    backend: Arc<dyn ChatBackend>,
    tools: ToolRegistry,
    config: reasonact::config::AgentConfig,
    query: &str,
) -> Result<()> {
    let agent = Agent::new(backend, tools, config).with_observer(Arc::new(ConsoleObserver::new()));
    let outcome = agent.run(query).await?;

    utils::print_rule("Result", Color::Magenta);
    println!("{}", outcome.answer);

    if let Some(usage) = &outcome.context {
        utils::print_rule("Final Context Utilization", Color::Cyan);
        utils::print_context_usage(usage);
    }
    Ok(())
}

async fn handle_probe(
    backend: &dyn ChatBackend,
    tools: &ToolRegistry,
    prompt: &str,
    family: TemplateFamily,
) -> Result<()> {
    utils::print_info(&format!("Probing {} ...", backend.model()));
    let report = probe::run_probe(backend, tools, prompt, family).await?;

    utils::print_rule("Test 1: chat completion with tools and logprobs", Color::Blue);
    let message = &report.chat.message;
    let tool_calls = if message.tool_calls.is_empty() {
        "none".to_string()
    } else {
        serde_json::to_string_pretty(&message.tool_calls)?
    };
    utils::print_panel(
        "Message",
        &format!(
            "content: {:?}\ntool_calls: {}\nfinish_reason: {}",
            message.content, tool_calls, report.chat.finish_reason
        ),
        Color::Green,
    );
    if report.turn_end.tail_tokens.is_empty() {
        utils::print_info("No logprobs returned");
    } else {
        let tail = report
            .turn_end
            .tail_tokens
            .iter()
            .enumerate()
            .map(|(i, t)| format!("Token {}: {:?}", i, t))
            .collect::<Vec<_>>()
            .join("\n");
        utils::print_panel("Last logprob tokens", &tail, Color::Cyan);
    }

    utils::print_rule("Test 2: templated completion with stop sequences", Color::Blue);
    match &report.raw {
        Some(raw) => utils::print_panel(
            "Templated completion",
            &format!(
                "stop: {:?}\ntext: {:?}\nfinish_reason: {}",
                raw.stop, raw.completion.text, raw.completion.finish_reason
            ),
            Color::Green,
        ),
        None => utils::print_info("Templated completions are not available on this backend"),
    }

    utils::print_rule("Summary", Color::Magenta);
    for line in report.summary() {
        utils::print_success(&line);
    }
    Ok(())
}

async fn handle_context(backend: &dyn ChatBackend) -> Result<()> {
    match backend.context_window().await? {
        Some(window) => utils::print_success(&format!(
            "{}: context window {} tokens",
            backend.model(),
            window
        )),
        None => utils::print_info(&format!("{}: context window unknown", backend.model())),
    }
    Ok(())
}

fn handle_tools(tools: &ToolRegistry) {
    for metadata in tools.list_tools() {
        let params = metadata
            .parameters
            .iter()
            .map(|p| {
                let required = if p.required { "required" } else { "optional" };
                format!("{} ({}): {} [{}]", p.name, p.param_type, p.description, required)
            })
            .collect::<Vec<_>>()
            .join("\n");
        utils::print_panel(&metadata.to_string(), &params, Color::Cyan);
    }
}
