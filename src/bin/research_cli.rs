//! research-cli：研究助手生成编排的命令行演示工具
//!
//! Usage:
//!   research-cli generate <prompt> [--config <path>] [--effort low|medium|high] [--model <id>]
//!   research-cli stream <prompt> [--config <path>] [--effort ...]
//!   research-cli agent <prompt> [--config <path>] [--max-iterations <n>]
//!   research-cli validate [--config <path>]

use std::io::Write;
use std::sync::Arc;

use ai_research_runtime::config::ProviderConfig;
use ai_research_runtime::progress::ProgressUpdate;
use ai_research_runtime::{
    EffortLevel, FnTool, OrchestratorConfig, ProviderKind, ResearchClient,
    ResearchClientBuilder, ToolDefinition,
};
use anyhow::{anyhow, bail, Context};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "generate" => cmd_generate(&args[2..]).await,
        "stream" => cmd_stream(&args[2..]).await,
        "agent" => cmd_agent(&args[2..]).await,
        "validate" => cmd_validate(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("research-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"research-cli: 研究助手生成编排命令行工具

USAGE:
    research-cli <COMMAND> [OPTIONS]

COMMANDS:
    generate <prompt>     Single-shot generation through the fallback chain
    stream <prompt>       Stream a response chunk by chunk
    agent <prompt>        Run the tool loop with a demo `word_count` tool
    validate              Validate the configuration file
    version               Show version information
    help                  Show this help message

OPTIONS:
    --config <path>       Configuration file (YAML or .json); default research.yaml
    --mock                Ignore the config file and use a local echo provider
    --effort <level>      low | medium | high (default medium)
    --model <id>          Model, optionally pinned as <provider>/<model>
    --max-iterations <n>  Tool loop bound for `agent`

ENVIRONMENT:
    RESEARCH_CONFIG       Configuration file path
    RUST_LOG              Log filter (default info)"#
    );
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// First argument that is neither a flag nor a flag value.
fn positional(args: &[String]) -> Option<&str> {
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
            continue;
        }
        if arg == "--mock" {
            continue;
        }
        if arg.starts_with("--") {
            skip = true;
            continue;
        }
        return Some(arg.as_str());
    }
    None
}

fn effort(args: &[String]) -> anyhow::Result<EffortLevel> {
    match flag(args, "--effort").unwrap_or("medium") {
        "low" => Ok(EffortLevel::Low),
        "medium" => Ok(EffortLevel::Medium),
        "high" => Ok(EffortLevel::High),
        other => bail!("unknown effort level '{other}'"),
    }
}

fn config_path(args: &[String]) -> String {
    flag(args, "--config")
        .map(str::to_string)
        .or_else(|| std::env::var("RESEARCH_CONFIG").ok())
        .unwrap_or_else(|| "research.yaml".to_string())
}

fn load_config(args: &[String]) -> anyhow::Result<OrchestratorConfig> {
    if args.iter().any(|a| a == "--mock") {
        return Ok(OrchestratorConfig::default().with_provider(ProviderConfig::new(
            "local",
            ProviderKind::Mock,
            "echo",
        )));
    }
    let path = config_path(args);
    OrchestratorConfig::from_path(&path).with_context(|| format!("loading {path}"))
}

fn builder(args: &[String]) -> anyhow::Result<ResearchClientBuilder> {
    let config = load_config(args)?;
    Ok(ResearchClientBuilder::from_config(&config)?)
}

fn prompt(args: &[String]) -> anyhow::Result<&str> {
    positional(args).ok_or_else(|| anyhow!("missing <prompt>"))
}

/// Cancel the invocation on Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    cancel
}

async fn cmd_generate(args: &[String]) -> anyhow::Result<()> {
    let client = builder(args)?.build()?;
    let out = client
        .generate_text(
            prompt(args)?,
            flag(args, "--model"),
            effort(args)?,
            Some(|u: &ProgressUpdate| eprintln!("… {}", u.message)),
            &ctrl_c_token(),
        )
        .await?;
    println!("{}", out.text);
    for source in &out.sources {
        println!("  [{}] {}", source.title.as_deref().unwrap_or("source"), source.url);
    }
    Ok(())
}

async fn cmd_stream(args: &[String]) -> anyhow::Result<()> {
    let client = builder(args)?.build()?;
    let mut failure = None;
    client
        .stream_response(
            prompt(args)?,
            effort(args)?,
            |chunk| {
                print!("{}", chunk.text);
                let _ = std::io::stdout().flush();
            },
            |summary| println!("\n[{} chunks from {}]", summary.chunk_count, summary.provider),
            |c| failure = Some(c),
            None,
            None,
            ctrl_c_token(),
        )
        .await;
    match failure {
        Some(c) => match c.remediation {
            Some(hint) => bail!("{}: {} ({hint})", c.kind, c.message),
            None => bail!("{}: {}", c.kind, c.message),
        },
        None => Ok(()),
    }
}

async fn cmd_agent(args: &[String]) -> anyhow::Result<()> {
    let word_count = ToolDefinition::new("word_count")
        .with_description("Count the words in a text")
        .with_parameters(json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        }));
    let executor = FnTool::new(|args: serde_json::Value| async move {
        let text = args.get("text").and_then(|t| t.as_str()).unwrap_or_default();
        Ok::<_, ai_research_runtime::Error>(json!({ "words": text.split_whitespace().count() }))
    });

    let client: ResearchClient = builder(args)?
        .with_tool(word_count, Arc::new(executor))?
        .build()?;
    let max_iterations = flag(args, "--max-iterations")
        .map(|v| v.parse::<u32>())
        .transpose()
        .context("--max-iterations must be a number")?;

    let out = client
        .generate_response_with_tools(
            prompt(args)?,
            Vec::new(),
            effort(args)?,
            None,
            None,
            max_iterations,
            &ctrl_c_token(),
        )
        .await?;
    println!("{}", out.text);
    eprintln!(
        "[{} round(s), {} tool call(s){}]",
        out.iteration_count,
        out.tool_calls.len(),
        if out.bound_exhausted { ", bound reached" } else { "" }
    );
    for entry in client.execution_history() {
        eprintln!(
            "  {} {} -> {}",
            entry.tool_name,
            entry.arguments,
            if entry.success { "ok" } else { "failed" }
        );
    }
    Ok(())
}

fn cmd_validate(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    println!("Configuration OK: {} provider(s)", config.providers.len());
    for (i, p) in config.providers.iter().enumerate() {
        println!(
            "  {}. {:<12} {:<10} {}{}",
            i + 1,
            p.id,
            p.kind.to_string(),
            p.model,
            if p.enabled { "" } else { " (disabled)" }
        );
    }
    Ok(())
}
