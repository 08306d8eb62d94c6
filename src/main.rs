//! Thin CLI over the analysis engine: read a diff, run it, print
//! markdown or JSON. All engine behavior lives in the library.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use diffsense::config::EngineConfig;
use diffsense::engine::{ConsensusOutcome, ContextOptions, Engine, ExecutionMode, ModeFlags, RunOutcome};
use diffsense::provider::{build_capability, ModelCapability, ProviderKind};
use diffsense::report;

#[derive(Parser)]
#[command(name = "diffsense")]
#[command(about = "Analyze a code change set with bounded, self-refining model workflows")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a diffsense.toml config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single-backend analysis (or emit a prompt plan).
    Analyze {
        /// Diff file; reads stdin when omitted.
        #[arg(long)]
        diff: Option<PathBuf>,

        /// Change-set title.
        #[arg(long)]
        title: Option<String>,

        /// Emit a prompt plan instead of invoking a model.
        #[arg(long)]
        prompt_only: bool,

        /// Provider for execute mode.
        #[arg(long, value_enum, default_value = "anthropic")]
        provider: ProviderArg,

        /// Model name override.
        #[arg(long)]
        model: Option<String>,

        /// Skip the model risk pass.
        #[arg(long)]
        no_risks: bool,

        /// Skip summary generation.
        #[arg(long)]
        no_summary: bool,

        /// Print JSON instead of markdown.
        #[arg(long)]
        json: bool,
    },
    /// Fan the analysis out to the configured consensus backends.
    Consensus {
        #[arg(long)]
        diff: Option<PathBuf>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ProviderArg {
    Anthropic,
    Gemini,
    Openai,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Anthropic => ProviderKind::Anthropic,
            ProviderArg::Gemini => ProviderKind::Gemini,
            ProviderArg::Openai => ProviderKind::OpenAi,
        }
    }
}

fn read_diff(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
        }
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading diff from stdin")?;
            Ok(buffer)
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

fn execute_capability(
    config: &EngineConfig,
    provider: ProviderKind,
    model: Option<String>,
) -> Option<Arc<dyn ModelCapability>> {
    let api_key = std::env::var(provider.env_key()).ok().filter(|k| !k.is_empty())?;
    let model = model.unwrap_or_else(|| provider.default_model().to_string());
    Some(build_capability(
        provider,
        format!("{}-cli", provider.label()),
        api_key,
        model,
        Duration::from_secs(config.limits.request_timeout_secs),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Analyze {
            diff,
            title,
            prompt_only,
            provider,
            model,
            no_risks,
            no_summary,
            json,
        } => {
            let diff_text = read_diff(diff.as_ref())?;
            let flags = ModeFlags {
                summary: !no_summary,
                risks: !no_risks,
                complexity: true,
            };

            let capability = if prompt_only {
                None
            } else {
                execute_capability(&config, provider.into(), model)
            };
            let mode = if prompt_only || capability.is_none() {
                ExecutionMode::PromptOnly
            } else {
                ExecutionMode::Execute
            };

            let engine = Engine::new(config, capability);
            let opts = ContextOptions {
                mode: Some(mode),
                ..Default::default()
            };
            let outcome = engine.run(&diff_text, title, flags, &opts).await?;

            match outcome {
                RunOutcome::Completed(result) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    } else {
                        println!("{}", report::result_to_markdown(&result));
                    }
                }
                RunOutcome::Planned(plan) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&plan)?);
                    } else {
                        println!("{}", report::plan_to_markdown(&plan));
                    }
                }
            }
        }
        Commands::Consensus { diff, title, json } => {
            let diff_text = read_diff(diff.as_ref())?;
            // With zero configured backends this falls back to a plain
            // single-backend run, so a default capability is needed.
            let capability = execute_capability(&config, ProviderKind::Anthropic, None);
            let engine = Engine::new(config, capability);
            let outcome = engine
                .run_consensus(&diff_text, title, ModeFlags::default(), &ContextOptions::default())
                .await?;

            match outcome {
                ConsensusOutcome::Aggregated(consensus) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&consensus)?);
                    } else {
                        println!("{}", report::consensus_to_markdown(&consensus));
                    }
                }
                ConsensusOutcome::Single(result) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    } else {
                        println!("{}", report::result_to_markdown(&result));
                    }
                }
            }
        }
    }

    Ok(())
}
