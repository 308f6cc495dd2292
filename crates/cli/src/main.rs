use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tac_config::Config;
use tac_core::codebase;
use tac_core::source_tree::create_source_tree;
use tac_core::{Orchestrator, Processor, ProtoBlock, TrustRegistry};

#[derive(Parser)]
#[command(name = "tac", about = "Agentic coding harness: plan, implement, verify, integrate", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (defaults to the current directory)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Config overrides, e.g. --set git.enabled=false
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Implement a task as a single change attempt with retries
    Make {
        /// The task instructions
        task: String,
        /// Run a previously saved protoblock file instead of planning
        #[arg(long)]
        protoblock: Option<PathBuf>,
    },
    /// Split a large task into ordered steps and run them in sequence
    Orchestrate {
        /// The task instructions
        task: String,
    },
    /// Show the effective configuration
    Config,
}

fn parse_overrides(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| anyhow::anyhow!("Invalid override '{entry}', expected KEY=VALUE"))
        })
        .collect()
}

async fn build_codebase_view(config: &Config, root: &std::path::Path) -> Result<String> {
    if !config.general.use_file_summaries {
        return codebase::gather_digest(root);
    }

    tracing::info!("Refreshing file summaries");
    let mut store = codebase::SummaryStore::load(root);
    match tac_provider::LlmClient::new(tac_config::LlmRole::Weak, config) {
        Ok(llm) => {
            let summarizer =
                codebase::Summarizer::new(llm, config.general.summarizer_timeout);
            match summarizer.update(root, &mut store).await {
                Ok(updated) if updated > 0 => {
                    tracing::info!(updated, "File summaries refreshed");
                    if let Err(e) = store.save(root) {
                        tracing::warn!(error = %e, "Could not persist summary cache");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Summary refresh failed, using raw content"),
            }
        }
        Err(e) => tracing::warn!(error = %e, "Weak LLM unavailable, using raw content"),
    }
    codebase::summary_digest(root, &store)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let project_root = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    std::env::set_current_dir(&project_root)?;

    let mut config = Config::load(&project_root)?;
    config.apply_overrides(&parse_overrides(&cli.overrides)?)?;

    // The registry is built once at startup and read-only afterwards.
    let registry = TrustRegistry::standard();

    match cli.command {
        Commands::Make { task, protoblock } => {
            let input_protoblock = match protoblock {
                Some(path) => Some(ProtoBlock::load(&path)?),
                None => None,
            };
            let codebase_view = build_codebase_view(&config, &project_root).await?;
            let source_tree = create_source_tree(&config, &project_root);
            let mut processor =
                Processor::from_config(&config, project_root.clone(), source_tree)?;

            // Ctrl-C aborts the in-flight attempt; dropping the future kills
            // the coding subprocess, then pending writes are rolled back.
            let mut interrupted = false;
            let ok = tokio::select! {
                result = processor.run(&task, &codebase_view, input_protoblock, &registry) => {
                    result?
                }
                _ = tokio::signal::ctrl_c() => {
                    interrupted = true;
                    false
                }
            };
            if interrupted {
                tracing::error!(
                    kind = %tac_core::FailureKind::UserAbort,
                    "Interrupted; rolling back pending changes"
                );
                processor.source_tree_mut().revert_changes();
            }
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Orchestrate { task } => {
            let source_tree = create_source_tree(&config, &project_root);
            let processor = Processor::from_config(&config, project_root.clone(), source_tree)?;
            let mut orchestrator =
                Orchestrator::from_config(&config, project_root.clone(), processor)?;
            let ok = tokio::select! {
                result = orchestrator.execute(&task, &registry) => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::error!("Interrupted; completed steps remain on the feature branch");
                    false
                }
            };
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
