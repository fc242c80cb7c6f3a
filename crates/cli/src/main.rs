//! Folio CLI — the main entry point.
//!
//! Commands:
//! - `run`    — Run one task against a LaTeX project and print the event stream
//! - `config` — Print the default configuration (or its path)
//! - `check`  — Load and validate configuration, report what a run would use

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "folio",
    about = "Folio — a tool-using LLM agent for LaTeX projects",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.folio/config.toml
    #[arg(long, global = true, env = "FOLIO_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single task
    Run {
        /// The instruction for the agent
        #[arg(short, long)]
        message: String,

        /// Project directory the tools operate in
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Override limits.max_iterations
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Do not offer this tool to the model (repeatable)
        #[arg(long = "disable-tool", value_name = "NAME")]
        disable_tools: Vec<String>,

        /// Do not offer spawn_agent
        #[arg(long)]
        no_subagents: bool,

        /// Replace the default system prompt
        #[arg(long)]
        system: Option<String>,
    },

    /// Print the default configuration
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,
    },

    /// Validate configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only the event stream
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            message,
            project,
            json,
            max_iterations,
            disable_tools,
            no_subagents,
            system,
        } => {
            let options = commands::run::RunOptions {
                message,
                project,
                json,
                max_iterations,
                disable_tools,
                subagents: !no_subagents,
                system,
            };
            commands::run::run(cli.config.as_deref(), options).await?
        }
        Commands::Config { path } => commands::config_cmd::run(path)?,
        Commands::Check => commands::check::run(cli.config.as_deref())?,
    }

    Ok(())
}
