mod commands;
mod demo;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::demo::DemoKind;

#[derive(Parser)]
#[command(name = "flotilla")]
#[command(about = "Runtime for bus-connected agents managed by a control plane", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent until interrupted
    Run {
        /// Agent name; also the consumer group on the task topic
        #[arg(short, long, env = "AGENT_NAME")]
        name: String,

        /// Built-in behaviour to run
        #[arg(short, long, value_enum, default_value_t = DemoKind::Idle)]
        kind: DemoKind,

        /// Description reported to the control plane
        #[arg(short, long)]
        description: Option<String>,

        /// Model the agent uses (repeatable)
        #[arg(short, long = "model")]
        models: Vec<String>,
    },

    /// Publish a task on the task topic
    Submit {
        /// Task id (random if omitted)
        #[arg(long)]
        id: Option<String>,

        /// Only this agent should handle the task
        #[arg(short, long)]
        target: Option<String>,

        /// JSON object passed to the handler
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// List agents known to the control plane
    Status,

    /// Print the configuration resolved from the environment
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing; RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    match cli.command {
        Commands::Run {
            name,
            kind,
            description,
            models,
        } => {
            commands::run_cmd::run(name, kind, description, models).await?;
        }
        Commands::Submit { id, target, payload } => {
            commands::submit::run(id, target, payload).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Config => {
            commands::config_cmd::show()?;
        }
    }

    Ok(())
}
