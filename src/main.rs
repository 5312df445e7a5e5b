use clap::{Parser, Subcommand};
use pipeline_shell::config::{loader::load_config, DiagnosticPolicy, ShellConfig};
use pipeline_shell::pipeline::{PipelineState, StageRunner};
use pipeline_shell::server::ShellServer;
use pipeline_shell::subprocess::SubprocessManager;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, trace};
use tracing_subscriber::EnvFilter;

/// Step through an external data-processing pipeline, one view per module
#[derive(Parser)]
#[command(name = "pipeline-shell", version)]
#[command(about = "Step-by-step shell for external data-processing pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Application directory holding the views, stages and transfer file
    #[arg(long, global = true)]
    app_dir: Option<PathBuf>,

    /// Path to an additional configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the module views and the message channel
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        bind: Option<IpAddr>,
    },
    /// Run a single stage against module 0 and print its result
    Exec {
        /// Stage file name inside the stage directory
        stage: String,

        /// Stage argument as JSON text
        args: String,

        /// How diagnostic output is judged
        #[arg(long, value_enum)]
        diagnostic_policy: Option<DiagnosticPolicy>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .init();

    debug!("pipeline-shell started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match load_config(cli.app_dir.as_deref(), cli.config.as_deref()).await {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, mut config: ShellConfig) -> anyhow::Result<()> {
    match command {
        Commands::Serve { port, bind } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            let server = Arc::new(ShellServer::new(config, SubprocessManager::production()));
            server.start().await?;
            Ok(())
        }
        Commands::Exec {
            stage,
            args,
            diagnostic_policy,
        } => {
            if let Some(policy) = diagnostic_policy {
                config.diagnostic_policy = policy;
            }
            run_exec(config, &stage, &args).await
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_exec(config: ShellConfig, stage: &str, args: &str) -> anyhow::Result<()> {
    let runner = StageRunner::new(Arc::new(config), SubprocessManager::production());
    let state = tokio::sync::Mutex::new(PipelineState::new());

    let result = runner.execute(&state, stage, args).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
