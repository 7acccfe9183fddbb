use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sls")]
#[command(about = "Log ingestion server with daily rotation and live tails", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingest server (default)
    Run,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Stream live log lines from a running server
    Tail {
        #[arg(long, default_value = "http://127.0.0.1:7200")]
        url: String,
        #[arg(long, env = "SLS_API_KEY", hide_env_values = true)]
        api_key: String,
        /// Print `{"source", "line"}` objects instead of raw lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sls=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = sls::config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            sls::cli::run::run(config_path).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                sls::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                sls::cli::config::validate(config_path.as_deref())?;
            }
        },
        Some(Commands::Tail { url, api_key, json }) => {
            sls::cli::tail::tail(&url, &api_key, json).await?;
        }
    }

    Ok(())
}
