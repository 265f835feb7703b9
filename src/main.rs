use clap::{Parser, Subcommand};
use news_dedup::commands::{init_config, run_pipeline, show_config, show_status};

#[derive(Parser)]
#[command(name = "news-dedup")]
#[command(about = "A deduplication and classification pipeline for news records")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pipeline batch over pending raw records
    Run {
        /// Override the configured fetch limit for this run
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show per-status record counts
    Status,
    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { limit } => {
            run_pipeline(limit).await?;
        }
        Commands::Status => {
            show_status().await?;
        }
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                init_config()?;
            }
        }
    }

    Ok(())
}
