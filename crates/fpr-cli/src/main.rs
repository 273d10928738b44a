use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fpr-cli")]
#[command(about = "Forecast projection reconciler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one batch now and exit
    Run,
    /// Run the batch on FPR_SCHEDULE_CRON until Ctrl-C
    Schedule,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FPR_LOG_JSON")
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = fpr_sync::run_once_from_env().await?;
            println!(
                "batch complete: run_id={} entries={} persisted={} failed={}",
                summary.run_id, summary.entries, summary.persisted, summary.failed
            );
        }
        Commands::Schedule => {
            fpr_sync::run_scheduled_from_env().await?;
        }
    }

    Ok(())
}
