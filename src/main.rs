use clap::{Parser, Subcommand};
use hangwatch::{Result, WatchdogConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod simulate;

#[derive(Parser)]
#[command(name = "hangwatch")]
#[command(about = "Scheduler freeze watchdog", version, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/hangwatch/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Block a simulated app's scheduler and watch the watchdog react
    Simulate {
        /// How long the simulated app blocks its scheduler
        #[arg(long, default_value_t = 12_000)]
        stall_ms: u64,
        /// Normal running time before and after the stall
        #[arg(long, default_value_t = 500)]
        settle_ms: u64,
        /// Leave the session logged in but not initialized
        #[arg(long)]
        stuck_login: bool,
    },
    /// Print the effective configuration
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<WatchdogConfig> {
    match path {
        Some(path) => WatchdogConfig::load_from(path),
        None => WatchdogConfig::load(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            stall_ms,
            settle_ms,
            stuck_login,
        } => {
            let options = simulate::SimulateOptions {
                stall: Duration::from_millis(stall_ms),
                settle: Duration::from_millis(settle_ms),
                stuck_login,
            };
            tracing::info!("Starting simulation: {:?}", options);

            let snapshot = simulate::run(config, options).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
