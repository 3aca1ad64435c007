use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "trade-guard")]
#[command(about = "Trade lifecycle risk management engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file through a paper trading session
    Simulate {
        /// Scenario TOML file (intent plus price path)
        #[arg(short, long)]
        scenario: String,
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Print events as JSON lines instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Load and validate the configuration, printing the effective values
    CheckConfig {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Simulate {
            scenario,
            config,
            json,
        } => {
            commands::run_simulate(&scenario, &config, json).await?;
        }
        Commands::CheckConfig { config } => {
            commands::run_check_config(&config)?;
        }
    }

    Ok(())
}
