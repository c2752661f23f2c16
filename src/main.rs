mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, RulesAction};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => commands::version::run()?,
        Commands::Check => commands::check::run(&cli.config).await?,
        Commands::Run => commands::run::run(&cli.config).await?,
        Commands::Rules { action } => match action {
            RulesAction::Validate => commands::rules::validate(&cli.config)?,
            RulesAction::Test { pattern, sample } => {
                commands::rules::test(&pattern, &sample)?;
            }
        },
    }

    Ok(())
}
