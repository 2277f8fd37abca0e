//! QAgent CLI entry point.

use clap::Parser;

use qagent::cli::{Cli, Commands};
use qagent::infrastructure::logging::{LogConfig, LoggerImpl};
use qagent::ConfigLoader;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = ConfigLoader::load()
        .map(|config| LogConfig::from(&config.logging))
        .unwrap_or_default();
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Init(args) => qagent::cli::commands::init::execute(args, cli.json).await,
        Commands::Validate(args) => qagent::cli::commands::validate::execute(args, cli.json).await,
        Commands::Knowledge(args) => qagent::cli::commands::knowledge::execute(args, cli.json).await,
        Commands::Metrics(args) => qagent::cli::commands::metrics::execute(args, cli.json).await,
    };

    if let Err(err) = result {
        qagent::cli::handle_error(err, cli.json);
    }
}
