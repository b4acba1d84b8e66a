use clap::Parser;
use tracing_subscriber::EnvFilter;

use flowmon_cli::cli::{Cli, Commands};
use flowmon_cli::commands;
use flowmon_cli::error::CliError;
use flowmon_cli::output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output on stdout stays parseable.
    let filter = match cli.log_level.as_deref() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    let config = cli.config.as_path();

    match cli.command {
        Commands::Config(args) => commands::config::execute(args, config, &writer).await,
        Commands::Rules(args) => commands::rules::execute(args, config, &writer).await,
        Commands::Counters(args) => commands::counters::execute(args, config, &writer).await,
        Commands::Cleanup => commands::cleanup::execute(config, &writer).await,
    }
}
