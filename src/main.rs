use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use support_insights::{
    cli::{execute_command, Cli},
    config::{Config, LogFormat, LoggingConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });
    install_subscriber(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        database = %config.database.path.display(),
        sentiment_pipe = %config.pipes.sentiment,
        "support-insights starting"
    );

    let outcome = execute_command(cli.command, &config).await;
    if outcome.exit_code != 0 {
        eprintln!("{}", outcome.message);
        std::process::exit(outcome.exit_code);
    }
    println!("{}", outcome.message);
    Ok(())
}

/// Logs go to stderr so command output on stdout stays pipeable.
fn install_subscriber(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}
