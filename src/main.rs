use clap::Parser;

use ocrdrop::cli::commands;
use ocrdrop::cli::{Cli, Commands};
use ocrdrop::config::Settings;
use ocrdrop::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Init { force } = &cli.command {
        exit_on_error(commands::init::run_init(*force));
        return;
    }

    let config = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let config = config.unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    });

    // Held until exit so the log file is flushed
    let _log_guard = logging::init_with_config(&config.logging, config.paths.log_dir.as_deref());

    let result = match &cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Config => commands::init::run_config(&config),
        Commands::Watch { workers } => commands::watch::run_watch(&config, *workers).await,
        Commands::Scan => commands::watch::run_scan(&config).await,
        Commands::Work { threads, once } => commands::work::run_work(&config, *threads, *once).await,
        Commands::Process { file } => commands::work::run_process(&config, file),
        Commands::Failures { limit, json } => commands::failures::run(&config, *limit, *json),
        Commands::Doctor => commands::doctor::run(&config),
    };
    exit_on_error(result);
}

fn exit_on_error(result: anyhow::Result<()>) {
    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
