//! Init and Config commands.

use anyhow::Context;

use crate::config::Settings;

/// Run init command - create configuration file.
pub fn run_init(force: bool) -> anyhow::Result<()> {
    let path = Settings::init_config_file(force)?;
    println!("Created configuration file at: {}", path.display());
    println!("Edit paths.watch_root, paths.output_root and paths.error_dir before starting.");
    Ok(())
}

/// Run config command - display current configuration.
pub fn run_config(config: &Settings) -> anyhow::Result<()> {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    let rendered = toml::to_string_pretty(config).context("Cannot display configuration")?;
    println!("{rendered}");

    if let Err(e) = config.validate() {
        eprintln!("Warning: {e}");
    }
    Ok(())
}
