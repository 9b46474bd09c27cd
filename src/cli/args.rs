//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Watch-folder document recognition
#[derive(Parser, Debug)]
#[command(
    name = "ocrdrop",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch-folder document recognition",
    long_about = "Watch a directory tree for PDFs and images, recognize them and mirror \
                  text and searchable-PDF results into an output tree.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ ocrdrop init                # Create .ocrdrop/settings.toml\n  $ ocrdrop doctor              # Check the external tools\n  $ ocrdrop watch --workers 2   # Watch and process in one process\n  $ ocrdrop failures            # Inspect failed inputs"
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true, env = "OCRDROP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Set up .ocrdrop directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Watch the input tree and enqueue stable documents
    #[command(
        after_help = "Workers may run in this process (--workers) or separately with 'ocrdrop work' \
                      against the same queue directory."
    )]
    Watch {
        /// Recognition workers to run in this process
        #[arg(short, long, default_value_t = 0)]
        workers: usize,
    },

    /// Walk the input tree once, enqueue stable documents and exit
    Scan,

    /// Process queued documents
    Work {
        /// Worker threads (overrides worker.threads)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Exit once the queue is empty
        #[arg(long)]
        once: bool,
    },

    /// Recognize one file directly, without the queue
    Process {
        /// Input file under the watch root
        file: PathBuf,
    },

    /// List failure records from the error directory
    Failures {
        /// Show at most this many records, newest first
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check external tools and configured paths
    Doctor,
}
