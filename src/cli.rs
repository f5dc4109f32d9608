use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, PartialEq, Default)]
#[command(name = "repowatch", version)]
#[command(about = "Live dashboard of Git checkouts: branch, dirty state, and upstream divergence")]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory to watch (repeatable; replaces the configured list)
    #[arg(long = "watch-dir", value_name = "DIR")]
    pub watch_dir: Vec<PathBuf>,

    /// Maximum directory depth to search below each watch directory
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_depth: Option<u64>,

    /// Log informational messages to the log file
    #[arg(short, long)]
    pub verbose: bool,

    /// Log debug messages to the log file (implies --verbose)
    #[arg(short, long)]
    pub debug: bool,

    /// Print a single snapshot and exit instead of starting the dashboard
    #[arg(long)]
    pub once: bool,
}

impl CliArgs {
    /// Log level requested on the command line, if any.
    pub fn log_level(&self) -> Option<tracing::Level> {
        if self.debug {
            Some(tracing::Level::DEBUG)
        } else if self.verbose {
            Some(tracing::Level::INFO)
        } else {
            None
        }
    }
}
