use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "purefood-sync",
    version,
    about = "Download, validate and cache the PureFood recipe archive"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Local data directory (default: ~/.purefood)
    #[arg(short = 'd', long, global = true, env = "PUREFOOD_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Disable progress bars
    #[arg(long, global = true)]
    pub no_progress_bar: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sync the archive if no local dataset exists yet
    Sync {
        /// Sync even when a local dataset already exists
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        network: NetworkArgs,
    },

    /// Delete local data, then sync
    Refresh {
        #[command(flatten)]
        network: NetworkArgs,
    },

    /// Show what is stored locally
    Status,

    /// List recipes
    List {
        /// Only recipes in this category (case-insensitive)
        #[arg(short = 'c', long)]
        category: Option<String>,

        /// Only recipes whose title contains this text (case-insensitive)
        #[arg(short = 's', long)]
        search: Option<String>,
    },

    /// List recipe categories
    Categories,

    /// Export recipes and cached images as a zip archive
    Export {
        /// Output directory (default: the documents directory)
        #[arg(short = 'o', long)]
        output: Option<String>,
    },

    /// Export recipes as a JSON file
    ExportJson {
        /// Output directory (default: the documents directory)
        #[arg(short = 'o', long)]
        output: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct NetworkArgs {
    /// Archive URL
    #[arg(
        long,
        env = "PUREFOOD_ARCHIVE_URL",
        default_value = purefood_sync::sync::DEFAULT_ARCHIVE_URL
    )]
    pub url: String,

    /// Max retries after a failed download attempt
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Delay between download attempts, in seconds
    #[arg(long, default_value_t = 2)]
    pub retry_delay: u64,

    /// Connect and read timeout, in seconds
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Number of images transcoded in parallel
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,
}
