use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::LazyLock;

static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");

    let commit = option_env!("VERGEN_GIT_SHA")
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());
    let built = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown");
    let target = option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown");

    format!("{version}\ncommit: {commit}\nbuilt: {built}\ntarget: {target}")
});

pub fn version_info() -> &'static str {
    &VERSION_INFO
}

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "dkan-harvest")]
#[command(
    author,
    version = version_info(),
    about = "Harvest DKAN catalogs into a CKAN instance"
)]
#[command(after_help = "Examples:
  dkan-harvest sources
  dkan-harvest run                       # All enabled sources, every stage
  dkan-harvest run --source city-data --force-all
  dkan-harvest gather --source city-data
  dkan-harvest import --source city-data

Sources are read from ~/.config/dkan-harvest/harvest.toml unless --config is given.")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Base URL of the local CKAN instance
    #[arg(long, env = "CKAN_URL", default_value = "http://localhost:5000")]
    pub ckan_url: String,

    /// API token of the harvest user on the local CKAN instance
    #[arg(long, env = "CKAN_API_TOKEN", hide_env_values = true)]
    pub ckan_api_token: Option<String>,

    /// Custom path to harvest.toml
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the configured harvest sources
    Sources,
    /// Start a new job and run its gather stage
    Gather {
        /// Source id or title from the configuration file
        #[arg(short, long, value_name = "SOURCE")]
        source: String,

        /// Search the whole remote catalog even if an earlier job succeeded
        #[arg(long)]
        force_all: bool,
    },
    /// Check the gathered objects of the latest job of a source
    Fetch {
        /// Source id or title from the configuration file
        #[arg(short, long, value_name = "SOURCE")]
        source: String,
    },
    /// Import the pending objects of the latest job of a source and finish it
    Import {
        /// Source id or title from the configuration file
        #[arg(short, long, value_name = "SOURCE")]
        source: String,
    },
    /// Run gather, fetch and import for one source or every enabled source
    Run {
        /// Source id or title; all enabled sources when omitted
        #[arg(short, long, value_name = "SOURCE")]
        source: Option<String>,

        /// Search the whole remote catalog even if an earlier job succeeded
        #[arg(long)]
        force_all: bool,
    },
}
