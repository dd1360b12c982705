//! # CLI Interface
//!
//! Command-line structure for `cma-node`, built with `clap` derive. Three
//! subcommands: `run`, `init` and `version`.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

use cma_protocol::config::{DEFAULT_LISTEN_ADDR, DEFAULT_METRICS_PORT};

use crate::logging::LogFormat;

/// Collective Management Authority.
///
/// Tracks every nanoprobe in the fleet, keeps them arranged in heartbeat
/// rings and reacts when peers report each other dead.
#[derive(Parser, Debug)]
#[command(
    name = "cma-node",
    about = "Collective Management Authority daemon",
    version,
    propagate_version = true
)]
pub struct CmaNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the CMA.
    Run(RunArgs),
    /// Create the data directory and write a default configuration file.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(long, short = 'c', env = "CMA_CONFIG")]
    pub config: Option<PathBuf>,

    /// UDP address nanoprobes talk to.
    #[arg(long, short = 'l', env = "CMA_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Directory holding the graph database.
    #[arg(long, short = 'd', env = "CMA_DATA_DIR", default_value = "./cma-data")]
    pub data_dir: PathBuf,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "CMA_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format.
    #[arg(long, env = "CMA_LOG_FORMAT", value_enum, default_value_t = LogArg::Pretty)]
    pub log_format: LogArg,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory to initialize.
    #[arg(long, short = 'd', env = "CMA_DATA_DIR", default_value = "./cma-data")]
    pub data_dir: PathBuf,

    /// Overwrite an existing configuration file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogArg {
    Pretty,
    Json,
}

impl From<LogArg> for LogFormat {
    fn from(arg: LogArg) -> Self {
        match arg {
            LogArg::Pretty => LogFormat::Pretty,
            LogArg::Json => LogFormat::Json,
        }
    }
}
