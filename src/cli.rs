//! Command Line Interface (CLI) arguments.

use crate::models::DEFAULT_MIN_GROUP_SIZE;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Disclosure statistics command line interface
#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct CommandLineArgs {
    /// Whether to enable sending traces to Jaeger.
    #[arg(
        long,
        global = true,
        default_value_t = false,
        env = "DISCLOSURE_ENABLE_JAEGER"
    )]
    pub enable_jaeger: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Aggregate raw events into a disclosure artifact
    Aggregate(AggregateArgs),
    /// Serve a disclosure artifact over HTTP
    Serve(ServeArgs),
}

/// Arguments of the offline aggregation job
#[derive(Clone, Debug, Args)]
pub struct AggregateArgs {
    /// Parquet file or directory of Parquet files containing raw events
    #[arg(long, env = "DISCLOSURE_INPUT")]
    pub input: PathBuf,
    /// Location of the disclosure artifact to write
    #[arg(long, env = "DISCLOSURE_OUTPUT")]
    pub output: PathBuf,
    /// Groups with fewer events than this are suppressed
    #[arg(
        long,
        default_value_t = DEFAULT_MIN_GROUP_SIZE,
        value_parser = clap::value_parser!(u64).range(1..),
        env = "DISCLOSURE_MIN_GROUP_SIZE"
    )]
    pub min_group_size: u64,
    /// Compliance tag attached to every disclosed record
    #[arg(long, env = "DISCLOSURE_COMPLIANCE_TAG")]
    pub compliance_tag: String,
    /// Whether to use Rayon to aggregate input files in parallel.
    #[arg(long, default_value_t = false, env = "DISCLOSURE_USE_RAYON")]
    pub use_rayon: bool,
    /// Number of Rayon threads. Defaults to the number of CPUs.
    #[arg(long, env = "DISCLOSURE_THREAD_LIMIT")]
    pub thread_limit: Option<usize>,
}

/// Arguments of the query service
#[derive(Clone, Debug, Args)]
pub struct ServeArgs {
    /// Location of the disclosure artifact to load at startup
    #[arg(long, env = "DISCLOSURE_ARTIFACT")]
    pub artifact: PathBuf,
    /// The IP address on which the service should listen
    #[arg(long, default_value = "0.0.0.0", env = "DISCLOSURE_HOST")]
    pub host: String,
    /// The port to which the service should bind
    #[arg(long, default_value_t = 8080, env = "DISCLOSURE_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "DISCLOSURE_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/disclosure-stats/certs/cert.pem",
        env = "DISCLOSURE_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/disclosure-stats/certs/key.pem",
        env = "DISCLOSURE_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for requests to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "DISCLOSURE_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
