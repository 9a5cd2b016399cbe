use anyhow::bail;
use cascade::{DEFAULT_KEEPALIVE_TIMEOUT_MS, DEFAULT_MAX_NODES_PER_CLIENT, SchedulerConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the `cascade-server` binary.
///
/// Every setting can be given on the command line or through the
/// environment (a `.env` file in the working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "cascade-server",
    version,
    about = "Distributes adaptive grid-search tasks to remote worker fleets"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8088"))]
    pub server_addr: String,

    /// JSON file describing the project: inputs, outputs and densification.
    ///
    /// Environment variable: `PROJECT_FILE`
    #[arg(long, env = "PROJECT_FILE")]
    pub project_file: PathBuf,

    /// SQLite database holding the results. When absent, results are kept
    /// in memory and lost on shutdown.
    ///
    /// Environment variable: `DATABASE`
    #[arg(long, env = "DATABASE")]
    pub database: Option<PathBuf>,

    /// Seconds of silence after which a client must register again.
    ///
    /// Environment variable: `KEEPALIVE_TIMEOUT`
    #[arg(long, env = "KEEPALIVE_TIMEOUT", default_value_t = DEFAULT_KEEPALIVE_TIMEOUT_MS / 1000)]
    pub keepalive_timeout: u64,

    /// Refuse requests from clients whose keep-alive expired.
    ///
    /// Environment variable: `ENFORCE_KEEPALIVE`
    #[arg(long, env = "ENFORCE_KEEPALIVE", default_value_t = false)]
    pub enforce_keepalive: bool,

    /// Most nodes a single client may register.
    ///
    /// Environment variable: `MAX_NODES`
    #[arg(long, env = "MAX_NODES", default_value_t = DEFAULT_MAX_NODES_PER_CLIENT)]
    pub max_nodes: usize,

    /// Seconds granted to in-flight requests once a shutdown signal arrives.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub project_file: PathBuf,
    pub database: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.keepalive_timeout == 0 {
            bail!("KEEPALIVE_TIMEOUT must be greater than 0");
        }

        let keepalive_timeout_ms = args
            .keepalive_timeout
            .checked_mul(1000)
            .ok_or_else(|| anyhow::anyhow!("KEEPALIVE_TIMEOUT is too large"))?;

        if args.max_nodes == 0 {
            bail!("MAX_NODES must be greater than 0");
        }

        if args.server_addr.trim().is_empty() {
            bail!("SERVER_ADDR must not be empty");
        }

        Ok(Self {
            server_addr: args.server_addr,
            project_file: args.project_file,
            database: args.database,
            scheduler: SchedulerConfig {
                keepalive_timeout_ms,
                enforce_keepalive: args.enforce_keepalive,
                max_nodes_per_client: args.max_nodes,
            },
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
