use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "rpcpool",
    about = "Probe and inspect RPC host pools",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured hosts with their selection weights
    Hosts {
        /// Path to the client configuration file
        #[arg(short, long, default_value = "rpcpool.toml")]
        config: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Open pooled TCP connections to the configured hosts and check them.
    ///
    /// Each round checks out up to pool.maxActive connections concurrently,
    /// pings each one, and returns it. Pool statistics and per-host health
    /// are printed at the end.
    Probe {
        /// Path to the client configuration file
        #[arg(short, long, default_value = "rpcpool.toml")]
        config: String,
        /// Number of acquire/ping/release rounds
        #[arg(short, long, default_value_t = 3)]
        rounds: u32,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rpcpool=debug,rpc_pool=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Hosts { config, format } => commands::hosts::hosts(&config, &format),
        Commands::Probe {
            config,
            rounds,
            format,
        } => commands::probe::probe(&config, rounds, &format).await,
    }
}
