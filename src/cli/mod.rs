#![allow(clippy::doc_markdown)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cdp-relay",
    version,
    about = "CDP relay server: multiplexes automation clients onto a single browser extension",
    long_about = "cdp-relay sits between a browser extension (the CDP producer for one tab) and \
        any number of CDP automation clients. Clients connect to /cdp and speak standard \
        DevTools Protocol; the extension connects to /extension. The relay multiplexes client \
        sessions onto the single extension connection, correlates commands with responses, \
        routes events by session, and answers a handful of target-discovery methods locally.",
    term_width = 100
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args)]
pub struct GlobalOpts {
    /// Path to a relay.toml configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// TCP host to bind
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// TCP port to bind
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Required token for /cdp connections (also read from RELAY_TOKEN)
    #[arg(long, env = "RELAY_TOKEN", global = true)]
    pub token: Option<String>,

    /// Extension id to add to the allowlist (repeatable)
    #[arg(long = "extension-id", global = true)]
    pub extension_ids: Vec<String>,

    /// Ping interval in milliseconds
    #[arg(long, global = true)]
    pub ping_interval_ms: Option<u64>,

    /// Default command timeout in milliseconds
    #[arg(long, global = true)]
    pub command_timeout_ms: Option<u64>,

    /// Per-client send queue cap in bytes before events are dropped
    #[arg(long, global = true)]
    pub max_client_queue_bytes: Option<usize>,

    /// Log filter, e.g. "info" or "cdp_relay=debug" (also read from RELAY_LOG)
    #[arg(long, env = "RELAY_LOG", global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the relay server (default action)
    #[command(
        long_about = "Bind the configured host:port and serve /cdp and /extension until a \
            shutdown signal is received."
    )]
    Serve,

    /// Write a default configuration file
    #[command(
        long_about = "Write a commented-out default relay.toml to the platform config \
            directory (or an explicit --path)."
    )]
    InitConfig {
        /// Path to write the config file to (defaults to the platform config dir)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}
