// Library target exists to expose internal modules for integration tests.
// The binary entry point is in main.rs.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod relay;
pub mod server;

/// Returns the clap `Command` definition, for `--help`/`--version` rendering checks in tests.
#[must_use]
pub fn command() -> clap::Command {
    <cli::Cli as clap::CommandFactory>::command()
}
