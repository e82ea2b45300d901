use std::sync::Arc;

use clap::{Parser, error::ErrorKind};

use cdp_relay::cli::{Cli, Command, GlobalOpts};
use cdp_relay::config::{self, Overrides};
use cdp_relay::error::{AppError, ExitCode};
use cdp_relay::{logging, relay, server};

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are informational, not errors — print as-is
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.print().expect("failed to write to stdout");
                std::process::exit(0);
            }
            let msg = e.kind().to_string();
            let full = e.to_string();
            let clean = full
                .lines()
                .filter(|line| {
                    let trimmed = line.trim();
                    !trimmed.is_empty()
                        && !trimmed.starts_with("For more information")
                        && !trimmed.starts_with("Usage:")
                })
                .map(|line| line.strip_prefix("error: ").unwrap_or(line).trim())
                .collect::<Vec<_>>()
                .join(", ");
            let clean = if clean.is_empty() { msg } else { clean };
            let app_err = AppError {
                message: clean,
                code: ExitCode::GeneralError,
            };
            app_err.print_json_stderr();
            std::process::exit(app_err.code as i32);
        }
    };

    if let Err(e) = run(cli).await {
        e.print_json_stderr();
        #[allow(clippy::cast_possible_truncation)]
        std::process::exit(e.code as i32);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_serve(&cli.global).await,
        Command::InitConfig { path } => run_init_config(path.as_deref()),
    }
}

fn overrides_from_global(global: &GlobalOpts) -> Overrides {
    Overrides {
        host: global.host.clone(),
        port: global.port,
        token: global.token.clone(),
        extension_ids: global.extension_ids.clone(),
        ping_interval_ms: global.ping_interval_ms,
        command_timeout_ms: global.command_timeout_ms,
        max_client_queue_bytes: global.max_client_queue_bytes,
    }
}

async fn run_serve(global: &GlobalOpts) -> Result<(), AppError> {
    let (config_path, config_file) = config::load_config(global.config.as_deref());
    let overrides = overrides_from_global(global);
    let resolved = config::resolve_config(&config_file, &overrides, config_path)
        .map_err(|e| AppError::config(e.to_string()))?;

    logging::init(global.log_level.as_deref().unwrap_or("info"));

    let relay_config = resolved.clone();
    let relay_handle = relay::spawn_relay(relay_config);

    server::serve(Arc::new(resolved), relay_handle)
        .await
        .map_err(|e| AppError::bind(e.to_string()))
}

fn run_init_config(path: Option<&std::path::Path>) -> Result<(), AppError> {
    let written = config::init_config(path).map_err(|e| AppError::config(e.to_string()))?;
    println!("wrote {}", written.display());
    Ok(())
}
