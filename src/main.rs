use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::*;
use tracing_subscriber::EnvFilter;

use mirrorpak::config::{self, Args, Config};
use mirrorpak::counters;
use mirrorpak::error::MirrorError;
use mirrorpak::file_service::OsFileService;
use mirrorpak::mirror::Mirror;
use mirrorpak::scheduler::Scheduler;

fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(args.verbosity);

    let config = match Config::from_tokens(&args.tokens) {
        Ok(c) => c,
        Err(e) => {
            config::report_configuration_error(&e);
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let result = run(config);
    counters::log_counts();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

#[tokio::main]
async fn run(config: Config) -> Result<(), MirrorError> {
    let library_dir = default_library_dir(&config)
        .map_err(|e| MirrorError::Configuration(e.to_string()))?;

    let mirror = Arc::new(Mirror::new(
        config.origin,
        config.mirror,
        Box::new(OsFileService),
        config.buffer_kib,
        config.max_file_size,
        &library_dir,
    )?);

    let scheduler = Scheduler::new(mirror, config.interval, true);
    scheduler.run().await
}

/// Where persisted `.lib` files for this process's mirrors live: `./mirrors`
/// relative to the current working directory, per the CLI's file layout.
fn default_library_dir(_config: &Config) -> anyhow::Result<camino::Utf8PathBuf> {
    let dir = camino::Utf8PathBuf::from("mirrors");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn init_logger(verbosity: u8) {
    let level = config::verbosity_to_level(verbosity);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
