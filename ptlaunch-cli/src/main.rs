//! ptlaunch — launch one domain MLM fine-tuning run.
//!
//! Usage: `ptlaunch <MODEL_TYPE> <BASELINE> <GPUS> <DATA_FOLDER>`
//!
//! The exit code mirrors the trainer's: its own code on a normal exit, `128 + signal` when it
//! was killed by a signal, and 2 when the launcher failed before the trainer could run.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use ptlaunch_core::{ExitStatus, LaunchError, RunConfigurator};

/// Exit code for failures of the launcher itself.
const LAUNCHER_FAILURE: u8 = 2;

/// Events with this target reach only the JSON file log; stderr gets its own message.
const FILE_ONLY_TARGET: &str = "ptlaunch_file";

#[derive(Parser, Debug)]
#[command(
    name = "ptlaunch",
    disable_help_flag = true,
    disable_version_flag = true,
    disable_help_subcommand = true
)]
struct Cli {
    /// Model architecture family understood by the trainer (e.g. bert)
    model_type: String,

    /// Baseline variant passed through to the trainer
    baseline: String,

    /// Comma-separated accelerator indices visible to the trainer (e.g. 0 or 0,1)
    gpus: String,

    /// Folder holding domain_train.txt and domain_dev.txt
    data_folder: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing();

    match run(cli).await {
        Ok(status) => exit_code(status),
        Err(e) => {
            error!(target: FILE_ONLY_TARGET, error = %e, "Launch failed");
            eprintln!("ptlaunch: {e:#}");
            ExitCode::from(LAUNCHER_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitStatus> {
    let cwd = std::env::current_dir()?;
    let settings = ptlaunch_core::load_config(Some(&cwd)).map_err(LaunchError::from)?;
    let configurator = RunConfigurator::new(settings)?;

    let config = configurator.resolve(
        &cli.model_type,
        &cli.baseline,
        &cli.gpus,
        &cli.data_folder,
    )?;
    let prepared = configurator.prepare(&config)?;
    Ok(configurator.launch(prepared).await?)
}

/// Human-readable stderr logging plus a JSON file log in the user data directory.
///
/// Launcher diagnostics never go to stdout, which carries the trainer's transcript.
fn init_tracing() -> Option<WorkerGuard> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter(EnvFilter::try_from_default_env().ok()));

    let log_dir = directories::ProjectDirs::from("dev", "ptlaunch", "ptlaunch")
        .map(|d| d.data_dir().join("logs"));
    let (json_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let file_appender = tracing_appender::rolling::daily(&dir, "ptlaunch.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

/// `RUST_LOG` (default `info`) with the file-only target switched off.
fn stderr_filter(from_env: Option<EnvFilter>) -> EnvFilter {
    let filter = from_env.unwrap_or_else(|| EnvFilter::new("info"));
    match format!("{FILE_ONLY_TARGET}=off").parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

fn exit_code(status: ExitStatus) -> ExitCode {
    ExitCode::from(exit_byte(status))
}

/// Codes outside 0..=255 cannot be reported faithfully; they collapse to 1.
fn exit_byte(status: ExitStatus) -> u8 {
    u8::try_from(status.exit_code()).unwrap_or(1)
}
