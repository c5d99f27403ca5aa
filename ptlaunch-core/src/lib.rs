//! # ptlaunch-core — launcher for domain MLM fine-tuning runs
//!
//! Resolves four run parameters (model type, baseline, GPU selector, data folder) into a
//! fixed, reproducible invocation of an external training program, prepares the run's output
//! directory, and supervises the trainer while teeing its combined output to the terminal and
//! to `train.log`.
//!
//! ```text
//! RunConfig::resolve ──▶ prepare ──▶ RunConfigurator::launch ──▶ ExitStatus
//!     (Resolved)        (Prepared)        (Launched)          (Completed | Failed)
//! ```

pub mod config;
pub mod error;
pub mod hyperparams;
pub mod launcher;
pub mod manifest;
pub mod prepare;
pub mod process;
pub mod run_config;
pub mod tee;

pub use config::{LauncherConfig, load_config};
pub use error::{ErrorKind, LaunchError, Result};
pub use hyperparams::Hyperparameters;
pub use launcher::RunConfigurator;
pub use manifest::{RunManifest, RunRecord};
pub use prepare::{PreparedRun, prepare};
pub use process::ExitStatus;
pub use run_config::{GpuSelector, RunConfig};
pub use tee::Tee;
