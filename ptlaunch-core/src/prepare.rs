//! Pre-launch checks and output directory creation.

use std::path::Path;
use tracing::{debug, info};

use crate::error::{LaunchError, Result};
use crate::run_config::RunConfig;

/// A [`RunConfig`] whose inputs have been checked and whose output directory exists.
///
/// Only [`prepare`] builds one, and launching consumes it, so a configuration cannot be
/// launched without being prepared first or launched twice from the same preparation.
#[derive(Debug)]
pub struct PreparedRun<'a> {
    config: &'a RunConfig,
}

impl<'a> PreparedRun<'a> {
    pub fn config(&self) -> &'a RunConfig {
        self.config
    }
}

/// Check the input files and create the output directory (with parents). Idempotent.
pub fn prepare(config: &RunConfig) -> Result<PreparedRun<'_>> {
    check_input_file(config.train_file())?;
    check_input_file(config.eval_file())?;

    for (input, cache) in config.feature_cache_files() {
        if cache.is_file() {
            info!(input = %input.display(), cache = %cache.display(), "Reusing cached features");
        } else {
            debug!(input = %input.display(), "No feature cache yet, trainer will tokenize");
        }
    }

    let output_dir = config.output_dir();
    std::fs::create_dir_all(output_dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => LaunchError::PermissionDenied {
            path: output_dir.to_path_buf(),
        },
        _ => LaunchError::Io(e),
    })?;
    if !output_dir.is_dir() {
        return Err(LaunchError::invalid_argument(
            "outputDir",
            format!("{} exists and is not a directory", output_dir.display()),
        ));
    }
    debug!(output_dir = %output_dir.display(), "Output directory ready");

    Ok(PreparedRun { config })
}

fn check_input_file(path: &Path) -> Result<()> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LaunchError::missing_input(path, "does not exist"));
        }
        Err(e) => return Err(LaunchError::from_fs(path, e)),
    };
    if !meta.is_file() {
        return Err(LaunchError::missing_input(path, "not a regular file"));
    }
    if meta.len() == 0 {
        return Err(LaunchError::missing_input(path, "file is empty"));
    }
    Ok(())
}
