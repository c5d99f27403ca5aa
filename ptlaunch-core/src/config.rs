//! Configuration system for ptlaunch.
//!
//! Uses `figment` for layered configuration: defaults -> user config file -> working-directory
//! config file -> environment. Only the *launcher* is configurable (which trainer to run and
//! where its output goes); the training hyperparameters are fixed, see [`crate::hyperparams`].

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = "ptlaunch.toml";

/// Prefix for environment overrides, e.g. `PTLAUNCH_TRAINER__SCRIPT`.
pub const ENV_PREFIX: &str = "PTLAUNCH_";

/// Top-level launcher configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub run: RunSettings,
}

/// How to start the external training program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Program that is executed (normally a Python interpreter).
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Training program passed as the interpreter's first argument.
    #[serde(default = "default_script")]
    pub script: PathBuf,
    /// Value for the child's `PYTHONPATH`. Left alone when unset.
    #[serde(default)]
    pub python_path: Option<String>,
    /// Working directory of the child. Inherited when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Environment variable that restricts accelerator visibility.
    #[serde(default = "default_device_env_var")]
    pub device_env_var: String,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script: default_script(),
            python_path: None,
            working_dir: None,
            device_env_var: default_device_env_var(),
        }
    }
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_script() -> PathBuf {
    PathBuf::from("pt.py")
}

fn default_device_env_var() -> String {
    "CUDA_VISIBLE_DEVICES".to_string()
}

/// Per-run output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// File name of the output transcript inside the run's output directory.
    #[serde(default = "default_log_file_name")]
    pub log_file_name: String,
    /// Write `run_manifest.json` next to the transcript.
    #[serde(default = "default_true")]
    pub write_manifest: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            log_file_name: default_log_file_name(),
            write_manifest: true,
        }
    }
}

fn default_log_file_name() -> String {
    "train.log".to_string()
}

fn default_true() -> bool {
    true
}

impl LauncherConfig {
    /// Check the configuration for values that can never produce a working launch.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.trainer.interpreter.trim().is_empty() {
            problems.push("trainer.interpreter must not be empty".to_string());
        }
        if self.trainer.script.as_os_str().is_empty() {
            problems.push("trainer.script must not be empty".to_string());
        }
        if self.trainer.device_env_var.is_empty()
            || self.trainer.device_env_var.contains(['=', '\0'])
        {
            problems.push(format!(
                "trainer.device_env_var is not a valid variable name: '{}'",
                self.trainer.device_env_var
            ));
        }
        let log = Path::new(&self.run.log_file_name);
        if self.run.log_file_name.is_empty() || log.components().count() != 1 {
            problems.push(format!(
                "run.log_file_name must be a plain file name: '{}'",
                self.run.log_file_name
            ));
        }
        problems
    }
}

/// Path of the user-level config file, if a home directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "ptlaunch", "ptlaunch")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `PTLAUNCH_`, `__` separates sections)
/// 2. `ptlaunch.toml` in `dir`
/// 3. User config (`~/.config/ptlaunch/config.toml`)
/// 4. Built-in defaults
pub fn load_config(dir: Option<&Path>) -> Result<LauncherConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(LauncherConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(dir) = dir {
        let local = dir.join(LOCAL_CONFIG_FILE);
        if local.exists() {
            figment = figment.merge(Toml::file(&local));
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    figment.extract().map_err(Box::new)
}
