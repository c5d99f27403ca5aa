//! Resolution of the four positional run parameters into a [`RunConfig`].

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::error::{LaunchError, Result};
use crate::hyperparams::{ALWAYS_ON_FLAGS, Hyperparameters};

pub const TRAIN_FILE_NAME: &str = "domain_train.txt";
pub const EVAL_FILE_NAME: &str = "domain_dev.txt";
pub const OUTPUT_DIR_PREFIX: &str = "pt_";

/// Accelerator indices made visible to the trainer, e.g. `0` or `0,1,3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuSelector(Vec<u32>);

impl GpuSelector {
    pub fn devices(&self) -> &[u32] {
        &self.0
    }
}

impl FromStr for GpuSelector {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(LaunchError::invalid_argument(
                "gpuSelector",
                "must not be empty",
            ));
        }
        let devices = s
            .split(',')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(LaunchError::invalid_argument(
                        "gpuSelector",
                        format!(
                            "'{s}' is not a comma-separated list of device indices (bad entry '{part}')"
                        ),
                    ));
                }
                part.parse::<u32>().map_err(|_| {
                    LaunchError::invalid_argument(
                        "gpuSelector",
                        format!("device index '{part}' is out of range"),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(devices))
    }
}

impl fmt::Display for GpuSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, device) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{device}")?;
        }
        Ok(())
    }
}

/// Resolved, immutable parameters for one training invocation.
///
/// Only [`RunConfig::resolve`] builds one, so the derived paths always match the inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    model_type: String,
    baseline: String,
    gpu_selector: GpuSelector,
    data_folder: PathBuf,
    hyperparams: Hyperparameters,
    output_dir: PathBuf,
    train_file: PathBuf,
    eval_file: PathBuf,
}

impl RunConfig {
    /// Resolve the positional inputs. Pure apart from checking that `data_folder` exists.
    pub fn resolve(
        model_type: &str,
        baseline: &str,
        gpu_selector: &str,
        data_folder: impl AsRef<Path>,
    ) -> Result<Self> {
        validate_component("modelType", model_type)?;
        validate_component("baseline", baseline)?;
        let gpu_selector: GpuSelector = gpu_selector.parse()?;

        let data_folder = data_folder.as_ref();
        if data_folder.as_os_str().is_empty() {
            return Err(LaunchError::invalid_argument(
                "dataFolder",
                "must not be empty",
            ));
        }
        match std::fs::metadata(data_folder) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(LaunchError::invalid_argument(
                    "dataFolder",
                    format!("{} is not a directory", data_folder.display()),
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LaunchError::PathNotFound {
                    path: data_folder.to_path_buf(),
                });
            }
            Err(e) => return Err(LaunchError::from_fs(data_folder, e)),
        }

        let config = Self {
            output_dir: data_folder.join(output_dir_name(model_type, baseline)),
            train_file: data_folder.join(TRAIN_FILE_NAME),
            eval_file: data_folder.join(EVAL_FILE_NAME),
            model_type: model_type.to_string(),
            baseline: baseline.to_string(),
            gpu_selector,
            data_folder: data_folder.to_path_buf(),
            hyperparams: Hyperparameters::default(),
        };
        debug!(
            model_type,
            baseline,
            gpus = %config.gpu_selector,
            output_dir = %config.output_dir.display(),
            "Resolved run configuration"
        );
        Ok(config)
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    pub fn gpu_selector(&self) -> &GpuSelector {
        &self.gpu_selector
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    pub fn hyperparams(&self) -> &Hyperparameters {
        &self.hyperparams
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn train_file(&self) -> &Path {
        &self.train_file
    }

    pub fn eval_file(&self) -> &Path {
        &self.eval_file
    }

    /// Feature caches the trainer writes next to an input file on its first pass, keyed by
    /// model family and block size. Each entry is `(input, cache)`.
    pub fn feature_cache_files(&self) -> Vec<(&Path, PathBuf)> {
        let family = self
            .model_type
            .split('-')
            .next()
            .unwrap_or(self.model_type.as_str());
        [&self.train_file, &self.eval_file]
            .into_iter()
            .map(|input| {
                let file_name = input
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let cache = self.data_folder.join(format!(
                    "{family}_cached_lm_{}_{file_name}.npy",
                    self.hyperparams.block_size
                ));
                (input.as_path(), cache)
            })
            .collect()
    }

    /// Trainer arguments, without the interpreter or script.
    pub fn trainer_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(48);
        let mut push = |flag: &str, value: OsString| {
            args.push(flag.into());
            args.push(value);
        };
        push("--output_dir", self.output_dir.clone().into_os_string());
        push("--model_type", self.model_type.clone().into());
        push("--train_data_file", self.train_file.clone().into_os_string());
        push("--eval_data_file", self.eval_file.clone().into_os_string());
        push("--baseline", self.baseline.clone().into());
        for (flag, value) in self.hyperparams.flag_values() {
            push(flag, value.into());
        }
        args.extend(ALWAYS_ON_FLAGS.into_iter().map(OsString::from));
        args
    }
}

/// `pt_{modelType}-{baseline}`.
pub fn output_dir_name(model_type: &str, baseline: &str) -> String {
    format!("{OUTPUT_DIR_PREFIX}{model_type}-{baseline}")
}

/// `modelType` and `baseline` end up inside a single path component.
fn validate_component(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LaunchError::invalid_argument(name, "must not be empty"));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(LaunchError::invalid_argument(
            name,
            format!("'{value}' must not contain path separators"),
        ));
    }
    if value == "." || value == ".." {
        return Err(LaunchError::invalid_argument(
            name,
            format!("'{value}' is not a valid name"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn args_as_strings(config: &RunConfig) -> Vec<String> {
        config
            .trainer_args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn flag_value(args: &[String], flag: &str) -> String {
        let idx = args.iter().position(|a| a == flag).unwrap();
        args[idx + 1].clone()
    }

    #[test]
    fn test_resolve_derives_paths() {
        let dir = TempDir::new().unwrap();
        let exp = dir.path().join("exp1");
        std::fs::create_dir(&exp).unwrap();

        let config = RunConfig::resolve("bert", "v1", "0", &exp).unwrap();
        assert_eq!(config.output_dir(), exp.join("pt_bert-v1"));
        assert_eq!(config.train_file(), exp.join("domain_train.txt"));
        assert_eq!(config.eval_file(), exp.join("domain_dev.txt"));
        assert_eq!(config.gpu_selector().devices(), &[0]);
        assert_eq!(config.hyperparams(), &Hyperparameters::default());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let a = RunConfig::resolve("roberta-base", "dom", "1,2", dir.path()).unwrap();
        let b = RunConfig::resolve("roberta-base", "dom", "1,2", dir.path()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_resolve_missing_data_folder() {
        let dir = TempDir::new().unwrap();
        let err = RunConfig::resolve("bert", "v1", "0", dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathNotFound);
    }

    #[test]
    fn test_resolve_data_folder_is_a_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.txt");
        std::fs::write(&file, "x").unwrap();
        let err = RunConfig::resolve("bert", "v1", "0", &file).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_resolve_rejects_empty_inputs() {
        let dir = TempDir::new().unwrap();
        for (model, baseline, gpus) in [("", "v1", "0"), ("bert", "", "0"), ("bert", "v1", "")] {
            let err = RunConfig::resolve(model, baseline, gpus, dir.path()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        let err = RunConfig::resolve("bert", "v1", "0", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_resolve_rejects_path_like_names() {
        let dir = TempDir::new().unwrap();
        for name in ["../escape", "a/b", "..", "."] {
            let err = RunConfig::resolve(name, "v1", "0", dir.path()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "accepted {name:?}");
        }
    }

    #[test]
    fn test_gpu_selector_parsing() {
        assert_eq!("0".parse::<GpuSelector>().unwrap().devices(), &[0]);
        assert_eq!(
            "0,1,3".parse::<GpuSelector>().unwrap().devices(),
            &[0, 1, 3]
        );
        assert_eq!("2,0".parse::<GpuSelector>().unwrap().to_string(), "2,0");
        for bad in ["", "a", "0,", ",1", "0, 1", "-1", "1.5", "99999999999"] {
            assert!(bad.parse::<GpuSelector>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_trainer_args_cover_every_field() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig::resolve("bert", "v1", "0", dir.path()).unwrap();
        let args = args_as_strings(&config);

        assert_eq!(
            flag_value(&args, "--output_dir"),
            dir.path().join("pt_bert-v1").to_string_lossy()
        );
        assert_eq!(flag_value(&args, "--model_type"), "bert");
        assert_eq!(flag_value(&args, "--baseline"), "v1");
        assert_eq!(flag_value(&args, "--model_name_or_path"), "bert-base-uncased");
        assert_eq!(
            flag_value(&args, "--train_data_file"),
            dir.path().join("domain_train.txt").to_string_lossy()
        );
        assert_eq!(
            flag_value(&args, "--eval_data_file"),
            dir.path().join("domain_dev.txt").to_string_lossy()
        );
        assert_eq!(flag_value(&args, "--save_steps"), "500");
        assert_eq!(flag_value(&args, "--logging_steps"), "500");
        assert_eq!(flag_value(&args, "--save_total_limit"), "1");
        assert_eq!(flag_value(&args, "--warmup_steps"), "0");
        assert_eq!(flag_value(&args, "--seed"), "0");
        for flag in ALWAYS_ON_FLAGS {
            assert!(args.iter().any(|a| a == flag), "{flag} missing");
        }
        // 20 valued flags plus 7 switches
        assert_eq!(args.len(), 20 * 2 + 7);
    }

    #[test]
    fn test_feature_cache_files_use_model_family() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig::resolve("bert-large", "v1", "0", dir.path()).unwrap();
        let caches = config.feature_cache_files();
        assert_eq!(caches.len(), 2);
        assert_eq!(caches[0].0, config.train_file());
        assert_eq!(
            caches[0].1,
            dir.path().join("bert_cached_lm_512_domain_train.txt.npy")
        );
        assert_eq!(
            caches[1].1,
            dir.path().join("bert_cached_lm_512_domain_dev.txt.npy")
        );
    }
}
