//! Run manifest — a JSON record of one launch, written next to the transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::hyperparams::Hyperparameters;
use crate::process::ExitStatus;
use crate::run_config::RunConfig;

pub const MANIFEST_FILE_NAME: &str = "run_manifest.json";

/// Host details and a fingerprint of the variables that change trainer behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub platform: String,
    pub arch: String,
    /// SHA-256 over `PATH`, `PYTHONPATH` and the device variable as the child sees them.
    pub env_vars_hash: String,
}

impl EnvironmentSnapshot {
    /// Capture the snapshot for a child that inherits the parent environment plus `overrides`.
    pub fn capture(overrides: &BTreeMap<String, String>, device_env_var: &str) -> Self {
        let mut hasher = Sha256::new();
        for var in ["PATH", "PYTHONPATH", device_env_var] {
            let value = overrides
                .get(var)
                .cloned()
                .or_else(|| std::env::var(var).ok())
                .unwrap_or_default();
            hasher.update(var.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        Self {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            env_vars_hash: format!("{:x}", hasher.finalize()),
        }
    }
}

/// The resolved run as written to a manifest.
///
/// Reading a manifest back yields this plain record, never a [`RunConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub model_type: String,
    pub baseline: String,
    pub gpu_selector: String,
    pub data_folder: PathBuf,
    pub hyperparams: Hyperparameters,
    pub output_dir: PathBuf,
    pub train_file: PathBuf,
    pub eval_file: PathBuf,
}

impl From<&RunConfig> for RunRecord {
    fn from(config: &RunConfig) -> Self {
        Self {
            model_type: config.model_type().to_string(),
            baseline: config.baseline().to_string(),
            gpu_selector: config.gpu_selector().to_string(),
            data_folder: config.data_folder().to_path_buf(),
            hyperparams: config.hyperparams().clone(),
            output_dir: config.output_dir().to_path_buf(),
            train_file: config.train_file().to_path_buf(),
            eval_file: config.eval_file().to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub config: RunRecord,
    /// Full command line, program first.
    pub command: Vec<String>,
    /// Variables set for the child on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    pub log_file: PathBuf,
    pub environment: EnvironmentSnapshot,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExitStatus>,
}

impl RunManifest {
    pub fn new(
        config: &RunConfig,
        command: Vec<String>,
        env: BTreeMap<String, String>,
        log_file: PathBuf,
        environment: EnvironmentSnapshot,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            config: RunRecord::from(config),
            command,
            env,
            log_file,
            environment,
            started_at: Utc::now(),
            finished_at: None,
            status: None,
        }
    }

    pub fn path_in(output_dir: &Path) -> PathBuf {
        output_dir.join(MANIFEST_FILE_NAME)
    }

    pub fn finish(&mut self, status: ExitStatus) {
        self.finished_at = Some(Utc::now());
        self.status = Some(status);
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Atomic write via a temporary file in the same directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_prefers_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("CUDA_VISIBLE_DEVICES".to_string(), "0".to_string());
        let a = EnvironmentSnapshot::capture(&overrides, "CUDA_VISIBLE_DEVICES");
        overrides.insert("CUDA_VISIBLE_DEVICES".to_string(), "1".to_string());
        let b = EnvironmentSnapshot::capture(&overrides, "CUDA_VISIBLE_DEVICES");
        assert_ne!(a.env_vars_hash, b.env_vars_hash);
        assert_eq!(a.env_vars_hash.len(), 64);
    }

    #[test]
    fn test_run_record_mirrors_resolved_config() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig::resolve("bert", "v1", "0,2", dir.path()).unwrap();
        let record = RunRecord::from(&config);

        assert_eq!(record.model_type, "bert");
        assert_eq!(record.baseline, "v1");
        assert_eq!(record.gpu_selector, "0,2");
        assert_eq!(record.output_dir, dir.path().join("pt_bert-v1"));
        assert_eq!(record.train_file, config.train_file());
        assert_eq!(record.eval_file, config.eval_file());
        assert_eq!(&record.hyperparams, config.hyperparams());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["gpu_selector"], "0,2");
    }

    #[test]
    fn test_manifest_save_load_and_finish() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig::resolve("bert", "v1", "0", dir.path()).unwrap();
        let env = BTreeMap::from([("CUDA_VISIBLE_DEVICES".to_string(), "0".to_string())]);
        let mut manifest = RunManifest::new(
            &config,
            vec!["python".into(), "pt.py".into()],
            env.clone(),
            config.output_dir().join("train.log"),
            EnvironmentSnapshot::capture(&env, "CUDA_VISIBLE_DEVICES"),
        );
        let path = RunManifest::path_in(dir.path());

        manifest.save(&path).unwrap();
        let loaded = RunManifest::load(&path).unwrap();
        assert_eq!(loaded.run_id, manifest.run_id);
        assert_eq!(loaded.config.output_dir, config.output_dir());
        assert_eq!(loaded.env, env);
        assert!(loaded.status.is_none());
        assert!(!std::fs::read_to_string(&path).unwrap().contains("finished_at"));

        manifest.finish(ExitStatus::Exited(0));
        manifest.save(&path).unwrap();
        let loaded = RunManifest::load(&path).unwrap();
        assert_eq!(loaded.status, Some(ExitStatus::Exited(0)));
        assert!(loaded.finished_at.is_some());
        assert!(!path.with_extension("tmp").exists());
    }
}
