//! The run configurator: resolve, prepare, launch.
//!
//! The three steps run strictly in sequence. `launch` starts the trainer with an environment
//! built on the spawn call itself, so nothing leaks into the launcher's own environment, and
//! blocks until the trainer exits while its combined output is teed to the terminal and to the
//! run's log file.
//!
//! Two launches that resolve to the same output directory must not run at the same time; they
//! would write into each other's log and checkpoints. Serializing them is up to the caller.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::LauncherConfig;
use crate::error::{LaunchError, Result};
use crate::manifest::{EnvironmentSnapshot, RunManifest};
use crate::prepare::{PreparedRun, prepare};
use crate::process::{ExitStatus, SignalRelay};
use crate::run_config::RunConfig;
use crate::tee::Tee;

/// Turns run parameters into a supervised trainer process.
#[derive(Debug, Clone)]
pub struct RunConfigurator {
    settings: LauncherConfig,
}

impl RunConfigurator {
    /// Create a configurator, rejecting settings that could never launch anything.
    pub fn new(settings: LauncherConfig) -> Result<Self> {
        let problems = settings.validate();
        if !problems.is_empty() {
            return Err(LaunchError::invalid_argument(
                "configuration",
                problems.join("; "),
            ));
        }
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &LauncherConfig {
        &self.settings
    }

    pub fn resolve(
        &self,
        model_type: &str,
        baseline: &str,
        gpu_selector: &str,
        data_folder: impl AsRef<Path>,
    ) -> Result<RunConfig> {
        RunConfig::resolve(model_type, baseline, gpu_selector, data_folder)
    }

    pub fn prepare<'a>(&self, config: &'a RunConfig) -> Result<PreparedRun<'a>> {
        prepare(config)
    }

    /// Resolve, prepare and launch in one go.
    pub async fn run(
        &self,
        model_type: &str,
        baseline: &str,
        gpu_selector: &str,
        data_folder: impl AsRef<Path>,
    ) -> Result<ExitStatus> {
        let config = self.resolve(model_type, baseline, gpu_selector, data_folder)?;
        let prepared = self.prepare(&config)?;
        self.launch(prepared).await
    }

    /// Variables set on the child only.
    pub fn child_env(&self, config: &RunConfig) -> BTreeMap<String, String> {
        let trainer = &self.settings.trainer;
        let mut env = BTreeMap::new();
        env.insert(
            trainer.device_env_var.clone(),
            config.gpu_selector().to_string(),
        );
        if let Some(python_path) = &trainer.python_path {
            env.insert("PYTHONPATH".to_string(), python_path.clone());
        }
        env
    }

    /// Arguments after the interpreter: the script, then every run flag.
    pub fn trainer_argv(&self, config: &RunConfig) -> Vec<OsString> {
        let mut argv = vec![self.settings.trainer.script.clone().into_os_string()];
        argv.extend(config.trainer_args());
        argv
    }

    /// Start the trainer and wait for it, returning how it terminated.
    ///
    /// A non-zero exit is not an error here; use [`ExitStatus::into_result`] for that.
    pub async fn launch(&self, run: PreparedRun<'_>) -> Result<ExitStatus> {
        let config = run.config();
        let trainer = &self.settings.trainer;
        let log_path = config.output_dir().join(&self.settings.run.log_file_name);

        let env = self.child_env(config);
        let argv = self.trainer_argv(config);

        // Installed before the spawn so an early interrupt cannot orphan the trainer.
        let mut relay = SignalRelay::install()?;

        // stdout and stderr share one pipe so the transcript keeps the child's write order.
        // The pipe buffers early output until the tee starts reading.
        let (reader, writer) = std::io::pipe()?;
        let mut command = Command::new(&trainer.interpreter);
        command
            .args(&argv)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer)
            .kill_on_drop(true);
        if let Some(dir) = &trainer.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let spawned = command.spawn();
        // Release our copies of the pipe's write end, or the tee never sees EOF.
        drop(command);
        // Nothing in the output directory is touched until the trainer is running, so a
        // failed start leaves the previous run's transcript and manifest intact.
        let mut child = spawned.map_err(|source| LaunchError::SpawnFailed {
            program: trainer.interpreter.clone(),
            source,
        })?;

        let records = self.open_run_records(config, &argv, &env, &log_path);
        let (log_file, mut manifest) = match records {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Could not set up run records, stopping trainer");
                stop_child(&mut child).await;
                return Err(e);
            }
        };

        info!(
            pid = child.id(),
            model_type = config.model_type(),
            baseline = config.baseline(),
            gpus = %config.gpu_selector(),
            output_dir = %config.output_dir().display(),
            "Trainer started"
        );

        let mut tee = Tee::new()
            .best_effort("terminal", std::io::stdout())
            .required("log", log_file);
        let tee_task = tokio::task::spawn_blocking(move || tee.copy_from(reader));

        let status = wait_forwarding_signals(&mut child, &mut relay).await?;
        let captured = tee_task.await.map_err(std::io::Error::other)?;

        if let Some(manifest) = manifest.as_mut() {
            manifest.finish(status);
            manifest.save(&RunManifest::path_in(config.output_dir()))?;
        }

        let bytes = captured.map_err(|e| LaunchError::LogCapture {
            path: log_path.clone(),
            source: e.source,
        })?;
        debug!(bytes, log = %log_path.display(), "Transcript complete");

        if status.success() {
            info!(%status, "Trainer finished");
        } else {
            warn!(%status, "Trainer did not finish cleanly");
        }
        Ok(status)
    }

    /// Truncate the transcript and write the initial manifest for a run that has started.
    fn open_run_records(
        &self,
        config: &RunConfig,
        argv: &[OsString],
        env: &BTreeMap<String, String>,
        log_path: &Path,
    ) -> Result<(std::fs::File, Option<RunManifest>)> {
        let trainer = &self.settings.trainer;

        // Truncated on every launch; the transcript only ever holds the current run.
        let log_file =
            std::fs::File::create(log_path).map_err(|e| LaunchError::from_fs(log_path, e))?;

        if !self.settings.run.write_manifest {
            return Ok((log_file, None));
        }
        let mut command = vec![trainer.interpreter.clone()];
        command.extend(argv.iter().map(|a| a.to_string_lossy().into_owned()));
        let manifest = RunManifest::new(
            config,
            command,
            env.clone(),
            log_path.to_path_buf(),
            EnvironmentSnapshot::capture(env, &trainer.device_env_var),
        );
        manifest.save(&RunManifest::path_in(config.output_dir()))?;
        Ok((log_file, Some(manifest)))
    }
}

/// Kill a trainer that must not keep running and reap it.
async fn stop_child(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            crate::process::forward_signal_to_group(pid, libc::SIGKILL);
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Trainer already exited");
    }
}

/// Wait for the child, relaying termination signals to it meanwhile.
async fn wait_forwarding_signals(child: &mut Child, relay: &mut SignalRelay) -> Result<ExitStatus> {
    loop {
        tokio::select! {
            status = child.wait() => return Ok(ExitStatus::from_std(status?)),
            signal = relay.recv() => relay_to_child(child, signal)?,
        }
    }
}

#[cfg(unix)]
fn relay_to_child(child: &mut Child, signal: i32) -> Result<()> {
    if let Some(pid) = child.id() {
        info!(pid, signal, "Forwarding signal to trainer");
        // The trainer leads its own process group; its workers get the signal too.
        if !crate::process::forward_signal_to_group(pid, signal) {
            debug!(pid, "Trainer process group already gone");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn relay_to_child(child: &mut Child, _signal: i32) -> Result<()> {
    info!("Interrupted, stopping trainer");
    child.start_kill()?;
    Ok(())
}
