//! Interrupt relaying from the launcher to a running trainer.
//!
//! Kept in its own test binary: the interrupt is sent to the whole test process, and every
//! launch running in the same process would relay it to its trainer.
#![cfg(unix)]

use pretty_assertions::assert_eq;
use std::time::Duration;
use tempfile::TempDir;

use ptlaunch_core::config::{LauncherConfig, TrainerConfig};
use ptlaunch_core::{ExitStatus, RunConfigurator};

#[tokio::test]
async fn test_interrupt_is_forwarded_to_trainer() {
    let data = TempDir::new().unwrap();
    std::fs::write(data.path().join("domain_train.txt"), "great keyboard\n").unwrap();
    std::fs::write(data.path().join("domain_dev.txt"), "slow charger\n").unwrap();

    let scripts = TempDir::new().unwrap();
    let script = scripts.path().join("stub_trainer.sh");
    std::fs::write(
        &script,
        "trap 'echo got-int; exit 3' INT\necho ready\nsleep 10\n",
    )
    .unwrap();

    let launcher = RunConfigurator::new(LauncherConfig {
        trainer: TrainerConfig {
            interpreter: "sh".into(),
            script,
            ..TrainerConfig::default()
        },
        ..LauncherConfig::default()
    })
    .unwrap();
    let log_path = data.path().join("pt_bert-v1").join("train.log");

    let interrupter = async {
        // "ready" is printed after the trap is set and after the relay is installed.
        for _ in 0..200 {
            if std::fs::read_to_string(&log_path).is_ok_and(|log| log.contains("ready")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        // SAFETY: signalling our own pid has no memory-safety preconditions.
        unsafe {
            libc::kill(libc::getpid(), libc::SIGINT);
        }
    };

    let (status, ()) = tokio::time::timeout(
        Duration::from_secs(8),
        async { tokio::join!(launcher.run("bert", "v1", "0", data.path()), interrupter) },
    )
    .await
    .expect("trainer was not interrupted");

    assert_eq!(status.unwrap(), ExitStatus::Exited(3));
    assert_eq!(
        std::fs::read_to_string(&log_path).unwrap(),
        "ready\ngot-int\n"
    );
}
