// CLASSIFICATION: COMMUNITY
// Filename: recovery.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14
//
// ─────────────────────────────────────────────────────────────
// Fail-Stop Recovery
//
// Every unrecoverable error in the loader ends here. One policy is
// chosen at startup:
//
//  * Secure     – sync, optional debug delay, then reboot or power
//                 off. Never returns unless the syscall itself fails.
//  * Permissive – log and optionally hand the console to a recovery
//                 shell. Debug images only.
// ─────────────────────────────────────────────────────────────

use log::{error, info, warn};
use std::convert::Infallible;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{RecoveryConfig, RecoveryMode};
use crate::exec::CommandRunner;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("cannot {action}: {source}")]
    Power {
        action: PowerAction,
        source: io::Error,
    },
    #[error("recovery shell {shell} failed: {reason}")]
    Shell { shell: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Reboot,
    PowerOff,
}

impl std::fmt::Display for PowerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerAction::Reboot => f.write_str("reboot"),
            PowerAction::PowerOff => f.write_str("power off"),
        }
    }
}

/// Privileged power and sync calls, injectable for tests.
pub trait PowerControl: Send + Sync {
    /// Flush stdout, stderr and all filesystems.
    fn sync(&self) -> io::Result<()>;
    /// Reboot or power off; returns only on failure.
    fn power(&self, action: PowerAction) -> io::Result<Infallible>;
}

/// `sync(2)` and `reboot(2)` via nix.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPower;

impl PowerControl for SystemPower {
    fn sync(&self) -> io::Result<()> {
        io::stdout().flush()?;
        io::stderr().flush()?;
        nix::unistd::sync();
        Ok(())
    }

    fn power(&self, action: PowerAction) -> io::Result<Infallible> {
        use nix::sys::reboot::{reboot, RebootMode};
        let mode = match action {
            PowerAction::Reboot => RebootMode::RB_AUTOBOOT,
            PowerAction::PowerOff => RebootMode::RB_POWER_OFF,
        };
        reboot(mode).map_err(io::Error::from)
    }
}

/// Reboot or power off, never continue.
pub struct SecureRecovery {
    pub action: PowerAction,
    pub sync: bool,
    pub debug_delay: Option<Duration>,
    pub power: Arc<dyn PowerControl>,
}

/// Log and optionally run a recovery shell.
pub struct PermissiveRecovery {
    pub shell: Option<PathBuf>,
    pub runner: Arc<dyn CommandRunner>,
}

/// The process-wide fail-stop sink.
pub enum RecoveryPolicy {
    Permissive(PermissiveRecovery),
    Secure(SecureRecovery),
}

impl std::fmt::Debug for RecoveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryPolicy::Permissive(p) => f
                .debug_struct("Permissive")
                .field("shell", &p.shell)
                .finish(),
            RecoveryPolicy::Secure(s) => f
                .debug_struct("Secure")
                .field("action", &s.action)
                .field("sync", &s.sync)
                .field("debug_delay", &s.debug_delay)
                .finish(),
        }
    }
}

impl RecoveryPolicy {
    /// Build the policy selected in `config`.
    pub fn from_config(
        config: &RecoveryConfig,
        power: Arc<dyn PowerControl>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        match config.mode {
            RecoveryMode::Secure => RecoveryPolicy::Secure(SecureRecovery {
                action: if config.reboot {
                    PowerAction::Reboot
                } else {
                    PowerAction::PowerOff
                },
                sync: config.sync,
                debug_delay: config.debug_delay(),
                power,
            }),
            RecoveryMode::Permissive => {
                warn!("Permissive recovery selected, not for production use");
                RecoveryPolicy::Permissive(PermissiveRecovery {
                    shell: config.shell.clone(),
                    runner,
                })
            }
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, RecoveryPolicy::Secure(_))
    }

    /// Handle a fatal condition described by `message`.
    ///
    /// Secure policies only return when the power syscall fails.
    /// Permissive policies return once the recovery shell exits.
    pub fn recover(&self, message: &str) -> Result<(), RecoveryError> {
        error!("{}", message);
        match self {
            RecoveryPolicy::Secure(secure) => Err(secure.recover(message)),
            RecoveryPolicy::Permissive(permissive) => permissive.recover(),
        }
    }
}

impl SecureRecovery {
    fn recover(&self, message: &str) -> RecoveryError {
        if self.sync {
            if let Err(e) = self.power.sync() {
                warn!("Sync before {} failed: {}", self.action, e);
            }
        }
        if let Some(delay) = self.debug_delay {
            info!("{}; {} in {:?}", message, self.action, delay);
            std::thread::sleep(delay);
        }
        match self.power.power(self.action) {
            Ok(never) => match never {},
            Err(source) => RecoveryError::Power {
                action: self.action,
                source,
            },
        }
    }
}

impl PermissiveRecovery {
    fn recover(&self) -> Result<(), RecoveryError> {
        let Some(shell) = &self.shell else {
            return Ok(());
        };
        let program = shell.display().to_string();
        info!("Starting recovery shell {}", program);
        let status = self
            .runner
            .run(&program, &[])
            .map_err(|e| RecoveryError::Shell {
                shell: shell.clone(),
                reason: e.to_string(),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(RecoveryError::Shell {
                shell: shell.clone(),
                reason: status.to_string(),
            })
        }
    }
}

/// Route a fatal error through `policy` and stop the process.
pub fn fail_stop(policy: &RecoveryPolicy, message: &str) -> ! {
    if let Err(e) = policy.recover(message) {
        error!("Recovery failed: {}", e);
    }
    error!("Recovery returned, exiting");
    std::process::exit(1)
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingPower;
    use super::*;
    use crate::exec::testing::RecordingRunner;

    fn config(mode: RecoveryMode) -> RecoveryConfig {
        RecoveryConfig {
            mode,
            ..RecoveryConfig::default()
        }
    }

    #[test]
    fn secure_syncs_then_reboots() {
        let power = Arc::new(RecordingPower::default());
        let policy = RecoveryPolicy::from_config(
            &config(RecoveryMode::Secure),
            power.clone(),
            Arc::new(RecordingRunner::default()),
        );
        let err = policy.recover("tampered archive").unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::Power {
                action: PowerAction::Reboot,
                ..
            }
        ));
        assert_eq!(power.calls(), ["sync", "reboot"]);
    }

    #[test]
    fn secure_power_off_without_sync() {
        let power = Arc::new(RecordingPower::default());
        let cfg = RecoveryConfig {
            reboot: false,
            sync: false,
            ..config(RecoveryMode::Secure)
        };
        let policy =
            RecoveryPolicy::from_config(&cfg, power.clone(), Arc::new(RecordingRunner::default()));
        assert!(policy.is_secure());
        policy.recover("no TPM").unwrap_err();
        assert_eq!(power.calls(), ["power off"]);
    }

    #[test]
    fn permissive_runs_shell() {
        let runner = Arc::new(RecordingRunner::default());
        let cfg = RecoveryConfig {
            shell: Some(PathBuf::from("/bin/rush")),
            ..config(RecoveryMode::Permissive)
        };
        let policy =
            RecoveryPolicy::from_config(&cfg, Arc::new(RecordingPower::default()), runner.clone());
        policy.recover("debug").unwrap();
        assert_eq!(runner.calls(), [("/bin/rush".to_string(), Vec::new())]);
    }

    #[test]
    fn permissive_without_shell_returns() {
        let power = Arc::new(RecordingPower::default());
        let policy = RecoveryPolicy::from_config(
            &config(RecoveryMode::Permissive),
            power.clone(),
            Arc::new(RecordingRunner::default()),
        );
        policy.recover("debug").unwrap();
        assert!(power.calls().is_empty());
    }

    #[test]
    fn failing_shell_is_reported() {
        let cfg = RecoveryConfig {
            shell: Some(PathBuf::from("/bin/sh")),
            ..config(RecoveryMode::Permissive)
        };
        let policy = RecoveryPolicy::from_config(
            &cfg,
            Arc::new(RecordingPower::default()),
            Arc::new(RecordingRunner::failing(2)),
        );
        assert!(matches!(
            policy.recover("x"),
            Err(RecoveryError::Shell { .. })
        ));
    }
}
