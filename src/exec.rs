// CLASSIFICATION: COMMUNITY
// Filename: exec.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! External program execution.
//!
//! kexec, netboot and the recovery shell are separate executables. They
//! are launched through [`CommandRunner`] so tests can observe the exact
//! argument vectors without replacing the running process.

use log::info;
use std::io;
use std::process::{Command, ExitStatus, Stdio};

/// Runs an external program to completion.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, inheriting stdio, and wait for it.
    fn run(&self, program: &str, args: &[String]) -> io::Result<ExitStatus>;
}

/// [`CommandRunner`] backed by [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<ExitStatus> {
        info!("Executing command: {} {}", program, args.join(" "));
        Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
    }
}
