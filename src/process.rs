//! Subprocess plumbing shared by every pipeline step.
//!
//! Steps describe the command they want with [`Cmd`] and hand it to a
//! [`CommandRunner`]. [`SystemRunner`] spawns real processes; tests swap in a
//! scripted runner so the pipeline can be exercised without meson or pip.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use tracing::{debug, warn};

use crate::error::Termination;

/// A fully described external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    cwd: Option<PathBuf>,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_envs(&self) -> &[(OsString, OsString)] {
        &self.envs
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Value this command sets for `key`, if any.
    pub fn env_value(&self, key: &str) -> Option<&OsStr> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    /// Space-joined command line, for logs and error messages.
    pub fn describe(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// stdout followed by stderr on its own line, trimmed.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !text.is_empty() && !text.ends_with('\n') && !self.stderr.is_empty() {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text.trim().to_string()
    }
}

/// Executes [`Cmd`] values. Blocking; one process at a time.
pub trait CommandRunner {
    /// Run to completion. `Err` means the process could not be started;
    /// a non-zero exit is reported through [`CmdOutput::status`].
    fn run(&self, cmd: &Cmd) -> io::Result<CmdOutput>;
}

/// Runs commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &Cmd) -> io::Result<CmdOutput> {
        debug!(command = %cmd.describe(), "spawning");

        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        for (key, value) in &cmd.envs {
            command.env(key, value);
        }
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }

        let output = command.output()?;
        Ok(CmdOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A checked invocation that did not exit successfully.
#[derive(Debug, Clone)]
pub struct Failure {
    pub termination: Termination,
    pub output: String,
}

/// Run `cmd` and require a zero exit status.
pub fn run_checked(runner: &dyn CommandRunner, cmd: &Cmd) -> Result<CmdOutput, Failure> {
    match runner.run(cmd) {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => {
            warn!(command = %cmd.describe(), status = %output.status, "command failed");
            Err(Failure {
                termination: Termination::Exited(output.status),
                output: output.combined(),
            })
        }
        Err(err) => {
            warn!(command = %cmd.describe(), error = %err, "command could not be started");
            Err(Failure {
                termination: Termination::NotStarted(err.to_string()),
                output: String::new(),
            })
        }
    }
}
