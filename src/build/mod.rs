//! Meson configure/compile/install driver.
//!
//! Three blocking invocations, in order. The first non-zero exit aborts the
//! driver; later steps never run.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::INTERPRETER_ENV_VAR;
use crate::env::EnvironmentDescriptor;
use crate::error::StepError;
use crate::process::{run_checked, Cmd, CommandRunner};

/// One meson invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuildStep {
    Configure,
    Compile,
    Install,
}

impl BuildStep {
    pub const ALL: [BuildStep; 3] = [BuildStep::Configure, BuildStep::Compile, BuildStep::Install];
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::Configure => write!(f, "setup"),
            BuildStep::Compile => write!(f, "compile"),
            BuildStep::Install => write!(f, "install"),
        }
    }
}

/// Everything the driver needs to invoke meson.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub prefix: PathBuf,
    pub build_type: String,
    /// Interpreter exported through `PYTHON` for every step.
    pub interpreter: PathBuf,
}

impl BuildPlan {
    pub fn new(
        source_dir: &Path,
        build_dir: &Path,
        prefix: &Path,
        build_type: &str,
        env: &EnvironmentDescriptor,
    ) -> Self {
        Self {
            source_dir: source_dir.to_path_buf(),
            build_dir: build_dir.to_path_buf(),
            prefix: prefix.to_path_buf(),
            build_type: build_type.to_string(),
            interpreter: env.interpreter(),
        }
    }

    /// The command for `step`.
    pub fn command(&self, step: BuildStep) -> Cmd {
        let cmd = Cmd::new("meson")
            .current_dir(&self.source_dir)
            .env(INTERPRETER_ENV_VAR, &self.interpreter);
        match step {
            BuildStep::Configure => cmd
                .arg("setup")
                .arg_path(&self.build_dir)
                .arg(format!("--prefix={}", self.prefix.display()))
                .arg(format!("--buildtype={}", self.build_type)),
            BuildStep::Compile => cmd.arg("compile").arg("-C").arg_path(&self.build_dir),
            BuildStep::Install => cmd.arg("install").arg("-C").arg_path(&self.build_dir),
        }
    }
}

/// Run configure, compile and install.
pub fn drive_build(runner: &dyn CommandRunner, plan: &BuildPlan) -> Result<(), StepError> {
    for step in BuildStep::ALL {
        info!(step = %step, build_dir = %plan.build_dir.display(), "running meson");
        run_checked(runner, &plan.command(step)).map_err(|failure| StepError::BuildStep {
            step,
            termination: failure.termination,
            output: failure.output,
        })?;
    }
    Ok(())
}
