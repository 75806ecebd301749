//! Isolated runtime environment provisioning.
//!
//! Creates a Python virtual environment under `libexec/`, upgrades pip
//! inside it, then installs every environment-provided runtime dependency
//! with its version constraint. A failure leaves the partial environment in
//! place; cleanup belongs to the packaging system's uninstall.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::deps::DependencySpec;
use crate::error::{StepError, Termination};
use crate::process::{run_checked, Cmd, CommandRunner};

/// Prints the running interpreter's `major.minor`.
pub const VERSION_QUERY: &str = "import sys; print('%d.%d' % sys.version_info[:2])";

/// A provisioned environment. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDescriptor {
    root: PathBuf,
    version_tag: String,
    installed: Vec<DependencySpec>,
}

impl EnvironmentDescriptor {
    pub fn new(
        root: impl Into<PathBuf>,
        version_tag: impl Into<String>,
        installed: Vec<DependencySpec>,
    ) -> Self {
        Self {
            root: root.into(),
            version_tag: version_tag.into(),
            installed,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_tag(&self) -> &str {
        &self.version_tag
    }

    pub fn installed(&self) -> &[DependencySpec] {
        &self.installed
    }

    /// `<root>/bin/python`
    pub fn interpreter(&self) -> PathBuf {
        self.root.join("bin").join("python")
    }

    /// `<root>/lib/python<tag>/site-packages`
    pub fn package_dir(&self) -> PathBuf {
        self.root
            .join("lib")
            .join(format!("python{}", self.version_tag))
            .join("site-packages")
    }
}

/// Inputs for [`build_environment`].
#[derive(Debug, Clone)]
pub struct EnvironmentRequest<'a> {
    pub root: PathBuf,
    pub version_tag: String,
    pub host_interpreter: PathBuf,
    pub system_site_packages: bool,
    pub packages: &'a [DependencySpec],
}

/// Create the environment and install `request.packages` into it.
pub fn build_environment(
    runner: &dyn CommandRunner,
    request: &EnvironmentRequest<'_>,
) -> Result<EnvironmentDescriptor, StepError> {
    let root = &request.root;
    info!(path = %root.display(), python = %request.version_tag, "creating isolated environment");

    if let Some(parent) = root.parent() {
        fs::create_dir_all(parent).map_err(|err| StepError::EnvironmentCreation {
            path: root.clone(),
            termination: Termination::NotStarted(format!(
                "creating '{}': {err}",
                parent.display()
            )),
            output: String::new(),
        })?;
    }

    let mut venv = Cmd::new(&request.host_interpreter).args(["-m", "venv", "--clear"]);
    if request.system_site_packages {
        venv = venv.arg("--system-site-packages");
    }
    let venv = venv.arg_path(root);
    run_checked(runner, &venv).map_err(|failure| StepError::EnvironmentCreation {
        path: root.clone(),
        termination: failure.termination,
        output: failure.output,
    })?;

    let env = EnvironmentDescriptor::new(root.clone(), request.version_tag.clone(), Vec::new());
    verify_version(runner, &env)?;

    info!(path = %root.display(), "upgrading pip");
    pip_install(runner, &env, &["--upgrade", "pip"], "pip")?;

    let mut installed = Vec::with_capacity(request.packages.len());
    for dep in request.packages {
        let requirement = dep.requirement();
        info!(requirement = %requirement, "installing into isolated environment");
        pip_install(runner, &env, &[requirement.as_str()], &requirement)?;
        installed.push(dep.clone());
    }

    Ok(EnvironmentDescriptor::new(
        root.clone(),
        request.version_tag.clone(),
        installed,
    ))
}

/// The environment interpreter must be the pinned version, otherwise the
/// recorded package directory does not exist.
fn verify_version(runner: &dyn CommandRunner, env: &EnvironmentDescriptor) -> Result<(), StepError> {
    let query = Cmd::new(env.interpreter()).arg("-c").arg(VERSION_QUERY);
    let output = run_checked(runner, &query).map_err(|failure| StepError::EnvironmentCreation {
        path: env.root.clone(),
        termination: failure.termination,
        output: failure.output,
    })?;

    let reported = output.stdout.trim();
    if reported != env.version_tag {
        return Err(StepError::EnvironmentCreation {
            path: env.root.clone(),
            termination: Termination::Unexpected(format!(
                "interpreter is Python {reported}, expected {}",
                env.version_tag
            )),
            output: output.combined(),
        });
    }
    Ok(())
}

fn pip_install(
    runner: &dyn CommandRunner,
    env: &EnvironmentDescriptor,
    args: &[&str],
    requirement: &str,
) -> Result<(), StepError> {
    let cmd = Cmd::new(env.interpreter())
        .args(["-m", "pip", "install", "--disable-pip-version-check"])
        .args(args);
    run_checked(runner, &cmd).map_err(|failure| StepError::DependencyInstall {
        requirement: requirement.to_string(),
        termination: failure.termination,
        output: failure.output,
    })?;
    Ok(())
}
