//! Failure taxonomy for the install pipeline.
//!
//! Every variant is fatal. External tool failures carry the tool's exit
//! status and captured output as-is so the operator can diagnose from the
//! tool's own diagnostics.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::build::BuildStep;

/// How an external tool ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The process ran and exited with this status.
    Exited(ExitStatus),
    /// The process could not be started.
    NotStarted(String),
    /// The process exited cleanly but reported something unusable.
    Unexpected(String),
}

impl Termination {
    pub fn code(&self) -> Option<i32> {
        match self {
            Termination::Exited(status) => status.code(),
            Termination::NotStarted(_) | Termination::Unexpected(_) => None,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(status) => write!(f, "{status}"),
            Termination::NotStarted(reason) => write!(f, "could not be started: {reason}"),
            Termination::Unexpected(reason) => write!(f, "{reason}"),
        }
    }
}

/// One failed cache-regeneration tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub tool: String,
    pub termination: Termination,
    pub output: String,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.tool, self.termination)?;
        if !self.output.is_empty() {
            write!(f, ": {}", self.output)?;
        }
        Ok(())
    }
}

/// Why the relocated binary could not be put in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocationConflict {
    SourceMissing,
    /// The canonical path already holds a generated wrapper.
    SourceIsWrapper,
    DestinationExists,
    Rename(String),
}

impl fmt::Display for RelocationConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelocationConflict::SourceMissing => write!(f, "installed binary not found"),
            RelocationConflict::SourceIsWrapper => {
                write!(f, "installed path is a generated wrapper, not a fresh binary")
            }
            RelocationConflict::DestinationExists => {
                write!(f, "relocated binary already exists")
            }
            RelocationConflict::Rename(reason) => write!(f, "rename failed: {reason}"),
        }
    }
}

/// Which part of the wrapper check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrapperProblem {
    Missing,
    NotAFile,
    NotExecutable { mode: u32 },
    Unreadable(String),
}

impl fmt::Display for WrapperProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WrapperProblem::Missing => write!(f, "does not exist"),
            WrapperProblem::NotAFile => write!(f, "is not a regular file"),
            WrapperProblem::NotExecutable { mode } => {
                write!(f, "is not executable by everyone (mode {:o})", mode & 0o7777)
            }
            WrapperProblem::Unreadable(reason) => write!(f, "cannot be inspected: {reason}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("creating isolated environment at '{path}' failed ({termination}): {output}")]
    EnvironmentCreation {
        path: PathBuf,
        termination: Termination,
        output: String,
    },

    #[error("installing '{requirement}' into the isolated environment failed ({termination}): {output}")]
    DependencyInstall {
        requirement: String,
        termination: Termination,
        output: String,
    },

    #[error("meson {step} failed ({termination}): {output}")]
    BuildStep {
        step: BuildStep,
        termination: Termination,
        output: String,
    },

    #[error("relocating '{from}' to '{to}': {conflict}")]
    Relocation {
        from: PathBuf,
        to: PathBuf,
        conflict: RelocationConflict,
    },

    #[error("writing wrapper '{path}'")]
    WrapperWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache regeneration failed: {}", join_failures(.failures))]
    CacheRegeneration { failures: Vec<ToolFailure> },

    #[error("self-test: wrapper '{path}' {problem}")]
    WrapperCheck {
        path: PathBuf,
        problem: WrapperProblem,
    },

    #[error("self-test: module '{module}' could not be imported: {message}")]
    ModuleResolution { module: String, message: String },

    #[error("self-test: import probe under '{interpreter}' did not complete: {detail}")]
    ProbeIncomplete { interpreter: PathBuf, detail: String },

    #[error("{step} requires {missing}, which an earlier step did not produce")]
    MissingInput {
        step: &'static str,
        missing: &'static str,
    },
}

fn join_failures(failures: &[ToolFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_cache_error_names_every_tool() {
        let err = StepError::CacheRegeneration {
            failures: vec![
                ToolFailure {
                    tool: "glib-compile-schemas".into(),
                    termination: Termination::Exited(ExitStatus::from_raw(1 << 8)),
                    output: "bad schema".into(),
                },
                ToolFailure {
                    tool: "gtk4-update-icon-cache".into(),
                    termination: Termination::NotStarted("No such file or directory".into()),
                    output: String::new(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("glib-compile-schemas (exit status: 1): bad schema"));
        assert!(msg.contains("gtk4-update-icon-cache (could not be started"));
    }

    #[test]
    fn test_termination_code() {
        let exited = Termination::Exited(ExitStatus::from_raw(7 << 8));
        assert_eq!(exited.code(), Some(7));
        assert_eq!(Termination::NotStarted("x".into()).code(), None);
    }

    #[test]
    fn test_wrapper_problem_reports_mode() {
        let problem = WrapperProblem::NotExecutable { mode: 0o100644 };
        assert_eq!(problem.to_string(), "is not executable by everyone (mode 644)");
    }
}
