//! Install receipt written after every `install` run, successful or not.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::{InstallConfig, InstallTree};
use crate::deps::DependencySpec;
use crate::pipeline::{Outcome, Stage};

pub const RECEIPT_FILE: &str = "install-receipt.json";
/// Step name recorded when the host check stops an install.
pub const PREFLIGHT_STEP: &str = "preflight";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDependency {
    pub name: String,
    pub role: String,
    pub provider: String,
    pub constraint: Option<String>,
}

impl From<&DependencySpec> for ReceiptDependency {
    fn from(dep: &DependencySpec) -> Self {
        Self {
            name: dep.name.to_string(),
            role: dep.role.to_string(),
            provider: dep.provider.to_string(),
            constraint: dep.constraint.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub installer_version: String,
    pub app_name: String,
    pub prefix: PathBuf,
    pub status: ReceiptStatus,
    pub reached_stage: String,
    pub failed_step: Option<String>,
    pub cause: Option<String>,
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub dependencies: Vec<ReceiptDependency>,
}

impl InstallReceipt {
    pub fn new(
        config: &InstallConfig,
        tree: &InstallTree,
        deps: &[DependencySpec],
        outcome: &Outcome,
        started_at_utc: String,
    ) -> Self {
        let (status, failed_step, cause) = match outcome {
            Outcome::Completed(_) => (ReceiptStatus::Completed, None, None),
            Outcome::Aborted { step, cause, .. } => (
                ReceiptStatus::Aborted,
                Some(step.to_string()),
                Some(error_chain(cause)),
            ),
        };

        Self {
            installer_version: env!("CARGO_PKG_VERSION").to_string(),
            app_name: config.app_name.clone(),
            prefix: tree.prefix().to_path_buf(),
            status,
            reached_stage: outcome.reached().to_string(),
            failed_step,
            cause,
            started_at_utc,
            finished_at_utc: now_utc_compact(),
            dependencies: deps.iter().map(ReceiptDependency::from).collect(),
        }
    }

    /// Receipt for a run stopped by the host check, before any step ran.
    pub fn preflight_failed(
        config: &InstallConfig,
        tree: &InstallTree,
        deps: &[DependencySpec],
        err: &anyhow::Error,
        started_at_utc: String,
    ) -> Self {
        Self {
            status: ReceiptStatus::Aborted,
            reached_stage: Stage::Declared.to_string(),
            failed_step: Some(PREFLIGHT_STEP.to_string()),
            cause: Some(format!("{err:#}")),
            ..Self::new(
                config,
                tree,
                deps,
                &Outcome::Completed(Stage::Declared),
                started_at_utc,
            )
        }
    }
}

/// `<prefix>/libexec/install-receipt.json`
pub fn receipt_path(tree: &InstallTree) -> PathBuf {
    tree.libexec_dir().join(RECEIPT_FILE)
}

/// `YYYYMMDDTHHMMSSZ`
pub fn now_utc_compact() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

pub fn write_receipt(path: &Path, receipt: &InstallReceipt) -> Result<()> {
    write_json_atomic(path, receipt)
        .with_context(|| format!("writing install receipt '{}'", path.display()))
}

pub fn read_receipt(path: &Path) -> Result<InstallReceipt> {
    let bytes =
        fs::read(path).with_context(|| format!("reading install receipt '{}'", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing install receipt '{}'", path.display()))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path without parent '{}'", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating parent directory '{}'", parent.display()))?;
    let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
    let payload = serde_json::to_vec_pretty(value).context("serializing install receipt")?;
    fs::write(&tmp, payload).with_context(|| format!("writing temp file '{}'", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "renaming temp file '{}' to '{}'",
            tmp.display(),
            path.display()
        )
    })?;
    Ok(())
}

fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
