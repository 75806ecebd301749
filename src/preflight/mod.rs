//! Host preflight checks.
//!
//! Confirms the build and post-install tools are on `PATH` before anything
//! is created under the prefix, so a missing tool is reported with the
//! package that provides it instead of as a failed subprocess midway through.
//!
//! # Example
//!
//! ```rust,no_run
//! use meson_venv_installer::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("meson") {
//!     println!("meson not installed");
//! }
//!
//! let tools = &[("meson", "meson"), ("ninja", "ninja")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};
use tracing::debug;

use crate::config::InstallConfig;
use crate::hooks::{ICON_CACHE_UPDATER, SCHEMA_COMPILER};

/// Check if a command exists on the host system.
///
/// Accepts bare names (looked up in `PATH`) and explicit paths.
pub fn command_exists(cmd: &str) -> bool {
    match which::which(cmd) {
        Ok(path) => {
            debug!(command = cmd, path = %path.display(), "found host tool");
            true
        }
        Err(_) => false,
    }
}

/// Tools every install needs, as (command, package) pairs.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("meson", "meson"),
    ("ninja", "ninja"),
    ("pkg-config", "pkgconf"),
    (SCHEMA_COMPILER, "glib"),
    (ICON_CACHE_UPDATER, "gtk4"),
];

/// Check that specific tools are available.
///
/// Returns an error listing every missing tool and its package.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// [`REQUIRED_TOOLS`] plus the interpreter the environment is created from.
pub fn check_host(config: &InstallConfig) -> Result<()> {
    let interpreter = config.host_interpreter().to_string_lossy().into_owned();
    let package = format!("python@{}", config.python_version);

    let mut tools: Vec<(&str, &str)> = REQUIRED_TOOLS.to_vec();
    tools.push((interpreter.as_str(), package.as_str()));
    check_required_tools(&tools)
}
