//! Post-install desktop integration.
//!
//! Regenerates the GSettings schema cache and the hicolor icon cache under
//! the system-wide share root. Both tools always run; every failure is
//! reported. Safe to run repeatedly and outside a fresh install.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{StepError, ToolFailure};
use crate::process::{run_checked, Cmd, CommandRunner};

pub const SCHEMA_COMPILER: &str = "glib-compile-schemas";
pub const ICON_CACHE_UPDATER: &str = "gtk4-update-icon-cache";

/// `<share>/glib-2.0/schemas`
pub fn schema_dir(share_root: &Path) -> PathBuf {
    share_root.join("glib-2.0").join("schemas")
}

/// `<share>/icons/hicolor`
pub fn icon_theme_dir(share_root: &Path) -> PathBuf {
    share_root.join("icons").join("hicolor")
}

/// The cache-regeneration commands, in the order they run.
pub fn cache_commands(share_root: &Path) -> Vec<(&'static str, Cmd)> {
    vec![
        (
            SCHEMA_COMPILER,
            Cmd::new(SCHEMA_COMPILER).arg_path(&schema_dir(share_root)),
        ),
        (
            ICON_CACHE_UPDATER,
            Cmd::new(ICON_CACHE_UPDATER)
                .arg("-qtf")
                .arg_path(&icon_theme_dir(share_root)),
        ),
    ]
}

/// Run every cache tool and report all that failed.
pub fn regenerate_caches(runner: &dyn CommandRunner, share_root: &Path) -> Result<(), StepError> {
    let mut failures = Vec::new();

    for (tool, cmd) in cache_commands(share_root) {
        info!(tool, "regenerating cache");
        if let Err(failure) = run_checked(runner, &cmd) {
            failures.push(ToolFailure {
                tool: tool.to_string(),
                termination: failure.termination,
                output: failure.output,
            });
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(StepError::CacheRegeneration { failures })
    }
}
