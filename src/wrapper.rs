//! Launcher synthesis.
//!
//! The wrapper takes the canonical binary name. It prepends the isolated
//! environment's package directory to `PYTHONPATH`, keeping any value the
//! caller already had, then `exec`s the isolated interpreter on the relocated
//! binary with the original arguments. `exec` replaces the shell, so the
//! delegated exit status is the wrapper's exit status.
//!
//! Rendering is pure; [`write_wrapper`] is the only part that touches disk.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::info;

use crate::env::EnvironmentDescriptor;
use crate::error::StepError;
use crate::relocate::BuildArtifact;

/// Module search path variable the wrapper extends.
pub const MODULE_PATH_VAR: &str = "PYTHONPATH";

/// Marker line identifying a generated wrapper.
pub const WRAPPER_MARKER: &str = "# generated by meson-venv-installer; do not edit";

pub const WRAPPER_MODE: u32 = 0o755;

/// Quote `value` for POSIX sh using single quotes.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

/// Render the wrapper script. Same inputs, same bytes.
///
/// Paths come from an [`InstallTree`](crate::config::InstallTree), which
/// only admits UTF-8 prefixes, so the lossy conversion below never alters them.
pub fn render_wrapper(env: &EnvironmentDescriptor, artifact: &BuildArtifact) -> String {
    let package_dir = env.package_dir();
    let interpreter = env.interpreter();
    let relocated = artifact.relocated();

    format!(
        "#!/bin/sh\n\
         {marker}\n\
         {var}={package_dir}\"${{{var}:+:${var}}}\"\n\
         export {var}\n\
         exec {interpreter} {relocated} \"$@\"\n",
        marker = WRAPPER_MARKER,
        var = MODULE_PATH_VAR,
        package_dir = shell_quote(&package_dir.to_string_lossy()),
        interpreter = shell_quote(&interpreter.to_string_lossy()),
        relocated = shell_quote(&relocated.to_string_lossy()),
    )
}

/// Write `content` to `path` and make it executable for everyone.
pub fn write_wrapper(path: &Path, content: &str) -> Result<(), StepError> {
    let wrap = |source| StepError::WrapperWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(wrap)?;
    }
    fs::write(path, content).map_err(wrap)?;
    fs::set_permissions(path, fs::Permissions::from_mode(WRAPPER_MODE)).map_err(wrap)?;

    info!(path = %path.display(), "wrote wrapper");
    Ok(())
}

/// Render and write the wrapper for `artifact`.
pub fn generate_wrapper(
    env: &EnvironmentDescriptor,
    artifact: &BuildArtifact,
) -> Result<(), StepError> {
    write_wrapper(artifact.wrapper(), &render_wrapper(env, artifact))
}
