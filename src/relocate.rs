//! Binary relocation: `<bindir>/<name>` becomes `<bindir>/<name>-real`,
//! freeing the canonical name for the wrapper.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::OnExistingReal;
use crate::error::{RelocationConflict, StepError};
use crate::wrapper::WRAPPER_MARKER;

pub const REAL_SUFFIX: &str = "-real";

/// Paths of the installed binary before and after relocation.
///
/// The wrapper always takes the original path; the relocated path is never
/// equal to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    original: PathBuf,
    relocated: PathBuf,
}

impl BuildArtifact {
    pub fn for_binary(bin_dir: &Path, name: &str) -> Self {
        Self {
            original: bin_dir.join(name),
            relocated: bin_dir.join(format!("{name}{REAL_SUFFIX}")),
        }
    }

    /// Where meson installed the executable.
    pub fn original(&self) -> &Path {
        &self.original
    }

    /// Hidden name the executable is moved to.
    pub fn relocated(&self) -> &Path {
        &self.relocated
    }

    /// Where the wrapper is written: the pre-relocation path.
    pub fn wrapper(&self) -> &Path {
        &self.original
    }
}

/// Move the installed executable out of the way.
pub fn relocate_binary(
    bin_dir: &Path,
    name: &str,
    on_existing_real: OnExistingReal,
) -> Result<BuildArtifact, StepError> {
    let artifact = BuildArtifact::for_binary(bin_dir, name);
    let conflict = |conflict| StepError::Relocation {
        from: artifact.original.clone(),
        to: artifact.relocated.clone(),
        conflict,
    };

    if fs::symlink_metadata(&artifact.original).is_err() {
        return Err(conflict(RelocationConflict::SourceMissing));
    }
    if is_generated_wrapper(&artifact.original) {
        return Err(conflict(RelocationConflict::SourceIsWrapper));
    }

    if fs::symlink_metadata(&artifact.relocated).is_ok() {
        match on_existing_real {
            OnExistingReal::Fail => {
                return Err(conflict(RelocationConflict::DestinationExists));
            }
            OnExistingReal::Replace => {
                warn!(
                    path = %artifact.relocated.display(),
                    "replacing relocated binary left by a previous install"
                );
            }
        }
    }

    fs::rename(&artifact.original, &artifact.relocated)
        .map_err(|err| conflict(RelocationConflict::Rename(err.to_string())))?;

    info!(
        from = %artifact.original.display(),
        to = %artifact.relocated.display(),
        "relocated installed binary"
    );
    Ok(artifact)
}

fn is_generated_wrapper(path: &Path) -> bool {
    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    let mut head = Vec::with_capacity(256);
    if file.take(256).read_to_end(&mut head).is_err() {
        return false;
    }
    String::from_utf8_lossy(&head).contains(WRAPPER_MARKER)
}
