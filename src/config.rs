//! Install configuration and the installation target tree.
//!
//! Every setting has a default matching the fixed recipe, so the config file
//! is optional. Values are layered: defaults, then `installer.toml`, then
//! environment overrides (`INSTALLER_PYTHON`, `INSTALLER_SHARE_ROOT`).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_APP_NAME: &str = "pattern-renamer";
pub const DEFAULT_ENV_DIR: &str = "venv";
pub const DEFAULT_PYTHON_VERSION: &str = "3.12";
pub const DEFAULT_BUILD_TYPE: &str = "release";
pub const DEFAULT_BUILD_DIR: &str = "build";
pub const DEFAULT_SHARE_ROOT: &str = "/usr/local/share";

/// Variable meson reads to pick the Python interpreter.
pub const INTERPRETER_ENV_VAR: &str = "PYTHON";
/// Host interpreter override.
pub const PYTHON_OVERRIDE_VAR: &str = "INSTALLER_PYTHON";
/// System share root override.
pub const SHARE_ROOT_OVERRIDE_VAR: &str = "INSTALLER_SHARE_ROOT";

const MESON_BUILD_TYPES: &[&str] = &[
    "plain",
    "debug",
    "debugoptimized",
    "release",
    "minsize",
    "custom",
];

/// Prefix supplied by the packaging system and the paths derived from it.
///
/// Read-only: the pipeline computes paths from it but never changes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTree {
    prefix: PathBuf,
}

impl InstallTree {
    pub fn new(prefix: impl Into<PathBuf>) -> Result<Self> {
        let prefix = prefix.into();
        if !prefix.is_absolute() {
            bail!(
                "installation prefix must be an absolute path, got '{}'",
                prefix.display()
            );
        }
        // Every derived path ends up verbatim in the generated wrapper.
        if prefix.to_str().is_none() {
            bail!(
                "installation prefix must be valid UTF-8, got '{}'",
                prefix.display()
            );
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    pub fn libexec_dir(&self) -> PathBuf {
        self.prefix.join("libexec")
    }

    pub fn share_dir(&self) -> PathBuf {
        self.prefix.join("share")
    }
}

/// What to do when `<name>-real` is already present before relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnExistingReal {
    /// Treat it as a conflict and abort.
    #[default]
    Fail,
    /// Replace it with the freshly installed binary.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallConfig {
    pub app_name: String,
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub build_type: String,
    pub env_dir_name: String,
    pub python_version: String,
    pub host_interpreter: Option<PathBuf>,
    pub system_site_packages: bool,
    pub share_root: PathBuf,
    pub on_existing_real: OnExistingReal,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            source_dir: PathBuf::from("."),
            build_dir: PathBuf::from(DEFAULT_BUILD_DIR),
            build_type: DEFAULT_BUILD_TYPE.to_string(),
            env_dir_name: DEFAULT_ENV_DIR.to_string(),
            python_version: DEFAULT_PYTHON_VERSION.to_string(),
            host_interpreter: None,
            system_site_packages: true,
            share_root: PathBuf::from(DEFAULT_SHARE_ROOT),
            on_existing_real: OnExistingReal::Fail,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstallToml {
    app: Option<AppToml>,
    environment: Option<EnvironmentToml>,
    layout: Option<LayoutToml>,
    relocation: Option<RelocationToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AppToml {
    name: Option<String>,
    source_dir: Option<String>,
    build_dir: Option<String>,
    build_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnvironmentToml {
    dir_name: Option<String>,
    python: Option<String>,
    host_interpreter: Option<String>,
    system_site_packages: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayoutToml {
    share_root: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RelocationToml {
    on_existing_real: Option<OnExistingReal>,
}

fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

impl InstallConfig {
    /// Load defaults, an optional config file, and environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading install config '{}'", path.display()))?;
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                Self::from_toml_str(&text, base)
                    .with_context(|| format!("parsing install config '{}'", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a config document. Relative paths resolve against `base`.
    pub fn from_toml_str(text: &str, base: &Path) -> Result<Self> {
        let parsed: InstallToml = toml::from_str(text)?;
        let mut config = Self::default();

        if let Some(app) = parsed.app {
            if let Some(name) = app.name {
                config.app_name = name.trim().to_string();
            }
            if let Some(source_dir) = app.source_dir {
                config.source_dir = resolve_path(base, &source_dir);
            }
            if let Some(build_dir) = app.build_dir {
                config.build_dir = PathBuf::from(build_dir);
            }
            if let Some(build_type) = app.build_type {
                config.build_type = build_type.trim().to_ascii_lowercase();
            }
        }

        if let Some(env) = parsed.environment {
            if let Some(dir_name) = env.dir_name {
                config.env_dir_name = dir_name.trim().to_string();
            }
            if let Some(python) = env.python {
                config.python_version = python.trim().to_string();
            }
            if let Some(interpreter) = env.host_interpreter {
                // Bare names are looked up on PATH.
                config.host_interpreter = Some(if interpreter.contains('/') {
                    resolve_path(base, &interpreter)
                } else {
                    PathBuf::from(interpreter.trim())
                });
            }
            if let Some(flag) = env.system_site_packages {
                config.system_site_packages = flag;
            }
        }

        if let Some(layout) = parsed.layout {
            if let Some(share_root) = layout.share_root {
                config.share_root = PathBuf::from(share_root);
            }
        }

        if let Some(relocation) = parsed.relocation {
            if let Some(policy) = relocation.on_existing_real {
                config.on_existing_real = policy;
            }
        }

        Ok(config)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(python) = lookup(PYTHON_OVERRIDE_VAR).filter(|v| !v.trim().is_empty()) {
            self.host_interpreter = Some(PathBuf::from(python));
        }
        if let Some(share) = lookup(SHARE_ROOT_OVERRIDE_VAR).filter(|v| !v.trim().is_empty()) {
            self.share_root = PathBuf::from(share);
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_component("app name", &self.app_name)?;
        validate_component("environment directory name", &self.env_dir_name)?;

        let mut parts = self.python_version.split('.');
        let well_formed = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(major), Some(minor), None)
                if !major.is_empty()
                    && !minor.is_empty()
                    && major.chars().all(|c| c.is_ascii_digit())
                    && minor.chars().all(|c| c.is_ascii_digit())
        );
        if !well_formed {
            bail!(
                "invalid interpreter version tag '{}'; expected '<major>.<minor>' such as '{}'",
                self.python_version,
                DEFAULT_PYTHON_VERSION
            );
        }

        if !MESON_BUILD_TYPES.contains(&self.build_type.as_str()) {
            bail!(
                "unsupported build type '{}'; expected one of: {}",
                self.build_type,
                MESON_BUILD_TYPES.join(", ")
            );
        }

        if !self.share_root.is_absolute() {
            bail!(
                "share root must be an absolute path, got '{}'",
                self.share_root.display()
            );
        }

        Ok(())
    }

    /// Isolated environment root under `libexec/`.
    pub fn env_root(&self, tree: &InstallTree) -> PathBuf {
        tree.libexec_dir().join(&self.env_dir_name)
    }

    /// Interpreter used to create the environment.
    pub fn host_interpreter(&self) -> PathBuf {
        self.host_interpreter
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("python{}", self.python_version)))
    }

    /// Meson build directory, relative paths anchored at the source dir.
    pub fn build_dir(&self) -> PathBuf {
        if self.build_dir.is_absolute() {
            self.build_dir.clone()
        } else {
            self.source_dir.join(&self.build_dir)
        }
    }
}

fn validate_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains('/') {
        bail!("invalid {what} '{value}'; must be a single non-empty path component");
    }
    Ok(())
}
