//! Install orchestration for a meson-built Python GTK application that runs
//! from its own isolated virtual environment.
//!
//! The packaging system hands over an installation prefix. From there the
//! crate:
//!
//! - **Environment** - creates `libexec/<env>` and pip-installs the pure
//!   Python dependencies the host does not provide
//! - **Build** - runs meson setup, compile and install with `PYTHON` pointed
//!   at the isolated interpreter
//! - **Relocation** - moves `bin/<name>` to `bin/<name>-real`
//! - **Wrapper** - writes a launcher at `bin/<name>` that extends the module
//!   search path and delegates to the relocated binary
//! - **Post-install** - regenerates the GSettings schema and icon caches
//! - **Self-test** - checks the wrapper and probes every runtime import
//!
//! # Architecture
//!
//! ```text
//! meson-venv-installer (binary)
//!     │
//!     ├── config      InstallConfig (TOML + env overrides), InstallTree
//!     ├── preflight   host tool checks
//!     └── pipeline    Step trait, Stage state machine
//!            │
//!            ├── env       ─┐
//!            ├── build      │
//!            ├── relocate   ├── process::CommandRunner
//!            ├── wrapper    │
//!            ├── hooks      │
//!            └── selftest  ─┘
//!
//! receipt ◄── Outcome      (install-receipt.json)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use meson_venv_installer::{InstallConfig, InstallContext, InstallTree, Pipeline, SystemRunner};
//!
//! let config = InstallConfig::load(None)?;
//! let tree = InstallTree::new("/opt/pattern-renamer")?;
//! let mut ctx = InstallContext::new(&SystemRunner, &config, &tree);
//! let outcome = Pipeline::standard().run(&mut ctx);
//! println!("reached {}", outcome.reached());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod build;
pub mod config;
pub mod deps;
pub mod env;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod receipt;
pub mod relocate;
pub mod selftest;
pub mod wrapper;

pub use config::{InstallConfig, InstallTree, OnExistingReal};
pub use deps::{DependencySpec, Provider, Role, VersionConstraint};
pub use env::EnvironmentDescriptor;
pub use error::StepError;
pub use pipeline::{InstallContext, Outcome, Pipeline, Stage, Step};
pub use process::{CommandRunner, SystemRunner};
pub use relocate::BuildArtifact;
