//! The install pipeline.
//!
//! ```text
//! Declared ─► EnvironmentReady ─► BuiltAndInstalled ─► Relocated
//!                                                          │
//!            SelfTested ◄── PostInstalled ◄── WrapperReady ◄┘
//! ```
//!
//! Each [`Step`] moves the install one stage forward. The first failing step
//! ends the run in [`Outcome::Aborted`]; there is no resume.

use std::fmt;

use tracing::{error, info};

use crate::build::{drive_build, BuildPlan};
use crate::config::{InstallConfig, InstallTree};
use crate::deps::{self, DependencySpec};
use crate::env::{build_environment, EnvironmentDescriptor, EnvironmentRequest};
use crate::error::StepError;
use crate::hooks::regenerate_caches;
use crate::process::CommandRunner;
use crate::relocate::{relocate_binary, BuildArtifact};
use crate::selftest::{probe_script, run_self_test};
use crate::wrapper::generate_wrapper;

/// How far an install got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    Declared = 0,
    EnvironmentReady = 1,
    BuiltAndInstalled = 2,
    Relocated = 3,
    WrapperReady = 4,
    PostInstalled = 5,
    SelfTested = 6,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Declared => write!(f, "Declared"),
            Stage::EnvironmentReady => write!(f, "EnvironmentReady"),
            Stage::BuiltAndInstalled => write!(f, "BuiltAndInstalled"),
            Stage::Relocated => write!(f, "Relocated"),
            Stage::WrapperReady => write!(f, "WrapperReady"),
            Stage::PostInstalled => write!(f, "PostInstalled"),
            Stage::SelfTested => write!(f, "SelfTested"),
        }
    }
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum Outcome {
    Completed(Stage),
    Aborted {
        step: &'static str,
        /// Last stage reached before the failing step.
        reached: Stage,
        cause: StepError,
    },
}

impl Outcome {
    pub fn reached(&self) -> Stage {
        match self {
            Outcome::Completed(stage) => *stage,
            Outcome::Aborted { reached, .. } => *reached,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }
}

/// State threaded through the steps of one run.
pub struct InstallContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub config: &'a InstallConfig,
    pub tree: &'a InstallTree,
    pub deps: Vec<DependencySpec>,
    pub env: Option<EnvironmentDescriptor>,
    pub artifact: Option<BuildArtifact>,
}

impl<'a> InstallContext<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        config: &'a InstallConfig,
        tree: &'a InstallTree,
    ) -> Self {
        Self {
            runner,
            config,
            tree,
            deps: deps::declared(),
            env: None,
            artifact: None,
        }
    }

    fn env(&self, step: &'static str) -> Result<&EnvironmentDescriptor, StepError> {
        self.env.as_ref().ok_or(StepError::MissingInput {
            step,
            missing: "an isolated environment",
        })
    }

    fn artifact(&self, step: &'static str) -> Result<&BuildArtifact, StepError> {
        self.artifact.as_ref().ok_or(StepError::MissingInput {
            step,
            missing: "a relocated binary",
        })
    }
}

/// One unit of install work.
pub trait Step {
    /// Name for logging and receipts.
    fn name(&self) -> &'static str;

    /// Stage the install is in once this step succeeds.
    fn reaches(&self) -> Stage;

    fn execute(&self, ctx: &mut InstallContext<'_>) -> Result<(), StepError>;
}

pub struct EnvironmentStep;

impl Step for EnvironmentStep {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn reaches(&self) -> Stage {
        Stage::EnvironmentReady
    }

    fn execute(&self, ctx: &mut InstallContext<'_>) -> Result<(), StepError> {
        let packages = deps::environment_packages(&ctx.deps);
        let request = EnvironmentRequest {
            root: ctx.config.env_root(ctx.tree),
            version_tag: ctx.config.python_version.clone(),
            host_interpreter: ctx.config.host_interpreter(),
            system_site_packages: ctx.config.system_site_packages,
            packages: &packages,
        };
        ctx.env = Some(build_environment(ctx.runner, &request)?);
        Ok(())
    }
}

pub struct MesonStep;

impl Step for MesonStep {
    fn name(&self) -> &'static str {
        "build"
    }

    fn reaches(&self) -> Stage {
        Stage::BuiltAndInstalled
    }

    fn execute(&self, ctx: &mut InstallContext<'_>) -> Result<(), StepError> {
        let plan = BuildPlan::new(
            &ctx.config.source_dir,
            &ctx.config.build_dir(),
            ctx.tree.prefix(),
            &ctx.config.build_type,
            ctx.env(self.name())?,
        );
        drive_build(ctx.runner, &plan)
    }
}

pub struct RelocateStep;

impl Step for RelocateStep {
    fn name(&self) -> &'static str {
        "relocate"
    }

    fn reaches(&self) -> Stage {
        Stage::Relocated
    }

    fn execute(&self, ctx: &mut InstallContext<'_>) -> Result<(), StepError> {
        let artifact = relocate_binary(
            &ctx.tree.bin_dir(),
            &ctx.config.app_name,
            ctx.config.on_existing_real,
        )?;
        ctx.artifact = Some(artifact);
        Ok(())
    }
}

pub struct WrapperStep;

impl Step for WrapperStep {
    fn name(&self) -> &'static str {
        "wrapper"
    }

    fn reaches(&self) -> Stage {
        Stage::WrapperReady
    }

    fn execute(&self, ctx: &mut InstallContext<'_>) -> Result<(), StepError> {
        generate_wrapper(ctx.env(self.name())?, ctx.artifact(self.name())?)
    }
}

pub struct PostInstallStep;

impl Step for PostInstallStep {
    fn name(&self) -> &'static str {
        "post-install"
    }

    fn reaches(&self) -> Stage {
        Stage::PostInstalled
    }

    fn execute(&self, ctx: &mut InstallContext<'_>) -> Result<(), StepError> {
        regenerate_caches(ctx.runner, &ctx.config.share_root)
    }
}

pub struct SelfTestStep;

impl Step for SelfTestStep {
    fn name(&self) -> &'static str {
        "self-test"
    }

    fn reaches(&self) -> Stage {
        Stage::SelfTested
    }

    fn execute(&self, ctx: &mut InstallContext<'_>) -> Result<(), StepError> {
        let script = probe_script(&deps::runtime_modules(&ctx.deps), deps::GI_NAMESPACES);
        run_self_test(
            ctx.runner,
            ctx.env(self.name())?,
            ctx.artifact(self.name())?.wrapper(),
            &script,
        )
    }
}

/// Ordered steps, run until the first failure.
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    /// Environment, build, relocate, wrapper, post-install, self-test.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(EnvironmentStep),
            Box::new(MesonStep),
            Box::new(RelocateStep),
            Box::new(WrapperStep),
            Box::new(PostInstallStep),
            Box::new(SelfTestStep),
        ])
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, ctx: &mut InstallContext<'_>) -> Outcome {
        let mut reached = Stage::Declared;

        for step in &self.steps {
            info!(step = step.name(), from = %reached, "starting step");
            if let Err(cause) = step.execute(ctx) {
                error!(step = step.name(), reached = %reached, error = %cause, "install aborted");
                return Outcome::Aborted {
                    step: step.name(),
                    reached,
                    cause,
                };
            }
            reached = step.reaches();
            info!(step = step.name(), stage = %reached, "step complete");
        }

        Outcome::Completed(reached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{exit_with, ScriptedRunner};
    use crate::wrapper::WRAPPER_MARKER;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const APP: &str = "pattern-renamer";

    fn setup(temp: &TempDir) -> (InstallConfig, InstallTree) {
        let config = InstallConfig {
            source_dir: temp.path().join("src"),
            share_root: temp.path().join("share"),
            ..InstallConfig::default()
        };
        let tree = InstallTree::new(temp.path().join("prefix")).unwrap();
        (config, tree)
    }

    /// `meson install` drops the executable where the real tool would.
    fn installs_binary(runner: ScriptedRunner, bin_dir: PathBuf) -> ScriptedRunner {
        runner.on("meson install", move |_| {
            fs::create_dir_all(&bin_dir)?;
            fs::write(bin_dir.join(APP), "#!/usr/bin/env python3\nprint('hi')\n")?;
            Ok(exit_with(0, "", ""))
        })
    }

    /// Scripted host whose environment interpreter is the pinned 3.12.
    fn runner() -> ScriptedRunner {
        ScriptedRunner::new().reply_on("sys.version_info", 0, "3.12\n")
    }

    fn probe_ok(runner: ScriptedRunner) -> ScriptedRunner {
        runner.reply_on(" -c ", 0, "probe-ok v1\n")
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Declared < Stage::EnvironmentReady);
        assert!(Stage::PostInstalled < Stage::SelfTested);
        assert_eq!(
            Pipeline::standard().step_names(),
            vec!["environment", "build", "relocate", "wrapper", "post-install", "self-test"]
        );
    }

    #[test]
    fn test_successful_install() {
        let temp = TempDir::new().unwrap();
        let (config, tree) = setup(&temp);
        let runner = probe_ok(installs_binary(runner(), tree.bin_dir()));

        let mut ctx = InstallContext::new(&runner, &config, &tree);
        let outcome = Pipeline::standard().run(&mut ctx);
        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(outcome.reached(), Stage::SelfTested);

        let wrapper = tree.bin_dir().join(APP);
        let real = tree.bin_dir().join(format!("{APP}-real"));
        assert_ne!(wrapper, real);
        assert!(fs::read_to_string(&wrapper).unwrap().contains(WRAPPER_MARKER));
        assert_eq!(
            fs::metadata(&wrapper).unwrap().permissions().mode() & 0o111,
            0o111
        );
        assert!(fs::read_to_string(&real).unwrap().contains("print('hi')"));

        let lines = runner.lines();
        let pip = lines.iter().position(|l| l.contains("pathvalidate>=3.3.1")).unwrap();
        let setup = lines.iter().position(|l| l.starts_with("meson setup")).unwrap();
        let schemas = lines.iter().position(|l| l.starts_with("glib-compile-schemas")).unwrap();
        assert!(pip < setup && setup < schemas);
    }

    #[test]
    fn test_failed_dependency_install_stops_before_meson() {
        let temp = TempDir::new().unwrap();
        let (config, tree) = setup(&temp);
        let runner = runner().fail_on("pathvalidate>=3.3.1", 1, "no matching distribution");

        let mut ctx = InstallContext::new(&runner, &config, &tree);
        match Pipeline::standard().run(&mut ctx) {
            Outcome::Aborted {
                step,
                reached,
                cause: StepError::DependencyInstall { requirement, output, .. },
            } => {
                assert_eq!(step, "environment");
                assert_eq!(reached, Stage::Declared);
                assert_eq!(requirement, "pathvalidate>=3.3.1");
                assert_eq!(output, "no matching distribution");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(runner.count("meson"), 0);
    }

    #[test]
    fn test_missing_gi_aborts_self_test() {
        let temp = TempDir::new().unwrap();
        let (config, tree) = setup(&temp);
        let runner = installs_binary(runner(), tree.bin_dir()).reply_on(
            " -c ",
            1,
            "probe-fail gi: ModuleNotFoundError: No module named 'gi'\n",
        );

        let mut ctx = InstallContext::new(&runner, &config, &tree);
        match Pipeline::standard().run(&mut ctx) {
            Outcome::Aborted {
                step,
                reached,
                cause: StepError::ModuleResolution { module, .. },
            } => {
                assert_eq!(step, "self-test");
                assert_eq!(reached, Stage::PostInstalled);
                assert_eq!(module, "gi");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_leftover_real_binary_aborts_relocation() {
        let temp = TempDir::new().unwrap();
        let (config, tree) = setup(&temp);
        fs::create_dir_all(tree.bin_dir()).unwrap();
        fs::write(tree.bin_dir().join(format!("{APP}-real")), "old").unwrap();
        let runner = probe_ok(installs_binary(runner(), tree.bin_dir()));

        let mut ctx = InstallContext::new(&runner, &config, &tree);
        let outcome = Pipeline::standard().run(&mut ctx);
        match &outcome {
            Outcome::Aborted { step, cause, .. } => {
                assert_eq!(*step, "relocate");
                assert!(matches!(cause, StepError::Relocation { .. }));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(outcome.reached(), Stage::BuiltAndInstalled);
        assert_eq!(runner.count("glib-compile-schemas"), 0);
    }

    #[test]
    fn test_meson_failure_names_build_step() {
        let temp = TempDir::new().unwrap();
        let (config, tree) = setup(&temp);
        let runner = runner().fail_on("meson compile", 1, "ninja: build stopped");

        let mut ctx = InstallContext::new(&runner, &config, &tree);
        match Pipeline::standard().run(&mut ctx) {
            Outcome::Aborted {
                reached,
                cause: StepError::BuildStep { step, .. },
                ..
            } => {
                assert_eq!(reached, Stage::EnvironmentReady);
                assert_eq!(step.to_string(), "compile");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(runner.count("meson install"), 0);
    }

    #[test]
    fn test_step_without_environment_reports_missing_input() {
        let temp = TempDir::new().unwrap();
        let (config, tree) = setup(&temp);
        let runner = runner();

        let mut ctx = InstallContext::new(&runner, &config, &tree);
        let outcome = Pipeline::new(vec![Box::new(MesonStep)]).run(&mut ctx);
        assert!(matches!(
            outcome,
            Outcome::Aborted {
                step: "build",
                cause: StepError::MissingInput { .. },
                ..
            }
        ));
        assert!(runner.calls().is_empty());
    }
}
