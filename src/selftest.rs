//! Post-install verification.
//!
//! Two checks, both required:
//! 1. the wrapper exists, is a regular file and is executable by everyone;
//! 2. the isolated interpreter can import every runtime module, with the
//!    GUI toolkit namespaces pinned to their versions before import.
//!
//! The first failing check is reported with the module or path involved.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::info;

use crate::env::EnvironmentDescriptor;
use crate::error::{StepError, WrapperProblem};
use crate::process::{Cmd, CommandRunner};
use crate::wrapper::MODULE_PATH_VAR;

/// Bumped whenever the probe's behavior or output format changes.
pub const PROBE_VERSION: u32 = 1;
const FAIL_PREFIX: &str = "probe-fail ";

/// Line the probe prints when every import succeeded.
pub fn pass_marker() -> String {
    format!("probe-ok v{PROBE_VERSION}")
}

fn py_list(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| format!("{i:?}")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Render the import probe for `modules` and GI `namespaces`.
///
/// The GI section is emitted only when `gi` is among the modules.
pub fn probe_script(modules: &[&str], namespaces: &[(&str, Option<&str>)]) -> String {
    let mut script = format!(
        "# meson-venv-installer import probe v{PROBE_VERSION}\n\
         import importlib\n\
         import sys\n\
         \n\
         def fail(module, err):\n    \
             print(\"{FAIL_PREFIX}\" + module + \": \" + type(err).__name__ + \": \" + str(err))\n    \
             sys.exit(1)\n\
         \n\
         for name in {modules}:\n    \
             try:\n        \
                 importlib.import_module(name)\n    \
             except Exception as err:\n        \
                 fail(name, err)\n",
        modules = py_list(modules),
    );

    if modules.contains(&"gi") {
        let pinned: Vec<String> = namespaces
            .iter()
            .filter_map(|(ns, version)| version.map(|v| format!("({ns:?}, {v:?})")))
            .collect();
        let names: Vec<&str> = namespaces.iter().map(|(ns, _)| *ns).collect();
        script.push_str(&format!(
            "\n\
             import gi\n\
             for namespace, version in [{pinned}]:\n    \
                 try:\n        \
                     gi.require_version(namespace, version)\n    \
                 except Exception as err:\n        \
                     fail(\"gi.repository.\" + namespace, err)\n\
             \n\
             for namespace in {names}:\n    \
                 try:\n        \
                     importlib.import_module(\"gi.repository.\" + namespace)\n    \
                 except Exception as err:\n        \
                     fail(\"gi.repository.\" + namespace, err)\n",
            pinned = pinned.join(", "),
            names = py_list(&names),
        ));
    }

    script.push_str(&format!("\nprint(\"{}\")\n", pass_marker()));
    script
}

/// Check 1: the wrapper is present and executable by owner, group and other.
pub fn check_wrapper(path: &Path) -> Result<(), StepError> {
    let problem = match fs::metadata(path) {
        Err(err) if err.kind() == ErrorKind::NotFound => Some(WrapperProblem::Missing),
        Err(err) => Some(WrapperProblem::Unreadable(err.to_string())),
        Ok(meta) if !meta.is_file() => Some(WrapperProblem::NotAFile),
        Ok(meta) if meta.permissions().mode() & 0o111 != 0o111 => {
            Some(WrapperProblem::NotExecutable {
                mode: meta.permissions().mode(),
            })
        }
        Ok(_) => None,
    };

    match problem {
        Some(problem) => Err(StepError::WrapperCheck {
            path: path.to_path_buf(),
            problem,
        }),
        None => Ok(()),
    }
}

/// Check 2: run the probe with the isolated interpreter.
pub fn check_modules(
    runner: &dyn CommandRunner,
    env: &EnvironmentDescriptor,
    script: &str,
) -> Result<(), StepError> {
    let cmd = Cmd::new(env.interpreter())
        .arg("-c")
        .arg(script)
        .env(MODULE_PATH_VAR, env.package_dir());

    let output = runner.run(&cmd).map_err(|err| StepError::ProbeIncomplete {
        interpreter: env.interpreter(),
        detail: format!("could not be started: {err}"),
    })?;

    if let Some(line) = output
        .stdout
        .lines()
        .find_map(|line| line.strip_prefix(FAIL_PREFIX))
    {
        let (module, message) = line.split_once(": ").unwrap_or((line, ""));
        return Err(StepError::ModuleResolution {
            module: module.to_string(),
            message: message.to_string(),
        });
    }

    let marker = pass_marker();
    if !output.success() || !output.stdout.lines().any(|line| line.trim() == marker) {
        return Err(StepError::ProbeIncomplete {
            interpreter: env.interpreter(),
            detail: format!("{}: {}", output.status, output.combined()),
        });
    }

    Ok(())
}

/// Run both checks; the wrapper check goes first.
pub fn run_self_test(
    runner: &dyn CommandRunner,
    env: &EnvironmentDescriptor,
    wrapper: &Path,
    script: &str,
) -> Result<(), StepError> {
    info!(path = %wrapper.display(), "self-test: checking wrapper");
    check_wrapper(wrapper)?;
    info!(interpreter = %env.interpreter().display(), "self-test: probing runtime modules");
    check_modules(runner, env, script)?;
    info!("self-test passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps;
    use crate::process::testing::ScriptedRunner;
    use crate::process::SystemRunner;
    use tempfile::TempDir;

    fn default_script() -> String {
        probe_script(&deps::runtime_modules(&deps::declared()), deps::GI_NAMESPACES)
    }

    fn executable(temp: &TempDir, mode: u32) -> std::path::PathBuf {
        let path = temp.path().join("app");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    fn env() -> EnvironmentDescriptor {
        EnvironmentDescriptor::new("/p/libexec/venv", "3.12", Vec::new())
    }

    #[test]
    fn test_probe_pins_versions_before_import() {
        let script = default_script();
        let pin = script.find("gi.require_version(namespace, version)").unwrap();
        let import = script.find("importlib.import_module(\"gi.repository.\"").unwrap();
        assert!(pin < import);
        assert!(script.contains("[(\"Gtk\", \"4.0\"), (\"Adw\", \"1\")]"));
        assert!(script.contains("for name in [\"gi\", \"pathvalidate\"]:"));
        assert!(script.ends_with("print(\"probe-ok v1\")\n"));
    }

    #[test]
    fn test_probe_without_gi_skips_namespace_section() {
        let script = probe_script(&["json"], deps::GI_NAMESPACES);
        assert!(!script.contains("require_version"));
    }

    #[test]
    fn test_wrapper_check_variants() {
        let temp = TempDir::new().unwrap();

        let missing = check_wrapper(&temp.path().join("nope")).unwrap_err();
        assert!(matches!(
            missing,
            StepError::WrapperCheck {
                problem: WrapperProblem::Missing,
                ..
            }
        ));

        let dir = check_wrapper(temp.path()).unwrap_err();
        assert!(matches!(
            dir,
            StepError::WrapperCheck {
                problem: WrapperProblem::NotAFile,
                ..
            }
        ));

        let owner_only = executable(&temp, 0o744);
        let err = check_wrapper(&owner_only).unwrap_err();
        assert!(matches!(
            err,
            StepError::WrapperCheck {
                problem: WrapperProblem::NotExecutable { .. },
                ..
            }
        ));

        fs::set_permissions(&owner_only, fs::Permissions::from_mode(0o755)).unwrap();
        check_wrapper(&owner_only).unwrap();
    }

    #[test]
    fn test_missing_gi_reported_even_with_valid_wrapper() {
        let temp = TempDir::new().unwrap();
        let wrapper = executable(&temp, 0o755);
        let runner = ScriptedRunner::new().reply_on(
            " -c ",
            1,
            "probe-fail gi: ModuleNotFoundError: No module named 'gi'\n",
        );

        let err = run_self_test(&runner, &env(), &wrapper, &default_script()).unwrap_err();
        match err {
            StepError::ModuleResolution { module, message } => {
                assert_eq!(module, "gi");
                assert_eq!(message, "ModuleNotFoundError: No module named 'gi'");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrapper_failure_skips_probe() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let err = run_self_test(&runner, &env(), &temp.path().join("app"), "").unwrap_err();
        assert!(matches!(err, StepError::WrapperCheck { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_probe_runs_isolated_interpreter() {
        let temp = TempDir::new().unwrap();
        let wrapper = executable(&temp, 0o755);
        let runner = ScriptedRunner::new().reply_on(" -c ", 0, "probe-ok v1\n");

        run_self_test(&runner, &env(), &wrapper, &default_script()).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program(), env().interpreter().as_os_str());
        assert_eq!(
            calls[0].env_value(MODULE_PATH_VAR),
            Some(env().package_dir().as_os_str())
        );
    }

    #[test]
    fn test_missing_marker_is_incomplete_probe() {
        let temp = TempDir::new().unwrap();
        let wrapper = executable(&temp, 0o755);
        let runner = ScriptedRunner::new().reply_on(" -c ", 0, "");
        let err = run_self_test(&runner, &env(), &wrapper, &default_script()).unwrap_err();
        assert!(matches!(err, StepError::ProbeIncomplete { .. }));
    }

    fn host_python() -> Option<std::path::PathBuf> {
        which::which("python3").ok()
    }

    #[test]
    fn test_probe_script_runs_under_real_python() {
        let Some(python) = host_python() else {
            return;
        };
        let temp = TempDir::new().unwrap();
        let host_env = EnvironmentDescriptor::new(temp.path(), "3", Vec::new());
        fs::create_dir_all(temp.path().join("bin")).unwrap();
        std::os::unix::fs::symlink(&python, host_env.interpreter()).unwrap();

        let ok = probe_script(&["json", "importlib"], &[]);
        check_modules(&SystemRunner, &host_env, &ok).unwrap();

        let missing = probe_script(&["json", "definitely_missing_module_xyz"], &[]);
        let err = check_modules(&SystemRunner, &host_env, &missing).unwrap_err();
        match err {
            StepError::ModuleResolution { module, message } => {
                assert_eq!(module, "definitely_missing_module_xyz");
                assert!(message.starts_with("ModuleNotFoundError"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_full_probe_is_valid_python() {
        let Some(python) = host_python() else {
            return;
        };
        let output = std::process::Command::new(python)
            .arg("-c")
            .arg(format!("compile({:?}, 'probe', 'exec')", default_script()))
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "{}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
}
