use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use meson_venv_installer::deps;
use meson_venv_installer::env::EnvironmentDescriptor;
use meson_venv_installer::hooks::regenerate_caches;
use meson_venv_installer::logging::{init_tracing, LogSettings};
use meson_venv_installer::preflight::check_host;
use meson_venv_installer::receipt::{now_utc_compact, receipt_path, write_receipt, InstallReceipt};
use meson_venv_installer::relocate::BuildArtifact;
use meson_venv_installer::selftest::{probe_script, run_self_test};
use meson_venv_installer::wrapper::render_wrapper;
use meson_venv_installer::{
    InstallConfig, InstallContext, InstallTree, Outcome, Pipeline, SystemRunner,
};

fn usage() -> &'static str {
    "Usage:\n  meson-venv-installer install <prefix> [config.toml]\n  meson-venv-installer post-install [share_root]\n  meson-venv-installer self-test <prefix> [config.toml]\n  meson-venv-installer render-wrapper <prefix> [config.toml]\n  meson-venv-installer check-host [config.toml]\n  meson-venv-installer deps"
}

fn main() -> Result<()> {
    init_tracing(&LogSettings::from_env());
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [cmd, prefix] if cmd == "install" => install(Path::new(prefix), None),
        [cmd, prefix, config] if cmd == "install" => {
            install(Path::new(prefix), Some(Path::new(config)))
        }
        [cmd] if cmd == "post-install" => post_install(None),
        [cmd, share_root] if cmd == "post-install" => post_install(Some(Path::new(share_root))),
        [cmd, prefix] if cmd == "self-test" => self_test(Path::new(prefix), None),
        [cmd, prefix, config] if cmd == "self-test" => {
            self_test(Path::new(prefix), Some(Path::new(config)))
        }
        [cmd, prefix] if cmd == "render-wrapper" => render(Path::new(prefix), None),
        [cmd, prefix, config] if cmd == "render-wrapper" => {
            render(Path::new(prefix), Some(Path::new(config)))
        }
        [cmd] if cmd == "check-host" => check_host_tools(None),
        [cmd, config] if cmd == "check-host" => check_host_tools(Some(Path::new(config))),
        [cmd] if cmd == "deps" => print_deps(),
        _ => bail!(usage()),
    }
}

fn load(prefix: &Path, config: Option<&Path>) -> Result<(InstallConfig, InstallTree)> {
    let config = InstallConfig::load(config)?;
    let tree = InstallTree::new(prefix)?;
    Ok((config, tree))
}

/// Descriptor and artifact for an install that already happened.
fn installed(config: &InstallConfig, tree: &InstallTree) -> (EnvironmentDescriptor, BuildArtifact) {
    let env = EnvironmentDescriptor::new(
        config.env_root(tree),
        config.python_version.clone(),
        deps::environment_packages(&deps::declared()),
    );
    let artifact = BuildArtifact::for_binary(&tree.bin_dir(), &config.app_name);
    (env, artifact)
}

fn install(prefix: &Path, config_path: Option<&Path>) -> Result<()> {
    let (config, tree) = load(prefix, config_path)?;
    let started_at = now_utc_compact();

    if let Err(err) = check_host(&config) {
        let err = err.context("host preflight failed");
        let receipt =
            InstallReceipt::preflight_failed(&config, &tree, &deps::declared(), &err, started_at);
        if let Err(write_err) = write_receipt(&receipt_path(&tree), &receipt) {
            warn!(error = %format!("{write_err:#}"), "could not record install receipt");
        }
        return Err(err);
    }

    info!(app = %config.app_name, prefix = %tree.prefix().display(), "[install] starting");

    let mut ctx = InstallContext::new(&SystemRunner, &config, &tree);
    let outcome = Pipeline::standard().run(&mut ctx);

    let receipt = InstallReceipt::new(&config, &tree, &ctx.deps, &outcome, started_at);
    let receipt_file = receipt_path(&tree);
    let written = write_receipt(&receipt_file, &receipt);

    match outcome {
        Outcome::Completed(stage) => {
            written?;
            println!(
                "[install] {} installed under {} ({stage})",
                config.app_name,
                tree.prefix().display()
            );
            println!("[install] receipt: {}", receipt_file.display());
            Ok(())
        }
        Outcome::Aborted {
            step,
            reached,
            cause,
        } => {
            if let Err(err) = written {
                warn!(error = %format!("{err:#}"), "could not record install receipt");
            }
            Err(anyhow::Error::new(cause)
                .context(format!("install aborted in step '{step}' after {reached}")))
        }
    }
}

fn post_install(share_root: Option<&Path>) -> Result<()> {
    let share_root: PathBuf = match share_root {
        Some(path) => path.to_path_buf(),
        None => InstallConfig::load(None)?.share_root,
    };
    regenerate_caches(&SystemRunner, &share_root)
        .with_context(|| format!("post-install for '{}'", share_root.display()))?;
    println!("[post-install] caches regenerated under {}", share_root.display());
    Ok(())
}

fn self_test(prefix: &Path, config_path: Option<&Path>) -> Result<()> {
    let (config, tree) = load(prefix, config_path)?;
    let (env, artifact) = installed(&config, &tree);
    let declared = deps::declared();
    let script = probe_script(&deps::runtime_modules(&declared), deps::GI_NAMESPACES);

    run_self_test(&SystemRunner, &env, artifact.wrapper(), &script)
        .with_context(|| format!("self-test for '{}'", tree.prefix().display()))?;
    println!("[self-test] {} ok", artifact.wrapper().display());
    Ok(())
}

fn render(prefix: &Path, config_path: Option<&Path>) -> Result<()> {
    let (config, tree) = load(prefix, config_path)?;
    let (env, artifact) = installed(&config, &tree);
    print!("{}", render_wrapper(&env, &artifact));
    Ok(())
}

fn check_host_tools(config_path: Option<&Path>) -> Result<()> {
    let config = InstallConfig::load(config_path)?;
    check_host(&config)?;
    println!("[check-host] all required host tools present");
    Ok(())
}

fn print_deps() -> Result<()> {
    for dep in deps::declared() {
        println!("{dep}");
    }
    Ok(())
}
