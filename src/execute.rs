use std::io::Write;
use std::path::Path;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::{info, warn};
use bulker::activate::{Activation, build_path, shell_program};
use bulker::config::{ConfigFile, Engine};
use bulker::global::utils::select_config;
use bulker::installer::{LoadOptions, LoadOutcome, Loader, unload};
use bulker::lock::LockMode;
use bulker::manifest::ManifestFetcher;
use bulker::prompts::{Confirm, TerminalConfirm};
use bulker::registry::RegistryReference;
use bulker::shims::SHELL_PREFIX;
use bulker::supervisor::Supervisor;
use bulker::template::{SimpleRenderer, write_default_templates};
use crate::cli::{BulkerCommand, CLI};

pub fn execute(cli: CLI) -> Result<()> {
    let config_path = select_config(cli.config)?;
    match cli.command {
        BulkerCommand::Init { engine } => {
            execute_init(&config_path, engine.as_deref())
        }
        BulkerCommand::List { simple } => {
            execute_list(&config_path, simple)
        }
        BulkerCommand::Inspect { crate_registry_path } => {
            execute_inspect(&config_path, crate_registry_path.as_deref())
        }
        BulkerCommand::Load { crate_registry_path, manifest, path, build, force, recurse } => {
            let options = LoadOptions { crate_path: path, force, recurse };
            execute_load(&config_path, &crate_registry_path, manifest.as_deref(), options, build)
        }
        BulkerCommand::Unload { crate_registry_paths } => {
            execute_unload(&config_path, &crate_registry_paths)
        }
        BulkerCommand::Reload { recurse } => {
            execute_reload(&config_path, recurse)
        }
        BulkerCommand::Activate { crate_registry_paths, strict, echo } => {
            execute_activate(&config_path, &crate_registry_paths, strict, echo)
        }
        BulkerCommand::Run { crate_registry_paths, strict, cmd } => {
            execute_run(&config_path, &crate_registry_paths, strict, &cmd)
        }
        BulkerCommand::Envvars { add, remove } => {
            execute_envvars(&config_path, &add, &remove)
        }
    }
}

fn open_config(path: &Path, mode: LockMode) -> Result<ConfigFile> {
    if !path.exists() {
        bail!(
            "Bulker config not found: {}. Run `bulker init` to create one.",
            path.display()
        )
    }
    ConfigFile::open(path, mode).with_context(|| format!("Could not open {}", path.display()))
}

fn parse_references(config: &ConfigFile, paths: &str) -> Result<Vec<RegistryReference>> {
    let references = RegistryReference::parse_many(paths, &config.settings().default_namespace)?;
    Ok(references)
}

fn fetcher_for(config: &ConfigFile) -> ManifestFetcher {
    let settings = config.settings();
    ManifestFetcher::new(settings.registry_url(), &settings.default_namespace)
}

pub fn execute_init(config_path: &Path, engine: Option<&str>) -> Result<()> {
    if config_path.exists() {
        let prompt = format!("Config '{}' exists. Overwrite?", config_path.display());
        if !TerminalConfirm.confirm(&prompt)? {
            println!("Leaving existing config untouched");
            return Ok(());
        }
    }
    let engine = match engine {
        Some(name) => Engine::ALL
            .into_iter()
            .find(|engine| engine.as_str() == name)
            .with_context(|| format!("Unknown container engine: {}", name))?,
        None => Engine::guess().unwrap_or_else(|| {
            warn!("No container engine found on PATH. Using {}.", Engine::Docker);
            Engine::Docker
        }),
    };
    info!("Using container engine: {}", engine);
    let config = ConfigFile::create(config_path, engine)?;
    let templates = write_default_templates(config.dir())?;
    info!("Wrote templates to: {}", templates.display());
    info!("Wrote new configuration file: {}", config.path().display());
    Ok(())
}

pub fn execute_list(config_path: &Path, simple: bool) -> Result<()> {
    let config = open_config(config_path, LockMode::Shared)?;
    if config.crates().is_empty() {
        if !simple {
            println!("No crates loaded");
        }
        return Ok(());
    }
    if !simple {
        println!("{}", "Available crates:".bold());
    }
    for (reference, path) in config.crates().iter() {
        if simple {
            println!("{}", reference);
        } else {
            println!("{} -- {}", reference, path.display());
        }
    }
    Ok(())
}

pub fn execute_inspect(config_path: &Path, crate_registry_path: Option<&str>) -> Result<()> {
    let Some(crate_registry_path) = crate_registry_path.filter(|path| !path.is_empty()) else {
        bail!("No active crate. Activate a crate or name one: bulker inspect <crate>")
    };
    let config = open_config(config_path, LockMode::Shared)?;
    let reference = RegistryReference::parse(crate_registry_path, &config.settings().default_namespace)?;
    let crate_path = config
        .crates()
        .get(&reference)
        .map(Path::to_path_buf)
        .ok_or_else(|| bulker::BulkerError::MissingCrate(reference.to_string()))?;
    let mut commands: Vec<String> = std::fs::read_dir(&crate_path)
        .with_context(|| format!("Could not read crate directory {}", crate_path.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with(SHELL_PREFIX))
        .collect();
    commands.sort();
    println!("Bulker config: {}", config.path().display());
    println!("Crate: {}", reference);
    println!("Crate path: {}", crate_path.display());
    println!("Available commands: {}", commands.join(" "));
    Ok(())
}

pub fn execute_load(
    config_path: &Path,
    crate_registry_path: &str,
    manifest_path: Option<&str>,
    options: LoadOptions,
    build: bool,
) -> Result<()> {
    let mut config = open_config(config_path, LockMode::Exclusive)?;
    let fetcher = fetcher_for(&config);
    let mut loader = Loader::new(&mut config, &fetcher, &SimpleRenderer, &TerminalConfirm, build)?;
    let (manifest, reference) = fetcher.fetch_path(crate_registry_path, manifest_path)?;
    match loader.load(&manifest, &reference, options)? {
        LoadOutcome::Loaded { path, .. } => {
            info!("Crate '{}' written to {}", reference, path.display());
        }
        LoadOutcome::Declined => {
            println!("Crate '{}' not overwritten", reference);
        }
    }
    Ok(())
}

pub fn execute_unload(config_path: &Path, crate_registry_paths: &str) -> Result<()> {
    let mut config = open_config(config_path, LockMode::Exclusive)?;
    let references = parse_references(&config, crate_registry_paths)?;
    let removed = unload(&mut config, &references)?;
    info!("Removed {} crate(s)", removed.len());
    Ok(())
}

pub fn execute_reload(config_path: &Path, recurse: bool) -> Result<()> {
    let mut config = open_config(config_path, LockMode::Exclusive)?;
    let fetcher = fetcher_for(&config);
    let mut loader = Loader::new(&mut config, &fetcher, &SimpleRenderer, &TerminalConfirm, false)?;
    let reloaded = loader.reload_all(recurse)?;
    info!("Reloaded {} crate(s)", reloaded);
    Ok(())
}

pub fn execute_activate(config_path: &Path, crate_registry_paths: &str, strict: bool, echo: bool) -> Result<()> {
    let config = open_config(config_path, LockMode::Shared)?;
    let references = parse_references(&config, crate_registry_paths)?;
    let activation = Activation::new(config.crates(), &references, strict)?;
    if echo {
        print!("{}", activation.exports());
        return Ok(());
    }
    let shell = shell_program(config.settings());
    let allowed = config.settings().envvars.clone();
    drop(config);
    let err = activation.exec_shell(&shell, &allowed);
    Err(anyhow::Error::from(err).context(format!("Could not start shell {}", shell)))
}

pub fn execute_run(config_path: &Path, crate_registry_paths: &str, strict: bool, cmd: &[String]) -> Result<()> {
    let config = open_config(config_path, LockMode::Shared)?;
    let references = parse_references(&config, crate_registry_paths)?;
    let path = build_path(config.crates(), &references, strict)?;
    drop(config);
    let outcome = Supervisor::new().run(&path, cmd)?;
    std::io::stdout().flush()?;
    std::process::exit(outcome.exit_code())
}

pub fn execute_envvars(config_path: &Path, add: &[String], remove: &[String]) -> Result<()> {
    let mut config = open_config(config_path, LockMode::Exclusive)?;
    if !add.is_empty() || !remove.is_empty() {
        let envvars = &mut config.settings_mut().envvars;
        for name in add {
            if envvars.contains(name) {
                info!("'{}' is already in the envvars list", name);
            } else {
                envvars.push(name.clone());
                info!("Added '{}' to the envvars list", name);
            }
        }
        for name in remove {
            if envvars.contains(name) {
                envvars.retain(|existing| existing != name);
                info!("Removed '{}' from the envvars list", name);
            } else {
                warn!("'{}' is not in the envvars list", name);
            }
        }
        config.write()?;
    }
    println!("Envvars list: {}", config.settings().envvars.join(", "));
    Ok(())
}
