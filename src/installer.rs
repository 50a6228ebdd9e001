//! Materializing crates on disk.
//!
//! A [`Loader`] turns a manifest into a crate directory: imported crates are
//! overlaid first, then one launcher and one shell script per command and one
//! symlink per host command are written on top. The registry entry is only
//! recorded once the directory is complete.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use crate::config::ConfigFile;
use crate::error::{BulkerError, Result};
use crate::imports::resolve_imports;
use crate::manifest::{Manifest, ManifestFetcher};
use crate::prompts::Confirm;
use crate::registry::RegistryReference;
use crate::settings::EffectiveCommand;
use crate::shims::{link_host_command, run_build_script, write_command_shims};
use crate::template::{Renderer, Templates};
use crate::util::{copy_tree, remove_dir_if_empty};

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Target directory. Defaults to `{default_crate_folder}/{namespace}/{crate}/{tag}`.
    pub crate_path: Option<String>,
    /// Overwrite an existing crate without asking.
    pub force: bool,
    /// Reload every import, following their imports too.
    pub recurse: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded {
        reference: RegistryReference,
        path: PathBuf,
        commands: Vec<String>,
        host_commands: Vec<String>,
    },
    /// The crate exists and the user chose not to overwrite it.
    Declined,
}

/// Loads manifests into crate directories recorded in a config.
pub struct Loader<'a> {
    config: &'a mut ConfigFile,
    fetcher: &'a ManifestFetcher,
    templates: Templates,
    renderer: &'a dyn Renderer,
    confirm: &'a dyn Confirm,
    build: bool,
    loading: BTreeSet<String>,
    /// Crates materialized by this loader; imports in here are copied, not loaded again.
    loaded: BTreeSet<String>,
}

impl<'a> Loader<'a> {
    /// Prepares a loader. Templates are read here, before anything on disk changes.
    ///
    /// # Errors
    ///
    /// Returns [`BulkerError::TemplateMissing`] if a configured template can't be read,
    /// or a lock error if the config can't be made writable.
    pub fn new(
        config: &'a mut ConfigFile,
        fetcher: &'a ManifestFetcher,
        renderer: &'a dyn Renderer,
        confirm: &'a dyn Confirm,
        build: bool,
    ) -> Result<Self> {
        config.make_writable()?;
        let templates = Templates::load(config, build)?;
        Ok(Self {
            config,
            fetcher,
            templates,
            renderer,
            confirm,
            build,
            loading: BTreeSet::new(),
            loaded: BTreeSet::new(),
        })
    }

    /// Materializes `manifest` as the crate `reference` and records it in the registry.
    ///
    /// # Errors
    ///
    /// - [`BulkerError::EmptyCrate`] if nothing could be written; the directory is removed
    /// - IO, render and config write errors
    pub fn load(
        &mut self,
        manifest: &Manifest,
        reference: &RegistryReference,
        options: LoadOptions,
    ) -> Result<LoadOutcome> {
        let crate_path = match &options.crate_path {
            Some(path) => self.config.resolve_path(path),
            None => self.config.default_crate_path(reference),
        };
        if self.config.crates().contains(reference) {
            if !options.force {
                let prompt = format!("Crate '{}' exists. Overwrite?", reference);
                if !self.confirm.confirm(&prompt)? {
                    info!("Leaving crate '{}' untouched", reference);
                    return Ok(LoadOutcome::Declined);
                }
            }
            debug!("Removing existing crate at {}", crate_path.display());
            if let Err(e) = std::fs::remove_dir_all(&crate_path) {
                warn!(
                    "Error removing crate at {}: {}. Did your crate path change? Remove it manually.",
                    crate_path.display(),
                    e
                );
            }
        }

        let id = reference.to_string();
        self.loading.insert(id.clone());
        let result = self.materialize(manifest, reference, &crate_path, options.recurse);
        self.loading.remove(&id);
        let (commands, host_commands) = result?;

        if commands.is_empty() && host_commands.is_empty() {
            self.discard(reference, &crate_path)?;
            return Err(BulkerError::EmptyCrate(id));
        }

        info!("Loading manifest: '{}'. Activate with 'bulker activate {}'.", id, id);
        if !commands.is_empty() {
            info!("Commands available: {}", commands.join(", "));
        }
        if !host_commands.is_empty() {
            info!("Host commands available: {}", host_commands.join(", "));
        }
        self.config.crates_mut().insert(reference, crate_path.clone());
        self.config.write()?;
        self.loaded.insert(id);
        Ok(LoadOutcome::Loaded {
            reference: reference.clone(),
            path: crate_path,
            commands,
            host_commands,
        })
    }

    fn materialize(
        &mut self,
        manifest: &Manifest,
        reference: &RegistryReference,
        crate_path: &Path,
        recurse: bool,
    ) -> Result<(Vec<String>, Vec<String>)> {
        std::fs::create_dir_all(crate_path)?;
        self.overlay_imports(manifest, reference, crate_path, recurse);

        let mut commands = Vec::new();
        for entry in &manifest.commands {
            let effective = EffectiveCommand::merge(entry, self.config.settings(), self.config.dir())?;
            if let Some(parent) = effective.singularity_fullpath.as_deref().and_then(Path::parent) {
                std::fs::create_dir_all(parent)?;
            }
            match write_command_shims(crate_path, &effective, &self.templates, self.renderer) {
                Ok(_) => {}
                Err(BulkerError::InvalidName(name)) => {
                    warn!("Skipping command '{}': not a plain file name", name);
                    continue;
                }
                Err(e) => return Err(e),
            }
            if self.build {
                self.build_image(&effective)?;
            }
            commands.push(effective.command);
        }

        let mut host_commands = Vec::new();
        for name in &manifest.host_commands {
            if link_host_command(crate_path, name)?.is_some() {
                host_commands.push(name.clone());
            }
        }
        Ok((commands, host_commands))
    }

    fn build_image(&self, command: &EffectiveCommand) -> Result<()> {
        let Some(template) = &self.templates.build else {
            return Ok(());
        };
        let script = self.renderer.render(template, &command.template_vars())?;
        if run_build_script(&script)? {
            if let Some(path) = &command.singularity_fullpath {
                info!("Container available at: {}", path.display());
            }
        }
        Ok(())
    }

    fn overlay_imports(
        &mut self,
        manifest: &Manifest,
        reference: &RegistryReference,
        crate_path: &Path,
        recurse: bool,
    ) {
        let namespace = self.config.settings().default_namespace.clone();
        let fetcher = self.fetcher;
        let imports = resolve_imports(manifest, &namespace, recurse, |import| {
            fetcher.fetch(import, None).map(|(manifest, _)| manifest)
        });
        debug!("Imports of '{}': {:?}", reference, imports);
        for id in imports {
            let Ok(import) = RegistryReference::parse(&id, &namespace) else {
                continue;
            };
            if self.loading.contains(&id) {
                debug!("Import '{}' is already being loaded", id);
                continue;
            }
            let registered = self.config.crates().get(&import).map(Path::to_path_buf);
            let missing = registered.as_deref().is_none_or(|path| !path.is_dir());
            if self.loaded.contains(&id) {
                debug!("Import '{}' was already loaded", id);
            } else if missing || recurse {
                if let Err(e) = self.load_import(&import) {
                    warn!("Can't import crate '{}': {}", id, e);
                    continue;
                }
            }
            let Some(import_path) = self.config.crates().get(&import).map(Path::to_path_buf) else {
                continue;
            };
            if !import_path.is_dir() {
                warn!("Can't import crate '{}' from '{}'", id, import_path.display());
                continue;
            }
            info!("Importing crate '{}' from '{}'.", id, import_path.display());
            if let Err(e) = copy_tree(&import_path, crate_path) {
                error!("Failed to copy crate '{}': {}", id, e);
            }
        }
    }

    fn load_import(&mut self, import: &RegistryReference) -> Result<()> {
        let (manifest, import) = self.fetcher.fetch(import, None)?;
        let options = LoadOptions { crate_path: None, force: true, recurse: false };
        self.load(&manifest, &import, options)?;
        Ok(())
    }

    fn discard(&mut self, reference: &RegistryReference, crate_path: &Path) -> Result<()> {
        error!("No commands provided. Crate '{}' not created.", reference);
        match std::fs::remove_dir_all(crate_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = crate_path.parent() {
            remove_dir_if_empty(parent)?;
        }
        if self.config.crates_mut().remove(reference).is_some() {
            self.config.write()?;
        }
        Ok(())
    }

    /// Re-fetches and force-loads every registered crate into its current directory.
    ///
    /// Crates whose manifest can't be fetched or loaded are logged and skipped.
    /// Returns the number of crates reloaded.
    pub fn reload_all(&mut self, recurse: bool) -> Result<usize> {
        let registered: Vec<(RegistryReference, PathBuf)> = self
            .config
            .crates()
            .iter()
            .map(|(reference, path)| (reference, path.to_path_buf()))
            .collect();
        let mut reloaded = 0;
        for (reference, path) in registered {
            if self.loaded.contains(&reference.to_string()) {
                debug!("Crate '{}' was already reloaded as an import", reference);
                reloaded += 1;
                continue;
            }
            info!("Reloading crate '{}'", reference);
            let manifest = match self.fetcher.fetch(&reference, None) {
                Ok((manifest, _)) => manifest,
                Err(e) => {
                    warn!("Skipping '{}': {}", reference, e);
                    continue;
                }
            };
            let options = LoadOptions {
                crate_path: Some(path.to_string_lossy().into_owned()),
                force: true,
                recurse,
            };
            match self.load(&manifest, &reference, options) {
                Ok(_) => reloaded += 1,
                Err(e) => warn!("Failed to reload '{}': {}", reference, e),
            }
        }
        Ok(reloaded)
    }
}

/// Deletes the directories of `references` and drops them from the registry.
///
/// # Errors
///
/// Returns [`BulkerError::MissingCrate`] before touching anything if a crate
/// is not registered.
pub fn unload(config: &mut ConfigFile, references: &[RegistryReference]) -> Result<Vec<PathBuf>> {
    for reference in references {
        if !config.crates().contains(reference) {
            return Err(BulkerError::MissingCrate(reference.to_string()));
        }
    }
    let mut removed = Vec::new();
    for reference in references {
        let Some(path) = config.crates_mut().remove(reference) else {
            continue;
        };
        info!("Removing crate '{}' at {}", reference, path.display());
        if let Err(e) = std::fs::remove_dir_all(&path) {
            warn!("Error removing crate at {}: {}", path.display(), e);
        }
        removed.push(path);
    }
    config.write()?;
    Ok(removed)
}
