//! Putting crates on `PATH`.

use std::os::unix::process::CommandExt;
use std::process::Command;
use tracing::debug;
use crate::config::{BulkerSettings, CrateRegistry};
use crate::error::{BulkerError, Result};
use crate::registry::RegistryReference;
use crate::util::{PATH_LIST_SEPARATOR, expand_vars};

/// Shell started by `activate` when neither the config nor `$SHELL` names one.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Variables kept by strict activation besides the configured allow-list.
pub const STRICT_BASE_VARS: [&str; 2] = ["HOME", "TERM"];

/// Composes a `PATH` from the directories of `references`, in order.
///
/// Without `strict` the inherited `PATH` is appended.
///
/// # Errors
///
/// Returns [`BulkerError::MissingCrate`] naming the first reference that isn't registered.
pub fn build_path(
    registry: &CrateRegistry,
    references: &[RegistryReference],
    strict: bool,
) -> Result<String> {
    let mut entries = Vec::with_capacity(references.len() + 1);
    for reference in references {
        let dir = registry
            .get(reference)
            .ok_or_else(|| BulkerError::MissingCrate(reference.to_string()))?;
        entries.push(dir.to_string_lossy().into_owned());
    }
    if !strict {
        if let Some(inherited) = std::env::var("PATH").ok().filter(|path| !path.is_empty()) {
            entries.push(inherited);
        }
    }
    Ok(entries.join(PATH_LIST_SEPARATOR))
}

/// The environment of an activated crate set.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    /// `namespace/crate` of the last crate, shown as the active one.
    pub crate_name: String,
    pub path: String,
    pub strict: bool,
}

impl Activation {
    pub fn new(registry: &CrateRegistry, references: &[RegistryReference], strict: bool) -> Result<Self> {
        let path = build_path(registry, references, strict)?;
        let crate_name = references
            .last()
            .map(|reference| format!("{}/{}", reference.namespace, reference.crate_name))
            .unwrap_or_default();
        debug!("New PATH: {}", path);
        Ok(Self { crate_name, path, strict })
    }

    /// Variables the activated environment sets on top of the inherited (or strict) one.
    pub fn variables(&self) -> Vec<(&'static str, String)> {
        vec![
            ("BULKERCRATE", self.crate_name.clone()),
            ("BULKERPATH", self.path.clone()),
            ("PATH", self.path.clone()),
        ]
    }

    /// `export` lines for `eval` in an existing shell.
    pub fn exports(&self) -> String {
        self.variables()
            .into_iter()
            .map(|(name, value)| format!("export {}=\"{}\"\n", name, value))
            .collect()
    }

    /// Replaces the current process with `shell` running in the activated environment.
    ///
    /// Strict activation starts from an empty environment that keeps only `HOME`,
    /// `TERM` and the `allowed` variables. Only returns on failure.
    pub fn exec_shell(&self, shell: &str, allowed: &[String]) -> BulkerError {
        let mut command = Command::new(shell);
        if self.strict {
            command.env_clear();
            command.envs(strict_environment(allowed));
        }
        command.envs(self.variables());
        debug!("Starting shell: {}", shell);
        command.exec().into()
    }
}

/// Current values of `HOME`, `TERM` and `allowed`; unset variables are skipped.
pub fn strict_environment(allowed: &[String]) -> Vec<(String, String)> {
    STRICT_BASE_VARS
        .iter()
        .map(|name| name.to_string())
        .chain(allowed.iter().cloned())
        .filter_map(|name| std::env::var(&name).ok().map(|value| (name, value)))
        .collect()
}

/// `shell_path` from the config, else `$SHELL`, else `/bin/sh`.
pub fn shell_program(settings: &BulkerSettings) -> String {
    settings
        .shell_path
        .as_deref()
        .map(expand_vars)
        .or_else(|| std::env::var("SHELL").ok())
        .filter(|shell| !shell.is_empty() && !shell.starts_with('$'))
        .unwrap_or_else(|| FALLBACK_SHELL.to_string())
}
