//! Effective per-command settings.
//!
//! A manifest command is overlaid on the crate-global config: every field the
//! command sets wins, every field it leaves out falls back to the config. The
//! result is an owned value, so nothing a command does leaks into the next one.

use std::path::{Path, PathBuf};
use tracing::debug;
use crate::config::{BulkerSettings, Engine, ToolArgs};
use crate::error::Result;
use crate::manifest::CommandEntry;
use crate::registry::ImageReference;
use crate::template::{TemplateValue, TemplateVars};
use crate::util::mkabs;

/// Working directory used inside containers unless a command sets one.
pub const DEFAULT_WORKDIR: &str = "$(pwd)";

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveCommand {
    pub command: String,
    pub docker_image: String,
    pub docker_command: String,
    pub singularity_command: String,
    pub engine: Engine,
    /// Arguments for the active engine, tool overrides appended.
    pub engine_args: String,
    pub volumes: Vec<String>,
    pub envvars: Vec<String>,
    pub workdir: String,
    pub no_user: bool,
    pub no_network: bool,
    /// Basename of the image, used as the singularity image file name.
    pub singularity_image: String,
    pub singularity_fullpath: Option<PathBuf>,
}

impl EffectiveCommand {
    /// Merges `entry` over `settings`.
    ///
    /// `config_dir` resolves a relative `singularity_image_folder`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command's `docker_image` can't be parsed.
    pub fn merge(entry: &CommandEntry, settings: &BulkerSettings, config_dir: &Path) -> Result<Self> {
        let engine = settings.container_engine;
        let image = ImageReference::parse(&entry.docker_image)?;
        let own_args = match engine {
            Engine::Docker => entry.docker_args.as_deref(),
            Engine::Singularity => entry.singularity_args.as_deref(),
        };
        let mut effective = EffectiveCommand {
            command: entry.command.clone(),
            docker_image: entry.docker_image.clone(),
            docker_command: entry.docker_command.clone().unwrap_or_else(|| entry.command.clone()),
            singularity_command: entry
                .singularity_command
                .clone()
                .unwrap_or_else(|| entry.command.clone()),
            engine,
            engine_args: own_args.or(settings.engine_args()).unwrap_or_default().to_string(),
            volumes: entry.volumes.clone().unwrap_or_else(|| settings.volumes.clone()),
            envvars: entry.envvars.clone().unwrap_or_else(|| settings.envvars.clone()),
            workdir: entry.workdir.clone().unwrap_or_else(|| DEFAULT_WORKDIR.to_string()),
            no_user: entry.no_user.unwrap_or(false),
            no_network: entry.no_network.unwrap_or(false),
            singularity_image: image.image.clone(),
            singularity_fullpath: None,
        };
        if engine == Engine::Singularity {
            if let Some(folder) = &settings.singularity_image_folder {
                // images without a namespace sit directly in the folder
                let mut fullpath = mkabs(folder, Some(config_dir));
                if let Some((namespace, _)) = entry.docker_image.rsplit_once('/') {
                    fullpath.push(namespace);
                }
                fullpath.push(&image.image);
                effective.singularity_fullpath = Some(fullpath);
            }
        }
        match settings.tool_args_for(&image) {
            Some(overrides) => effective.apply_tool_args(overrides),
            None => debug!("No host/tool args found for {}", entry.docker_image),
        }
        Ok(effective)
    }

    /// Appends engine argument overrides and drops excluded volumes.
    pub fn apply_tool_args(&mut self, overrides: &ToolArgs) {
        if let Some(args) = overrides.engine_args(self.engine).filter(|args| !args.is_empty()) {
            debug!("Adding host-tool args: {}", args);
            if self.engine_args.is_empty() {
                self.engine_args = args.to_string();
            } else {
                self.engine_args = format!("{} {}", self.engine_args, args);
            }
        }
        for excluded in &overrides.exclude_volumes {
            debug!("Excluding volume: '{}'", excluded);
            self.volumes.retain(|volume| volume != excluded);
        }
    }

    /// `image_uri` points at the local image file when there is one.
    pub fn image_uri(&self) -> String {
        match &self.singularity_fullpath {
            Some(path) => path.to_string_lossy().into_owned(),
            None => format!("docker://{}", self.docker_image),
        }
    }

    pub fn template_vars(&self) -> TemplateVars {
        let text = |value: &str| TemplateValue::Text(value.to_string());
        let mut vars = TemplateVars::new();
        vars.insert("command".into(), text(&self.command));
        vars.insert("docker_image".into(), text(&self.docker_image));
        vars.insert("docker_command".into(), text(&self.docker_command));
        vars.insert("singularity_command".into(), text(&self.singularity_command));
        vars.insert("container_engine".into(), text(self.engine.as_str()));
        vars.insert("engine_args".into(), text(&self.engine_args));
        vars.insert(format!("{}_args", self.engine), text(&self.engine_args));
        vars.insert("volumes".into(), TemplateValue::List(self.volumes.clone()));
        vars.insert("envvars".into(), TemplateValue::List(self.envvars.clone()));
        vars.insert("workdir".into(), text(&self.workdir));
        vars.insert("no_user".into(), TemplateValue::Flag(self.no_user));
        vars.insert("no_network".into(), TemplateValue::Flag(self.no_network));
        vars.insert("singularity_image".into(), text(&self.singularity_image));
        vars.insert("image_uri".into(), text(&self.image_uri()));
        if let Some(path) = &self.singularity_fullpath {
            vars.insert("singularity_fullpath".into(), text(&path.to_string_lossy()));
        }
        vars
    }
}
