//! The bulker config document.
//!
//! Everything lives under a top-level `bulker:` key: container engine selection,
//! crate folder, template locations, shared volumes and environment, the
//! registry of loaded crates and the per-image tool argument table.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use crate::error::{BulkerError, Result};
use crate::lock::{ConfigLock, LockMode};
use crate::manifest::DEFAULT_REGISTRY_URL;
use crate::registry::{DEFAULT_NAMESPACE, DEFAULT_TAG, ImageReference, RegistryReference};
use crate::util::mkabs;

/// File name used for configs created without an explicit path.
pub const CONFIG_FILE_NAME: &str = "bulker_config.yaml";

type Nested<V> = BTreeMap<String, BTreeMap<String, BTreeMap<String, V>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Docker,
    Singularity,
}

impl Engine {
    pub const ALL: [Engine; 2] = [Engine::Docker, Engine::Singularity];

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Docker => "docker",
            Engine::Singularity => "singularity",
        }
    }

    /// First engine found on `PATH`, in order of preference.
    pub fn guess() -> Option<Engine> {
        Engine::ALL
            .into_iter()
            .find(|engine| which::which(engine.as_str()).is_ok())
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BulkerConfig {
    pub bulker: BulkerSettings,
}

/// Crate-global settings. Command entries of a manifest override these.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BulkerSettings {
    #[serde(default)]
    pub container_engine: Engine,
    #[serde(default = "default_crate_folder")]
    pub default_crate_folder: String,
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singularity_image_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_path: Option<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Variables passed into containers, and kept by strict activation.
    #[serde(default)]
    pub envvars: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_args: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singularity_args: Option<String>,
    #[serde(default)]
    pub crates: CrateRegistry,
    #[serde(default, deserialize_with = "nested_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_args: Nested<ToolArgs>,
}

fn default_crate_folder() -> String {
    "${HOME}/bulker_crates".to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for BulkerSettings {
    fn default() -> Self {
        Self {
            container_engine: Engine::default(),
            default_crate_folder: default_crate_folder(),
            default_namespace: default_namespace(),
            registry_url: None,
            singularity_image_folder: None,
            executable_template: None,
            shell_template: None,
            build_template: None,
            shell_path: None,
            volumes: Vec::new(),
            envvars: Vec::new(),
            docker_args: None,
            singularity_args: None,
            crates: CrateRegistry::default(),
            tool_args: BTreeMap::new(),
        }
    }
}

impl BulkerSettings {
    /// Settings written by `bulker init` for the given engine.
    pub fn for_engine(engine: Engine) -> Self {
        let template = |kind: &str| Some(format!("templates/{}_{}.tmpl", engine, kind));
        Self {
            container_engine: engine,
            registry_url: Some(DEFAULT_REGISTRY_URL.to_string()),
            executable_template: template("executable"),
            shell_template: template("shell"),
            build_template: template("build"),
            volumes: vec!["$HOME".to_string()],
            envvars: vec!["DISPLAY".to_string()],
            ..Self::default()
        }
    }

    pub fn registry_url(&self) -> &str {
        self.registry_url.as_deref().unwrap_or(DEFAULT_REGISTRY_URL)
    }

    /// Crate-global engine arguments for the configured engine.
    pub fn engine_args(&self) -> Option<&str> {
        match self.container_engine {
            Engine::Docker => self.docker_args.as_deref(),
            Engine::Singularity => self.singularity_args.as_deref(),
        }
    }

    /// Looks up the tool argument overrides for a container image.
    ///
    /// A tag-specific bucket is used only if the image asks for a tag other than
    /// `default` and that bucket exists; otherwise the `default` bucket applies.
    /// `None` means no overrides are configured for the image.
    pub fn tool_args_for(&self, image: &ImageReference) -> Option<&ToolArgs> {
        let by_tag = self.tool_args.get(&image.namespace)?.get(&image.image)?;
        if image.tag != DEFAULT_TAG {
            if let Some(args) = by_tag.get(&image.tag) {
                return Some(args);
            }
        }
        by_tag.get(DEFAULT_TAG)
    }
}

/// Host- and tool-specific overrides for a container image.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ToolArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_args: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singularity_args: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_volumes: Vec<String>,
}

impl ToolArgs {
    pub fn engine_args(&self, engine: Engine) -> Option<&str> {
        match engine {
            Engine::Docker => self.docker_args.as_deref(),
            Engine::Singularity => self.singularity_args.as_deref(),
        }
    }
}

/// Loaded crates: `namespace -> crate -> tag -> directory`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrateRegistry {
    #[serde(deserialize_with = "nested_map")]
    entries: Nested<PathBuf>,
}

impl CrateRegistry {
    pub fn get(&self, reference: &RegistryReference) -> Option<&Path> {
        self.entries
            .get(&reference.namespace)?
            .get(&reference.crate_name)?
            .get(&reference.tag)
            .map(PathBuf::as_path)
    }

    pub fn contains(&self, reference: &RegistryReference) -> bool {
        self.get(reference).is_some()
    }

    /// Records the directory of a crate, replacing any previous entry for the same triple.
    pub fn insert(&mut self, reference: &RegistryReference, path: PathBuf) {
        self.entries
            .entry(reference.namespace.clone())
            .or_default()
            .entry(reference.crate_name.clone())
            .or_default()
            .insert(reference.tag.clone(), path);
    }

    /// Removes a crate, pruning namespaces and crates left without tags.
    pub fn remove(&mut self, reference: &RegistryReference) -> Option<PathBuf> {
        let crates = self.entries.get_mut(&reference.namespace)?;
        let tags = crates.get_mut(&reference.crate_name)?;
        let removed = tags.remove(&reference.tag);
        if tags.is_empty() {
            crates.remove(&reference.crate_name);
        }
        if crates.is_empty() {
            self.entries.remove(&reference.namespace);
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered crates, ordered by namespace, crate and tag.
    pub fn iter(&self) -> impl Iterator<Item = (RegistryReference, &Path)> {
        self.entries.iter().flat_map(|(namespace, crates)| {
            crates.iter().flat_map(move |(crate_name, tags)| {
                tags.iter().map(move |(tag, path)| {
                    let reference = RegistryReference {
                        protocol: None,
                        namespace: namespace.clone(),
                        crate_name: crate_name.clone(),
                        subcrate: None,
                        tag: tag.clone(),
                    };
                    (reference, path.as_path())
                })
            })
        })
    }
}

/// A map key written as any YAML scalar. Tags like `1.0` parse as numbers but
/// are addressed as strings.
struct ScalarKey(String);

impl<'de> Deserialize<'de> for ScalarKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ScalarKeyVisitor;

        impl Visitor<'_> for ScalarKeyVisitor {
            type Value = ScalarKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, number or boolean key")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<ScalarKey, E> {
                Ok(ScalarKey(v.to_string()))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<ScalarKey, E> {
                Ok(ScalarKey(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<ScalarKey, E> {
                Ok(ScalarKey(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<ScalarKey, E> {
                Ok(ScalarKey(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<ScalarKey, E> {
                // Debug keeps the fractional part: 1.0 stays "1.0"
                Ok(ScalarKey(format!("{:?}", v)))
            }
        }

        deserializer.deserialize_any(ScalarKeyVisitor)
    }
}

impl PartialEq for ScalarKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for ScalarKey {}

impl PartialOrd for ScalarKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

type RawLevel<V> = Option<BTreeMap<ScalarKey, V>>;

fn nested_map<'de, D, V>(deserializer: D) -> std::result::Result<Nested<V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    let raw: RawLevel<RawLevel<RawLevel<V>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(namespace, crates)| {
            let crates = crates
                .unwrap_or_default()
                .into_iter()
                .map(|(name, tags)| {
                    let tags = tags
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(tag, value)| (tag.0, value))
                        .collect();
                    (name.0, tags)
                })
                .collect();
            (namespace.0, crates)
        })
        .collect())
}

/// The config document on disk together with the lock that guards it.
#[derive(Debug)]
pub struct ConfigFile {
    path: PathBuf,
    config: BulkerConfig,
    lock: ConfigLock,
}

impl ConfigFile {
    /// Locks and reads the config at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is contended, the file can't be read, or it
    /// does not match the config schema.
    pub fn open(path: &Path, mode: LockMode) -> Result<ConfigFile> {
        let path = std::path::absolute(path)?;
        let lock = ConfigLock::acquire(&path, mode)?;
        let text = std::fs::read_to_string(&path)?;
        let config: BulkerConfig = serde_yaml::from_str(&text)
            .map_err(|source| BulkerError::Config { path: path.clone(), source })?;
        debug!("Selected bulker config: {}", path.display());
        Ok(ConfigFile { path, config, lock })
    }

    /// Writes a fresh config for `engine` to `path`.
    pub fn create(path: &Path, engine: Engine) -> Result<ConfigFile> {
        let path = std::path::absolute(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock = ConfigLock::acquire(&path, LockMode::Exclusive)?;
        let mut file = ConfigFile {
            path,
            config: BulkerConfig { bulker: BulkerSettings::for_engine(engine) },
            lock,
        };
        file.write()?;
        Ok(file)
    }

    /// Upgrades the held lock so the document may be modified.
    pub fn make_writable(&mut self) -> Result<()> {
        self.lock.upgrade()?;
        Ok(())
    }

    /// Flushes the document to disk, atomically replacing the previous file.
    pub fn write(&mut self) -> Result<()> {
        self.make_writable()?;
        let dir = self.dir().to_path_buf();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_yaml::to_writer(&mut tmp, &self.config)
            .map_err(|source| BulkerError::Config { path: self.path.clone(), source })?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!("Wrote bulker config: {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the config; relative paths inside it resolve against this.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    pub fn settings(&self) -> &BulkerSettings {
        &self.config.bulker
    }

    pub fn settings_mut(&mut self) -> &mut BulkerSettings {
        &mut self.config.bulker
    }

    pub fn crates(&self) -> &CrateRegistry {
        &self.config.bulker.crates
    }

    pub fn crates_mut(&mut self) -> &mut CrateRegistry {
        &mut self.config.bulker.crates
    }

    /// Makes `path` absolute, resolving relative paths against the config directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        mkabs(path, Some(self.dir()))
    }

    /// Default location of a crate: `{default_crate_folder}/{namespace}/{crate}/{tag}`.
    pub fn default_crate_path(&self, reference: &RegistryReference) -> PathBuf {
        self.resolve_path(&self.settings().default_crate_folder)
            .join(&reference.namespace)
            .join(&reference.crate_name)
            .join(&reference.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CONFIG: &str = r#"
bulker:
  container_engine: singularity
  default_crate_folder: crates
  volumes: ["$HOME", "/data"]
  envvars: [DISPLAY]
  crates:
    bulker:
      demo:
        default: /crates/bulker/demo/default
        1.0: /crates/bulker/demo/1.0
  tool_args:
    nsheff:
      cowsay:
        default:
          singularity_args: "--cleanenv"
          exclude_volumes: ["/data"]
        "1.2":
          singularity_args: "--contain"
"#;

    fn reference(path: &str) -> RegistryReference {
        RegistryReference::parse(path, "bulker").unwrap()
    }

    #[test]
    fn test_parse_config_with_numeric_tags() {
        let config: BulkerConfig = serde_yaml::from_str(CONFIG).unwrap();
        let settings = config.bulker;
        assert_eq!(settings.container_engine, Engine::Singularity);
        assert_eq!(settings.default_namespace, "bulker");
        assert_eq!(
            settings.crates.get(&reference("demo:1.0")),
            Some(Path::new("/crates/bulker/demo/1.0"))
        );
        assert!(settings.crates.contains(&reference("demo")));
        assert!(!settings.crates.contains(&reference("demo:2.0")));
    }

    #[test]
    fn test_null_crates_section() {
        let config: BulkerConfig = serde_yaml::from_str("bulker:\n  crates:\n").unwrap();
        assert!(config.bulker.crates.is_empty());
        assert_eq!(config.bulker.default_crate_folder, "${HOME}/bulker_crates");
    }

    #[test]
    fn test_tool_args_lookup() {
        let config: BulkerConfig = serde_yaml::from_str(CONFIG).unwrap();
        let settings = config.bulker;

        let latest = ImageReference::parse("nsheff/cowsay").unwrap();
        let args = settings.tool_args_for(&latest).unwrap();
        assert_eq!(args.engine_args(Engine::Singularity), Some("--cleanenv"));
        assert_eq!(args.exclude_volumes, vec!["/data"]);

        let pinned = ImageReference::parse("nsheff/cowsay:1.2").unwrap();
        let args = settings.tool_args_for(&pinned).unwrap();
        assert_eq!(args.engine_args(Engine::Singularity), Some("--contain"));

        let unknown = ImageReference::parse("nsheff/fortune").unwrap();
        assert!(settings.tool_args_for(&unknown).is_none());
    }

    #[test]
    fn test_registry_insert_remove_prunes() {
        let mut registry = CrateRegistry::default();
        registry.insert(&reference("databio/demo:1"), PathBuf::from("/a"));
        registry.insert(&reference("databio/demo:2"), PathBuf::from("/b"));
        assert_eq!(registry.iter().count(), 2);

        assert_eq!(registry.remove(&reference("databio/demo:1")), Some(PathBuf::from("/a")));
        assert!(!registry.is_empty());
        assert_eq!(registry.remove(&reference("databio/demo:2")), Some(PathBuf::from("/b")));
        assert!(registry.is_empty());
        assert_eq!(registry.remove(&reference("databio/demo:2")), None);
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = ConfigFile::create(&path, Engine::Docker).unwrap();
        config.crates_mut().insert(&reference("demo:1.0"), PathBuf::from("/crates/demo"));
        config.write().unwrap();
        drop(config);

        let config = ConfigFile::open(&path, LockMode::Shared).unwrap();
        assert_eq!(config.crates().get(&reference("demo:1.0")), Some(Path::new("/crates/demo")));
        assert_eq!(
            config.settings().executable_template.as_deref(),
            Some("templates/docker_executable.tmpl")
        );
        assert_eq!(config.dir(), dir.path());
    }

    #[test]
    fn test_default_crate_path_is_relative_to_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, CONFIG).unwrap();
        let config = ConfigFile::open(&path, LockMode::Shared).unwrap();
        assert_eq!(
            config.default_crate_path(&reference("databio/demo:1.0")),
            dir.path().join("crates").join("databio").join("demo").join("1.0")
        );
    }
}
