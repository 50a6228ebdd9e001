use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{BulkerError, Result};
use crate::registry::RegistryReference;
use crate::util::is_url;

/// Registry consulted when the config does not name one.
pub const DEFAULT_REGISTRY_URL: &str = "http://hub.bulker.io";

/// A manifest document as stored in a registry: everything lives under `manifest:`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ManifestDocument {
    pub manifest: Manifest,
}

/// The declarative description of a crate.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Containerized commands, one launcher each.
    #[serde(default, deserialize_with = "null_as_default")]
    pub commands: Vec<CommandEntry>,
    /// Executables linked from the host.
    #[serde(default, deserialize_with = "null_as_default")]
    pub host_commands: Vec<String>,
    /// Registry paths of crates merged into this one.
    #[serde(default, deserialize_with = "null_as_default")]
    pub imports: Vec<String>,
}

/// A single containerized command of a manifest.
///
/// Every field besides `command` and `docker_image` is an optional override
/// of the crate-global settings in the bulker config.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CommandEntry {
    pub command: String,
    pub docker_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singularity_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_args: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singularity_args: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envvars: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_user: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_network: Option<bool>,
}

// `commands:` with nothing after it is a YAML null, which means "none".
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Manifest {
    /// Parses a manifest document from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`BulkerError::ManifestParse`] naming `location` if the text is malformed.
    pub fn from_yaml(text: &str, location: &str) -> Result<Manifest> {
        let document: ManifestDocument = serde_yaml::from_str(text)
            .map_err(|source| BulkerError::ManifestParse {
                location: location.to_string(),
                source,
            })?;
        Ok(document.manifest)
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.host_commands.is_empty()
    }
}

/// Resolves manifests from a registry (HTTP or a local directory) or an explicit location.
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    base_url: String,
    default_namespace: String,
    client: reqwest::blocking::Client,
}

impl ManifestFetcher {
    pub fn new(base_url: &str, default_namespace: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            default_namespace: default_namespace.to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    /// Location of the manifest for `reference`: `{base_url}/{namespace}/{crate}[_{tag}].yaml`.
    pub fn manifest_location(&self, reference: &RegistryReference) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), reference.manifest_query())
    }

    /// Fetches the manifest for `reference`.
    ///
    /// If `explicit_path` is given, the manifest is read from there instead of the registry.
    ///
    /// # Errors
    ///
    /// - [`BulkerError::ManifestNotFound`] if the location does not exist (or answers 404)
    /// - [`BulkerError::ManifestParse`] if the document is malformed
    /// - [`BulkerError::Fetch`] on HTTP transport errors
    pub fn fetch(
        &self,
        reference: &RegistryReference,
        explicit_path: Option<&str>,
    ) -> Result<(Manifest, RegistryReference)> {
        let location = match explicit_path {
            Some(path) => path.to_string(),
            None => self.manifest_location(reference),
        };
        let text = self.read_location(&location)?;
        let manifest = Manifest::from_yaml(&text, &location)?;
        Ok((manifest, reference.clone()))
    }

    /// Parses `registry_path` with the fetcher's default namespace and fetches it.
    pub fn fetch_path(
        &self,
        registry_path: &str,
        explicit_path: Option<&str>,
    ) -> Result<(Manifest, RegistryReference)> {
        let reference = RegistryReference::parse(registry_path, &self.default_namespace)?;
        self.fetch(&reference, explicit_path)
    }

    fn read_location(&self, location: &str) -> Result<String> {
        if is_url(location) {
            debug!("Got URL: {}", location);
            let fetch_error = |source| BulkerError::Fetch {
                location: location.to_string(),
                source,
            };
            let response = self.client.get(location).send().map_err(fetch_error)?;
            if !response.status().is_success() {
                debug!("{} answered {}", location, response.status());
                return Err(BulkerError::ManifestNotFound { location: location.to_string() });
            }
            return response.text().map_err(fetch_error);
        }
        let path = Path::new(location);
        if !path.is_file() {
            return Err(BulkerError::ManifestNotFound { location: location.to_string() });
        }
        Ok(std::fs::read_to_string(path)?)
    }
}
