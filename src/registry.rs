use std::fmt;
use std::sync::LazyLock;
use regex::Regex;
use tracing::debug;
use crate::error::{BulkerError, Result};

/// Namespace used when a registry path does not name one.
pub const DEFAULT_NAMESPACE: &str = "bulker";
/// Tag used when a registry path does not name one.
pub const DEFAULT_TAG: &str = "default";
/// Namespace used for container images without an explicit owner.
pub const DEFAULT_IMAGE_NAMESPACE: &str = "docker";
/// Tag used for container images without an explicit tag.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

static REGISTRY_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<protocol>[0-9A-Za-z_-]+)(?:::|://))?(?:(?P<namespace>[0-9A-Za-z_-]+)/)?(?P<crate>[0-9A-Za-z_-]+)(?:\.(?P<subcrate>[0-9A-Za-z_-]+))?(?::(?P<tag>[0-9A-Za-z_.-]+))?$",
    )
    .expect("registry path pattern is valid")
});

/// A crate as addressed by a registry path: `[protocol://][namespace/]crate[.subcrate][:tag]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryReference {
    /// Optional transport hint, e.g. `http`.
    pub protocol: Option<String>,
    /// Owner of the crate. Defaults to the caller-supplied namespace.
    pub namespace: String,
    /// Name of the tool collection. Never empty.
    pub crate_name: String,
    /// Parsed but currently unused.
    pub subcrate: Option<String>,
    /// Version label. Defaults to `default`.
    pub tag: String,
}

impl RegistryReference {
    /// Parses a single registry path, filling in missing fields with defaults.
    ///
    /// # Arguments
    ///
    /// * `path` – The registry path, e.g. `"demo"`, `"databio/pepatac:1.0.13"`.
    /// * `default_namespace` – Namespace used when `path` does not name one.
    ///
    /// # Errors
    ///
    /// Returns [`BulkerError::Parse`] if `path` is empty or has no crate token.
    ///
    /// # Example
    ///
    /// ```
    /// use bulker::RegistryReference;
    ///
    /// let reference = RegistryReference::parse("demo", "bulker").unwrap();
    /// assert_eq!(reference.to_string(), "bulker/demo:default");
    /// ```
    pub fn parse(path: &str, default_namespace: &str) -> Result<Self> {
        let path = path.trim();
        let captures = REGISTRY_PATH
            .captures(path)
            .ok_or_else(|| BulkerError::Parse(path.to_string()))?;
        let field = |name: &str| captures.name(name).map(|m| m.as_str().to_string());
        let crate_name = field("crate")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| BulkerError::Parse(path.to_string()))?;
        Ok(Self {
            protocol: field("protocol"),
            namespace: field("namespace").unwrap_or_else(|| default_namespace.to_string()),
            crate_name,
            subcrate: field("subcrate"),
            tag: field("tag").unwrap_or_else(|| DEFAULT_TAG.to_string()),
        })
    }

    /// Parses a comma-separated list of registry paths.
    ///
    /// A string without a comma is treated as a single-element list. Empty segments
    /// (e.g. from a trailing comma) are ignored.
    pub fn parse_many(paths: &str, default_namespace: &str) -> Result<Vec<Self>> {
        let segments: Vec<&str> = paths
            .split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .collect();
        debug!("Split registry paths: {:?}", segments);
        if segments.is_empty() {
            return Err(BulkerError::Parse(paths.to_string()));
        }
        segments
            .into_iter()
            .map(|segment| Self::parse(segment, default_namespace))
            .collect()
    }

    /// Relative manifest query: `{namespace}/{crate}[_{tag}].yaml`.
    pub fn manifest_query(&self) -> String {
        if self.tag == DEFAULT_TAG {
            format!("{}/{}.yaml", self.namespace, self.crate_name)
        } else {
            format!("{}/{}_{}.yaml", self.namespace, self.crate_name, self.tag)
        }
    }
}

impl fmt::Display for RegistryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.crate_name, self.tag)
    }
}

/// A container image reference such as `quay.io/biocontainers/samtools:1.9`.
///
/// Parsing is lenient: everything before the last `/` is the namespace, so
/// registry hosts end up as part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub namespace: String,
    pub image: String,
    pub tag: String,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let (path, tag) = match reference.rsplit_once(':') {
            // a colon before the last slash belongs to a registry port
            Some((path, tag)) if !tag.contains('/') => (path, tag.to_string()),
            _ => (reference, DEFAULT_IMAGE_TAG.to_string()),
        };
        let (namespace, image) = match path.rsplit_once('/') {
            Some((namespace, image)) => (namespace.to_string(), image.to_string()),
            None => (DEFAULT_IMAGE_NAMESPACE.to_string(), path.to_string()),
        };
        if image.is_empty() || namespace.is_empty() || tag.is_empty() {
            return Err(BulkerError::Parse(reference.to_string()));
        }
        Ok(Self { namespace, image, tag })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_applies_defaults() {
        let reference = RegistryReference::parse("demo", "bulker").unwrap();
        assert_eq!(reference.protocol, None);
        assert_eq!(reference.namespace, "bulker");
        assert_eq!(reference.crate_name, "demo");
        assert_eq!(reference.subcrate, None);
        assert_eq!(reference.tag, "default");
    }

    #[test]
    fn test_parse_round_trips_to_canonical_form() {
        let cases = [
            ("demo", "bulker/demo:default"),
            ("databio/demo", "databio/demo:default"),
            ("databio/demo:1.0.0", "databio/demo:1.0.0"),
            ("demo:1.0.0", "bulker/demo:1.0.0"),
        ];
        for (input, expected) in cases {
            let reference = RegistryReference::parse(input, "bulker").unwrap();
            assert_eq!(reference.to_string(), expected);
            let again = RegistryReference::parse(&reference.to_string(), "other").unwrap();
            assert_eq!(again, reference);
        }
    }

    #[test]
    fn test_parse_uses_caller_namespace() {
        let reference = RegistryReference::parse("pepatac:1.0.13", "databio").unwrap();
        assert_eq!(reference.to_string(), "databio/pepatac:1.0.13");
    }

    #[test]
    fn test_parse_protocol_and_subcrate() {
        let reference = RegistryReference::parse("http://databio/demo.extra:2", "bulker").unwrap();
        assert_eq!(reference.protocol.as_deref(), Some("http"));
        assert_eq!(reference.subcrate.as_deref(), Some("extra"));
        assert_eq!(reference.to_string(), "databio/demo:2");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(RegistryReference::parse("", "bulker"), Err(BulkerError::Parse(_))));
        assert!(RegistryReference::parse("a/b/c", "bulker").is_err());
        assert!(RegistryReference::parse("ns/:tag", "bulker").is_err());
        assert!(RegistryReference::parse("white space", "bulker").is_err());
    }

    #[test]
    fn test_parse_many_splits_on_commas() {
        let refs = RegistryReference::parse_many("demo,databio/pepatac:1.0, other", "bulker").unwrap();
        let names: Vec<String> = refs.iter().map(|r| r.to_string()).collect();
        assert_eq!(names, vec!["bulker/demo:default", "databio/pepatac:1.0", "bulker/other:default"]);

        let single = RegistryReference::parse_many("demo", "bulker").unwrap();
        assert_eq!(single.len(), 1);
        assert!(RegistryReference::parse_many(" , ", "bulker").is_err());
    }

    #[test]
    fn test_manifest_query_omits_default_tag() {
        let reference = RegistryReference::parse("demo", "bulker").unwrap();
        assert_eq!(reference.manifest_query(), "bulker/demo.yaml");
        let reference = RegistryReference::parse("databio/pepatac:1.0.13", "bulker").unwrap();
        assert_eq!(reference.manifest_query(), "databio/pepatac_1.0.13.yaml");
    }

    #[test]
    fn test_image_reference_parse() {
        let image = ImageReference::parse("nsheff/cowsay").unwrap();
        assert_eq!(image, ImageReference {
            namespace: "nsheff".to_string(),
            image: "cowsay".to_string(),
            tag: "latest".to_string(),
        });

        let image = ImageReference::parse("ubuntu:20.04").unwrap();
        assert_eq!(image.namespace, "docker");
        assert_eq!(image.tag, "20.04");

        let image = ImageReference::parse("localhost:5000/biocontainers/samtools").unwrap();
        assert_eq!(image.namespace, "localhost:5000/biocontainers");
        assert_eq!(image.image, "samtools");
        assert_eq!(image.tag, "latest");

        assert!(ImageReference::parse("").is_err());
    }
}
