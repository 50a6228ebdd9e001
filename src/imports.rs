//! Import graph traversal.
//!
//! Imports are registry paths. Identifiers are normalized to their canonical
//! `namespace/crate:tag` form before they enter the visited set, so `base` and
//! `bulker/base:default` are the same node and a cycle is visited once.
//! The result is in depth-first post-order: an import comes after its own
//! imports and siblings keep manifest order. Imports are overlaid in that order.

use std::collections::BTreeSet;
use tracing::{debug, warn};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::registry::RegistryReference;

/// Returns the canonical identifiers of every crate imported by `manifest`,
/// each once, with every import after the crates it imports.
///
/// With `recurse` set, each import's own manifest is fetched through `fetch` and its
/// imports are followed depth-first. Imports that cannot be parsed or fetched are
/// logged and skipped.
///
/// # Example
///
/// ```
/// use bulker::{resolve_imports, BulkerError, Manifest};
///
/// let manifest = Manifest { imports: vec!["base".to_string()], ..Default::default() };
/// let imports = resolve_imports(&manifest, "bulker", false, |_| {
///     Err(BulkerError::ManifestNotFound { location: String::new() })
/// });
/// assert_eq!(imports, vec!["bulker/base:default"]);
/// ```
pub fn resolve_imports<F>(
    manifest: &Manifest,
    default_namespace: &str,
    recurse: bool,
    mut fetch: F,
) -> Vec<String>
where
    F: FnMut(&RegistryReference) -> Result<Manifest>,
{
    let mut visited = BTreeSet::new();
    let mut ordered = Vec::new();
    visit(manifest, default_namespace, recurse, &mut fetch, &mut visited, &mut ordered);
    ordered
}

fn visit<F>(
    manifest: &Manifest,
    default_namespace: &str,
    recurse: bool,
    fetch: &mut F,
    visited: &mut BTreeSet<String>,
    ordered: &mut Vec<String>,
) where
    F: FnMut(&RegistryReference) -> Result<Manifest>,
{
    for import in &manifest.imports {
        let reference = match RegistryReference::parse(import, default_namespace) {
            Ok(reference) => reference,
            Err(e) => {
                warn!("Skipping import '{}': {}", import, e);
                continue;
            }
        };
        let id = reference.to_string();
        if !visited.insert(id.clone()) {
            debug!("Import '{}' already visited", reference);
            continue;
        }
        if recurse {
            match fetch(&reference) {
                Ok(imported) => visit(&imported, default_namespace, recurse, fetch, visited, ordered),
                Err(e) => warn!("Unable to follow imports of '{}': {}", reference, e),
            }
        }
        ordered.push(id);
    }
}
