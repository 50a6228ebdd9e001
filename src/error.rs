//! Error types for bulker

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving, loading, activating or running crates.
#[derive(Debug, Error)]
pub enum BulkerError {
    #[error("Unable to parse registry path: '{0}'")]
    Parse(String),

    #[error("The requested manifest '{location}' is not found")]
    ManifestNotFound { location: String },

    #[error("Malformed manifest '{location}': {source}")]
    ManifestParse {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to fetch manifest '{location}': {source}")]
    Fetch {
        location: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("'{0}' is not an available crate")]
    MissingCrate(String),

    #[error("'{0}' is not a plain file name")]
    InvalidName(String),

    #[error("No commands provided. Crate '{0}' not created.")]
    EmptyCrate(String),

    #[error("Bulker config points to a missing {kind} template: {}", path.display())]
    TemplateMissing { kind: &'static str, path: PathBuf },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid bulker config '{}': {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Lock(#[from] crate::lock::LockError),

    #[error("Prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("Process error: {0}")]
    Process(#[from] nix::errno::Errno),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BulkerError>;
