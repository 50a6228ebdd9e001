//! # Bulker Core Library
//!
//! This crate contains the core logic of the `bulker` tool – a manager for "crates" of containerized
//! command-line tools. A crate is a directory of small generated scripts, one per tool, that run the
//! tool inside docker or singularity. Putting that directory on your `PATH` makes the containerized
//! tools callable as if they were installed natively.
//!
//! Crates are described by manifests (`manifest:` YAML documents) served from a registry and addressed
//! by registry paths like `databio/pepatac:1.0.13`. Manifests can import other crates.
//!
//! This library is built for the `bulker` CLI, but you can also reuse it as a backend in other tools.
//!
//! ## Modules Overview
//! - [`registry`] – Parsing registry paths and container image references
//! - [`manifest`] – Manifest documents and fetching them from a registry or a file
//! - [`imports`] – Walking the import graph of a manifest
//! - [`config`] – The bulker config document and its crate registry
//! - [`lock`] – Advisory locking of the config document
//! - [`settings`] – Merging per-command settings over the crate-global config
//! - [`template`] – Script templates and the renderer
//! - [`shims`] – Writing launcher scripts and host command links
//! - [`installer`] – Loading, reloading and unloading crates
//! - [`activate`] – Building the `PATH` and environment of activated crates
//! - [`supervisor`] – Running a command in activated crates and shutting it down on interrupts
//! - [`prompts`] – Yes/no confirmation
//! - [`util`] – Shared utilities (path expansion, copying, permissions)
//! - [`global`] – Per-user locations (default config file)

pub mod error;
pub mod registry;
pub mod manifest;
pub mod imports;
pub mod config;
pub mod lock;
pub mod settings;
pub mod template;
pub mod shims;
pub mod installer;
pub mod activate;
pub mod supervisor;
pub mod prompts;
pub mod util;
pub mod global;

pub use error::{BulkerError, Result};
pub use registry::{ImageReference, RegistryReference};
pub use manifest::{CommandEntry, Manifest, ManifestFetcher};
pub use imports::resolve_imports;
pub use config::{BulkerConfig, BulkerSettings, ConfigFile, CrateRegistry, Engine};
pub use lock::{ConfigLock, LockMode};
pub use installer::{LoadOptions, LoadOutcome, Loader, unload};
pub use activate::{Activation, build_path};
pub use supervisor::{RunOutcome, Supervisor, Termination};
