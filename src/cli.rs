use std::path::PathBuf;
use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    /// Bulker configuration file
    #[clap(short, long, global = true, env = "BULKERCFG")]
    pub(crate) config: Option<PathBuf>,
    /// More log output (-v debug, -vv trace)
    #[clap(short, long, global = true, action = ArgAction::Count)]
    pub(crate) verbose: u8,
    /// Only log errors
    #[clap(long, global = true)]
    pub(crate) silent: bool,
    #[command(subcommand)]
    pub(crate) command: BulkerCommand,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum BulkerCommand {
    /// Initialize a new bulker config file and its templates
    Init {
        /// Container engine. Guessed from `PATH` if not given
        #[clap(short, long, value_parser = ["docker", "singularity"])]
        engine: Option<String>,
    },
    /// List loaded crates
    List {
        /// Only print registry paths
        #[clap(short, long)]
        simple: bool,
    },
    /// Show the path and commands of a crate. Defaults to the active one
    Inspect {
        #[clap(env = "BULKERCRATE")]
        crate_registry_path: Option<String>,
    },
    /// Load a crate from a registry or a manifest file
    Load {
        /// Registry path, e.g. `databio/pepatac:1.0.13`
        crate_registry_path: String,
        /// Manifest location (file or URL) to use instead of the registry
        #[clap(short, long)]
        manifest: Option<String>,
        /// Directory to write the crate to
        #[clap(short, long)]
        path: Option<String>,
        /// Pull or build the container images
        #[clap(short, long)]
        build: bool,
        /// Overwrite an existing crate without asking
        #[clap(short, long)]
        force: bool,
        /// Reload all imported crates as well
        #[clap(short, long)]
        recurse: bool,
    },
    /// Remove crates and their directories
    Unload {
        /// Comma-separated registry paths
        crate_registry_paths: String,
    },
    /// Re-fetch and reload every loaded crate
    Reload {
        /// Reload all imported crates as well
        #[clap(short, long)]
        recurse: bool,
    },
    /// Start a shell with crates on the `PATH`
    Activate {
        /// Comma-separated registry paths
        crate_registry_paths: String,
        /// Keep only crate commands on the `PATH` and a minimal environment
        #[clap(short, long)]
        strict: bool,
        /// Print export statements instead of starting a shell
        #[clap(short, long)]
        echo: bool,
    },
    /// Run a command with crates on the `PATH`
    Run {
        /// Comma-separated registry paths
        crate_registry_paths: String,
        /// Keep only crate commands on the `PATH`
        #[clap(short, long)]
        strict: bool,
        /// The command line to run
        #[clap(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },
    /// Show or edit the variables kept by strict activation
    Envvars {
        /// Add a variable
        #[clap(short, long)]
        add: Vec<String>,
        /// Remove a variable
        #[clap(short, long)]
        remove: Vec<String>,
    },
}
