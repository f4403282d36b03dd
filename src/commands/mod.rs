//! CLI subcommands
//!
//! One file per subcommand; shared flag structs live here. Exit codes: 0 on
//! success, non-zero on any unrecovered error (main maps errors).

mod create;
mod delete;
mod os;
mod provision;

pub use create::run as create;
pub use delete::run as delete;
pub use os::run as os;
pub use provision::run as provision;

use clap::Args;
use std::path::PathBuf;

/// Flags shared by commands that address an environment.
#[derive(Debug, Args)]
pub struct EnvFlags {
    /// Path to the environment file
    #[arg(short = 'f', long = "envFile")]
    pub env_file: Option<String>,

    /// Cache directory root (defaults to the user cache dir)
    #[arg(short = 'c', long = "cachepath")]
    pub cachepath: Option<PathBuf>,
}

/// Flags accepted by `provision`.
#[derive(Debug, Args)]
pub struct ProvisionFlags {
    /// Path to the environment file
    #[arg(short = 'f', long = "envFile")]
    pub env_file: Option<String>,

    /// Cache directory root (defaults to the user cache dir)
    #[arg(short = 'c', long = "cachepath")]
    pub cachepath: Option<PathBuf>,

    /// Where to write the fetched kubeconfig
    #[arg(short = 'k', long = "kubeconfig")]
    pub kubeconfig: Option<PathBuf>,

    /// Provision existing SSH hosts instead of cloud instances
    #[arg(long)]
    pub ssh: bool,

    /// Host to provision over SSH; repeat for multiple nodes (first becomes
    /// the control plane)
    #[arg(long)]
    pub host: Vec<String>,

    /// SSH private key path (overrides auth.privateKey)
    #[arg(long)]
    pub key: Option<String>,

    /// SSH username (overrides auth.username)
    #[arg(short = 'u', long = "user")]
    pub user: Option<String>,
}

/// Subcommands of `holodeck os`.
#[derive(Debug, clap::Subcommand)]
pub enum OsCommands {
    /// List supported operating systems
    List,
    /// Show one registry entry in detail
    Describe { id: String },
    /// Resolve an AMI id for an OS, region and architecture
    Ami {
        id: String,
        #[arg(long)]
        region: String,
        #[arg(long, default_value = "x86_64")]
        arch: String,
    },
}
