//! CLI command definitions.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect a flow definition
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },

    /// Check out a repository at a branch, commit or point in time
    Extract(ExtractArgs),

    /// Inspect build manifests
    Manifest {
        #[command(subcommand)]
        command: ManifestCommands,
    },
}

#[derive(Subcommand)]
pub enum GraphCommands {
    /// Validate a flow file and print the builder order
    Validate {
        /// Path to flow file
        #[arg(default_value = "cascade.yaml")]
        flow: PathBuf,
    },

    /// List the builders a builder can trigger
    Downstream {
        /// Path to flow file
        flow: PathBuf,

        /// Builder name
        builder: String,
    },

    /// Print the JSON schema of the flow file
    Schema,
}

#[derive(Args)]
pub struct ExtractArgs {
    /// Repository name, resolved to a URL through the config
    #[arg(long)]
    pub repo_name: String,

    /// Directory the repository is cloned into
    #[arg(long, default_value = ".")]
    pub root_dir: PathBuf,

    /// Branch to fetch
    #[arg(long, default_value = "master")]
    pub branch: String,

    /// Commit to check out
    #[arg(long, conflicts_with = "commit_time")]
    pub commit_id: Option<String>,

    /// Check out the last commit at or before this time (UTC, "%Y-%m-%d %H:%M:%S")
    #[arg(long)]
    pub commit_time: Option<String>,
}

#[derive(Subcommand)]
pub enum ManifestCommands {
    /// Show components and their repositories
    Show {
        /// Path to manifest file
        path: PathBuf,
    },
}
