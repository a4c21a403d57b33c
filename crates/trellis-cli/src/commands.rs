//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new pipeline file
    Init,

    /// Validate a pipeline file
    Validate {
        /// Path to pipeline file
        #[arg(default_value = "trellis.yaml")]
        path: String,
    },

    /// Print the JSON schema for pipeline files
    Schema,

    /// Run a pipeline
    Run {
        /// Path to pipeline file
        #[arg(default_value = "trellis.yaml")]
        path: String,

        /// Branch name of the trigger event
        #[arg(short, long, conflicts_with = "tag")]
        branch: Option<String>,

        /// Tag name of the trigger event; doubles as the version reference
        #[arg(short, long)]
        tag: Option<String>,

        /// Override the version reference for the consistency check
        #[arg(long)]
        expect_version: Option<String>,

        /// Maximum concurrently running instances
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Working directory for steps (defaults to the current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
}
