use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "quill",
    about = "Quill: project and document storage for LaTeX workspaces",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Core configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build the folder tree for a list of document paths
    Tree(TreeArgs),
    /// Explain where a file's content would be stored
    Placement(PlacementArgs),
    /// Validate and print the effective configuration
    Config(ConfigArgs),
    /// Run a scripted session against in-memory stores
    Demo(DemoArgs),
}

#[derive(Args)]
pub struct TreeArgs {
    /// Document paths such as /chapters/intro.tex; read from stdin if empty
    pub paths: Vec<String>,
}

#[derive(Args)]
pub struct PlacementArgs {
    /// Local file to measure
    pub file: PathBuf,
    /// Override the configured inline threshold (bytes)
    #[arg(long)]
    pub threshold: Option<u64>,
    /// File type; inferred from the extension when omitted
    #[arg(long = "type")]
    pub file_type: Option<String>,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Only check the file; print nothing on success
    #[arg(long)]
    pub check: bool,
}

#[derive(Args)]
pub struct DemoArgs {
    /// Inline threshold for the session (bytes)
    #[arg(long, default_value = "64")]
    pub threshold: u64,
}
