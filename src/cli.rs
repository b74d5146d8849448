use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Build(BuildArgs),
    Check(CheckArgs),
    Catalog(CatalogArgs),
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Path to `songbook.yaml`.
    #[arg(long)]
    pub config: String,

    /// Document store directory (overrides `store_dir`).
    #[arg(long)]
    pub store: Option<String>,

    /// Recompile even when no song changed since the last build.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Path to `songbook.yaml`.
    #[arg(long)]
    pub config: String,

    /// Document store directory (overrides `store_dir`).
    #[arg(long)]
    pub store: Option<String>,
}

#[derive(Debug, Args)]
pub struct CatalogArgs {
    /// Path to `songbook.yaml`.
    #[arg(long)]
    pub config: String,
}
