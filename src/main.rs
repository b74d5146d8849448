use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = songbook::cli::Cli::parse();
    songbook::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        songbook::cli::Command::Build(args) => {
            songbook::build::run(args).await.context("build")?;
        }
        songbook::cli::Command::Check(args) => {
            songbook::build::check(args).await.context("check")?;
        }
        songbook::cli::Command::Catalog(args) => {
            songbook::build::catalog(args).await.context("catalog")?;
        }
    }

    Ok(())
}
