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
    ao3scrape::logging::init().context("init logging")?;

    let cli = ao3scrape::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        ao3scrape::cli::Command::Fetch(args) => {
            ao3scrape::scrape::run(args).await.context("fetch")?;
        }
        ao3scrape::cli::Command::Ids(args) => {
            ao3scrape::ids::run(args).context("ids")?;
        }
    }

    Ok(())
}
