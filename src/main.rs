use anyhow::Result;
use blockvault::cli::Cli;
use clap::Parser;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{prelude::*, EnvFilter};

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries file listings and contents.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    blockvault::run(Cli::parse())
}
