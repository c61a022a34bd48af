use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use triplegen::config::{Config, DEFAULT_MODULUS};

/// Two-party Beaver triple generation using Paillier encryption.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate triples as one of the two parties.
    Run(Config),
    /// Combine both share files and check every triple.
    Verify {
        #[arg(long, env = "OUTDIR", default_value = "/output")]
        outdir: PathBuf,
        #[arg(long, env = "MPC_MODULO", default_value_t = DEFAULT_MODULUS)]
        modulus: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .compact()
        .init();

    match cli.command {
        Command::Run(config) => {
            let rank = config.rank;
            triplegen::run(&config)
                .await
                .with_context(|| format!("rank {rank} failed"))?;
        }
        Command::Verify { outdir, modulus } => {
            let triples = triplegen::output::verify(&outdir, modulus)
                .with_context(|| format!("verification of {} failed", outdir.display()))?;
            tracing::info!("All {} triples are valid", triples.len());
        }
    }
    Ok(())
}
