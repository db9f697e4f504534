//! Artifact CLI - upload and fetch internal blobs through the artifact proxy

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::{blob_name, BlobClient};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "artifact-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the artifact proxy
    #[arg(long, global = true, env = "ARTIFACT_API_URL", default_value = "http://localhost:8089")]
    api_url: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a file as /internal/<file name>
    Upload {
        file: PathBuf,
    },

    /// Download /internal/<name>
    Get {
        name: String,

        /// Destination file, defaults to <name> in the current directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "artifact_cli=info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = BlobClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Upload { file } => {
            let reply = client.upload(&file).await?;
            info!("{}", reply);
        }
        Commands::Get { name, output } => {
            let dest = match output {
                Some(path) => path,
                None => PathBuf::from(blob_name(std::path::Path::new(&name))?),
            };
            let size = client.download(&name, &dest).await?;
            info!(size, "Saved {} to {}", name, dest.display());
        }
    }

    Ok(())
}
