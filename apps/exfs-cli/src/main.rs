//! `exfs` command line entry point.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "exfs", version)]
#[command(about = "Inspect resumable uploads and user upload directories")]
struct Cli {
    /// Configuration file (defaults to ~/.config/exfs/exfs.toml)
    #[arg(long, global = true, env = "EXFS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the chunk index an interrupted upload resumes from
    Breakpoint {
        /// Final destination path of the upload
        dest: PathBuf,
    },
    /// Show the staged descriptor and progress of an upload
    Inspect {
        /// Final destination path of the upload
        dest: PathBuf,
    },
    /// Print the MD5 digest of a file
    Md5 {
        file: PathBuf,
        /// Fail unless the file has exactly this many bytes
        #[arg(long)]
        size: Option<u64>,
    },
    /// List a directory below the upload root as a JSON tree
    Ls {
        /// Path relative to the upload root
        #[arg(default_value = "")]
        path: String,
        #[arg(long, default_value_t = 1)]
        depth: u32,
        /// Owner whose space is listed
        #[arg(long)]
        owner: Option<String>,
        /// Include staging files
        #[arg(long)]
        all: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays machine readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    let output = rt.block_on(async {
        match cli.command {
            Command::Breakpoint { dest } => commands::breakpoint(&dest).await,
            Command::Inspect { dest } => commands::inspect(&dest).await,
            Command::Md5 { file, size } => commands::md5(&file, size).await,
            Command::Ls {
                path,
                depth,
                owner,
                all,
            } => {
                let ignores = if all { Vec::new() } else { config.ignores.clone() };
                commands::ls(
                    &config.engine.upload_root,
                    owner.as_deref(),
                    &path,
                    depth,
                    &ignores,
                )
            }
        }
    })?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
