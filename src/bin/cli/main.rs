//! CLI tool for reading files through a stackio pipeline.

mod commands;
mod exit_codes;
mod output;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Streams files through a stackio pipeline
#[derive(Parser)]
#[command(name = "stackio")]
#[command(author, version, about = "Streams files through a stackio pipeline", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Number of concurrent I/O channels of the storage drive
    #[arg(long, default_value = "4", global = true, env = "STACKIO_CHANNELS")]
    channels: u32,

    /// Logical sector size in bytes
    #[arg(long, default_value = "512", global = true, env = "STACKIO_SECTOR_SIZE")]
    sector_size: u64,

    /// Print pipeline statistics before exiting
    #[arg(long, global = true)]
    stats: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a file and print its size and CRC-32 (alias: r)
    #[command(alias = "r")]
    Read {
        /// File to read
        file: PathBuf,

        /// Split the read into this many concurrent requests
        #[arg(short = 'c', long, default_value = "1")]
        chunks: u32,

        /// Byte offset to start reading at
        #[arg(short = 'o', long, default_value = "0")]
        offset: u64,

        /// Number of bytes to read (default: to the end of the file)
        #[arg(short = 's', long)]
        size: Option<u64>,
    },

    /// Print the configuration of the standard stack
    Report {
        /// Directory served by the storage drive (default: current directory)
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_codes::SUCCESS,
                _ => exit_codes::BAD_ARGS,
            };
            std::process::exit(code);
        }
    };

    let options = commands::StackOptions {
        channels: cli.channels,
        sector_size: cli.sector_size,
        stats: cli.stats,
    };

    let exit_code = match cli.command {
        Commands::Read {
            file,
            chunks,
            offset,
            size,
        } => commands::read(
            &commands::ReadConfig {
                file: &file,
                chunks,
                offset,
                size,
            },
            &options,
        ),

        Commands::Report { root } => commands::report(root.as_deref(), &options),
    };

    std::process::exit(exit_code.code());
}
