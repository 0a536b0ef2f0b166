//! Command implementations for the CLI tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use stackio::buffer::align_up;
use stackio::compression::ArchiveRegistry;
use stackio::storage::StorageDriveConfig;
use stackio::{
    OutputBuffer, ReportType, RequestPath, RequestStatus, StackBuilder, Streamer, StreamerConfig,
};

use crate::exit_codes::{ExitCode, error_to_exit_code};
use crate::output::{ReadSummary, format_read_summary, format_statistics};

const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables shared by every command.
pub struct StackOptions {
    pub channels: u32,
    pub sector_size: u64,
    pub stats: bool,
}

/// Configuration for the read command.
pub struct ReadConfig<'a> {
    pub file: &'a Path,
    pub chunks: u32,
    pub offset: u64,
    pub size: Option<u64>,
}

/// Read command implementation
pub fn read(config: &ReadConfig<'_>, options: &StackOptions) -> ExitCode {
    if config.chunks == 0 {
        eprintln!("Error: --chunks must be at least 1");
        return ExitCode::BadArgs;
    }

    let file = match std::fs::canonicalize(config.file) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error: cannot open '{}': {}", config.file.display(), e);
            return ExitCode::IoError;
        }
    };
    let root = file.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/"));
    let Some(name) = file.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        eprintln!("Error: '{}' is not a file", file.display());
        return ExitCode::BadArgs;
    };

    let streamer = match open_streamer(&root, options, false) {
        Ok(streamer) => streamer,
        Err(code) => return code,
    };
    let path = match RequestPath::from_root(&root, &name) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            return error_to_exit_code(&e);
        }
    };

    let size = match config.size {
        Some(size) => size,
        None => match streamer.file_size(path.clone()) {
            Ok(Some(file_size)) => file_size.saturating_sub(config.offset),
            Ok(None) => {
                eprintln!("Error: '{}' was not found", file.display());
                return ExitCode::IoError;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return error_to_exit_code(&e);
            }
        },
    };

    let started = Instant::now();
    let chunk_size = align_up(size.div_ceil(config.chunks as u64).max(1), options.sector_size);
    let mut requests = Vec::new();
    let mut start = config.offset;
    let end = config.offset + size;
    while start < end {
        let length = chunk_size.min(end - start);
        let output = OutputBuffer::new(length as usize);
        let request = streamer.create_read(path.clone(), output.clone(), start, length);
        requests.push((request, output));
        start += length;
    }
    log::debug!("Reading {} bytes in {} chunks of {}", size, requests.len(), chunk_size);

    let batch: Vec<_> = requests.iter().map(|(request, _)| request.clone()).collect();
    if let Err(e) = streamer.queue_request_batch(&batch) {
        eprintln!("Error: {}", e);
        return error_to_exit_code(&e);
    }

    let mut status = RequestStatus::Completed;
    let mut hasher = crc32fast::Hasher::new();
    for (request, output) in &requests {
        match request.wait(Some(WAIT_TIMEOUT)) {
            Ok(RequestStatus::Completed) => hasher.update(&output.lock()),
            Ok(other) => status = other,
            Err(e) => {
                eprintln!("Error: {}", e);
                return error_to_exit_code(&e);
            }
        }
    }

    print!(
        "{}",
        format_read_summary(&ReadSummary {
            status,
            bytes: size,
            chunks: requests.len(),
            crc32: hasher.finalize(),
            elapsed: started.elapsed(),
        })
    );
    print_statistics(&streamer, options);

    if status == RequestStatus::Completed {
        ExitCode::Success
    } else {
        ExitCode::RequestFailed
    }
}

/// Report command implementation
pub fn report(root: Option<&Path>, options: &StackOptions) -> ExitCode {
    let root = root.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let root = match std::fs::canonicalize(&root) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("Error: cannot open '{}': {}", root.display(), e);
            return ExitCode::IoError;
        }
    };

    let streamer = match open_streamer(&root, options, true) {
        Ok(streamer) => streamer,
        Err(code) => return code,
    };
    match streamer.report(ReportType::Config) {
        Ok(records) => print!("{}", format_statistics("Configuration", &records)),
        Err(e) => {
            eprintln!("Error: {}", e);
            return error_to_exit_code(&e);
        }
    }
    print_statistics(&streamer, options);
    ExitCode::Success
}

fn open_streamer(root: &Path, options: &StackOptions, archives: bool) -> Result<Streamer, ExitCode> {
    let drive = StorageDriveConfig::new()
        .drive_path(root)
        .io_channels(options.channels)
        .sector_sizes(options.sector_size.max(4096), options.sector_size);
    if let Err(e) = drive.validate() {
        eprintln!("Error: {}", e);
        return Err(error_to_exit_code(&e));
    }

    let mut builder = StackBuilder::new();
    if archives {
        builder = builder.archives(Arc::new(ArchiveRegistry::new()));
    }
    let stack = builder.drive(drive).build().map_err(|e| {
        eprintln!("Error: {}", e);
        error_to_exit_code(&e)
    })?;
    Streamer::new(stack, StreamerConfig::default()).map_err(|e| {
        eprintln!("Error: {}", e);
        error_to_exit_code(&e)
    })
}

fn print_statistics(streamer: &Streamer, options: &StackOptions) {
    if !options.stats {
        return;
    }
    match streamer.collect_statistics() {
        Ok(statistics) => print!("\n{}", format_statistics("Statistics", &statistics)),
        Err(e) => eprintln!("Warning: statistics unavailable: {}", e),
    }
}
