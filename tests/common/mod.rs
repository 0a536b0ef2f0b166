//! Shared test utilities for integration tests.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stackio::compression::{ArchiveRegistry, CompressionInfo};
use stackio::decompressor::{ArchiveDecompressor, DecompressorConfig};
use stackio::scheduler::{Scheduler, SchedulerConfig};
use stackio::stack::{self, StreamStackEntry};
use stackio::storage::{StorageDrive, StorageDriveConfig};
use stackio::{RequestPath, codec};

/// Generous upper bound for a pipeline to drain in tests.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Returns `len` pseudo-random bytes, reproducible from `seed`.
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.r#gen::<u8>()).collect()
}

/// Returns compressible pseudo-random text, reproducible from `seed`.
pub fn compressible_bytes(len: usize, seed: u64) -> Vec<u8> {
    const WORDS: &[&[u8]] = &[b"stream ", b"archive ", b"sector ", b"request ", b"slot "];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(len + 16);
    while data.len() < len {
        data.extend_from_slice(WORDS[rng.gen_range(0..WORDS.len())]);
    }
    data.truncate(len);
    data
}

/// Writes `data` under `dir` and returns the request path for it.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> RequestPath {
    let full = dir.join(name);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create directory");
    }
    std::fs::write(&full, data).expect("Failed to write test file");
    RequestPath::from_root(dir, name).expect("Failed to build request path")
}

/// Builds a file of `chunks * chunk_size` bytes where every chunk starts and
/// ends with its own marker byte.
pub fn chunk_marked_bytes(chunks: usize, chunk_size: usize) -> Vec<u8> {
    let mut data = vec![0u8; chunks * chunk_size];
    for (index, chunk) in data.chunks_mut(chunk_size).enumerate() {
        chunk.fill(0x11);
        chunk[0] = start_marker(index);
        chunk[chunk_size - 1] = end_marker(index);
    }
    data
}

/// Marker at the start of chunk `index`.
pub fn start_marker(index: usize) -> u8 {
    (index as u8).wrapping_mul(2).wrapping_add(0x20)
}

/// Marker at the end of chunk `index`.
pub fn end_marker(index: usize) -> u8 {
    (index as u8).wrapping_mul(2).wrapping_add(0x21)
}

/// One file inside a test archive.
pub struct PakEntry<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    pub method: PakMethod,
}

/// How an entry is stored in a test archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PakMethod {
    Stored,
    Deflate,
    Lz4,
}

/// Writes an archive to `dir/archive_name` and registers every entry as a
/// file under `dir`. Entries start at unaligned offsets after a 100 byte
/// header, so archive reads exercise the alignment adjustment.
pub fn write_pak(
    dir: &Path,
    archive_name: &str,
    entries: &[PakEntry<'_>],
    registry: &ArchiveRegistry,
) -> RequestPath {
    let archive = RequestPath::from_root(dir, archive_name).expect("Failed to build archive path");
    let mut bytes = vec![0xEEu8; 100];
    for entry in entries {
        let packed = match entry.method {
            PakMethod::Stored => entry.data.to_vec(),
            PakMethod::Deflate => {
                let mut encoder =
                    flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(entry.data).expect("Failed to deflate");
                encoder.finish().expect("Failed to finish deflate stream")
            }
            PakMethod::Lz4 => lz4_flex::block::compress(entry.data),
        };
        let offset = bytes.len() as u64;
        let info = match entry.method {
            PakMethod::Stored => CompressionInfo::stored(archive.clone(), offset, packed.len() as u64),
            PakMethod::Deflate => CompressionInfo::compressed(
                archive.clone(),
                offset,
                packed.len() as u64,
                entry.data.len() as u64,
                codec::deflate(),
            ),
            PakMethod::Lz4 => CompressionInfo::compressed(
                archive.clone(),
                offset,
                packed.len() as u64,
                entry.data.len() as u64,
                codec::lz4_block(),
            ),
        };
        let path = RequestPath::from_root(dir, entry.name).expect("Failed to build entry path");
        registry.register(path, info.with_crc32(crc32fast::hash(entry.data)));
        bytes.extend_from_slice(&packed);
        // Odd padding keeps the next entry unaligned.
        bytes.extend_from_slice(&[0xEE; 37]);
    }
    std::fs::write(dir.join(archive_name), &bytes).expect("Failed to write archive");
    archive
}

/// Storage drive configuration for a temporary directory.
pub fn drive_config(root: &Path) -> StorageDriveConfig {
    StorageDriveConfig::new()
        .drive_path(root)
        .io_channels(2)
        .overcommit(1)
}

/// Decompressor on top of a single storage drive.
pub fn archive_stack(root: &Path, registry: Arc<ArchiveRegistry>) -> Box<dyn StreamStackEntry> {
    let decompressor = ArchiveDecompressor::new(DecompressorConfig::new().alignment(512), registry);
    stack::link(vec![
        Box::new(decompressor),
        Box::new(StorageDrive::new(drive_config(root))),
    ])
    .expect("Stack must not be empty")
}

/// A scheduler over `stack` with a short idle timeout.
pub fn scheduler(stack: Box<dyn StreamStackEntry>) -> Scheduler {
    Scheduler::new(stack, SchedulerConfig::new().idle_timeout(Duration::from_millis(5)))
}
