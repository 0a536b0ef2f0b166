//! Work done on the decompression threads.

use std::time::Instant;

use crate::buffer::OutputBuffer;
use crate::compression::CompressionInfo;

/// Decompresses a whole entry straight into `output`.
///
/// `output` must be exactly `uncompressed_size` bytes long. When the entry
/// carries a CRC-32 it is checked against the decompressed bytes.
pub fn full_decompression(info: &CompressionInfo, compressed: &[u8], output: &mut [u8]) -> bool {
    if output.len() as u64 != info.uncompressed_size {
        log::debug!(
            "Output of {} bytes cannot hold entry of {} bytes from '{}'",
            output.len(),
            info.uncompressed_size,
            info.archive_filename
        );
        return false;
    }
    (info.decompressor)(info, compressed, output) && verify_crc(info, output)
}

/// Decompresses a whole entry into scratch memory and copies
/// `[read_offset, read_offset + output.len())` of it into `output`.
///
/// Nothing is written to `output` unless decompression succeeded.
pub fn partial_decompression(
    info: &CompressionInfo,
    compressed: &[u8],
    read_offset: u64,
    output: &mut [u8],
) -> bool {
    let end = read_offset.checked_add(output.len() as u64);
    if end.is_none_or(|end| end > info.uncompressed_size) {
        log::debug!(
            "Range {}+{} lies outside entry of {} bytes in '{}'",
            read_offset,
            output.len(),
            info.uncompressed_size,
            info.archive_filename
        );
        return false;
    }
    let mut scratch = vec![0u8; info.uncompressed_size as usize];
    if !full_decompression(info, compressed, &mut scratch) {
        return false;
    }
    let start = read_offset as usize;
    output.copy_from_slice(&scratch[start..start + output.len()]);
    true
}

fn verify_crc(info: &CompressionInfo, data: &[u8]) -> bool {
    let Some(expected) = info.expected_crc32 else {
        return true;
    };
    let actual = crc32fast::hash(data);
    if actual != expected {
        let error = crate::Error::ChecksumMismatch {
            path: info.archive_filename.to_string(),
            expected,
            actual,
        };
        log::warn!("{}", error);
        return false;
    }
    true
}

/// Everything a decompression job needs, moved onto the job's thread.
pub(crate) struct Job {
    pub task: usize,
    pub info: CompressionInfo,
    pub compressed: OutputBuffer,
    pub offset_adjustment: u64,
    pub output: OutputBuffer,
    pub read_offset: u64,
    pub read_size: u64,
}

/// Result of a job, sent back to the scheduling thread.
#[derive(Debug)]
pub(crate) struct JobOutcome {
    pub task: usize,
    pub success: bool,
    pub started: Instant,
    pub finished: Instant,
}

impl Job {
    pub(crate) fn run(self) -> JobOutcome {
        let started = Instant::now();
        let success = self.decompress();
        JobOutcome {
            task: self.task,
            success,
            started,
            finished: Instant::now(),
        }
    }

    fn decompress(&self) -> bool {
        let compressed = self.compressed.lock();
        let start = self.offset_adjustment as usize;
        let Some(input) = compressed.get(start..start + self.info.compressed_size as usize) else {
            log::debug!("Compressed buffer from '{}' is too short", self.info.archive_filename);
            return false;
        };

        let mut output = self.output.lock();
        let Some(target) = output.get_mut(..self.read_size as usize) else {
            log::debug!(
                "Output of {} bytes cannot hold {} bytes from '{}'",
                output.len(),
                self.read_size,
                self.info.archive_filename
            );
            return false;
        };
        if self.read_offset == 0 && self.read_size == self.info.uncompressed_size {
            full_decompression(&self.info, input, target)
        } else {
            partial_decompression(&self.info, input, self.read_offset, target)
        }
    }
}
