//! Zstandard frames.

use std::io;

use super::check_size;

/// Compression level used by [`compress`].
const DEFAULT_LEVEL: i32 = 3;

/// Decodes a Zstandard frame into `output`.
pub(crate) fn decompress(input: &[u8], output: &mut [u8]) -> io::Result<()> {
    let expected = output.len();
    let written = ::zstd::bulk::decompress_to_buffer(input, output)?;
    check_size(written, expected)
}

/// Encodes `data` as a single Zstandard frame.
pub(crate) fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    ::zstd::bulk::compress(data, DEFAULT_LEVEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_roundtrip() {
        let data = b"zstd zstd zstd zstd zstd zstd".repeat(10);
        let packed = compress(&data).unwrap();
        let mut out = vec![0u8; data.len()];
        decompress(&packed, &mut out).unwrap();
        assert_eq!(out, data);
    }
}
