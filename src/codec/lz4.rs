//! LZ4 block format.
//!
//! Archive entries store a bare LZ4 block; the uncompressed size comes from the
//! archive's table of contents rather than a size prefix.

use std::io;

use super::check_size;

/// Decodes one LZ4 block into `output`.
pub(crate) fn decompress(input: &[u8], output: &mut [u8]) -> io::Result<()> {
    let written = lz4_flex::block::decompress_into(input, output)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    check_size(written, output.len())
}

/// Encodes `data` as one LZ4 block.
pub(crate) fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_roundtrip() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 17) as u8).collect();
        let packed = compress(&data);
        assert!(packed.len() < data.len());
        let mut out = vec![0u8; data.len()];
        decompress(&packed, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_lz4_short_output() {
        let packed = compress(b"0123456789abcdef");
        let mut out = vec![0u8; 20];
        assert!(decompress(&packed, &mut out).is_err());
    }
}
