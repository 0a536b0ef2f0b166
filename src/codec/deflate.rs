//! Raw deflate streams.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::bufread::DeflateDecoder;
use flate2::write::DeflateEncoder;

use super::check_size;

/// Inflates `input` into `output`, which must be the exact uncompressed size.
pub(crate) fn decompress(input: &[u8], output: &mut [u8]) -> io::Result<()> {
    let mut decoder = DeflateDecoder::new(input);
    let mut filled = 0;
    while filled < output.len() {
        match decoder.read(&mut output[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    check_size(filled, output.len())?;

    // Trailing output means the stream is longer than the entry claims.
    let mut probe = [0u8; 1];
    if decoder.read(&mut probe)? != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "deflate stream is longer than the uncompressed size",
        ));
    }
    Ok(())
}

/// Deflates `data` at the default level.
pub(crate) fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_roundtrip() {
        let data = b"Hello, World! Hello, World! Hello, World!";
        let packed = compress(data).unwrap();
        let mut out = vec![0u8; data.len()];
        decompress(&packed, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_deflate_output_too_large() {
        let packed = compress(b"short").unwrap();
        let mut out = vec![0u8; 10];
        assert!(decompress(&packed, &mut out).is_err());
    }

    #[test]
    fn test_deflate_output_too_small() {
        let packed = compress(b"a longer payload").unwrap();
        let mut out = vec![0u8; 4];
        assert!(decompress(&packed, &mut out).is_err());
    }

    #[test]
    fn test_deflate_garbage() {
        let mut out = vec![0u8; 16];
        assert!(decompress(&[0xFF; 16], &mut out).is_err());
    }
}
