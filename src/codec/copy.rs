//! Stored entries (no compression).

use std::io;

use super::check_size;

/// Copies `input` into `output`; both must have the same length.
pub(crate) fn decompress(input: &[u8], output: &mut [u8]) -> io::Result<()> {
    check_size(input.len(), output.len())?;
    output.copy_from_slice(input);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_exact() {
        let mut out = [0u8; 5];
        decompress(b"Hello", &mut out).unwrap();
        assert_eq!(&out, b"Hello");
    }

    #[test]
    fn test_copy_empty() {
        let mut out = [0u8; 0];
        decompress(&[], &mut out).unwrap();
    }

    #[test]
    fn test_copy_length_mismatch() {
        let mut out = [0u8; 2];
        let err = decompress(b"Hello", &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
