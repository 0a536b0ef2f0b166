//! Decompression callbacks for archived files.
//!
//! Every [`CompressionInfo`] carries a [`DecompressFn`]: the function the
//! decompressor stage calls on a decompression thread to turn the compressed
//! bytes of an archive entry into its uncompressed payload. The callback fills
//! the whole output slice or reports failure by returning `false`; a failed
//! callback surfaces as a `Failed` request, never as a panic.
//!
//! Built-in callbacks are available per cargo feature:
//!
//! | Method | Function | Feature |
//! |--------|----------|---------|
//! | Store (no compression) | [`store()`] | always |
//! | Raw deflate | [`deflate()`] | `deflate` |
//! | LZ4 block | [`lz4_block()`] | `lz4` |
//! | Zstandard | [`zstd()`] | `zstd` |
//!
//! [`CompressionInfo`]: crate::compression::CompressionInfo

mod copy;

#[cfg(feature = "deflate")]
pub mod deflate;

#[cfg(feature = "lz4")]
pub mod lz4;

#[cfg(feature = "zstd")]
pub mod zstd;

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use crate::compression::CompressionInfo;
use crate::{Error, Result};

/// Callback that decompresses `input` into exactly `output.len()` bytes.
///
/// Returns `false` if the data is corrupt or has the wrong size.
pub type DecompressFn = Arc<dyn Fn(&CompressionInfo, &[u8], &mut [u8]) -> bool + Send + Sync>;

/// Wraps a fallible decoding function into a [`DecompressFn`] that logs failures.
fn wrap<F>(method: Method, decode: F) -> DecompressFn
where
    F: Fn(&[u8], &mut [u8]) -> io::Result<()> + Send + Sync + 'static,
{
    Arc::new(move |info: &CompressionInfo, input: &[u8], output: &mut [u8]| {
        match decode(input, output) {
            Ok(()) => true,
            Err(e) => {
                log::debug!(
                    "{} decompression of entry in '{}' failed: {}",
                    method,
                    info.archive_filename,
                    e
                );
                false
            }
        }
    })
}

/// Returns a callback that copies stored data unchanged.
pub fn store() -> DecompressFn {
    wrap(Method::Store, copy::decompress)
}

/// Returns a callback for raw deflate streams.
#[cfg(feature = "deflate")]
pub fn deflate() -> DecompressFn {
    wrap(Method::Deflate, deflate::decompress)
}

/// Returns a callback for LZ4 block data.
#[cfg(feature = "lz4")]
pub fn lz4_block() -> DecompressFn {
    wrap(Method::Lz4, lz4::decompress)
}

/// Returns a callback for Zstandard frames.
#[cfg(feature = "zstd")]
pub fn zstd() -> DecompressFn {
    wrap(Method::Zstd, self::zstd::decompress)
}

/// Compresses `data` as a raw deflate stream.
#[cfg(feature = "deflate")]
pub fn deflate_compress(data: &[u8]) -> Result<Vec<u8>> {
    Ok(deflate::compress(data)?)
}

/// Compresses `data` as a single LZ4 block.
#[cfg(feature = "lz4")]
pub fn lz4_compress(data: &[u8]) -> Vec<u8> {
    lz4::compress(data)
}

/// Compression methods with a built-in callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// No compression.
    Store,
    /// Raw deflate.
    Deflate,
    /// LZ4 block format.
    Lz4,
    /// Zstandard.
    Zstd,
}

impl Method {
    /// Returns the canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Deflate => "deflate",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Returns true if this build includes the method.
    pub fn is_available(self) -> bool {
        match self {
            Self::Store => true,
            Self::Deflate => cfg!(feature = "deflate"),
            Self::Lz4 => cfg!(feature = "lz4"),
            Self::Zstd => cfg!(feature = "zstd"),
        }
    }

    /// Returns the decompression callback for this method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedCodec`] if the matching feature is disabled.
    pub fn decompressor(self) -> Result<DecompressFn> {
        match self {
            Self::Store => Ok(store()),
            #[cfg(feature = "deflate")]
            Self::Deflate => Ok(deflate()),
            #[cfg(feature = "lz4")]
            Self::Lz4 => Ok(lz4_block()),
            #[cfg(feature = "zstd")]
            Self::Zstd => Ok(zstd()),
            #[allow(unreachable_patterns)]
            other => Err(Error::UnsupportedCodec(other.name())),
        }
    }

    /// Compresses `data` with this method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedCodec`] if the matching feature is disabled.
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Store => Ok(data.to_vec()),
            #[cfg(feature = "deflate")]
            Self::Deflate => deflate_compress(data),
            #[cfg(feature = "lz4")]
            Self::Lz4 => Ok(lz4_compress(data)),
            #[cfg(feature = "zstd")]
            Self::Zstd => Ok(self::zstd::compress(data)?),
            #[allow(unreachable_patterns)]
            other => Err(Error::UnsupportedCodec(other.name())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "store" | "copy" => Ok(Self::Store),
            "deflate" => Ok(Self::Deflate),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            _ => Err(Error::UnsupportedCodec("unknown")),
        }
    }
}

/// Fails with `InvalidData` unless `actual == expected`.
pub(crate) fn check_size(actual: usize, expected: usize) -> io::Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("decoded {} bytes, expected {}", actual, expected),
        ))
    }
}
