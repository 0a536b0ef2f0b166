//! Error types for streaming pipeline operations.
//!
//! This module provides the [`Error`] enum which represents the failure modes
//! that surface at the crate boundary, along with a convenient [`Result<T>`]
//! type alias.
//!
//! # Request failures are not errors
//!
//! Requests flowing through the pipeline never produce an [`Error`]. A read
//! against a missing file, a corrupt archive entry or a canceled request all
//! end with a terminal [`RequestStatus`] on the request itself, and every other
//! in-flight request keeps going. [`Error`] is reserved for the surface of the
//! crate: building paths, validating configuration, codec helpers and the
//! lifecycle of the scheduling thread.
//!
//! ```rust,no_run
//! use stackio::{Error, RequestPath};
//!
//! fn parse(path: &str) -> stackio::Result<RequestPath> {
//!     match RequestPath::new(path) {
//!         Ok(path) => Ok(path),
//!         Err(Error::InvalidPath(reason)) => {
//!             eprintln!("bad path '{}': {}", path, reason);
//!             Err(Error::InvalidPath(reason))
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! # fn main() {}
//! ```
//!
//! [`RequestStatus`]: crate::request::RequestStatus

use std::io;

/// The main error type for stackio operations.
///
/// # Error Categories
///
/// | Category | Variants | Typical Cause |
/// |----------|----------|---------------|
/// | I/O | [`Io`][Self::Io] | Thread spawning, CLI file access |
/// | Input | [`InvalidPath`][Self::InvalidPath] | Empty or malformed request paths |
/// | Configuration | [`InvalidConfig`][Self::InvalidConfig] | Strict validation of stage tunables |
/// | Codec | [`DecompressionFailed`][Self::DecompressionFailed], [`ChecksumMismatch`][Self::ChecksumMismatch], [`UnsupportedCodec`][Self::UnsupportedCodec] | Codec helpers |
/// | Lifecycle | [`SchedulerStopped`][Self::SchedulerStopped], [`Timeout`][Self::Timeout], [`RequestAlreadyQueued`][Self::RequestAlreadyQueued] | Streamer facade |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred outside of the request pipeline.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A request path could not be constructed.
    #[error("Invalid request path: {0}")]
    InvalidPath(String),

    /// A configuration value was rejected by strict validation.
    ///
    /// Stages never fail to construct; they log the problem and substitute a
    /// safe default. This variant is only returned by the `validate()` methods
    /// on the configuration structs.
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        /// The name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A decompressor rejected its input.
    #[error("Decompression failed for '{archive}': {reason}")]
    DecompressionFailed {
        /// The archive the compressed data came from.
        archive: String,
        /// A description of the failure.
        reason: String,
    },

    /// A fully decompressed payload did not match its recorded checksum.
    #[error("CRC mismatch for '{path}': expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// The archive the entry was read from.
        path: String,
        /// The expected CRC-32.
        expected: u32,
        /// The CRC-32 of the decompressed data.
        actual: u32,
    },

    /// The requested codec was not compiled into this build.
    #[error("Unsupported codec: {0} (enable the matching cargo feature)")]
    UnsupportedCodec(&'static str),

    /// The scheduling thread is no longer running.
    #[error("The streamer's scheduling thread has stopped")]
    SchedulerStopped,

    /// Waiting for a request or a report took longer than allowed.
    #[error("Timed out waiting for the streamer")]
    Timeout,

    /// A request was handed to the streamer a second time.
    #[error("Request {0} has already been queued")]
    RequestAlreadyQueued(u64),
}

impl Error {
    /// Returns true if retrying the operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout)
    }

    /// Returns true if this error was caused by bad configuration input.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }

    /// Returns the path associated with this error, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::DecompressionFailed { archive, .. } => Some(archive),
            Self::ChecksumMismatch { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Creates an [`Error::InvalidConfig`].
    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::DecompressionFailed`].
    pub fn decompression_failed(archive: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DecompressionFailed {
            archive: archive.into(),
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for stackio operations.
///
/// # Example
///
/// ```rust
/// use stackio::Result;
///
/// fn my_function() -> Result<()> {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
