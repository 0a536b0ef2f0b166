//! Mapping of logical files onto entries inside archives.
//!
//! The decompressor stage asks a [`CompressionLookup`] whether a requested path
//! lives inside an archive. [`ArchiveRegistry`] is the standard lookup: an
//! explicit registry that is created at startup and handed to the stage, so
//! tests can build and reset their own instance.
//!
//! # Example
//!
//! ```rust
//! use stackio::compression::{ArchiveRegistry, CompressionInfo, CompressionLookup, ConflictResolution};
//! use stackio::RequestPath;
//!
//! let registry = ArchiveRegistry::new();
//! let archive = RequestPath::from_root("/game", "level.pak").unwrap();
//! let file = RequestPath::from_root("/game", "textures/wall.dds").unwrap();
//!
//! registry.register(
//!     file.clone(),
//!     CompressionInfo::stored(archive, 4096, 1024)
//!         .with_conflict_resolution(ConflictResolution::PreferFile),
//! );
//! assert_eq!(registry.find(&file).map(|info| info.uncompressed_size), Some(1024));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::RequestPath;
use crate::codec::{self, DecompressFn};

/// Which copy wins when a path exists both inside an archive and on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConflictResolution {
    /// Use the loose file if it exists, otherwise the archived copy.
    PreferFile,
    /// Use the archived copy; loose files are ignored.
    #[default]
    PreferArchive,
    /// Only the archived copy is considered.
    UseArchiveOnly,
}

/// Describes where a logical file lives inside an archive and how to decode it.
#[derive(Clone)]
pub struct CompressionInfo {
    /// The archive containing the entry.
    pub archive_filename: RequestPath,
    /// Byte offset of the entry's data inside the archive.
    pub offset: u64,
    /// Size of the entry's data inside the archive.
    pub compressed_size: u64,
    /// Size of the entry once decompressed.
    pub uncompressed_size: u64,
    /// Callback that decodes the entry.
    pub decompressor: DecompressFn,
    /// Policy when a loose file with the same path exists.
    pub conflict_resolution: ConflictResolution,
    /// False if the entry is stored without compression.
    pub is_compressed: bool,
    /// True if the archive may be read by other processes at the same time.
    pub is_shared_pak: bool,
    /// CRC-32 of the uncompressed payload, checked after full decompression.
    pub expected_crc32: Option<u32>,
}

impl CompressionInfo {
    /// Describes an entry stored without compression.
    pub fn stored(archive_filename: RequestPath, offset: u64, size: u64) -> Self {
        Self {
            archive_filename,
            offset,
            compressed_size: size,
            uncompressed_size: size,
            decompressor: codec::store(),
            conflict_resolution: ConflictResolution::default(),
            is_compressed: false,
            is_shared_pak: false,
            expected_crc32: None,
        }
    }

    /// Describes a compressed entry.
    pub fn compressed(
        archive_filename: RequestPath,
        offset: u64,
        compressed_size: u64,
        uncompressed_size: u64,
        decompressor: DecompressFn,
    ) -> Self {
        Self {
            archive_filename,
            offset,
            compressed_size,
            uncompressed_size,
            decompressor,
            conflict_resolution: ConflictResolution::default(),
            is_compressed: true,
            is_shared_pak: false,
            expected_crc32: None,
        }
    }

    /// Sets the conflict resolution policy.
    pub fn with_conflict_resolution(mut self, policy: ConflictResolution) -> Self {
        self.conflict_resolution = policy;
        self
    }

    /// Sets the CRC-32 of the uncompressed payload.
    pub fn with_crc32(mut self, crc: u32) -> Self {
        self.expected_crc32 = Some(crc);
        self
    }

    /// Marks the archive as shared with other readers.
    pub fn shared_pak(mut self, shared: bool) -> Self {
        self.is_shared_pak = shared;
        self
    }
}

impl fmt::Debug for CompressionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionInfo")
            .field("archive_filename", &self.archive_filename)
            .field("offset", &self.offset)
            .field("compressed_size", &self.compressed_size)
            .field("uncompressed_size", &self.uncompressed_size)
            .field("conflict_resolution", &self.conflict_resolution)
            .field("is_compressed", &self.is_compressed)
            .field("is_shared_pak", &self.is_shared_pak)
            .field("expected_crc32", &self.expected_crc32)
            .finish_non_exhaustive()
    }
}

/// Answers whether a path is stored inside an archive.
pub trait CompressionLookup: Send + Sync {
    /// Returns the archive entry for `path`, if there is one.
    fn find(&self, path: &RequestPath) -> Option<CompressionInfo>;
}

/// Thread-safe table of archived files.
#[derive(Debug, Default)]
pub struct ArchiveRegistry {
    entries: RwLock<HashMap<RequestPath, CompressionInfo>>,
}

impl ArchiveRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<RequestPath, CompressionInfo>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            log::warn!("ArchiveRegistry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<RequestPath, CompressionInfo>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            log::warn!("ArchiveRegistry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Registers `path` as an archive entry, returning the entry it replaced.
    pub fn register(&self, path: RequestPath, info: CompressionInfo) -> Option<CompressionInfo> {
        log::trace!(
            "Registering '{}' in archive '{}' at offset {}",
            path,
            info.archive_filename,
            info.offset
        );
        self.write().insert(path, info)
    }

    /// Removes `path` from the registry.
    pub fn unregister(&self, path: &RequestPath) -> Option<CompressionInfo> {
        self.write().remove(path)
    }

    /// Removes every entry stored in `archive`. Returns how many were removed.
    pub fn unregister_archive(&self, archive: &RequestPath) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, info| &info.archive_filename != archive);
        before - entries.len()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Returns the number of registered entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns true if `path` is registered.
    pub fn contains(&self, path: &RequestPath) -> bool {
        self.read().contains_key(path)
    }
}

impl CompressionLookup for ArchiveRegistry {
    fn find(&self, path: &RequestPath) -> Option<CompressionInfo> {
        self.read().get(path).cloned()
    }
}
