//! Assembly of the standard stack.

use std::sync::Arc;

use crate::compression::CompressionLookup;
use crate::decompressor::{ArchiveDecompressor, DecompressorConfig};
use crate::stack::{self, StreamStackEntry};
use crate::storage::{StorageDrive, StorageDriveConfig};
use crate::{Error, Result};

/// Builds a stack: custom stages on top, then an optional archive
/// decompressor, then the storage drives in the order they were added.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use stackio::compression::ArchiveRegistry;
/// use stackio::storage::StorageDriveConfig;
/// use stackio::{stack, StackBuilder};
///
/// let registry = Arc::new(ArchiveRegistry::new());
/// let top = StackBuilder::new()
///     .archives(registry)
///     .drive(StorageDriveConfig::ssd().drive_path("/game"))
///     .drive(StorageDriveConfig::hdd().drive_path("/archive"))
///     .build()
///     .unwrap();
/// assert_eq!(stack::stage_names(top.as_ref()).len(), 3);
/// ```
#[derive(Default)]
pub struct StackBuilder {
    stages: Vec<Box<dyn StreamStackEntry>>,
    archives: Option<(Option<DecompressorConfig>, Arc<dyn CompressionLookup>)>,
    drives: Vec<StorageDriveConfig>,
}

impl StackBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a custom stage above the decompressor and the drives.
    pub fn stage(mut self, stage: Box<dyn StreamStackEntry>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Adds a decompressor whose read alignment follows the first drive's
    /// physical sector size.
    pub fn archives(mut self, lookup: Arc<dyn CompressionLookup>) -> Self {
        self.archives = Some((None, lookup));
        self
    }

    /// Adds a decompressor with an explicit configuration.
    pub fn decompressor(mut self, config: DecompressorConfig, lookup: Arc<dyn CompressionLookup>) -> Self {
        self.archives = Some((Some(config), lookup));
        self
    }

    /// Adds a storage drive below the previously added ones.
    pub fn drive(mut self, config: StorageDriveConfig) -> Self {
        self.drives.push(config);
        self
    }

    /// Links the stages and returns the top of the stack.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if no stage was added.
    pub fn build(self) -> Result<Box<dyn StreamStackEntry>> {
        let mut stages = self.stages;
        if let Some((config, lookup)) = self.archives {
            let config = config.unwrap_or_else(|| {
                let alignment = self
                    .drives
                    .first()
                    .map_or(DecompressorConfig::default().alignment, |drive| {
                        drive.physical_sector_size
                    });
                DecompressorConfig::new().alignment(alignment)
            });
            stages.push(Box::new(ArchiveDecompressor::new(config, lookup)));
        }
        for drive in self.drives {
            stages.push(Box::new(StorageDrive::new(drive)));
        }
        stack::link(stages).ok_or_else(|| Error::invalid_config("stages", "a stack needs at least one stage"))
    }
}

impl std::fmt::Debug for StackBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackBuilder")
            .field("stages", &self.stages.len())
            .field("archives", &self.archives.is_some())
            .field("drives", &self.drives)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::ArchiveRegistry;

    #[test]
    fn test_empty_builder_fails() {
        assert!(StackBuilder::new().build().is_err());
    }

    #[test]
    fn test_order_and_next_links() {
        let dir = tempfile::tempdir().unwrap();
        let top = StackBuilder::new()
            .archives(Arc::new(ArchiveRegistry::new()))
            .drive(StorageDriveConfig::new().drive_path(dir.path()))
            .build()
            .unwrap();
        let names = stack::stage_names(top.as_ref());
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], "Archive decompressor");
        assert!(names[1].starts_with("Storage drive ("));
    }
}
