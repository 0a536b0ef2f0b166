//! Configuration for [`StorageDrive`](super::StorageDrive).

use std::path::PathBuf;

use crate::{Error, Result};

/// Behavioural switches of a storage drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveOptions {
    /// The device pays a penalty for non-sequential reads (spinning disks).
    /// Default: true.
    pub has_seek_penalty: bool,

    /// Read with sector-aligned offsets and sizes.
    /// Default: true.
    pub enable_unbuffered_reads: bool,

    /// Let other readers open files this drive holds open.
    /// Default: false.
    pub enable_sharing: bool,

    /// Only log problems, not lifecycle information.
    /// Default: false.
    pub minimal_reporting: bool,
}

impl Default for DriveOptions {
    fn default() -> Self {
        Self {
            has_seek_penalty: true,
            enable_unbuffered_reads: true,
            enable_sharing: false,
            minimal_reporting: false,
        }
    }
}

/// Construction parameters of a storage drive.
///
/// # Example
///
/// ```rust
/// use stackio::storage::StorageDriveConfig;
///
/// let config = StorageDriveConfig::ssd()
///     .drive_path("/mnt/data")
///     .io_channels(4)
///     .overcommit(-1);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct StorageDriveConfig {
    /// Roots of the paths this drive serves.
    pub drive_paths: Vec<PathBuf>,

    /// Number of file handles kept open.
    /// Default: 32.
    pub max_file_handles: u32,

    /// Number of cached file sizes.
    /// Default: 64.
    pub max_metadata_entries: u32,

    /// Alignment of memory for direct reads, in bytes.
    /// Default: 4 KiB.
    pub physical_sector_size: u64,

    /// Alignment of file offsets and sizes, in bytes.
    /// Default: 512.
    pub logical_sector_size: u64,

    /// Number of reads the device serves concurrently.
    /// Default: 4.
    pub io_channels: u32,

    /// Extra requests accepted beyond `io_channels`. Negative values throttle.
    /// Default: 2.
    pub overcommit: i32,

    /// Behavioural switches.
    pub options: DriveOptions,
}

impl Default for StorageDriveConfig {
    fn default() -> Self {
        Self {
            drive_paths: Vec::new(),
            max_file_handles: 32,
            max_metadata_entries: 64,
            physical_sector_size: 4 * 1024,
            logical_sector_size: 512,
            io_channels: 4,
            overcommit: 2,
            options: DriveOptions::default(),
        }
    }
}

impl StorageDriveConfig {
    /// Creates a configuration with default values and no drive paths.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tuned for solid state drives: parallel channels, no seek penalty.
    pub fn ssd() -> Self {
        Self {
            io_channels: 8,
            overcommit: 4,
            options: DriveOptions {
                has_seek_penalty: false,
                ..DriveOptions::default()
            },
            ..Self::default()
        }
    }

    /// Tuned for spinning disks: one channel, sequential reads favoured.
    pub fn hdd() -> Self {
        Self {
            io_channels: 1,
            overcommit: 1,
            physical_sector_size: 4 * 1024,
            logical_sector_size: 4 * 1024,
            ..Self::default()
        }
    }

    /// Adds a root this drive serves.
    pub fn drive_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.drive_paths.push(path.into());
        self
    }

    /// Sets the number of cached file handles.
    pub fn max_file_handles(mut self, count: u32) -> Self {
        self.max_file_handles = count;
        self
    }

    /// Sets the number of cached file sizes.
    pub fn max_metadata_entries(mut self, count: u32) -> Self {
        self.max_metadata_entries = count;
        self
    }

    /// Sets the physical and logical sector sizes.
    pub fn sector_sizes(mut self, physical: u64, logical: u64) -> Self {
        self.physical_sector_size = physical;
        self.logical_sector_size = logical;
        self
    }

    /// Sets the number of concurrent reads.
    pub fn io_channels(mut self, count: u32) -> Self {
        self.io_channels = count;
        self
    }

    /// Sets the overcommit adjustment.
    pub fn overcommit(mut self, overcommit: i32) -> Self {
        self.overcommit = overcommit;
        self
    }

    /// Sets the behavioural switches.
    pub fn options(mut self, options: DriveOptions) -> Self {
        self.options = options;
        self
    }

    /// Checks every value strictly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.drive_paths.is_empty() {
            return Err(Error::invalid_config("drive_paths", "at least one drive path is required"));
        }
        if self.max_file_handles == 0 {
            return Err(Error::invalid_config("max_file_handles", "must be at least 1"));
        }
        if self.max_metadata_entries == 0 {
            return Err(Error::invalid_config("max_metadata_entries", "must be at least 1"));
        }
        for (field, size) in [
            ("physical_sector_size", self.physical_sector_size),
            ("logical_sector_size", self.logical_sector_size),
        ] {
            if !size.is_power_of_two() {
                return Err(Error::invalid_config(
                    field,
                    format!("{} is not a non-zero power of two", size),
                ));
            }
        }
        if self.io_channels == 0 {
            return Err(Error::invalid_config("io_channels", "must be at least 1"));
        }
        if self.io_channels as i64 + self.overcommit as i64 <= 0 {
            return Err(Error::invalid_config(
                "overcommit",
                format!(
                    "{} leaves no slots with {} io channels",
                    self.overcommit, self.io_channels
                ),
            ));
        }
        Ok(())
    }

    /// Returns a copy with unusable values replaced by safe defaults.
    ///
    /// Every correction is logged against `name`.
    pub(crate) fn corrected(&self, name: &str) -> Self {
        let mut config = self.clone();
        if config.physical_sector_size == 0 {
            config.physical_sector_size = 16 * 1024;
            log::error!(
                "Received physical sector size of 0 for {}. Picking a sector size of {} instead.",
                name,
                config.physical_sector_size
            );
        }
        if config.logical_sector_size == 0 {
            config.logical_sector_size = 4 * 1024;
            log::error!(
                "Received logical sector size of 0 for {}. Picking a sector size of {} instead.",
                name,
                config.logical_sector_size
            );
        }
        for size in [&mut config.physical_sector_size, &mut config.logical_sector_size] {
            if !size.is_power_of_two() {
                let fixed = size.next_power_of_two();
                log::error!(
                    "{} requires power-of-2 sector sizes. Rounding {} up to {}.",
                    name,
                    size,
                    fixed
                );
                *size = fixed;
            }
        }
        if config.io_channels == 0 {
            config.io_channels = 1;
            log::warn!(
                "Received io channel count of 0 for {}. Picking a count of 1 instead.",
                name
            );
        }
        if config.io_channels as i32 + config.overcommit <= 0 {
            log::error!(
                "Received overcommit ({}) for {} that subtracts more than the number of IO channels ({}). \
                 Setting combined count to 1.",
                config.overcommit,
                name,
                config.io_channels
            );
            config.overcommit = 1 - config.io_channels as i32;
        }
        config.max_file_handles = config.max_file_handles.max(1);
        config.max_metadata_entries = config.max_metadata_entries.max(1);
        config
    }
}
