//! Configuration for [`ArchiveDecompressor`](super::ArchiveDecompressor).

use crate::{Error, Result};

/// Construction parameters of an archive decompressor.
///
/// Two independent limits bound the stage's memory: `max_num_reads`
/// compressed buffers can be in flight or waiting for decompression, and
/// `max_num_tasks` decompressions run at the same time, each on its own
/// thread.
///
/// # Example
///
/// ```rust
/// use stackio::decompressor::DecompressorConfig;
///
/// let config = DecompressorConfig::new().max_num_reads(4).alignment(512);
/// assert!(config.validate().is_ok());
/// assert_eq!(DecompressorConfig::low_memory().max_num_tasks, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompressorConfig {
    /// Number of compressed archive reads outstanding at once.
    /// Default: 2.
    pub max_num_reads: u32,

    /// Number of decompression jobs running at once.
    /// Default: 2.
    pub max_num_tasks: u32,

    /// Boundary compressed reads are aligned down to, in bytes. Usually the
    /// sector size of the drive holding the archives.
    /// Default: 4 KiB.
    pub alignment: u64,

    /// Only log problems, not lifecycle information.
    /// Default: false.
    pub minimal_reporting: bool,
}

impl Default for DecompressorConfig {
    fn default() -> Self {
        Self {
            max_num_reads: 2,
            max_num_tasks: 2,
            alignment: 4 * 1024,
            minimal_reporting: false,
        }
    }
}

impl DecompressorConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// One buffer and one job: the smallest memory footprint.
    pub fn low_memory() -> Self {
        Self {
            max_num_reads: 1,
            max_num_tasks: 1,
            ..Self::default()
        }
    }

    /// One job per available core and twice as many buffers.
    pub fn high_throughput() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4);
        Self {
            max_num_reads: cores * 2,
            max_num_tasks: cores,
            ..Self::default()
        }
    }

    /// Sets the number of outstanding compressed reads.
    pub fn max_num_reads(mut self, count: u32) -> Self {
        self.max_num_reads = count;
        self
    }

    /// Sets the number of concurrent decompression jobs.
    pub fn max_num_tasks(mut self, count: u32) -> Self {
        self.max_num_tasks = count;
        self
    }

    /// Sets the read alignment.
    pub fn alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    /// Sets whether only problems are logged.
    pub fn minimal_reporting(mut self, minimal: bool) -> Self {
        self.minimal_reporting = minimal;
        self
    }

    /// Checks every value strictly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_num_reads == 0 {
            return Err(Error::invalid_config("max_num_reads", "must be at least 1"));
        }
        if self.max_num_tasks == 0 {
            return Err(Error::invalid_config("max_num_tasks", "must be at least 1"));
        }
        if !self.alignment.is_power_of_two() {
            return Err(Error::invalid_config(
                "alignment",
                format!("{} is not a non-zero power of two", self.alignment),
            ));
        }
        Ok(())
    }

    /// Returns a copy with unusable values replaced by safe defaults.
    pub(crate) fn corrected(&self, name: &str) -> Self {
        let mut config = self.clone();
        if config.max_num_reads == 0 {
            log::error!("{} needs at least one read slot. Using 1.", name);
            config.max_num_reads = 1;
        }
        if config.max_num_tasks == 0 {
            log::error!("{} needs at least one decompression slot. Using 1.", name);
            config.max_num_tasks = 1;
        }
        if !config.alignment.is_power_of_two() {
            let fixed = config.alignment.max(1).next_power_of_two();
            log::error!(
                "{} requires a power-of-2 alignment. Rounding {} up to {}.",
                name,
                config.alignment,
                fixed
            );
            config.alignment = fixed;
        }
        config
    }
}
