//! Command payloads carried by requests.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::{FileRequestPtr, Priority};
use crate::buffer::OutputBuffer;
use crate::compression::CompressionInfo;
use crate::stats::Statistic;
use crate::RequestPath;

/// A user read before any stage has decided how to serve it.
#[derive(Debug, Clone)]
pub struct ReadRequestData {
    /// Destination memory.
    pub output: OutputBuffer,
    /// Usable size of `output` in bytes.
    pub output_size: u64,
    /// File to read from.
    pub path: RequestPath,
    /// Offset in the file.
    pub offset: u64,
    /// Number of bytes to read.
    pub size: u64,
    /// Scheduling priority.
    pub priority: Priority,
    /// Time by which the caller wants the data.
    pub deadline: Option<Instant>,
}

/// A read of a physical file, served by a storage drive.
#[derive(Debug, Clone)]
pub struct ReadData {
    /// Destination memory.
    pub output: OutputBuffer,
    /// Usable size of `output` in bytes.
    pub output_size: u64,
    /// File to read from.
    pub path: RequestPath,
    /// Offset in the file.
    pub offset: u64,
    /// Number of bytes to read.
    pub size: u64,
    /// Open the file so other readers can use it concurrently.
    pub shared_read: bool,
}

/// A read of (part of) a compressed archive entry.
#[derive(Debug, Clone)]
pub struct CompressedReadData {
    /// Location and codec of the entry.
    pub compression_info: CompressionInfo,
    /// Destination memory for the uncompressed bytes.
    pub output: OutputBuffer,
    /// Offset into the uncompressed payload.
    pub read_offset: u64,
    /// Number of uncompressed bytes wanted.
    pub read_size: u64,
}

impl CompressedReadData {
    /// Returns true if the whole uncompressed payload is requested.
    pub fn is_full_read(&self) -> bool {
        self.read_offset == 0 && self.read_size == self.compression_info.uncompressed_size
    }
}

/// Checks whether a file exists. "Not found" is a normal result.
#[derive(Debug, Clone)]
pub struct FileExistsCheckData {
    /// File to look for.
    pub path: RequestPath,
    /// Set when the file was found.
    pub found: bool,
}

/// Retrieves the size of a file. "Not found" is a normal result.
#[derive(Debug, Clone)]
pub struct FileMetaDataRetrievalData {
    /// File to look for.
    pub path: RequestPath,
    /// Set when the file was found.
    pub found: bool,
    /// Size of the file in bytes.
    pub file_size: u64,
}

/// A command that targets a single path.
#[derive(Debug, Clone)]
pub struct PathData {
    /// The targeted path.
    pub path: RequestPath,
}

/// Cancels every request working on `target`.
#[derive(Debug, Clone)]
pub struct CancelData {
    /// The request to cancel.
    pub target: FileRequestPtr,
}

/// Application-defined payload for custom stages.
#[derive(Clone)]
pub struct CustomData {
    /// The payload.
    pub data: Arc<dyn Any + Send + Sync>,
    /// Fail instead of complete when no stage consumes the request.
    pub fail_when_unhandled: bool,
}

impl fmt::Debug for CustomData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomData")
            .field("fail_when_unhandled", &self.fail_when_unhandled)
            .finish_non_exhaustive()
    }
}

/// Kinds of reports stages can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportType {
    /// Every stage dumps its tunables.
    Config,
    /// Storage drives list the files they hold open.
    FileLocks,
}

/// Collects [`Statistic`]s from every stage.
#[derive(Debug, Clone)]
pub struct ReportData {
    /// What to report.
    pub report_type: ReportType,
    /// Records appended by the stages.
    pub output: Vec<Statistic>,
}

/// The work a request describes.
#[derive(Debug, Clone)]
pub enum Command {
    /// User read, rewritten by the stages into concrete reads.
    ReadRequest(ReadRequestData),
    /// Read from a physical file.
    Read(ReadData),
    /// Read from a compressed archive entry.
    CompressedRead(CompressedReadData),
    /// Check whether a file exists.
    FileExistsCheck(FileExistsCheckData),
    /// Retrieve the size of a file.
    FileMetaDataRetrieval(FileMetaDataRetrievalData),
    /// Keep a file open for the lifetime of the dedicated cache.
    CreateDedicatedCache(PathData),
    /// Release a file kept open by [`Command::CreateDedicatedCache`].
    DestroyDedicatedCache(PathData),
    /// Keeps a path alive on behalf of a parent request.
    RequestPathStore(PathData),
    /// Drop any cached state for a path.
    Flush(PathData),
    /// Drop all cached state.
    FlushAll,
    /// Placeholder completed by the stage that created it.
    Wait,
    /// Cancel a request.
    Cancel(CancelData),
    /// Application-defined work.
    Custom(CustomData),
    /// Collect a report from every stage.
    Report(ReportData),
}

impl Command {
    /// Returns the command's name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadRequest(_) => "ReadRequest",
            Self::Read(_) => "Read",
            Self::CompressedRead(_) => "CompressedRead",
            Self::FileExistsCheck(_) => "FileExistsCheck",
            Self::FileMetaDataRetrieval(_) => "FileMetaDataRetrieval",
            Self::CreateDedicatedCache(_) => "CreateDedicatedCache",
            Self::DestroyDedicatedCache(_) => "DestroyDedicatedCache",
            Self::RequestPathStore(_) => "RequestPathStore",
            Self::Flush(_) => "Flush",
            Self::FlushAll => "FlushAll",
            Self::Wait => "Wait",
            Self::Cancel(_) => "Cancel",
            Self::Custom(_) => "Custom",
            Self::Report(_) => "Report",
        }
    }

    /// Returns true for commands that pass through every stage instead of
    /// being scheduled. These bypass the prepared queue.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::CreateDedicatedCache(_)
                | Self::DestroyDedicatedCache(_)
                | Self::Flush(_)
                | Self::FlushAll
                | Self::Cancel(_)
                | Self::Report(_)
        )
    }

    /// Returns true if a request with this command completes successfully
    /// once it passes the last stage without being consumed.
    pub fn completes_when_unhandled(&self) -> bool {
        match self {
            Self::CreateDedicatedCache(_)
            | Self::DestroyDedicatedCache(_)
            | Self::RequestPathStore(_)
            | Self::Flush(_)
            | Self::FlushAll
            | Self::Cancel(_)
            | Self::Report(_)
            | Self::FileExistsCheck(_)
            | Self::FileMetaDataRetrieval(_) => true,
            Self::Custom(custom) => !custom.fail_when_unhandled,
            Self::ReadRequest(_) | Self::Read(_) | Self::CompressedRead(_) | Self::Wait => false,
        }
    }

    /// Returns the path the command works on, if any.
    pub fn path(&self) -> Option<&RequestPath> {
        match self {
            Self::ReadRequest(data) => Some(&data.path),
            Self::Read(data) => Some(&data.path),
            Self::CompressedRead(data) => Some(&data.compression_info.archive_filename),
            Self::FileExistsCheck(data) => Some(&data.path),
            Self::FileMetaDataRetrieval(data) => Some(&data.path),
            Self::CreateDedicatedCache(data)
            | Self::DestroyDedicatedCache(data)
            | Self::RequestPathStore(data)
            | Self::Flush(data) => Some(&data.path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> RequestPath {
        RequestPath::from_root("/data", "file.bin").unwrap()
    }

    #[test]
    fn test_control_commands() {
        assert!(Command::FlushAll.is_control());
        assert!(Command::Flush(PathData { path: path() }).is_control());
        assert!(!Command::Wait.is_control());
        assert!(
            !Command::FileExistsCheck(FileExistsCheckData {
                path: path(),
                found: false
            })
            .is_control()
        );
    }

    #[test]
    fn test_unhandled_rule() {
        assert!(Command::FlushAll.completes_when_unhandled());
        assert!(!Command::Wait.completes_when_unhandled());
        let custom = |fail| {
            Command::Custom(CustomData {
                data: Arc::new(5u32),
                fail_when_unhandled: fail,
            })
        };
        assert!(custom(false).completes_when_unhandled());
        assert!(!custom(true).completes_when_unhandled());
    }

    #[test]
    fn test_full_read_detection() {
        let info = CompressionInfo::stored(path(), 0, 64);
        let mut data = CompressedReadData {
            compression_info: info,
            output: OutputBuffer::new(64),
            read_offset: 0,
            read_size: 64,
        };
        assert!(data.is_full_read());
        data.read_offset = 1;
        data.read_size = 63;
        assert!(!data.is_full_read());
    }

    #[test]
    fn test_names_and_paths() {
        let cmd = Command::FileMetaDataRetrieval(FileMetaDataRetrievalData {
            path: path(),
            found: false,
            file_size: 0,
        });
        assert_eq!(cmd.name(), "FileMetaDataRetrieval");
        assert_eq!(cmd.path(), Some(&path()));
        assert!(Command::FlushAll.path().is_none());
    }
}
