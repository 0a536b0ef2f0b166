//! Sector-aligned positional reads.
//!
//! Unbuffered devices only accept reads whose file offset and size are
//! multiples of the logical sector size, into memory aligned to the physical
//! sector size. [`ReadPlan`] widens a request to satisfy those rules and
//! remembers where the requested bytes sit inside the wider read, so only
//! `[offset, offset + size)` ever reaches the caller's buffer.
//!
//! ```text
//! +---------------+---------------+
//! |###XXXXXXXXXXXX|XXXXXXX########|
//! +---------------+---------------+
//! ^ file_offset
//! <-> copy_back
//!    <------ size ------>
//! <--------- read_size ---------->
//! ```

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use crate::buffer::{align_down, align_up, is_aligned, AlignedBuffer, OutputBuffer};

/// How a single read is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadPlan {
    /// Offset of the first byte read from the file.
    pub file_offset: u64,
    /// Number of bytes read from the file.
    pub read_size: u64,
    /// Position of the requested bytes inside the read.
    pub copy_back: u64,
    /// Number of bytes the caller asked for.
    pub size: u64,
    /// Read straight into the caller's buffer.
    pub direct: bool,
}

impl ReadPlan {
    /// Plans a read of `size` bytes at `offset`.
    ///
    /// A direct read is only issued when offset, size and destination are all
    /// aligned, so the device never writes past `size` into caller memory.
    pub(crate) fn new(
        offset: u64,
        size: u64,
        logical_sector_size: u64,
        output_aligned: bool,
        unbuffered: bool,
    ) -> Self {
        if !unbuffered {
            return Self {
                file_offset: offset,
                read_size: size,
                copy_back: 0,
                size,
                direct: true,
            };
        }

        let file_offset = align_down(offset, logical_sector_size);
        let copy_back = offset - file_offset;
        let read_size = align_up(size + copy_back, logical_sector_size);
        let direct = copy_back == 0 && read_size == size && output_aligned;
        Self {
            file_offset,
            read_size,
            copy_back,
            size,
            direct,
        }
    }

    /// Returns true if `transferred` bytes cover the requested range.
    pub(crate) fn is_satisfied_by(&self, transferred: u64) -> bool {
        transferred >= self.copy_back + self.size
    }

    /// Offset just past the last byte read.
    pub(crate) fn end(&self) -> u64 {
        self.file_offset + self.read_size
    }
}

/// Returns true if the first byte of `output` sits on an `alignment` boundary.
pub(crate) fn is_output_aligned(output: &OutputBuffer, alignment: u64) -> bool {
    is_aligned(output.lock().as_ptr() as u64, alignment)
}

/// Opens a file for reading.
///
/// Directories are rejected. `shared` lets other processes read the file
/// while it is held open; it only has an effect where the platform locks
/// files on open.
pub(crate) fn open_for_read(path: &Path, shared: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_SHARE_READ: u32 = 0x0000_0001;
        options.share_mode(if shared { FILE_SHARE_READ } else { 0 });
    }
    #[cfg(not(windows))]
    let _ = shared;

    let file = options.open(path)?;
    if !file.metadata()?.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{}' is not a regular file", path.display()),
        ));
    }
    Ok(file)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// Reads until `buf` is full or the end of the file. Returns the byte count.
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<u64> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match read_at(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled as u64)
}

/// Executes `plan` and writes the requested bytes to `output[0..size)`.
///
/// Returns the number of bytes transferred from the file, which may exceed
/// `size` for widened reads. Nothing is copied to `output` unless the whole
/// requested range was read.
pub(crate) fn execute(
    file: &File,
    plan: &ReadPlan,
    output: &OutputBuffer,
    physical_sector_size: u64,
) -> io::Result<u64> {
    let size = usize::try_from(plan.size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "read size overflows usize"))?;

    if plan.direct {
        let mut out = output.lock();
        let Some(target) = out.get_mut(..size) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "output buffer is smaller than the read",
            ));
        };
        return read_full_at(file, target, plan.file_offset);
    }

    let read_size = usize::try_from(plan.read_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "read size overflows usize"))?;
    let mut scratch = AlignedBuffer::new(read_size, physical_sector_size as usize);
    let transferred = read_full_at(file, scratch.as_mut_slice(), plan.file_offset)?;
    if plan.is_satisfied_by(transferred) {
        let start = plan.copy_back as usize;
        if !output.write_at(0, &scratch.as_slice()[start..start + size]) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "output buffer is smaller than the read",
            ));
        }
    }
    Ok(transferred)
}
