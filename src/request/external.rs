//! Caller-facing request handles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::command::{
    CancelData, Command, CustomData, FileExistsCheckData, FileMetaDataRetrievalData, PathData,
    ReadRequestData, ReportData, ReportType,
};
use super::{Priority, RequestStatus};
use crate::buffer::OutputBuffer;
use crate::stats::Statistic;
use crate::{Error, RequestPath, Result};

/// Callback run on the scheduling thread once a caller's request finished.
pub type ExternalCallback = Box<dyn FnOnce(&FileRequestPtr) + Send>;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

struct ExternalState {
    /// The command; taken by the scheduler while in flight, returned on completion.
    command: Option<Command>,
    status: RequestStatus,
    estimated_completion: Option<Instant>,
    callback: Option<ExternalCallback>,
    queued: bool,
    finished: bool,
}

struct ExternalRequest {
    id: u64,
    state: Mutex<ExternalState>,
    finished: Condvar,
}

/// A cloneable, thread-safe handle to a caller's request.
///
/// Create one with the constructors below (or the `Streamer::create_*`
/// helpers), queue it on a streamer, then [`wait`](Self::wait) for it or attach
/// a completion callback. After completion the final command, including
/// results such as `found` or `file_size`, can be read back.
///
/// # Example
///
/// ```rust
/// use stackio::{FileRequestPtr, RequestPath, RequestStatus};
///
/// let path = RequestPath::from_root("/data", "file.bin").unwrap();
/// let request = FileRequestPtr::file_exists_check(path);
/// assert_eq!(request.status(), RequestStatus::Pending);
/// assert_eq!(request.found(), Some(false));
/// ```
#[derive(Clone)]
pub struct FileRequestPtr {
    inner: Arc<ExternalRequest>,
}

impl FileRequestPtr {
    /// Wraps a command into a new request.
    pub fn new(command: Command) -> Self {
        Self {
            inner: Arc::new(ExternalRequest {
                id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(ExternalState {
                    command: Some(command),
                    status: RequestStatus::Pending,
                    estimated_completion: None,
                    callback: None,
                    queued: false,
                    finished: false,
                }),
                finished: Condvar::new(),
            }),
        }
    }

    /// Creates a read of `size` bytes at `offset` into `output`.
    pub fn read(path: RequestPath, output: OutputBuffer, offset: u64, size: u64) -> Self {
        Self::prioritized_read(path, output, offset, size, Priority::default(), None)
    }

    /// Creates a read with an explicit priority and optional deadline.
    pub fn prioritized_read(
        path: RequestPath,
        output: OutputBuffer,
        offset: u64,
        size: u64,
        priority: Priority,
        deadline: Option<Instant>,
    ) -> Self {
        let output_size = output.len() as u64;
        Self::new(Command::ReadRequest(ReadRequestData {
            output,
            output_size,
            path,
            offset,
            size,
            priority,
            deadline,
        }))
    }

    /// Creates a file exists check.
    pub fn file_exists_check(path: RequestPath) -> Self {
        Self::new(Command::FileExistsCheck(FileExistsCheckData {
            path,
            found: false,
        }))
    }

    /// Creates a file size lookup.
    pub fn file_metadata(path: RequestPath) -> Self {
        Self::new(Command::FileMetaDataRetrieval(FileMetaDataRetrievalData {
            path,
            found: false,
            file_size: 0,
        }))
    }

    /// Creates a cancellation of `target`.
    pub fn cancel(target: &FileRequestPtr) -> Self {
        Self::new(Command::Cancel(CancelData {
            target: target.clone(),
        }))
    }

    /// Creates a flush of the cached state for `path`.
    pub fn flush(path: RequestPath) -> Self {
        Self::new(Command::Flush(PathData { path }))
    }

    /// Creates a flush of all cached state.
    pub fn flush_all() -> Self {
        Self::new(Command::FlushAll)
    }

    /// Creates a request that keeps `path` open until destroyed.
    pub fn create_dedicated_cache(path: RequestPath) -> Self {
        Self::new(Command::CreateDedicatedCache(PathData { path }))
    }

    /// Creates a request that releases a dedicated cache.
    pub fn destroy_dedicated_cache(path: RequestPath) -> Self {
        Self::new(Command::DestroyDedicatedCache(PathData { path }))
    }

    /// Creates an application-defined request.
    pub fn custom(data: Arc<dyn std::any::Any + Send + Sync>, fail_when_unhandled: bool) -> Self {
        Self::new(Command::Custom(CustomData {
            data,
            fail_when_unhandled,
        }))
    }

    /// Creates a report request.
    pub fn report(report_type: ReportType) -> Self {
        Self::new(Command::Report(ReportData {
            report_type,
            output: Vec::new(),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, ExternalState> {
        self.inner.state.lock().unwrap_or_else(|poisoned| {
            log::warn!("FileRequestPtr mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Returns the unique id of this request.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the current status.
    pub fn status(&self) -> RequestStatus {
        self.lock().status
    }

    /// Returns the latest completion estimate.
    pub fn estimated_completion(&self) -> Option<Instant> {
        self.lock().estimated_completion
    }

    /// Sets the callback run once the request finished.
    ///
    /// The callback runs on the scheduling thread and must not block.
    pub fn set_completion_callback<F>(&self, callback: F)
    where
        F: FnOnce(&FileRequestPtr) + Send + 'static,
    {
        self.lock().callback = Some(Box::new(callback));
    }

    /// Returns a copy of the command, or `None` while it is in flight.
    pub fn command(&self) -> Option<Command> {
        self.lock().command.clone()
    }

    /// Returns the result of an exists check or metadata lookup.
    pub fn found(&self) -> Option<bool> {
        match self.lock().command.as_ref()? {
            Command::FileExistsCheck(data) => Some(data.found),
            Command::FileMetaDataRetrieval(data) => Some(data.found),
            _ => None,
        }
    }

    /// Returns the file size found by a metadata lookup.
    pub fn file_size(&self) -> Option<u64> {
        match self.lock().command.as_ref()? {
            Command::FileMetaDataRetrieval(data) if data.found => Some(data.file_size),
            _ => None,
        }
    }

    /// Returns the records collected by a report request.
    pub fn report_output(&self) -> Option<Vec<Statistic>> {
        match self.lock().command.as_ref()? {
            Command::Report(data) => Some(data.output.clone()),
            _ => None,
        }
    }

    /// Returns true once the request finished and its callback ran.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Blocks until the request finished, or `timeout` elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the request did not finish in time.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<RequestStatus> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        while !state.finished {
            state = match deadline {
                None => self
                    .inner
                    .finished
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    self.inner
                        .finished
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
        Ok(state.status)
    }

    /// Takes the command out for processing. A request can only be queued once.
    pub(crate) fn take_for_queue(&self) -> Result<Command> {
        let mut state = self.lock();
        if state.queued {
            return Err(Error::RequestAlreadyQueued(self.inner.id));
        }
        match state.command.take() {
            Some(command) => {
                state.queued = true;
                state.status = RequestStatus::Queued;
                Ok(command)
            }
            None => Err(Error::RequestAlreadyQueued(self.inner.id)),
        }
    }

    pub(crate) fn set_status(&self, status: RequestStatus) {
        let mut state = self.lock();
        if !state.status.is_terminal() {
            state.status = status;
        }
    }

    pub(crate) fn set_estimated_completion(&self, estimate: Instant) {
        self.lock().estimated_completion = Some(estimate);
    }

    /// Stores the outcome, runs the callback and wakes every waiter.
    pub(crate) fn complete(&self, status: RequestStatus, command: Option<Command>) {
        let callback = {
            let mut state = self.lock();
            state.status = status;
            if command.is_some() {
                state.command = command;
            }
            state.callback.take()
        };
        if let Some(callback) = callback {
            callback(self);
        }
        self.lock().finished = true;
        self.inner.finished.notify_all();
    }
}

impl PartialEq for FileRequestPtr {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for FileRequestPtr {}

impl fmt::Debug for FileRequestPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRequestPtr")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}
