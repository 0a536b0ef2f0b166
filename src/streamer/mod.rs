//! The user-facing streamer.
//!
//! A [`Streamer`] owns a [`Scheduler`] running on its own thread. Callers
//! create requests with the `create_*` functions, queue them, and either
//! wait on the returned [`FileRequestPtr`] or attach a completion callback.
//! Callbacks run on the scheduling thread and must not block.
//!
//! ```rust,no_run
//! use stackio::storage::StorageDriveConfig;
//! use stackio::{OutputBuffer, RequestPath, StackBuilder, Streamer, StreamerConfig};
//!
//! let stack = StackBuilder::new()
//!     .drive(StorageDriveConfig::ssd().drive_path("/data"))
//!     .build()?;
//! let streamer = Streamer::new(stack, StreamerConfig::default())?;
//!
//! let path = RequestPath::from_root("/data", "level.bin")?;
//! let output = OutputBuffer::new(4096);
//! let request = streamer.create_read(path, output.clone(), 0, 4096);
//! streamer.queue_request(&request)?;
//! let status = request.wait(None)?;
//! println!("{:?}: {} bytes", status, output.len());
//! # Ok::<(), stackio::Error>(())
//! ```

mod builder;
mod config;

pub use builder::StackBuilder;
pub use config::StreamerConfig;

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::buffer::OutputBuffer;
use crate::context::ThreadSync;
use crate::request::{Command, FileRequestPtr, Priority, ReportType, RequestStatus};
use crate::request_path::RequestPath;
use crate::scheduler::Scheduler;
use crate::stack::StreamStackEntry;
use crate::stats::Statistic;
use crate::{Error, Result};

enum Message {
    Submit(FileRequestPtr, Command),
    Statistics(Sender<Vec<Statistic>>),
    Stop,
}

/// Asynchronous file reads through a stack of stages.
pub struct Streamer {
    sender: Sender<Message>,
    thread_sync: ThreadSync,
    thread: Option<JoinHandle<()>>,
    config: StreamerConfig,
}

impl Streamer {
    /// Starts the scheduling thread for `stack`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the thread could not be spawned.
    pub fn new(stack: Box<dyn StreamStackEntry>, config: StreamerConfig) -> Result<Self> {
        let thread_sync = ThreadSync::new();
        let scheduler = Scheduler::with_thread_sync(stack, config.scheduler.clone(), thread_sync.clone());
        let (sender, receiver) = mpsc::channel();

        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run(scheduler, receiver))?;

        log::debug!("Streamer started on thread '{}'", config.thread_name);
        Ok(Self {
            sender,
            thread_sync,
            thread: Some(thread),
            config,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// Creates a read of `size` bytes at `offset` into `output`.
    pub fn create_read(&self, path: RequestPath, output: OutputBuffer, offset: u64, size: u64) -> FileRequestPtr {
        FileRequestPtr::read(path, output, offset, size)
    }

    /// Creates a read with an explicit priority and optional deadline.
    pub fn create_prioritized_read(
        &self,
        path: RequestPath,
        output: OutputBuffer,
        offset: u64,
        size: u64,
        priority: Priority,
        deadline: Option<Instant>,
    ) -> FileRequestPtr {
        FileRequestPtr::prioritized_read(path, output, offset, size, priority, deadline)
    }

    /// Creates a check for whether `path` exists.
    pub fn create_file_exists_check(&self, path: RequestPath) -> FileRequestPtr {
        FileRequestPtr::file_exists_check(path)
    }

    /// Creates a request for the size of `path`.
    pub fn create_file_metadata(&self, path: RequestPath) -> FileRequestPtr {
        FileRequestPtr::file_metadata(path)
    }

    /// Creates a cancellation of `target`.
    pub fn create_cancel(&self, target: &FileRequestPtr) -> FileRequestPtr {
        FileRequestPtr::cancel(target)
    }

    /// Creates a request that drops cached state for `path`.
    pub fn create_flush(&self, path: RequestPath) -> FileRequestPtr {
        FileRequestPtr::flush(path)
    }

    /// Creates a request that drops all cached state.
    pub fn create_flush_all(&self) -> FileRequestPtr {
        FileRequestPtr::flush_all()
    }

    /// Creates a request that keeps `path` open until destroyed.
    pub fn create_dedicated_cache(&self, path: RequestPath) -> FileRequestPtr {
        FileRequestPtr::create_dedicated_cache(path)
    }

    /// Creates a request that releases a dedicated cache.
    pub fn destroy_dedicated_cache(&self, path: RequestPath) -> FileRequestPtr {
        FileRequestPtr::destroy_dedicated_cache(path)
    }

    /// Creates an application-defined request.
    pub fn create_custom(
        &self,
        data: Arc<dyn std::any::Any + Send + Sync>,
        fail_when_unhandled: bool,
    ) -> FileRequestPtr {
        FileRequestPtr::custom(data, fail_when_unhandled)
    }

    /// Creates a report request.
    pub fn create_report(&self, report_type: ReportType) -> FileRequestPtr {
        FileRequestPtr::report(report_type)
    }

    /// Sets the callback run on the scheduling thread once `request` finished.
    pub fn set_completion_callback<F>(&self, request: &FileRequestPtr, callback: F)
    where
        F: FnOnce(&FileRequestPtr) + Send + 'static,
    {
        request.set_completion_callback(callback);
    }

    /// Hands `request` to the scheduling thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestAlreadyQueued`] if the request was queued
    /// before, and [`Error::SchedulerStopped`] if the scheduling thread is
    /// gone. In the latter case the request is completed as canceled.
    pub fn queue_request(&self, request: &FileRequestPtr) -> Result<()> {
        let command = request.take_for_queue()?;
        if let Err(mpsc::SendError(message)) = self.sender.send(Message::Submit(request.clone(), command)) {
            if let Message::Submit(request, command) = message {
                request.complete(RequestStatus::Canceled, Some(command));
            }
            return Err(Error::SchedulerStopped);
        }
        self.thread_sync.wake();
        Ok(())
    }

    /// Queues every request in order, stopping at the first error.
    ///
    /// # Errors
    ///
    /// See [`queue_request`](Self::queue_request).
    pub fn queue_request_batch(&self, requests: &[FileRequestPtr]) -> Result<()> {
        requests.iter().try_for_each(|request| self.queue_request(request))
    }

    /// Runs a report through the stack and returns the records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the report took longer than the
    /// configured reply timeout.
    pub fn report(&self, report_type: ReportType) -> Result<Vec<Statistic>> {
        let request = self.create_report(report_type);
        self.queue_request(&request)?;
        request.wait(Some(self.config.reply_timeout))?;
        Ok(request.report_output().unwrap_or_default())
    }

    /// Collects statistics from the scheduler and every stage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchedulerStopped`] or [`Error::Timeout`] if the
    /// scheduling thread did not answer.
    pub fn collect_statistics(&self) -> Result<Vec<Statistic>> {
        let (reply, answer) = mpsc::channel();
        self.sender
            .send(Message::Statistics(reply))
            .map_err(|_| Error::SchedulerStopped)?;
        self.thread_sync.wake();
        answer
            .recv_timeout(self.config.reply_timeout)
            .map_err(|error| match error {
                mpsc::RecvTimeoutError::Timeout => Error::Timeout,
                mpsc::RecvTimeoutError::Disconnected => Error::SchedulerStopped,
            })
    }

    /// Reads `size` bytes at `offset` and waits for the result.
    ///
    /// Returns the final status together with the buffer. The buffer holds
    /// the requested bytes only when the status is
    /// [`Completed`](RequestStatus::Completed).
    ///
    /// # Errors
    ///
    /// Returns an error if `size` does not fit in memory, or if the request
    /// could not be queued or did not finish within `timeout`.
    pub fn read_blocking(
        &self,
        path: RequestPath,
        offset: u64,
        size: u64,
        timeout: Option<Duration>,
    ) -> Result<(RequestStatus, Vec<u8>)> {
        let output = OutputBuffer::new(buffer_len(size)?);
        let request = self.create_read(path, output.clone(), offset, size);
        self.queue_request(&request)?;
        let status = request.wait(timeout)?;
        Ok((status, output.to_vec()))
    }

    /// Returns the size of `path`, or `None` if no stage knows the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be queued or timed out.
    pub fn file_size(&self, path: RequestPath) -> Result<Option<u64>> {
        let request = self.create_file_metadata(path);
        self.queue_request(&request)?;
        request.wait(Some(self.config.reply_timeout))?;
        Ok(request.file_size())
    }

    /// Returns whether any stage knows `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be queued or timed out.
    pub fn file_exists(&self, path: RequestPath) -> Result<bool> {
        let request = self.create_file_exists_check(path);
        self.queue_request(&request)?;
        request.wait(Some(self.config.reply_timeout))?;
        Ok(request.found().unwrap_or(false))
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::Stop);
        self.thread_sync.wake();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Scheduling thread '{}' panicked", self.config.thread_name);
            }
        }
    }
}

impl std::fmt::Debug for Streamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streamer")
            .field("config", &self.config)
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}

/// Converts a read size into a buffer length.
fn buffer_len(size: u64) -> Result<usize> {
    usize::try_from(size)
        .map_err(|_| Error::invalid_config("size", format!("{} bytes do not fit in memory", size)))
}

fn run(mut scheduler: Scheduler, receiver: Receiver<Message>) {
    loop {
        loop {
            match receiver.try_recv() {
                Ok(Message::Submit(request, command)) => scheduler.submit_taken(&request, command),
                Ok(Message::Statistics(reply)) => {
                    let _ = reply.send(scheduler.collect_statistics());
                }
                Ok(Message::Stop) | Err(TryRecvError::Disconnected) => {
                    scheduler.shutdown();
                    log::debug!("Scheduling thread stopped");
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        if !scheduler.tick() {
            let idle_timeout = scheduler.config().idle_timeout;
            scheduler.thread_sync().wait_timeout(idle_timeout);
        }
    }
}
