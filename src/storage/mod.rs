//! The bottom stage: reads from physical files.
//!
//! A [`StorageDrive`] serves every path under its configured drive roots. It
//! keeps a bounded cache of open file handles, runs reads on a dedicated pool
//! with one thread per I/O channel and answers file exists and metadata
//! checks. Requests for paths outside its roots are forwarded.
//!
//! # Slots
//!
//! The drive accepts `io_channels + overcommit` requests. Reads beyond the
//! channel count wait in a FIFO until a channel frees up, which lets the drive
//! start the next read without waiting for the scheduler. A negative
//! overcommit throttles the drive below its channel count.
//!
//! # Exists checks
//!
//! A path with an open handle is reported as present without asking the
//! filesystem again, so a file deleted while the drive holds it open is still
//! found until it is flushed. Other paths are checked on every request. Like
//! the loose-file check of the archive decompressor, the answer may be stale
//! by the time a read is issued.
//!
//! # Example
//!
//! ```rust,no_run
//! use stackio::storage::{StorageDrive, StorageDriveConfig};
//!
//! let drive = StorageDrive::new(StorageDriveConfig::ssd().drive_path("/data"));
//! assert_eq!(drive.configured_slots(), 12);
//! ```

mod config;
mod file_cache;
mod io;

pub use config::{DriveOptions, StorageDriveConfig};

use std::collections::VecDeque;
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use lru::LruCache;

use self::file_cache::{Acquired, FileCache};
use self::io::ReadPlan;
use crate::context::StreamerContext;
use crate::request::command::ReadData;
use crate::request::{Command, ReportType, RequestId, RequestStatus};
use crate::stack::{StreamStackEntry, Status, complete_unhandled};
use crate::stats::{AverageWindow, RunningStatistic, Statistic, TimedAverageWindow};
use crate::RequestPath;

/// Average seek time of a desktop hard drive plus rotational latency at 7200 RPM.
const AVERAGE_SEEK_TIME: Duration = Duration::from_millis(9 + 3);

const STAT_WINDOW: usize = 64;

/// A read running on an I/O channel.
#[derive(Debug)]
struct ActiveRead {
    request: RequestId,
    path: RequestPath,
    size: u64,
    plan: ReadPlan,
    started: Instant,
    canceled: bool,
}

/// Result sent back by an I/O thread.
#[derive(Debug)]
struct ReadOutcome {
    channel: usize,
    result: std::io::Result<u64>,
}

/// Reads files under one or more drive roots.
pub struct StorageDrive {
    name: String,
    roots: Vec<PathBuf>,
    config: StorageDriveConfig,
    max_active_reads: usize,

    pending_reads: VecDeque<RequestId>,
    pending_checks: VecDeque<RequestId>,
    channels: Vec<Option<ActiveRead>>,
    active_reads: usize,

    file_cache: FileCache,
    metadata_cache: LruCache<RequestPath, u64>,

    pool: Option<rayon::ThreadPool>,
    results_tx: Sender<ReadOutcome>,
    results_rx: Receiver<ReadOutcome>,

    active_path: Option<RequestPath>,
    active_offset: u64,
    active_bytes: u64,
    active_since: Instant,

    read_size_average: AverageWindow<STAT_WINDOW>,
    read_time_average: TimedAverageWindow<STAT_WINDOW>,
    exists_time_average: TimedAverageWindow<STAT_WINDOW>,
    metadata_time_average: TimedAverageWindow<STAT_WINDOW>,
    file_switches: RunningStatistic,
    seeks: RunningStatistic,
    direct_reads: RunningStatistic,

    next: Option<Box<dyn StreamStackEntry>>,
}

impl StorageDrive {
    /// Creates a drive. Never fails: unusable configuration values are logged
    /// and replaced with safe defaults.
    pub fn new(config: StorageDriveConfig) -> Self {
        let roots: Vec<PathBuf> = config
            .drive_paths
            .iter()
            .map(|root| crate::request_path::normalize(root))
            .collect();
        if roots.is_empty() {
            log::error!("A storage drive requires at least one drive path to serve requests");
        }
        let name = format!(
            "Storage drive ({})",
            roots
                .iter()
                .map(|root| root.display().to_string())
                .collect::<Vec<_>>()
                .join(",")
        );

        let config = config.corrected(&name);
        if !config.options.minimal_reporting {
            log::info!("{} created", name);
        }

        let channel_count = config.io_channels as usize;
        let combined = (config.io_channels as i32 + config.overcommit).max(1) as usize;
        let max_active_reads = channel_count.min(combined);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_active_reads)
            .thread_name({
                let name = name.clone();
                move |i| format!("{} io {}", name, i)
            })
            .build()
            .map_err(|e| {
                log::error!(
                    "{} could not start its io threads, reading on the scheduling thread: {}",
                    name,
                    e
                )
            })
            .ok();

        let (results_tx, results_rx) = mpsc::channel();
        let metadata_capacity =
            NonZeroUsize::new(config.max_metadata_entries as usize).unwrap_or(NonZeroUsize::MIN);

        let mut read_size_average = AverageWindow::new();
        let mut read_time_average = TimedAverageWindow::new();
        // Seed the averages so estimates never divide by zero.
        read_size_average.push_entry(1);
        read_time_average.push(Duration::from_micros(1));

        Self {
            name,
            roots,
            file_cache: FileCache::new(config.max_file_handles),
            metadata_cache: LruCache::new(metadata_capacity),
            config,
            max_active_reads,
            pending_reads: VecDeque::new(),
            pending_checks: VecDeque::new(),
            channels: (0..max_active_reads).map(|_| None).collect(),
            active_reads: 0,
            pool,
            results_tx,
            results_rx,
            active_path: None,
            active_offset: 0,
            active_bytes: 0,
            active_since: Instant::now(),
            read_size_average,
            read_time_average,
            exists_time_average: TimedAverageWindow::new(),
            metadata_time_average: TimedAverageWindow::new(),
            file_switches: RunningStatistic::default(),
            seeks: RunningStatistic::default(),
            direct_reads: RunningStatistic::default(),
            next: None,
        }
    }

    /// Returns the effective configuration after corrections.
    pub fn config(&self) -> &StorageDriveConfig {
        &self.config
    }

    /// Returns the number of requests the drive accepts in total.
    pub fn configured_slots(&self) -> i32 {
        self.config.io_channels as i32 + self.config.overcommit
    }

    /// Returns the number of requests the drive holds, queued or reading.
    pub fn in_flight_slots(&self) -> i32 {
        (self.pending_reads.len() + self.pending_checks.len() + self.active_reads) as i32
    }

    /// Returns how many more requests the drive accepts. May be negative.
    pub fn available_slots(&self) -> i32 {
        self.configured_slots() - self.in_flight_slots()
    }

    /// Returns the number of reads running on I/O channels.
    pub fn active_reads(&self) -> usize {
        self.active_reads
    }

    /// Returns true if `path` lies under one of this drive's roots.
    pub fn is_serviced(&self, path: &RequestPath) -> bool {
        self.roots.iter().any(|root| path.is_under(root))
    }

    fn forward_queue(&mut self, ctx: &mut StreamerContext, id: RequestId) {
        match self.next.as_deref_mut() {
            Some(next) => next.queue_request(ctx, id),
            None => complete_unhandled(ctx, id),
        }
    }

    fn cancel(&mut self, ctx: &mut StreamerContext, target: u64) -> bool {
        let mut owns_request = false;
        for queue in [&mut self.pending_reads, &mut self.pending_checks] {
            let (canceled, kept): (VecDeque<_>, VecDeque<_>) =
                queue.drain(..).partition(|&id| ctx.works_on(id, target));
            *queue = kept;
            for id in canceled {
                ctx.complete_request(id, RequestStatus::Canceled);
                owns_request = true;
            }
        }
        for read in self.channels.iter_mut().flatten() {
            if ctx.works_on(read.request, target) {
                read.canceled = true;
                owns_request = true;
            }
        }
        owns_request
    }

    /// Starts the first queued read whose file handle is already open.
    ///
    /// Used when the read at the front waits for a handle, so reads of open
    /// files do not queue behind it.
    fn start_cached_read(&mut self, ctx: &mut StreamerContext) -> bool {
        if self.active_reads >= self.max_active_reads {
            return false;
        }
        let Some(index) = self.pending_reads.iter().skip(1).position(|&id| {
            matches!(ctx.command(id), Some(Command::Read(data)) if self.file_cache.contains(&data.path))
        }) else {
            return false;
        };
        let Some(id) = self.pending_reads.remove(index + 1) else {
            return false;
        };
        if self.start_read(ctx, id) {
            true
        } else {
            self.pending_reads.insert(index + 1, id);
            false
        }
    }

        fn flush(&mut self, path: &RequestPath) {
        if self.file_cache.flush(path) {
            log::debug!("{} closed '{}'", self.name, path);
        }
        self.metadata_cache.pop(path);
    }

    fn flush_all(&mut self) {
        self.file_cache.flush_all();
        self.metadata_cache.clear();
    }

    fn report(&self, report_type: ReportType) -> Vec<Statistic> {
        let name = self.name.as_str();
        match report_type {
            ReportType::Config => {
                let options = &self.config.options;
                let roots = self
                    .roots
                    .iter()
                    .map(|root| root.display().to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                vec![
                    Statistic::persistent_string(name, "Drive paths", roots, "The drive paths this node monitors."),
                    Statistic::integer(
                        name,
                        "Max file handles",
                        self.file_cache.capacity() as i64,
                        "The maximum number of file handles this drive keeps open.",
                    ),
                    Statistic::integer(
                        name,
                        "Max meta data cache",
                        self.metadata_cache.cap().get() as i64,
                        "The maximum number of file sizes this drive caches.",
                    ),
                    Statistic::byte_size(
                        name,
                        "Physical sector size",
                        self.config.physical_sector_size,
                        "Memory alignment needed for reads straight into caller buffers.",
                    ),
                    Statistic::byte_size(
                        name,
                        "Logical sector size",
                        self.config.logical_sector_size,
                        "Alignment of file offsets and read sizes.",
                    ),
                    Statistic::integer(
                        name,
                        "IO channel count",
                        self.config.io_channels as i64,
                        "The number of reads the device processes in parallel.",
                    ),
                    Statistic::integer(
                        name,
                        "Overcommit",
                        self.config.overcommit as i64,
                        "Additional requests accepted beyond the channel count.",
                    ),
                    Statistic::boolean(
                        name,
                        "Has seek penalty",
                        options.has_seek_penalty,
                        "Whether non-sequential reads pay a seek penalty.",
                    ),
                    Statistic::boolean(
                        name,
                        "Unbuffered reads enabled",
                        options.enable_unbuffered_reads,
                        "Whether reads are widened to sector boundaries.",
                    ),
                    Statistic::boolean(
                        name,
                        "Enable sharing",
                        options.enable_sharing,
                        "Whether other readers can open files this drive holds open.",
                    ),
                    Statistic::boolean(
                        name,
                        "Minimal reporting",
                        options.minimal_reporting,
                        "Whether this node only reports problems.",
                    ),
                    Statistic::reference_string(
                        name,
                        "Next node",
                        self.next.as_deref().map_or("<None>", |next| next.name()),
                        "The node that follows this node.",
                    ),
                ]
            }
            ReportType::FileLocks => self
                .file_cache
                .open_paths()
                .map(|path| {
                    Statistic::persistent_string(name, "File lock", path.relative_path(), "A file held open by this drive.")
                })
                .collect(),
        }
    }

    /// Starts the read at the front of the queue. Returns false if it has to wait.
    fn start_read(&mut self, ctx: &mut StreamerContext, id: RequestId) -> bool {
        if self.active_reads >= self.max_active_reads {
            return false;
        }
        let Some(channel) = self.channels.iter().position(Option::is_none) else {
            return false;
        };
        let Some(Command::Read(data)) = ctx.command(id) else {
            debug_assert!(false, "non-read request {} in the read queue", id);
            ctx.complete_request(id, RequestStatus::Failed);
            return true;
        };
        let ReadData {
            output,
            path,
            offset,
            size,
            shared_read,
            ..
        } = data.clone();

        if (output.len() as u64) < size {
            log::warn!(
                "Read of {} bytes from '{}' does not fit its {} byte output buffer",
                size,
                path,
                output.len()
            );
            ctx.complete_request(id, RequestStatus::Failed);
            return true;
        }

        let shared = shared_read || self.config.options.enable_sharing;
        let file = match self.file_cache.acquire(&path, shared) {
            Acquired::File(file) => file,
            Acquired::CacheFull => return false,
            Acquired::Failed(e) => {
                log::debug!("{} failed to open '{}': {}", self.name, path, e);
                // Let the next stage try; at the end of the chain this fails the read.
                self.forward_queue(ctx, id);
                return true;
            }
        };

        let unbuffered = self.config.options.enable_unbuffered_reads;
        let physical = self.config.physical_sector_size;
        let output_aligned = unbuffered && io::is_output_aligned(&output, physical);
        let plan = ReadPlan::new(
            offset,
            size,
            self.config.logical_sector_size,
            output_aligned,
            unbuffered,
        );
        if unbuffered {
            self.direct_reads.push_sample(if plan.direct { 1.0 } else { 0.0 });
        }
        if self.active_path.as_ref() == Some(&path) {
            self.file_switches.push_sample(0.0);
            self.seeks
                .push_sample(if self.active_offset == plan.file_offset { 0.0 } else { 1.0 });
        } else {
            self.file_switches.push_sample(1.0);
            self.seeks.push_sample(0.0);
        }

        let now = Instant::now();
        if self.active_reads == 0 {
            self.active_since = now;
        }
        self.active_reads += 1;
        self.active_offset = plan.end();
        self.active_path = Some(path.clone());
        self.channels[channel] = Some(ActiveRead {
            request: id,
            path,
            size,
            plan,
            started: now,
            canceled: false,
        });
        ctx.set_status(id, RequestStatus::Processing);

        let tx = self.results_tx.clone();
        let sync = ctx.thread_sync().clone();
        let job = move || {
            let result = io::execute(&file, &plan, &output, physical);
            // The receiver only disappears when the drive is dropped.
            let _ = tx.send(ReadOutcome { channel, result });
            sync.wake();
        };
        match &self.pool {
            Some(pool) => pool.spawn(job),
            None => job(),
        }
        true
    }

    /// Completes every read whose I/O has finished.
    fn finalize_reads(&mut self, ctx: &mut StreamerContext) -> bool {
        let mut finalized = false;
        while let Ok(outcome) = self.results_rx.try_recv() {
            let Some(read) = self.channels.get_mut(outcome.channel).and_then(Option::take) else {
                debug_assert!(false, "read finished on idle channel {}", outcome.channel);
                continue;
            };
            finalized = true;
            self.file_cache.release(&read.path);

            let transferred = match &outcome.result {
                Ok(transferred) => *transferred,
                Err(e) => {
                    log::warn!("{} failed to read '{}': {}", self.name, read.path, e);
                    0
                }
            };
            self.active_bytes += transferred;
            self.active_reads -= 1;
            if self.active_reads == 0 {
                self.read_size_average.push_entry(self.active_bytes);
                self.read_time_average.push(self.active_since.elapsed());
                self.active_bytes = 0;
            }

            let status = if read.canceled {
                RequestStatus::Canceled
            } else if outcome.result.is_ok() && read.plan.is_satisfied_by(transferred) {
                RequestStatus::Completed
            } else {
                if outcome.result.is_ok() {
                    log::debug!(
                        "{} read only {} of {} bytes from '{}'",
                        self.name,
                        transferred.saturating_sub(read.plan.copy_back),
                        read.size,
                        read.path
                    );
                }
                RequestStatus::Failed
            };
            ctx.complete_request(read.request, status);
        }
        finalized
    }

    fn file_exists(&mut self, ctx: &mut StreamerContext, id: RequestId) {
        let Some(path) = ctx.command(id).and_then(Command::path).cloned() else {
            return;
        };
        let start = Instant::now();
        let found = self.file_cache.contains(&path)
            || match fs::metadata(path.absolute_path()) {
                Ok(meta) if meta.is_file() => {
                    self.metadata_cache.put(path.clone(), meta.len());
                    true
                }
                _ => false,
            };
        self.exists_time_average.push(start.elapsed());

        if found {
            if let Some(Command::FileExistsCheck(data)) = ctx.command_mut(id) {
                data.found = true;
            }
            ctx.complete_request(id, RequestStatus::Completed);
        } else {
            self.metadata_cache.pop(&path);
            self.forward_queue(ctx, id);
        }
    }

    fn file_metadata(&mut self, ctx: &mut StreamerContext, id: RequestId) {
        let Some(path) = ctx.command(id).and_then(Command::path).cloned() else {
            return;
        };
        let start = Instant::now();
        let size = match self.metadata_cache.get(&path) {
            Some(&size) => Some(size),
            None => self.file_cache.file_size(&path).or_else(|| {
                fs::metadata(path.absolute_path())
                    .ok()
                    .filter(|meta| meta.is_file())
                    .map(|meta| meta.len())
            }),
        };
        self.metadata_time_average.push(start.elapsed());

        match size {
            Some(size) => {
                self.metadata_cache.put(path, size);
                if let Some(Command::FileMetaDataRetrieval(data)) = ctx.command_mut(id) {
                    data.found = true;
                    data.file_size = size;
                }
                ctx.complete_request(id, RequestStatus::Completed);
            }
            None => self.forward_queue(ctx, id),
        }
    }

    fn time_for_bytes(&self, bytes: u64) -> Duration {
        let total_bytes = self.read_size_average.total().max(1) as f64;
        let total_time = self.read_time_average.total().as_micros() as f64;
        Duration::from_micros((bytes as f64 * total_time / total_bytes) as u64)
    }

    fn estimate(
        &self,
        ctx: &mut StreamerContext,
        id: RequestId,
        start: &mut Instant,
        active_path: &mut Option<RequestPath>,
        active_offset: &mut u64,
    ) {
        let (target, offset, size) = match ctx.command(id) {
            Some(Command::Read(data)) => (data.path.clone(), data.offset, data.size),
            Some(Command::CompressedRead(data)) => {
                let info = &data.compression_info;
                (info.archive_filename.clone(), info.offset, info.compressed_size)
            }
            Some(Command::FileExistsCheck(_)) => {
                *start += self.exists_time_average.average();
                ctx.set_estimated_completion(id, *start);
                return;
            }
            Some(Command::FileMetaDataRetrieval(_)) => {
                *start += self.metadata_time_average.average();
                ctx.set_estimated_completion(id, *start);
                return;
            }
            _ => return,
        };

        if size > 0 {
            if active_path.as_ref().is_some_and(|active| *active != target) {
                if !self.file_cache.contains(&target) {
                    *start += self.file_cache.open_time().average();
                }
                *active_offset = u64::MAX;
            }
            if *active_offset != offset && self.config.options.has_seek_penalty {
                *start += AVERAGE_SEEK_TIME;
            }
            *start += self.time_for_bytes(size);
            *active_offset = offset + size;
            *active_path = Some(target);
        }
        ctx.set_estimated_completion(id, *start);
    }

    fn estimate_if_serviced(
        &self,
        ctx: &mut StreamerContext,
        id: RequestId,
        mut start: Instant,
        active_path: &mut Option<RequestPath>,
        active_offset: &mut u64,
    ) {
        let serviced = match ctx.command(id) {
            Some(Command::Read(data)) => self.is_serviced(&data.path),
            Some(Command::FileExistsCheck(data)) => self.is_serviced(&data.path),
            Some(Command::CompressedRead(data)) => {
                self.is_serviced(&data.compression_info.archive_filename)
            }
            _ => false,
        };
        if serviced {
            self.estimate(ctx, id, &mut start, active_path, active_offset);
        }
    }
}

impl StreamStackEntry for StorageDrive {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_next(&mut self, next: Box<dyn StreamStackEntry>) {
        self.next = Some(next);
    }

    fn next(&self) -> Option<&(dyn StreamStackEntry + 'static)> {
        self.next.as_deref()
    }

    fn next_mut(&mut self) -> Option<&mut (dyn StreamStackEntry + 'static)> {
        self.next.as_deref_mut()
    }

    fn prepare_request(&mut self, ctx: &mut StreamerContext, id: RequestId) {
        if let Some(Command::ReadRequest(data)) = ctx.command(id) {
            if self.is_serviced(&data.path) {
                let read = Command::Read(ReadData {
                    output: data.output.clone(),
                    output_size: data.output_size,
                    path: data.path.clone(),
                    offset: data.offset,
                    size: data.size,
                    shared_read: false,
                });
                let child = ctx.new_internal_request(read, Some(id));
                ctx.push_prepared_request(child);
                return;
            }
        }
        match self.next.as_deref_mut() {
            Some(next) => next.prepare_request(ctx, id),
            None => ctx.push_prepared_request(id),
        }
    }

    fn queue_request(&mut self, ctx: &mut StreamerContext, id: RequestId) {
        let Some(command) = ctx.command(id) else {
            debug_assert!(false, "queueing stale request {}", id);
            return;
        };
        match command {
            Command::Read(data) if self.is_serviced(&data.path) => {
                ctx.set_status(id, RequestStatus::Queued);
                self.pending_reads.push_back(id);
                return;
            }
            Command::FileExistsCheck(data) if self.is_serviced(&data.path) => {
                self.pending_checks.push_back(id);
                return;
            }
            Command::FileMetaDataRetrieval(data) if self.is_serviced(&data.path) => {
                self.pending_checks.push_back(id);
                return;
            }
            Command::Cancel(data) => {
                let target = data.target.id();
                if self.cancel(ctx, target) {
                    // This drive serviced the target, so no stage below works on it.
                    ctx.complete_request(id, RequestStatus::Completed);
                    return;
                }
            }
            Command::Flush(data) => {
                let path = data.path.clone();
                self.flush(&path);
            }
            Command::FlushAll => self.flush_all(),
            Command::CreateDedicatedCache(data) => {
                if self.is_serviced(&data.path) {
                    self.file_cache.create_dedicated(data.path.clone());
                }
            }
            Command::DestroyDedicatedCache(data) => {
                let path = data.path.clone();
                if self.file_cache.destroy_dedicated(&path) {
                    self.flush(&path);
                }
            }
            Command::Report(data) => {
                let records = self.report(data.report_type);
                if let Some(Command::Report(data)) = ctx.command_mut(id) {
                    data.output.extend(records);
                }
            }
            _ => {}
        }
        self.forward_queue(ctx, id);
    }

    fn execute_requests(&mut self, ctx: &mut StreamerContext) -> bool {
        let finalized = self.finalize_reads(ctx);

        let mut worked = false;
        if let Some(id) = self.pending_reads.pop_front() {
            if self.start_read(ctx, id) {
                worked = true;
            } else {
                self.pending_reads.push_front(id);
                worked = self.start_cached_read(ctx);
            }
        } else if let Some(id) = self.pending_checks.pop_front() {
            match ctx.command(id) {
                Some(Command::FileExistsCheck(_)) => self.file_exists(ctx, id),
                Some(Command::FileMetaDataRetrieval(_)) => self.file_metadata(ctx, id),
                _ => debug_assert!(false, "unsupported request {} in the check queue", id),
            }
            worked = true;
        }

        let below = self
            .next
            .as_deref_mut()
            .is_some_and(|next| next.execute_requests(ctx));
        below || finalized || worked
    }

    fn update_status(&self, status: &mut Status) {
        if let Some(next) = self.next.as_deref() {
            next.update_status(status);
        }
        status.num_available_slots = status.num_available_slots.min(self.available_slots());
        status.is_idle &=
            self.pending_reads.is_empty() && self.pending_checks.is_empty() && self.active_reads == 0;
    }

    fn update_completion_estimates(
        &mut self,
        ctx: &mut StreamerContext,
        now: Instant,
        internal_pending: &mut Vec<RequestId>,
        pending: &[RequestId],
    ) {
        if let Some(next) = self.next.as_deref_mut() {
            next.update_completion_estimates(ctx, now, internal_pending, pending);
        }

        let mut active_path = self.active_path.clone();
        let mut active_offset = self.active_offset;

        let mut earliest_slot: Option<Instant> = None;
        for read in self.channels.iter().flatten() {
            let end = read.started + self.time_for_bytes(read.plan.read_size);
            earliest_slot = Some(earliest_slot.map_or(end, |t| t.min(end)));
            ctx.set_estimated_completion(read.request, end);
        }
        let mut start = earliest_slot.unwrap_or(now);

        for &id in self.pending_reads.iter().chain(self.pending_checks.iter()) {
            self.estimate(ctx, id, &mut start, &mut active_path, &mut active_offset);
        }
        // Stages above pushed their requests top-down; estimates build bottom-up.
        for &id in internal_pending.iter().rev() {
            self.estimate_if_serviced(ctx, id, start, &mut active_path, &mut active_offset);
        }
        for &id in pending {
            self.estimate_if_serviced(ctx, id, start, &mut active_path, &mut active_offset);
        }
    }

    fn collect_statistics(&self, statistics: &mut Vec<Statistic>) {
        let name = self.name.as_str();
        let total_seconds = self.read_time_average.total().as_secs_f64();
        let speed = if total_seconds > 0.0 {
            self.read_size_average.total() as f64 / total_seconds
        } else {
            0.0
        };
        statistics.push(Statistic::bytes_per_second(
            name,
            "Read Speed",
            speed,
            "The average read speed this drive achieved.",
        ));
        statistics.push(Statistic::time_range(
            name,
            "File Open & Close",
            self.file_cache.open_time(),
            "The time needed to open file handles.",
        ));
        statistics.push(Statistic::time_range(
            name,
            "Get file exists",
            &self.exists_time_average,
            "The time needed to check if a file exists.",
        ));
        statistics.push(Statistic::time_range(
            name,
            "Get file meta data",
            &self.metadata_time_average,
            "The time needed to retrieve the size of a file.",
        ));
        statistics.push(Statistic::integer(
            name,
            "Available slots",
            self.available_slots() as i64,
            "The number of requests this drive accepts before it is saturated.",
        ));
        statistics.push(Statistic::percentage_range(
            name,
            "File switches",
            &self.file_switches,
            "The share of reads that switched to a different file.",
        ));
        statistics.push(Statistic::percentage_range(
            name,
            "Seeks",
            &self.seeks,
            "The share of reads that did not continue where the previous read ended.",
        ));
        statistics.push(Statistic::percentage_range(
            name,
            "Direct reads (no internal alloc)",
            &self.direct_reads,
            "The share of reads that needed no aligned scratch buffer.",
        ));

        if let Some(next) = self.next.as_deref() {
            next.collect_statistics(statistics);
        }
    }
}

impl Drop for StorageDrive {
    fn drop(&mut self) {
        if !self.config.options.minimal_reporting {
            log::info!("{} destroyed", self.name);
        }
    }
}

impl std::fmt::Debug for StorageDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageDrive")
            .field("name", &self.name)
            .field("pending_reads", &self.pending_reads.len())
            .field("pending_checks", &self.pending_checks.len())
            .field("active_reads", &self.active_reads)
            .finish_non_exhaustive()
    }
}
