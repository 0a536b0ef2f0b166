//! The middle stage: transparent reads from compressed archives.
//!
//! [`ArchiveDecompressor`] looks every read up in a [`CompressionLookup`]. A
//! read of an archived file is rewritten before it is scheduled:
//!
//! - a compressed entry becomes a `CompressedRead`, served by this stage;
//! - an entry stored without compression becomes a plain `Read` of the
//!   archive, served by the stages below.
//!
//! A `CompressedRead` moves through a read slot and a decompression slot:
//!
//! ```text
//! pending ─► Unused ─► ReadInFlight ─► PendingDecompression ─► Unused
//!                          │                    │
//!                  archive Read below     job on the decompression pool
//! ```
//!
//! The archive read is issued to the next stage. Once it lands, a `Wait`
//! child keeps the compressed request open and the buffer waits for a
//! decompression slot. When a job starts, the buffer moves into the job and
//! the read slot is immediately free again. Finished jobs report back over a
//! channel and are finalized on the scheduling thread.
//!
//! # Loose files
//!
//! When an entry's policy is [`ConflictResolution::PreferFile`], an exists
//! check for the loose file is sent to the next stage first. A found file
//! rejects the archive-bound rewrite and prepares the original read again
//! below this stage. The check and the branch both run on the scheduling
//! thread, but the file system can still change between them; a file
//! deleted in that window fails the read.
//!
//! [`ConflictResolution::PreferFile`]: crate::compression::ConflictResolution::PreferFile

mod config;
mod slots;
mod task;

pub use config::DecompressorConfig;
pub use task::{full_decompression, partial_decompression};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use self::slots::{DecompressionTask, ReadBufferStatus, ReadSlots};
use self::task::{Job, JobOutcome};
use crate::buffer::{BufferTracker, OutputBuffer, align_down};
use crate::compression::{CompressionInfo, CompressionLookup, ConflictResolution};
use crate::context::StreamerContext;
use crate::request::command::{
    CompressedReadData, FileExistsCheckData, ReadData, ReadRequestData,
};
use crate::request::{Command, Completion, ReportType, RequestId, RequestStatus};
use crate::stack::{StreamStackEntry, Status, complete_unhandled};
use crate::stats::{AverageWindow, Statistic, TimedAverageWindow};

const STAT_WINDOW: usize = 64;

/// Reads files stored inside archives and decompresses them.
pub struct ArchiveDecompressor {
    name: String,
    lookup: Arc<dyn CompressionLookup>,
    config: DecompressorConfig,

    pending_reads: VecDeque<RequestId>,
    pending_checks: VecDeque<RequestId>,
    read_slots: ReadSlots,
    tasks: Vec<Option<DecompressionTask>>,
    running_tasks: usize,
    /// Loose-file checks in flight, mapped to the archive-bound rewrite they decide on.
    conflict_checks: HashMap<RequestId, RequestId>,

    pool: Option<rayon::ThreadPool>,
    results_tx: Sender<JobOutcome>,
    results_rx: Receiver<JobOutcome>,
    buffers: Arc<BufferTracker>,

    job_delay: TimedAverageWindow<STAT_WINDOW>,
    job_duration: TimedAverageWindow<STAT_WINDOW>,
    job_bytes: AverageWindow<STAT_WINDOW>,
    failed_jobs: u64,

    next: Option<Box<dyn StreamStackEntry>>,
}

impl ArchiveDecompressor {
    /// Creates a decompressor answering archive lookups through `lookup`.
    ///
    /// Never fails: unusable configuration values are logged and corrected.
    pub fn new(config: DecompressorConfig, lookup: Arc<dyn CompressionLookup>) -> Self {
        let name = "Archive decompressor".to_owned();
        let config = config.corrected(&name);
        if !config.minimal_reporting {
            log::info!("{} created", name);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_num_tasks as usize)
            .thread_name(|i| format!("stackio-decompress-{}", i))
            .build()
            .map_err(|e| {
                log::error!(
                    "{} could not start its decompression threads, decompressing on the scheduling thread: {}",
                    name,
                    e
                )
            })
            .ok();
        let (results_tx, results_rx) = mpsc::channel();

        Self {
            read_slots: ReadSlots::new(config.max_num_reads as usize),
            tasks: (0..config.max_num_tasks).map(|_| None).collect(),
            name,
            lookup,
            config,
            pending_reads: VecDeque::new(),
            pending_checks: VecDeque::new(),
            running_tasks: 0,
            conflict_checks: HashMap::new(),
            pool,
            results_tx,
            results_rx,
            buffers: BufferTracker::new(),
            job_delay: TimedAverageWindow::new(),
            job_duration: TimedAverageWindow::new(),
            job_bytes: AverageWindow::new(),
            failed_jobs: 0,
            next: None,
        }
    }

    /// Returns the effective configuration after corrections.
    pub fn config(&self) -> &DecompressorConfig {
        &self.config
    }

    /// Returns the number of read slots not holding a buffer.
    pub fn available_read_slots(&self) -> usize {
        self.read_slots.count(ReadBufferStatus::Unused)
    }

    /// Returns the number of decompression slots not running a job.
    pub fn available_decompression_slots(&self) -> usize {
        self.tasks.len() - self.running_tasks
    }

    /// Returns the number of buffers waiting for a decompression slot.
    pub fn pending_decompressions(&self) -> usize {
        self.read_slots.count(ReadBufferStatus::PendingDecompression)
    }

    /// Returns the tracker of compressed buffer memory.
    pub fn buffer_usage(&self) -> &Arc<BufferTracker> {
        &self.buffers
    }

    fn forward_prepare(&mut self, ctx: &mut StreamerContext, id: RequestId) {
        match self.next.as_deref_mut() {
            Some(next) => next.prepare_request(ctx, id),
            None => ctx.push_prepared_request(id),
        }
    }

    fn forward_queue(&mut self, ctx: &mut StreamerContext, id: RequestId) {
        match self.next.as_deref_mut() {
            Some(next) => next.queue_request(ctx, id),
            None => complete_unhandled(ctx, id),
        }
    }

    /// Builds the archive-bound child of a read. Returns `None` if the
    /// requested range lies outside the entry.
    fn rewrite(
        &self,
        ctx: &mut StreamerContext,
        id: RequestId,
        data: &ReadRequestData,
        info: CompressionInfo,
    ) -> Option<RequestId> {
        let in_range = data
            .offset
            .checked_add(data.size)
            .is_some_and(|end| end <= info.uncompressed_size);
        if !in_range {
            log::warn!(
                "Read of {}+{} from '{}' lies outside its archived size of {} bytes",
                data.offset,
                data.size,
                data.path,
                info.uncompressed_size
            );
            return None;
        }

        let command = if info.is_compressed {
            Command::CompressedRead(CompressedReadData {
                compression_info: info,
                output: data.output.clone(),
                read_offset: data.offset,
                read_size: data.size,
            })
        } else {
            Command::Read(ReadData {
                output: data.output.clone(),
                output_size: data.output_size,
                shared_read: info.is_shared_pak,
                path: info.archive_filename,
                offset: info.offset + data.offset,
                size: data.size,
            })
        };
        Some(ctx.new_internal_request(command, Some(id)))
    }

    /// Sends a loose-file check below this stage; the rewrite waits for its answer.
    fn start_conflict_check(
        &mut self,
        ctx: &mut StreamerContext,
        id: RequestId,
        child: RequestId,
        data: &ReadRequestData,
    ) {
        let check = ctx.new_internal_request(
            Command::FileExistsCheck(FileExistsCheckData {
                path: data.path.clone(),
                found: false,
            }),
            Some(id),
        );
        ctx.set_completion(check, Completion::Stage);
        self.conflict_checks.insert(check, child);
        self.forward_queue(ctx, check);
    }

    fn finish_conflict_check(&mut self, ctx: &mut StreamerContext, check: RequestId, child: RequestId) {
        let status = ctx.status(check).unwrap_or(RequestStatus::Failed);
        if status != RequestStatus::Completed {
            ctx.complete_request(child, status);
            return;
        }
        let found = matches!(
            ctx.command(check),
            Some(Command::FileExistsCheck(FileExistsCheckData { found: true, .. }))
        );
        if !found {
            ctx.push_prepared_request(child);
            return;
        }
        log::trace!("Loose file preferred over archived copy for {}", check);
        if let Some(parent) = ctx.reject_request(child) {
            self.forward_prepare(ctx, parent);
        }
    }

    fn start_archive_read(&mut self, ctx: &mut StreamerContext) -> bool {
        let Some(index) = self.read_slots.find_unused() else {
            return false;
        };
        let Some(id) = self.pending_reads.pop_front() else {
            return false;
        };
        let Some(Command::CompressedRead(data)) = ctx.command(id) else {
            debug_assert!(false, "non-compressed request {} in the read queue", id);
            return true;
        };
        let info = &data.compression_info;
        let read_offset = align_down(info.offset, self.config.alignment);
        let offset_adjustment = info.offset - read_offset;
        let read_size = info.compressed_size + offset_adjustment;
        let buffer = OutputBuffer::new(read_size as usize);
        let guard = self.buffers.track(read_size as usize);
        let read = Command::Read(ReadData {
            output: buffer.clone(),
            output_size: read_size,
            path: info.archive_filename.clone(),
            offset: read_offset,
            size: read_size,
            shared_read: info.is_shared_pak,
        });

        let read = ctx.new_internal_request(read, Some(id));
        ctx.set_completion(read, Completion::Stage);
        ctx.set_status(id, RequestStatus::Processing);

        let slot = &mut self.read_slots[index];
        slot.status = ReadBufferStatus::ReadInFlight;
        slot.request = Some(id);
        slot.read = Some(read);
        slot.buffer = Some((buffer, guard));
        slot.offset_adjustment = offset_adjustment;

        self.forward_queue(ctx, read);
        true
    }

    fn finish_archive_read(&mut self, ctx: &mut StreamerContext, index: usize, read: RequestId) {
        let status = ctx.status(read).unwrap_or(RequestStatus::Failed);
        let slot = &mut self.read_slots[index];
        let Some(request) = slot.request else {
            slot.reset();
            return;
        };
        if status != RequestStatus::Completed {
            // The read's outcome reaches the compressed request through the parent link.
            log::debug!("Archive read {} for {} ended as {}", read, request, status);
            slot.reset();
            return;
        }
        let wait = ctx.new_internal_request(Command::Wait, Some(request));
        let slot = &mut self.read_slots[index];
        slot.status = ReadBufferStatus::PendingDecompression;
        slot.read = None;
        slot.wait = Some(wait);
        slot.ready_since = Instant::now();
    }

    fn start_decompressions(&mut self, ctx: &mut StreamerContext) -> bool {
        let mut started = false;
        while let Some(index) = self.read_slots.find_pending_decompression() {
            let Some(task) = self.tasks.iter().position(Option::is_none) else {
                break;
            };
            let slot = &mut self.read_slots[index];
            let (Some(request), Some(wait), Some((compressed, guard))) =
                (slot.request, slot.wait, slot.buffer.take())
            else {
                debug_assert!(false, "read slot {} is missing its bookkeeping", index);
                slot.reset();
                continue;
            };
            let offset_adjustment = slot.offset_adjustment;
            let queued = slot.ready_since;
            slot.reset();

            let Some(Command::CompressedRead(data)) = ctx.command(request) else {
                ctx.complete_request(wait, RequestStatus::Failed);
                continue;
            };
            let job = Job {
                task,
                info: data.compression_info.clone(),
                compressed,
                offset_adjustment,
                output: data.output.clone(),
                read_offset: data.read_offset,
                read_size: data.read_size,
            };
            self.tasks[task] = Some(DecompressionTask {
                request,
                wait,
                compressed_size: job.info.compressed_size,
                uncompressed_size: job.info.uncompressed_size,
                queued,
                dispatched: Instant::now(),
                canceled: false,
                _guard: guard,
            });
            self.running_tasks += 1;
            started = true;

            let tx = self.results_tx.clone();
            let sync = ctx.thread_sync().clone();
            let run = move || {
                let _ = tx.send(job.run());
                sync.wake();
            };
            match &self.pool {
                Some(pool) => pool.spawn(run),
                None => run(),
            }
        }
        started
    }

    fn finish_decompressions(&mut self, ctx: &mut StreamerContext) -> bool {
        let mut finished = false;
        while let Ok(outcome) = self.results_rx.try_recv() {
            let Some(task) = self.tasks.get_mut(outcome.task).and_then(Option::take) else {
                debug_assert!(false, "decompression finished on idle slot {}", outcome.task);
                continue;
            };
            finished = true;
            self.running_tasks -= 1;

            self.job_delay
                .push(outcome.started.saturating_duration_since(task.queued));
            self.job_duration
                .push(outcome.finished.saturating_duration_since(outcome.started));
            self.job_bytes.push_entry(task.compressed_size);

            let status = if task.canceled {
                RequestStatus::Canceled
            } else if outcome.success {
                RequestStatus::Completed
            } else {
                self.failed_jobs += 1;
                log::warn!(
                    "Decompression of {} bytes into {} bytes failed for {}",
                    task.compressed_size,
                    task.uncompressed_size,
                    task.request
                );
                RequestStatus::Failed
            };
            ctx.complete_request(task.wait, status);
        }
        finished
    }

    fn service_check(&mut self, ctx: &mut StreamerContext) -> bool {
        let Some(id) = self.pending_checks.pop_front() else {
            return false;
        };
        let archived = ctx
            .command(id)
            .and_then(Command::path)
            .and_then(|path| self.lookup.find(path));
        match archived {
            Some(_) => {
                if let Some(Command::FileExistsCheck(data)) = ctx.command_mut(id) {
                    data.found = true;
                }
                ctx.complete_request(id, RequestStatus::Completed);
            }
            None => self.forward_queue(ctx, id),
        }
        true
    }

    fn cancel(&mut self, ctx: &mut StreamerContext, target: u64) {
        for queue in [&mut self.pending_reads, &mut self.pending_checks] {
            let (canceled, kept): (VecDeque<_>, VecDeque<_>) =
                queue.drain(..).partition(|&id| ctx.works_on(id, target));
            *queue = kept;
            for id in canceled {
                ctx.complete_request(id, RequestStatus::Canceled);
            }
        }
        for slot in self.read_slots.iter_mut() {
            if slot.status != ReadBufferStatus::PendingDecompression {
                continue;
            }
            let (Some(request), Some(wait)) = (slot.request, slot.wait) else {
                continue;
            };
            if ctx.works_on(request, target) {
                ctx.complete_request(wait, RequestStatus::Canceled);
                slot.reset();
            }
        }
        for task in self.tasks.iter_mut().flatten() {
            if ctx.works_on(task.request, target) {
                task.canceled = true;
            }
        }
    }

    fn decompression_time(&self, compressed_size: u64) -> Duration {
        let bytes = self.job_bytes.total();
        if bytes == 0 {
            return Duration::ZERO;
        }
        let micros = self.job_duration.total().as_micros() as f64;
        Duration::from_micros((compressed_size as f64 * micros / bytes as f64) as u64)
    }

    /// Books the earliest free decompression slot for a job whose input is
    /// ready at `ready`, returning when the job should finish.
    fn book_slot(&self, slot_free: &mut [Instant], ready: Instant, compressed_size: u64) -> Instant {
        let Some(earliest) = slot_free.iter_mut().min() else {
            return ready;
        };
        let start = (*earliest).max(ready) + self.job_delay.average();
        let end = start + self.decompression_time(compressed_size);
        *earliest = end;
        end
    }

    fn report(&self) -> Vec<Statistic> {
        let name = self.name.as_str();
        vec![
            Statistic::integer(
                name,
                "Max concurrent reads",
                self.read_slots.len() as i64,
                "The number of compressed reads that can be in flight at once.",
            ),
            Statistic::integer(
                name,
                "Max concurrent decompressions",
                self.tasks.len() as i64,
                "The number of decompression jobs that can run at once.",
            ),
            Statistic::byte_size(
                name,
                "Alignment",
                self.config.alignment,
                "Boundary compressed reads are aligned to.",
            ),
            Statistic::reference_string(
                name,
                "Next node",
                self.next.as_deref().map_or("<None>", |next| next.name()),
                "The node that follows this node.",
            ),
        ]
    }
}

impl StreamStackEntry for ArchiveDecompressor {
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
        let Some(Command::ReadRequest(data)) = ctx.command(id) else {
            self.forward_prepare(ctx, id);
            return;
        };
        let Some(info) = self.lookup.find(&data.path) else {
            self.forward_prepare(ctx, id);
            return;
        };
        let data = data.clone();
        let policy = info.conflict_resolution;
        let Some(child) = self.rewrite(ctx, id, &data, info) else {
            ctx.complete_request(id, RequestStatus::Failed);
            return;
        };
        match policy {
            ConflictResolution::PreferFile => self.start_conflict_check(ctx, id, child, &data),
            ConflictResolution::PreferArchive | ConflictResolution::UseArchiveOnly => {
                ctx.push_prepared_request(child)
            }
        }
    }

    fn queue_request(&mut self, ctx: &mut StreamerContext, id: RequestId) {
        let Some(command) = ctx.command(id) else {
            debug_assert!(false, "queueing stale request {}", id);
            return;
        };
        match command {
            Command::CompressedRead(_) => {
                ctx.set_status(id, RequestStatus::Queued);
                self.pending_reads.push_back(id);
                return;
            }
            Command::FileExistsCheck(_) => {
                self.pending_checks.push_back(id);
                return;
            }
            Command::FileMetaDataRetrieval(data) => {
                if let Some(info) = self.lookup.find(&data.path) {
                    if let Some(Command::FileMetaDataRetrieval(data)) = ctx.command_mut(id) {
                        data.found = true;
                        data.file_size = info.uncompressed_size;
                    }
                    ctx.complete_request(id, RequestStatus::Completed);
                    return;
                }
            }
            Command::Cancel(data) => {
                let target = data.target.id();
                self.cancel(ctx, target);
            }
            Command::Report(data) if data.report_type == ReportType::Config => {
                let records = self.report();
                if let Some(Command::Report(data)) = ctx.command_mut(id) {
                    data.output.extend(records);
                }
            }
            _ => {}
        }
        self.forward_queue(ctx, id);
    }

    fn execute_requests(&mut self, ctx: &mut StreamerContext) -> bool {
        let mut worked = self.finish_decompressions(ctx);
        if self.read_slots.find_pending_decompression().is_some()
            && self.running_tasks < self.tasks.len()
        {
            worked |= self.start_decompressions(ctx);
        } else if !self.pending_reads.is_empty() && self.read_slots.find_unused().is_some() {
            worked |= self.start_archive_read(ctx);
        } else if !worked {
            worked = self.service_check(ctx);
        }

        let below = self
            .next
            .as_deref_mut()
            .is_some_and(|next| next.execute_requests(ctx));
        below || worked
    }

    fn handle_completion(&mut self, ctx: &mut StreamerContext, id: RequestId) -> bool {
        if let Some(child) = self.conflict_checks.remove(&id) {
            self.finish_conflict_check(ctx, id, child);
            return true;
        }
        if let Some(index) = self.read_slots.find_read(id) {
            self.finish_archive_read(ctx, index, id);
            return true;
        }
        self.next
            .as_deref_mut()
            .is_some_and(|next| next.handle_completion(ctx, id))
    }

    fn update_status(&self, status: &mut Status) {
        if let Some(next) = self.next.as_deref() {
            next.update_status(status);
        }
        let available = self.available_read_slots() as i32 - self.pending_reads.len() as i32;
        status.num_available_slots = status.num_available_slots.min(available);
        status.is_idle &= self.pending_reads.is_empty()
            && self.pending_checks.is_empty()
            && self.conflict_checks.is_empty()
            && self.available_read_slots() == self.read_slots.len()
            && self.running_tasks == 0;
    }

    fn update_completion_estimates(
        &mut self,
        ctx: &mut StreamerContext,
        now: Instant,
        internal_pending: &mut Vec<RequestId>,
        pending: &[RequestId],
    ) {
        // Compressed reads waiting here still need their archive read below.
        let first_own = internal_pending.len();
        internal_pending.extend(self.pending_reads.iter().copied());
        if let Some(next) = self.next.as_deref_mut() {
            next.update_completion_estimates(ctx, now, internal_pending, pending);
        }

        let mut slot_free: Vec<Instant> = self
            .tasks
            .iter()
            .map(|task| match task {
                Some(task) => {
                    let end = task.dispatched + self.decompression_time(task.compressed_size);
                    ctx.set_estimated_completion(task.wait, end.max(now));
                    end.max(now)
                }
                None => now,
            })
            .collect();

        // Buffers already read go first, in the order they became ready.
        let mut ready: Vec<(Instant, RequestId, u64)> = Vec::new();
        let mut reading: Vec<(Instant, RequestId, u64)> = Vec::new();
        for slot in self.read_slots.iter() {
            let Some(request) = slot.request else {
                continue;
            };
            let Some(Command::CompressedRead(data)) = ctx.command(request) else {
                continue;
            };
            let size = data.compression_info.compressed_size;
            match (slot.status, slot.wait, slot.read) {
                (ReadBufferStatus::PendingDecompression, Some(wait), _) => {
                    ready.push((slot.ready_since, wait, size))
                }
                (ReadBufferStatus::ReadInFlight, _, Some(read)) => {
                    let landed = ctx
                        .request(read)
                        .and_then(|r| r.estimated_completion())
                        .unwrap_or(now);
                    reading.push((landed, request, size));
                }
                _ => {}
            }
        }
        ready.sort_by_key(|entry| entry.0);
        for (_, wait, size) in ready {
            let end = self.book_slot(&mut slot_free, now, size);
            ctx.set_estimated_completion(wait, end);
        }
        reading.sort_by_key(|entry| entry.0);
        for (landed, request, size) in reading {
            let end = self.book_slot(&mut slot_free, landed.max(now), size);
            ctx.set_estimated_completion(request, end);
        }

        let queued: Vec<RequestId> = internal_pending[first_own..]
            .iter()
            .chain(pending.iter())
            .copied()
            .collect();
        internal_pending.truncate(first_own);
        for id in queued {
            let size = match ctx.command(id) {
                Some(Command::CompressedRead(data)) => data.compression_info.compressed_size,
                _ => continue,
            };
            let landed = ctx
                .request(id)
                .and_then(|r| r.estimated_completion())
                .unwrap_or(now);
            let end = self.book_slot(&mut slot_free, landed.max(now), size);
            ctx.set_estimated_completion(id, end);
        }
    }

    fn collect_statistics(&self, statistics: &mut Vec<Statistic>) {
        let name = self.name.as_str();
        let seconds = self.job_duration.total().as_secs_f64();
        let speed = if seconds > 0.0 {
            self.job_bytes.total() as f64 / seconds
        } else {
            0.0
        };
        statistics.push(Statistic::integer(
            name,
            "Available read slots",
            self.available_read_slots() as i64,
            "The number of read buffers ready to receive compressed data.",
        ));
        statistics.push(Statistic::integer(
            name,
            "Available decompression slots",
            self.available_decompression_slots() as i64,
            "The number of decompression jobs that can still start.",
        ));
        statistics.push(Statistic::integer(
            name,
            "Pending decompressions",
            self.pending_decompressions() as i64,
            "Compressed buffers waiting for a decompression slot.",
        ));
        statistics.push(Statistic::bytes_per_second(
            name,
            "Decompression speed",
            speed,
            "Compressed bytes processed per second of decompression.",
        ));
        statistics.push(Statistic::time_range(
            name,
            "Decompression job delay",
            &self.job_delay,
            "Time between compressed data arriving and its job starting.",
        ));
        statistics.push(Statistic::time_range(
            name,
            "Decompression duration",
            &self.job_duration,
            "Time spent decompressing a single entry.",
        ));
        statistics.push(Statistic::byte_size(
            name,
            "Bytes per decompression",
            self.job_bytes.calculate_average(),
            "Average compressed size of a decompressed entry.",
        ));
        statistics.push(Statistic::byte_size(
            name,
            "Peak buffer memory",
            self.buffers.peak_usage() as u64,
            "The most memory held by compressed buffers at once.",
        ));
        statistics.push(Statistic::integer(
            name,
            "Failed decompressions",
            self.failed_jobs as i64,
            "Jobs whose decompressor rejected its input.",
        ));

        if let Some(next) = self.next.as_deref() {
            next.collect_statistics(statistics);
        }
    }
}

impl Drop for ArchiveDecompressor {
    fn drop(&mut self) {
        if !self.config.minimal_reporting {
            log::info!("{} destroyed", self.name);
        }
    }
}

impl std::fmt::Debug for ArchiveDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveDecompressor")
            .field("pending_reads", &self.pending_reads.len())
            .field("pending_checks", &self.pending_checks.len())
            .field("available_read_slots", &self.available_read_slots())
            .field("running_tasks", &self.running_tasks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::ArchiveRegistry;
    use crate::request::FileRequestPtr;
    use crate::RequestPath;

    /// Serves `Read`s from memory on the calling thread.
    struct MemoryDrive {
        data: Vec<u8>,
        next: Option<Box<dyn StreamStackEntry>>,
    }

    impl StreamStackEntry for MemoryDrive {
        fn name(&self) -> &str {
            "Memory drive"
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
        fn queue_request(&mut self, ctx: &mut StreamerContext, id: RequestId) {
            if let Some(Command::Read(read)) = ctx.command(id) {
                let start = read.offset as usize;
                let ok = self
                    .data
                    .get(start..start + read.size as usize)
                    .is_some_and(|bytes| read.output.write_at(0, bytes));
                let status = if ok {
                    RequestStatus::Completed
                } else {
                    RequestStatus::Failed
                };
                ctx.complete_request(id, status);
                return;
            }
            complete_unhandled(ctx, id);
        }
    }

    fn stack(data: Vec<u8>, registry: Arc<ArchiveRegistry>) -> ArchiveDecompressor {
        let mut stage = ArchiveDecompressor::new(
            DecompressorConfig::new().alignment(16).minimal_reporting(true),
            registry,
        );
        stage.set_next(Box::new(MemoryDrive {
            data,
            next: None,
        }));
        stage
    }

    fn run(stage: &mut ArchiveDecompressor, ctx: &mut StreamerContext, ptr: &FileRequestPtr) {
        let id = ctx.adopt_external_request(ptr).unwrap();
        stage.prepare_request(ctx, id);
        let deadline = Instant::now() + Duration::from_secs(10);
        while !ptr.is_finished() && Instant::now() < deadline {
            while let Some(prepared) = ctx.pop_prepared_request() {
                stage.queue_request(ctx, prepared);
            }
            let worked = stage.execute_requests(ctx);
            let finalized = ctx.finalize_completed_requests(stage);
            if !worked && !finalized {
                ctx.thread_sync().wait_timeout(Duration::from_millis(5));
            }
        }
    }

    fn archive() -> RequestPath {
        RequestPath::from_root("/virtual", "data.pak").unwrap()
    }

    fn entry(name: &str) -> RequestPath {
        RequestPath::from_root("/virtual", name).unwrap()
    }

    #[test]
    fn test_compressed_partial_read() {
        let payload: Vec<u8> = (0..100u8).collect();
        let mut pak = vec![0xEE; 37];
        pak.extend_from_slice(&payload);
        let registry = Arc::new(ArchiveRegistry::new());
        registry.register(
            entry("a.bin"),
            CompressionInfo::compressed(archive(), 37, 100, 100, crate::codec::store()),
        );
        let mut stage = stack(pak, registry);
        let mut ctx = StreamerContext::new();

        let output = OutputBuffer::filled(14, 0x55);
        let ptr = FileRequestPtr::read(entry("a.bin"), output.clone(), 40, 10);
        run(&mut stage, &mut ctx, &ptr);

        assert_eq!(ptr.status(), RequestStatus::Completed);
        let out = output.to_vec();
        assert_eq!(&out[..10], &payload[40..50]);
        assert_eq!(&out[10..], &[0x55; 4]);
        assert_eq!(stage.available_read_slots(), 2);
        assert_eq!(stage.available_decompression_slots(), 2);
        assert_eq!(stage.buffer_usage().current_usage(), 0);
        assert_eq!(ctx.live_requests(), 0);
    }

    #[test]
    fn test_failed_decompression_fails_read() {
        let registry = Arc::new(ArchiveRegistry::new());
        let reject: crate::codec::DecompressFn =
            Arc::new(|_: &CompressionInfo, _: &[u8], _: &mut [u8]| false);
        registry.register(entry("bad.bin"), CompressionInfo::compressed(archive(), 0, 8, 8, reject));
        let mut stage = stack(vec![1; 8], registry);
        let mut ctx = StreamerContext::new();

        let ptr = FileRequestPtr::read(entry("bad.bin"), OutputBuffer::new(8), 0, 8);
        run(&mut stage, &mut ctx, &ptr);
        assert_eq!(ptr.status(), RequestStatus::Failed);
        assert_eq!(stage.buffer_usage().current_usage(), 0);
        assert_eq!(stage.available_read_slots(), 2);
    }

    #[test]
    fn test_out_of_range_read_fails() {
        let registry = Arc::new(ArchiveRegistry::new());
        registry.register(entry("small.bin"), CompressionInfo::stored(archive(), 0, 4));
        let mut stage = stack(vec![0; 4], registry);
        let mut ctx = StreamerContext::new();
        let ptr = FileRequestPtr::read(entry("small.bin"), OutputBuffer::new(8), 2, 8);
        run(&mut stage, &mut ctx, &ptr);
        assert_eq!(ptr.status(), RequestStatus::Failed);
    }

    #[test]
    fn test_archived_paths_answer_checks() {
        let registry = Arc::new(ArchiveRegistry::new());
        registry.register(entry("x.bin"), CompressionInfo::stored(archive(), 0, 77));
        let mut stage = stack(Vec::new(), registry);
        let mut ctx = StreamerContext::new();

        let exists = FileRequestPtr::file_exists_check(entry("x.bin"));
        run(&mut stage, &mut ctx, &exists);
        assert_eq!(exists.found(), Some(true));

        let missing = FileRequestPtr::file_exists_check(entry("y.bin"));
        run(&mut stage, &mut ctx, &missing);
        assert_eq!(missing.status(), RequestStatus::Completed);
        assert_eq!(missing.found(), Some(false));

        let meta = FileRequestPtr::file_metadata(entry("x.bin"));
        run(&mut stage, &mut ctx, &meta);
        assert_eq!(meta.file_size(), Some(77));
    }

    #[test]
    fn test_config_report_names_next_node() {
        let mut stage = stack(Vec::new(), Arc::new(ArchiveRegistry::new()));
        let mut ctx = StreamerContext::new();
        let report = FileRequestPtr::report(ReportType::Config);
        run(&mut stage, &mut ctx, &report);
        let records = report.report_output().unwrap();
        let next = crate::stats::find(&records, "Archive decompressor", "Next node").unwrap();
        assert_eq!(next.value.to_string(), "Memory drive");
    }
}
