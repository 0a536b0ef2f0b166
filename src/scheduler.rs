//! The top of the pipeline: admission, ordering and the per-tick loop.
//!
//! A [`Scheduler`] owns the [`StreamerContext`] and the stack. It is fully
//! deterministic and single-threaded, so tests can drive it tick by tick;
//! [`Streamer`](crate::Streamer) runs one on a dedicated thread.
//!
//! Every [`tick`](Scheduler::tick):
//!
//! 1. prepares newly submitted requests (control commands skip the prepared
//!    queue and go straight down the stack);
//! 2. orders the prepared queue by priority, then deadline;
//! 3. queues prepared requests while the stack reports free slots;
//! 4. lets every stage execute;
//! 5. finalizes completed requests;
//! 6. refreshes completion estimates.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use stackio::scheduler::{Scheduler, SchedulerConfig};
//! use stackio::storage::{StorageDrive, StorageDriveConfig};
//! use stackio::{FileRequestPtr, OutputBuffer, RequestPath};
//!
//! let drive = StorageDrive::new(StorageDriveConfig::new().drive_path("/data"));
//! let mut scheduler = Scheduler::new(Box::new(drive), SchedulerConfig::default());
//!
//! let output = OutputBuffer::new(4096);
//! let path = RequestPath::from_root("/data", "file.bin").unwrap();
//! let read = FileRequestPtr::read(path, output.clone(), 0, 4096);
//! scheduler.submit(&read).unwrap();
//! scheduler.run_until_idle(Duration::from_secs(5));
//! println!("{}", read.status());
//! ```

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::context::{StreamerContext, ThreadSync};
use crate::request::{Command, FileRequestPtr, RequestId, RequestStatus};
use crate::stack::{StreamStackEntry, Status};
use crate::stats::Statistic;
use crate::{Error, Result};

/// Tunables of the scheduling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How long the scheduling thread sleeps when there is nothing to do.
    /// Completions from worker threads wake it early.
    /// Default: 100 ms.
    pub idle_timeout: Duration,

    /// Maximum number of prepared requests handed to the stack per tick.
    /// Default: 64.
    pub max_queued_per_tick: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(100),
            max_queued_per_tick: 64,
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle sleep.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the per-tick admission limit.
    pub fn max_queued_per_tick(mut self, count: usize) -> Self {
        self.max_queued_per_tick = count;
        self
    }

    /// Checks every value strictly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout.is_zero() {
            return Err(Error::invalid_config("idle_timeout", "must be greater than zero"));
        }
        if self.max_queued_per_tick == 0 {
            return Err(Error::invalid_config("max_queued_per_tick", "must be at least 1"));
        }
        Ok(())
    }
}

const OWNER: &str = "Scheduler";

/// Drives a stack on the calling thread.
pub struct Scheduler {
    context: StreamerContext,
    stack: Box<dyn StreamStackEntry>,
    config: SchedulerConfig,
    incoming: VecDeque<RequestId>,
    missed_deadlines: u64,
    ticks: u64,
}

impl Scheduler {
    /// Creates a scheduler for `stack` with its own wake-up signal.
    pub fn new(stack: Box<dyn StreamStackEntry>, config: SchedulerConfig) -> Self {
        Self::with_thread_sync(stack, config, ThreadSync::new())
    }

    /// Creates a scheduler that sleeps on `thread_sync`.
    pub fn with_thread_sync(
        stack: Box<dyn StreamStackEntry>,
        config: SchedulerConfig,
        thread_sync: ThreadSync,
    ) -> Self {
        let mut config = config;
        if config.max_queued_per_tick == 0 {
            log::warn!("Scheduler admission limit of 0 would stall the pipeline. Using 1.");
            config.max_queued_per_tick = 1;
        }
        Self {
            context: StreamerContext::with_thread_sync(thread_sync),
            stack,
            config,
            incoming: VecDeque::new(),
            missed_deadlines: 0,
            ticks: 0,
        }
    }

    /// Accepts a caller's request. It is prepared on the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestAlreadyQueued`] if the request was submitted before.
    pub fn submit(&mut self, request: &FileRequestPtr) -> Result<()> {
        let id = self.context.adopt_external_request(request)?;
        self.incoming.push_back(id);
        Ok(())
    }

    /// Accepts a caller's request whose command was already taken out.
    pub(crate) fn submit_taken(&mut self, request: &FileRequestPtr, command: Command) {
        let id = self.context.adopt_taken_request(request, command);
        self.incoming.push_back(id);
    }

    /// Runs one pass over the pipeline. Returns true if anything happened.
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        let mut worked = self.prepare_incoming();
        self.order_prepared();
        worked |= self.queue_prepared();
        worked |= self.stack.execute_requests(&mut self.context);
        worked |= self.context.finalize_completed_requests(self.stack.as_mut());
        self.update_estimates();
        worked
    }

    /// Ticks until the pipeline is idle or `timeout` elapsed.
    ///
    /// Returns true if the pipeline went idle.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.tick() {
                continue;
            }
            if self.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let sleep = self.config.idle_timeout.min(deadline - now);
            self.context.thread_sync().wait_timeout(sleep);
        }
    }

    /// Returns true if nothing is submitted, prepared, queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.incoming.is_empty()
            && self.context.prepared_requests().is_empty()
            && !self.context.has_completed_requests()
            && self.status().is_idle
    }

    /// Returns the aggregated load of the stack.
    pub fn status(&self) -> Status {
        let mut status = Status::default();
        self.stack.update_status(&mut status);
        status
    }

    /// Collects statistics from the scheduler, the context and every stage.
    pub fn collect_statistics(&self) -> Vec<Statistic> {
        let mut statistics = vec![
            Statistic::integer(
                OWNER,
                "Submitted requests",
                self.incoming.len() as i64,
                "Requests accepted but not yet prepared.",
            ),
            Statistic::integer(
                OWNER,
                "Missed deadlines",
                self.missed_deadlines as i64,
                "Reads that were queued after their deadline had passed.",
            ),
            Statistic::integer(
                OWNER,
                "Ticks",
                self.ticks as i64,
                "Passes over the pipeline since creation.",
            ),
        ];
        self.context.collect_statistics(&mut statistics);
        self.stack.collect_statistics(&mut statistics);
        statistics
    }

    /// Returns the wake-up signal of this scheduler.
    pub fn thread_sync(&self) -> &ThreadSync {
        self.context.thread_sync()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Returns the top stage of the stack.
    pub fn stack(&self) -> &dyn StreamStackEntry {
        self.stack.as_ref()
    }

    /// Returns the context.
    pub fn context(&self) -> &StreamerContext {
        &self.context
    }

    /// Cancels every request still in the pipeline.
    pub fn shutdown(&mut self) {
        let live = self.context.live_requests();
        if live > 0 {
            log::debug!("Scheduler shutting down with {} live requests", live);
        }
        self.incoming.clear();
        self.context.abandon_all();
    }

    fn prepare_incoming(&mut self) -> bool {
        let mut prepared = false;
        while let Some(id) = self.incoming.pop_front() {
            prepared = true;
            let Some(command) = self.context.command(id) else {
                continue;
            };
            if !command.is_control() {
                self.stack.prepare_request(&mut self.context, id);
                continue;
            }
            if let Command::Cancel(data) = command {
                let target = data.target.id();
                let canceled = self
                    .context
                    .drain_prepared_matching(|ctx, queued| ctx.works_on(queued, target));
                for queued in canceled {
                    self.context.complete_request(queued, RequestStatus::Canceled);
                }
            }
            self.stack.queue_request(&mut self.context, id);
        }
        prepared
    }

    fn order_prepared(&mut self) {
        self.context.sort_prepared_requests(|ctx, a, b| {
            let (priority_a, deadline_a) = ctx.scheduling_key(a);
            let (priority_b, deadline_b) = ctx.scheduling_key(b);
            priority_b
                .cmp(&priority_a)
                .then_with(|| compare_deadlines(deadline_a, deadline_b))
        });
    }

    fn queue_prepared(&mut self) -> bool {
        let now = Instant::now();
        let mut queued = 0;
        while queued < self.config.max_queued_per_tick && self.status().num_available_slots > 0 {
            let Some(id) = self.context.pop_prepared_request() else {
                break;
            };
            if let (_, Some(deadline)) = self.context.scheduling_key(id) {
                if deadline < now {
                    self.missed_deadlines += 1;
                    log::debug!("Request {} queued {:?} past its deadline", id, now - deadline);
                }
            }
            self.stack.queue_request(&mut self.context, id);
            queued += 1;
        }
        queued > 0
    }

    fn update_estimates(&mut self) {
        let pending: Vec<RequestId> = self.context.prepared_requests().iter().copied().collect();
        let mut internal_pending = Vec::new();
        self.stack.update_completion_estimates(
            &mut self.context,
            Instant::now(),
            &mut internal_pending,
            &pending,
        );
    }
}

/// Earlier deadlines first; requests without a deadline last.
fn compare_deadlines(a: Option<Instant>, b: Option<Instant>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("stack", &self.stack.name())
            .field("incoming", &self.incoming.len())
            .field("missed_deadlines", &self.missed_deadlines)
            .finish_non_exhaustive()
    }
}
