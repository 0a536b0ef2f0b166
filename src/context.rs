//! The request arena and completion queue shared by all stages.
//!
//! [`StreamerContext`] is the single owner of every in-flight [`FileRequest`].
//! Stages hold [`RequestId`]s and borrow the context for the duration of each
//! stage call, so no stage ever owns a request or the context itself.
//!
//! Completion is a two-step process:
//!
//! 1. A stage sets a terminal status and calls
//!    [`mark_request_as_completed`](StreamerContext::mark_request_as_completed).
//! 2. The scheduling thread calls
//!    [`finalize_completed_requests`](StreamerContext::finalize_completed_requests),
//!    which runs completions, propagates outcomes to parents and recycles slots.
//!
//! Finalization never runs inside a stage call, so completions can freely
//! create new requests and re-enter the stack.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::request::{
    Command, Completion, FileRequest, FileRequestPtr, Priority, RequestId, RequestStatus,
};
use crate::stack::StreamStackEntry;
use crate::stats::Statistic;
use crate::Result;

/// Wake-up signal for the scheduling thread.
///
/// Worker threads call [`wake`](Self::wake) after handing a result back; the
/// scheduling thread sleeps in [`wait_timeout`](Self::wait_timeout) when it
/// has nothing to do. A wake-up that arrives before the wait is not lost.
#[derive(Debug, Clone, Default)]
pub struct ThreadSync {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ThreadSync {
    /// Creates a new signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes the scheduling thread.
    pub fn wake(&self) {
        let (flag, condvar) = &*self.inner;
        let mut signaled = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *signaled = true;
        condvar.notify_one();
    }

    /// Sleeps until woken or `timeout` elapsed. Returns true if woken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let mut signaled = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !*signaled {
            signaled = condvar
                .wait_timeout_while(signaled, timeout, |signaled| !*signaled)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        mem::replace(&mut *signaled, false)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    request: Option<FileRequest>,
}

/// Owner of all in-flight requests.
#[derive(Debug, Default)]
pub struct StreamerContext {
    slots: Vec<Slot>,
    free: Vec<u32>,
    prepared: VecDeque<RequestId>,
    completed: VecDeque<RequestId>,
    thread_sync: ThreadSync,
    live_requests: usize,
    peak_live_requests: usize,
    finalized_requests: u64,
}

impl StreamerContext {
    /// Creates an empty context with its own wake-up signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty context that signals through `thread_sync`.
    pub fn with_thread_sync(thread_sync: ThreadSync) -> Self {
        Self {
            thread_sync,
            ..Self::default()
        }
    }

    fn allocate(&mut self, command: Command, parent: Option<RequestId>) -> RequestId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = RequestId {
            index,
            generation: slot.generation,
        };
        slot.request = Some(FileRequest::new(id, command, parent));

        self.live_requests += 1;
        self.peak_live_requests = self.peak_live_requests.max(self.live_requests);
        id
    }

    fn release(&mut self, id: RequestId) -> Option<FileRequest> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let request = slot.request.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live_requests -= 1;
        Some(request)
    }

    /// Creates a pending internal request, linked to `parent` if given.
    ///
    /// The parent cannot complete until this request is finalized or rejected.
    pub fn new_internal_request(&mut self, command: Command, parent: Option<RequestId>) -> RequestId {
        let parent = parent.filter(|&p| {
            let live = self.request(p).is_some();
            debug_assert!(live, "parent {} is no longer live", p);
            live
        });
        let id = self.allocate(command, parent);
        if let Some(parent) = parent.and_then(|p| self.request_mut(p)) {
            parent.pending_children += 1;
        }
        id
    }

    /// Moves a caller's request into the arena.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestAlreadyQueued`](crate::Error::RequestAlreadyQueued)
    /// if the request was queued before.
    pub fn adopt_external_request(&mut self, external: &FileRequestPtr) -> Result<RequestId> {
        let command = external.take_for_queue()?;
        Ok(self.adopt_taken_request(external, command))
    }

    /// Adopts a caller's request whose command was already taken out of it.
    pub(crate) fn adopt_taken_request(&mut self, external: &FileRequestPtr, command: Command) -> RequestId {
        let id = self.allocate(command, None);
        if let Some(request) = self.request_mut(id) {
            request.external = Some(external.clone());
            request.status = RequestStatus::Queued;
        }
        id
    }

    /// Returns the request behind `id`, or `None` if it was finalized.
    pub fn request(&self, id: RequestId) -> Option<&FileRequest> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.request.as_ref()
    }

    /// Returns the request behind `id` mutably.
    pub fn request_mut(&mut self, id: RequestId) -> Option<&mut FileRequest> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.request.as_mut()
    }

    /// Returns the command of a live request.
    pub fn command(&self, id: RequestId) -> Option<&Command> {
        self.request(id).map(FileRequest::command)
    }

    /// Returns the command of a live request mutably.
    pub fn command_mut(&mut self, id: RequestId) -> Option<&mut Command> {
        self.request_mut(id).map(FileRequest::command_mut)
    }

    /// Returns the status of a live request.
    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.request(id).map(FileRequest::status)
    }

    /// Updates the status of a live request.
    pub fn set_status(&mut self, id: RequestId, status: RequestStatus) {
        if let Some(request) = self.request_mut(id) {
            request.set_status(status);
            if let Some(external) = &request.external {
                if !status.is_terminal() {
                    external.set_status(status);
                }
            }
        }
    }

    /// Sets what happens when the request is finalized.
    pub fn set_completion(&mut self, id: RequestId, completion: Completion) {
        if let Some(request) = self.request_mut(id) {
            request.completion = completion;
        }
    }

    /// Appends a request to the prepared queue.
    pub fn push_prepared_request(&mut self, id: RequestId) {
        debug_assert!(self.request(id).is_some(), "pushing stale request {}", id);
        self.prepared.push_back(id);
    }

    /// Removes the first request from the prepared queue.
    pub fn pop_prepared_request(&mut self) -> Option<RequestId> {
        self.prepared.pop_front()
    }

    /// Returns the prepared queue in scheduling order.
    pub fn prepared_requests(&self) -> &VecDeque<RequestId> {
        &self.prepared
    }

    /// Removes and returns every prepared request matching `predicate`.
    pub fn drain_prepared_matching<F>(&mut self, mut predicate: F) -> Vec<RequestId>
    where
        F: FnMut(&StreamerContext, RequestId) -> bool,
    {
        let prepared = mem::take(&mut self.prepared);
        let (matched, kept): (Vec<_>, Vec<_>) =
            prepared.into_iter().partition(|&id| predicate(self, id));
        self.prepared = kept.into();
        matched
    }

    /// Stable-sorts the prepared queue; requests comparing equal keep FIFO order.
    pub fn sort_prepared_requests<F>(&mut self, mut compare: F)
    where
        F: FnMut(&StreamerContext, RequestId, RequestId) -> Ordering,
    {
        let mut prepared = mem::take(&mut self.prepared);
        prepared
            .make_contiguous()
            .sort_by(|&a, &b| compare(self, a, b));
        self.prepared = prepared;
    }

    /// Queues a request that already carries a terminal status for finalization.
    pub fn mark_request_as_completed(&mut self, id: RequestId) {
        let Some(request) = self.request_mut(id) else {
            debug_assert!(false, "completing stale request {}", id);
            log::error!("Attempted to complete stale request {}", id);
            return;
        };
        debug_assert!(
            request.status.is_terminal(),
            "request {} completed with status {}",
            id,
            request.status
        );
        if request.awaiting_finalize {
            return;
        }
        request.awaiting_finalize = true;
        self.completed.push_back(id);
    }

    /// Sets `status` and queues the request for finalization.
    pub fn complete_request(&mut self, id: RequestId, status: RequestStatus) {
        debug_assert!(status.is_terminal());
        if let Some(request) = self.request_mut(id) {
            request.set_status(status);
        }
        self.mark_request_as_completed(id);
    }

    /// Removes a request without running its completion and returns its parent.
    ///
    /// Used when a stage decides a rewritten request should take a different
    /// path: the parent is handed back so it can be prepared again.
    pub fn reject_request(&mut self, id: RequestId) -> Option<RequestId> {
        let request = self.release(id)?;
        debug_assert_eq!(request.pending_children, 0, "rejecting {} with children", id);
        self.prepared.retain(|&queued| queued != id);
        let parent = request.parent?;
        if let Some(parent_request) = self.request_mut(parent) {
            parent_request.pending_children = parent_request.pending_children.saturating_sub(1);
        }
        Some(parent)
    }

    /// Returns true if `id` is, or descends from, the caller's request `target`.
    pub fn works_on(&self, id: RequestId, target: u64) -> bool {
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(request) = self.request(id) else {
                return false;
            };
            if request.external_id() == Some(target) {
                return true;
            }
            current = request.parent;
        }
        false
    }

    /// Returns the root of the chain `id` belongs to.
    pub fn root_of(&self, id: RequestId) -> RequestId {
        let mut current = id;
        while let Some(parent) = self.request(current).and_then(FileRequest::parent) {
            current = parent;
        }
        current
    }

    /// Returns the priority and deadline of the read a request works for.
    pub fn scheduling_key(&self, id: RequestId) -> (Priority, Option<Instant>) {
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(request) = self.request(id) else {
                break;
            };
            if let Command::ReadRequest(data) = &request.command {
                return (data.priority, data.deadline);
            }
            current = request.parent;
        }
        (Priority::default(), None)
    }

    /// Records an estimate on a request and every ancestor.
    pub fn set_estimated_completion(&mut self, id: RequestId, estimate: Instant) {
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(request) = self.request_mut(id) else {
                break;
            };
            request.estimated_completion = Some(estimate);
            if let Some(external) = &request.external {
                external.set_estimated_completion(estimate);
            }
            current = request.parent;
        }
    }

    /// Runs completions for every request marked as completed.
    ///
    /// For each request, in order:
    ///
    /// 1. its completion runs (callback, or routed back through `stack`);
    /// 2. a caller's request receives its final status and command;
    /// 3. the parent's outstanding-child count drops, completing the parent
    ///    with the worst child outcome when it reaches zero;
    /// 4. the arena slot is recycled.
    ///
    /// Completions may create children of the request's parent, which keeps the
    /// parent alive. Must only be called from the scheduling thread and never
    /// from inside a stage call. Returns true if anything was finalized.
    pub fn finalize_completed_requests(&mut self, stack: &mut dyn StreamStackEntry) -> bool {
        let mut finalized = false;
        while let Some(id) = self.completed.pop_front() {
            let Some(request) = self.request_mut(id) else {
                continue;
            };
            finalized = true;
            match mem::take(&mut request.completion) {
                Completion::None => {}
                Completion::Callback(callback) => {
                    if let Some(request) = self.request(id) {
                        callback(request);
                    }
                }
                Completion::Stage => {
                    if !stack.handle_completion(self, id) {
                        log::warn!("No stage claimed the completion of {}", id);
                    }
                }
            }

            let Some(request) = self.release(id) else {
                continue;
            };
            self.finalized_requests += 1;
            log::trace!(
                "Finalized {} ({}) as {}",
                id,
                request.command.name(),
                request.status
            );

            if let Some(external) = request.external {
                external.complete(request.status, Some(request.command));
            }

            if let Some(parent_id) = request.parent {
                self.child_finished(parent_id, request.status);
            }
        }
        finalized
    }

    fn child_finished(&mut self, parent_id: RequestId, child_status: RequestStatus) {
        let Some(parent) = self.request_mut(parent_id) else {
            return;
        };
        parent.worst_child = parent.worst_child.worst(child_status);
        parent.pending_children = parent.pending_children.saturating_sub(1);
        if parent.pending_children > 0 {
            return;
        }
        if !parent.status.is_terminal() {
            parent.status = if parent.worst_child.is_terminal() {
                parent.worst_child
            } else {
                RequestStatus::Completed
            };
        }
        self.mark_request_as_completed(parent_id);
    }

    /// Completes every live caller request as `Canceled` and empties the arena.
    ///
    /// Used when the scheduling thread shuts down with work still in flight.
    pub fn abandon_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(request) = slot.request.take() {
                slot.generation = slot.generation.wrapping_add(1);
                if let Some(external) = request.external {
                    external.complete(RequestStatus::Canceled, None);
                }
            }
        }
        self.free = (0..self.slots.len() as u32).collect();
        self.prepared.clear();
        self.completed.clear();
        self.live_requests = 0;
    }

    /// Returns a handle to the scheduling thread's wake-up signal.
    pub fn thread_sync(&self) -> &ThreadSync {
        &self.thread_sync
    }

    /// Wakes the scheduling thread.
    pub fn wake_up_scheduling_thread(&self) {
        self.thread_sync.wake();
    }

    /// Returns the number of requests in the arena.
    pub fn live_requests(&self) -> usize {
        self.live_requests
    }

    /// Returns true if requests are waiting for finalization.
    pub fn has_completed_requests(&self) -> bool {
        !self.completed.is_empty()
    }

    /// Appends the context's counters.
    pub fn collect_statistics(&self, statistics: &mut Vec<Statistic>) {
        const OWNER: &str = "Streamer context";
        statistics.push(Statistic::integer(
            OWNER,
            "Live requests",
            self.live_requests as i64,
            "Requests currently allocated in the arena.",
        ));
        statistics.push(Statistic::integer(
            OWNER,
            "Peak live requests",
            self.peak_live_requests as i64,
            "The largest number of requests allocated at the same time.",
        ));
        statistics.push(Statistic::integer(
            OWNER,
            "Finalized requests",
            self.finalized_requests as i64,
            "Requests that completed and were recycled.",
        ));
        statistics.push(Statistic::integer(
            OWNER,
            "Prepared requests",
            self.prepared.len() as i64,
            "Requests waiting for a stage to accept them.",
        ));
    }
}
