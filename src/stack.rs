//! The contract every pipeline stage implements.
//!
//! A stack is a singly linked chain of boxed [`StreamStackEntry`] values. Each
//! stage owns the next one and every operation has a default implementation
//! that forwards to it, so a stage only overrides the operations it cares
//! about. Overrides must still call through to the next stage for
//! [`execute_requests`](StreamStackEntry::execute_requests),
//! [`update_status`](StreamStackEntry::update_status),
//! [`update_completion_estimates`](StreamStackEntry::update_completion_estimates)
//! and [`collect_statistics`](StreamStackEntry::collect_statistics), so every
//! stage gets a chance to make progress and report on every tick.
//!
//! The [`StreamerContext`] is not owned by any stage. It is lent to the chain
//! for the duration of each call.

use std::time::Instant;

use crate::context::StreamerContext;
use crate::request::{Command, RequestId, RequestStatus};
use crate::stats::Statistic;

/// Aggregated load of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Number of requests the stack can accept right now. The minimum over all
    /// stages.
    pub num_available_slots: i32,
    /// True only if every stage has nothing queued or in flight.
    pub is_idle: bool,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            num_available_slots: i32::MAX,
            is_idle: true,
        }
    }
}

/// One layer of the streaming pipeline.
pub trait StreamStackEntry: Send {
    /// Returns the display name used in statistics and reports.
    fn name(&self) -> &str;

    /// Attaches the stage that follows this one.
    fn set_next(&mut self, next: Box<dyn StreamStackEntry>);

    /// Returns the following stage.
    fn next(&self) -> Option<&(dyn StreamStackEntry + 'static)>;

    /// Returns the following stage mutably.
    fn next_mut(&mut self) -> Option<&mut (dyn StreamStackEntry + 'static)>;

    /// Rewrites a request before it is scheduled.
    ///
    /// A stage that splits the request pushes the resulting children onto the
    /// context's prepared queue. When no stage rewrites it, the request itself
    /// ends up there.
    fn prepare_request(&mut self, ctx: &mut StreamerContext, id: RequestId) {
        match self.next_mut() {
            Some(next) => next.prepare_request(ctx, id),
            None => ctx.push_prepared_request(id),
        }
    }

    /// Hands a scheduled request to the stage that will service it.
    fn queue_request(&mut self, ctx: &mut StreamerContext, id: RequestId) {
        match self.next_mut() {
            Some(next) => next.queue_request(ctx, id),
            None => complete_unhandled(ctx, id),
        }
    }

    /// Performs one bounded unit of work. Returns true if anything happened.
    fn execute_requests(&mut self, ctx: &mut StreamerContext) -> bool {
        self.next_mut()
            .is_some_and(|next| next.execute_requests(ctx))
    }

    /// Receives a request finalized with [`Completion::Stage`].
    ///
    /// Returns true if this stage, or one below it, consumed the completion.
    ///
    /// [`Completion::Stage`]: crate::request::Completion::Stage
    fn handle_completion(&mut self, ctx: &mut StreamerContext, id: RequestId) -> bool {
        self.next_mut()
            .is_some_and(|next| next.handle_completion(ctx, id))
    }

    /// Merges this stage's load into `status`, after the following stages.
    fn update_status(&self, status: &mut Status) {
        if let Some(next) = self.next() {
            next.update_status(status);
        }
    }

    /// Refreshes estimated completion times.
    ///
    /// `internal_pending` collects requests that stages above have accepted
    /// but not yet passed on, so lower stages can include them. `pending` is
    /// the scheduler's prepared queue. The following stage runs first; a
    /// stage then adds its own delay on top of the estimates below it.
    fn update_completion_estimates(
        &mut self,
        ctx: &mut StreamerContext,
        now: Instant,
        internal_pending: &mut Vec<RequestId>,
        pending: &[RequestId],
    ) {
        if let Some(next) = self.next_mut() {
            next.update_completion_estimates(ctx, now, internal_pending, pending);
        }
    }

    /// Appends statistics about this stage and the ones below it.
    fn collect_statistics(&self, statistics: &mut Vec<Statistic>) {
        if let Some(next) = self.next() {
            next.collect_statistics(statistics);
        }
    }
}

/// Ends a request that reached the end of the chain without being consumed.
///
/// Broadcast commands complete; anything else fails as unhandled.
pub fn complete_unhandled(ctx: &mut StreamerContext, id: RequestId) {
    let Some(command) = ctx.command(id) else {
        debug_assert!(false, "unhandled stale request {}", id);
        return;
    };
    let status = if command.completes_when_unhandled() {
        RequestStatus::Completed
    } else {
        log::warn!("{} request {} was not handled by any stage", command.name(), id);
        RequestStatus::Failed
    };
    ctx.complete_request(id, status);
}

/// Links `stages` into a chain, first stage on top. Returns `None` if empty.
pub fn link(stages: Vec<Box<dyn StreamStackEntry>>) -> Option<Box<dyn StreamStackEntry>> {
    stages.into_iter().rev().fold(None, |below, mut stage| {
        if let Some(below) = below {
            stage.set_next(below);
        }
        Some(stage)
    })
}

/// Returns the display names of a chain from top to bottom.
pub fn stage_names(top: &dyn StreamStackEntry) -> Vec<String> {
    let mut names = vec![top.name().to_owned()];
    let mut current = top.next();
    while let Some(stage) = current {
        names.push(stage.name().to_owned());
        current = stage.next();
    }
    names
}

/// Returns true if `command` is a cancel aimed at the request `id` works on.
pub(crate) fn cancels(ctx: &StreamerContext, command: &Command, id: RequestId) -> bool {
    match command {
        Command::Cancel(data) => ctx.works_on(id, data.target.id()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::FileRequestPtr;
    use crate::request::command::CustomData;
    use std::sync::Arc;

    /// Counts the calls it receives and forwards them.
    #[derive(Default)]
    struct Passthrough {
        label: String,
        executed: usize,
        slots: Option<i32>,
        next: Option<Box<dyn StreamStackEntry>>,
    }

    impl Passthrough {
        fn boxed(label: &str, slots: Option<i32>) -> Box<dyn StreamStackEntry> {
            Box::new(Self {
                label: label.to_owned(),
                slots,
                ..Self::default()
            })
        }
    }

    impl StreamStackEntry for Passthrough {
        fn name(&self) -> &str {
            &self.label
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
        fn execute_requests(&mut self, ctx: &mut StreamerContext) -> bool {
            self.executed += 1;
            let below = self.next_mut().is_some_and(|next| next.execute_requests(ctx));
            below || self.executed == 1
        }
        fn update_status(&self, status: &mut Status) {
            if let Some(next) = self.next() {
                next.update_status(status);
            }
            if let Some(slots) = self.slots {
                status.num_available_slots = status.num_available_slots.min(slots);
                status.is_idle &= slots > 0;
            }
        }
    }

    #[test]
    fn test_link_order() {
        let stack = link(vec![
            Passthrough::boxed("top", None),
            Passthrough::boxed("middle", None),
            Passthrough::boxed("bottom", None),
        ])
        .unwrap();
        assert_eq!(stage_names(stack.as_ref()), ["top", "middle", "bottom"]);
        assert!(link(Vec::new()).is_none());
    }

    #[test]
    fn test_status_takes_minimum() {
        let stack = link(vec![
            Passthrough::boxed("top", Some(4)),
            Passthrough::boxed("bottom", Some(2)),
        ])
        .unwrap();
        let mut status = Status::default();
        stack.update_status(&mut status);
        assert_eq!(status.num_available_slots, 2);
        assert!(status.is_idle);
    }

    #[test]
    fn test_execute_reaches_every_stage() {
        let mut stack = link(vec![
            Passthrough::boxed("top", None),
            Passthrough::boxed("bottom", None),
        ])
        .unwrap();
        let mut ctx = StreamerContext::new();
        assert!(stack.execute_requests(&mut ctx));
        assert!(!stack.execute_requests(&mut ctx));
    }

    #[test]
    fn test_unhandled_read_fails_and_flush_completes() {
        let mut stack = Passthrough::boxed("only", None);
        let mut ctx = StreamerContext::new();

        let flush = FileRequestPtr::flush_all();
        let id = ctx.adopt_external_request(&flush).unwrap();
        stack.queue_request(&mut ctx, id);

        let wait = ctx.new_internal_request(Command::Wait, None);
        stack.queue_request(&mut ctx, wait);
        assert_eq!(ctx.status(wait), Some(RequestStatus::Failed));

        ctx.finalize_completed_requests(stack.as_mut());
        assert_eq!(flush.status(), RequestStatus::Completed);
    }

    #[test]
    fn test_custom_respects_fail_flag() {
        let mut ctx = StreamerContext::new();
        let failing = ctx.new_internal_request(
            Command::Custom(CustomData {
                data: Arc::new(()),
                fail_when_unhandled: true,
            }),
            None,
        );
        complete_unhandled(&mut ctx, failing);
        assert_eq!(ctx.status(failing), Some(RequestStatus::Failed));
    }

    #[test]
    fn test_prepare_without_stages_pushes_request() {
        let mut stack = Passthrough::boxed("only", None);
        let mut ctx = StreamerContext::new();
        let id = ctx.new_internal_request(Command::Wait, None);
        stack.prepare_request(&mut ctx, id);
        assert_eq!(ctx.pop_prepared_request(), Some(id));
    }
}
