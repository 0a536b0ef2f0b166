//! The request model shared by every pipeline stage.
//!
//! Two request types exist:
//!
//! - [`FileRequestPtr`]: the handle a caller creates, queues and waits on
//! - [`FileRequest`]: the internal unit of work living in the
//!   [`StreamerContext`] arena, addressed by a generation-checked [`RequestId`]
//!
//! When a caller queues a [`FileRequestPtr`], the scheduler adopts it into the
//! arena as an external [`FileRequest`]. Stages then rewrite it into internal
//! child requests (reads, compressed reads, exists checks, waits). A parent is
//! completed by the context once its last child finishes, inheriting the worst
//! outcome among its children.
//!
//! [`StreamerContext`]: crate::context::StreamerContext

pub mod command;
mod external;

pub use command::{Command, ReportType};
pub use external::{ExternalCallback, FileRequestPtr};

use std::fmt;
use std::time::Instant;

/// Handle to a request in the context arena.
///
/// The generation changes every time the slot is recycled, so a handle to a
/// finalized request never resolves to the request that reused its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestStatus {
    /// Created but not yet picked up.
    #[default]
    Pending,
    /// Handed to the pipeline.
    Queued,
    /// Being worked on by a stage.
    Processing,
    /// Finished successfully.
    Completed,
    /// Canceled before or while being processed.
    Canceled,
    /// Finished with an error.
    Failed,
}

impl RequestStatus {
    /// Returns true for `Completed`, `Canceled` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }

    /// Ranks terminal outcomes: `Failed` > `Canceled` > `Completed`.
    fn severity(self) -> u8 {
        match self {
            Self::Failed => 3,
            Self::Canceled => 2,
            Self::Completed => 1,
            _ => 0,
        }
    }

    /// Returns the more severe of two outcomes.
    pub(crate) fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Scheduling priority of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Background work.
    Lowest,
    /// Below normal.
    Low,
    /// Normal.
    #[default]
    Medium,
    /// Above normal.
    High,
    /// Needed as soon as possible.
    Highest,
}

/// Callback attached to an internal request.
pub type CompletionCallback = Box<dyn FnOnce(&FileRequest) + Send>;

/// What happens when a request is finalized.
#[derive(Default)]
pub enum Completion {
    /// Nothing.
    #[default]
    None,
    /// Run a callback on the scheduling thread.
    Callback(CompletionCallback),
    /// Route the request back into the stack through
    /// [`StreamStackEntry::handle_completion`].
    ///
    /// [`StreamStackEntry::handle_completion`]: crate::stack::StreamStackEntry::handle_completion
    Stage,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Callback(_) => f.write_str("Callback"),
            Self::Stage => f.write_str("Stage"),
        }
    }
}

/// A unit of work owned by the context arena.
#[derive(Debug)]
pub struct FileRequest {
    pub(crate) id: RequestId,
    pub(crate) command: Command,
    pub(crate) status: RequestStatus,
    pub(crate) parent: Option<RequestId>,
    pub(crate) pending_children: u32,
    pub(crate) worst_child: RequestStatus,
    pub(crate) estimated_completion: Option<Instant>,
    pub(crate) completion: Completion,
    pub(crate) external: Option<FileRequestPtr>,
    pub(crate) awaiting_finalize: bool,
}

impl FileRequest {
    pub(crate) fn new(id: RequestId, command: Command, parent: Option<RequestId>) -> Self {
        Self {
            id,
            command,
            status: RequestStatus::Pending,
            parent,
            pending_children: 0,
            worst_child: RequestStatus::Pending,
            estimated_completion: None,
            completion: Completion::None,
            external: None,
            awaiting_finalize: false,
        }
    }

    /// Returns the arena handle of this request.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the command.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Returns the command mutably.
    pub fn command_mut(&mut self) -> &mut Command {
        &mut self.command
    }

    /// Returns the current status.
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Updates the status. A terminal status never changes again.
    pub fn set_status(&mut self, status: RequestStatus) {
        if self.status.is_terminal() {
            debug_assert!(
                !status.is_terminal() || status == self.status,
                "request {} already finished as {}, refusing {}",
                self.id,
                self.status,
                status
            );
            log::trace!(
                "Ignoring status change of {} from {} to {}",
                self.id,
                self.status,
                status
            );
            return;
        }
        self.status = status;
    }

    /// Returns the parent request, if any.
    pub fn parent(&self) -> Option<RequestId> {
        self.parent
    }

    /// Returns the number of children that have not been finalized.
    pub fn pending_children(&self) -> u32 {
        self.pending_children
    }

    /// Returns the estimated completion time.
    pub fn estimated_completion(&self) -> Option<Instant> {
        self.estimated_completion
    }

    /// Sets what happens when this request is finalized.
    pub fn set_completion(&mut self, completion: Completion) {
        self.completion = completion;
    }

    /// Returns the id of the caller-facing request this represents, if any.
    pub fn external_id(&self) -> Option<u64> {
        self.external.as_ref().map(FileRequestPtr::id)
    }

    /// Returns true if this request was queued by a caller.
    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> FileRequest {
        FileRequest::new(
            RequestId {
                index: 0,
                generation: 0,
            },
            Command::Wait,
            None,
        )
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Canceled.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
    }

    #[test]
    fn test_worst_outcome() {
        use RequestStatus::*;
        assert_eq!(Completed.worst(Failed), Failed);
        assert_eq!(Canceled.worst(Completed), Canceled);
        assert_eq!(Failed.worst(Canceled), Failed);
        assert_eq!(Pending.worst(Completed), Completed);
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Highest > Priority::High);
        assert!(Priority::Lowest < Priority::Medium);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_status_progression() {
        let mut request = request();
        request.set_status(RequestStatus::Queued);
        request.set_status(RequestStatus::Processing);
        request.set_status(RequestStatus::Completed);
        assert_eq!(request.status(), RequestStatus::Completed);
        // Repeating the same terminal status is harmless.
        request.set_status(RequestStatus::Completed);
        assert_eq!(request.status(), RequestStatus::Completed);
    }

    #[test]
    fn test_terminal_ignores_non_terminal() {
        let mut request = request();
        request.set_status(RequestStatus::Canceled);
        request.set_status(RequestStatus::Processing);
        assert_eq!(request.status(), RequestStatus::Canceled);
    }
}
