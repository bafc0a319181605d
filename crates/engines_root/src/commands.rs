//! Deferred entity commands.
//!
//! Factory and functions handles never touch the store. They append plain
//! command values to a [`CommandQueue`], which any thread may do at any time.
//! The root takes the whole pending batch at the start of a submission;
//! commands appended while that submission runs belong to the next one.
//!
//! Duplicates are not collapsed at enqueue time. They are detected when the
//! batch is applied and reported as faults.

use std::sync::Arc;

use engines_component::{DescriptorInfo, Egid, EntityId, GroupId, Implementor};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::EcsError;

/// Build an entity from its descriptor.
pub(crate) struct BuildCommand {
    pub descriptor: Arc<DescriptorInfo>,
    pub egid: Egid,
    /// Already validated against the descriptor.
    pub implementors: Vec<Implementor>,
}

/// Remove an entity and release its slots.
pub(crate) struct RemoveCommand {
    pub descriptor: Arc<DescriptorInfo>,
    pub egid: Egid,
}

/// Move an entity between groups, keeping its identifier and data.
pub(crate) struct SwapCommand {
    pub descriptor: Arc<DescriptorInfo>,
    pub entity: EntityId,
    pub from: GroupId,
    pub to: GroupId,
}

/// Reserve table capacity ahead of a burst of builds.
pub(crate) struct PreallocateCommand {
    pub descriptor: Arc<DescriptorInfo>,
    pub group: GroupId,
    pub capacity: usize,
}

/// Everything queued between two submissions, split by command kind.
#[derive(Default)]
pub(crate) struct CommandBatch {
    pub preallocations: Vec<PreallocateCommand>,
    pub removes: Vec<RemoveCommand>,
    pub swaps: Vec<SwapCommand>,
    pub builds: Vec<BuildCommand>,
}

impl CommandBatch {
    pub fn len(&self) -> usize {
        self.preallocations.len() + self.removes.len() + self.swaps.len() + self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The root's pending commands, appendable from any thread.
#[derive(Default)]
pub(crate) struct CommandQueue {
    pending: Mutex<CommandBatch>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_build(&self, command: BuildCommand) {
        self.pending.lock().builds.push(command);
    }

    pub fn push_remove(&self, command: RemoveCommand) {
        self.pending.lock().removes.push(command);
    }

    pub fn push_swap(&self, command: SwapCommand) {
        self.pending.lock().swaps.push(command);
    }

    pub fn push_preallocate(&self, command: PreallocateCommand) {
        self.pending.lock().preallocations.push(command);
    }

    /// Take the whole pending batch, leaving an empty queue behind.
    pub fn take(&self) -> CommandBatch {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// The kind of command a fault belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandKind {
    /// A build from the factory.
    Build,
    /// A remove from the functions handle.
    Remove,
    /// A group swap from the functions handle.
    Swap,
    /// A capacity reservation from the factory.
    Preallocate,
}

/// One command that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionFault {
    /// The kind of the skipped command.
    pub command: CommandKind,
    /// Why it was skipped.
    pub error: EcsError,
}

/// Outcome of one submission pass.
///
/// Faulty commands are skipped individually; the rest of the batch is still
/// applied. Faults are listed in the order they were hit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    /// Capacity reservations applied.
    pub preallocated: usize,
    /// Entities removed.
    pub removed: usize,
    /// Entities moved between groups.
    pub swapped: usize,
    /// Entities built.
    pub built: usize,
    /// `add` notifications delivered to engines.
    pub added_notifications: usize,
    /// `remove` notifications delivered to engines.
    pub removed_notifications: usize,
    /// Commands skipped, in application order.
    pub faults: Vec<SubmissionFault>,
}

impl SubmissionReport {
    /// Returns `true` if no command was skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }

    /// Number of commands the pass handled, applied or skipped.
    #[must_use]
    pub fn commands(&self) -> usize {
        self.preallocated + self.removed + self.swapped + self.built + self.faults.len()
    }

    /// Faults raised by commands of `kind`.
    pub fn faults_of(&self, kind: CommandKind) -> impl Iterator<Item = &SubmissionFault> {
        self.faults.iter().filter(move |fault| fault.command == kind)
    }

    pub(crate) fn fault(&mut self, command: CommandKind, error: EcsError) {
        self.faults.push(SubmissionFault { command, error });
    }
}
