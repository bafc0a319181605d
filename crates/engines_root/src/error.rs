//! Runtime error types.

use engines_component::{DescriptorError, Egid, GroupId};

/// Errors raised by the factory, the functions handle, submission and queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    /// Implementors or the descriptor itself do not match the declared builders.
    #[error("descriptor mismatch: {0}")]
    DescriptorMismatch(#[from] DescriptorError),

    /// A build or swap targets an identity that is already occupied.
    #[error("{egid} already holds an entity of kind `{kind}`")]
    DuplicateEntity {
        /// The occupied identity.
        egid: Egid,
        /// Descriptor or view name.
        kind: &'static str,
    },

    /// A remove, swap or query targets an identity that holds nothing.
    #[error("no `{kind}` entity at {egid}")]
    EntityNotFound {
        /// The missing identity.
        egid: Egid,
        /// Descriptor or view name.
        kind: &'static str,
    },

    /// Submission was invoked while a submission of the same root was running.
    #[error("entity submission re-entered while a previous submission is still running")]
    ReentrantSubmission,

    /// The root behind a handle has been dropped.
    #[error("the engines root has been dropped")]
    RootDropped,

    /// The scheduler was asked to submit before a root registered with it.
    #[error("no engines root is scheduled on this scheduler")]
    NotScheduled,

    /// A query was issued from the thread that is running a submission.
    #[error("entity views cannot be queried while a submission is running on this thread")]
    QueryDuringSubmission,

    /// The calling thread already holds this table in a conflicting way.
    #[error("`{kind}` views of {group} are already borrowed on this thread")]
    ViewBorrowed {
        /// Group of the contended table.
        group: GroupId,
        /// View name.
        kind: &'static str,
    },

    /// Submission was invoked on a thread that still holds queried views.
    #[error("entity submission invoked while this thread still holds queried views")]
    SubmissionWhileBorrowed,
}

/// Shorthand for results carrying an [`EcsError`].
pub type EcsResult<T> = Result<T, EcsError>;
