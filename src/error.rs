//! Errors surfaced by the migration core.

use thiserror::Error;

use crate::cluster::ClusterError;

/// Errors raised by resource operations, the rebind state machine, and the
/// migration workflow.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum MigrationError {
    /// A volume is not in the phase or policy the transition requires.
    #[error("volume {volume} must have {expected} before {action}, found {found}")]
    Precondition {
        /// Volume the transition was attempted on.
        volume: String,
        /// Transition that was refused.
        action: &'static str,
        /// Required state.
        expected: String,
        /// Observed state.
        found: String,
    },
    /// A claim has no volume to migrate from or to.
    #[error("claim {namespace}/{claim} is not bound to a volume")]
    NotBound {
        /// Namespace of the claim.
        namespace: String,
        /// Name of the claim.
        claim: String,
    },
    /// A batch job ran to completion and reported failure.
    #[error("job {namespace}/{job} failed; inspect its pod logs")]
    JobFailed {
        /// Namespace of the job.
        namespace: String,
        /// Name of the job.
        job: String,
    },
    /// A wait was aborted through its cancellation token.
    #[error("cancelled while waiting for {waiting_for}")]
    Cancelled {
        /// Condition the wait was blocked on.
        waiting_for: String,
    },
    /// The orchestrator rejected a request or returned an unusable resource.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}
