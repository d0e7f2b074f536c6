//! Orchestrator abstraction for the resources a migration touches.
//!
//! Records in this module are validated once when they are read from the
//! orchestrator, so downstream logic never re-checks optional fields.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Retention behaviour applied when a volume's claim is removed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReclaimPolicy {
    /// Backing storage is destroyed together with the claim.
    Delete,
    /// Backing storage survives the claim.
    Retain,
    /// Legacy scrub-and-reuse policy; accepted on read, never written.
    Recycle,
}

impl ReclaimPolicy {
    /// Returns the wire representation used by the orchestrator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "Delete",
            Self::Retain => "Retain",
            Self::Recycle => "Recycle",
        }
    }

    /// Parses the wire representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Delete" => Some(Self::Delete),
            "Retain" => Some(Self::Retain),
            "Recycle" => Some(Self::Recycle),
            _ => None,
        }
    }
}

impl fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed lifecycle phase of a volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VolumePhase {
    /// Not yet available for binding.
    Pending,
    /// Unclaimed and ready for binding.
    Available,
    /// Bound to a claim.
    Bound,
    /// Its claim was deleted; the volume still carries the stale reference.
    Released,
    /// Automatic reclamation failed.
    Failed,
}

impl VolumePhase {
    /// Returns the wire representation used by the orchestrator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Available => "Available",
            Self::Bound => "Bound",
            Self::Released => "Released",
            Self::Failed => "Failed",
        }
    }

    /// Parses the wire representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(Self::Pending),
            "Available" => Some(Self::Available),
            "Bound" => Some(Self::Bound),
            "Released" => Some(Self::Released),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for VolumePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from a volume to the claim that owns it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClaimRef {
    /// Namespace of the claim.
    pub namespace: String,
    /// Name of the claim.
    pub name: String,
}

impl ClaimRef {
    /// Creates a claim reference.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClaimRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Durable storage unit known to the orchestrator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Cluster-unique volume name.
    pub name: String,
    /// Current reclaim policy.
    pub reclaim_policy: ReclaimPolicy,
    /// Current phase.
    pub phase: VolumePhase,
    /// Claim currently referenced by the volume, if any.
    pub claim_ref: Option<ClaimRef>,
    /// Storage class the volume was provisioned from.
    pub storage_class: Option<String>,
}

/// Namespaced handle a workload uses to reference a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Claim {
    /// Namespace of the claim.
    pub namespace: String,
    /// Name of the claim.
    pub name: String,
    /// Volume the claim is bound to once binding completes.
    pub volume_name: Option<String>,
    /// Requested storage capacity (for example `50Gi`).
    pub capacity: Option<String>,
    /// Requested access modes.
    pub access_modes: Vec<String>,
}

/// Parameters for a claim the migration creates itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClaimRequest {
    /// Claim name.
    pub name: String,
    /// Requested capacity quantity.
    pub capacity: String,
    /// Storage class used for provisioning.
    pub storage_class: String,
    /// Requested access mode.
    pub access_mode: String,
}

/// A claim mounted into a job container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobMount {
    /// Pod-level volume name.
    pub name: String,
    /// Claim backing the mount.
    pub claim: String,
    /// Mount path inside the container.
    pub path: String,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

/// Desired specification of a batch job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobRequest {
    /// Job name.
    pub name: String,
    /// Container image.
    pub image: String,
    /// Shell script executed with `/bin/bash -c`.
    pub script: String,
    /// Claims mounted into the container.
    pub mounts: Vec<JobMount>,
    /// Number of retries before the job is marked failed.
    pub backoff_limit: i32,
    /// Seconds the finished job is kept before garbage collection.
    pub ttl_seconds_after_finished: i32,
}

/// Observed state of a batch job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    /// Neither succeeded nor failed yet.
    Running,
    /// At least one pod completed successfully.
    Succeeded,
    /// The retry budget is exhausted.
    Failed,
}

impl JobStatus {
    /// Reports whether the job will not change state again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Resource kinds referenced in errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// Persistent volume.
    Volume,
    /// Persistent volume claim.
    Claim,
    /// Batch job.
    Job,
    /// Pod.
    Pod,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Volume => "volume",
            Self::Claim => "claim",
            Self::Job => "job",
            Self::Pod => "pod",
        })
    }
}

/// Errors raised by orchestrator implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClusterError {
    /// The addressed resource does not exist.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing resource.
        kind: ResourceKind,
        /// Name of the missing resource.
        name: String,
    },
    /// A create request collided with an existing resource.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Kind of the existing resource.
        kind: ResourceKind,
        /// Name of the existing resource.
        name: String,
    },
    /// A fetched resource lacks a mandatory field or carries an unknown value.
    #[error("{kind} {name} is malformed: {detail}")]
    Malformed {
        /// Kind of the malformed resource.
        kind: ResourceKind,
        /// Name of the malformed resource.
        name: String,
        /// What was wrong with it.
        detail: String,
    },
    /// Any other transport or API failure.
    #[error("orchestrator request failed: {message}")]
    Api {
        /// Message reported by the client.
        message: String,
    },
}

impl ClusterError {
    /// Reports whether the error is a missing-resource failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Reports whether the error is a create conflict.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Future returned by orchestrator operations.
pub type ClusterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClusterError>> + Send + 'a>>;

/// Capabilities the migration needs from the orchestrator.
///
/// Implementations must not cache: every call observes the orchestrator's
/// current state.
pub trait Cluster: Send + Sync {
    /// Fetches a volume by name.
    fn get_volume<'a>(&'a self, name: &'a str) -> ClusterFuture<'a, Volume>;

    /// Lists every volume in the cluster.
    fn list_volumes(&self) -> ClusterFuture<'_, Vec<Volume>>;

    /// Merge-patches the volume's reclaim policy.
    fn patch_reclaim_policy<'a>(
        &'a self,
        name: &'a str,
        policy: ReclaimPolicy,
    ) -> ClusterFuture<'a, ()>;

    /// Removes the `claimRef` field from the volume with a path-based patch.
    fn remove_claim_ref<'a>(&'a self, name: &'a str) -> ClusterFuture<'a, ()>;

    /// Merge-patches the volume's `claimRef`.
    fn patch_claim_ref<'a>(&'a self, name: &'a str, claim: &'a ClaimRef)
    -> ClusterFuture<'a, ()>;

    /// Deletes a volume.
    fn delete_volume<'a>(&'a self, name: &'a str) -> ClusterFuture<'a, ()>;

    /// Fetches a claim.
    fn get_claim<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, Claim>;

    /// Creates a claim.
    fn create_claim<'a>(
        &'a self,
        namespace: &'a str,
        request: &'a ClaimRequest,
    ) -> ClusterFuture<'a, ()>;

    /// Deletes a claim.
    fn delete_claim<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ()>;

    /// Merge-patches the claim's `volumeName`.
    fn patch_claim_volume<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        volume: &'a str,
    ) -> ClusterFuture<'a, ()>;

    /// Creates a batch job and returns the name assigned to it.
    fn create_job<'a>(
        &'a self,
        namespace: &'a str,
        request: &'a JobRequest,
    ) -> ClusterFuture<'a, String>;

    /// Reads the job's status.
    fn job_status<'a>(&'a self, namespace: &'a str, name: &'a str)
    -> ClusterFuture<'a, JobStatus>;

    /// Lists the names of pods spawned by the job.
    fn job_pods<'a>(&'a self, namespace: &'a str, job: &'a str) -> ClusterFuture<'a, Vec<String>>;

    /// Reads a pod's complete log.
    fn pod_logs<'a>(&'a self, namespace: &'a str, pod: &'a str) -> ClusterFuture<'a, String>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::delete(ReclaimPolicy::Delete)]
    #[case::retain(ReclaimPolicy::Retain)]
    #[case::recycle(ReclaimPolicy::Recycle)]
    fn reclaim_policy_parses_its_own_rendering(#[case] policy: ReclaimPolicy) {
        assert_eq!(ReclaimPolicy::parse(policy.as_str()), Some(policy));
    }

    #[test]
    fn unknown_phase_is_rejected() {
        assert_eq!(VolumePhase::parse("Lost"), None);
        assert_eq!(VolumePhase::parse("released"), None);
    }

    #[test]
    fn only_succeeded_and_failed_are_terminal() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn claim_ref_renders_namespace_and_name() {
        assert_eq!(ClaimRef::new("ns", "c1").to_string(), "ns/c1");
    }
}
