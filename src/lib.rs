//! Core library for the disk migration tool.
//!
//! The crate moves the data behind a Kubernetes persistent volume claim onto
//! a freshly provisioned volume and rebinds the claim's name to it, without
//! ever leaving either disk eligible for garbage collection mid-sequence.
//! Orchestrator access goes through the [`Cluster`] trait so every workflow
//! can be driven against [`test_support::FakeCluster`] as well as a live API
//! server via [`KubeCluster`].

pub mod cluster;
pub mod config;
pub mod error;
pub mod jobs;
pub mod kubernetes;
pub mod logging;
pub mod maintenance;
pub mod migrate;
pub mod rebind;
pub mod templates;
pub mod test_support;
pub mod volumes;
pub mod wait;

pub use cluster::{
    Claim, ClaimRef, ClaimRequest, Cluster, ClusterError, ClusterFuture, JobMount, JobRequest,
    JobStatus, ReclaimPolicy, ResourceKind, Volume, VolumePhase,
};
pub use config::{ConfigError, MigrationConfig};
pub use error::MigrationError;
pub use jobs::{FileLogSink, JobTracker, LogSink, LogSinkError};
pub use kubernetes::KubeCluster;
pub use maintenance::{
    AssumeYes, CleanupSummary, Confirm, DEFAULT_STORAGE_CLASS_PREFIX, Maintenance, PolicySummary,
    TerminalPrompt,
};
pub use migrate::{MigrationOrchestrator, MigrationSettings};
pub use rebind::Rebinder;
pub use templates::CopyLevel;
pub use volumes::{Transition, VolumeOperations};
pub use wait::{DEFAULT_POLL_INTERVAL, Poller};
