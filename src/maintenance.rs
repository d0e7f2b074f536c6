//! Operator sweeps over every volume in the cluster.
//!
//! Both sweeps ask before touching each volume; the CLI decides whether that
//! means prompting on the terminal or assuming yes.

use std::io::{self, BufRead, Write};

use tracing::info;

use crate::cluster::{Cluster, ReclaimPolicy, VolumePhase};
use crate::error::MigrationError;
use crate::volumes::{Transition, VolumeOperations};
use crate::wait::Poller;

/// Storage class prefix swept by default.
pub const DEFAULT_STORAGE_CLASS_PREFIX: &str = "azurefile";

/// Yes/no decisions for destructive steps.
pub trait Confirm {
    /// Returns whether the operator approved `question`.
    fn confirm(&self, question: &str) -> bool;
}

impl<T: Confirm + ?Sized> Confirm for &T {
    fn confirm(&self, question: &str) -> bool {
        (**self).confirm(question)
    }
}

impl<T: Confirm + ?Sized> Confirm for Box<T> {
    fn confirm(&self, question: &str) -> bool {
        (**self).confirm(question)
    }
}

/// Approves everything; selected by `--yes`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _question: &str) -> bool {
        true
    }
}

/// Prompts on stderr and reads the answer from stdin.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalPrompt;

impl Confirm for TerminalPrompt {
    fn confirm(&self, question: &str) -> bool {
        let mut stderr = io::stderr();
        if write!(stderr, "{question} [y/N] ").is_err() || stderr.flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        parse_answer(&answer)
    }
}

fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// What a cleanup sweep did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CleanupSummary {
    /// Volumes deleted outright.
    pub deleted_volumes: Vec<String>,
    /// Claims deleted so their volumes are reclaimed by the orchestrator.
    pub deleted_claims: Vec<String>,
    /// Volumes left alone.
    pub skipped: Vec<String>,
}

/// What a reclaim-policy sweep did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PolicySummary {
    /// Volumes patched to `Delete`.
    pub patched: usize,
    /// Volumes already on `Delete`.
    pub unchanged: usize,
    /// Volumes the operator declined.
    pub declined: usize,
}

/// Sweeps volumes for cleanup and policy hygiene.
#[derive(Debug)]
pub struct Maintenance<'c, C, P> {
    cluster: &'c C,
    volumes: VolumeOperations<'c, C>,
    confirm: P,
}

impl<'c, C: Cluster, P: Confirm> Maintenance<'c, C, P> {
    /// Creates a sweeper over an injected orchestrator client.
    #[must_use]
    pub const fn new(cluster: &'c C, poller: Poller, confirm: P) -> Self {
        Self {
            cluster,
            volumes: VolumeOperations::new(cluster, poller),
            confirm,
        }
    }

    /// Deletes confirmed volumes whose storage class starts with `prefix`.
    ///
    /// Available volumes are deleted directly. Released volumes have their
    /// stale reference cleared first. For bound volumes the claim is deleted
    /// after switching the volume to `Delete`, so the orchestrator reclaims
    /// the storage itself. Volumes in any other phase are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] when any orchestrator call fails.
    pub async fn cleanup_volumes(&self, prefix: &str) -> Result<CleanupSummary, MigrationError> {
        let mut summary = CleanupSummary::default();
        for volume in self.cluster.list_volumes().await? {
            let in_scope = volume
                .storage_class
                .as_deref()
                .is_some_and(|class| class.starts_with(prefix));
            if !in_scope {
                continue;
            }
            let owner = volume
                .claim_ref
                .as_ref()
                .map_or_else(|| String::from("none"), ToString::to_string);
            if !self
                .confirm
                .confirm(&format!("Delete volume {} (claim {owner})?", volume.name))
            {
                summary.skipped.push(volume.name);
                continue;
            }

            match (volume.phase, volume.claim_ref) {
                (VolumePhase::Available, _) => {
                    info!(volume = %volume.name, "deleting volume");
                    self.cluster.delete_volume(&volume.name).await?;
                    summary.deleted_volumes.push(volume.name);
                }
                (VolumePhase::Released, _) => {
                    self.volumes.clear_claim_ref(&volume.name).await?;
                    info!(volume = %volume.name, "deleting volume");
                    self.cluster.delete_volume(&volume.name).await?;
                    summary.deleted_volumes.push(volume.name);
                }
                (VolumePhase::Bound, Some(claim)) => {
                    if !self.confirm.confirm(&format!("Delete claim {claim}?")) {
                        summary.skipped.push(volume.name);
                        continue;
                    }
                    self.volumes
                        .set_reclaim_policy(&volume.name, ReclaimPolicy::Delete)
                        .await?;
                    info!(claim = %claim, "deleting claim");
                    match self.cluster.delete_claim(&claim.namespace, &claim.name).await {
                        Ok(()) => {}
                        Err(err) if err.is_not_found() => {
                            info!(claim = %claim, "claim already deleted");
                        }
                        Err(err) => return Err(err.into()),
                    }
                    summary.deleted_claims.push(claim.to_string());
                }
                (phase, _) => {
                    info!(volume = %volume.name, %phase, "skipping volume");
                    summary.skipped.push(volume.name);
                }
            }
        }
        Ok(summary)
    }

    /// Restores the `Delete` policy on every confirmed volume.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] when any orchestrator call fails.
    pub async fn fix_reclaim_policies(&self) -> Result<PolicySummary, MigrationError> {
        let mut summary = PolicySummary::default();
        for volume in self.cluster.list_volumes().await? {
            if !self.confirm.confirm(&format!("Patch {}?", volume.name)) {
                summary.declined += 1;
                continue;
            }
            match self
                .volumes
                .set_reclaim_policy(&volume.name, ReclaimPolicy::Delete)
                .await?
            {
                Transition::Applied => summary.patched += 1,
                Transition::Unchanged => summary.unchanged += 1,
            }
        }
        Ok(summary)
    }
}
