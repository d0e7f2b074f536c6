//! Moves a claim's binding from one volume to another without data loss.
//!
//! Both volumes are switched to `Retain` before their claims are deleted, so
//! the orchestrator never garbage-collects either disk mid-sequence. Each step
//! re-reads the orchestrator, which makes the whole sequence safe to re-run.

use tracing::info;

use crate::cluster::{ClaimRef, Cluster, ReclaimPolicy};
use crate::error::MigrationError;
use crate::volumes::VolumeOperations;
use crate::wait::Poller;

/// Sequences volume operations into a rebind.
#[derive(Debug)]
pub struct Rebinder<'c, C> {
    cluster: &'c C,
    volumes: VolumeOperations<'c, C>,
}

impl<'c, C: Cluster> Rebinder<'c, C> {
    /// Creates a rebinder over an injected orchestrator client.
    #[must_use]
    pub const fn new(cluster: &'c C, poller: Poller) -> Self {
        Self {
            cluster,
            volumes: VolumeOperations::new(cluster, poller),
        }
    }

    /// Returns the underlying volume operations.
    #[must_use]
    pub const fn volumes(&self) -> &VolumeOperations<'c, C> {
        &self.volumes
    }

    /// Resolves the volume a claim is currently bound to.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::NotBound`] when the claim has no volume, or
    /// [`MigrationError::Cluster`] when the claim cannot be read.
    pub async fn bound_volume(
        &self,
        claim: &str,
        namespace: &str,
    ) -> Result<String, MigrationError> {
        self.cluster
            .get_claim(namespace, claim)
            .await?
            .volume_name
            .ok_or_else(|| MigrationError::NotBound {
                namespace: namespace.to_owned(),
                claim: claim.to_owned(),
            })
    }

    /// Rebinds `claim` from whatever volume it is bound to onto `target`.
    ///
    /// A claim that no longer exists means an earlier run already detached
    /// the old volume, so the rebind resumes at the target volume.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::NotBound`] when the claim is not bound, and
    /// any error raised by the individual transitions.
    pub async fn rebind_claim_to_volume(
        &self,
        claim: &str,
        target: &str,
        namespace: &str,
    ) -> Result<(), MigrationError> {
        info!(claim, volume = target, "rebinding claim");
        let source = match self.bound_volume(claim, namespace).await {
            Ok(source) => source,
            Err(MigrationError::Cluster(err)) if err.is_not_found() => {
                info!(claim, "claim is gone; resuming at the target volume");
                return self.attach_target(claim, target, namespace).await;
            }
            Err(err) => return Err(err),
        };
        if source == target {
            info!(claim, volume = target, "claim is already bound to the target volume");
            return Ok(());
        }
        info!(
            claim,
            volume = %source,
            "claim is currently bound; resume with --from-volume if interrupted"
        );
        self.rebind_from_volume(&source, claim, target, namespace).await
    }

    /// Runs the rebind starting from an explicitly named source volume.
    ///
    /// Lets an operator resume with the old volume named by hand.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the individual transitions.
    pub async fn rebind_from_volume(
        &self,
        source: &str,
        claim: &str,
        target: &str,
        namespace: &str,
    ) -> Result<(), MigrationError> {
        self.volumes
            .set_reclaim_policy(source, ReclaimPolicy::Retain)
            .await?;
        self.volumes.delete_claimant(source, namespace).await?;
        self.attach_target(claim, target, namespace).await
    }

    async fn attach_target(
        &self,
        claim: &str,
        target: &str,
        namespace: &str,
    ) -> Result<(), MigrationError> {
        self.volumes
            .set_reclaim_policy(target, ReclaimPolicy::Retain)
            .await?;
        let wanted = ClaimRef::new(namespace, claim);
        if self.cluster.get_volume(target).await?.claim_ref.as_ref() == Some(&wanted) {
            info!(volume = target, claim = %wanted, "target already references the claim");
        } else {
            self.volumes.delete_claimant(target, namespace).await?;
        }

        self.volumes.set_claim_ref(target, claim, namespace).await?;
        info!(
            claim,
            volume = target,
            "claim pre-bound; the binder completes the bind on next reconcile"
        );
        Ok(())
    }
}
