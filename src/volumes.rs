//! Idempotent transitions over volumes and claims.
//!
//! Every operation re-reads the resource it acts on and reports
//! [`Transition::Unchanged`] instead of failing when the desired state is
//! already in place, so a half-finished migration can be re-run from the top.

use tracing::info;

use crate::cluster::{ClaimRef, Cluster, ReclaimPolicy, VolumePhase};
use crate::error::MigrationError;
use crate::wait::Poller;

/// Outcome of an idempotent transition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transition {
    /// A mutation was sent to the orchestrator.
    Applied,
    /// The desired state was already observed; nothing was sent.
    Unchanged,
}

/// Patch and delete primitives over volumes and the claims bound to them.
#[derive(Debug)]
pub struct VolumeOperations<'c, C> {
    cluster: &'c C,
    poller: Poller,
}

impl<'c, C: Cluster> VolumeOperations<'c, C> {
    /// Creates the operations over an injected orchestrator client.
    #[must_use]
    pub const fn new(cluster: &'c C, poller: Poller) -> Self {
        Self { cluster, poller }
    }

    /// Sets the volume's reclaim policy.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Cluster`] when the volume cannot be read or
    /// patched.
    pub async fn set_reclaim_policy(
        &self,
        volume: &str,
        policy: ReclaimPolicy,
    ) -> Result<Transition, MigrationError> {
        let current = self.cluster.get_volume(volume).await?;
        if current.reclaim_policy == policy {
            info!(volume, %policy, "volume already has the requested reclaim policy");
            return Ok(Transition::Unchanged);
        }

        info!(volume, from = %current.reclaim_policy, to = %policy, "patching reclaim policy");
        self.cluster.patch_reclaim_policy(volume, policy).await?;
        Ok(Transition::Applied)
    }

    /// Removes the volume's `claimRef` once the orchestrator has released it.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Precondition`] when the volume still carries
    /// a reference but is not `Released`.
    pub async fn clear_claim_ref(&self, volume: &str) -> Result<Transition, MigrationError> {
        let current = self.cluster.get_volume(volume).await?;
        let Some(claim_ref) = current.claim_ref else {
            info!(volume, "volume already has no claimRef");
            return Ok(Transition::Unchanged);
        };
        if current.phase != VolumePhase::Released {
            return Err(MigrationError::Precondition {
                volume: volume.to_owned(),
                action: "clearing its claimRef",
                expected: String::from("phase Released"),
                found: format!("phase {}", current.phase),
            });
        }

        info!(volume, was = %claim_ref, "removing claimRef");
        self.cluster.remove_claim_ref(volume).await?;
        Ok(Transition::Applied)
    }

    /// Pre-binds an available volume to the named claim.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Precondition`] when the volume is not
    /// `Available` and does not already reference the claim.
    pub async fn set_claim_ref(
        &self,
        volume: &str,
        claim: &str,
        namespace: &str,
    ) -> Result<Transition, MigrationError> {
        let target = ClaimRef::new(namespace, claim);
        let current = self.cluster.get_volume(volume).await?;
        if current.claim_ref.as_ref() == Some(&target) {
            info!(volume, claim = %target, "volume already references the claim");
            return Ok(Transition::Unchanged);
        }
        if current.phase != VolumePhase::Available {
            return Err(MigrationError::Precondition {
                volume: volume.to_owned(),
                action: "setting its claimRef",
                expected: String::from("phase Available"),
                found: format!("phase {}", current.phase),
            });
        }

        let previous = current
            .claim_ref
            .map_or_else(|| String::from("none"), |existing| existing.to_string());
        info!(volume, claim = %target, was = %previous, "patching claimRef");
        self.cluster.patch_claim_ref(volume, &target).await?;
        Ok(Transition::Applied)
    }

    /// Deletes the claim bound to a retained volume, waits for the release,
    /// and clears the stale reference.
    ///
    /// A claim that is already gone counts as deleted. No delete is issued
    /// unless `Retain` was observed on the volume immediately before.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Precondition`] when the volume's policy is
    /// not `Retain` or its claim lives outside `namespace`, and
    /// [`MigrationError::Cancelled`] when the release wait is aborted.
    pub async fn delete_claimant(
        &self,
        volume: &str,
        namespace: &str,
    ) -> Result<Transition, MigrationError> {
        let current = self.cluster.get_volume(volume).await?;
        if current.reclaim_policy != ReclaimPolicy::Retain {
            return Err(MigrationError::Precondition {
                volume: volume.to_owned(),
                action: "deleting its claim",
                expected: String::from("reclaim policy Retain"),
                found: format!("reclaim policy {}", current.reclaim_policy),
            });
        }
        let Some(claim_ref) = current.claim_ref else {
            info!(volume, "volume already has no claimRef");
            return Ok(Transition::Unchanged);
        };
        if claim_ref.namespace != namespace {
            return Err(MigrationError::Precondition {
                volume: volume.to_owned(),
                action: "deleting its claim",
                expected: format!("a claim in namespace {namespace}"),
                found: format!("claim {claim_ref}"),
            });
        }

        info!(volume, claim = %claim_ref, "deleting claim");
        match self.cluster.delete_claim(namespace, &claim_ref.name).await {
            Ok(()) => info!(claim = %claim_ref, "deleted claim"),
            Err(err) if err.is_not_found() => {
                info!(claim = %claim_ref, "claim already deleted");
            }
            Err(err) => return Err(err.into()),
        }

        self.await_released(volume).await?;
        self.clear_claim_ref(volume).await?;
        Ok(Transition::Applied)
    }

    /// Blocks until the volume reports phase `Released`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Cancelled`] when the poller is cancelled, or
    /// [`MigrationError::Cluster`] when the volume cannot be read.
    pub async fn await_released(&self, volume: &str) -> Result<(), MigrationError> {
        let waiting_for = format!("volume {volume} to be Released");
        loop {
            let current = self.cluster.get_volume(volume).await?;
            if current.phase == VolumePhase::Released {
                return Ok(());
            }
            info!(volume, phase = %current.phase, "waiting for volume to be Released");
            self.poller.tick(&waiting_for).await?;
        }
    }

    /// Points a bound claim's `volumeName` at another volume.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::NotBound`] when the claim has no volume yet.
    pub async fn set_claim_volume_name(
        &self,
        claim: &str,
        volume: &str,
        namespace: &str,
    ) -> Result<Transition, MigrationError> {
        let current = self.cluster.get_claim(namespace, claim).await?;
        let Some(bound) = current.volume_name else {
            return Err(MigrationError::NotBound {
                namespace: namespace.to_owned(),
                claim: claim.to_owned(),
            });
        };
        if bound == volume {
            info!(claim, volume, "claim already has the requested volumeName");
            return Ok(Transition::Unchanged);
        }

        info!(claim, volume, was = %bound, "patching claim volumeName");
        self.cluster
            .patch_claim_volume(namespace, claim, volume)
            .await?;
        Ok(Transition::Applied)
    }
}
