//! Orchestrates an end-to-end volume migration.
//!
//! The workflow provisions a destination volume through a throwaway claim,
//! copies the data with a batch job, and then rebinds the original claim's
//! name onto the freshly populated volume. Nothing is rolled back on failure:
//! every step is idempotent, so recovery is running the workflow again.

use tracing::info;

use crate::cluster::{Cluster, JobRequest};
use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::jobs::{JobTracker, LogSink};
use crate::rebind::Rebinder;
use crate::templates::{self, CopyJobSpec, CopyLevel};
use crate::wait::Poller;

/// Template inputs for the claims and jobs the workflow creates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MigrationSettings {
    /// Storage class requested for the destination volume.
    pub storage_class: String,
    /// Capacity requested for the destination volume.
    pub capacity: String,
    /// Image used by copy and delete jobs.
    pub job_image: String,
    /// Chain directory the jobs operate on.
    pub chain: String,
    /// Amount of data the copy job transfers.
    pub copy_level: CopyLevel,
}

impl MigrationSettings {
    /// Derives settings from loaded configuration.
    #[must_use]
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            storage_class: config.storage_class.clone(),
            capacity: config.dummy_claim_capacity.clone(),
            job_image: config.job_image.clone(),
            chain: config.chain_name.clone(),
            copy_level: CopyLevel::All,
        }
    }

    /// Overrides the copy level.
    #[must_use]
    pub const fn with_copy_level(mut self, level: CopyLevel) -> Self {
        self.copy_level = level;
        self
    }
}

/// Executes migration workflows against an injected orchestrator.
#[derive(Debug)]
pub struct MigrationOrchestrator<C, S> {
    cluster: C,
    sink: S,
    poller: Poller,
    settings: MigrationSettings,
}

impl<C: Cluster, S: LogSink> MigrationOrchestrator<C, S> {
    /// Creates an orchestrator polling at the default interval.
    #[must_use]
    pub fn new(cluster: C, sink: S, settings: MigrationSettings) -> Self {
        Self {
            cluster,
            sink,
            poller: Poller::default(),
            settings,
        }
    }

    /// Overrides the poller used for job and volume waits.
    #[must_use]
    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    /// Returns the orchestrator client.
    #[must_use]
    pub const fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Returns a rebind state machine sharing this orchestrator's client.
    #[must_use]
    pub fn rebinder(&self) -> Rebinder<'_, C> {
        Rebinder::new(&self.cluster, self.poller.clone())
    }

    /// Returns a job tracker sharing this orchestrator's client and sink.
    #[must_use]
    pub fn tracker(&self) -> JobTracker<'_, C, S> {
        JobTracker::new(&self.cluster, &self.sink, self.poller.clone())
    }

    /// Moves the data behind `existing_claim` onto a new volume and rebinds
    /// the claim's name to it. Returns the new volume's name.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::JobFailed`] when the copy job fails, in which
    /// case no rebind is attempted; [`MigrationError::NotBound`] when the
    /// destination claim was never bound; and any error from the rebind.
    pub async fn migrate_volume(
        &self,
        existing_claim: &str,
        namespace: &str,
    ) -> Result<String, MigrationError> {
        let dummy_claim = templates::dummy_claim_name(existing_claim);
        self.ensure_dummy_claim(&dummy_claim, namespace).await?;

        info!(from = existing_claim, to = %dummy_claim, "migrating data");
        let job_name = templates::copy_job_name(existing_claim);
        let request = templates::copy_job(&CopyJobSpec {
            name: &job_name,
            source_claim: existing_claim,
            destination_claim: &dummy_claim,
            chain: &self.settings.chain,
            level: self.settings.copy_level,
            image: &self.settings.job_image,
        });
        self.run_job(&request, namespace).await?;

        let target = self
            .rebinder()
            .bound_volume(&dummy_claim, namespace)
            .await?;
        info!(claim = %dummy_claim, volume = %target, "destination volume populated");

        self.rebinder()
            .rebind_claim_to_volume(existing_claim, &target, namespace)
            .await?;
        Ok(target)
    }

    /// Removes a chain's database directory from the volume behind `claim`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::JobFailed`] when the delete job fails.
    pub async fn delete_chain(
        &self,
        claim: &str,
        namespace: &str,
        delete_frontier: bool,
    ) -> Result<(), MigrationError> {
        let request = templates::delete_chain_job(
            claim,
            &self.settings.chain,
            delete_frontier,
            &self.settings.job_image,
        );
        self.run_job(&request, namespace).await
    }

    /// Creates a job and waits for it, failing when the job fails.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::JobFailed`] when the job reports failure and
    /// [`MigrationError::Cluster`] when it cannot be created or observed.
    pub async fn run_job(
        &self,
        request: &JobRequest,
        namespace: &str,
    ) -> Result<(), MigrationError> {
        let job = self.cluster.create_job(namespace, request).await?;
        info!(job = %job, namespace, "created job");
        if self.tracker().await_job_completion(&job, namespace).await? {
            Ok(())
        } else {
            Err(MigrationError::JobFailed {
                namespace: namespace.to_owned(),
                job,
            })
        }
    }

    async fn ensure_dummy_claim(&self, name: &str, namespace: &str) -> Result<(), MigrationError> {
        let request =
            templates::dummy_claim(name, &self.settings.capacity, &self.settings.storage_class);
        info!(claim = name, namespace, "creating destination claim");
        match self.cluster.create_claim(namespace, &request).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_exists() => {
                info!(claim = name, "destination claim already exists");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
