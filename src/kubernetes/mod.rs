//! [`Cluster`] implementation backed by the Kubernetes API.

mod convert;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use kube::api::{DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::warn;

use self::convert::map_error;

use crate::cluster::{
    Claim, ClaimRef, ClaimRequest, Cluster, ClusterError, ClusterFuture, JobRequest, JobStatus,
    ReclaimPolicy, ResourceKind, Volume,
};

/// Label the job controller puts on every pod it creates.
pub const JOB_NAME_LABEL: &str = "batch.kubernetes.io/job-name";

/// Kubernetes client used by the CLI.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    /// Wraps an existing client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects using the ambient kubeconfig or in-cluster service account.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Api`] when no usable configuration is found.
    pub async fn connect() -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|err| ClusterError::Api {
                message: err.to_string(),
            })?;
        Ok(Self::new(client))
    }

    fn volumes(&self) -> Api<PersistentVolume> {
        Api::all(self.client.clone())
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn merge_patch_volume(
        &self,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<(), ClusterError> {
        self.volumes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|err| map_error(err, ResourceKind::Volume, name))?;
        Ok(())
    }
}

impl Cluster for KubeCluster {
    fn get_volume<'a>(&'a self, name: &'a str) -> ClusterFuture<'a, Volume> {
        Box::pin(async move {
            let pv = self
                .volumes()
                .get(name)
                .await
                .map_err(|err| map_error(err, ResourceKind::Volume, name))?;
            convert::volume_from(pv)
        })
    }

    fn list_volumes(&self) -> ClusterFuture<'_, Vec<Volume>> {
        Box::pin(async move {
            let list = self
                .volumes()
                .list(&ListParams::default())
                .await
                .map_err(|err| map_error(err, ResourceKind::Volume, "*"))?;
            Ok(list
                .items
                .into_iter()
                .filter_map(|pv| match convert::volume_from(pv) {
                    Ok(volume) => Some(volume),
                    Err(err) => {
                        warn!(error = %err, "skipping volume");
                        None
                    }
                })
                .collect())
        })
    }

    fn patch_reclaim_policy<'a>(
        &'a self,
        name: &'a str,
        policy: ReclaimPolicy,
    ) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            self.merge_patch_volume(name, convert::reclaim_policy_patch(policy)).await
        })
    }

    fn remove_claim_ref<'a>(&'a self, name: &'a str) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            let patch = convert::claim_ref_removal()?;
            self.volumes()
                .patch(name, &PatchParams::default(), &Patch::Json::<()>(patch))
                .await
                .map_err(|err| map_error(err, ResourceKind::Volume, name))?;
            Ok(())
        })
    }

    fn patch_claim_ref<'a>(
        &'a self,
        name: &'a str,
        claim: &'a ClaimRef,
    ) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            self.merge_patch_volume(name, convert::claim_ref_patch(claim)).await
        })
    }

    fn delete_volume<'a>(&'a self, name: &'a str) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            self.volumes()
                .delete(name, &DeleteParams::default())
                .await
                .map_err(|err| map_error(err, ResourceKind::Volume, name))?;
            Ok(())
        })
    }

    fn get_claim<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, Claim> {
        Box::pin(async move {
            let pvc = self
                .claims(namespace)
                .get(name)
                .await
                .map_err(|err| map_error(err, ResourceKind::Claim, name))?;
            convert::claim_from(pvc)
        })
    }

    fn create_claim<'a>(
        &'a self,
        namespace: &'a str,
        request: &'a ClaimRequest,
    ) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            self.claims(namespace)
                .create(&PostParams::default(), &convert::claim_manifest(request))
                .await
                .map_err(|err| map_error(err, ResourceKind::Claim, &request.name))?;
            Ok(())
        })
    }

    fn delete_claim<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            self.claims(namespace)
                .delete(name, &DeleteParams::default())
                .await
                .map_err(|err| map_error(err, ResourceKind::Claim, name))?;
            Ok(())
        })
    }

    fn patch_claim_volume<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        volume: &'a str,
    ) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            let patch = convert::claim_volume_patch(volume);
            self.claims(namespace)
                .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|err| map_error(err, ResourceKind::Claim, name))?;
            Ok(())
        })
    }

    fn create_job<'a>(
        &'a self,
        namespace: &'a str,
        request: &'a JobRequest,
    ) -> ClusterFuture<'a, String> {
        Box::pin(async move {
            let created = self
                .jobs(namespace)
                .create(&PostParams::default(), &convert::job_manifest(request))
                .await
                .map_err(|err| map_error(err, ResourceKind::Job, &request.name))?;
            Ok(created.name_any())
        })
    }

    fn job_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> ClusterFuture<'a, JobStatus> {
        Box::pin(async move {
            let job = self
                .jobs(namespace)
                .get_status(name)
                .await
                .map_err(|err| map_error(err, ResourceKind::Job, name))?;
            Ok(convert::job_status_from(&job))
        })
    }

    fn job_pods<'a>(&'a self, namespace: &'a str, job: &'a str) -> ClusterFuture<'a, Vec<String>> {
        Box::pin(async move {
            let selector = format!("{JOB_NAME_LABEL}={job}");
            let pods = self
                .pods(namespace)
                .list(&ListParams::default().labels(&selector))
                .await
                .map_err(|err| map_error(err, ResourceKind::Pod, &selector))?;
            Ok(pods.items.iter().map(ResourceExt::name_any).collect())
        })
    }

    fn pod_logs<'a>(&'a self, namespace: &'a str, pod: &'a str) -> ClusterFuture<'a, String> {
        Box::pin(async move {
            self.pods(namespace)
                .logs(pod, &LogParams::default())
                .await
                .map_err(|err| map_error(err, ResourceKind::Pod, pod))
        })
    }
}
