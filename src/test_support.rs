//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard as StdMutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::cluster::{
    Claim, ClaimRef, ClaimRequest, Cluster, ClusterError, ClusterFuture, JobRequest, JobStatus,
    ReclaimPolicy, ResourceKind, Volume, VolumePhase,
};
use crate::jobs::{LogSink, LogSinkError};

/// One orchestrator call recorded by [`FakeCluster`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClusterCall {
    /// `get_volume(name)`.
    GetVolume(String),
    /// `list_volumes()`.
    ListVolumes,
    /// `patch_reclaim_policy(name, policy)`.
    PatchReclaimPolicy(String, ReclaimPolicy),
    /// `remove_claim_ref(name)`.
    RemoveClaimRef(String),
    /// `patch_claim_ref(name, claim)`.
    PatchClaimRef(String, ClaimRef),
    /// `delete_volume(name)`.
    DeleteVolume(String),
    /// `get_claim(namespace, name)`.
    GetClaim(String, String),
    /// `create_claim(namespace, name)`.
    CreateClaim(String, String),
    /// `delete_claim(namespace, name)`.
    DeleteClaim(String, String),
    /// `patch_claim_volume(namespace, claim, volume)`.
    PatchClaimVolume(String, String, String),
    /// `create_job(namespace, name)`.
    CreateJob(String, String),
    /// `job_status(namespace, name)`.
    JobStatus(String, String),
    /// `job_pods(namespace, job)`.
    JobPods(String, String),
    /// `pod_logs(namespace, pod)`.
    PodLogs(String, String),
}

impl ClusterCall {
    /// Reports whether the call changes orchestrator state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::PatchReclaimPolicy(..)
                | Self::RemoveClaimRef(_)
                | Self::PatchClaimRef(..)
                | Self::DeleteVolume(_)
                | Self::CreateClaim(..)
                | Self::DeleteClaim(..)
                | Self::PatchClaimVolume(..)
                | Self::CreateJob(..)
        )
    }
}

#[derive(Debug, Default)]
struct State {
    volumes: BTreeMap<String, Volume>,
    claims: BTreeMap<(String, String), Claim>,
    jobs: BTreeMap<(String, String), JobRequest>,
    job_statuses: BTreeMap<String, VecDeque<JobStatus>>,
    job_pods: BTreeMap<String, Vec<String>>,
    pod_logs: BTreeMap<String, String>,
    failing_pod_logs: BTreeSet<String>,
    failing_claim_deletes: BTreeMap<String, ClusterError>,
    claims_pending_release: BTreeSet<String>,
    calls: Vec<ClusterCall>,
}

/// In-memory orchestrator that mimics the volume binder closely enough to
/// drive the migration workflows.
///
/// Deleting a claim marks the volume referencing it `Released`, or removes
/// the volume outright when its policy is `Delete`. Removing the reference
/// from a released volume makes it `Available`. Creating a claim provisions
/// and binds a `pvc-<name>` volume with the `Delete` policy.
#[derive(Clone, Debug, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StdMutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a volume.
    pub fn insert_volume(&self, volume: Volume) {
        self.state().volumes.insert(volume.name.clone(), volume);
    }

    /// Adds or replaces a claim.
    pub fn insert_claim(&self, claim: Claim) {
        self.state()
            .claims
            .insert((claim.namespace.clone(), claim.name.clone()), claim);
    }

    /// Adds a claim bound to a new volume with the given policy.
    pub fn insert_bound_pair(
        &self,
        namespace: &str,
        claim: &str,
        volume: &str,
        policy: ReclaimPolicy,
    ) {
        self.insert_volume(Volume {
            name: volume.to_owned(),
            reclaim_policy: policy,
            phase: VolumePhase::Bound,
            claim_ref: Some(ClaimRef::new(namespace, claim)),
            storage_class: Some(String::from("managed-csi")),
        });
        self.insert_claim(bound_claim(namespace, claim, volume));
    }

    /// Scripts the statuses a job reports, in order. The last one repeats.
    pub fn script_job(&self, job: &str, statuses: impl IntoIterator<Item = JobStatus>) {
        self.state()
            .job_statuses
            .insert(job.to_owned(), statuses.into_iter().collect());
    }

    /// Attaches pods with their logs to a job.
    pub fn set_job_pods(&self, job: &str, pods: &[(&str, &str)]) {
        let mut state = self.state();
        state.job_pods.insert(
            job.to_owned(),
            pods.iter().map(|(pod, _)| (*pod).to_owned()).collect(),
        );
        for (pod, log) in pods {
            state.pod_logs.insert((*pod).to_owned(), (*log).to_owned());
        }
    }

    /// Makes log retrieval for `pod` fail.
    pub fn fail_pod_logs(&self, pod: &str) {
        self.state().failing_pod_logs.insert(pod.to_owned());
    }

    /// Makes deletion of `claim` fail with `error` without touching state.
    pub fn fail_claim_delete(&self, claim: &str, error: ClusterError) {
        self.state()
            .failing_claim_deletes
            .insert(claim.to_owned(), error);
    }

    /// Keeps the volume of `claim` `Bound` after the claim is deleted until
    /// [`FakeCluster::release`] is called.
    pub fn delay_release(&self, claim: &str) {
        self.state().claims_pending_release.insert(claim.to_owned());
    }

    /// Moves a volume to `Released`, as the binder would.
    pub fn release(&self, volume: &str) {
        if let Some(entry) = self.state().volumes.get_mut(volume) {
            entry.phase = VolumePhase::Released;
        }
    }

    /// Returns a snapshot of a volume.
    #[must_use]
    pub fn volume(&self, name: &str) -> Option<Volume> {
        self.state().volumes.get(name).cloned()
    }

    /// Returns a snapshot of a claim.
    #[must_use]
    pub fn claim(&self, namespace: &str, name: &str) -> Option<Claim> {
        self.state()
            .claims
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Returns a created job's request.
    #[must_use]
    pub fn job(&self, namespace: &str, name: &str) -> Option<JobRequest> {
        self.state()
            .jobs
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state().calls.clone()
    }

    /// Returns only the recorded calls that change state.
    #[must_use]
    pub fn mutations(&self) -> Vec<ClusterCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn record(&self, call: ClusterCall) -> StdMutexGuard<'_, State> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

/// Builds a claim bound to `volume`.
#[must_use]
pub fn bound_claim(namespace: &str, name: &str, volume: &str) -> Claim {
    Claim {
        namespace: namespace.to_owned(),
        name: name.to_owned(),
        volume_name: Some(volume.to_owned()),
        capacity: Some(String::from("50Gi")),
        access_modes: vec![String::from("ReadWriteOnce")],
    }
}

/// Builds an unclaimed volume.
#[must_use]
pub fn available_volume(name: &str, policy: ReclaimPolicy) -> Volume {
    Volume {
        name: name.to_owned(),
        reclaim_policy: policy,
        phase: VolumePhase::Available,
        claim_ref: None,
        storage_class: Some(String::from("managed-csi")),
    }
}

fn not_found(kind: ResourceKind, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind,
        name: name.to_owned(),
    }
}

fn volume_mut<'s>(state: &'s mut State, name: &str) -> Result<&'s mut Volume, ClusterError> {
    state
        .volumes
        .get_mut(name)
        .ok_or_else(|| not_found(ResourceKind::Volume, name))
}

impl Cluster for FakeCluster {
    fn get_volume<'a>(&'a self, name: &'a str) -> ClusterFuture<'a, Volume> {
        let result = self
            .record(ClusterCall::GetVolume(name.to_owned()))
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Volume, name));
        Box::pin(async move { result })
    }

    fn list_volumes(&self) -> ClusterFuture<'_, Vec<Volume>> {
        let volumes: Vec<Volume> = self
            .record(ClusterCall::ListVolumes)
            .volumes
            .values()
            .cloned()
            .collect();
        Box::pin(async move { Ok(volumes) })
    }

    fn patch_reclaim_policy<'a>(
        &'a self,
        name: &'a str,
        policy: ReclaimPolicy,
    ) -> ClusterFuture<'a, ()> {
        let mut state = self.record(ClusterCall::PatchReclaimPolicy(name.to_owned(), policy));
        let result = volume_mut(&mut state, name).map(|volume| volume.reclaim_policy = policy);
        Box::pin(async move { result })
    }

    fn remove_claim_ref<'a>(&'a self, name: &'a str) -> ClusterFuture<'a, ()> {
        let mut state = self.record(ClusterCall::RemoveClaimRef(name.to_owned()));
        let result = volume_mut(&mut state, name).map(|volume| {
            volume.claim_ref = None;
            if volume.phase == VolumePhase::Released {
                volume.phase = VolumePhase::Available;
            }
        });
        Box::pin(async move { result })
    }

    fn patch_claim_ref<'a>(
        &'a self,
        name: &'a str,
        claim: &'a ClaimRef,
    ) -> ClusterFuture<'a, ()> {
        let mut state = self.record(ClusterCall::PatchClaimRef(name.to_owned(), claim.clone()));
        let result =
            volume_mut(&mut state, name).map(|volume| volume.claim_ref = Some(claim.clone()));
        Box::pin(async move { result })
    }

    fn delete_volume<'a>(&'a self, name: &'a str) -> ClusterFuture<'a, ()> {
        let result = self
            .record(ClusterCall::DeleteVolume(name.to_owned()))
            .volumes
            .remove(name)
            .map(drop)
            .ok_or_else(|| not_found(ResourceKind::Volume, name));
        Box::pin(async move { result })
    }

    fn get_claim<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, Claim> {
        let result = self
            .record(ClusterCall::GetClaim(namespace.to_owned(), name.to_owned()))
            .claims
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Claim, name));
        Box::pin(async move { result })
    }

    fn create_claim<'a>(
        &'a self,
        namespace: &'a str,
        request: &'a ClaimRequest,
    ) -> ClusterFuture<'a, ()> {
        let mut state = self.record(ClusterCall::CreateClaim(
            namespace.to_owned(),
            request.name.clone(),
        ));
        let key = (namespace.to_owned(), request.name.clone());
        let result = if state.claims.contains_key(&key) {
            Err(ClusterError::AlreadyExists {
                kind: ResourceKind::Claim,
                name: request.name.clone(),
            })
        } else {
            let volume = format!("pvc-{}", request.name);
            state.volumes.insert(
                volume.clone(),
                Volume {
                    name: volume.clone(),
                    reclaim_policy: ReclaimPolicy::Delete,
                    phase: VolumePhase::Bound,
                    claim_ref: Some(ClaimRef::new(namespace, &request.name)),
                    storage_class: Some(request.storage_class.clone()),
                },
            );
            let mut claim = bound_claim(namespace, &request.name, &volume);
            claim.capacity = Some(request.capacity.clone());
            claim.access_modes = vec![request.access_mode.clone()];
            state.claims.insert(key, claim);
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn delete_claim<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ()> {
        let mut guard =
            self.record(ClusterCall::DeleteClaim(namespace.to_owned(), name.to_owned()));
        let state = &mut *guard;
        let result = if let Some(err) = state.failing_claim_deletes.get(name) {
            Err(err.clone())
        } else if state
            .claims
            .remove(&(namespace.to_owned(), name.to_owned()))
            .is_none()
        {
            Err(not_found(ResourceKind::Claim, name))
        } else {
            let delayed = state.claims_pending_release.contains(name);
            let target = ClaimRef::new(namespace, name);
            state.volumes.retain(|_, volume| {
                volume.claim_ref.as_ref() != Some(&target)
                    || volume.reclaim_policy != ReclaimPolicy::Delete
            });
            for volume in state.volumes.values_mut() {
                if volume.claim_ref.as_ref() == Some(&target) && !delayed {
                    volume.phase = VolumePhase::Released;
                }
            }
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn patch_claim_volume<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        volume: &'a str,
    ) -> ClusterFuture<'a, ()> {
        let mut state = self.record(ClusterCall::PatchClaimVolume(
            namespace.to_owned(),
            name.to_owned(),
            volume.to_owned(),
        ));
        let result = state
            .claims
            .get_mut(&(namespace.to_owned(), name.to_owned()))
            .map(|claim| claim.volume_name = Some(volume.to_owned()))
            .ok_or_else(|| not_found(ResourceKind::Claim, name));
        Box::pin(async move { result })
    }

    fn create_job<'a>(
        &'a self,
        namespace: &'a str,
        request: &'a JobRequest,
    ) -> ClusterFuture<'a, String> {
        let mut state = self.record(ClusterCall::CreateJob(
            namespace.to_owned(),
            request.name.clone(),
        ));
        let key = (namespace.to_owned(), request.name.clone());
        let result = if state.jobs.contains_key(&key) {
            Err(ClusterError::AlreadyExists {
                kind: ResourceKind::Job,
                name: request.name.clone(),
            })
        } else {
            state.jobs.insert(key, request.clone());
            Ok(request.name.clone())
        };
        Box::pin(async move { result })
    }

    fn job_status<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> ClusterFuture<'a, JobStatus> {
        let mut guard = self.record(ClusterCall::JobStatus(namespace.to_owned(), name.to_owned()));
        let state = &mut *guard;
        let created = state
            .jobs
            .contains_key(&(namespace.to_owned(), name.to_owned()));
        let scripted = state.job_statuses.get_mut(name).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().copied()
            }
        });
        let result = match scripted {
            Some(status) => Ok(status),
            None if created => Ok(JobStatus::Succeeded),
            None => Err(not_found(ResourceKind::Job, name)),
        };
        Box::pin(async move { result })
    }

    fn job_pods<'a>(&'a self, namespace: &'a str, job: &'a str) -> ClusterFuture<'a, Vec<String>> {
        let pods = self
            .record(ClusterCall::JobPods(namespace.to_owned(), job.to_owned()))
            .job_pods
            .get(job)
            .cloned()
            .unwrap_or_default();
        Box::pin(async move { Ok(pods) })
    }

    fn pod_logs<'a>(&'a self, namespace: &'a str, pod: &'a str) -> ClusterFuture<'a, String> {
        let state = self.record(ClusterCall::PodLogs(namespace.to_owned(), pod.to_owned()));
        let result = if state.failing_pod_logs.contains(pod) {
            Err(ClusterError::Api {
                message: format!("container for pod {pod} is gone"),
            })
        } else {
            state
                .pod_logs
                .get(pod)
                .cloned()
                .ok_or_else(|| not_found(ResourceKind::Pod, pod))
        };
        Box::pin(async move { result })
    }
}

/// Log sink that keeps captured logs in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryLogSink {
    entries: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl MemoryLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(job, pod, contents)` for every captured log, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, String, String)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LogSink for MemoryLogSink {
    fn write(&self, job: &str, pod: &str, contents: &str) -> Result<(), LogSinkError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((job.to_owned(), pod.to_owned(), contents.to_owned()));
        Ok(())
    }
}

/// Global mutex serialising environment mutation across tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
#[derive(Debug)]
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
