//! Translation between Kubernetes objects and migration records.
//!
//! Fetched objects are validated here, once; a missing mandatory field is a
//! [`ClusterError::Malformed`] rather than an `Option` the core must check.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume as PodVolume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{Value, json};

use crate::cluster::{
    Claim, ClaimRef, ClaimRequest, ClusterError, JobRequest, JobStatus, ReclaimPolicy,
    ResourceKind, Volume, VolumePhase,
};

/// Backoff limit the API server applies when a job omits one.
const DEFAULT_BACKOFF_LIMIT: i32 = 6;

fn malformed(kind: ResourceKind, name: &str, detail: impl Into<String>) -> ClusterError {
    ClusterError::Malformed {
        kind,
        name: name.to_owned(),
        detail: detail.into(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|inner| !inner.is_empty())
}

/// Converts a fetched persistent volume.
pub(super) fn volume_from(pv: PersistentVolume) -> Result<Volume, ClusterError> {
    let kind = ResourceKind::Volume;
    let name = non_empty(pv.metadata.name)
        .ok_or_else(|| malformed(kind, "<unnamed>", "missing metadata.name"))?;
    let spec = pv
        .spec
        .ok_or_else(|| malformed(kind, &name, "missing spec"))?;

    let policy_text = spec
        .persistent_volume_reclaim_policy
        .ok_or_else(|| malformed(kind, &name, "missing spec.persistentVolumeReclaimPolicy"))?;
    let reclaim_policy = ReclaimPolicy::parse(&policy_text)
        .ok_or_else(|| malformed(kind, &name, format!("unknown reclaim policy {policy_text}")))?;

    let phase_text = pv
        .status
        .and_then(|status| status.phase)
        .ok_or_else(|| malformed(kind, &name, "missing status.phase"))?;
    let phase = VolumePhase::parse(&phase_text)
        .ok_or_else(|| malformed(kind, &name, format!("unknown phase {phase_text}")))?;

    let claim_ref = match spec.claim_ref {
        None => None,
        Some(reference) => {
            let claim = non_empty(reference.name)
                .ok_or_else(|| malformed(kind, &name, "spec.claimRef has no name"))?;
            let namespace = non_empty(reference.namespace)
                .ok_or_else(|| malformed(kind, &name, "spec.claimRef has no namespace"))?;
            Some(ClaimRef::new(namespace, claim))
        }
    };
    if phase == VolumePhase::Bound && claim_ref.is_none() {
        return Err(malformed(kind, &name, "phase Bound without spec.claimRef"));
    }

    Ok(Volume {
        name,
        reclaim_policy,
        phase,
        claim_ref,
        storage_class: non_empty(spec.storage_class_name),
    })
}

/// Converts a fetched persistent volume claim.
pub(super) fn claim_from(pvc: PersistentVolumeClaim) -> Result<Claim, ClusterError> {
    let kind = ResourceKind::Claim;
    let name = non_empty(pvc.metadata.name)
        .ok_or_else(|| malformed(kind, "<unnamed>", "missing metadata.name"))?;
    let namespace = non_empty(pvc.metadata.namespace)
        .ok_or_else(|| malformed(kind, &name, "missing metadata.namespace"))?;
    let spec = pvc
        .spec
        .ok_or_else(|| malformed(kind, &name, "missing spec"))?;

    let capacity = spec
        .resources
        .and_then(|resources| resources.requests)
        .and_then(|requests| requests.get("storage").map(|quantity| quantity.0.clone()));

    Ok(Claim {
        namespace,
        name,
        volume_name: non_empty(spec.volume_name),
        capacity,
        access_modes: spec.access_modes.unwrap_or_default(),
    })
}

/// Derives a job's terminal state from its conditions, falling back to the
/// pod counters when the controller has not written conditions yet.
pub(super) fn job_status_from(job: &Job) -> JobStatus {
    let backoff_limit = job
        .spec
        .as_ref()
        .and_then(|spec| spec.backoff_limit)
        .unwrap_or(DEFAULT_BACKOFF_LIMIT);
    let Some(status) = job.status.as_ref() else {
        return JobStatus::Running;
    };
    let has_condition = |kind: &str| {
        status.conditions.as_ref().is_some_and(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == kind && condition.status == "True")
        })
    };

    if has_condition("Complete") || status.succeeded.unwrap_or(0) > 0 {
        JobStatus::Succeeded
    } else if has_condition("Failed") || status.failed.unwrap_or(0) > backoff_limit {
        JobStatus::Failed
    } else {
        JobStatus::Running
    }
}

/// Renders a claim request.
pub(super) fn claim_manifest(request: &ClaimRequest) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(request.name.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![request.access_mode.clone()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    String::from("storage"),
                    Quantity(request.capacity.clone()),
                )])),
                ..VolumeResourceRequirements::default()
            }),
            storage_class_name: Some(request.storage_class.clone()),
            ..PersistentVolumeClaimSpec::default()
        }),
        ..PersistentVolumeClaim::default()
    }
}

/// Renders a job request as a single-container, never-restarting job.
pub(super) fn job_manifest(request: &JobRequest) -> Job {
    let volume_mounts = request
        .mounts
        .iter()
        .map(|mount| VolumeMount {
            name: mount.name.clone(),
            mount_path: mount.path.clone(),
            read_only: mount.read_only.then_some(true),
            ..VolumeMount::default()
        })
        .collect();
    let volumes = request
        .mounts
        .iter()
        .map(|mount| PodVolume {
            name: mount.name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: mount.claim.clone(),
                read_only: None,
            }),
            ..PodVolume::default()
        })
        .collect();

    Job {
        metadata: ObjectMeta {
            name: Some(request.name.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(request.backoff_limit),
            ttl_seconds_after_finished: Some(request.ttl_seconds_after_finished),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: String::from("migrate"),
                        image: Some(request.image.clone()),
                        command: Some(vec![String::from("/bin/bash"), String::from("-c")]),
                        args: Some(vec![request.script.clone()]),
                        volume_mounts: Some(volume_mounts),
                        ..Container::default()
                    }],
                    restart_policy: Some(String::from("Never")),
                    volumes: Some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        ..Job::default()
    }
}

/// Maps client failures onto the kinds the core distinguishes.
pub(super) fn map_error(err: kube::Error, kind: ResourceKind, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_owned(),
        },
        kube::Error::Api(response) if response.code == 409 => ClusterError::AlreadyExists {
            kind,
            name: name.to_owned(),
        },
        other => ClusterError::Api {
            message: format!("{kind} {name}: {other}"),
        },
    }
}

/// Merge patch setting a volume's reclaim policy.
pub(super) fn reclaim_policy_patch(policy: ReclaimPolicy) -> Value {
    json!({ "spec": { "persistentVolumeReclaimPolicy": policy.as_str() } })
}

/// Merge patch pointing a volume's `claimRef` at a claim.
pub(super) fn claim_ref_patch(claim: &ClaimRef) -> Value {
    json!({
        "spec": {
            "claimRef": { "namespace": claim.namespace, "name": claim.name }
        }
    })
}

/// Merge patch pointing a claim at a volume.
pub(super) fn claim_volume_patch(volume: &str) -> Value {
    json!({ "spec": { "volumeName": volume } })
}

/// JSON patch dropping a volume's `claimRef`.
pub(super) fn claim_ref_removal() -> Result<json_patch::Patch, ClusterError> {
    serde_json::from_value(json!([{ "op": "remove", "path": "/spec/claimRef" }])).map_err(
        |err| ClusterError::Api {
            message: format!("invalid claimRef removal patch: {err}"),
        },
    )
}
