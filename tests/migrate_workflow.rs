//! Tests for the end-to-end migration workflow.

use std::time::Duration;

use disk_migration::test_support::{ClusterCall, FakeCluster, MemoryLogSink};
use disk_migration::{
    ClaimRef, CopyLevel, JobStatus, MigrationError, MigrationOrchestrator, MigrationSettings,
    Poller, ReclaimPolicy, VolumePhase,
};
use rstest::{fixture, rstest};

const NS: &str = "creditcoin";

fn settings() -> MigrationSettings {
    MigrationSettings {
        storage_class: String::from("managed-csi"),
        capacity: String::from("50Gi"),
        job_image: String::from("debian"),
        chain: String::from("creditcoin"),
        copy_level: CopyLevel::All,
    }
}

#[fixture]
fn orchestrator() -> MigrationOrchestrator<FakeCluster, MemoryLogSink> {
    let cluster = FakeCluster::new();
    cluster.insert_bound_pair(NS, "c1", "v1", ReclaimPolicy::Delete);
    cluster.set_job_pods("migrate-c1", &[("migrate-c1-pod", "synced\n")]);
    MigrationOrchestrator::new(cluster, MemoryLogSink::new(), settings())
        .with_poller(Poller::new(Duration::from_millis(1)))
}

#[rstest]
#[tokio::test]
async fn migration_moves_claim_onto_fresh_volume(
    orchestrator: MigrationOrchestrator<FakeCluster, MemoryLogSink>,
) {
    let target = orchestrator
        .migrate_volume("c1", NS)
        .await
        .unwrap_or_else(|err| panic!("migrate: {err}"));

    assert_eq!(target, "pvc-dummy-for-c1");
    let cluster = orchestrator.cluster();
    let new = cluster
        .volume(&target)
        .unwrap_or_else(|| panic!("target volume missing"));
    assert_eq!(new.claim_ref, Some(ClaimRef::new(NS, "c1")));
    assert_eq!(new.reclaim_policy, ReclaimPolicy::Retain);
    let old = cluster
        .volume("v1")
        .unwrap_or_else(|| panic!("source volume was destroyed"));
    assert_eq!(old.phase, VolumePhase::Available);
    assert!(cluster.claim(NS, "dummy-for-c1").is_none());

    let job = cluster
        .job(NS, "migrate-c1")
        .unwrap_or_else(|| panic!("copy job missing"));
    let source = job
        .mounts
        .iter()
        .find(|mount| mount.claim == "c1")
        .unwrap_or_else(|| panic!("source not mounted"));
    assert!(source.read_only);
}

#[rstest]
#[tokio::test]
async fn failed_copy_never_touches_bindings(
    orchestrator: MigrationOrchestrator<FakeCluster, MemoryLogSink>,
) {
    orchestrator.cluster().script_job(
        "migrate-c1",
        [JobStatus::Running, JobStatus::Running, JobStatus::Failed],
    );

    let err = orchestrator
        .migrate_volume("c1", NS)
        .await
        .expect_err("failed copy must abort");

    assert_eq!(
        err,
        MigrationError::JobFailed {
            namespace: String::from(NS),
            job: String::from("migrate-c1"),
        }
    );
    assert_eq!(
        orchestrator.cluster().mutations(),
        vec![
            ClusterCall::CreateClaim(String::from(NS), String::from("dummy-for-c1")),
            ClusterCall::CreateJob(String::from(NS), String::from("migrate-c1")),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn existing_destination_claim_is_reused(
    orchestrator: MigrationOrchestrator<FakeCluster, MemoryLogSink>,
) {
    orchestrator.cluster().insert_bound_pair(
        NS,
        "dummy-for-c1",
        "v2",
        ReclaimPolicy::Delete,
    );

    let target = orchestrator
        .migrate_volume("c1", NS)
        .await
        .unwrap_or_else(|err| panic!("migrate: {err}"));

    assert_eq!(target, "v2");
}

#[rstest]
#[tokio::test]
async fn leftover_copy_job_is_a_hard_error(
    orchestrator: MigrationOrchestrator<FakeCluster, MemoryLogSink>,
) {
    orchestrator
        .migrate_volume("c1", NS)
        .await
        .unwrap_or_else(|err| panic!("first migrate: {err}"));

    let err = orchestrator
        .migrate_volume("c1", NS)
        .await
        .expect_err("job names collide");

    assert!(
        matches!(err, MigrationError::Cluster(ref inner) if inner.is_already_exists()),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn delete_chain_runs_job_against_claim(
    orchestrator: MigrationOrchestrator<FakeCluster, MemoryLogSink>,
) {
    orchestrator
        .delete_chain("c1", NS, false)
        .await
        .unwrap_or_else(|err| panic!("delete chain: {err}"));

    let job = orchestrator
        .cluster()
        .job(NS, "rm-rocksdb-c1")
        .unwrap_or_else(|| panic!("delete job missing"));
    assert!(job.script.contains("/src_vol/chains/creditcoin/db"));
    assert!(!job.script.contains("frontier"));
    assert_eq!(job.ttl_seconds_after_finished, 15);
}
