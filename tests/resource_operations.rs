//! Behavioural tests for idempotent volume and claim transitions.

use std::time::Duration;

use disk_migration::test_support::{ClusterCall, FakeCluster, available_volume};
use disk_migration::{
    ClaimRef, ClusterError, MigrationError, Poller, ReclaimPolicy, ResourceKind, Transition,
    Volume, VolumeOperations, VolumePhase,
};
use rstest::{fixture, rstest};

const NS: &str = "ns";

#[fixture]
fn cluster() -> FakeCluster {
    FakeCluster::new()
}

fn poller() -> Poller {
    Poller::new(Duration::from_millis(1))
}

fn volume(cluster: &FakeCluster, name: &str) -> Volume {
    cluster
        .volume(name)
        .unwrap_or_else(|| panic!("volume {name} missing"))
}

#[rstest]
#[tokio::test]
async fn set_reclaim_policy_patches_only_when_different(cluster: FakeCluster) {
    cluster.insert_volume(available_volume("v1", ReclaimPolicy::Delete));
    let ops = VolumeOperations::new(&cluster, poller());

    let first = ops
        .set_reclaim_policy("v1", ReclaimPolicy::Retain)
        .await
        .unwrap_or_else(|err| panic!("first patch: {err}"));
    let second = ops
        .set_reclaim_policy("v1", ReclaimPolicy::Retain)
        .await
        .unwrap_or_else(|err| panic!("second patch: {err}"));

    assert_eq!(first, Transition::Applied);
    assert_eq!(second, Transition::Unchanged);
    assert_eq!(
        cluster.mutations(),
        vec![ClusterCall::PatchReclaimPolicy(
            String::from("v1"),
            ReclaimPolicy::Retain
        )]
    );
}

#[rstest]
#[tokio::test]
async fn missing_volume_is_a_hard_failure(cluster: FakeCluster) {
    let ops = VolumeOperations::new(&cluster, poller());

    let err = ops
        .set_reclaim_policy("ghost", ReclaimPolicy::Retain)
        .await
        .expect_err("reads are mandatory");

    assert_eq!(
        err,
        MigrationError::Cluster(ClusterError::NotFound {
            kind: ResourceKind::Volume,
            name: String::from("ghost"),
        })
    );
}

#[rstest]
#[tokio::test]
async fn clear_claim_ref_requires_released_phase(cluster: FakeCluster) {
    cluster.insert_bound_pair(NS, "c1", "v1", ReclaimPolicy::Retain);
    let ops = VolumeOperations::new(&cluster, poller());

    let err = ops
        .clear_claim_ref("v1")
        .await
        .expect_err("bound volume must keep its claimRef");

    assert!(
        matches!(err, MigrationError::Precondition { ref found, .. } if found == "phase Bound"),
        "unexpected error: {err}"
    );
    assert!(cluster.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn clear_claim_ref_is_a_no_op_without_reference(cluster: FakeCluster) {
    cluster.insert_volume(available_volume("v1", ReclaimPolicy::Retain));
    let ops = VolumeOperations::new(&cluster, poller());

    let outcome = ops
        .clear_claim_ref("v1")
        .await
        .unwrap_or_else(|err| panic!("clear: {err}"));

    assert_eq!(outcome, Transition::Unchanged);
    assert!(cluster.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn set_claim_ref_requires_available_phase(cluster: FakeCluster) {
    let mut released = available_volume("v1", ReclaimPolicy::Retain);
    released.phase = VolumePhase::Released;
    released.claim_ref = Some(ClaimRef::new(NS, "old"));
    cluster.insert_volume(released);
    let ops = VolumeOperations::new(&cluster, poller());

    let err = ops
        .set_claim_ref("v1", "c1", NS)
        .await
        .expect_err("released volume must be cleared first");

    assert!(matches!(err, MigrationError::Precondition { .. }));
    assert!(cluster.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn set_claim_ref_accepts_existing_reference(cluster: FakeCluster) {
    cluster.insert_bound_pair(NS, "c1", "v1", ReclaimPolicy::Retain);
    let ops = VolumeOperations::new(&cluster, poller());

    let outcome = ops
        .set_claim_ref("v1", "c1", NS)
        .await
        .unwrap_or_else(|err| panic!("set claimRef: {err}"));

    assert_eq!(outcome, Transition::Unchanged);
    assert!(cluster.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn delete_claimant_refuses_delete_policy(cluster: FakeCluster) {
    cluster.insert_bound_pair(NS, "c1", "v1", ReclaimPolicy::Delete);
    let ops = VolumeOperations::new(&cluster, poller());

    let err = ops
        .delete_claimant("v1", NS)
        .await
        .expect_err("deleting the claim would destroy the storage");

    assert!(
        matches!(
            err,
            MigrationError::Precondition { ref expected, .. } if expected == "reclaim policy Retain"
        ),
        "unexpected error: {err}"
    );
    assert!(cluster.mutations().is_empty());
    assert!(cluster.claim(NS, "c1").is_some());
}

#[rstest]
#[tokio::test]
async fn delete_claimant_refuses_foreign_namespace(cluster: FakeCluster) {
    cluster.insert_bound_pair("other", "c1", "v1", ReclaimPolicy::Retain);
    let ops = VolumeOperations::new(&cluster, poller());

    let err = ops
        .delete_claimant("v1", NS)
        .await
        .expect_err("claims outside the namespace are left alone");

    assert!(matches!(err, MigrationError::Precondition { .. }));
    assert!(cluster.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn delete_claimant_detaches_and_frees_volume(cluster: FakeCluster) {
    cluster.insert_bound_pair(NS, "c1", "v1", ReclaimPolicy::Retain);
    let ops = VolumeOperations::new(&cluster, poller());

    let outcome = ops
        .delete_claimant("v1", NS)
        .await
        .unwrap_or_else(|err| panic!("delete claimant: {err}"));

    assert_eq!(outcome, Transition::Applied);
    let freed = volume(&cluster, "v1");
    assert_eq!(freed.phase, VolumePhase::Available);
    assert_eq!(freed.claim_ref, None);
    assert_eq!(
        cluster.mutations(),
        vec![
            ClusterCall::DeleteClaim(String::from(NS), String::from("c1")),
            ClusterCall::RemoveClaimRef(String::from("v1")),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn delete_claimant_treats_missing_claim_as_deleted(cluster: FakeCluster) {
    let mut released = available_volume("v1", ReclaimPolicy::Retain);
    released.phase = VolumePhase::Released;
    released.claim_ref = Some(ClaimRef::new(NS, "gone"));
    cluster.insert_volume(released);
    let ops = VolumeOperations::new(&cluster, poller());

    ops.delete_claimant("v1", NS)
        .await
        .unwrap_or_else(|err| panic!("delete claimant: {err}"));

    assert_eq!(volume(&cluster, "v1").phase, VolumePhase::Available);
}

#[rstest]
#[case::api(ClusterError::Api { message: String::from("forbidden") })]
#[case::conflict(ClusterError::AlreadyExists {
    kind: ResourceKind::Claim,
    name: String::from("c1"),
})]
#[tokio::test]
async fn delete_claimant_surfaces_other_delete_failures(
    cluster: FakeCluster,
    #[case] failure: ClusterError,
) {
    cluster.insert_bound_pair(NS, "c1", "v1", ReclaimPolicy::Retain);
    cluster.fail_claim_delete("c1", failure.clone());
    let ops = VolumeOperations::new(&cluster, poller());

    let err = ops
        .delete_claimant("v1", NS)
        .await
        .expect_err("only NotFound counts as deleted");

    assert_eq!(err, MigrationError::Cluster(failure));
    assert_eq!(volume(&cluster, "v1").phase, VolumePhase::Bound);
}

#[rstest]
#[tokio::test]
async fn delete_claimant_waits_for_release(cluster: FakeCluster) {
    cluster.insert_bound_pair(NS, "c1", "v1", ReclaimPolicy::Retain);
    cluster.delay_release("c1");
    let binder = cluster.clone();
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        binder.release("v1");
    });
    let ops = VolumeOperations::new(&cluster, poller());

    ops.delete_claimant("v1", NS)
        .await
        .unwrap_or_else(|err| panic!("delete claimant: {err}"));
    releaser
        .await
        .unwrap_or_else(|err| panic!("releaser task: {err}"));

    let polls = cluster
        .calls()
        .iter()
        .filter(|call| matches!(call, ClusterCall::GetVolume(name) if name == "v1"))
        .count();
    assert!(polls > 2, "expected repeated polling, saw {polls} reads");
    assert_eq!(volume(&cluster, "v1").phase, VolumePhase::Available);
}

#[rstest]
#[tokio::test]
async fn set_claim_volume_name_requires_bound_claim(cluster: FakeCluster) {
    let mut pending = disk_migration::test_support::bound_claim(NS, "c1", "v1");
    pending.volume_name = None;
    cluster.insert_claim(pending);
    let ops = VolumeOperations::new(&cluster, poller());

    let err = ops
        .set_claim_volume_name("c1", "v2", NS)
        .await
        .expect_err("unbound claim");

    assert_eq!(
        err,
        MigrationError::NotBound {
            namespace: String::from(NS),
            claim: String::from("c1"),
        }
    );
}

#[rstest]
#[tokio::test]
async fn set_claim_volume_name_patches_once(cluster: FakeCluster) {
    cluster.insert_bound_pair(NS, "c1", "v1", ReclaimPolicy::Retain);
    let ops = VolumeOperations::new(&cluster, poller());

    let first = ops
        .set_claim_volume_name("c1", "v2", NS)
        .await
        .unwrap_or_else(|err| panic!("first: {err}"));
    let second = ops
        .set_claim_volume_name("c1", "v2", NS)
        .await
        .unwrap_or_else(|err| panic!("second: {err}"));

    assert_eq!((first, second), (Transition::Applied, Transition::Unchanged));
}
