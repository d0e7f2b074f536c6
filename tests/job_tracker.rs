//! Behavioural tests for job completion tracking and log capture.

use std::time::Duration;

use disk_migration::test_support::{ClusterCall, FakeCluster, MemoryLogSink};
use disk_migration::{JobStatus, JobTracker, MigrationError, Poller};
use rstest::{fixture, rstest};
use tokio_util::sync::CancellationToken;

const NS: &str = "ns";
const JOB: &str = "migrate-c1";

#[fixture]
fn cluster() -> FakeCluster {
    let cluster = FakeCluster::new();
    cluster.set_job_pods(JOB, &[("migrate-c1-a", "attempt 1\n"), ("migrate-c1-b", "attempt 2\n")]);
    cluster
}

fn status_reads(cluster: &FakeCluster) -> usize {
    cluster
        .calls()
        .iter()
        .filter(|call| matches!(call, ClusterCall::JobStatus(..)))
        .count()
}

#[rstest]
#[tokio::test]
async fn polls_until_success_then_captures_logs(cluster: FakeCluster) {
    cluster.script_job(
        JOB,
        [JobStatus::Running, JobStatus::Running, JobStatus::Succeeded],
    );
    let sink = MemoryLogSink::new();
    let tracker = JobTracker::new(&cluster, &sink, Poller::new(Duration::from_millis(1)));

    let succeeded = tracker
        .await_job_completion(JOB, NS)
        .await
        .unwrap_or_else(|err| panic!("wait: {err}"));

    assert!(succeeded);
    assert_eq!(status_reads(&cluster), 3);
    let calls = cluster.calls();
    let last_status = calls
        .iter()
        .rposition(|call| matches!(call, ClusterCall::JobStatus(..)))
        .unwrap_or_else(|| panic!("status never read"));
    let first_log = calls
        .iter()
        .position(|call| matches!(call, ClusterCall::PodLogs(..)))
        .unwrap_or_else(|| panic!("logs never read"));
    assert!(last_status < first_log, "logs are read after the final status");
    assert_eq!(
        sink.entries(),
        vec![
            (JOB.to_owned(), String::from("migrate-c1-a"), String::from("attempt 1\n")),
            (JOB.to_owned(), String::from("migrate-c1-b"), String::from("attempt 2\n")),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn failed_job_still_captures_logs(cluster: FakeCluster) {
    cluster.script_job(JOB, [JobStatus::Running, JobStatus::Failed]);
    let sink = MemoryLogSink::new();
    let tracker = JobTracker::new(&cluster, &sink, Poller::new(Duration::from_millis(1)));

    let succeeded = tracker
        .await_job_completion(JOB, NS)
        .await
        .unwrap_or_else(|err| panic!("wait: {err}"));

    assert!(!succeeded);
    assert_eq!(sink.entries().len(), 2);
}

#[rstest]
#[tokio::test]
async fn log_fetch_failure_does_not_change_outcome(cluster: FakeCluster) {
    cluster.script_job(JOB, [JobStatus::Succeeded]);
    cluster.fail_pod_logs("migrate-c1-a");
    let sink = MemoryLogSink::new();
    let tracker = JobTracker::new(&cluster, &sink, Poller::new(Duration::from_millis(1)));

    let succeeded = tracker
        .await_job_completion(JOB, NS)
        .await
        .unwrap_or_else(|err| panic!("wait: {err}"));

    assert!(succeeded);
    let pods: Vec<String> = sink.entries().into_iter().map(|(_, pod, _)| pod).collect();
    assert_eq!(pods, vec![String::from("migrate-c1-b")]);
}

#[rstest]
#[tokio::test]
async fn cancellation_ends_the_wait(cluster: FakeCluster) {
    cluster.script_job(JOB, [JobStatus::Running]);
    let token = CancellationToken::new();
    let sink = MemoryLogSink::new();
    let tracker = JobTracker::new(
        &cluster,
        &sink,
        Poller::new(Duration::from_millis(1)).with_cancellation(token.clone()),
    );
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });

    let err = tracker
        .await_job_completion(JOB, NS)
        .await
        .expect_err("a never-ending job must be abandoned on cancel");
    canceller
        .await
        .unwrap_or_else(|err| panic!("canceller task: {err}"));

    assert_eq!(
        err,
        MigrationError::Cancelled {
            waiting_for: format!("job {NS}/{JOB} to finish"),
        }
    );
    assert!(sink.entries().is_empty());
}

#[rstest]
#[tokio::test]
async fn missing_job_is_an_error(cluster: FakeCluster) {
    let sink = MemoryLogSink::new();
    let tracker = JobTracker::new(&cluster, &sink, Poller::new(Duration::from_millis(1)));

    let err = tracker
        .await_job_completion("ghost", NS)
        .await
        .expect_err("unknown job");

    assert!(matches!(err, MigrationError::Cluster(ref inner) if inner.is_not_found()));
}
