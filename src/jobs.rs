//! Drives batch jobs to a terminal state and harvests their pod logs.
//!
//! Logs are captured on both the success and the failure path because they
//! are the only record of what a copy or delete job did, and the orchestrator
//! garbage-collects finished jobs shortly after they finish.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{info, warn};

use crate::cluster::{Cluster, JobStatus};
use crate::error::MigrationError;
use crate::wait::Poller;

/// Errors raised while persisting job logs.
#[derive(Debug, Error)]
pub enum LogSinkError {
    /// Raised when the sink cannot write a log.
    #[error("failed to write {path}: {source}")]
    Io {
        /// Path that could not be written.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Destination for pod logs, keyed by job and pod name.
pub trait LogSink {
    /// Persists a pod's log.
    ///
    /// # Errors
    ///
    /// Returns [`LogSinkError`] when the log cannot be stored.
    fn write(&self, job: &str, pod: &str, contents: &str) -> Result<(), LogSinkError>;
}

/// Writes each pod log to `<dir>/<job>-<pod>.log`.
#[derive(Clone, Debug)]
pub struct FileLogSink {
    dir: Utf8PathBuf,
}

impl FileLogSink {
    /// Creates a sink rooted at `dir`; the directory is created on first
    /// write.
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory logs are written to.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Returns the file name used for a pod's log.
    #[must_use]
    pub fn file_name(job: &str, pod: &str) -> String {
        format!("{job}-{pod}.log")
    }
}

impl LogSink for FileLogSink {
    fn write(&self, job: &str, pod: &str, contents: &str) -> Result<(), LogSinkError> {
        let io_error = |source: io::Error| LogSinkError::Io {
            path: self.dir.clone(),
            source,
        };
        Dir::create_ambient_dir_all(&self.dir, ambient_authority()).map_err(io_error)?;
        let dir = Dir::open_ambient_dir(&self.dir, ambient_authority()).map_err(io_error)?;
        let file_name = Self::file_name(job, pod);
        dir.write(&file_name, contents)
            .map_err(|source| LogSinkError::Io {
                path: self.dir.join(&file_name),
                source,
            })
    }
}

/// Polls a job until it terminates, then stores every pod's log.
#[derive(Debug)]
pub struct JobTracker<'c, C, S> {
    cluster: &'c C,
    sink: &'c S,
    poller: Poller,
}

impl<'c, C: Cluster, S: LogSink> JobTracker<'c, C, S> {
    /// Creates a tracker over an injected orchestrator client and log sink.
    #[must_use]
    pub const fn new(cluster: &'c C, sink: &'c S, poller: Poller) -> Self {
        Self {
            cluster,
            sink,
            poller,
        }
    }

    /// Waits for the job to succeed or fail and captures its pod logs.
    ///
    /// Returns `true` when the job succeeded and `false` when it failed.
    /// Failures to read or store an individual pod log are reported as
    /// warnings and do not change the result.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Cluster`] when the job status cannot be read
    /// and [`MigrationError::Cancelled`] when the wait is aborted.
    pub async fn await_job_completion(
        &self,
        job: &str,
        namespace: &str,
    ) -> Result<bool, MigrationError> {
        let waiting_for = format!("job {namespace}/{job} to finish");
        let status = loop {
            let observed = self.cluster.job_status(namespace, job).await?;
            if observed.is_terminal() {
                break observed;
            }
            info!(job, "waiting for job to finish");
            self.poller.tick(&waiting_for).await?;
        };

        self.capture_logs(job, namespace).await;
        let succeeded = status == JobStatus::Succeeded;
        if succeeded {
            info!(job, "job succeeded");
        } else {
            warn!(job, "job failed");
        }
        Ok(succeeded)
    }

    async fn capture_logs(&self, job: &str, namespace: &str) {
        let pods = match self.cluster.job_pods(namespace, job).await {
            Ok(pods) => pods,
            Err(err) => {
                warn!(job, error = %err, "could not list job pods; logs not captured");
                return;
            }
        };

        for pod in pods {
            let contents = match self.cluster.pod_logs(namespace, &pod).await {
                Ok(contents) => contents,
                Err(err) => {
                    warn!(job, pod = %pod, error = %err, "could not fetch pod log");
                    continue;
                }
            };
            match self.sink.write(job, &pod, &contents) {
                Ok(()) => info!(job, pod = %pod, "captured pod log"),
                Err(err) => warn!(job, pod = %pod, error = %err, "could not store pod log"),
            }
        }
    }
}
