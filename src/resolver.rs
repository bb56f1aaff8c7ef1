//! Result resolver for asynchronous backends
//!
//! Drives a submitted job to a terminal state: poll on a fixed interval,
//! download the artifact once outputs appear, stop immediately on an
//! explicit backend error, and give up after a bounded number of polls.
//! Polling is cooperative; the only suspension points are the poll call,
//! the download call, and the sleep between iterations.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Opaque identifier returned by an asynchronous submission. Valid until a
/// terminal state is observed; not reusable afterward.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a single status query
#[derive(Debug, Clone)]
pub enum PollOutcome<A> {
    /// No record yet, or a record without completed outputs
    Pending,
    /// Completed with a downloadable artifact descriptor
    Completed(A),
    /// The backend reported an explicit error; polling must stop
    Rejected(String),
}

/// Status source for one asynchronous backend shape
#[async_trait]
pub trait JobStatus: Send + Sync {
    /// Descriptor needed to download the finished artifact
    type Artifact: Send;

    /// Query the job's current status.
    async fn poll(&self, handle: &JobHandle) -> Result<PollOutcome<Self::Artifact>>;

    /// Fetch the finished artifact's raw bytes.
    async fn download(&self, artifact: &Self::Artifact) -> Result<Vec<u8>>;
}

/// Bounded poll loop over a [`JobStatus`] source
#[derive(Debug, Clone)]
pub struct Resolver {
    poll_interval: Duration,
    max_polls: u32,
}

impl Resolver {
    pub fn new(poll_interval: Duration, max_polls: u32) -> Self {
        Self {
            poll_interval,
            max_polls: max_polls.max(1),
        }
    }

    /// Poll until a terminal state is reached, then download and return the
    /// artifact bytes. Raises [`Error::TimeoutExceeded`] when the poll
    /// budget lapses without completed outputs, and
    /// [`Error::UpstreamRejection`] when the backend reports an error.
    pub async fn resolve<S: JobStatus + ?Sized>(
        &self,
        source: &S,
        handle: &JobHandle,
    ) -> Result<Vec<u8>> {
        for iteration in 1..=self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            match source.poll(handle).await? {
                PollOutcome::Pending => {
                    debug!(job = %handle, iteration = iteration, "Job still pending");
                }
                PollOutcome::Completed(artifact) => {
                    info!(job = %handle, iterations = iteration, "Job completed");
                    return source.download(&artifact).await;
                }
                PollOutcome::Rejected(reason) => {
                    return Err(Error::UpstreamRejection(reason));
                }
            }
        }

        Err(Error::TimeoutExceeded(self.max_polls))
    }
}
