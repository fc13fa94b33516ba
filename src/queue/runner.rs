// Runs one admitted job against the background remover.
// Whatever happens to the job, the permit is released before the result
// reaches the caller.

use super::gate::{Admission, AdmissionGate, GatePermit};
use crate::removal::{BackgroundRemover, RemovalError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// One request to remove the background of an image.
#[derive(Debug)]
pub struct Job {
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
    pub enqueued_at: Instant,
    pub started_at: Option<Instant>,
}

impl Job {
    pub fn new(payload: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            payload,
            content_type,
            enqueued_at: Instant::now(),
            started_at: None,
        }
    }

    /// Time spent between creation and the start of removal, once started.
    pub fn queued_for(&self) -> Option<Duration> {
        self.started_at
            .map(|started| started.duration_since(self.enqueued_at))
    }
}

#[derive(Debug)]
pub struct JobOutput {
    pub image: Vec<u8>,
    pub processing_time: Duration,
}

#[derive(Debug)]
pub enum JobError {
    Removal(RemovalError),
    TimedOut(Duration),
    // The job task panicked or was cancelled before finishing
    Aborted(String),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Removal(err) => write!(f, "background removal failed: {}", err),
            Self::TimedOut(limit) => write!(
                f,
                "background removal did not finish within {} ms",
                limit.as_millis()
            ),
            Self::Aborted(msg) => write!(f, "background removal job aborted: {}", msg),
        }
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Removal(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum SubmitError {
    Busy {
        last_processing_time: Option<Duration>,
    },
    Failed(JobError),
}

#[derive(Clone)]
pub struct JobRunner {
    gate: AdmissionGate,
    remover: Arc<dyn BackgroundRemover>,
    // Upper bound on a single removal call; None waits forever
    timeout: Option<Duration>,
}

impl JobRunner {
    /// `timeout` bounds each removal call. On expiry the removal future is
    /// dropped and the gate is freed with the elapsed time. Work that cannot
    /// be cancelled, such as `BorderKeyRemover`'s `spawn_blocking` section,
    /// keeps running in the background and may overlap the next admitted job.
    pub fn new(
        gate: AdmissionGate,
        remover: Arc<dyn BackgroundRemover>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            gate,
            remover,
            timeout,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Admits and runs `job`, or reports the gate as busy.
    pub async fn submit(&self, job: Job) -> Result<JobOutput, SubmitError> {
        match self.gate.try_admit() {
            Admission::Admitted(permit) => self.run(permit, job).await.map_err(SubmitError::Failed),
            Admission::Rejected {
                last_processing_time,
            } => Err(SubmitError::Busy {
                last_processing_time,
            }),
        }
    }

    /// Runs an admitted job to completion and releases its permit.
    ///
    /// The work is spawned together with the permit, so dropping this future
    /// (for example when the client disconnects) does not reopen the gate
    /// while the remover is still busy.
    pub async fn run(&self, permit: GatePermit, mut job: Job) -> Result<JobOutput, JobError> {
        let remover = self.remover.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            job.started_at = Some(Instant::now());
            let queued = job.queued_for().unwrap_or_default();
            info!(
                "Starting background removal with '{}': {} bytes ({}), queued {} ms",
                remover.name(),
                job.payload.len(),
                job.content_type.as_deref().unwrap_or("unknown type"),
                queued.as_millis()
            );

            let removal = remover.remove_background(&job.payload);
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, removal).await {
                    Ok(result) => result.map_err(JobError::Removal),
                    Err(_) => Err(JobError::TimedOut(limit)),
                },
                None => removal.await.map_err(JobError::Removal),
            };

            let elapsed = permit.elapsed();
            permit.release(elapsed);

            match &result {
                Ok(image) => info!(
                    "Background removal finished in {} ms ({} bytes)",
                    elapsed.as_millis(),
                    image.len()
                ),
                Err(err) => warn!(
                    "Background removal failed after {} ms: {}",
                    elapsed.as_millis(),
                    err
                ),
            }

            result.map(|image| JobOutput {
                image,
                processing_time: elapsed,
            })
        });

        // A panic inside the task drops the permit during unwinding, which
        // releases the gate before the JoinError surfaces here.
        handle
            .await
            .map_err(|e| JobError::Aborted(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Test double: sleeps for `delay`, then fails or echoes the input.
    struct FakeRemover {
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeRemover {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(delay: Duration) -> Self {
            Self {
                fail: true,
                ..Self::new(delay)
            }
        }
    }

    #[async_trait]
    impl BackgroundRemover for FakeRemover {
        fn name(&self) -> &str {
            "fake"
        }

        async fn remove_background(&self, image: &[u8]) -> Result<Vec<u8>, RemovalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(RemovalError::Decode("model exploded".to_string()));
            }
            Ok(image.to_vec())
        }
    }

    struct PanickingRemover;

    #[async_trait]
    impl BackgroundRemover for PanickingRemover {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn remove_background(&self, _image: &[u8]) -> Result<Vec<u8>, RemovalError> {
            panic!("remover bug");
        }
    }

    fn runner(remover: Arc<dyn BackgroundRemover>, timeout: Option<Duration>) -> JobRunner {
        JobRunner::new(AdmissionGate::new(), remover, timeout)
    }

    fn job(bytes: &[u8]) -> Job {
        Job::new(bytes.to_vec(), Some("image/png".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn queued_time_is_measured_from_creation_to_start() {
        let mut job = job(b"wait");
        assert_eq!(job.queued_for(), None);

        tokio::time::advance(Duration::from_millis(75)).await;
        job.started_at = Some(Instant::now());
        assert_eq!(job.queued_for(), Some(Duration::from_millis(75)));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_gate_rejects_then_next_job_reports_its_own_duration() {
        let runner = runner(Arc::new(FakeRemover::new(Duration::from_millis(200))), None);

        let first = tokio::spawn({
            let runner = runner.clone();
            async move { runner.submit(job(b"j1")).await }
        });
        // Let J1 get admitted and park on its sleep.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(runner.gate().snapshot().busy);

        match runner.submit(job(b"j2")).await {
            Err(SubmitError::Busy {
                last_processing_time,
            }) => assert_eq!(last_processing_time, None),
            other => panic!("expected busy, got {other:?}"),
        }

        let j1 = first.await.unwrap().unwrap();
        assert_eq!(j1.image, b"j1");
        assert_eq!(j1.processing_time, Duration::from_millis(200));
        assert!(!runner.gate().snapshot().busy);

        // Same gate, slower remover for J3.
        let j3_runner = JobRunner::new(
            runner.gate().clone(),
            Arc::new(FakeRemover::new(Duration::from_millis(350))),
            None,
        );
        let j3 = j3_runner.submit(job(b"j3")).await.unwrap();
        assert_eq!(j3.processing_time, Duration::from_millis(350));
        assert_eq!(
            runner.gate().snapshot().last_processing_time,
            Some(Duration::from_millis(350))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_removal_releases_gate() {
        let remover = Arc::new(FakeRemover::failing(Duration::from_millis(80)));
        let runner = runner(remover.clone(), None);

        match runner.submit(job(b"bad")).await {
            Err(SubmitError::Failed(JobError::Removal(RemovalError::Decode(msg)))) => {
                assert_eq!(msg, "model exploded")
            }
            other => panic!("expected removal failure, got {other:?}"),
        }
        let snapshot = runner.gate().snapshot();
        assert!(!snapshot.busy);
        assert_eq!(snapshot.last_processing_time, Some(Duration::from_millis(80)));

        assert!(matches!(runner.gate().try_admit(), Admission::Admitted(_)));
        assert_eq!(remover.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_removal_releases_gate() {
        let runner = runner(Arc::new(PanickingRemover), None);

        let err = runner.submit(job(b"boom")).await.unwrap_err();
        assert!(matches!(err, SubmitError::Failed(JobError::Aborted(_))));
        assert!(!runner.gate().snapshot().busy);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_force_releases_gate() {
        let runner = runner(
            Arc::new(FakeRemover::new(Duration::from_secs(600))),
            Some(Duration::from_secs(5)),
        );

        let err = runner.submit(job(b"hang")).await.unwrap_err();
        match err {
            SubmitError::Failed(JobError::TimedOut(limit)) => {
                assert_eq!(limit, Duration::from_secs(5))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        let snapshot = runner.gate().snapshot();
        assert!(!snapshot.busy);
        assert_eq!(snapshot.last_processing_time, Some(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_caller_keeps_gate_until_work_finishes() {
        let runner = runner(Arc::new(FakeRemover::new(Duration::from_millis(100))), None);

        let caller = tokio::spawn({
            let runner = runner.clone();
            async move { runner.submit(job(b"abandoned")).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();
        let _ = caller.await;

        assert!(runner.gate().snapshot().busy);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!runner.gate().snapshot().busy);
    }
}
