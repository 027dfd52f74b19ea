use crate::metrics::{MetricsSnapshot, SchedulerMetrics};
use crate::worker::Worker;
use ingestion::pipeline::{IngestionError, IngestionPipeline};
use quarry_core::error::{ErrorCode, QuarryError};
use quarry_core::model::Document;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

#[derive(Debug, Clone)]
pub struct IngestJob {
    pub document: Document,
    pub force: bool,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The worker queue is full; the caller may retry later.
    #[error("ingestion queue is full")]
    Busy,
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error("scheduler is shut down")]
    Closed,
}

impl QuarryError for SubmitError {
    fn error_code(&self) -> ErrorCode {
        match self {
            SubmitError::Busy => ErrorCode::Busy,
            SubmitError::Ingestion(e) => e.error_code(),
            SubmitError::Closed => ErrorCode::Internal,
        }
    }
}

/// Bounded-queue ingestion scheduler over a fixed worker pool.
///
/// `submit` claims the document row (so callers observe 404/409
/// synchronously), then hands the job to the pool without blocking. A full
/// queue releases the claim and reports `Busy`.
pub struct JobScheduler {
    sender: mpsc::Sender<IngestJob>,
    pipeline: Arc<IngestionPipeline>,
    metrics: Arc<SchedulerMetrics>,
}

impl JobScheduler {
    pub fn start(
        pipeline: Arc<IngestionPipeline>,
        workers: usize,
        queue_depth: usize,
        soft_deadline: Duration,
    ) -> Arc<Self> {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel::<IngestJob>(queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let metrics = Arc::new(SchedulerMetrics::new());

        for worker_id in 0..workers {
            let worker = Worker::new(
                worker_id,
                receiver.clone(),
                pipeline.clone(),
                metrics.clone(),
                soft_deadline,
            );
            tokio::spawn(worker.run());
        }
        info!(workers, queue_depth, "ingestion scheduler started");

        Arc::new(Self {
            sender,
            pipeline,
            metrics,
        })
    }

    pub async fn submit(
        &self,
        org_id: &str,
        document_id: &str,
        force: bool,
        correlation_id: Option<String>,
    ) -> Result<(), SubmitError> {
        let document = self.pipeline.claim(org_id, document_id, force).await?;

        let job = IngestJob {
            document,
            force,
            correlation_id,
        };

        match self.sender.try_send(job) {
            Ok(()) => {
                self.metrics.enqueued();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                // Undo the claim so a retry is not met with AlreadyRunning.
                self.pipeline
                    .abandon(&job.document.org_id, &job.document.id)
                    .await;
                Err(SubmitError::Busy)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.pipeline
                    .abandon(&job.document.org_id, &job.document.id)
                    .await;
                Err(SubmitError::Closed)
            }
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
