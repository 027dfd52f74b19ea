use crate::metrics::SchedulerMetrics;
use crate::queue::IngestJob;
use ingestion::pipeline::IngestionPipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, info_span, Instrument};

/// One member of the ingestion pool. Workers share the receiver and drain
/// jobs until the scheduler drops the sender.
pub struct Worker {
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<IngestJob>>>,
    pipeline: Arc<IngestionPipeline>,
    metrics: Arc<SchedulerMetrics>,
    soft_deadline: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<IngestJob>>>,
        pipeline: Arc<IngestionPipeline>,
        metrics: Arc<SchedulerMetrics>,
        soft_deadline: Duration,
    ) -> Self {
        Self {
            id,
            receiver,
            pipeline,
            metrics,
            soft_deadline,
        }
    }

    pub async fn run(self) {
        info!(worker = self.id, "ingestion worker started");
        loop {
            let job = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await
            };
            let Some(job) = job else { break };

            self.metrics.started();
            let correlation_id = job.correlation_id.clone().unwrap_or_default();
            let span = info_span!(
                "ingest_job",
                worker = self.id,
                org_id = %job.document.org_id,
                document_id = %job.document.id,
                correlation_id = %correlation_id,
            );
            self.process(job).instrument(span).await;
        }
        info!(worker = self.id, "ingestion worker stopped");
    }

    async fn process(&self, job: IngestJob) {
        let org_id = job.document.org_id.clone();
        let document_id = job.document.id.clone();

        match tokio::time::timeout(self.soft_deadline, self.pipeline.process(&job.document)).await {
            Ok(Ok(outcome)) => {
                self.metrics.completed();
                info!(chunks = outcome.chunks_written, "job finished");
            }
            Ok(Err(e)) => {
                // The pipeline already moved the document to `error`.
                self.metrics.failed();
                error!(error = %e, "job failed");
            }
            Err(_) => {
                self.metrics.failed();
                error!(deadline_secs = self.soft_deadline.as_secs(), "job exceeded soft deadline");
                self.pipeline
                    .mark_failed(&org_id, &document_id, "timeout")
                    .await;
            }
        }
    }
}
