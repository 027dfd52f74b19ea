pub mod metrics;
pub mod queue;
pub mod worker;

pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use queue::{IngestJob, JobScheduler, SubmitError};
