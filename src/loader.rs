use crate::db::{BatchSink, SinkRow};
use crate::models::Reading;
use crate::retry::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub batches: usize,
    pub batches_failed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl LoadSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Uploads readings in fixed-size batches.
///
/// Each batch gets its own retry budget. A batch that still fails is counted
/// and skipped; it never aborts the remaining batches.
pub struct BatchLoader {
    sink: Arc<dyn BatchSink>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl BatchLoader {
    pub fn new(sink: Arc<dyn BatchSink>, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    pub async fn load(&self, readings: &[Reading]) -> LoadSummary {
        let mut summary = LoadSummary::default();
        let total_batches = readings.len().div_ceil(self.batch_size);

        info!(
            "Loading {} rows into {} in {} batch{} of up to {}",
            readings.len(),
            self.sink.describe(),
            total_batches,
            if total_batches == 1 { "" } else { "es" },
            self.batch_size
        );

        for (batch_idx, chunk) in readings.chunks(self.batch_size).enumerate() {
            let batch_no = batch_idx + 1;
            let rows: Vec<SinkRow> = chunk.iter().map(SinkRow::from).collect();
            let label = format!("Batch {}/{}", batch_no, total_batches);

            summary.batches += 1;
            match retry_with_backoff(&self.retry, &label, || self.sink.insert_batch(&rows)).await {
                Ok(acknowledged) => {
                    info!("[{}] Success: {} rows inserted", label, acknowledged);
                    summary.succeeded += chunk.len();
                }
                Err(e) => {
                    error!("[{}] FAILED, {} rows not loaded: {}", label, chunk.len(), e);
                    summary.batches_failed += 1;
                    summary.failed += chunk.len();
                }
            }
        }

        info!(
            "Load complete: {} processed, {} inserted, {} failed",
            summary.total(),
            summary.succeeded,
            summary.failed
        );

        summary
    }
}
