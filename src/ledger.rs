use crate::store::Store;
use crate::types::{PipelineError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Per-pipeline delivery bookkeeping. The only writer of `delivery_count` and
/// `last_delivered`: a count that would not advance the stored value by
/// exactly one is refused before it reaches the store.
pub struct DeliveryLedger {
    store: Arc<dyn Store>,
}

impl DeliveryLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Current count and last delivery instant for one pipeline.
    pub async fn read(&self, pipeline_id: &str) -> Result<(i64, Option<DateTime<Utc>>)> {
        let config = self
            .store
            .get_pipeline_config(pipeline_id, None)
            .await?
            .ok_or_else(|| PipelineError::NotFound(pipeline_id.to_string()))?;
        Ok((config.delivery_count, config.last_delivered))
    }

    /// Record one successful run: re-reads the stored count, checks that
    /// `new_count` is its successor, then applies both fields in one update.
    pub async fn record_success(
        &self,
        pipeline_id: &str,
        new_count: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let (current, _) = self.read(pipeline_id).await?;
        if new_count != current + 1 {
            return Err(PipelineError::Persistence(format!(
                "delivery count for {} must advance from {} to {}, got {}",
                pipeline_id,
                current,
                current + 1,
                new_count
            )));
        }

        self.store
            .update_delivery_stats(pipeline_id, new_count, timestamp)
            .await?;
        info!(
            "Recorded delivery {} for pipeline {} at {}",
            new_count, pipeline_id, timestamp
        );
        Ok(())
    }
}
