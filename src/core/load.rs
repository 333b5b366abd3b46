use crate::domain::model::{CleanBatch, RunMetadata};
use crate::domain::ports::Destination;
use crate::utils::error::{EtlError, Result};
use std::time::Duration;

/// Writes a clean batch through a [`Destination`] within a time bound.
///
/// The destination commits the batch as one unit; when the bound expires the
/// in-flight write is dropped, which rolls its transaction back.
#[derive(Debug, Clone)]
pub struct Loader {
    timeout: Duration,
}

impl Loader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn load(
        &self,
        batch: &CleanBatch,
        destination: &dyn Destination,
        meta: &RunMetadata,
    ) -> Result<u64> {
        tracing::info!("Received {} rows to load into {}", batch.len(), destination.describe());

        if batch.is_empty() {
            tracing::info!("No rows to load");
            return Ok(0);
        }

        let written = tokio::time::timeout(self.timeout, destination.write_batch(batch, meta))
            .await
            .map_err(|_| EtlError::ConnectionLost {
                message: format!("load timed out after {:?}", self.timeout),
            })??;

        tracing::info!(rows = written, run_id = %meta.run_id, "Loaded {} rows (upsert by sale_id)", written);
        Ok(written)
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}
