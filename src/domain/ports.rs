use crate::domain::model::{CleanBatch, RawBatch, RunMetadata, TransformResult};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// A relational table the loader writes into. Handed to the engine by the
/// caller, which owns the connection lifetime.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Writes every record of `batch` as one atomic unit and returns the
    /// number of rows written. Records are upserted by `sale_id`.
    async fn write_batch(&self, batch: &CleanBatch, meta: &RunMetadata) -> Result<u64>;

    async fn row_count(&self) -> Result<u64>;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self, source: &Path) -> Result<RawBatch>;
    async fn transform(&self, data: RawBatch) -> Result<TransformResult>;
    async fn load(
        &self,
        batch: &CleanBatch,
        destination: &dyn Destination,
        meta: &RunMetadata,
    ) -> Result<u64>;
}
