use crate::config::EtlConfig;
use crate::core::extract::Extractor;
use crate::core::load::Loader;
use crate::core::transform::Transformer;
use crate::domain::model::{CleanBatch, RawBatch, RunMetadata, TransformResult};
use crate::domain::ports::{Destination, Pipeline};
use crate::utils::error::Result;
use std::path::Path;

/// The three sales stages wired in a fixed order.
#[derive(Debug, Clone, Default)]
pub struct SalesPipeline {
    extractor: Extractor,
    transformer: Transformer,
    loader: Loader,
}

impl SalesPipeline {
    pub fn new(extractor: Extractor, transformer: Transformer, loader: Loader) -> Self {
        Self {
            extractor,
            transformer,
            loader,
        }
    }

    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        Ok(Self::new(
            Extractor::new(config.delimiter()?, config.source_timeout()),
            Transformer::new(config.precision()),
            Loader::new(config.load_timeout()),
        ))
    }
}

#[async_trait::async_trait]
impl Pipeline for SalesPipeline {
    async fn extract(&self, source: &Path) -> Result<RawBatch> {
        self.extractor.extract(source).await
    }

    async fn transform(&self, data: RawBatch) -> Result<TransformResult> {
        self.transformer.transform(data)
    }

    async fn load(
        &self,
        batch: &CleanBatch,
        destination: &dyn Destination,
        meta: &RunMetadata,
    ) -> Result<u64> {
        self.loader.load(batch, destination, meta).await
    }
}
