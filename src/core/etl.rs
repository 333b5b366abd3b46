use crate::core::run::{RunResult, RunState, RunStatus, Stage};
use crate::core::Pipeline;
use crate::domain::model::RunMetadata;
use crate::domain::ports::Destination;
use crate::utils::error::{EtlError, Result};
use crate::utils::monitor::RunMonitor;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Single entry point for the external scheduler: one call, one run.
pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor_enabled: bool,
    cancel: CancellationToken,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor_enabled,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cancelling the token aborts the run at the next stage boundary, or
    /// rolls back a load that has not committed yet.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs extract → transform → load. Never returns an error: failures are
    /// reported in the [`RunResult`] with the failing stage and the counts
    /// reached so far.
    pub async fn run(&self, source: &Path, destination: &dyn Destination) -> RunResult {
        let meta = RunMetadata::new();
        let mut state = RunState::new(meta.run_id);
        let mut monitor = RunMonitor::new(self.monitor_enabled);

        tracing::info!(
            run_id = %meta.run_id,
            "Starting ETL run: {} -> {}",
            source.display(),
            destination.describe()
        );

        let outcome = self
            .execute(source, destination, &meta, &mut state, &mut monitor)
            .await;
        monitor.finish_stage();

        let result = state.finish(outcome, monitor.timings().to_vec());
        report(&result);
        monitor.log_final_stats();
        result
    }

    async fn execute(
        &self,
        source: &Path,
        destination: &dyn Destination,
        meta: &RunMetadata,
        state: &mut RunState,
        monitor: &mut RunMonitor,
    ) -> Result<()> {
        // Extract
        self.enter(state, monitor, RunStatus::Extracting)?;
        let raw = self.pipeline.extract(source).await?;
        state.rows_extracted = raw.len() as u64;

        // Transform
        self.enter(state, monitor, RunStatus::Transforming)?;
        let transformed = self.pipeline.transform(raw).await?;
        state.rows_quarantined = transformed.quarantined.len() as u64;
        state.summary = transformed.summary.clone();
        state.quarantined = transformed.quarantined;

        // Load；取消時丟棄尚未提交的寫入
        self.enter(state, monitor, RunStatus::Loading)?;
        let written = tokio::select! {
            biased;
            res = self.pipeline.load(&transformed.batch, destination, meta) => res,
            _ = self.cancel.cancelled() => Err(EtlError::RunAborted {
                stage: Stage::Load.to_string(),
            }),
        }?;
        state.rows_loaded = written;

        Ok(())
    }

    fn enter(&self, state: &mut RunState, monitor: &mut RunMonitor, next: RunStatus) -> Result<()> {
        state.advance(next);
        let stage = next.stage().map(|s| s.to_string()).unwrap_or_default();
        monitor.begin_stage(&stage);

        if self.cancel.is_cancelled() {
            return Err(EtlError::RunAborted { stage });
        }
        Ok(())
    }
}

fn report(result: &RunResult) {
    let elapsed_ms = (result.finished_at - result.started_at).num_milliseconds();

    if result.succeeded() {
        tracing::info!(
            run_id = %result.run_id,
            status = %result.status,
            rows_extracted = result.rows_extracted,
            rows_quarantined = result.rows_quarantined,
            rows_loaded = result.rows_loaded,
            total_revenue = %result.summary.total_revenue,
            elapsed_ms,
            "✅ ETL run succeeded"
        );
    } else {
        tracing::error!(
            run_id = %result.run_id,
            status = %result.status,
            failed_stage = ?result.failed_stage,
            error_kind = ?result.error_kind,
            retryable = result.retryable,
            rows_extracted = result.rows_extracted,
            rows_quarantined = result.rows_quarantined,
            rows_loaded = result.rows_loaded,
            elapsed_ms,
            "❌ ETL run failed: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }
}
