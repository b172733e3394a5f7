//! Worker loop: lease chunks in batches and process them concurrently.

use std::sync::Arc;

use futures::{stream, StreamExt};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use tile_common::Chunk;

use crate::error::Result;
use crate::orchestrator::{process_chunk, PipelineContext};

/// Counts for one batch of chunks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub leased: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Leases and processes chunks until told to stop.
pub struct Worker {
    ctx: Arc<PipelineContext>,
}

impl Worker {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Lease up to `concurrent_chunks` chunks.
    ///
    /// Stops at the first empty response. An error on the first request is
    /// returned; later errors end the batch early.
    pub async fn lease_batch(&self) -> Result<Vec<Chunk>> {
        let settings = &self.ctx.config.pipeline;
        let mut chunks = Vec::with_capacity(settings.concurrent_chunks);

        while chunks.len() < settings.concurrent_chunks {
            match self.ctx.lease_client.acquire_chunk(settings.area.as_deref()).await {
                Ok(Some(chunk)) => chunks.push(chunk),
                Ok(None) => break,
                Err(e) if chunks.is_empty() => return Err(e),
                Err(e) => {
                    warn!(error = %e, leased = chunks.len(), "Lease request failed, running a smaller batch");
                    break;
                }
            }
        }
        Ok(chunks)
    }

    /// Lease one batch and process it. A failed chunk never stops its
    /// siblings.
    pub async fn run_batch(&self) -> Result<BatchSummary> {
        let chunks = self.lease_batch().await?;
        let leased = chunks.len();
        if leased == 0 {
            info!("No chunks available");
            return Ok(BatchSummary::default());
        }

        info!(chunks = leased, "Processing batch");
        let ctx = self.ctx.as_ref();
        let results = stream::iter(chunks)
            .map(|chunk| process_chunk(ctx, chunk))
            .buffer_unordered(leased)
            .collect::<Vec<_>>()
            .await;

        let (successes, failures): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
        let summary = BatchSummary {
            leased,
            succeeded: successes.len(),
            failed: failures.len(),
        };

        info!(
            leased = summary.leased,
            success = summary.succeeded,
            failed = summary.failed,
            "Batch complete"
        );
        Ok(summary)
    }

    /// Run batches until `shutdown` fires, sleeping between polls once the
    /// lease API has nothing left.
    pub async fn run_forever(&self, mut shutdown: broadcast::Receiver<()>) {
        let poll_interval = self.ctx.config.pipeline.poll_interval();

        loop {
            let idle = match self.run_batch().await {
                Ok(summary) => summary.leased == 0,
                Err(e) => {
                    error!(error = %e, "Batch failed");
                    true
                }
            };

            if !idle {
                match shutdown.try_recv() {
                    Err(broadcast::error::TryRecvError::Empty) => continue,
                    _ => {
                        info!("Shutting down worker");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down worker");
                    break;
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}
