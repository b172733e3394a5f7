//! Stage leases: bounded access to constrained local resources.
//!
//! Each stage owns a counting semaphore. Waiters are woken when a permit
//! is returned, and a waiter that exceeds the configured maximum wait fails
//! with [`PipelineError::LeaseTimeout`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::PipelineSettings;
use crate::error::{PipelineError, Result};

/// A pipeline stage guarded by a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Download,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Download => f.write_str("download"),
            Stage::Render => f.write_str("render"),
        }
    }
}

/// Leases for every stage, shared by all chunks of one worker.
#[derive(Debug, Clone)]
pub struct StageLeases {
    download: Arc<Semaphore>,
    render: Arc<Semaphore>,
    max_wait: Duration,
}

impl StageLeases {
    pub fn new(download_permits: usize, render_permits: usize, max_wait: Duration) -> Self {
        Self {
            download: Arc::new(Semaphore::new(download_permits)),
            render: Arc::new(Semaphore::new(render_permits)),
            max_wait,
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(
            settings.download_permits,
            settings.render_permits,
            settings.lease_max_wait(),
        )
    }

    fn semaphore(&self, stage: Stage) -> &Arc<Semaphore> {
        match stage {
            Stage::Download => &self.download,
            Stage::Render => &self.render,
        }
    }

    /// Wait for a lease on `stage`.
    pub async fn acquire(&self, stage: Stage) -> Result<StageLease> {
        let started = Instant::now();
        let semaphore = self.semaphore(stage).clone();

        // A closed semaphore is reported like a timeout; the worker never closes one
        let permit = match tokio::time::timeout(self.max_wait, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            _ => {
                return Err(PipelineError::LeaseTimeout {
                    stage,
                    waited: started.elapsed(),
                })
            }
        };

        debug!(stage = %stage, waited_ms = started.elapsed().as_millis() as u64, "Stage lease acquired");
        Ok(StageLease {
            stage,
            permit: Some(permit),
        })
    }

    /// Leases of `stage` not currently held.
    pub fn available(&self, stage: Stage) -> usize {
        self.semaphore(stage).available_permits()
    }
}

/// A held stage lease. Released on [`StageLease::release`] or on drop.
#[derive(Debug)]
pub struct StageLease {
    stage: Stage,
    permit: Option<OwnedSemaphorePermit>,
}

impl StageLease {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }

    /// Return the lease. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if self.permit.take().is_some() {
            debug!(stage = %self.stage, "Stage lease released");
        }
    }
}

impl Drop for StageLease {
    fn drop(&mut self) {
        self.release();
    }
}
