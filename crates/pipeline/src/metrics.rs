//! Prometheus metrics emitted by the pipeline.
//!
//! Recording is a no-op until the binary installs an exporter.

use metrics::{counter, histogram};

/// Chunk finished processing; `outcome` is `completed` or `failed`.
pub fn record_chunk(outcome: &'static str) {
    counter!("tile_worker_chunks_total", "outcome" => outcome).increment(1);
}

pub fn record_chunk_duration(seconds: f64) {
    histogram!("tile_worker_chunk_duration_seconds").record(seconds);
}

/// One renderer invocation, labelled by how it ended.
pub fn record_render_attempt(outcome: &'static str) {
    counter!("tile_worker_render_attempts_total", "outcome" => outcome).increment(1);
}

/// Attempts spent on one chunk's render loop.
pub fn record_render_loop(attempts: u32) {
    histogram!("tile_worker_render_loop_attempts").record(attempts as f64);
}

pub fn record_fetch_failures(count: usize) {
    if count > 0 {
        counter!("tile_worker_source_fetch_failures_total").increment(count as u64);
    }
}

pub fn record_tiles_uploaded(count: usize) {
    counter!("tile_worker_tiles_uploaded_total").increment(count as u64);
}
