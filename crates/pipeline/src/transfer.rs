//! Source downloads and tile uploads for one chunk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use storage::{ObjectStorage, StoragePath};
use tile_common::{Chunk, TileName, TileScheme};

use crate::config::SourcesConfig;
use crate::error::{PipelineError, Result};
use crate::metrics;

/// Fetches one source file to local disk.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Write the content at `uri` to `dest`; returns the byte count.
    async fn fetch(&self, uri: &str, dest: &Path) -> Result<u64>;
}

/// [`SourceFetcher`] over HTTP(S) with exponential backoff.
pub struct HttpSourceFetcher {
    client: Client,
    max_retries: u32,
    initial_retry_delay: Duration,
    max_retry_delay: Duration,
}

impl HttpSourceFetcher {
    pub fn new(config: &SourcesConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            initial_retry_delay: Duration::from_secs(config.retry_delay_secs),
            max_retry_delay: Duration::from_secs(config.max_retry_delay_secs),
        })
    }

    async fn fetch_once(&self, uri: &str, dest: &Path) -> Result<u64> {
        let fetch_error = |message: String| PipelineError::Fetch {
            uri: uri.to_string(),
            message,
        };

        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP error: {}", response.status())));
        }

        let mut partial = dest.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fetch_error(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, dest).await?;
        Ok(written)
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    #[instrument(skip(self, dest), fields(uri = %uri))]
    async fn fetch(&self, uri: &str, dest: &Path) -> Result<u64> {
        let mut retry_count = 0;
        let mut delay = self.initial_retry_delay;

        loop {
            match self.fetch_once(uri, dest).await {
                Ok(bytes) => {
                    debug!(bytes, path = %dest.display(), "Source fetched");
                    return Ok(bytes);
                }
                Err(e) if retry_count < self.max_retries => {
                    retry_count += 1;
                    warn!(
                        error = %e,
                        retry = retry_count,
                        max_retries = self.max_retries,
                        delay_secs = delay.as_secs(),
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.max_retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Local file name for a source URI: its last path segment.
pub fn file_name_for(uri: &str) -> Option<&str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Whether a source file must be downloaded for `chunk`.
pub fn should_fetch(uri: &str, chunk: &Chunk, sources: &SourcesConfig) -> bool {
    !(uri.ends_with(&sources.index_suffix) && sources.reindexes(chunk.area_name.as_str()))
}

/// Result of downloading a chunk's sources.
#[derive(Debug, Default)]
pub struct FetchSummary {
    pub fetched: Vec<PathBuf>,
    /// Index sidecars left out for re-indexed areas
    pub skipped: usize,
    pub failed: Vec<String>,
}

/// Download every source of `chunk` into `dest_dir`.
///
/// A failed file is logged and left out; the chunk carries on with what
/// was fetched.
pub async fn fetch_sources(
    fetcher: &dyn SourceFetcher,
    chunk: &Chunk,
    dest_dir: &Path,
    sources: &SourcesConfig,
    concurrency: usize,
) -> FetchSummary {
    let mut summary = FetchSummary::default();
    let mut wanted = Vec::new();

    for uri in &chunk.source_files {
        if !should_fetch(uri, chunk, sources) {
            summary.skipped += 1;
            continue;
        }
        match file_name_for(uri) {
            Some(name) => wanted.push((uri.as_str(), dest_dir.join(name))),
            None => {
                warn!(chunk = %chunk.id, uri = %uri, "Source URI has no file name, skipping");
                summary.failed.push(uri.clone());
            }
        }
    }

    let results: Vec<_> = stream::iter(wanted)
        .map(|(uri, dest)| async move {
            let result = fetcher.fetch(uri, &dest).await;
            (uri, dest, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for (uri, dest, result) in results {
        match result {
            Ok(_) => summary.fetched.push(dest),
            Err(e) => {
                warn!(chunk = %chunk.id, uri = %uri, error = %e, "Source fetch failed, skipping");
                summary.failed.push(uri.to_string());
            }
        }
    }
    summary.fetched.sort();
    metrics::record_fetch_failures(summary.failed.len());

    info!(
        chunk = %chunk.id,
        fetched = summary.fetched.len(),
        skipped = summary.skipped,
        failed = summary.failed.len(),
        "Sources downloaded"
    );
    summary
}

/// Copy the chunk's vector-feature archive from the tile bucket into
/// `dest_dir`. A missing archive is tolerated; returns whether one was
/// written.
pub async fn fetch_vector_archive(
    storage: &ObjectStorage,
    scheme: &TileScheme,
    chunk: &Chunk,
    dest_dir: &Path,
) -> bool {
    let key = StoragePath::vector_archive(scheme.chunk_size, chunk.xmin(), chunk.ymin());
    match storage.get_to_file(&key, &dest_dir.join("osm.zip")).await {
        Ok(bytes) => {
            debug!(chunk = %chunk.id, key = %key, bytes, "Vector archive fetched");
            true
        }
        Err(e) => {
            warn!(chunk = %chunk.id, key = %key, error = %e, "No vector archive for chunk");
            false
        }
    }
}

/// Result of uploading a chunk's tiles.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    /// Already in the bucket and the chunk does not overwrite
    pub skipped_existing: usize,
    /// Tile origin outside the chunk
    pub outside_chunk: usize,
}

/// Upload tile files to `tiles/{z}/{x}/{y}.png`.
///
/// Only tiles whose origin lies in the chunk's half-open bounds are
/// uploaded. Any failed upload fails the whole call.
#[instrument(skip_all, fields(chunk = %chunk.id, tiles = tile_files.len()))]
pub async fn upload_tiles(
    storage: Arc<ObjectStorage>,
    scheme: &TileScheme,
    chunk: &Chunk,
    tile_files: &[PathBuf],
    concurrency: usize,
) -> Result<UploadSummary> {
    let mut summary = UploadSummary::default();
    let mut pending = Vec::new();

    for path in tile_files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name: TileName = match file_name.parse() {
            Ok(name) => name,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Not a tile file, skipping");
                continue;
            }
        };
        if !chunk
            .bounds
            .contains_origin(name.world_x as f64, name.world_y as f64)
        {
            summary.outside_chunk += 1;
            continue;
        }
        pending.push((path.clone(), StoragePath::tile(&name.coord(scheme))));
    }

    let overwrite = chunk.overwrite;
    let results: Vec<Result<bool>> = stream::iter(pending)
        .map(|(path, key)| {
            let storage = storage.clone();
            async move {
                if !overwrite && storage.exists(&key).await? {
                    return Ok(false);
                }
                let data = tokio::fs::read(&path).await?;
                storage.put(&key, Bytes::from(data)).await?;
                Ok::<_, PipelineError>(true)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(true) => summary.uploaded += 1,
            Ok(false) => summary.skipped_existing += 1,
            Err(e) => errors.push(e),
        }
    }
    metrics::record_tiles_uploaded(summary.uploaded);

    if let Some(first) = errors.first() {
        return Err(PipelineError::Upload(format!(
            "{} of {} tiles failed, first error: {}",
            errors.len(),
            errors.len() + summary.uploaded + summary.skipped_existing,
            first
        )));
    }

    info!(
        uploaded = summary.uploaded,
        skipped_existing = summary.skipped_existing,
        outside_chunk = summary.outside_chunk,
        "Tiles uploaded"
    );
    Ok(summary)
}
