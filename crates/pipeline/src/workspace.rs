//! Per-chunk working directory.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

/// Directory layout of one chunk under the work root.
#[derive(Debug, Clone)]
pub struct ChunkWorkspace {
    pub root: PathBuf,
    /// Fetched source files and the vector archive
    pub download_dir: PathBuf,
    /// Output of the point-cloud tiler, when one is configured
    pub tiles_dir: Option<PathBuf>,
    /// Renderer outputs
    pub output_dir: PathBuf,
    /// Assembled tiles waiting for upload
    pub upload_dir: PathBuf,
}

impl ChunkWorkspace {
    /// Create a fresh workspace for `chunk_id`, removing any leftover one.
    pub async fn create(work_root: &Path, chunk_id: &str, with_tiler: bool) -> Result<Self> {
        let root = work_root.join(dir_name(chunk_id));
        if tokio::fs::try_exists(&root).await? {
            debug!(dir = %root.display(), "Removing stale chunk workspace");
            tokio::fs::remove_dir_all(&root).await?;
        }

        let workspace = Self {
            download_dir: root.join("downloaded_files"),
            tiles_dir: with_tiler.then(|| root.join("tiles")),
            output_dir: root.join("output"),
            upload_dir: root.join("uploads"),
            root,
        };

        tokio::fs::create_dir_all(&workspace.download_dir).await?;
        tokio::fs::create_dir_all(&workspace.output_dir).await?;
        tokio::fs::create_dir_all(&workspace.upload_dir).await?;
        if let Some(tiles) = &workspace.tiles_dir {
            tokio::fs::create_dir_all(tiles).await?;
        }
        Ok(workspace)
    }

    /// Directory the renderer reads its inputs from.
    pub fn render_input_dir(&self) -> &Path {
        self.tiles_dir.as_deref().unwrap_or(&self.download_dir)
    }

    /// Remove the workspace. Failure is logged, never returned.
    pub async fn remove(&self) -> bool {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(dir = %self.root.display(), error = %e, "Failed to remove chunk workspace");
                false
            }
        }
    }
}

/// Lease tokens are opaque; keep only characters safe in a path segment.
fn dir_name(chunk_id: &str) -> String {
    let name: String = chunk_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        "chunk".to_string()
    } else {
        name
    }
}
