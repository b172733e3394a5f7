//! Chunk orchestration against in-process fakes and an in-memory bucket.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pipeline::{
    process_chunk, ChunkState, LeaseClient, OffGridPolicy, PipelineContext, PipelineError,
    SourceFetcher, ToolCommand, ToolOutput, ToolRunner, Worker, WorkerConfig,
};
use raster::RasterError;
use storage::ObjectStorage;
use test_utils::{chunks, scheme, SyntheticRaster};
use tile_common::{AreaName, Chunk, TileScheme};

const CHUNK_SIZE: f64 = 400.0;
const COLOR: [u8; 3] = [12, 90, 40];

#[derive(Default)]
struct FakeLeaseClient {
    queue: Mutex<VecDeque<Chunk>>,
    released: Mutex<Vec<String>>,
    pyramids: Mutex<Vec<String>>,
}

impl FakeLeaseClient {
    fn with_chunks(chunks: Vec<Chunk>) -> Self {
        Self {
            queue: Mutex::new(chunks.into()),
            ..Default::default()
        }
    }

    fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeaseClient for FakeLeaseClient {
    async fn acquire_chunk(&self, _area: Option<&str>) -> pipeline::Result<Option<Chunk>> {
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn release_chunk(&self, chunk: &Chunk) -> pipeline::Result<()> {
        self.released.lock().unwrap().push(chunk.id.clone());
        Ok(())
    }

    async fn request_pyramid(&self, chunk: &Chunk) -> pipeline::Result<()> {
        self.pyramids.lock().unwrap().push(chunk.id.clone());
        Ok(())
    }
}

/// Writes each URI's text to the destination; URIs mentioning `missing`
/// fail.
#[derive(Default)]
struct FakeFetcher {
    fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, uri: &str, dest: &Path) -> pipeline::Result<u64> {
        if uri.contains("missing") {
            return Err(PipelineError::Fetch {
                uri: uri.to_string(),
                message: "HTTP error: 404 Not Found".into(),
            });
        }
        std::fs::write(dest, uri.as_bytes())?;
        self.fetched.lock().unwrap().push(uri.to_string());
        Ok(uri.len() as u64)
    }
}

/// Stands in for the terrain renderer: reads its folders from the
/// configuration file in the working directory, writes one marker per
/// input (at most `marker_limit`) and one georeferenced raster covering
/// every test chunk.
struct FakeRenderer {
    raster: SyntheticRaster,
    write_outputs: bool,
    marker_limit: Option<usize>,
    calls: AtomicU32,
    running: AtomicUsize,
    max_running: AtomicUsize,
    saw_vector_archive: AtomicBool,
}

impl FakeRenderer {
    fn new(write_outputs: bool) -> Self {
        let (x0, y0) = chunks::ORIGIN;
        Self {
            raster: SyntheticRaster::covering(
                x0 - 2.0,
                y0 - 2.0,
                x0 + 2.0 * CHUNK_SIZE + 2.0,
                y0 + CHUNK_SIZE + 2.0,
                scheme::RENDERER_RES,
                COLOR,
            ),
            write_outputs,
            marker_limit: None,
            calls: AtomicU32::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            saw_vector_archive: AtomicBool::new(false),
        }
    }

    /// A renderer that never finishes: only `markers` inputs get an output
    /// on any attempt.
    fn undercounting(markers: usize) -> Self {
        Self {
            marker_limit: Some(markers),
            ..Self::new(true)
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

fn ini_value(ini: &str, key: &str) -> PathBuf {
    let prefix = format!("{}=", key);
    ini.lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(PathBuf::from)
        .unwrap_or_else(|| panic!("{} missing from renderer config", key))
}

#[async_trait]
impl ToolRunner for FakeRenderer {
    async fn run(&self, _command: &ToolCommand, working_dir: &Path) -> pipeline::Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let ini = std::fs::read_to_string(working_dir.join("pullauta.ini")).unwrap();
        let input_dir = ini_value(&ini, "lazfolder");
        let output_dir = ini_value(&ini, "batchoutfolder");
        assert!(working_dir.join("osm.txt").is_file());

        tokio::time::sleep(Duration::from_millis(20)).await;

        if input_dir.join("osm.zip").is_file() {
            self.saw_vector_archive.store(true, Ordering::SeqCst);
        }
        if self.write_outputs {
            let mut inputs: Vec<String> = std::fs::read_dir(&input_dir)
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".laz"))
                .collect();
            inputs.sort();
            let limit = self.marker_limit.unwrap_or(inputs.len());
            for name in inputs.iter().take(limit) {
                std::fs::write(output_dir.join(format!("{}.png", name)), b"").unwrap();
            }
            self.raster.write_png(&output_dir, "merged_depr.png");
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(ToolOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }
}

struct Harness {
    _root: tempfile::TempDir,
    work_root: PathBuf,
    renderer_dir: PathBuf,
    storage: Arc<ObjectStorage>,
    leases: Arc<FakeLeaseClient>,
    fetcher: Arc<FakeFetcher>,
    renderer: Arc<FakeRenderer>,
    ctx: Arc<PipelineContext>,
}

impl Harness {
    fn new(queue: Vec<Chunk>, renderer: FakeRenderer, tweak: impl FnOnce(&mut WorkerConfig)) -> Self {
        let root = tempfile::tempdir().unwrap();
        let work_root = root.path().join("work");
        let renderer_dir = root.path().join("renderer");

        let mut config = WorkerConfig::default();
        config.scheme = TileScheme {
            chunk_size: CHUNK_SIZE,
            ..Default::default()
        };
        config.render.working_dir = renderer_dir.clone();
        config.render.threads = 2;
        config.render.max_attempts = 3;
        config.render.crash_backoff_secs = 0;
        config.pipeline.work_root = work_root.clone();
        config.pipeline.transfer_concurrency = 4;
        config.pipeline.lease_max_wait_secs = 60;
        config.sources.reindex_areas = vec!["NZ20_Hawkes".into()];
        tweak(&mut config);

        let storage = Arc::new(ObjectStorage::in_memory("tiles"));
        let leases = Arc::new(FakeLeaseClient::with_chunks(queue));
        let fetcher = Arc::new(FakeFetcher::default());
        let renderer = Arc::new(renderer);
        let ctx = PipelineContext::new(
            config,
            storage.clone(),
            leases.clone(),
            fetcher.clone(),
            renderer.clone(),
        )
        .unwrap();

        Self {
            _root: root,
            work_root,
            renderer_dir,
            storage,
            leases,
            fetcher,
            renderer,
            ctx: Arc::new(ctx),
        }
    }
}

fn chunk(id: &str, origin: (f64, f64), area: AreaName, overwrite: bool, files: &[&str]) -> Chunk {
    Chunk::from_origin(
        id,
        origin.0,
        origin.1,
        CHUNK_SIZE,
        area,
        overwrite,
        files.iter().map(|f| f.to_string()).collect(),
    )
}

fn plain_chunk(id: &str, origin: (f64, f64)) -> Chunk {
    chunk(id, origin, AreaName::Legacy, false, &["https://lidar.test/a.laz", "https://lidar.test/b.laz"])
}

/// Keys of the four base-zoom tiles of the 400-unit chunk at `chunks::ORIGIN`.
fn origin_tile_keys() -> Vec<String> {
    vec![
        "tiles/15/8000/7767.png".to_string(),
        "tiles/15/8000/7768.png".to_string(),
        "tiles/15/8001/7767.png".to_string(),
        "tiles/15/8001/7768.png".to_string(),
    ]
}

#[tokio::test]
async fn test_chunk_flows_from_lease_to_release() {
    let named = chunk(
        "c-named",
        chunks::ORIGIN,
        AreaName::Named("NZ20_Hawkes".into()),
        false,
        &[
            "https://lidar.test/a.laz",
            "https://lidar.test/a.lax",
            "https://lidar.test/b.laz",
        ],
    );
    let h = Harness::new(vec![], FakeRenderer::new(true), |_| {});
    h.storage
        .put("osm/400/1600000_5000000.zip", Bytes::from_static(b"PK"))
        .await
        .unwrap();

    let report = process_chunk(&h.ctx, named).await.unwrap();

    assert_eq!(report.state, ChunkState::CleanedUp);
    let fetch = report.fetch.as_ref().unwrap();
    assert_eq!(fetch.fetched.len(), 2);
    assert_eq!(fetch.skipped, 1);
    let render = report.render.unwrap();
    assert!(render.converged());
    assert_eq!(render.attempts, 1);
    assert_eq!((render.inputs, render.outputs), (2, 2));
    assert_eq!(report.tiles_written, 4);
    assert_eq!(report.upload.as_ref().unwrap().uploaded, 4);
    assert!(report.released);
    assert!(report.cleaned_up);
    assert!(report.finished_at.unwrap() >= report.started_at);

    assert_eq!(h.storage.list("tiles/15").await.unwrap(), origin_tile_keys());
    assert_eq!(h.leases.released(), vec!["c-named"]);
    assert_eq!(*h.leases.pyramids.lock().unwrap(), vec!["c-named"]);
    assert!(h.renderer.saw_vector_archive.load(Ordering::SeqCst));
    assert!(!h.work_root.join("c-named").exists());

    let ini = std::fs::read_to_string(h.renderer_dir.join("pullauta.ini")).unwrap();
    assert!(ini.contains("processes=2"));

    let png = h.storage.get("tiles/15/8000/7768.png").await.unwrap();
    let tile = image::load_from_memory(&png).unwrap().to_rgb8();
    assert_eq!(tile.dimensions(), (472, 472));
    assert!(tile.pixels().all(|p| p.0 == COLOR));
}

#[tokio::test]
async fn test_failed_source_is_skipped() {
    let c = chunk(
        "c-partial",
        chunks::ORIGIN,
        AreaName::Legacy,
        false,
        &["https://lidar.test/a.laz", "https://lidar.test/missing.laz"],
    );
    let h = Harness::new(vec![], FakeRenderer::new(true), |_| {});

    let report = process_chunk(&h.ctx, c).await.unwrap();

    let fetch = report.fetch.as_ref().unwrap();
    assert_eq!(fetch.failed, vec!["https://lidar.test/missing.laz"]);
    assert_eq!(report.render.unwrap().inputs, 1);
    assert_eq!(report.upload.unwrap().uploaded, 4);
    assert_eq!(*h.fetcher.fetched.lock().unwrap(), vec!["https://lidar.test/a.laz"]);
}

#[tokio::test]
async fn test_existing_tiles_kept_without_overwrite() {
    let h = Harness::new(vec![], FakeRenderer::new(true), |_| {});
    h.storage
        .put("tiles/15/8000/7768.png", Bytes::from_static(b"old"))
        .await
        .unwrap();

    let report = process_chunk(&h.ctx, plain_chunk("c-keep", chunks::ORIGIN)).await.unwrap();

    let upload = report.upload.unwrap();
    assert_eq!(upload.uploaded, 3);
    assert_eq!(upload.skipped_existing, 1);
    assert_eq!(
        h.storage.get("tiles/15/8000/7768.png").await.unwrap(),
        Bytes::from_static(b"old")
    );
}

#[tokio::test]
async fn test_missing_render_output_fails_without_release() {
    let h = Harness::new(vec![], FakeRenderer::new(false), |_| {});

    let err = process_chunk(&h.ctx, plain_chunk("c-empty", chunks::ORIGIN))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Raster(RasterError::NoInputRasters)));
    // Budget spent on a render that never produced anything
    assert_eq!(h.renderer.calls(), 3);
    assert!(h.leases.released().is_empty());
    assert!(h.storage.list("tiles").await.unwrap().is_empty());
    assert!(!h.work_root.join("c-empty").exists());
}

#[tokio::test]
async fn test_unconverged_render_still_publishes_partial_output() {
    let h = Harness::new(vec![], FakeRenderer::undercounting(1), |config| {
        config.render.max_attempts = 20;
    });

    let report = process_chunk(&h.ctx, plain_chunk("c-partial-render", chunks::ORIGIN))
        .await
        .unwrap();

    let render = report.render.unwrap();
    assert!(!render.converged());
    assert_eq!(render.attempts, 20);
    assert_eq!((render.inputs, render.outputs), (2, 1));
    assert_eq!(h.renderer.calls(), 20);

    assert_eq!(report.state, ChunkState::CleanedUp);
    assert_eq!(report.tiles_written, 4);
    assert_eq!(report.upload.unwrap().uploaded, 4);
    assert!(report.released);
    assert_eq!(h.leases.released(), vec!["c-partial-render"]);
    assert_eq!(h.storage.list("tiles/15").await.unwrap(), origin_tile_keys());
    assert!(!h.work_root.join("c-partial-render").exists());
}

#[tokio::test]
async fn test_off_grid_chunk_rejected_before_work() {
    let h = Harness::new(vec![], FakeRenderer::new(true), |_| {});

    let err = process_chunk(&h.ctx, plain_chunk("c-off", (1_600_130.0, 5_000_000.0)))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::OffGridChunk { .. }));
    assert_eq!(h.renderer.calls(), 0);
    assert!(h.fetcher.fetched.lock().unwrap().is_empty());
    assert!(h.leases.released().is_empty());
}

#[tokio::test]
async fn test_off_grid_chunk_snapped_when_configured() {
    let h = Harness::new(vec![], FakeRenderer::new(true), |config| {
        config.pipeline.off_grid = OffGridPolicy::Snap;
    });

    let report = process_chunk(&h.ctx, plain_chunk("c-snap", (1_600_030.0, 4_999_980.0)))
        .await
        .unwrap();

    assert_eq!(report.upload.unwrap().uploaded, 4);
    assert_eq!(h.storage.list("tiles/15").await.unwrap(), origin_tile_keys());
}

#[tokio::test]
async fn test_batch_failure_does_not_stop_sibling() {
    let east = (chunks::ORIGIN.0 + CHUNK_SIZE, chunks::ORIGIN.1);
    let h = Harness::new(
        vec![
            plain_chunk("c-good", chunks::ORIGIN),
            plain_chunk("c-bad", (east.0 + 10.0, east.1)),
        ],
        FakeRenderer::new(true),
        |_| {},
    );

    let summary = Worker::new(h.ctx.clone()).run_batch().await.unwrap();

    assert_eq!(summary.leased, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(h.leases.released(), vec!["c-good"]);
}

#[tokio::test]
async fn test_concurrent_chunks_share_one_render_lease() {
    let east = (chunks::ORIGIN.0 + CHUNK_SIZE, chunks::ORIGIN.1);
    let h = Harness::new(
        vec![plain_chunk("c-west", chunks::ORIGIN), plain_chunk("c-east", east)],
        FakeRenderer::new(true),
        |_| {},
    );

    let summary = Worker::new(h.ctx.clone()).run_batch().await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(h.renderer.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(h.storage.list("tiles/15").await.unwrap().len(), 8);

    let mut released = h.leases.released();
    released.sort();
    assert_eq!(released, vec!["c-east", "c-west"]);
}

#[tokio::test]
async fn test_batch_limited_by_concurrent_chunks() {
    let h = Harness::new(
        vec![
            plain_chunk("c1", chunks::ORIGIN),
            plain_chunk("c2", chunks::ORIGIN),
            plain_chunk("c3", chunks::ORIGIN),
        ],
        FakeRenderer::new(true),
        |config| config.pipeline.concurrent_chunks = 2,
    );

    let worker = Worker::new(h.ctx.clone());
    assert_eq!(worker.lease_batch().await.unwrap().len(), 2);
    assert_eq!(worker.lease_batch().await.unwrap().len(), 1);
    assert!(worker.lease_batch().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_queue_is_an_idle_batch() {
    let h = Harness::new(vec![], FakeRenderer::new(true), |_| {});
    let summary = Worker::new(h.ctx.clone()).run_batch().await.unwrap();
    assert_eq!(summary.leased, 0);
    assert_eq!(h.renderer.calls(), 0);
}
