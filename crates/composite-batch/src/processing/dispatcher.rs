//! Chunked batch execution against the remote compositor

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::session::{Outcome, SessionStore};
use crate::error::{Error, Result};
use crate::imaging::{fit_image, BackgroundCache, BackgroundSpec, FittedBackground, ResizePool};
use crate::remote::{Compositor, RetryExecutor};

/// One foreground image to composite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTask {
    pub path: PathBuf,
    /// Name shown in status and used to derive the output name; unique per batch
    pub name: String,
    pub size_bytes: u64,
}

impl FileTask {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            size_bytes,
        }
    }
}

/// Where composited images are written
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Store one output and return its location
    async fn persist(&self, session_id: Uuid, name: &str, data: Bytes) -> Result<String>;
}

/// Writes outputs to `<root>/<session_id>/<name>`
pub struct FsOutputSink {
    root: PathBuf,
}

impl FsOutputSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl OutputSink for FsOutputSink {
    async fn persist(&self, session_id: Uuid, name: &str, data: Bytes) -> Result<String> {
        let dir = self.root.join(session_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::local_io(name, format!("create {}: {}", dir.display(), e)))?;

        // partial files stay hidden from bundles until the rename
        let path = dir.join(name);
        let partial = dir.join(format!(".{}.partial", name));
        if let Err(e) = write_then_rename(&partial, &path, &data).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(Error::local_io(name, format!("write failed: {}", e)));
        }

        Ok(path.to_string_lossy().into_owned())
    }
}

async fn write_then_rename(partial: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(partial, data).await?;
    tokio::fs::rename(partial, path).await
}

/// Output file name for a task: `<stem>_composited.png`
pub fn output_name(task_name: &str) -> String {
    let stem = Path::new(task_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!("{}_composited.png", stem)
}

/// Output names for a whole batch, one per task and never repeated
///
/// Tasks whose derived names collide (`photo.png` and `photo.jpg`) get a
/// ` (n)` suffix in submission order: `photo_composited (2).png`.
pub fn output_names(tasks: &[FileTask]) -> Vec<String> {
    let mut used = HashSet::new();

    tasks
        .iter()
        .map(|task| {
            let base = output_name(&task.name);
            if used.insert(base.clone()) {
                return base;
            }
            let stem = base.trim_end_matches(".png");
            let mut n = 2;
            loop {
                let candidate = format!("{} ({}).png", stem, n);
                if used.insert(candidate.clone()) {
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

/// Tunables for one batch run
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub chunk_size: usize,
    pub worker_width: usize,
    pub pixel_budget: u64,
}

/// Everything a dispatcher needs to run one submitted batch
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub session_id: Uuid,
    pub tasks: Vec<FileTask>,
    pub background: BackgroundSpec,
    pub options: DispatchOptions,
    /// Upload directory removed once its sources are deleted
    pub staging_dir: Option<PathBuf>,
}

/// State shared by the tasks of one chunk
struct ChunkContext<'a> {
    session_id: Uuid,
    background: &'a FittedBackground,
    permits: &'a Semaphore,
}

/// Runs batches chunk by chunk and records outcomes in the session store
pub struct BatchDispatcher {
    store: Arc<SessionStore>,
    compositor: Arc<dyn Compositor>,
    sink: Arc<dyn OutputSink>,
    retry: RetryExecutor,
    resize_pool: ResizePool,
    backgrounds: BackgroundCache,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<SessionStore>,
        compositor: Arc<dyn Compositor>,
        sink: Arc<dyn OutputSink>,
        retry: RetryExecutor,
        resize_pool: ResizePool,
    ) -> Self {
        let backgrounds = BackgroundCache::new(resize_pool.clone());
        Self {
            store,
            compositor,
            sink,
            retry,
            resize_pool,
            backgrounds,
        }
    }

    /// Run a batch as an independent background task
    pub fn spawn(self: Arc<Self>, run: BatchRun) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(run).await })
    }

    /// Process every chunk in order, then finish the session and delete sources
    pub async fn run(&self, run: BatchRun) {
        let BatchRun {
            session_id,
            tasks,
            background,
            options,
            staging_dir,
        } = run;

        let chunk_size = options.chunk_size.max(1);
        let total_chunks = tasks.len().div_ceil(chunk_size);
        let outputs = output_names(&tasks);

        tracing::info!(
            "Session {}: dispatching {} images in {} chunk(s) via {} (chunk size {}, width {}, budget {} px)",
            session_id,
            tasks.len(),
            total_chunks,
            self.compositor.name(),
            chunk_size,
            options.worker_width,
            options.pixel_budget
        );

        let chunks = tasks.chunks(chunk_size).zip(outputs.chunks(chunk_size));
        for (index, (chunk, outputs)) in chunks.enumerate() {
            tracing::info!(
                "Session {}: chunk {}/{} ({} images)",
                session_id,
                index + 1,
                total_chunks,
                chunk.len()
            );
            self.run_chunk(session_id, chunk, outputs, &background, &options)
                .await;
        }

        self.store.finish(session_id);
        cleanup_sources(&tasks, &background, staging_dir.as_deref()).await;
    }

    async fn run_chunk(
        &self,
        session_id: Uuid,
        chunk: &[FileTask],
        outputs: &[String],
        background: &BackgroundSpec,
        options: &DispatchOptions,
    ) {
        let fitted = match self.backgrounds.load(background, options.pixel_budget).await {
            Ok(fitted) => fitted,
            Err(e) => {
                let cause = format!("Background load failed: {}", e);
                tracing::error!("Session {}: {}; failing {} task(s)", session_id, cause, chunk.len());
                for task in chunk {
                    self.store
                        .append_result(session_id, Outcome::failure(&task.name, &cause));
                }
                return;
            }
        };

        let permits = Semaphore::new(options.worker_width.max(1));
        let ctx = ChunkContext {
            session_id,
            background: &fitted,
            permits: &permits,
        };

        let runs = chunk
            .iter()
            .zip(outputs)
            .map(|(task, output)| self.run_task(&ctx, task, output));
        join_all(runs).await;
    }

    /// Fit, composite, persist, and record exactly one outcome for `task`
    async fn run_task(&self, ctx: &ChunkContext<'_>, task: &FileTask, output: &str) {
        let (result, _permit) = match self.fit_foreground(ctx, task).await {
            Err(e) => (Err(e), None),
            Ok(foreground) => match ctx.permits.acquire().await {
                Err(_) => (Err(Error::internal("worker pool closed")), None),
                Ok(permit) => {
                    self.store.mark_in_flight(ctx.session_id, &task.name);
                    (self.composite(ctx, task, output, foreground).await, Some(permit))
                }
            },
        };

        let outcome = match result {
            Ok(location) => {
                tracing::debug!("[{}] Composited -> {}", task.name, location);
                Outcome::success(&task.name, location)
            }
            Err(e) => {
                tracing::warn!("[{}] Failed: {}", task.name, e);
                Outcome::failure(&task.name, e.to_string())
            }
        };

        // still holding the permit, so the in-flight set never exceeds the width
        self.store.complete_task(ctx.session_id, outcome);
    }

    async fn fit_foreground(&self, ctx: &ChunkContext<'_>, task: &FileTask) -> Result<Bytes> {
        let raw = tokio::fs::read(&task.path)
            .await
            .map_err(|e| Error::local_io(&task.name, format!("read failed: {}", e)))?;

        let name = task.name.clone();
        let bounds = ctx.background.output_box();
        let budget = ctx.background.pixel_budget;

        let fitted = self
            .resize_pool
            .run(move || fit_image(&name, Bytes::from(raw), Some(bounds), budget))
            .await?;

        Ok(fitted.data)
    }

    async fn composite(
        &self,
        ctx: &ChunkContext<'_>,
        task: &FileTask,
        output: &str,
        foreground: Bytes,
    ) -> Result<String> {
        let background = ctx.background.data.clone();

        let composited = self
            .retry
            .execute(&task.name, || {
                self.compositor
                    .composite(foreground.clone(), background.clone())
            })
            .await?;

        // expired sessions have had their output dir reclaimed already; a write
        // racing the expiry leaves an orphan dir that the next sweep removes
        if !self.store.contains(ctx.session_id) {
            return Err(Error::missing(format!(
                "session {} expired before '{}' was stored",
                ctx.session_id, task.name
            )));
        }

        self.sink
            .persist(ctx.session_id, output, composited)
            .await
    }
}

/// Delete every task source and the background source, once
async fn cleanup_sources(tasks: &[FileTask], background: &BackgroundSpec, staging_dir: Option<&Path>) {
    let paths = tasks
        .iter()
        .map(|t| t.path.as_path())
        .chain(std::iter::once(background.path.as_path()));

    let mut removed = 0;
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to delete source {}: {}", path.display(), e),
        }
    }
    tracing::debug!("Deleted {} source file(s)", removed);

    if let Some(dir) = staging_dir {
        if let Err(e) = tokio::fs::remove_dir(dir).await {
            tracing::debug!("Left staging dir {} in place: {}", dir.display(), e);
        }
    }
}
