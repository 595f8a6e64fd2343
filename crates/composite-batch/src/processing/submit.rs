//! Batch submission: validation, session creation, and kickoff

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::dispatcher::{BatchDispatcher, BatchRun, DispatchOptions, FileTask};
use super::session::SessionStore;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::imaging::BackgroundSpec;

/// A batch as handed in by a caller
#[derive(Debug, Clone)]
pub struct BatchSubmission {
    pub tasks: Vec<FileTask>,
    pub background: BackgroundSpec,
    /// Directory the sources were spooled into, if any
    pub staging_dir: Option<PathBuf>,
}

/// Handle returned as soon as the batch is accepted
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub session_id: Uuid,
    pub accepted: usize,
}

/// Validates submissions and starts their dispatch in the background
pub struct BatchSubmitter {
    store: Arc<SessionStore>,
    dispatcher: Arc<BatchDispatcher>,
    remote: RemoteConfig,
    options: DispatchOptions,
}

impl BatchSubmitter {
    pub fn new(
        store: Arc<SessionStore>,
        dispatcher: Arc<BatchDispatcher>,
        remote: RemoteConfig,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            dispatcher,
            remote,
            options,
        }
    }

    /// Accept a batch and return before any image is processed
    ///
    /// Validation and credential errors reject the batch before a session exists.
    pub async fn submit(&self, submission: BatchSubmission) -> Result<SubmitReceipt> {
        validate(&submission).await?;
        self.remote.require_api_key()?;

        let BatchSubmission {
            tasks,
            background,
            staging_dir,
        } = submission;
        let tasks = unique_names(tasks);
        let accepted = tasks.len();

        let session_id = self.store.create(accepted);
        self.dispatcher.clone().spawn(BatchRun {
            session_id,
            tasks,
            background,
            options: self.options,
            staging_dir,
        });

        Ok(SubmitReceipt {
            session_id,
            accepted,
        })
    }
}

async fn validate(submission: &BatchSubmission) -> Result<()> {
    if submission.tasks.is_empty() {
        return Err(Error::validation("at least one foreground image is required"));
    }

    let background = &submission.background;
    if background.width == 0 || background.height == 0 {
        return Err(Error::validation(format!(
            "background dimensions must be positive, got {}x{}",
            background.width, background.height
        )));
    }
    ensure_exists(&background.path, "background").await?;

    for task in &submission.tasks {
        if task.name.trim().is_empty() {
            return Err(Error::validation("foreground image has an empty name"));
        }
        ensure_exists(&task.path, &task.name).await?;
    }

    Ok(())
}

async fn ensure_exists(path: &Path, label: &str) -> Result<()> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        _ => Err(Error::validation(format!(
            "{} source not found: {}",
            label,
            path.display()
        ))),
    }
}

/// Suffix repeated names as `name (2).ext`, `name (3).ext`, ...
fn unique_names(tasks: Vec<FileTask>) -> Vec<FileTask> {
    let mut used: HashSet<String> = HashSet::new();

    tasks
        .into_iter()
        .map(|mut task| {
            if !used.insert(task.name.clone()) {
                let path = Path::new(&task.name);
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

                let mut n = 2;
                loop {
                    let candidate = match &ext {
                        Some(ext) => format!("{} ({}).{}", stem, n, ext),
                        None => format!("{} ({})", stem, n),
                    };
                    if used.insert(candidate.clone()) {
                        task.name = candidate;
                        break;
                    }
                    n += 1;
                }
            }
            task
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::ResizePool;
    use crate::processing::dispatcher::FsOutputSink;
    use crate::remote::{Compositor, RemoteError, RetryExecutor};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use tempfile::TempDir;

    struct EchoCompositor;

    #[async_trait]
    impl Compositor for EchoCompositor {
        async fn composite(
            &self,
            foreground: Bytes,
            _background: Bytes,
        ) -> std::result::Result<Bytes, RemoteError> {
            Ok(foreground)
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn submitter(dir: &TempDir, api_key: Option<&str>) -> (BatchSubmitter, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60), dir.path().join("out")));
        let dispatcher = Arc::new(BatchDispatcher::new(
            store.clone(),
            Arc::new(EchoCompositor),
            Arc::new(FsOutputSink::new(dir.path().join("out"))),
            RetryExecutor::new(1, Duration::from_millis(1)),
            ResizePool::new(1),
        ));
        let remote = RemoteConfig {
            api_key: api_key.map(str::to_string),
            ..RemoteConfig::default()
        };
        let options = DispatchOptions {
            chunk_size: 10,
            worker_width: 3,
            pixel_budget: 4_500_000,
        };
        (BatchSubmitter::new(store.clone(), dispatcher, remote, options), store)
    }

    fn touch(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_unique_names() {
        let tasks = vec![
            FileTask::new("/a", "photo.png", 1),
            FileTask::new("/b", "photo.png", 1),
            FileTask::new("/c", "other.png", 1),
            FileTask::new("/d", "photo.png", 1),
            FileTask::new("/e", "README", 1),
            FileTask::new("/f", "README", 1),
            FileTask::new("/g", "photo (2).png", 1),
        ];
        let names: Vec<_> = unique_names(tasks).into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "photo.png",
                "photo (2).png",
                "other.png",
                "photo (3).png",
                "README",
                "README (2)",
                "photo (2) (2).png",
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (submitter, store) = submitter(&dir, Some("key"));
        let submission = BatchSubmission {
            tasks: vec![],
            background: BackgroundSpec::new(touch(&dir, "bg.png"), 10, 10),
            staging_dir: None,
        };

        let err = submitter.submit(submission).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_bad_background_dimensions_are_rejected() {
        let dir = TempDir::new().unwrap();
        let (submitter, store) = submitter(&dir, Some("key"));
        let submission = BatchSubmission {
            tasks: vec![FileTask::new(touch(&dir, "a.png"), "a.png", 1)],
            background: BackgroundSpec::new(touch(&dir, "bg.png"), 0, 10),
            staging_dir: None,
        };

        assert!(matches!(submitter.submit(submission).await, Err(Error::Validation(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (submitter, store) = submitter(&dir, Some("key"));
        let submission = BatchSubmission {
            tasks: vec![FileTask::new(dir.path().join("gone.png"), "gone.png", 1)],
            background: BackgroundSpec::new(touch(&dir, "bg.png"), 10, 10),
            staging_dir: None,
        };

        assert!(matches!(submitter.submit(submission).await, Err(Error::Validation(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential_creates_no_session() {
        let dir = TempDir::new().unwrap();
        let (submitter, store) = submitter(&dir, None);
        let submission = BatchSubmission {
            tasks: vec![FileTask::new(touch(&dir, "a.png"), "a.png", 1)],
            background: BackgroundSpec::new(touch(&dir, "bg.png"), 10, 10),
            staging_dir: None,
        };

        assert!(matches!(submitter.submit(submission).await, Err(Error::Config(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_accepted_batch_returns_session() {
        let dir = TempDir::new().unwrap();
        let (submitter, store) = submitter(&dir, Some("key"));
        let submission = BatchSubmission {
            tasks: vec![
                FileTask::new(touch(&dir, "a1.png"), "a.png", 1),
                FileTask::new(touch(&dir, "a2.png"), "a.png", 1),
            ],
            background: BackgroundSpec::new(touch(&dir, "bg.png"), 10, 10),
            staging_dir: None,
        };

        let receipt = submitter.submit(submission).await.unwrap();
        assert_eq!(receipt.accepted, 2);
        assert!(store.contains(receipt.session_id));
        assert_eq!(store.get(receipt.session_id).total_images, 2);
    }
}
