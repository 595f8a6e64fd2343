//! Per-batch session state with TTL expiry
//!
//! Every mutation goes through `DashMap::get_mut`, which holds the shard's
//! write lock for the duration of the update. Concurrent task completions
//! on one session are therefore serialized and never lose an append.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Terminal result of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub name: String,
    #[serde(flatten)]
    pub result: OutcomeResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeResult {
    Success { output: String },
    Failed { error: String },
}

impl Outcome {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: OutcomeResult::Success {
                output: output.into(),
            },
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: OutcomeResult::Failed {
                error: error.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, OutcomeResult::Success { .. })
    }
}

/// Live state of one batch
#[derive(Debug)]
struct Session {
    created_at: DateTime<Utc>,
    started: Instant,
    total_images: usize,
    in_flight: BTreeSet<String>,
    results: Vec<Outcome>,
    is_processing: bool,
}

impl Session {
    fn new(total_images: usize) -> Self {
        Self {
            created_at: Utc::now(),
            started: Instant::now(),
            total_images,
            in_flight: BTreeSet::new(),
            results: Vec::new(),
            is_processing: total_images > 0,
        }
    }

    fn push(&mut self, session_id: Uuid, outcome: Outcome) -> bool {
        if self.results.iter().any(|r| r.name == outcome.name) {
            tracing::warn!(
                "Session {}: ignoring second outcome for '{}'",
                session_id,
                outcome.name
            );
            return false;
        }
        self.results.push(outcome);
        if self.results.len() >= self.total_images {
            self.is_processing = false;
        }
        true
    }

    fn view(&self) -> SessionView {
        SessionView {
            is_processing: self.is_processing,
            total_images: self.total_images,
            processed_images: self.results.len(),
            in_flight: self.in_flight.iter().cloned().collect(),
            results: self.results.clone(),
            created_at: Some(self.created_at),
        }
    }
}

/// Snapshot returned to status queries
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub is_processing: bool,
    pub total_images: usize,
    pub processed_images: usize,
    pub in_flight: Vec<String>,
    pub results: Vec<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Owns every session and its output directory
pub struct SessionStore {
    sessions: DashMap<Uuid, Session>,
    ttl: Duration,
    output_root: PathBuf,
}

impl SessionStore {
    pub fn new(ttl: Duration, output_root: impl Into<PathBuf>) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            output_root: output_root.into(),
        }
    }

    /// Register a new batch of `total_images` tasks
    pub fn create(&self, total_images: usize) -> Uuid {
        let session_id = Uuid::new_v4();
        self.sessions.insert(session_id, Session::new(total_images));
        tracing::info!("Session {} created for {} images", session_id, total_images);
        session_id
    }

    /// Snapshot of a session, or the default view if it does not exist
    pub fn get(&self, session_id: Uuid) -> SessionView {
        self.sessions
            .get(&session_id)
            .map(|s| s.view())
            .unwrap_or_default()
    }

    pub fn contains(&self, session_id: Uuid) -> bool {
        self.sessions.contains_key(&session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Directory holding a session's persisted outputs
    pub fn output_dir(&self, session_id: Uuid) -> PathBuf {
        self.output_root.join(session_id.to_string())
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn mark_in_flight(&self, session_id: Uuid, name: &str) {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            session.in_flight.insert(name.to_string());
        }
    }

    pub fn clear_in_flight(&self, session_id: Uuid, name: &str) {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            session.in_flight.remove(name);
        }
    }

    /// Record a terminal outcome; a second outcome for the same name is ignored
    pub fn append_result(&self, session_id: Uuid, outcome: Outcome) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(mut session) => session.push(session_id, outcome),
            None => false,
        }
    }

    /// Clear the in-flight marker and record the outcome in one step
    pub fn complete_task(&self, session_id: Uuid, outcome: Outcome) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(mut session) => {
                session.in_flight.remove(&outcome.name);
                session.push(session_id, outcome)
            }
            None => {
                tracing::debug!(
                    "Session {} expired before '{}' finished",
                    session_id,
                    outcome.name
                );
                false
            }
        }
    }

    /// True once every task has a terminal outcome
    pub fn is_complete(&self, session_id: Uuid) -> bool {
        self.sessions
            .get(&session_id)
            .map(|s| s.results.len() >= s.total_images)
            .unwrap_or(false)
    }

    /// Mark the batch as no longer processing
    pub fn finish(&self, session_id: Uuid) {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            session.is_processing = false;
            let processed = session.results.len();
            let total = session.total_images;
            drop(session);
            tracing::info!(
                "Session {} finished: {}/{} images processed",
                session_id,
                processed,
                total
            );
        }
    }

    /// Drop a session and remove its output directory
    ///
    /// Returns true if there was anything to reclaim.
    pub async fn expire(&self, session_id: Uuid) -> bool {
        let removed = self.sessions.remove(&session_id).is_some();

        let dir = self.output_dir(session_id);
        let reclaimed = match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!("Failed to remove {}: {}", dir.display(), e);
                false
            }
        };

        if removed || reclaimed {
            tracing::info!("Session {} expired", session_id);
        }
        removed || reclaimed
    }

    /// Sessions whose age exceeds the TTL
    pub fn expired_ids(&self) -> Vec<Uuid> {
        let now = Instant::now();
        self.sessions
            .iter()
            .filter(|entry| now.duration_since(entry.started) > self.ttl)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Expire every session older than the TTL, finished or not, then
    /// remove output dirs left behind by writes that outlived their session
    pub async fn sweep(&self) -> usize {
        let expired = self.expired_ids();
        let mut count = 0;
        for session_id in expired {
            if self.expire(session_id).await {
                count += 1;
            }
        }
        count + self.remove_orphans().await
    }

    /// Remove session-named output dirs that have no live session
    async fn remove_orphans(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.output_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!("Failed to scan {}: {}", self.output_root.display(), e);
                return 0;
            }
        };

        let mut orphans = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let session_id = match Uuid::parse_str(&entry.file_name().to_string_lossy()) {
                Ok(id) => id,
                Err(_) => continue,
            };
            if !self.sessions.contains_key(&session_id) {
                orphans.push(entry.path());
            }
        }

        let mut removed = 0;
        for dir in orphans {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    tracing::info!("Removed orphaned output dir {}", dir.display());
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {}: {}", dir.display(), e),
            }
        }
        removed
    }
}
