//! Background reclaim of expired and downloaded sessions

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::session::SessionStore;

/// Periodically expire sessions older than the store's TTL
pub fn spawn_sweeper(store: Arc<SessionStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let expired = store.sweep().await;
            if expired > 0 {
                tracing::info!(
                    "Session sweep expired {} session(s), {} remaining",
                    expired,
                    store.len()
                );
            }
        }
    })
}

/// Expire one session after a grace delay, e.g. once its bundle was served
pub fn schedule_reclaim(store: Arc<SessionStore>, session_id: Uuid, grace: Duration) -> JoinHandle<()> {
    tracing::debug!("Session {} reclaim scheduled in {:?}", session_id, grace);
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        store.expire(session_id).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_old_sessions() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::new(Duration::from_secs(10), dir.path()));
        let id = store.create(5);

        let handle = spawn_sweeper(store.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.get(id).total_images, 5);

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(store.get(id).total_images, 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaim_waits_for_grace() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::new(Duration::from_secs(3600), dir.path()));
        let id = store.create(1);

        let handle = schedule_reclaim(store.clone(), id, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.contains(id));

        handle.await.unwrap();
        assert!(!store.contains(id));
    }
}
