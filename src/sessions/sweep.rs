//! Periodic expiry sweep. Lazy expiry on access is authoritative; the sweep
//! only keeps reporting queries honest for senders who never come back.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::store::Database;

/// Spawn a background task that expires overdue sessions every `interval`.
pub fn spawn_expiry_task(db: Arc<dyn Database>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = db.expire_stale_sessions(Utc::now()).await {
                warn!(error = %e, "Expiry sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::model::Initiator;
    use crate::sessions::state::SessionState;
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn sweep_marks_overdue_sessions() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let initiator = Initiator {
            channel_user_id: "alice".into(),
            display_name: None,
        };
        let created = Utc::now() - chrono::Duration::hours(2);
        let session = db
            .load_or_create("alice", &initiator, Duration::from_secs(60), created)
            .await
            .unwrap();

        let handle = spawn_expiry_task(Arc::clone(&db), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        let stored = db.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Expired);
    }
}
