//! 进程内快照存储，带容量与过期时间

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{SessionError, SessionSnapshot, SessionSummary, SnapshotStore, validate_session_id};

/// chrono::Duration 能表示的最大小时数
const MAX_TTL_HOURS: i64 = i64::MAX / 3_600_000;

pub struct InMemorySnapshotStore {
    capacity: usize,
    ttl: Duration,
    snapshots: RwLock<HashMap<String, SessionSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new(capacity: usize, ttl_hours: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl: Duration::hours(i64::try_from(ttl_hours).unwrap_or(i64::MAX).min(MAX_TTL_HOURS)),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    fn is_expired(&self, snapshot: &SessionSnapshot) -> bool {
        Utc::now() - snapshot.saved_at > self.ttl
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        validate_session_id(&snapshot.session_id)?;
        let mut snapshots = self.snapshots.write().await;
        snapshots.retain(|_, existing| !self.is_expired(existing));

        if !snapshots.contains_key(&snapshot.session_id) && snapshots.len() >= self.capacity {
            // 淘汰最久未保存的会话
            let oldest = snapshots
                .values()
                .min_by_key(|existing| existing.saved_at)
                .map(|existing| existing.session_id.clone());
            if let Some(oldest) = oldest {
                snapshots.remove(&oldest);
            }
        }
        snapshots.insert(snapshot.session_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        validate_session_id(session_id)?;
        self.snapshots
            .read()
            .await
            .get(session_id)
            .filter(|snapshot| !self.is_expired(snapshot))
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let mut summaries: Vec<SessionSummary> = self
            .snapshots
            .read()
            .await
            .values()
            .filter(|snapshot| !self.is_expired(snapshot))
            .map(SessionSnapshot::summary)
            .collect();
        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        validate_session_id(session_id)?;
        Ok(self.snapshots.write().await.remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::types::ResearchContext;
    use crate::session::SessionStatus;

    fn snapshot(prompt: &str) -> SessionSnapshot {
        SessionSnapshot::capture(&ResearchContext::new(prompt), SessionStatus::InProgress)
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = InMemorySnapshotStore::new(2, 24);
        let mut a = snapshot("a");
        let mut b = snapshot("b");
        let c = snapshot("c");
        a.saved_at = c.saved_at - Duration::seconds(20);
        b.saved_at = c.saved_at - Duration::seconds(10);

        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();
        store.save(&c).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(matches!(store.load(&a.session_id).await, Err(SessionError::NotFound(_))));
        assert_eq!(store.list().await.unwrap()[0].query, "c");
    }

    #[tokio::test]
    async fn test_expired_snapshots_are_hidden() {
        let store = InMemorySnapshotStore::new(10, 1);
        let mut stale = snapshot("stale");
        stale.saved_at = Utc::now() - Duration::hours(2);
        store.save(&stale).await.unwrap();

        assert!(store.load(&stale.session_id).await.is_err());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemorySnapshotStore::new(10, 24);
        let snap = snapshot("x");
        store.save(&snap).await.unwrap();
        assert!(store.delete(&snap.session_id).await.unwrap());
        assert!(!store.delete(&snap.session_id).await.unwrap());
    }
}
