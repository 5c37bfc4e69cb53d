//! 基于本地文件的快照存储
//!
//! 写入顺序：写临时文件并落盘 → 重新解析校验 → 旧快照移为 `.bak` → 原子重命名。
//! 读取时主文件损坏会回退到 `.bak`。

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{SessionError, SessionSnapshot, SessionSummary, SnapshotStore, validate_session_id};

pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", session_id, extension))
    }

    async fn read_snapshot(path: &Path) -> Result<SessionSnapshot, SessionError> {
        let raw = fs::read_to_string(path).await?;
        serde_json::from_str(&raw).map_err(|e| SessionError::Corrupt(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        validate_session_id(&snapshot.session_id)?;
        fs::create_dir_all(&self.dir).await?;

        let target = self.path_for(&snapshot.session_id, "json");
        let temp = self.path_for(&snapshot.session_id, "json.tmp");
        let backup = self.path_for(&snapshot.session_id, "json.bak");

        let body = serde_json::to_string_pretty(snapshot)?;
        {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(body.as_bytes()).await?;
            file.sync_all().await?;
        }

        // 落盘内容必须能解析回来
        if let Err(e) = Self::read_snapshot(&temp).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        if fs::try_exists(&target).await? {
            fs::rename(&target, &backup).await?;
        }
        fs::rename(&temp, &target).await?;
        debug!(session_id = %snapshot.session_id, path = %target.display(), "💾 会话快照已保存");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        validate_session_id(session_id)?;
        let target = self.path_for(session_id, "json");
        let backup = self.path_for(session_id, "json.bak");

        let primary = if fs::try_exists(&target).await? {
            Some(Self::read_snapshot(&target).await)
        } else {
            None
        };
        match primary {
            Some(Ok(snapshot)) => Ok(snapshot),
            primary => {
                if let Some(Err(e)) = &primary {
                    warn!(session_id, error = %e, "⚠️ 会话快照损坏，尝试读取备份");
                }
                if fs::try_exists(&backup).await? {
                    return Self::read_snapshot(&backup).await;
                }
                match primary {
                    Some(Err(e)) => Err(e),
                    _ => Err(SessionError::NotFound(session_id.to_string())),
                }
            }
        }
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        if !fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read_snapshot(&path).await {
                Ok(snapshot) => summaries.push(snapshot.summary()),
                Err(e) => warn!(path = %path.display(), error = %e, "⚠️ 跳过无法读取的会话快照"),
            }
        }
        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        validate_session_id(session_id)?;
        let mut deleted = false;
        for extension in ["json", "json.bak", "json.tmp"] {
            let path = self.path_for(session_id, extension);
            if fs::try_exists(&path).await? {
                fs::remove_file(&path).await?;
                deleted |= extension == "json" || extension == "json.bak";
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::types::{GeneratorRole, ResearchContext, Stage};
    use crate::session::SessionStatus;
    use tempfile::TempDir;

    fn snapshot(prompt: &str) -> SessionSnapshot {
        let mut ctx = ResearchContext::new(prompt);
        ctx.push_message(GeneratorRole::Planner, "queries");
        ctx.stage = Stage::RunSearches;
        ctx.round = 1;
        SessionSnapshot::capture(&ctx, SessionStatus::InProgress)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let snap = snapshot("build a todo app");

        store.save(&snap).await.unwrap();
        let loaded = store.load(&snap.session_id).await.unwrap();
        assert_eq!(loaded, snap);
        assert!(!dir.path().join(format!("{}.json.tmp", snap.session_id)).exists());
    }

    #[tokio::test]
    async fn test_second_save_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let mut snap = snapshot("p");
        store.save(&snap).await.unwrap();
        snap.context.round = 2;
        store.save(&snap).await.unwrap();

        assert!(dir.path().join(format!("{}.json.bak", snap.session_id)).exists());
        assert_eq!(store.load(&snap.session_id).await.unwrap().context.round, 2);
    }

    #[tokio::test]
    async fn test_corrupt_primary_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let snap = snapshot("p");
        store.save(&snap).await.unwrap();
        store.save(&snap).await.unwrap();

        std::fs::write(dir.path().join(format!("{}.json", snap.session_id)), "{ broken").unwrap();
        let loaded = store.load(&snap.session_id).await.unwrap();
        assert_eq!(loaded.session_id, snap.session_id);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        assert!(matches!(store.load("nope").await, Err(SessionError::NotFound(_))));
        assert!(matches!(store.load("../x").await, Err(SessionError::InvalidId(_))));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("sessions"));
        assert!(store.list().await.unwrap().is_empty());

        let first = snapshot("first");
        let mut second = snapshot("second");
        second.saved_at = first.saved_at + chrono::Duration::seconds(5);
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].query, "second");
        assert_eq!(listed[1].query, "first");

        assert!(store.delete(&first.session_id).await.unwrap());
        assert!(!store.delete(&first.session_id).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
