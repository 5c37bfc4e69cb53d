//! 会话快照：每轮结束后持久化研究上下文，支持中断后恢复

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::{SessionBackend, SessionConfig};
use crate::generator::types::{Message, ResearchContext, Stage};

pub mod file;
pub mod memory;

pub use file::FileSnapshotStore;
pub use memory::InMemorySnapshotStore;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::InProgress => write!(f, "in_progress"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("invalid session id: {0}")]
    InvalidId(String),
    #[error("session snapshot is corrupt: {0}")]
    Corrupt(String),
    #[error("session io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 一次持久化的完整快照
///
/// 消息不随上下文序列化，单独存放在 `messages` 中，恢复时重新挂回。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub context: ResearchContext,
    pub messages: Vec<Message>,
}

impl SessionSnapshot {
    /// 抓取快照，按消息 id 去重
    pub fn capture(context: &ResearchContext, status: SessionStatus) -> Self {
        let mut seen = HashSet::new();
        let messages = context
            .messages
            .iter()
            .filter(|message| seen.insert(message.id.clone()))
            .cloned()
            .collect();
        let mut context = context.clone();
        context.messages = Vec::new();
        Self {
            session_id: context.session_id.clone(),
            saved_at: Utc::now(),
            status,
            context,
            messages,
        }
    }

    /// 还原研究上下文
    pub fn into_context(self) -> ResearchContext {
        let mut context = self.context;
        context.messages = self.messages;
        context
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            query: self.context.prompt.clone(),
            status: self.status,
            stage: self.context.stage,
            round: self.context.round,
            saved_at: self.saved_at,
            document_count: self.context.scratch.approved_documents.len(),
        }
    }
}

/// 会话列表中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub query: String,
    pub status: SessionStatus,
    pub stage: Stage,
    pub round: u32,
    pub saved_at: DateTime<Utc>,
    pub document_count: usize,
}

/// 快照存储
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SessionError>;

    async fn load(&self, session_id: &str) -> Result<SessionSnapshot, SessionError>;

    /// 按保存时间倒序
    async fn list(&self) -> Result<Vec<SessionSummary>, SessionError>;

    /// 返回是否删除了已存在的会话
    async fn delete(&self, session_id: &str) -> Result<bool, SessionError>;
}

/// 会话 id 只允许字母数字、`-` 与 `_`
pub fn validate_session_id(session_id: &str) -> Result<(), SessionError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidId(session_id.to_string()))
    }
}

/// 按配置构建快照存储
pub fn open_store(config: &SessionConfig) -> Arc<dyn SnapshotStore> {
    match config.backend {
        SessionBackend::File => Arc::new(FileSnapshotStore::new(&config.dir)),
        SessionBackend::Memory => Arc::new(InMemorySnapshotStore::new(
            config.memory_capacity,
            config.memory_ttl_hours,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::types::GeneratorRole;

    #[tokio::test]
    async fn test_open_store_follows_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let snap = SessionSnapshot::capture(&ResearchContext::new("x"), SessionStatus::InProgress);

        let memory = SessionConfig {
            backend: SessionBackend::Memory,
            dir: dir.path().join("unused"),
            memory_capacity: 1,
            memory_ttl_hours: 24,
        };
        let store = open_store(&memory);
        store.save(&snap).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(!dir.path().join("unused").exists());

        let file = SessionConfig {
            backend: SessionBackend::File,
            dir: dir.path().join("sessions"),
            ..SessionConfig::default()
        };
        open_store(&file).save(&snap).await.unwrap();
        assert!(dir.path().join("sessions").join(format!("{}.json", snap.session_id)).exists());
    }

    #[test]
    fn test_capture_restores_messages() {
        let mut ctx = ResearchContext::new("build a todo app");
        ctx.push_message(GeneratorRole::Planner, "plan");
        ctx.push_message(GeneratorRole::Writer, "draft");
        let duplicate = ctx.messages[0].clone();
        ctx.messages.push(duplicate);

        let snapshot = SessionSnapshot::capture(&ctx, SessionStatus::InProgress);
        assert_eq!(snapshot.messages.len(), 2);

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: SessionSnapshot = serde_json::from_str(&json).unwrap();
        let restored = restored.into_context();
        assert_eq!(restored.session_id, ctx.session_id);
        assert_eq!(restored.messages.len(), 2);
        assert_eq!(restored.messages[1].text, "draft");
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("5f1c2a7e-0000-4a4a-9b9b-123456789abc").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc/passwd").is_err());
        assert!(validate_session_id("a/b").is_err());
    }

    #[test]
    fn test_summary_fields() {
        let ctx = ResearchContext::new("q");
        let summary = SessionSnapshot::capture(&ctx, SessionStatus::Completed).summary();
        assert_eq!(summary.query, "q");
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.stage, Stage::PlanResearch);
        assert_eq!(summary.document_count, 0);
    }
}
