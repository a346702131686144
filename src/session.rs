//! 会话存储抽象层（调用方使用）
//!
//! 引擎本身不读写存储：调用方在轮次之间用 SessionStore 保存 / 取回序列化后的 ChatState。
//! 提供内存与 JSON 文件两种实现。

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::ChatState;

/// 会话存储错误
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid session id: {0}")]
    InvalidId(String),

    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session state is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 读取会话状态；不存在时返回 None
    async fn load(&self, session_id: &str) -> Result<Option<ChatState>, SessionError>;

    /// 保存（覆盖）会话状态
    async fn save(&self, session_id: &str, state: &ChatState) -> Result<(), SessionError>;

    /// 删除会话；不存在时视为成功
    async fn delete(&self, session_id: &str) -> Result<(), SessionError>;
}

/// 内存会话存储
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, ChatState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ChatState>, SessionError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &ChatState) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

/// JSON 文件会话存储：每个会话一个 `<dir>/<session_id>.json`
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 会话 ID 只允许字母、数字、`-`、`_`，防止路径穿越
    fn path_for(&self, session_id: &str) -> Result<PathBuf, SessionError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SessionError::InvalidId(session_id.to_string()));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ChatState>, SessionError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, session_id: &str, state: &ChatState) -> Result<(), SessionError> {
        let path = self.path_for(session_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(state)?;
        // 先写临时文件再重命名，避免留下半截 JSON
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(session = session_id, path = %path.display(), "session saved");
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Step;
    use crate::workflow::TaskResult;

    fn sample() -> ChatState {
        let mut state = ChatState::begin_turn(None, "weather in Paris?");
        state.current_step = Step::ResponseGenerated;
        state.final_response = Some("22°C and sunny".to_string());
        state.tool_results.insert(
            "t1".to_string(),
            TaskResult::completed("Weather in Paris", serde_json::json!({"temperature": 22.0}), 4),
        );
        state
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::new();
        let state = sample();
        assert!(store.load("s1").await.unwrap().is_none());
        store.save("s1", &state).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), Some(state));
        assert_eq!(store.len().await, 1);
        store.delete("s1").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_store_persists_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions"));
        let state = sample();

        assert!(store.load("abc-1").await.unwrap().is_none());
        store.save("abc-1", &state).await.unwrap();
        let loaded = store.load("abc-1").await.unwrap().unwrap();
        assert_eq!(loaded, state);

        store.delete("abc-1").await.unwrap();
        assert!(store.load("abc-1").await.unwrap().is_none());
        store.delete("abc-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        assert!(matches!(
            store.save("../escape", &ChatState::default()).await,
            Err(SessionError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_reports_corrupt_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let store = FileSessionStore::new(dir.path());
        assert!(matches!(store.load("bad").await, Err(SessionError::Serde(_))));
    }
}
