//! 会话持久化契约
//!
//! Engine 只依赖 SessionStore trait；这里提供内存实现（测试 / 单进程）与 JSON 文件实现。

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::engine::Session;

/// 已保存会话的句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(pub String);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 保存会话快照；同一会话再次保存会覆盖旧快照
    async fn save(&self, session: &Session) -> anyhow::Result<SessionHandle>;

    async fn load(&self, handle: &SessionHandle) -> anyhow::Result<Session>;
}

/// 内存存储：以 JSON 文本保存，保证与文件存储走同一套序列化
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<SessionHandle, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: &Session) -> anyhow::Result<SessionHandle> {
        let json = serde_json::to_string(session).context("serialize session")?;
        let handle = SessionHandle(session.id.clone());
        self.entries.write().await.insert(handle.clone(), json);
        Ok(handle)
    }

    async fn load(&self, handle: &SessionHandle) -> anyhow::Result<Session> {
        let entries = self.entries.read().await;
        let json = entries
            .get(handle)
            .with_context(|| format!("no saved session {handle}"))?;
        serde_json::from_str(json).context("deserialize session")
    }
}

/// 文件存储：每个会话一个 `<id>.json`
#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    dir: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, handle: &SessionHandle) -> anyhow::Result<PathBuf> {
        let valid = !handle.0.is_empty()
            && handle
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        anyhow::ensure!(valid, "invalid session handle '{}'", handle);
        Ok(self.dir.join(format!("{}.json", handle.0)))
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn save(&self, session: &Session) -> anyhow::Result<SessionHandle> {
        let handle = SessionHandle(session.id.clone());
        let path = self.path_for(&handle)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create {}", self.dir.display()))?;
        let json = serde_json::to_vec_pretty(session).context("serialize session")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        tracing::debug!("Saved session {} to {}", session.id, path.display());
        Ok(handle)
    }

    async fn load(&self, handle: &SessionHandle) -> anyhow::Result<Session> {
        let path = self.path_for(handle)?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
    }
}
