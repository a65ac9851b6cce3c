//! 会话持久化
//!
//! 使用 SQLite 存储对话历史与挂起状态快照，支持跨重启恢复；
//! AWAITING_CONFIRMATION 跨请求边界依赖快照表，循环仅凭持久化状态即可重入。
//! 持久化失败只记日志、有限重试，不影响用户可见响应。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::RwLock;

use crate::core::error::AgentError;
use crate::memory::conversation::{Message, Role};

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// 追加会话消息
    async fn save_messages(&self, session_id: &str, messages: &[Message])
        -> Result<(), AgentError>;

    /// 按时间顺序加载最近 limit 条消息
    async fn load_messages(&self, session_id: &str, limit: usize)
        -> Result<Vec<Message>, AgentError>;

    /// 写入挂起状态快照（JSON），覆盖旧值
    async fn save_snapshot(&self, session_id: &str, snapshot: &str) -> Result<(), AgentError>;

    async fn load_snapshot(&self, session_id: &str) -> Result<Option<String>, AgentError>;

    async fn clear_snapshot(&self, session_id: &str) -> Result<(), AgentError>;
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn parse_role(s: &str) -> Role {
    match s {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => Role::System,
    }
}

/// SQLite 实现：conversations（消息流水）+ snapshots（每会话至多一条挂起快照）
pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMemoryStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let conn = Connection::open(db_path).map_err(|e| AgentError::Store(e.to_string()))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<(), AgentError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_session
                ON conversations(session_id);
            CREATE TABLE IF NOT EXISTS snapshots (
                session_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .map_err(|e| AgentError::Store(e.to_string()))
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn save_messages(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), AgentError> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();
        let messages = messages.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("store mutex poisoned");
            let tx = conn
                .transaction()
                .map_err(|e| AgentError::Store(e.to_string()))?;
            for msg in &messages {
                tx.execute(
                    "INSERT INTO conversations (session_id, role, content, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        session_id,
                        role_str(&msg.role),
                        msg.content,
                        msg.created_at.to_rfc3339()
                    ],
                )
                .map_err(|e| AgentError::Store(e.to_string()))?;
            }
            tx.commit().map_err(|e| AgentError::Store(e.to_string()))
        })
        .await
        .map_err(|e| AgentError::Store(e.to_string()))?
    }

    async fn load_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, AgentError> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("store mutex poisoned");
            let mut stmt = conn
                .prepare(
                    "SELECT role, content, created_at FROM (
                         SELECT id, role, content, created_at FROM conversations
                         WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2
                     ) ORDER BY id ASC",
                )
                .map_err(|e| AgentError::Store(e.to_string()))?;
            let rows = stmt
                .query_map(params![session_id, limit as i64], |row| {
                    let role: String = row.get(0)?;
                    let content: String = row.get(1)?;
                    let created_at: String = row.get(2)?;
                    Ok((role, content, created_at))
                })
                .map_err(|e| AgentError::Store(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                let (role, content, created_at) =
                    row.map_err(|e| AgentError::Store(e.to_string()))?;
                let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now());
                messages.push(Message {
                    role: parse_role(&role),
                    content,
                    created_at,
                });
            }
            Ok(messages)
        })
        .await
        .map_err(|e| AgentError::Store(e.to_string()))?
    }

    async fn save_snapshot(&self, session_id: &str, snapshot: &str) -> Result<(), AgentError> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();
        let snapshot = snapshot.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("store mutex poisoned");
            conn.execute(
                "INSERT OR REPLACE INTO snapshots (session_id, state, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![session_id, snapshot, chrono::Utc::now().to_rfc3339()],
            )
            .map(|_| ())
            .map_err(|e| AgentError::Store(e.to_string()))
        })
        .await
        .map_err(|e| AgentError::Store(e.to_string()))?
    }

    async fn load_snapshot(&self, session_id: &str) -> Result<Option<String>, AgentError> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("store mutex poisoned");
            let mut stmt = conn
                .prepare("SELECT state FROM snapshots WHERE session_id = ?1")
                .map_err(|e| AgentError::Store(e.to_string()))?;
            let mut rows = stmt
                .query(params![session_id])
                .map_err(|e| AgentError::Store(e.to_string()))?;
            match rows.next().map_err(|e| AgentError::Store(e.to_string()))? {
                Some(row) => {
                    let state: String = row.get(0).map_err(|e| AgentError::Store(e.to_string()))?;
                    Ok(Some(state))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| AgentError::Store(e.to_string()))?
    }

    async fn clear_snapshot(&self, session_id: &str) -> Result<(), AgentError> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("store mutex poisoned");
            conn.execute(
                "DELETE FROM snapshots WHERE session_id = ?1",
                params![session_id],
            )
            .map(|_| ())
            .map_err(|e| AgentError::Store(e.to_string()))
        })
        .await
        .map_err(|e| AgentError::Store(e.to_string()))?
    }
}

/// 内存实现：测试用
#[derive(Default)]
pub struct InMemoryStore {
    messages: RwLock<std::collections::HashMap<String, Vec<Message>>>,
    snapshots: RwLock<std::collections::HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn save_messages(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), AgentError> {
        self.messages
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn load_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, AgentError> {
        let map = self.messages.read().await;
        let all = map.get(session_id).cloned().unwrap_or_default();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn save_snapshot(&self, session_id: &str, snapshot: &str) -> Result<(), AgentError> {
        self.snapshots
            .write()
            .await
            .insert(session_id.to_string(), snapshot.to_string());
        Ok(())
    }

    async fn load_snapshot(&self, session_id: &str) -> Result<Option<String>, AgentError> {
        Ok(self.snapshots.read().await.get(session_id).cloned())
    }

    async fn clear_snapshot(&self, session_id: &str) -> Result<(), AgentError> {
        self.snapshots.write().await.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_roundtrip_and_restore() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("sessions.db");

        {
            let store = SqliteMemoryStore::new(&db_path).unwrap();
            store
                .save_messages(
                    "s1",
                    &[Message::user("帮我看下昨天的消耗"), Message::assistant("好的")],
                )
                .await
                .unwrap();
            store.save_snapshot("s1", r#"{"phase":"awaiting"}"#).await.unwrap();
        }

        // 重开连接模拟进程重启
        let store = SqliteMemoryStore::new(&db_path).unwrap();
        let messages = store.load_messages("s1", 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "帮我看下昨天的消耗");

        let snap = store.load_snapshot("s1").await.unwrap();
        assert!(snap.unwrap().contains("awaiting"));

        store.clear_snapshot("s1").await.unwrap();
        assert!(store.load_snapshot("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_respects_limit_order() {
        let dir = TempDir::new().unwrap();
        let store = SqliteMemoryStore::new(dir.path().join("m.db")).unwrap();
        for i in 0..5 {
            store
                .save_messages("s2", &[Message::user(format!("m{i}"))])
                .await
                .unwrap();
        }
        let recent = store.load_messages("s2", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "m3");
        assert_eq!(recent[1].content, "m4");
    }
}
