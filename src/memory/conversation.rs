//! 对话消息：角色与时间戳
//!
//! 消息带 RFC3339 时间戳，供 LLM 上下文、压缩摘要与持久化使用；
//! 工作历史的规模由加载上限与轮数压缩共同约束。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// 统计用户消息条数，作为「轮数」口径（压缩阈值按轮计算）
pub fn round_count(messages: &[Message]) -> usize {
    messages.iter().filter(|m| m.role == Role::User).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_count() {
        let msgs = vec![
            Message::user("你好"),
            Message::assistant("你好"),
            Message::user("再见"),
        ];
        assert_eq!(round_count(&msgs), 2);
    }
}
