//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 脚本化：按入队顺序吐出预置回复，耗尽后返回一条直接回复 JSON，
//! 便于离线驱动完整的规划/执行/回复流程。

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::LlmClient;
use crate::memory::Message;

/// 脚本化 Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<String>>,
    /// 是否在脚本耗尽后返回 Err（模拟模型故障）
    fail_when_empty: bool,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 脚本耗尽后 complete 返回 Err 的变体
    pub fn failing_when_empty() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fail_when_empty: true,
        }
    }

    /// 追加一条预置回复
    pub fn push(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }

    pub fn scripted(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            fail_when_empty: false,
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            return Ok(next);
        }
        if self.fail_when_empty {
            return Err("mock llm exhausted".to_string());
        }
        Ok(r#"{"kind": "reply", "content": "好的，已收到。"}"#.to_string())
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> Result<Pin<Box<dyn futures_util::Stream<Item = Result<String, String>> + Send>>, String>
    {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}
