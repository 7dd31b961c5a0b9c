//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置回复，并记录收到的每组消息，便于断言提示词内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message};

/// Mock 客户端：依次弹出预置回复；用完后返回 EmptyResponse
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    received: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push(Ok(reply.into()));
        self
    }

    pub fn with_error(self, err: LlmError) -> Self {
        self.push(Err(err));
        self
    }

    pub fn push(&self, reply: Result<String, LlmError>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }

    /// 已收到的请求（每次 complete 一组消息）
    pub fn received(&self) -> Vec<Vec<Message>> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut r) = self.received.lock() {
            r.push(messages.to_vec());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(Err(LlmError::EmptyResponse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order() {
        let client = MockLlmClient::new()
            .with_reply("first")
            .with_error(LlmError::Api("boom".into()))
            .with_reply("second");

        assert_eq!(client.complete(&[Message::user("a")]).await.unwrap(), "first");
        assert!(matches!(
            client.complete(&[Message::user("b")]).await,
            Err(LlmError::Api(_))
        ));
        assert_eq!(client.complete(&[Message::user("c")]).await.unwrap(), "second");
        assert_eq!(
            client.complete(&[Message::user("d")]).await,
            Err(LlmError::EmptyResponse)
        );
        assert_eq!(client.received().len(), 4);
    }
}
