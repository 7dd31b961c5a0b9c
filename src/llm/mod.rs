//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, Message, Role};

/// 按 [llm] 配置创建客户端：deepseek（默认）/ openai / mock
pub fn create_llm_client(section: &LlmSection) -> Arc<dyn LlmClient> {
    match section.provider.as_str() {
        "mock" => Arc::new(MockLlmClient::default()),
        "openai" => {
            let model = section.model.as_deref().unwrap_or("gpt-4o-mini");
            Arc::new(OpenAiClient::new(section.base_url.as_deref(), model, None))
        }
        other => {
            if other != "deepseek" {
                tracing::warn!("Unknown llm provider '{}', falling back to deepseek", other);
            }
            Arc::new(create_deepseek_client(section.model.as_deref()))
        }
    }
}
