//! DeepSeek 后端（OpenAI 兼容格式）
//!
//! 默认模型 deepseek-chat；求解难题时可切到 deepseek-reasoner。

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 创建 DeepSeek 客户端
///
/// - 密钥：`DEEPSEEK_API_KEY`，其次 `OPENAI_API_KEY`
/// - 模型：参数 > `DEEPSEEK_MODEL` > deepseek-chat
/// - 端点：`DEEPSEEK_BASE_URL` 可覆盖默认地址（自建代理）
pub fn create_deepseek_client(model: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    let base_url =
        std::env::var("DEEPSEEK_BASE_URL").unwrap_or_else(|_| DEEPSEEK_BASE_URL.to_string());

    OpenAiClient::new(Some(&base_url), &model, Some(&api_key))
}
