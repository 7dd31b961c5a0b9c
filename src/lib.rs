//! MathIDE - 逐步解题引擎
//!
//! 模块划分：
//! - **analyzer**: 进度分析与回退建议（只建议，不移动游标）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与恢复动作
//! - **engine**: 会话管理与 propose / apply / rollback / history / export
//! - **history**: 步骤与分支历史树
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: tracing 初始化
//! - **oracle**: 推理服务边界（协议、网关、限流、LLM / 脚本实现）
//! - **store**: 会话持久化契约
//! - **validator**: 操作目录、表达式解析与单步结构检查

pub mod analyzer;
pub mod config;
pub mod core;
pub mod engine;
pub mod history;
pub mod llm;
pub mod observability;
pub mod oracle;
pub mod store;
pub mod validator;

pub use engine::{Engine, EngineBuilder};
