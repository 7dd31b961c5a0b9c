//! 引擎构建器：按配置装配 Oracle、限流、网关、校验器、分析器与存储

use std::sync::Arc;

use crate::analyzer::ProgressAnalyzer;
use crate::config::AppConfig;
use crate::llm::create_llm_client;
use crate::oracle::{LlmOracle, Oracle, OracleGateway, TokenBucket};
use crate::store::SessionStore;
use crate::validator::Validator;

use super::Engine;

pub struct EngineBuilder {
    config: AppConfig,
    oracle: Option<Arc<dyn Oracle>>,
    limiter: Option<Arc<TokenBucket>>,
    store: Option<Arc<dyn SessionStore>>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            oracle: None,
            limiter: None,
            store: None,
        }
    }

    /// 指定 Oracle；不指定时按 [llm] 配置创建 LlmOracle
    pub fn with_oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// 与其他引擎共享同一个令牌桶
    pub fn with_rate_limiter(mut self, limiter: Arc<TokenBucket>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Engine {
        let AppConfig {
            engine,
            oracle: oracle_cfg,
            analyzer,
            llm,
        } = self.config;

        let oracle = self.oracle.unwrap_or_else(|| {
            tracing::info!("Using LLM oracle (provider: {})", llm.provider);
            Arc::new(LlmOracle::new(create_llm_client(&llm)))
        });
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(TokenBucket::from_config(&oracle_cfg.rate_limit)));
        let gateway = OracleGateway::from_config(oracle, limiter, &oracle_cfg);

        Engine {
            validator: Validator::new(oracle_cfg.double_check_candidates),
            analyzer: ProgressAnalyzer::from_config(&analyzer),
            store: self.store,
            history_window: engine.history_window,
            analyze_after_apply: engine.analyze_after_apply,
            ..Engine::new(Arc::new(gateway))
        }
    }
}
