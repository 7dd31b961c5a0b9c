//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MATHIDE__*` 覆盖（双下划线表示嵌套，如 `MATHIDE__ORACLE__MAX_RETRIES=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub oracle: OracleSection,
    #[serde(default)]
    pub analyzer: AnalyzerSection,
    #[serde(default)]
    pub llm: LlmSection,
}

/// [engine] 段：上下文窗口、会话过期、提交后是否自动分析进度
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// 请求候选时附带的最近步骤数
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// 会话空闲多久后可被 cleanup_expired 清理（秒）
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_true")]
    pub analyze_after_apply: bool,
}

fn default_history_window() -> usize {
    3
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            session_ttl_secs: default_session_ttl_secs(),
            analyze_after_apply: true,
        }
    }
}

/// [oracle] 段：候选数量、超时、重试退避、是否复核 Oracle 候选
#[derive(Debug, Clone, Deserialize)]
pub struct OracleSection {
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
    /// 单次调用超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 网络类错误的重试次数（不含首次）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 结构检查已通过的 Oracle 候选是否仍调用 verify 复核
    #[serde(default)]
    pub double_check_candidates: bool,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
}

fn default_candidate_count() -> usize {
    5
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            candidate_count: default_candidate_count(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            double_check_candidates: false,
            rate_limit: RateLimitSection::default(),
        }
    }
}

/// [oracle.rate_limit] 段：进程级令牌桶（所有会话共享）
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_bucket_capacity")]
    pub capacity: u32,
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
}

fn default_bucket_capacity() -> u32 {
    10
}

fn default_refill_per_sec() -> f64 {
    2.0
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            capacity: default_bucket_capacity(),
            refill_per_sec: default_refill_per_sec(),
        }
    }
}

/// [analyzer] 段：回退建议的阈值（可调，不是硬性规则）
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 当前分支步数（含根）低于该值时不给建议；实际下限为 4
    #[serde(default = "default_min_branch_depth")]
    pub min_branch_depth: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_min_branch_depth() -> usize {
    4
}

fn default_min_confidence() -> f64 {
    0.7
}

impl Default for AnalyzerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_branch_depth: default_min_branch_depth(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// [llm] 段：后端选择（deepseek / openai / mock）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 MATHIDE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MATHIDE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MATHIDE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（阈值热更新：调用方决定是否用新配置重建引擎）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.oracle.candidate_count, 5);
        assert_eq!(cfg.oracle.max_retries, 3);
        assert_eq!(cfg.analyzer.min_branch_depth, 4);
        assert!(cfg.engine.analyze_after_apply);
        assert_eq!(cfg.llm.provider, "deepseek");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[oracle]\nmax_retries = 1\ncandidate_count = 4\n\n[analyzer]\nmin_confidence = 0.9\n"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.oracle.max_retries, 1);
        assert_eq!(cfg.oracle.candidate_count, 4);
        assert!((cfg.analyzer.min_confidence - 0.9).abs() < 1e-9);
        // 未写的键保持默认
        assert_eq!(cfg.engine.history_window, 3);
    }
}
