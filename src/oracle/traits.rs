//! Oracle 能力抽象
//!
//! 外部推理服务只需实现六个调用；超时、重试、限流与协议校验都在 OracleGateway 中完成。

use async_trait::async_trait;
use thiserror::Error;

use super::protocol::{
    ApplyRequest, ApplyResponse, AssessRequest, AssessResponse, BranchRequest, BranchResponse,
    CheckRequest, CheckResponse, ProposeRequest, RawCandidate, VerifyRequest, VerifyResponse,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    /// 网络 / 服务端错误，可退避重试
    #[error("transport error: {0}")]
    Transport(String),

    #[error("oracle call timed out")]
    Timeout,

    /// 回复无法解析为协议结构
    #[error("malformed reply: {0}")]
    Malformed(String),
}

impl OracleError {
    /// 是否属于网络类（可退避重试）错误
    pub fn is_transient(&self) -> bool {
        matches!(self, OracleError::Transport(_) | OracleError::Timeout)
    }
}

/// 外部推理服务
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn propose(&self, request: &ProposeRequest) -> Result<Vec<RawCandidate>, OracleError>;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, OracleError>;

    async fn assess(&self, request: &AssessRequest) -> Result<AssessResponse, OracleError>;

    async fn check(&self, request: &CheckRequest) -> Result<CheckResponse, OracleError>;

    /// 按描述计算变换结果
    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyResponse, OracleError>;

    /// 判断是否需要分情况求解，并给出各分支
    async fn branch(&self, request: &BranchRequest) -> Result<BranchResponse, OracleError>;

    /// 后端名称，用于日志
    fn name(&self) -> &str {
        "oracle"
    }
}
