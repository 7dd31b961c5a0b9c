//! 引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 EngineError 决定 Retry / RetryFresh / StayOnStep / Reprompt / Degrade / Abort。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::StepId;

/// 校验器拒绝变换的具体原因
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// 描述中的操作不在白名单目录里
    #[error("operation is not in the catalogue: {0}")]
    UnknownOperation(String),

    /// 一个描述里声明了多个基本操作
    #[error("more than one elementary operation declared: {0}")]
    ChainedOperations(String),

    /// 类型标签与描述中的操作不属于同一族
    #[error("declared type '{declared}' does not match the described operation '{described}'")]
    KindMismatch { declared: String, described: String },

    /// 结果不能由声明的单个操作从原式得到
    #[error("result is not reachable by a single {operation}: {detail}")]
    ExtraSimplification { operation: String, detail: String },

    /// Oracle 复核判定为错误
    #[error("oracle verification rejected the result")]
    OracleDisagrees,

    /// 候选自身标记为错误，不能作为正确步骤提交
    #[error("candidate is marked incorrect")]
    MarkedIncorrect,

    #[error("empty transformation: {0}")]
    Empty(String),

    /// Oracle 判定该变换不能作用于当前表达式
    #[error("transformation cannot be applied: {0}")]
    NotApplicable(String),
}

/// 引擎运行过程中可能出现的错误
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// 网络 / 超时，重试耗尽后上抛（降级模式）
    #[error("Oracle unavailable after {attempts} attempt(s): {message}")]
    OracleUnavailable { attempts: u32, message: String },

    /// 响应不满足协议（结构、取值范围、缺字段）
    #[error("Oracle contract violation: {0}")]
    OracleContract(String),

    #[error("Rejected transformation: {reason}")]
    RejectedTransformation { reason: RejectionReason },

    #[error("Invalid rollback target: {0}")]
    InvalidRollbackTarget(StepId),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// 候选所属回合已过期（会话已前进或回退）
    #[error("Stale turn: proposal was made for turn {proposed}, session is at turn {current}")]
    StaleTurn { proposed: u64, current: u64 },

    #[error("Turn cancelled")]
    TurnCancelled,

    /// 仅影响本次保存，内存状态保持一致
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// 引擎内部状态不一致（例如父步骤在提交时已不存在）
    #[error("Internal inconsistency: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn rejected(reason: RejectionReason) -> Self {
        Self::RejectedTransformation { reason }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 同一请求退避后重试（网络 / 超时）
    Retry,
    /// 换一个新请求重试一次（协议错误）
    RetryFresh,
    /// 用户停留在当前步骤，可换一个候选
    StayOnStep(String),
    /// 前端重新询问用户
    Reprompt(String),
    /// 重试耗尽，以降级模式告知前端
    Degrade(String),
    /// 终止当前回合
    Abort,
}
