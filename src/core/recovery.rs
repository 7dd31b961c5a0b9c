//! 错误恢复引擎
//!
//! 根据 EngineError 类型返回 RecoveryAction，供 Oracle 网关的重试循环与前端决定是重试、换请求、停留还是终止。

use crate::core::{EngineError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型与已尝试次数返回建议的恢复动作
    ///
    /// `attempt` 从 0 开始计数；`max_retries` 为网络类错误允许的重试次数，协议错误只允许一次新请求。
    pub fn handle(&self, err: &EngineError, attempt: u32, max_retries: u32) -> RecoveryAction {
        match err {
            EngineError::OracleUnavailable { message, .. } => {
                if attempt < max_retries {
                    RecoveryAction::Retry
                } else {
                    RecoveryAction::Degrade(format!(
                        "推理服务暂时不可用，请稍后再试（{message}）"
                    ))
                }
            }
            EngineError::OracleContract(msg) => {
                if attempt == 0 {
                    RecoveryAction::RetryFresh
                } else {
                    RecoveryAction::Degrade(format!("推理服务返回了无效数据：{msg}"))
                }
            }
            EngineError::RejectedTransformation { reason } => {
                RecoveryAction::StayOnStep(format!("该变换未通过校验：{reason}，请选择其他变换"))
            }
            EngineError::InvalidRollbackTarget(id) => {
                RecoveryAction::Reprompt(format!("步骤 {id} 不在当前会话中，请重新选择"))
            }
            EngineError::StaleTurn { .. } => {
                RecoveryAction::Reprompt("候选已过期，请重新获取变换".to_string())
            }
            EngineError::MalformedInput(msg) => {
                RecoveryAction::Reprompt(format!("无法识别题目：{msg}"))
            }
            EngineError::TurnCancelled => RecoveryAction::Abort,
            _ => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RejectionReason;
    use crate::history::StepId;

    #[test]
    fn test_recovery_unavailable_retries_then_degrades() {
        let engine = RecoveryEngine::new();
        let err = EngineError::OracleUnavailable {
            attempts: 1,
            message: "timeout".to_string(),
        };
        assert_eq!(engine.handle(&err, 0, 3), RecoveryAction::Retry);
        assert_eq!(engine.handle(&err, 2, 3), RecoveryAction::Retry);
        match engine.handle(&err, 3, 3) {
            RecoveryAction::Degrade(msg) => assert!(msg.contains("timeout")),
            other => panic!("Expected Degrade, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_contract_error_retries_once() {
        let engine = RecoveryEngine::new();
        let err = EngineError::OracleContract("missing field".to_string());
        assert_eq!(engine.handle(&err, 0, 3), RecoveryAction::RetryFresh);
        assert!(matches!(engine.handle(&err, 1, 3), RecoveryAction::Degrade(_)));
    }

    #[test]
    fn test_recovery_rejected_stays_on_step() {
        let engine = RecoveryEngine::new();
        let err = EngineError::rejected(RejectionReason::MarkedIncorrect);
        assert!(matches!(engine.handle(&err, 0, 3), RecoveryAction::StayOnStep(_)));
    }

    #[test]
    fn test_recovery_invalid_rollback_reprompts() {
        let engine = RecoveryEngine::new();
        let err = EngineError::InvalidRollbackTarget(StepId(42));
        match engine.handle(&err, 0, 3) {
            RecoveryAction::Reprompt(msg) => assert!(msg.contains("42")),
            other => panic!("Expected Reprompt, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_cancelled() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.handle(&EngineError::TurnCancelled, 0, 3),
            RecoveryAction::Abort
        );
    }

    #[test]
    fn test_recovery_internal_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = EngineError::Internal("parent step 7 missing".to_string());
        assert_eq!(engine.handle(&err, 0, 3), RecoveryAction::Abort);
        assert!(err.to_string().contains("parent step 7 missing"));
    }
}
