//! 校验层：保证每一步恰好是一次目录内的基本操作
//!
//! 顺序：非空 → 识别操作（目录）→ 结构检查（数值采样）→ 候选自身的正确性标记 → 必要时 Oracle 复核。
//! 任一环节失败返回 RejectedTransformation，调用方不修改历史。

pub mod catalogue;
pub mod expr;
pub mod structure;

use crate::core::{EngineError, RejectionReason};
use crate::history::TransformationSource;
use crate::oracle::OracleGateway;

pub use catalogue::{classify, Classification, OperationFamily, OperationKind};
pub use expr::{complexity, extract_base_expression};
pub use structure::Reachability;

/// 一次待校验的变换
#[derive(Debug, Clone)]
pub struct TransformationInput<'a> {
    pub original: &'a str,
    pub description: &'a str,
    pub result: &'a str,
    /// Oracle 给出的类型标签或用户显式选择的操作
    pub declared_kind: Option<OperationKind>,
    pub source: TransformationSource,
    /// 候选的 correctness 标记；用户自定义变换恒为 true
    pub marked_correct: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    double_check_candidates: bool,
}

impl Validator {
    pub fn new(double_check_candidates: bool) -> Self {
        Self {
            double_check_candidates,
        }
    }

    /// 确定描述声明的唯一操作
    ///
    /// 描述里出现两个及以上带操作的子句一律视为链式变换，即使操作相同（减 2 再减 3 也是两步）。
    /// 描述能识别时以描述为准，类型标签只能是同一族的别名；描述无法识别时才退回类型标签。
    pub fn resolve_kind(
        &self,
        description: &str,
        declared: Option<OperationKind>,
    ) -> Result<OperationKind, RejectionReason> {
        match classify(description) {
            Classification::Chained(kinds) => {
                let names: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
                Err(RejectionReason::ChainedOperations(names.join(" + ")))
            }
            Classification::Single(kind) => match declared {
                Some(tag) if tag.family() != kind.family() => Err(RejectionReason::KindMismatch {
                    declared: tag.to_string(),
                    described: kind.to_string(),
                }),
                _ => Ok(kind),
            },
            Classification::Unknown => {
                declared.ok_or_else(|| RejectionReason::UnknownOperation(description.to_string()))
            }
        }
    }

    /// 校验通过返回识别出的操作
    pub async fn validate(
        &self,
        input: &TransformationInput<'_>,
        gateway: &OracleGateway,
    ) -> Result<OperationKind, EngineError> {
        if input.description.trim().is_empty() {
            return Err(EngineError::rejected(RejectionReason::Empty(
                "description".to_string(),
            )));
        }
        if input.result.trim().is_empty() {
            return Err(EngineError::rejected(RejectionReason::Empty("result".to_string())));
        }

        let kind = self
            .resolve_kind(input.description, input.declared_kind)
            .map_err(EngineError::rejected)?;

        let reachability = structure::check(input.original, input.result, kind);
        let needs_oracle = match &reachability {
            Reachability::Reachable => {
                input.source == TransformationSource::UserCustom || self.double_check_candidates
            }
            Reachability::NotReachable(detail) => {
                tracing::warn!(
                    "Rejected '{}': {} -> {} ({})",
                    input.description,
                    input.original,
                    input.result,
                    detail
                );
                return Err(EngineError::rejected(RejectionReason::ExtraSimplification {
                    operation: kind.to_string(),
                    detail: detail.clone(),
                }));
            }
            Reachability::Undetermined(why) => {
                tracing::debug!("Structural check undetermined for '{}': {}", input.description, why);
                true
            }
        };

        if !input.marked_correct {
            return Err(EngineError::rejected(RejectionReason::MarkedIncorrect));
        }

        if needs_oracle {
            let correct = gateway
                .verify_transformation(input.original, input.description, input.result)
                .await?;
            if !correct {
                return Err(EngineError::rejected(RejectionReason::OracleDisagrees));
            }
        }

        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::oracle::{ScriptedOracle, TokenBucket};

    fn gateway(oracle: Arc<ScriptedOracle>) -> OracleGateway {
        OracleGateway::new(oracle, Arc::new(TokenBucket::new(100, 100.0)))
    }

    fn oracle_input<'a>(original: &'a str, description: &'a str, result: &'a str) -> TransformationInput<'a> {
        TransformationInput {
            original,
            description,
            result,
            declared_kind: None,
            source: TransformationSource::Oracle,
            marked_correct: true,
        }
    }

    #[tokio::test]
    async fn test_reachable_oracle_candidate_skips_verify() {
        let oracle = Arc::new(ScriptedOracle::new());
        let gw = gateway(oracle.clone());
        let kind = Validator::default()
            .validate(&oracle_input("2x + 4 = 10", "Subtract 4 from both sides", "2x = 6"), &gw)
            .await
            .unwrap();
        assert_eq!(kind, OperationKind::Subtract);
        assert_eq!(oracle.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_double_check_always_verifies() {
        let oracle = Arc::new(ScriptedOracle::new());
        let gw = gateway(oracle.clone());
        Validator::new(true)
            .validate(&oracle_input("2x + 4 = 10", "Subtract 4 from both sides", "2x = 6"), &gw)
            .await
            .unwrap();
        assert_eq!(oracle.verify_calls(), 1);
    }

    #[tokio::test]
    async fn test_chained_description_rejected() {
        let gw = gateway(Arc::new(ScriptedOracle::new()));
        let err = Validator::default()
            .validate(
                &oracle_input("2x + 4 = 10", "Subtract 4 from both sides and divide by 2", "x = 3"),
                &gw,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::RejectedTransformation {
                reason: RejectionReason::ChainedOperations(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_hidden_second_operation_rejected() {
        let gw = gateway(Arc::new(ScriptedOracle::new()));
        let err = Validator::default()
            .validate(&oracle_input("2x + 4 = 10", "Subtract 4 from both sides", "x = 3"), &gw)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::RejectedTransformation {
                reason: RejectionReason::ExtraSimplification { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_operation_rejected() {
        let gw = gateway(Arc::new(ScriptedOracle::new()));
        let err = Validator::default()
            .validate(&oracle_input("x = 1", "Do some magic", "x = 2"), &gw)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::RejectedTransformation {
                reason: RejectionReason::UnknownOperation(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_marked_incorrect_rejected() {
        let gw = gateway(Arc::new(ScriptedOracle::new()));
        let mut input = oracle_input("2x + 4 = 10", "Subtract 4 from both sides", "2x = 6");
        input.marked_correct = false;
        let err = Validator::default().validate(&input, &gw).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::RejectedTransformation {
                reason: RejectionReason::MarkedIncorrect
            }
        ));
    }

    #[tokio::test]
    async fn test_user_custom_goes_to_oracle() {
        let oracle = Arc::new(
            ScriptedOracle::new().with_verdict("x + y = 3", "Substitute y = 1", "x + 1 = 3", false),
        );
        let gw = gateway(oracle.clone());
        let input = TransformationInput {
            original: "x + y = 3",
            description: "Substitute y = 1",
            result: "x + 1 = 3",
            declared_kind: None,
            source: TransformationSource::UserCustom,
            marked_correct: true,
        };
        let err = Validator::default().validate(&input, &gw).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::RejectedTransformation {
                reason: RejectionReason::OracleDisagrees
            }
        ));
        assert_eq!(oracle.verify_calls(), 1);
    }

    #[test]
    fn test_declared_kind_used_when_description_is_vague() {
        let v = Validator::default();
        assert_eq!(
            v.resolve_kind("Rewrite the left side", Some(OperationKind::Factor)),
            Ok(OperationKind::Factor)
        );
    }

    #[test]
    fn test_repeated_operation_is_chained() {
        let v = Validator::default();
        assert!(matches!(
            v.resolve_kind("Subtract 2, then subtract 3", None),
            Err(RejectionReason::ChainedOperations(_))
        ));
        assert!(matches!(
            v.resolve_kind(
                "Subtract 2 from both sides, then subtract 3 from both sides",
                Some(OperationKind::Subtract)
            ),
            Err(RejectionReason::ChainedOperations(_))
        ));
    }

    #[test]
    fn test_description_wins_over_tag() {
        let v = Validator::default();
        assert_eq!(
            v.resolve_kind("Subtract 4 from both sides", Some(OperationKind::MoveTerm)),
            Ok(OperationKind::Subtract)
        );
        assert_eq!(
            v.resolve_kind("Expand the brackets", Some(OperationKind::Simplify)),
            Ok(OperationKind::Expand)
        );
        assert_eq!(
            v.resolve_kind("Square both sides", Some(OperationKind::Simplify)),
            Err(RejectionReason::KindMismatch {
                declared: "simplify".to_string(),
                described: "power".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_mismatched_tag_rejected_before_structure_check() {
        let oracle = Arc::new(ScriptedOracle::new());
        let gw = gateway(oracle.clone());
        let mut input = oracle_input("x = 3", "Square both sides", "x^2 = 9");
        input.declared_kind = Some(OperationKind::Simplify);
        let err = Validator::default().validate(&input, &gw).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::RejectedTransformation {
                reason: RejectionReason::KindMismatch { .. }
            }
        ));
        assert_eq!(oracle.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_op_rewrite_rejected() {
        let gw = gateway(Arc::new(ScriptedOracle::new()));
        let err = Validator::default()
            .validate(&oracle_input("2x + 4 = 10", "Simplify the left side", "2x + 4 = 10"), &gw)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::RejectedTransformation {
                reason: RejectionReason::ExtraSimplification { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_expand_with_hidden_collect_rejected() {
        let gw = gateway(Arc::new(ScriptedOracle::new()));
        let err = Validator::default()
            .validate(
                &oracle_input("2(x + 3) + 4(x - 1) = 10", "Expand the brackets", "6x + 2 = 10"),
                &gw,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::RejectedTransformation {
                reason: RejectionReason::ExtraSimplification { .. }
            }
        ));
    }
}
