//! 进度分析：在 Oracle 的进度评估外加一层护栏，只给出建议，从不移动游标
//!
//! 先判断是否需要分析（分支太浅、表达式在稳定化简、刚给过建议时都不打扰用户），
//! 再调用 assess_progress，并校验建议目标必须是当前步骤的严格祖先。

use serde::{Deserialize, Serialize};

use crate::config::AnalyzerSection;
use crate::core::EngineError;
use crate::history::{Step, StepId};
use crate::oracle::{AssessStep, Assessment, OracleGateway};
use crate::validator::complexity;

/// 分支深度（含根）的硬下限
pub const MIN_BRANCH_DEPTH_FLOOR: usize = 4;

/// 回退建议（仅供参考）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecommendation {
    pub assessment: Assessment,
    pub confidence: f64,
    /// None 表示只提示「进展不佳」，没有具体回退目标
    pub target: Option<StepId>,
    pub target_index: Option<u32>,
    pub rationale: String,
    pub suggestion: Option<String>,
}

/// 不做分析的原因
#[derive(Debug, Clone, PartialEq)]
pub enum Suppression {
    Disabled,
    ShallowBranch { depth: usize, min: usize },
    Simplifying,
    RateLimited,
}

#[derive(Debug, Clone)]
pub struct ProgressAnalyzer {
    enabled: bool,
    min_branch_depth: usize,
    min_confidence: f64,
}

impl Default for ProgressAnalyzer {
    fn default() -> Self {
        Self::from_config(&AnalyzerSection::default())
    }
}

impl ProgressAnalyzer {
    pub fn from_config(section: &AnalyzerSection) -> Self {
        Self {
            enabled: section.enabled,
            min_branch_depth: section.min_branch_depth.max(MIN_BRANCH_DEPTH_FLOOR),
            min_confidence: section.min_confidence,
        }
    }

    pub fn min_branch_depth(&self) -> usize {
        self.min_branch_depth
    }

    /// 是否跳过本次分析；path 为根到游标的路径
    pub fn suppression(
        &self,
        path: &[&Step],
        turn: u64,
        last_recommendation_turn: Option<u64>,
    ) -> Option<Suppression> {
        if !self.enabled {
            return Some(Suppression::Disabled);
        }
        if path.len() < self.min_branch_depth {
            return Some(Suppression::ShallowBranch {
                depth: path.len(),
                min: self.min_branch_depth,
            });
        }
        if last_recommendation_turn == Some(turn) {
            return Some(Suppression::RateLimited);
        }
        let sizes: Vec<usize> = path.iter().map(|s| complexity(&s.expression)).collect();
        let non_increasing = sizes.windows(2).all(|w| w[1] <= w[0]);
        if non_increasing && sizes.last() < sizes.first() {
            return Some(Suppression::Simplifying);
        }
        None
    }

    /// 分析当前路径；Ok(None) 表示没有建议
    pub async fn analyze(
        &self,
        problem: &str,
        path: &[&Step],
        turn: u64,
        last_recommendation_turn: Option<u64>,
        gateway: &OracleGateway,
    ) -> Result<Option<RollbackRecommendation>, EngineError> {
        if let Some(reason) = self.suppression(path, turn, last_recommendation_turn) {
            tracing::debug!("Progress analysis suppressed: {:?}", reason);
            return Ok(None);
        }

        let steps = path
            .iter()
            .map(|s| AssessStep {
                index: s.index,
                expression: s.expression.clone(),
                transformation: s.transformation.as_ref().map(|t| t.description.clone()),
            })
            .collect();
        let progress = gateway.assess_progress(problem, steps).await?;

        if progress.assessment == Assessment::Good {
            return Ok(None);
        }
        if progress.confidence < self.min_confidence {
            tracing::debug!(
                "Assessment {:?} below confidence threshold ({} < {})",
                progress.assessment,
                progress.confidence,
                self.min_confidence
            );
            return Ok(None);
        }

        let cursor_index = path.last().map(|s| s.index).unwrap_or(0);
        let target = match (progress.recommend_rollback, progress.recommended_step) {
            (true, Some(index)) => {
                // 目标必须在当前路径上且早于游标
                match path.iter().find(|s| s.index == index).filter(|_| index < cursor_index) {
                    Some(step) => Some((step.id, index)),
                    None => {
                        tracing::warn!(
                            "Ignoring rollback recommendation to step {} (cursor at {})",
                            index,
                            cursor_index
                        );
                        return Ok(None);
                    }
                }
            }
            _ if progress.assessment == Assessment::Poor => None,
            _ => return Ok(None),
        };

        let recommendation = RollbackRecommendation {
            assessment: progress.assessment,
            confidence: progress.confidence,
            target: target.map(|(id, _)| id),
            target_index: target.map(|(_, index)| index),
            rationale: progress.reason,
            suggestion: progress.suggestion,
        };
        tracing::info!(
            "Rollback recommendation: {:?} (confidence {:.2}, target {:?})",
            recommendation.assessment,
            recommendation.confidence,
            recommendation.target_index
        );
        Ok(Some(recommendation))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::history::{HistoryTree, TransformationDescriptor, TransformationSource};
    use crate::oracle::protocol::AssessResponse;
    use crate::oracle::{ScriptedOracle, TokenBucket};
    use crate::validator::OperationKind;

    fn tree_with(expressions: &[&str]) -> (HistoryTree, StepId) {
        let mut tree = HistoryTree::new(expressions[0]);
        let mut cursor = tree.root().id;
        for expr in &expressions[1..] {
            let descriptor = TransformationDescriptor {
                description: "step".to_string(),
                kind: OperationKind::Simplify,
                source: TransformationSource::Oracle,
            };
            cursor = tree.append(cursor, *expr, descriptor, true).unwrap();
        }
        (tree, cursor)
    }

    fn poor(step: Option<u32>, confidence: f64) -> AssessResponse {
        AssessResponse {
            assessment: Some("poor".into()),
            confidence: Some(confidence),
            recommend_rollback: Some(step.is_some()),
            recommended_step: step,
            reason: Some("the equation got harder".into()),
            suggestion_message: Some("go back".into()),
        }
    }

    fn gateway(oracle: Arc<ScriptedOracle>) -> OracleGateway {
        OracleGateway::new(oracle, Arc::new(TokenBucket::new(100, 100.0)))
    }

    const GROWING: [&str; 4] = ["2x + 4 = 10", "2x = 6", "4x^2 = 36", "4x^2 - 36 = 0"];

    #[test]
    fn test_depth_floor_cannot_be_lowered() {
        let analyzer = ProgressAnalyzer::from_config(&AnalyzerSection {
            enabled: true,
            min_branch_depth: 2,
            min_confidence: 0.7,
        });
        assert_eq!(analyzer.min_branch_depth(), 4);
    }

    #[test]
    fn test_suppression_rules() {
        let analyzer = ProgressAnalyzer::default();

        let (tree, cursor) = tree_with(&GROWING[..3]);
        let path = tree.path_to(cursor);
        assert!(matches!(
            analyzer.suppression(&path, 3, None),
            Some(Suppression::ShallowBranch { depth: 3, min: 4 })
        ));

        let (tree, cursor) = tree_with(&["2x + 4 + 3x - 1 = 10", "5x + 3 = 10", "5x = 7", "x = 7/5"]);
        let path = tree.path_to(cursor);
        assert_eq!(analyzer.suppression(&path, 3, None), Some(Suppression::Simplifying));

        let (tree, cursor) = tree_with(&GROWING);
        let path = tree.path_to(cursor);
        assert_eq!(analyzer.suppression(&path, 5, None), None);
        assert_eq!(analyzer.suppression(&path, 5, Some(5)), Some(Suppression::RateLimited));
    }

    #[tokio::test]
    async fn test_recommendation_targets_strict_ancestor() {
        let oracle = Arc::new(ScriptedOracle::new().with_assessment(poor(Some(1), 0.9)));
        let gw = gateway(oracle.clone());
        let (tree, cursor) = tree_with(&GROWING);
        let path = tree.path_to(cursor);

        let rec = ProgressAnalyzer::default()
            .analyze("Solve 2x + 4 = 10", &path, 3, None, &gw)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.target, Some(path[1].id));
        assert_eq!(rec.target_index, Some(1));
        assert_eq!(tree.get(rec.target.unwrap()).unwrap().expression, "2x = 6");

        let request = oracle.last_assess_request().unwrap();
        assert_eq!(request.steps.len(), 4);
        assert_eq!(request.steps[0].transformation, None);
    }

    #[tokio::test]
    async fn test_invalid_target_is_dropped() {
        let oracle = Arc::new(ScriptedOracle::new().with_assessment(poor(Some(3), 0.9)));
        let gw = gateway(oracle);
        let (tree, cursor) = tree_with(&GROWING);
        let path = tree.path_to(cursor);
        let rec = ProgressAnalyzer::default()
            .analyze("p", &path, 3, None, &gw)
            .await
            .unwrap();
        assert!(rec.is_none());
    }

    #[tokio::test]
    async fn test_low_confidence_and_good_assessment_ignored() {
        let good = AssessResponse {
            assessment: Some("good".into()),
            confidence: Some(0.99),
            ..Default::default()
        };
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_assessment(poor(Some(1), 0.5))
                .with_assessment(good),
        );
        let gw = gateway(oracle);
        let (tree, cursor) = tree_with(&GROWING);
        let path = tree.path_to(cursor);
        let analyzer = ProgressAnalyzer::default();
        assert!(analyzer.analyze("p", &path, 3, None, &gw).await.unwrap().is_none());
        assert!(analyzer.analyze("p", &path, 4, None, &gw).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poor_without_target_is_advisory() {
        let oracle = Arc::new(ScriptedOracle::new().with_assessment(poor(None, 0.8)));
        let gw = gateway(oracle);
        let (tree, cursor) = tree_with(&GROWING);
        let path = tree.path_to(cursor);
        let rec = ProgressAnalyzer::default()
            .analyze("p", &path, 3, None, &gw)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.target, None);
        assert_eq!(rec.assessment, Assessment::Poor);
        assert_eq!(rec.suggestion.as_deref(), Some("go back"));
    }

    #[tokio::test]
    async fn test_shallow_branch_never_calls_oracle() {
        let oracle = Arc::new(ScriptedOracle::new().with_assessment(poor(Some(0), 1.0)));
        let gw = gateway(oracle.clone());
        let (tree, cursor) = tree_with(&GROWING[..3]);
        let path = tree.path_to(cursor);
        assert!(ProgressAnalyzer::default()
            .analyze("p", &path, 2, None, &gw)
            .await
            .unwrap()
            .is_none());
        assert_eq!(oracle.assess_calls(), 0);
    }
}
