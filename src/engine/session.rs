//! 会话：一次解题过程的全部状态
//!
//! 会话只由 Engine 持有和修改；可整体序列化，用于持久化与恢复。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{EngineError, RejectionReason};
use crate::history::{HistoryTree, Step, StepId, TransformationDescriptor, TransformationSource};
use crate::oracle::{Candidate, HistoryEntry};

/// 会话 ID
pub type SessionId = String;

/// 被拒绝的尝试（审计日志）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedAttempt {
    pub turn: u64,
    pub from_step: StepId,
    pub description: String,
    pub result: String,
    pub source: TransformationSource,
    pub reason: RejectionReason,
    pub at: DateTime<Utc>,
}

/// 导出的一步（当前路径，根在前）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedStep {
    pub index: u32,
    pub expression: String,
    pub transformation: Option<TransformationDescriptor>,
    pub timestamp: DateTime<Utc>,
}

/// get_history 的只读视图
#[derive(Debug, Clone, Serialize)]
pub struct HistoryView {
    pub problem: String,
    pub cursor: StepId,
    /// 全部步骤（含其他分支），按创建顺序
    pub steps: Vec<Step>,
    /// 根到游标的步骤 ID
    pub current_path: Vec<StepId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// 原始题目文本
    pub problem: String,
    pub base_expression: String,
    pub tree: HistoryTree,
    pub cursor: StepId,
    /// 回合号：每次提交或回退加一，候选只在产生它的回合内有效
    pub turn: u64,
    pub rejected: Vec<RejectedAttempt>,
    /// 最近一次给出回退建议时的回合号
    pub last_recommendation_turn: Option<u64>,
    /// 本回合 propose 给出的候选；只有其中的候选按 Oracle 来源处理
    #[serde(default)]
    pub offered: Vec<Candidate>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(problem: impl Into<String>, base_expression: impl Into<String>) -> Self {
        let base_expression = base_expression.into();
        let tree = HistoryTree::new(base_expression.clone());
        let cursor = tree.root().id;
        let now = Utc::now();
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            problem: problem.into(),
            base_expression,
            tree,
            cursor,
            turn: 0,
            rejected: Vec::new(),
            last_recommendation_turn: None,
            offered: Vec::new(),
            created_at: now,
            last_active: now,
        }
    }

    /// 由导出历史的根步骤创建会话，返回会话与其余步骤
    pub fn from_exported_root(
        problem: impl Into<String>,
        exported: &[ExportedStep],
    ) -> Result<(Self, &[ExportedStep]), EngineError> {
        let (root, rest) = exported
            .split_first()
            .ok_or_else(|| EngineError::MalformedInput("exported history is empty".to_string()))?;
        if root.index != 0 || root.transformation.is_some() {
            return Err(EngineError::MalformedInput(
                "exported history must start with the root step".to_string(),
            ));
        }
        Ok((Session::new(problem, root.expression.clone()), rest))
    }

    /// 检查导出的一步能否接在游标之后，返回它的变换描述
    pub fn next_exported(&self, step: &ExportedStep) -> Result<TransformationDescriptor, EngineError> {
        let descriptor = step.transformation.clone().ok_or_else(|| {
            EngineError::MalformedInput(format!("step {} has no transformation", step.index))
        })?;
        let current = self.current_step().index;
        if step.index != current + 1 {
            return Err(EngineError::MalformedInput(format!(
                "step index {} does not follow {}",
                step.index, current
            )));
        }
        Ok(descriptor)
    }

    /// 在 parent 之下追加一步，不移动游标
    pub fn commit_child(
        &mut self,
        parent: StepId,
        result: impl Into<String>,
        descriptor: TransformationDescriptor,
    ) -> Result<StepId, EngineError> {
        self.tree
            .append(parent, result, descriptor, true)
            .ok_or_else(|| EngineError::Internal(format!("parent step {parent} is missing from the history")))
    }

    /// 在游标处追加一步并把游标移过去
    pub fn commit(
        &mut self,
        result: impl Into<String>,
        descriptor: TransformationDescriptor,
    ) -> Result<StepId, EngineError> {
        let id = self.commit_child(self.cursor, result, descriptor)?;
        self.cursor = id;
        Ok(id)
    }

    /// 恢复后的一致性检查（历史树本身在反序列化时已检查）
    pub fn check_integrity(&self) -> Result<(), String> {
        if !self.tree.contains(self.cursor) {
            return Err(format!("cursor {} is not in the history", self.cursor));
        }
        if let Some(turn) = self.last_recommendation_turn {
            if turn > self.turn {
                return Err(format!(
                    "last recommendation at turn {turn} is ahead of turn {}",
                    self.turn
                ));
            }
        }
        Ok(())
    }

    pub fn current_step(&self) -> &Step {
        self.tree.get(self.cursor).unwrap_or_else(|| self.tree.root())
    }

    /// 根到游标的路径
    pub fn current_path(&self) -> Vec<&Step> {
        self.tree.path_to(self.cursor)
    }

    /// 当前步骤之前最近的 n 步（旧的在前），随候选请求一起发送
    pub fn history_window(&self, n: usize) -> Vec<HistoryEntry> {
        let path = self.current_path();
        let before = &path[..path.len().saturating_sub(1)];
        before[before.len().saturating_sub(n)..]
            .iter()
            .map(|s| HistoryEntry {
                expression: s.expression.clone(),
                transformation: s.transformation.as_ref().map(|t| t.description.clone()),
            })
            .collect()
    }

    /// 进入下一回合；上一回合的候选随之作废
    pub fn advance_turn(&mut self) {
        self.turn += 1;
        self.offered.clear();
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        let idle = Utc::now().signed_duration_since(self.last_active);
        idle.to_std().map(|idle| idle > ttl).unwrap_or(false)
    }

    pub fn record_rejection(
        &mut self,
        description: &str,
        result: &str,
        source: TransformationSource,
        reason: RejectionReason,
    ) {
        self.rejected.push(RejectedAttempt {
            turn: self.turn,
            from_step: self.cursor,
            description: description.to_string(),
            result: result.to_string(),
            source,
            reason,
            at: Utc::now(),
        });
        self.touch();
    }

    pub fn view(&self) -> HistoryView {
        HistoryView {
            problem: self.problem.clone(),
            cursor: self.cursor,
            steps: self.tree.steps().to_vec(),
            current_path: self.current_path().iter().map(|s| s.id).collect(),
        }
    }

    pub fn export(&self) -> Vec<ExportedStep> {
        self.current_path()
            .into_iter()
            .map(|s| ExportedStep {
                index: s.index,
                expression: s.expression.clone(),
                transformation: s.transformation.clone(),
                timestamp: s.created_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::OperationKind;

    fn descriptor(description: &str, kind: OperationKind) -> TransformationDescriptor {
        TransformationDescriptor {
            description: description.to_string(),
            kind,
            source: TransformationSource::Oracle,
        }
    }

    fn session_with_steps() -> Session {
        let mut session = Session::new("Solve 2x + 4 = 10", "2x + 4 = 10");
        for (expr, desc, kind) in [
            ("2x = 6", "Subtract 4 from both sides", OperationKind::Subtract),
            ("x = 3", "Divide both sides by 2", OperationKind::Divide),
        ] {
            let parent = session.cursor;
            session.cursor = session.tree.append(parent, expr, descriptor(desc, kind), true).unwrap();
        }
        session
    }

    #[test]
    fn test_session_id_format() {
        let session = Session::new("x = 1", "x = 1");
        assert!(session.id.starts_with("session_"));
        assert_eq!(session.current_step().expression, "x = 1");
    }

    #[test]
    fn test_history_window_excludes_current_step() {
        let session = session_with_steps();
        let window = session.history_window(1);
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].expression, "2x = 6");

        let window = session.history_window(10);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].transformation, None);
    }

    #[test]
    fn test_exported_steps_chain_onto_root() {
        let session = session_with_steps();
        let exported = session.export();
        let (mut rebuilt, rest) = Session::from_exported_root(session.problem.clone(), &exported).unwrap();
        assert_eq!(rest.len(), 2);
        for step in rest {
            let descriptor = rebuilt.next_exported(step).unwrap();
            rebuilt.commit(step.expression.clone(), descriptor).unwrap();
        }

        let key = |steps: &[ExportedStep]| -> Vec<(u32, String)> {
            steps.iter().map(|s| (s.index, s.expression.clone())).collect()
        };
        assert_eq!(key(&exported), key(&rebuilt.export()));
        assert_eq!(rebuilt.current_step().expression, "x = 3");
    }

    #[test]
    fn test_exported_gaps_rejected() {
        let exported = session_with_steps().export();
        let (rebuilt, _) = Session::from_exported_root("p", &exported).unwrap();
        assert!(matches!(
            rebuilt.next_exported(&exported[2]),
            Err(EngineError::MalformedInput(_))
        ));
        assert!(Session::from_exported_root("p", &[]).is_err());
        assert!(Session::from_exported_root("p", &exported[1..]).is_err());
    }

    #[test]
    fn test_commit_to_missing_parent_is_internal_error() {
        let mut session = session_with_steps();
        let before = session.tree.len();
        let err = session
            .commit_child(StepId(42), "x = 0", descriptor("Subtract 3", OperationKind::Subtract))
            .unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
        assert_eq!(session.tree.len(), before);
    }

    #[test]
    fn test_integrity_checks_cursor() {
        let mut session = session_with_steps();
        assert!(session.check_integrity().is_ok());
        session.cursor = StepId(17);
        assert!(session.check_integrity().is_err());
        // 游标无效时 current_step 退回根步骤，不会 panic
        assert_eq!(session.current_step().id, StepId(0));
    }

    #[test]
    fn test_advance_turn_clears_offered() {
        let mut session = Session::new("x = 1", "x = 1");
        session.offered.push(Candidate {
            description: "Add 1 to both sides".into(),
            expression: "x + 1 = 2".into(),
            kind: None,
            correct: true,
            usefulness: crate::oracle::Usefulness::Good,
            parameters: Vec::new(),
        });
        session.advance_turn();
        assert!(session.offered.is_empty());
        assert_eq!(session.turn, 1);
    }

    #[test]
    fn test_expiry() {
        let mut session = Session::new("x = 1", "x = 1");
        assert!(!session.is_expired(Duration::from_secs(60)));
        session.last_active = Utc::now() - chrono::Duration::seconds(120);
        assert!(session.is_expired(Duration::from_secs(60)));
    }
}
