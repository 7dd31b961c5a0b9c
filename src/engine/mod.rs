//! 逐步解题引擎
//!
//! 会话表用 RwLock 保护，每个会话一个 Mutex，整个 propose / apply / rollback 回合都持锁，
//! 因此同一会话的回合串行、不同会话并行。历史只追加，提交要么完整成功要么不留痕迹。
//! 写入历史的每一步（包括导入的历史与分支）都先经过校验器。

mod builder;
pub mod params;
pub mod session;
pub mod types;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::analyzer::{ProgressAnalyzer, RollbackRecommendation};
use crate::core::{EngineError, RejectionReason};
use crate::history::{Step, StepId, TransformationDescriptor, TransformationSource};
use crate::oracle::{OracleGateway, SolutionCheck};
use crate::store::{SessionHandle, SessionStore};
use crate::validator::{extract_base_expression, OperationKind, TransformationInput, Validator};

pub use builder::EngineBuilder;
pub use session::{ExportedStep, HistoryView, RejectedAttempt, Session, SessionId};
pub use types::{
    Applied, BranchSplit, Choice, CustomTransformation, DescribedTransformation, Proposal,
};

/// 会话槽：状态锁 + 取消令牌（取消不需要拿状态锁）
///
/// propose 在等锁之前就取走令牌，所以 abandon_turn 能取消正在等锁和正在等 Oracle 的所有 propose。
struct SessionSlot {
    state: Mutex<Session>,
    cancel: StdMutex<CancellationToken>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            state: Mutex::new(session),
            cancel: StdMutex::new(CancellationToken::new()),
        }
    }

    fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 取消持有当前令牌的所有 propose，之后的 propose 使用新令牌
    fn cancel(&self) {
        let mut guard = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        guard.cancel();
        *guard = CancellationToken::new();
    }
}

pub struct Engine {
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    gateway: Arc<OracleGateway>,
    validator: Validator,
    analyzer: ProgressAnalyzer,
    store: Option<Arc<dyn SessionStore>>,
    history_window: usize,
    analyze_after_apply: bool,
}

impl Engine {
    /// 默认参数的引擎；需要配置化时用 EngineBuilder
    pub fn new(gateway: Arc<OracleGateway>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            gateway,
            validator: Validator::default(),
            analyzer: ProgressAnalyzer::default(),
            store: None,
            history_window: 3,
            analyze_after_apply: true,
        }
    }

    async fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>, EngineError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    async fn insert(&self, session: Session) -> SessionId {
        let id = session.id.clone();
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(SessionSlot::new(session)));
        id
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 从题目中提取基础表达式并创建会话
    pub async fn start_session(&self, problem: &str) -> Result<SessionId, EngineError> {
        let base = extract_base_expression(problem).map_err(EngineError::MalformedInput)?;
        let session = Session::new(problem, base.clone());
        let id = self.insert(session).await;
        tracing::info!("Session {} started with base expression '{}'", id, base);
        Ok(id)
    }

    /// 为当前步骤请求候选；可被 abandon_turn 取消
    pub async fn propose(&self, session_id: &str) -> Result<Proposal, EngineError> {
        let slot = self.slot(session_id).await?;
        let token = slot.token();
        let mut session = tokio::select! {
            _ = token.cancelled() => {
                tracing::warn!("Session {} abandoned a proposal while waiting for the session", session_id);
                return Err(EngineError::TurnCancelled);
            }
            guard = slot.state.lock() => guard,
        };
        if token.is_cancelled() {
            return Err(EngineError::TurnCancelled);
        }

        let expression = session.current_step().expression.clone();
        let window = session.history_window(self.history_window);
        let gateway = self.gateway.clone();
        // 放到独立任务里：取消时不中断调用本身，结果被丢弃
        let call = tokio::spawn(async move {
            gateway.propose_transformations(&expression, window).await
        });

        let candidates = tokio::select! {
            _ = token.cancelled() => {
                tracing::warn!("Session {} abandoned turn {}", session_id, session.turn);
                return Err(EngineError::TurnCancelled);
            }
            joined = call => joined.map_err(|e| EngineError::OracleUnavailable {
                attempts: 0,
                message: format!("oracle task failed: {e}"),
            })??,
        };

        session.offered = candidates.clone();
        session.touch();
        Ok(Proposal {
            session_id: session.id.clone(),
            turn: session.turn,
            from_step: session.cursor,
            candidates,
        })
    }

    /// 校验并提交一步，随后做进度分析（分析失败不影响提交）
    ///
    /// 只有本回合 propose 给出的、不带参数的候选按 Oracle 来源处理；填了参数的候选、
    /// 不在本回合候选中的候选和只有描述的变换都按用户自定义变换处理，必须经过 Oracle 复核。
    pub async fn apply(&self, session_id: &str, choice: Choice) -> Result<Applied, EngineError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.state.lock().await;
        let original = session.current_step().expression.clone();

        let (description, result, declared_kind, source, marked_correct) = match choice {
            Choice::Candidate {
                turn,
                candidate,
                values,
            } => {
                if turn != session.turn {
                    return Err(EngineError::StaleTurn {
                        proposed: turn,
                        current: session.turn,
                    });
                }
                let offered = session.offered.contains(&candidate);
                if !offered {
                    tracing::warn!(
                        "Session {} got a candidate that was not offered in turn {}; verifying it as custom",
                        session_id,
                        turn
                    );
                }
                let parameterized = !candidate.parameters.is_empty() || !values.is_empty();
                let (description, result) = if parameterized {
                    params::fill_parameters(&candidate, &values)?
                } else {
                    (candidate.description.clone(), candidate.expression.clone())
                };
                let source = if offered && !parameterized {
                    TransformationSource::Oracle
                } else {
                    TransformationSource::UserCustom
                };
                let marked_correct = !offered || candidate.correct;
                (description, result, candidate.kind, source, marked_correct)
            }
            Choice::Custom(custom) => (
                custom.description,
                custom.result,
                custom.kind,
                TransformationSource::UserCustom,
                true,
            ),
            Choice::Describe(described) => {
                let applied = self
                    .gateway
                    .apply_transformation(
                        &original,
                        &described.description,
                        described.kind.as_ref().map(OperationKind::as_str),
                    )
                    .await?;
                if !applied.is_valid {
                    let detail = if applied.errors.is_empty() {
                        applied.explanation.clone()
                    } else {
                        applied.errors.join("; ")
                    };
                    let reason = RejectionReason::NotApplicable(detail);
                    tracing::warn!("Session {} could not apply '{}': {}", session_id, described.description, reason);
                    session.record_rejection(
                        &described.description,
                        &applied.result,
                        TransformationSource::UserCustom,
                        reason.clone(),
                    );
                    return Err(EngineError::rejected(reason));
                }
                (
                    described.description,
                    applied.result,
                    described.kind,
                    TransformationSource::UserCustom,
                    true,
                )
            }
        };

        let input = TransformationInput {
            original: &original,
            description: &description,
            result: &result,
            declared_kind,
            source,
            marked_correct,
        };
        let kind = match self.validator.validate(&input, &self.gateway).await {
            Ok(kind) => kind,
            Err(EngineError::RejectedTransformation { reason }) => {
                tracing::warn!("Session {} rejected '{}': {}", session_id, description, reason);
                session.record_rejection(&description, &result, source, reason.clone());
                return Err(EngineError::rejected(reason));
            }
            Err(e) => return Err(e),
        };

        let descriptor = TransformationDescriptor {
            description,
            kind,
            source,
        };
        session.commit(result, descriptor)?;
        session.advance_turn();

        let step = session.current_step().clone();
        tracing::info!(
            "Session {} committed step {} (index {}, {}): {}",
            session_id,
            step.id,
            step.index,
            kind,
            step.expression
        );

        let recommendation = if self.analyze_after_apply {
            self.analyze_locked(&mut session).await
        } else {
            None
        };
        Ok(Applied {
            step,
            recommendation,
        })
    }

    /// 请 Oracle 判断当前步骤是否需要分情况；需要时把每个有效分支作为当前步骤的子步骤提交
    ///
    /// 分支逐个经过校验，任何一个被拒绝则一个都不提交。游标移到第一个分支，其余分支可通过回退进入。
    pub async fn split_cases(&self, session_id: &str) -> Result<Option<BranchSplit>, EngineError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.state.lock().await;
        let original = session.current_step().expression.clone();

        let analysis = self.gateway.analyze_branching(&original).await?;
        if !analysis.requires_branching {
            session.touch();
            return Ok(None);
        }

        let mut accepted = Vec::new();
        for branch in analysis.branches.iter().filter(|b| b.is_valid) {
            let label = match &branch.condition {
                Some(condition) => format!("{} ({})", branch.name, condition),
                None => branch.name.clone(),
            };
            // 逗号会被当作子句分隔，分支名里的 \sqrt 等词就会被读成第二个操作
            let description = format!("Split into cases: {}", label.replace([',', ';'], " |"));
            let input = TransformationInput {
                original: &original,
                description: &description,
                result: &branch.expression,
                declared_kind: Some(OperationKind::SplitCases),
                source: TransformationSource::Oracle,
                marked_correct: true,
            };
            match self.validator.validate(&input, &self.gateway).await {
                Ok(kind) => accepted.push((branch.expression.clone(), description, kind)),
                Err(EngineError::RejectedTransformation { reason }) => {
                    tracing::warn!("Session {} rejected branch '{}': {}", session_id, branch.name, reason);
                    session.record_rejection(
                        &description,
                        &branch.expression,
                        TransformationSource::Oracle,
                        reason.clone(),
                    );
                    return Err(EngineError::rejected(reason));
                }
                Err(e) => return Err(e),
            }
        }

        let parent = session.cursor;
        let mut ids = Vec::with_capacity(accepted.len());
        for (result, description, kind) in accepted {
            let descriptor = TransformationDescriptor {
                description,
                kind,
                source: TransformationSource::Oracle,
            };
            ids.push(session.commit_child(parent, result, descriptor)?);
        }
        let first = *ids
            .first()
            .ok_or_else(|| EngineError::Internal("branching produced no branches".to_string()))?;
        session.cursor = first;
        session.advance_turn();

        let steps: Vec<Step> = ids
            .iter()
            .filter_map(|id| session.tree.get(*id).cloned())
            .collect();
        tracing::info!(
            "Session {} split step {} into {} branch(es) ({:?})",
            session_id,
            parent,
            steps.len(),
            analysis.solution_type
        );
        Ok(Some(BranchSplit {
            solution_type: analysis.solution_type,
            explanation: analysis.explanation,
            steps,
        }))
    }

    async fn analyze_locked(&self, session: &mut Session) -> Option<RollbackRecommendation> {
        let outcome = {
            let path = session.current_path();
            self.analyzer
                .analyze(
                    &session.problem,
                    &path,
                    session.turn,
                    session.last_recommendation_turn,
                    &self.gateway,
                )
                .await
        };
        match outcome {
            Ok(Some(rec)) => {
                session.last_recommendation_turn = Some(session.turn);
                Some(rec)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Progress analysis failed for session {}: {}", session.id, e);
                None
            }
        }
    }

    /// 按需分析当前路径（与提交后的自动分析共用频率限制）
    pub async fn assess(&self, session_id: &str) -> Result<Option<RollbackRecommendation>, EngineError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.state.lock().await;
        let recommendation = {
            let path = session.current_path();
            self.analyzer
                .analyze(
                    &session.problem,
                    &path,
                    session.turn,
                    session.last_recommendation_turn,
                    &self.gateway,
                )
                .await?
        };
        if recommendation.is_some() {
            session.last_recommendation_turn = Some(session.turn);
        }
        Ok(recommendation)
    }

    /// 移动游标到任意已有步骤，不删除任何历史
    pub async fn rollback(&self, session_id: &str, target: StepId) -> Result<Step, EngineError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.state.lock().await;
        if !session.tree.contains(target) {
            return Err(EngineError::InvalidRollbackTarget(target));
        }
        let from = session.cursor;
        session.cursor = target;
        session.advance_turn();
        tracing::info!("Session {} rolled back from {} to {}", session_id, from, target);
        Ok(session.current_step().clone())
    }

    pub async fn get_history(&self, session_id: &str) -> Result<HistoryView, EngineError> {
        let slot = self.slot(session_id).await?;
        let session = slot.state.lock().await;
        Ok(session.view())
    }

    /// 当前路径，根在前
    pub async fn export_history(&self, session_id: &str) -> Result<Vec<ExportedStep>, EngineError> {
        let slot = self.slot(session_id).await?;
        let session = slot.state.lock().await;
        Ok(session.export())
    }

    /// 由导出的历史重建一个新会话
    ///
    /// 每一步都重新经过校验器（保留原来的来源），任何一步被拒绝则整个导入失败。
    pub async fn import_history(
        &self,
        problem: &str,
        exported: &[ExportedStep],
    ) -> Result<SessionId, EngineError> {
        let (mut session, rest) = Session::from_exported_root(problem, exported)?;
        for step in rest {
            let descriptor = session.next_exported(step)?;
            let original = session.current_step().expression.clone();
            let input = TransformationInput {
                original: &original,
                description: &descriptor.description,
                result: &step.expression,
                declared_kind: Some(descriptor.kind),
                source: descriptor.source,
                marked_correct: true,
            };
            let kind = self.validator.validate(&input, &self.gateway).await.map_err(|e| {
                tracing::warn!("Import rejected step {} '{}': {}", step.index, descriptor.description, e);
                e
            })?;
            session.commit(
                step.expression.clone(),
                TransformationDescriptor { kind, ..descriptor },
            )?;
        }
        let id = self.insert(session).await;
        tracing::info!("Session {} imported with {} step(s)", id, exported.len());
        Ok(id)
    }

    /// 请 Oracle 判断当前表达式是否已是最终答案
    pub async fn check_solution(&self, session_id: &str) -> Result<SolutionCheck, EngineError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.state.lock().await;
        let expression = session.current_step().expression.clone();
        let check = self.gateway.check_solution(&session.problem, &expression).await?;
        session.touch();
        tracing::info!(
            "Session {} solution check: solved={} ({:?})",
            session_id,
            check.is_solved,
            check.solution_type
        );
        Ok(check)
    }

    pub async fn rejected_attempts(&self, session_id: &str) -> Result<Vec<RejectedAttempt>, EngineError> {
        let slot = self.slot(session_id).await?;
        let session = slot.state.lock().await;
        Ok(session.rejected.clone())
    }

    /// 取消正在等待的 propose
    pub async fn abandon_turn(&self, session_id: &str) -> Result<(), EngineError> {
        self.slot(session_id).await?.cancel();
        Ok(())
    }

    pub async fn close_session(&self, session_id: &str) -> Result<(), EngineError> {
        let slot = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        slot.cancel();
        tracing::info!("Session {} closed", session_id);
        Ok(())
    }

    /// 清理空闲超过 ttl 的会话；正在进行回合的会话跳过
    pub async fn cleanup_expired(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, slot)| {
                slot.state
                    .try_lock()
                    .map(|s| s.is_expired(ttl))
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(slot) = sessions.remove(id) {
                slot.cancel();
            }
        }
        if !expired.is_empty() {
            tracing::info!("Cleaned up {} expired session(s)", expired.len());
        }
        expired.len()
    }

    pub async fn save_session(&self, session_id: &str) -> Result<SessionHandle, EngineError> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| EngineError::Persistence("no session store configured".to_string()))?;
        let slot = self.slot(session_id).await?;
        let session = slot.state.lock().await;
        let handle = store
            .save(&session)
            .await
            .map_err(|e| EngineError::Persistence(format!("{e:#}")))?;
        tracing::info!("Session {} saved as {}", session_id, handle);
        Ok(handle)
    }

    /// 从存储恢复会话；同 ID 的内存会话会被替换
    pub async fn restore_session(&self, handle: &SessionHandle) -> Result<SessionId, EngineError> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| EngineError::Persistence("no session store configured".to_string()))?;
        let mut session = store
            .load(handle)
            .await
            .map_err(|e| EngineError::Persistence(format!("{e:#}")))?;
        session
            .check_integrity()
            .map_err(|e| EngineError::Persistence(format!("session {handle} is inconsistent: {e}")))?;
        session.touch();
        let id = self.insert(session).await;
        tracing::info!("Session {} restored from {}", id, handle);
        Ok(id)
    }
}
