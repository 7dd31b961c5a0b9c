//! Oracle 网关
//!
//! 每次调用：取令牌 → 带超时调用 → 协议校验。网络类错误按指数退避重试（base * 2^attempt，封顶 max_delay），
//! 协议错误换新请求重试一次；是否继续重试由 RecoveryEngine 决定。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::OracleSection;
use crate::core::{EngineError, RecoveryAction, RecoveryEngine};

use super::protocol::{
    AppliedResult, ApplyRequest, ApplyResponse, AssessRequest, AssessResponse, AssessStep,
    BranchAnalysis, BranchRequest, BranchResponse, Candidate, CheckRequest, CheckResponse,
    HistoryEntry, ProgressAssessment, ProposeRequest, RawCandidate, SolutionCheck, VerifyRequest,
    VerifyResponse, PROTOCOL_VERSION,
};
use super::rate_limit::TokenBucket;
use super::traits::{Oracle, OracleError};

/// 超时与重试参数
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OracleSection::default())
    }
}

impl RetryPolicy {
    pub fn from_config(section: &OracleSection) -> Self {
        Self {
            timeout: Duration::from_secs(section.timeout_secs),
            max_retries: section.max_retries,
            base_delay: Duration::from_millis(section.base_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
        }
    }

    /// 第 attempt 次重试前的等待时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay)
    }
}

/// 推理服务的类型化边界
pub struct OracleGateway {
    oracle: Arc<dyn Oracle>,
    limiter: Arc<TokenBucket>,
    policy: RetryPolicy,
    recovery: RecoveryEngine,
    candidate_count: usize,
}

impl OracleGateway {
    pub fn new(oracle: Arc<dyn Oracle>, limiter: Arc<TokenBucket>) -> Self {
        Self {
            oracle,
            limiter,
            policy: RetryPolicy::default(),
            recovery: RecoveryEngine::new(),
            candidate_count: OracleSection::default().candidate_count,
        }
    }

    pub fn from_config(oracle: Arc<dyn Oracle>, limiter: Arc<TokenBucket>, section: &OracleSection) -> Self {
        Self::new(oracle, limiter)
            .with_policy(RetryPolicy::from_config(section))
            .with_candidate_count(section.candidate_count)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_candidate_count(mut self, count: usize) -> Self {
        self.candidate_count = count.max(1);
        self
    }

    pub fn candidate_count(&self) -> usize {
        self.candidate_count
    }

    async fn call<R, T, F, Fut, N>(&self, op: &'static str, mut invoke: F, normalize: N) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, OracleError>>,
        N: Fn(R) -> Result<T, String>,
    {
        let mut transient_retries = 0u32;
        let mut contract_retries = 0u32;
        let mut attempts = 0u32;

        loop {
            self.limiter.acquire().await;
            attempts += 1;

            let outcome = match tokio::time::timeout(self.policy.timeout, invoke()).await {
                Ok(result) => result,
                Err(_) => Err(OracleError::Timeout),
            };

            let err = match outcome {
                Ok(raw) => match normalize(raw) {
                    Ok(value) => return Ok(value),
                    Err(msg) => EngineError::OracleContract(msg),
                },
                Err(e) if e.is_transient() => EngineError::OracleUnavailable {
                    attempts,
                    message: e.to_string(),
                },
                Err(e) => EngineError::OracleContract(e.to_string()),
            };

            let attempt = match err {
                EngineError::OracleUnavailable { .. } => transient_retries,
                _ => contract_retries,
            };
            match self.recovery.handle(&err, attempt, self.policy.max_retries) {
                RecoveryAction::Retry => {
                    let delay = self.policy.backoff(transient_retries);
                    tracing::warn!(
                        "Oracle {} via {} failed (attempt {}): {}; retrying in {:?}",
                        op,
                        self.oracle.name(),
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    transient_retries += 1;
                }
                RecoveryAction::RetryFresh => {
                    tracing::warn!("Oracle {} broke the protocol: {}; sending a fresh request", op, err);
                    contract_retries += 1;
                }
                _ => {
                    tracing::error!("Oracle {} gave up after {} attempt(s): {}", op, attempts, err);
                    return Err(err);
                }
            }
        }
    }

    /// 为当前表达式请求候选变换，按 good → neutral → bad 排序
    pub async fn propose_transformations(
        &self,
        expression: &str,
        history_window: Vec<HistoryEntry>,
    ) -> Result<Vec<Candidate>, EngineError> {
        let request = ProposeRequest {
            version: PROTOCOL_VERSION,
            expression: expression.to_string(),
            history_window,
            count: self.candidate_count,
        };
        let oracle = &self.oracle;
        let count = self.candidate_count;

        let candidates = self
            .call("propose", || oracle.propose(&request), |raw: Vec<RawCandidate>| validate_candidates(raw, count))
            .await?;
        tracing::info!("Oracle proposed {} candidates for '{}'", candidates.len(), expression);
        Ok(candidates)
    }

    pub async fn verify_transformation(
        &self,
        original: &str,
        description: &str,
        proposed_result: &str,
    ) -> Result<bool, EngineError> {
        let request = VerifyRequest {
            version: PROTOCOL_VERSION,
            original_expression: original.to_string(),
            transformation_description: description.to_string(),
            proposed_result: proposed_result.to_string(),
        };
        let oracle = &self.oracle;
        let verdict = self
            .call("verify", || oracle.verify(&request), |r: VerifyResponse| Ok(r.correct))
            .await?;
        tracing::debug!("Oracle verify '{}' -> '{}': {}", original, proposed_result, verdict);
        Ok(verdict)
    }

    pub async fn assess_progress(
        &self,
        problem: &str,
        steps: Vec<AssessStep>,
    ) -> Result<ProgressAssessment, EngineError> {
        let request = AssessRequest {
            version: PROTOCOL_VERSION,
            problem: problem.to_string(),
            steps,
        };
        let oracle = &self.oracle;
        self.call("assess", || oracle.assess(&request), |r: AssessResponse| r.normalize())
            .await
    }

    pub async fn check_solution(&self, problem: &str, expression: &str) -> Result<SolutionCheck, EngineError> {
        let request = CheckRequest {
            version: PROTOCOL_VERSION,
            problem: problem.to_string(),
            expression: expression.to_string(),
        };
        let oracle = &self.oracle;
        self.call("check", || oracle.check(&request), |r: CheckResponse| r.normalize())
            .await
    }

    /// 只有描述时，请 Oracle 计算结果；结果仍需经过校验器
    pub async fn apply_transformation(
        &self,
        expression: &str,
        description: &str,
        kind: Option<&str>,
    ) -> Result<AppliedResult, EngineError> {
        let request = ApplyRequest {
            version: PROTOCOL_VERSION,
            expression: expression.to_string(),
            transformation_description: description.to_string(),
            transformation_kind: kind.map(str::to_string),
        };
        let oracle = &self.oracle;
        let applied = self
            .call("apply", || oracle.apply(&request), |r: ApplyResponse| r.normalize())
            .await?;
        tracing::debug!(
            "Oracle applied '{}' to '{}': '{}' (valid={})",
            description,
            expression,
            applied.result,
            applied.is_valid
        );
        Ok(applied)
    }

    pub async fn analyze_branching(&self, expression: &str) -> Result<BranchAnalysis, EngineError> {
        let request = BranchRequest {
            version: PROTOCOL_VERSION,
            expression: expression.to_string(),
        };
        let oracle = &self.oracle;
        let analysis = self
            .call("branch", || oracle.branch(&request), |r: BranchResponse| r.normalize())
            .await?;
        tracing::info!(
            "Oracle branching analysis for '{}': requires_branching={} ({} branch(es))",
            expression,
            analysis.requires_branching,
            analysis.branches.len()
        );
        Ok(analysis)
    }
}

fn validate_candidates(raw: Vec<RawCandidate>, count: usize) -> Result<Vec<Candidate>, String> {
    if raw.len() != count {
        return Err(format!("expected {count} candidates, got {}", raw.len()));
    }
    let mut candidates = raw
        .into_iter()
        .enumerate()
        .map(|(i, c)| c.normalize().map_err(|e| format!("candidate {i}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;

    let correct = candidates.iter().filter(|c| c.correct).count();
    if correct != 1 {
        return Err(format!("expected exactly one correct candidate, got {correct}"));
    }
    candidates.sort_by_key(|c| c.usefulness);
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::protocol::Usefulness;
    use crate::oracle::scripted::{candidate, ScriptedOracle};

    fn five_candidates() -> Vec<RawCandidate> {
        vec![
            candidate("Divide both sides by 2", "x + 2 = 5", false, "neutral", "divide"),
            candidate("Subtract 4 from both sides", "2x = 6", true, "good", "subtract"),
            candidate("Add 1 to both sides", "2x + 5 = 11", false, "bad", "add"),
            candidate("Subtract 10 from both sides", "2x - 6 = 0", false, "neutral", "subtract"),
            candidate("Multiply both sides by 3", "6x + 12 = 30", false, "bad", "multiply"),
        ]
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn gateway(oracle: Arc<ScriptedOracle>) -> OracleGateway {
        OracleGateway::new(oracle, Arc::new(TokenBucket::new(100, 100.0))).with_policy(fast_policy())
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_propose_sorts_by_usefulness() {
        let oracle = Arc::new(ScriptedOracle::new().with_proposal(five_candidates()));
        let gw = gateway(oracle.clone());
        let candidates = gw.propose_transformations("2x + 4 = 10", vec![]).await.unwrap();
        let order: Vec<Usefulness> = candidates.iter().map(|c| c.usefulness).collect();
        assert_eq!(
            order,
            vec![
                Usefulness::Good,
                Usefulness::Neutral,
                Usefulness::Neutral,
                Usefulness::Bad,
                Usefulness::Bad
            ]
        );
        assert_eq!(candidates[0].expression, "2x = 6");
        let request = oracle.last_propose_request().unwrap();
        assert_eq!(request.version, PROTOCOL_VERSION);
        assert_eq!(request.count, 5);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_proposal_error(OracleError::Transport("connection reset".into()))
                .with_proposal(five_candidates()),
        );
        let gw = gateway(oracle.clone());
        assert!(gw.propose_transformations("2x + 4 = 10", vec![]).await.is_ok());
        assert_eq!(oracle.propose_calls(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_after_retries_exhausted() {
        let oracle = Arc::new(ScriptedOracle::new());
        for _ in 0..5 {
            oracle.push_proposal(Err(OracleError::Transport("down".into())));
        }
        let gw = gateway(oracle.clone());
        match gw.propose_transformations("x = 1", vec![]).await {
            Err(EngineError::OracleUnavailable { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("Expected OracleUnavailable, got {:?}", other),
        }
        assert_eq!(oracle.propose_calls(), 3);
    }

    #[tokio::test]
    async fn test_contract_violation_retried_once() {
        let mut two_correct = five_candidates();
        two_correct[0].correctness = Some(true);
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_proposal(two_correct.clone())
                .with_proposal(five_candidates()),
        );
        let gw = gateway(oracle.clone());
        assert!(gw.propose_transformations("2x + 4 = 10", vec![]).await.is_ok());

        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_proposal(two_correct.clone())
                .with_proposal(two_correct),
        );
        let gw = gateway(oracle.clone());
        assert!(matches!(
            gw.propose_transformations("2x + 4 = 10", vec![]).await,
            Err(EngineError::OracleContract(_))
        ));
        assert_eq!(oracle.propose_calls(), 2);
    }

    #[tokio::test]
    async fn test_wrong_candidate_count_is_contract_error() {
        let mut short = five_candidates();
        short.pop();
        let oracle = Arc::new(ScriptedOracle::new().with_proposal(short.clone()).with_proposal(short));
        let gw = gateway(oracle);
        assert!(matches!(
            gw.propose_transformations("2x + 4 = 10", vec![]).await,
            Err(EngineError::OracleContract(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_unavailable() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_delay(Duration::from_secs(5))
                .with_proposal(five_candidates()),
        );
        let gw = gateway(oracle);
        assert!(matches!(
            gw.propose_transformations("2x + 4 = 10", vec![]).await,
            Err(EngineError::OracleUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_assess_out_of_range_confidence() {
        let bad = AssessResponse {
            assessment: Some("poor".into()),
            confidence: Some(7.0),
            ..Default::default()
        };
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_assessment(bad.clone())
                .with_assessment(bad),
        );
        let gw = gateway(oracle);
        assert!(matches!(
            gw.assess_progress("x", vec![]).await,
            Err(EngineError::OracleContract(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_transformation_passes_kind() {
        let oracle = Arc::new(ScriptedOracle::new().with_application("x = 3", true));
        let gw = gateway(oracle.clone());
        let applied = gw
            .apply_transformation("2x = 6", "Divide both sides by 2", Some("divide"))
            .await
            .unwrap();
        assert!(applied.is_valid);
        assert_eq!(applied.result, "x = 3");
        let request = oracle.last_apply_request().unwrap();
        assert_eq!(request.transformation_kind.as_deref(), Some("divide"));
        assert_eq!(request.version, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_single_branch_is_contract_error() {
        use crate::oracle::scripted::branch;
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_branching("cases", vec![branch("only", "x = 2", None)])
                .with_branching("cases", vec![branch("x = 2", "x = 2", None), branch("x = -2", "x = -2", None)]),
        );
        let gw = gateway(oracle.clone());
        let analysis = gw.analyze_branching("x^2 = 4").await.unwrap();
        assert!(analysis.requires_branching);
        assert_eq!(analysis.branches.len(), 2);
        assert_eq!(oracle.branch_calls(), 2);
    }

    #[tokio::test]
    async fn test_verify_uses_scripted_verdicts() {
        let oracle = Arc::new(ScriptedOracle::new().with_verdict("2x = 6", "Divide by 2", "x = 4", false));
        let gw = gateway(oracle);
        assert!(!gw.verify_transformation("2x = 6", "Divide by 2", "x = 4").await.unwrap());
        assert!(gw.verify_transformation("2x = 6", "Divide by 2", "x = 3").await.unwrap());
    }
}
