//! 脚本化 Oracle：按预置队列回复，供测试与离线演示使用
//!
//! - propose / assess / check 各有一条回复队列；propose 队列为空时返回 Transport 错误
//! - verify 按 (原式, 描述, 结果) 查表，未登记时返回默认结论（默认 true），同一输入总是同一结论
//! - assess 队列为空时回复 neutral / 0.5，check 队列为空时回复「未完成」
//! - apply 队列为空时返回 Transport 错误，branch 队列为空时回复「无需分支」

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::protocol::{
    ApplyRequest, ApplyResponse, AssessRequest, AssessResponse, BranchRequest, BranchResponse,
    CheckRequest, CheckResponse, ProposeRequest, RawBranch, RawCandidate, RawParameterDefinition,
    VerifyRequest, VerifyResponse,
};
use super::traits::{Oracle, OracleError};

type VerdictKey = (String, String, String);

/// 构造一条原始候选
pub fn candidate(
    description: &str,
    expression: &str,
    correct: bool,
    usefulness: &str,
    kind: &str,
) -> RawCandidate {
    RawCandidate {
        description: Some(description.to_string()),
        expression: Some(expression.to_string()),
        correctness: Some(correct),
        usefulness: Some(usefulness.to_string()),
        kind: Some(kind.to_string()),
        parameter_definitions: None,
    }
}

/// 为候选附加一个参数定义
pub fn parameterized(
    mut raw: RawCandidate,
    name: &str,
    param_type: &str,
    default_value: Option<&str>,
) -> RawCandidate {
    raw.parameter_definitions
        .get_or_insert_with(Vec::new)
        .push(RawParameterDefinition {
            name: Some(name.to_string()),
            prompt: Some(format!("Value for {name}")),
            param_type: Some(param_type.to_string()),
            default_value: default_value.map(|v| serde_json::Value::String(v.to_string())),
            ..Default::default()
        });
    raw
}

/// 构造一个分支
pub fn branch(name: &str, expression: &str, condition: Option<&str>) -> RawBranch {
    RawBranch {
        name: Some(name.to_string()),
        expression: Some(expression.to_string()),
        condition: condition.map(str::to_string),
        is_valid: Some(true),
    }
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct CallCounters {
    propose: AtomicUsize,
    verify: AtomicUsize,
    assess: AtomicUsize,
    check: AtomicUsize,
    apply: AtomicUsize,
    branch: AtomicUsize,
}

pub struct ScriptedOracle {
    proposals: Mutex<VecDeque<Result<Vec<RawCandidate>, OracleError>>>,
    verdicts: Mutex<HashMap<VerdictKey, bool>>,
    default_verdict: bool,
    assessments: Mutex<VecDeque<Result<AssessResponse, OracleError>>>,
    checks: Mutex<VecDeque<Result<CheckResponse, OracleError>>>,
    applications: Mutex<VecDeque<Result<ApplyResponse, OracleError>>>,
    branchings: Mutex<VecDeque<Result<BranchResponse, OracleError>>>,
    delay: Option<Duration>,
    last_propose: Mutex<Option<ProposeRequest>>,
    last_assess: Mutex<Option<AssessRequest>>,
    last_apply: Mutex<Option<ApplyRequest>>,
    calls: CallCounters,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            proposals: Mutex::new(VecDeque::new()),
            verdicts: Mutex::new(HashMap::new()),
            default_verdict: true,
            assessments: Mutex::new(VecDeque::new()),
            checks: Mutex::new(VecDeque::new()),
            applications: Mutex::new(VecDeque::new()),
            branchings: Mutex::new(VecDeque::new()),
            delay: None,
            last_propose: Mutex::new(None),
            last_assess: Mutex::new(None),
            last_apply: Mutex::new(None),
            calls: CallCounters::default(),
        }
    }

    pub fn with_proposal(self, candidates: Vec<RawCandidate>) -> Self {
        self.push_proposal(Ok(candidates));
        self
    }

    pub fn with_proposal_error(self, err: OracleError) -> Self {
        self.push_proposal(Err(err));
        self
    }

    pub fn with_verdict(self, original: &str, description: &str, result: &str, correct: bool) -> Self {
        self.set_verdict(original, description, result, correct);
        self
    }

    pub fn with_default_verdict(mut self, correct: bool) -> Self {
        self.default_verdict = correct;
        self
    }

    pub fn with_assessment(self, response: AssessResponse) -> Self {
        self.push_assessment(Ok(response));
        self
    }

    pub fn with_check(self, response: CheckResponse) -> Self {
        locked(&self.checks).push_back(Ok(response));
        self
    }

    /// 下一次 apply 的回复：valid 时 result 为计算结果
    pub fn with_application(self, result: &str, is_valid: bool) -> Self {
        locked(&self.applications).push_back(Ok(ApplyResponse {
            result_expression: Some(result.to_string()),
            is_valid: Some(is_valid),
            explanation: None,
            errors: (!is_valid).then(|| vec!["not applicable".to_string()]),
        }));
        self
    }

    pub fn with_branching(self, solution_type: &str, branches: Vec<RawBranch>) -> Self {
        locked(&self.branchings).push_back(Ok(BranchResponse {
            requires_branching: Some(true),
            solution_type: Some(solution_type.to_string()),
            branches: Some(branches),
            explanation: Some(format!("split into {solution_type}")),
        }));
        self
    }

    /// 每次调用前等待（用于超时、取消测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_proposal(&self, reply: Result<Vec<RawCandidate>, OracleError>) {
        locked(&self.proposals).push_back(reply);
    }

    pub fn push_assessment(&self, reply: Result<AssessResponse, OracleError>) {
        locked(&self.assessments).push_back(reply);
    }

    pub fn set_verdict(&self, original: &str, description: &str, result: &str, correct: bool) {
        locked(&self.verdicts).insert(
            (original.to_string(), description.to_string(), result.to_string()),
            correct,
        );
    }

    pub fn propose_calls(&self) -> usize {
        self.calls.propose.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.calls.verify.load(Ordering::SeqCst)
    }

    pub fn assess_calls(&self) -> usize {
        self.calls.assess.load(Ordering::SeqCst)
    }

    pub fn check_calls(&self) -> usize {
        self.calls.check.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> usize {
        self.calls.apply.load(Ordering::SeqCst)
    }

    pub fn branch_calls(&self) -> usize {
        self.calls.branch.load(Ordering::SeqCst)
    }

    pub fn last_apply_request(&self) -> Option<ApplyRequest> {
        locked(&self.last_apply).clone()
    }

    pub fn last_propose_request(&self) -> Option<ProposeRequest> {
        locked(&self.last_propose).clone()
    }

    pub fn last_assess_request(&self) -> Option<AssessRequest> {
        locked(&self.last_assess).clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn propose(&self, request: &ProposeRequest) -> Result<Vec<RawCandidate>, OracleError> {
        self.calls.propose.fetch_add(1, Ordering::SeqCst);
        *locked(&self.last_propose) = Some(request.clone());
        self.pause().await;
        locked(&self.proposals)
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Transport("no scripted proposal left".to_string())))
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, OracleError> {
        self.calls.verify.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let key = (
            request.original_expression.clone(),
            request.transformation_description.clone(),
            request.proposed_result.clone(),
        );
        let correct = locked(&self.verdicts)
            .get(&key)
            .copied()
            .unwrap_or(self.default_verdict);
        Ok(VerifyResponse { correct })
    }

    async fn assess(&self, request: &AssessRequest) -> Result<AssessResponse, OracleError> {
        self.calls.assess.fetch_add(1, Ordering::SeqCst);
        *locked(&self.last_assess) = Some(request.clone());
        self.pause().await;
        locked(&self.assessments).pop_front().unwrap_or_else(|| {
            Ok(AssessResponse {
                assessment: Some("neutral".to_string()),
                confidence: Some(0.5),
                recommend_rollback: Some(false),
                ..Default::default()
            })
        })
    }

    async fn check(&self, _request: &CheckRequest) -> Result<CheckResponse, OracleError> {
        self.calls.check.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        locked(&self.checks).pop_front().unwrap_or_else(|| {
            Ok(CheckResponse {
                is_solved: Some(false),
                confidence: Some(0.5),
                solution_type: Some("unknown".to_string()),
                ..Default::default()
            })
        })
    }

    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyResponse, OracleError> {
        self.calls.apply.fetch_add(1, Ordering::SeqCst);
        *locked(&self.last_apply) = Some(request.clone());
        self.pause().await;
        locked(&self.applications)
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Transport("no scripted application left".to_string())))
    }

    async fn branch(&self, _request: &BranchRequest) -> Result<BranchResponse, OracleError> {
        self.calls.branch.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        locked(&self.branchings).pop_front().unwrap_or_else(|| {
            Ok(BranchResponse {
                requires_branching: Some(false),
                ..Default::default()
            })
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
