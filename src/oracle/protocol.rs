//! Oracle 线协议
//!
//! 请求均携带 `version`；回复先按宽松结构（全部 Option）反序列化，再由 `normalize` 校验成强类型。
//! 回复结构同时派生 JsonSchema，LlmOracle 把 schema 嵌进提示词。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::validator::OperationKind;

/// 当前协议版本
pub const PROTOCOL_VERSION: u32 = 1;

/// 请求候选时附带的一条历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub expression: String,
    pub transformation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposeRequest {
    pub version: u32,
    pub expression: String,
    pub history_window: Vec<HistoryEntry>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub version: u32,
    pub original_expression: String,
    pub transformation_description: String,
    pub proposed_result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessStep {
    pub index: u32,
    pub expression: String,
    pub transformation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessRequest {
    pub version: u32,
    pub problem: String,
    pub steps: Vec<AssessStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub version: u32,
    pub problem: String,
    pub expression: String,
}

/// 只给出描述、由 Oracle 计算结果的变换
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub version: u32,
    pub expression: String,
    pub transformation_description: String,
    /// 用户显式选择的操作标签
    pub transformation_kind: Option<String>,
}

/// 询问当前表达式是否需要分情况 / 分支求解
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRequest {
    pub version: u32,
    pub expression: String,
}

/// 参数定义的原始回复
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawParameterDefinition {
    /// 参数名，在描述与表达式中以 {name} 出现
    pub name: Option<String>,
    /// 向用户询问时显示的文字
    pub prompt: Option<String>,
    /// number / expression / choice / text
    pub param_type: Option<String>,
    /// choice 类型的可选值
    pub options: Option<Vec<serde_json::Value>>,
    pub default_value: Option<serde_json::Value>,
    pub suggested_values: Option<Vec<serde_json::Value>>,
}

/// 候选的原始回复
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawCandidate {
    /// 对变换的简短描述，只包含一个基本操作
    pub description: Option<String>,
    /// 变换后的表达式（LaTeX）
    pub expression: Option<String>,
    /// 该变换在数学上是否正确
    pub correctness: Option<bool>,
    /// good / neutral / bad
    #[serde(alias = "usefullness")]
    pub usefulness: Option<String>,
    /// 操作类型标签，如 subtract、divide、expand
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// 需要用户填写的参数；描述与表达式中用 {name} 占位
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_definitions: Option<Vec<RawParameterDefinition>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VerifyResponse {
    /// 结果是否由原式经过所述变换正确得到
    pub correct: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssessResponse {
    /// good / neutral / poor
    pub assessment: Option<String>,
    /// 0.0 ~ 1.0
    pub confidence: Option<f64>,
    pub recommend_rollback: Option<bool>,
    /// 建议回退到的步骤序号（当前路径上）
    pub recommended_step: Option<u32>,
    pub reason: Option<String>,
    pub suggestion_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CheckResponse {
    pub is_solved: Option<bool>,
    /// 0.0 ~ 1.0
    pub confidence: Option<f64>,
    pub explanation: Option<String>,
    /// exact / approximate / partial / unknown
    pub solution_type: Option<String>,
    pub next_steps: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApplyResponse {
    /// 变换后的表达式（LaTeX）
    pub result_expression: Option<String>,
    /// 该变换能否作用于当前表达式
    pub is_valid: Option<bool>,
    pub explanation: Option<String>,
    pub errors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawBranch {
    pub name: Option<String>,
    /// 该分支下的表达式
    pub expression: Option<String>,
    /// 分支成立的条件，如 x \geq 0
    pub condition: Option<String>,
    pub is_valid: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BranchResponse {
    pub requires_branching: Option<bool>,
    /// system / cases / alternatives / union / intersection
    pub solution_type: Option<String>,
    pub branches: Option<Vec<RawBranch>>,
    pub explanation: Option<String>,
}

/// 候选的实用度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Usefulness {
    Good,
    Neutral,
    Bad,
}

impl Usefulness {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "good" => Some(Usefulness::Good),
            "neutral" => Some(Usefulness::Neutral),
            "bad" => Some(Usefulness::Bad),
            _ => None,
        }
    }
}

/// 经协议校验后的候选变换
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub description: String,
    pub expression: String,
    /// 类型标签不在目录中（如 custom）时为 None，由描述分类决定
    pub kind: Option<OperationKind>,
    pub correct: bool,
    pub usefulness: Usefulness,
    /// 非空时须先填写参数才能提交
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Number,
    Expression,
    Choice,
    Text,
}

impl ParameterType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "number" => Some(ParameterType::Number),
            "expression" => Some(ParameterType::Expression),
            "choice" => Some(ParameterType::Choice),
            "text" => Some(ParameterType::Text),
            _ => None,
        }
    }
}

/// 候选参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub prompt: String,
    pub param_type: ParameterType,
    #[serde(default)]
    pub options: Vec<String>,
    pub default_value: Option<String>,
    #[serde(default)]
    pub suggested_values: Vec<String>,
}

/// Oracle 计算出的变换结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedResult {
    pub result: String,
    pub is_valid: bool,
    pub explanation: String,
    pub errors: Vec<String>,
}

/// 分支的组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchingType {
    System,
    Cases,
    Alternatives,
    Union,
    Intersection,
}

impl BranchingType {
    /// 未知标签按 alternatives 处理
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "system" => BranchingType::System,
            "cases" => BranchingType::Cases,
            "union" => BranchingType::Union,
            "intersection" => BranchingType::Intersection,
            _ => BranchingType::Alternatives,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub expression: String,
    pub condition: Option<String>,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchAnalysis {
    pub requires_branching: bool,
    pub solution_type: BranchingType,
    pub branches: Vec<Branch>,
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assessment {
    Good,
    Neutral,
    Poor,
}

impl Assessment {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "good" => Some(Assessment::Good),
            "neutral" => Some(Assessment::Neutral),
            "poor" | "bad" => Some(Assessment::Poor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressAssessment {
    pub assessment: Assessment,
    pub confidence: f64,
    pub recommend_rollback: bool,
    pub recommended_step: Option<u32>,
    pub reason: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolutionType {
    Exact,
    Approximate,
    Partial,
    Unknown,
}

/// 解是否已完成的判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionCheck {
    pub is_solved: bool,
    pub confidence: f64,
    pub explanation: String,
    pub solution_type: SolutionType,
    pub next_steps: Vec<String>,
}

fn required_text(value: Option<String>, field: &str) -> Result<String, String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(format!("missing or empty '{field}'")),
    }
}

fn checked_confidence(value: Option<f64>) -> Result<f64, String> {
    match value {
        Some(c) if c.is_finite() && (0.0..=1.0).contains(&c) => Ok(c),
        Some(c) => Err(format!("confidence {c} is outside [0, 1]")),
        None => Err("missing 'confidence'".to_string()),
    }
}

/// 参数值在 JSON 中可能是字符串或数字
fn value_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_texts(values: Option<Vec<serde_json::Value>>) -> Vec<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .filter_map(value_text)
        .collect()
}

fn is_parameter_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl RawParameterDefinition {
    pub fn normalize(self) -> Result<ParameterDefinition, String> {
        let name = required_text(self.name, "name")?;
        if !is_parameter_name(&name) {
            return Err(format!("invalid parameter name '{name}'"));
        }
        let prompt = required_text(self.prompt, "prompt")?;
        let tag = required_text(self.param_type, "param_type")?;
        let param_type =
            ParameterType::parse(&tag).ok_or_else(|| format!("unknown param_type '{tag}'"))?;
        let options = value_texts(self.options);
        if param_type == ParameterType::Choice && options.is_empty() {
            return Err(format!("choice parameter '{name}' has no options"));
        }
        Ok(ParameterDefinition {
            name,
            prompt,
            param_type,
            options,
            default_value: self.default_value.and_then(value_text),
            suggested_values: value_texts(self.suggested_values),
        })
    }
}

impl RawCandidate {
    pub fn normalize(self) -> Result<Candidate, String> {
        let description = required_text(self.description, "description")?;
        let expression = required_text(self.expression, "expression")?;
        let correct = self
            .correctness
            .ok_or_else(|| "missing 'correctness'".to_string())?;
        let usefulness = match self.usefulness {
            Some(tag) => Usefulness::parse(&tag).ok_or_else(|| format!("unknown usefulness '{tag}'"))?,
            None => Usefulness::Neutral,
        };
        let parameters = self
            .parameter_definitions
            .unwrap_or_default()
            .into_iter()
            .map(RawParameterDefinition::normalize)
            .collect::<Result<Vec<_>, _>>()?;
        let mut names: Vec<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(format!("parameter '{}' is defined twice", pair[0]));
        }
        Ok(Candidate {
            description,
            expression,
            kind: self.kind.as_deref().and_then(OperationKind::from_tag),
            correct,
            usefulness,
            parameters,
        })
    }
}

impl ApplyResponse {
    pub fn normalize(self) -> Result<AppliedResult, String> {
        let is_valid = self.is_valid.ok_or_else(|| "missing 'is_valid'".to_string())?;
        let result = if is_valid {
            required_text(self.result_expression, "result_expression")?
        } else {
            self.result_expression.unwrap_or_default().trim().to_string()
        };
        Ok(AppliedResult {
            result,
            is_valid,
            explanation: self.explanation.unwrap_or_default(),
            errors: self.errors.unwrap_or_default(),
        })
    }
}

impl BranchResponse {
    pub fn normalize(self) -> Result<BranchAnalysis, String> {
        let requires_branching = self
            .requires_branching
            .ok_or_else(|| "missing 'requires_branching'".to_string())?;
        let branches = self
            .branches
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let is_valid = raw.is_valid.unwrap_or(true);
                let expression = if is_valid {
                    required_text(raw.expression, "expression")
                        .map_err(|e| format!("branch {i}: {e}"))?
                } else {
                    raw.expression.unwrap_or_default()
                };
                Ok(Branch {
                    name: raw
                        .name
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| format!("Branch {}", i + 1)),
                    expression,
                    condition: raw.condition.filter(|c| !c.trim().is_empty()),
                    is_valid,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;
        if requires_branching && branches.iter().filter(|b| b.is_valid).count() < 2 {
            return Err("branching requires at least two valid branches".to_string());
        }
        Ok(BranchAnalysis {
            requires_branching,
            solution_type: self
                .solution_type
                .as_deref()
                .map(BranchingType::parse)
                .unwrap_or(BranchingType::Alternatives),
            branches,
            explanation: self.explanation.unwrap_or_default(),
        })
    }
}

impl AssessResponse {
    pub fn normalize(self) -> Result<ProgressAssessment, String> {
        let tag = self
            .assessment
            .ok_or_else(|| "missing 'assessment'".to_string())?;
        let assessment =
            Assessment::parse(&tag).ok_or_else(|| format!("unknown assessment '{tag}'"))?;
        Ok(ProgressAssessment {
            assessment,
            confidence: checked_confidence(self.confidence)?,
            recommend_rollback: self.recommend_rollback.unwrap_or(false),
            recommended_step: self.recommended_step,
            reason: self.reason.unwrap_or_default(),
            suggestion: self.suggestion_message.filter(|s| !s.trim().is_empty()),
        })
    }
}

impl CheckResponse {
    pub fn normalize(self) -> Result<SolutionCheck, String> {
        let is_solved = self.is_solved.ok_or_else(|| "missing 'is_solved'".to_string())?;
        let solution_type = match self.solution_type.as_deref().map(str::to_ascii_lowercase) {
            None => SolutionType::Unknown,
            Some(tag) => match tag.as_str() {
                "exact" => SolutionType::Exact,
                "approximate" => SolutionType::Approximate,
                "partial" => SolutionType::Partial,
                "unknown" => SolutionType::Unknown,
                _ => return Err(format!("unknown solution_type '{tag}'")),
            },
        };
        Ok(SolutionCheck {
            is_solved,
            confidence: checked_confidence(self.confidence)?,
            explanation: self.explanation.unwrap_or_default(),
            solution_type,
            next_steps: self.next_steps.unwrap_or_default(),
        })
    }
}
