//! 基于 LLM 的 Oracle
//!
//! 提示词 = 角色说明 + 请求 JSON + 期望回复的 JSON Schema。回复中可能夹带说明文字或 ```json 代码块，
//! 先提取 JSON 片段，再修复未转义的 LaTeX 反斜杠（模型常写出 "\frac" 而不是 "\\frac"），最后反序列化。

use std::sync::Arc;

use schemars::schema_for;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message};

use super::protocol::{
    ApplyRequest, ApplyResponse, AssessRequest, AssessResponse, BranchRequest, BranchResponse,
    CheckRequest, CheckResponse, ProposeRequest, RawCandidate, VerifyRequest, VerifyResponse,
};
use super::traits::{Oracle, OracleError};

const SYSTEM_PROMPT: &str = "You are a careful mathematics tutor helping a student solve a problem \
one elementary transformation at a time. Write all mathematics in LaTeX. \
Reply with a single JSON document that matches the schema you are given and nothing else.";

const PROPOSE_INSTRUCTIONS: &str = "Propose exactly `count` different next transformations of `expression`. \
Each transformation must perform exactly ONE elementary operation (add, subtract, multiply, divide, power, root, \
move_term, factor, expand, collect_terms, simplify, apply_identity, substitute, split_cases) and must not \
simplify anything else in the same step. Exactly one of them must be mathematically correct \
(correctness = true); the others must contain plausible mistakes. Rate each as good, neutral or bad \
for progress towards the solution. `history_window` lists the most recent steps, oldest first. \
When a transformation needs a value chosen by the student (a factor, a substitution, a case), write it as \
`{name}` in the description and expression and describe it in parameter_definitions \
(param_type number, expression, choice or text; choice needs options).";

const VERIFY_INSTRUCTIONS: &str = "Decide whether `proposed_result` is obtained from `original_expression` \
by correctly applying exactly the transformation in `transformation_description`.";

const ASSESS_INSTRUCTIONS: &str = "Assess whether the steps are making progress towards solving `problem`. \
Use assessment good, neutral or poor and a confidence between 0 and 1. If an earlier step was a better \
starting point, set recommend_rollback and put its `index` in recommended_step.";

const APPLY_INSTRUCTIONS: &str = "Apply exactly the transformation in `transformation_description` to \
`expression` and nothing more. Put the result in result_expression. If the transformation cannot be \
applied to this expression, set is_valid to false and list the reasons in errors.";

const BRANCH_INSTRUCTIONS: &str = "Decide whether solving `expression` requires splitting into several \
branches (cases of a sign or absolute value, alternatives, a system, a union or intersection of solution \
sets). If it does, set requires_branching, choose solution_type (system, cases, alternatives, union or \
intersection) and give every branch a name, its expression and the condition under which it holds.";

const CHECK_INSTRUCTIONS: &str = "Decide whether `expression` is a complete solution of `problem`. \
Use solution_type exact, approximate, partial or unknown and list the next steps if it is not solved.";

/// 候选回复既可能是数组，也可能包在 {"transformations": [...]} 里
#[derive(Deserialize)]
#[serde(untagged)]
enum ProposeReply {
    List(Vec<RawCandidate>),
    Wrapped { transformations: Vec<RawCandidate> },
}

pub struct LlmOracle {
    llm: Arc<dyn LlmClient>,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    async fn ask<Req, Reply>(&self, instructions: &str, request: &Req) -> Result<Reply, OracleError>
    where
        Req: Serialize + Sync,
        Reply: DeserializeOwned + schemars::JsonSchema,
    {
        let payload = serde_json::to_string_pretty(request)
            .map_err(|e| OracleError::Malformed(format!("cannot encode request: {e}")))?;
        let schema = serde_json::to_string_pretty(&schema_for!(Reply)).unwrap_or_default();
        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(format!(
                "{instructions}\n\nRequest:\n{payload}\n\nReply schema:\n{schema}"
            )),
        ];

        let reply = self.llm.complete(&messages).await.map_err(|e| match e {
            LlmError::Api(msg) => OracleError::Transport(msg),
            other => OracleError::Malformed(other.to_string()),
        })?;
        tracing::debug!("LLM oracle reply: {}", reply);
        parse_reply(&reply)
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn propose(&self, request: &ProposeRequest) -> Result<Vec<RawCandidate>, OracleError> {
        let reply: ProposeReplySchema = self.ask(PROPOSE_INSTRUCTIONS, request).await?;
        Ok(match reply.0 {
            ProposeReply::List(list) => list,
            ProposeReply::Wrapped { transformations } => transformations,
        })
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, OracleError> {
        self.ask(VERIFY_INSTRUCTIONS, request).await
    }

    async fn assess(&self, request: &AssessRequest) -> Result<AssessResponse, OracleError> {
        self.ask(ASSESS_INSTRUCTIONS, request).await
    }

    async fn check(&self, request: &CheckRequest) -> Result<CheckResponse, OracleError> {
        self.ask(CHECK_INSTRUCTIONS, request).await
    }

    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyResponse, OracleError> {
        self.ask(APPLY_INSTRUCTIONS, request).await
    }

    async fn branch(&self, request: &BranchRequest) -> Result<BranchResponse, OracleError> {
        self.ask(BRANCH_INSTRUCTIONS, request).await
    }

    fn name(&self) -> &str {
        "llm"
    }
}

/// 对外的 schema 只描述数组形态；反序列化时两种形态都接受
struct ProposeReplySchema(ProposeReply);

impl<'de> Deserialize<'de> for ProposeReplySchema {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ProposeReply::deserialize(deserializer).map(ProposeReplySchema)
    }
}

impl schemars::JsonSchema for ProposeReplySchema {
    fn schema_name() -> String {
        "Candidates".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        <Vec<RawCandidate>>::json_schema(gen)
    }
}

/// 从回复中取出 JSON 片段：优先 ```json 代码块，否则取最早的 `{` / `[` 到与之对应的最后一个闭括号
pub fn extract_json_block(reply: &str) -> Option<&str> {
    let trimmed = reply.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find(['{', '['])?;
    let close = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    let end = trimmed.rfind(close)?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 以 b f n r t 开头、同时也是常见 LaTeX 命令的单词；其余字母开头的 `\word` 在 JSON 中本就非法
const LATEX_COMMANDS_ON_JSON_ESCAPES: [&str; 24] = [
    "frac", "forall", "times", "text", "tan", "theta", "tau", "tfrac", "to", "tilde", "neq", "ne",
    "nabla", "nu", "neg", "not", "right", "rho", "rangle", "beta", "binom", "bar", "big", "boxed",
];

/// 把未转义的 LaTeX 反斜杠补成 `\\`
///
/// 已转义的 `\\`、合法的 JSON 转义（`\"`、`\n`、`é` 等）保持不变。
pub fn repair_latex_escapes(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '\\' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let next = chars.get(i + 1).copied();
        let word: String = chars[i + 1..]
            .iter()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();

        let keep = match next {
            Some('\\') => {
                out.push_str("\\\\");
                i += 2;
                continue;
            }
            Some('"') | Some('/') => true,
            Some('u') => chars
                .get(i + 2..i + 6)
                .map(|hex| hex.iter().all(|c| c.is_ascii_hexdigit()))
                .unwrap_or(false),
            Some('b') | Some('f') | Some('n') | Some('r') | Some('t') => {
                !LATEX_COMMANDS_ON_JSON_ESCAPES
                    .iter()
                    .any(|cmd| word.starts_with(cmd) && (word.len() == cmd.len() || !cmd.starts_with('n')))
            }
            _ => false,
        };

        if keep {
            out.push('\\');
        } else {
            out.push_str("\\\\");
        }
        i += 1;
    }
    out
}

fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T, OracleError> {
    let block = extract_json_block(reply)
        .ok_or_else(|| OracleError::Malformed(format!("no JSON found in reply: {reply}")))?;
    let repaired = repair_latex_escapes(block);
    serde_json::from_str(&repaired)
        .map_err(|e| OracleError::Malformed(format!("{e}: {block}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::oracle::protocol::PROTOCOL_VERSION;

    #[test]
    fn test_extract_json_block() {
        let reply = "Here you go:\n```json\n{\"correct\": true}\n```\nDone.";
        assert_eq!(extract_json_block(reply), Some("{\"correct\": true}"));

        let reply = "Sure! [{\"a\": 1}, {\"a\": 2}] hope it helps";
        assert_eq!(extract_json_block(reply), Some("[{\"a\": 1}, {\"a\": 2}]"));

        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn test_repair_latex_escapes() {
        let raw = r#"{"expression": "\frac{x}{2} \cdot 3 \neq \sqrt{y}", "note": "line\nbreak \"q\""}"#;
        let fixed = repair_latex_escapes(raw);
        let value: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value["expression"], r"\frac{x}{2} \cdot 3 \neq \sqrt{y}");
        assert_eq!(value["note"], "line\nbreak \"q\"");
    }

    #[test]
    fn test_repair_keeps_escaped_backslashes() {
        let raw = r#"{"e": "\\times 2 é"}"#;
        let value: serde_json::Value = serde_json::from_str(&repair_latex_escapes(raw)).unwrap();
        assert_eq!(value["e"], "\\times 2 é");
    }

    #[tokio::test]
    async fn test_propose_accepts_wrapped_reply() {
        let reply = r#"{"transformations": [{"description": "Subtract 4 from both sides",
            "expression": "2x = 6", "correctness": true, "usefulness": "good", "type": "subtract"}]}"#;
        let llm = Arc::new(MockLlmClient::new().with_reply(reply));
        let oracle = LlmOracle::new(llm.clone());
        let request = ProposeRequest {
            version: PROTOCOL_VERSION,
            expression: "2x + 4 = 10".into(),
            history_window: vec![],
            count: 1,
        };
        let candidates = oracle.propose(&request).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].expression.as_deref(), Some("2x = 6"));

        let sent = llm.received();
        assert!(sent[0][1].content.contains("2x + 4 = 10"));
    }

    #[tokio::test]
    async fn test_verify_with_latex_in_reply() {
        let llm = Arc::new(MockLlmClient::new().with_reply("```json\n{\"correct\": false}\n```"));
        let oracle = LlmOracle::new(llm);
        let request = VerifyRequest {
            version: PROTOCOL_VERSION,
            original_expression: r"\frac{x}{2} = 3".into(),
            transformation_description: "Multiply both sides by 2".into(),
            proposed_result: "x = 5".into(),
        };
        assert!(!oracle.verify(&request).await.unwrap().correct);
    }

    #[tokio::test]
    async fn test_apply_and_branch_prompts() {
        let llm = Arc::new(
            MockLlmClient::new()
                .with_reply(r#"{"result_expression": "x = \frac{6}{2}", "is_valid": true}"#)
                .with_reply(
                    r#"{"requires_branching": true, "solution_type": "cases", "branches": [
                        {"name": "x >= 0", "expression": "x = 2", "condition": "x \geq 0"},
                        {"name": "x < 0", "expression": "-x = 2", "condition": "x < 0"}]}"#,
                ),
        );
        let oracle = LlmOracle::new(llm.clone());
        let applied = oracle
            .apply(&ApplyRequest {
                version: PROTOCOL_VERSION,
                expression: "2x = 6".into(),
                transformation_description: "Divide both sides by 2".into(),
                transformation_kind: Some("divide".into()),
            })
            .await
            .unwrap();
        assert_eq!(applied.result_expression.as_deref(), Some(r"x = \frac{6}{2}"));

        let branching = oracle
            .branch(&BranchRequest {
                version: PROTOCOL_VERSION,
                expression: "|x| = 2".into(),
            })
            .await
            .unwrap();
        assert_eq!(branching.branches.map(|b| b.len()), Some(2));

        let sent = llm.received();
        assert!(sent[0][1].content.contains("result_expression"));
        assert!(sent[1][1].content.contains("requires_branching"));
    }

    #[tokio::test]
    async fn test_llm_errors_map_to_oracle_errors() {
        let llm = Arc::new(
            MockLlmClient::new()
                .with_error(LlmError::Api("503".into()))
                .with_reply("I cannot answer that"),
        );
        let oracle = LlmOracle::new(llm);
        let request = CheckRequest {
            version: PROTOCOL_VERSION,
            problem: "x + 1 = 2".into(),
            expression: "x = 1".into(),
        };
        assert!(matches!(oracle.check(&request).await, Err(OracleError::Transport(_))));
        assert!(matches!(oracle.check(&request).await, Err(OracleError::Malformed(_))));
    }
}
