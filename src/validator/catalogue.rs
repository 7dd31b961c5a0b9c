//! 基本操作目录
//!
//! 封闭的操作白名单，以及从自然语言描述中识别操作的规则。描述按连接词（and / then / 逗号等）切成子句，
//! 每个子句取最靠前的操作关键词；出现两个以上带操作的子句即视为链式变换。

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 允许的基本操作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// 两边同加
    Add,
    /// 两边同减
    Subtract,
    /// 两边同乘
    Multiply,
    /// 两边同除
    Divide,
    /// 两边同时乘方
    Power,
    /// 两边同时开方
    Root,
    /// 移项
    MoveTerm,
    Factor,
    Expand,
    CollectTerms,
    Simplify,
    /// 使用具名恒等式 / 公式
    ApplyIdentity,
    Substitute,
    /// 分情况讨论
    SplitCases,
}

/// 结构检查时按族处理
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationFamily {
    /// L' - L ≡ R' - R
    Additive,
    /// L' / L ≡ R' / R
    Multiplicative,
    Power,
    Root,
    /// 每一边是同一个函数
    Rewrite,
    /// 无法用数值检查（代换、分情况）
    Opaque,
}

impl OperationKind {
    pub const ALL: [OperationKind; 14] = [
        OperationKind::Add,
        OperationKind::Subtract,
        OperationKind::Multiply,
        OperationKind::Divide,
        OperationKind::Power,
        OperationKind::Root,
        OperationKind::MoveTerm,
        OperationKind::Factor,
        OperationKind::Expand,
        OperationKind::CollectTerms,
        OperationKind::Simplify,
        OperationKind::ApplyIdentity,
        OperationKind::Substitute,
        OperationKind::SplitCases,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Subtract => "subtract",
            OperationKind::Multiply => "multiply",
            OperationKind::Divide => "divide",
            OperationKind::Power => "power",
            OperationKind::Root => "root",
            OperationKind::MoveTerm => "move_term",
            OperationKind::Factor => "factor",
            OperationKind::Expand => "expand",
            OperationKind::CollectTerms => "collect_terms",
            OperationKind::Simplify => "simplify",
            OperationKind::ApplyIdentity => "apply_identity",
            OperationKind::Substitute => "substitute",
            OperationKind::SplitCases => "split_cases",
        }
    }

    /// 解析 Oracle 返回的 type 标签；未知标签（包括 custom）返回 None
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase();
        match tag.as_str() {
            "expand_cases" | "cases" => return Some(OperationKind::SplitCases),
            "identity" => return Some(OperationKind::ApplyIdentity),
            "move" | "transpose" => return Some(OperationKind::MoveTerm),
            "square" => return Some(OperationKind::Power),
            "sqrt" => return Some(OperationKind::Root),
            _ => {}
        }
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }

    pub fn family(&self) -> OperationFamily {
        match self {
            OperationKind::Add | OperationKind::Subtract | OperationKind::MoveTerm => {
                OperationFamily::Additive
            }
            OperationKind::Multiply | OperationKind::Divide => OperationFamily::Multiplicative,
            OperationKind::Power => OperationFamily::Power,
            OperationKind::Root => OperationFamily::Root,
            OperationKind::Factor
            | OperationKind::CollectTerms
            | OperationKind::Expand
            | OperationKind::Simplify
            | OperationKind::ApplyIdentity => OperationFamily::Rewrite,
            OperationKind::Substitute | OperationKind::SplitCases => OperationFamily::Opaque,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 描述的分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Single(OperationKind),
    Chained(Vec<OperationKind>),
    Unknown,
}

struct Catalogue {
    clause_splitter: Regex,
    patterns: Vec<(OperationKind, Regex)>,
}

fn catalogue() -> &'static Catalogue {
    static CATALOGUE: OnceLock<Catalogue> = OnceLock::new();
    CATALOGUE.get_or_init(|| {
        let rules: [(OperationKind, &str); 14] = [
            (OperationKind::Add, r"\b(add|adds|adding)\b|прибав\w*"),
            (
                OperationKind::Subtract,
                r"\b(subtract|subtracts|subtracting|minus)\b|\btake away\b|вычит\w*|вычест\w*|вычт\w*",
            ),
            (
                OperationKind::Multiply,
                r"\b(multiply|multiplies|multiplying)\b|умнож\w*",
            ),
            (
                OperationKind::Divide,
                r"\b(divide|divides|dividing)\b|раздел\w*|подел\w*",
            ),
            (
                OperationKind::Power,
                r"\b(square|squaring|cube|cubing|raise|raising)\b|возве\w*",
            ),
            (
                OperationKind::Root,
                r"\b(square|cube)\s+root\b|\broots?\b|\bsqrt\b|корень\w*|корн\w*",
            ),
            (
                OperationKind::MoveTerm,
                r"\b(move|moves|moving|transpose|transposing|bring)\b|перен\w*",
            ),
            (
                OperationKind::Factor,
                r"\b(factor|factorise|factorize|factoring|factorising|factorizing)\b|разлож\w*|вынес\w*",
            ),
            (
                OperationKind::Expand,
                r"\b(expand|expands|expanding|distribute|distributing)\b|\b(open|remove)\s+(the\s+)?(brackets|parentheses)\b|раскр\w*",
            ),
            (
                OperationKind::CollectTerms,
                r"\b(collect|collecting|combine|combining)\b|\blike terms\b|подобн\w*|привед\w*",
            ),
            (
                OperationKind::Simplify,
                r"\b(simplify|simplifies|simplifying|cancel|cancelling|reduce|evaluate|compute|calculate)\b|упрост\w*|сократ\w*",
            ),
            (
                OperationKind::ApplyIdentity,
                r"\b(identity|identities|formula)\b|формул\w*|тождеств\w*",
            ),
            (
                OperationKind::Substitute,
                r"\b(substitute|substituting|substitution|replace|replacing|plug)\b|подстав\w*|замен\w*",
            ),
            (
                OperationKind::SplitCases,
                r"\b(cases?|split)\b|случа\w*",
            ),
        ];

        let patterns = rules
            .into_iter()
            .map(|(kind, pattern)| {
                let re = Regex::new(&format!("(?i){pattern}")).expect("catalogue pattern is valid");
                (kind, re)
            })
            .collect();

        Catalogue {
            clause_splitter: Regex::new(
                r"(?i)[,;]|\band\s+then\b|\bthen\b|\band\b|\bafter\s+that\b|\bи\b|\bзатем\b|\bпотом\b",
            )
            .expect("clause splitter is valid"),
            patterns,
        }
    })
}

/// 子句中最靠前的操作；同一位置取匹配更长者（square root 优先于 square）
fn classify_clause(clause: &str) -> Option<OperationKind> {
    catalogue()
        .patterns
        .iter()
        .filter_map(|(kind, re)| re.find(clause).map(|m| (m.start(), m.len(), *kind)))
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
        .map(|(_, _, kind)| kind)
}

/// 按目录识别描述中声明的操作
pub fn classify(description: &str) -> Classification {
    let kinds: Vec<OperationKind> = catalogue()
        .clause_splitter
        .split(description)
        .filter_map(classify_clause)
        .collect();

    match kinds.len() {
        0 => Classification::Unknown,
        1 => Classification::Single(kinds[0]),
        _ => Classification::Chained(kinds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_single_operations() {
        assert_eq!(
            classify("Subtract 4 from both sides"),
            Classification::Single(OperationKind::Subtract)
        );
        assert_eq!(
            classify("Divide both sides by the common factor 2"),
            Classification::Single(OperationKind::Divide)
        );
        assert_eq!(
            classify("Square both sides"),
            Classification::Single(OperationKind::Power)
        );
        assert_eq!(
            classify("Take the square root of both sides"),
            Classification::Single(OperationKind::Root)
        );
        assert_eq!(
            classify("Раскрыть скобки в левой части"),
            Classification::Single(OperationKind::Expand)
        );
    }

    #[test]
    fn test_classify_chained() {
        match classify("Add 4 to both sides and divide by 2") {
            Classification::Chained(kinds) => {
                assert_eq!(kinds, vec![OperationKind::Add, OperationKind::Divide])
            }
            other => panic!("Expected Chained, got {:?}", other),
        }
        assert!(matches!(
            classify("Expand, then collect like terms"),
            Classification::Chained(_)
        ));
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify("Do some magic"), Classification::Unknown);
        assert_eq!(classify(""), Classification::Unknown);
    }

    #[test]
    fn test_from_tag() {
        assert_eq!(OperationKind::from_tag("collect_terms"), Some(OperationKind::CollectTerms));
        assert_eq!(OperationKind::from_tag("expand_cases"), Some(OperationKind::SplitCases));
        assert_eq!(OperationKind::from_tag("custom"), None);
    }
}
