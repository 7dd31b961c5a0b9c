//! 表达式解析与数值求值
//!
//! 支持 LaTeX 子集：数字、单字母变量、`+ - * / ^`、隐式乘法、`\frac`、`\sqrt`、`\cdot`、`\times`、`\div`、
//! `\left`/`\right`、常见函数与关系符号。遇到不支持的写法返回 ParseError，由调用方视为「无法判定」。

use std::collections::{BTreeSet, HashMap};
use std::f64::consts::PI;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unsupported syntax: {0}")]
    Unsupported(String),
    #[error("unexpected token at {0}")]
    Unexpected(usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relation {
    /// 两边同乘负数后的关系
    pub fn flipped(self) -> Self {
        match self {
            Relation::Lt => Relation::Gt,
            Relation::Le => Relation::Ge,
            Relation::Gt => Relation::Lt,
            Relation::Ge => Relation::Le,
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Ln,
    Log,
    Exp,
    Sqrt,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(Func::Sin),
            "cos" => Some(Func::Cos),
            "tan" => Some(Func::Tan),
            "ln" => Some(Func::Ln),
            "log" => Some(Func::Log),
            "exp" => Some(Func::Exp),
            _ => None,
        }
    }

    fn apply(self, x: f64) -> f64 {
        match self {
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tan => x.tan(),
            Func::Ln => x.ln(),
            Func::Log => x.log10(),
            Func::Exp => x.exp(),
            Func::Sqrt => x.sqrt(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

impl Expr {
    /// 在给定变量取值下求值；未绑定变量得到 NaN
    pub fn eval(&self, vars: &HashMap<String, f64>) -> f64 {
        match self {
            Expr::Num(n) => *n,
            Expr::Var(name) => vars.get(name).copied().unwrap_or(f64::NAN),
            Expr::Neg(e) => -e.eval(vars),
            Expr::Add(a, b) => a.eval(vars) + b.eval(vars),
            Expr::Sub(a, b) => a.eval(vars) - b.eval(vars),
            Expr::Mul(a, b) => a.eval(vars) * b.eval(vars),
            Expr::Div(a, b) => a.eval(vars) / b.eval(vars),
            Expr::Pow(a, b) => a.eval(vars).powf(b.eval(vars)),
            Expr::Call(f, e) => f.apply(e.eval(vars)),
        }
    }

    /// 节点数，作为表达式复杂度
    pub fn size(&self) -> usize {
        match self {
            Expr::Num(_) | Expr::Var(_) => 1,
            Expr::Neg(e) | Expr::Call(_, e) => 1 + e.size(),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Pow(a, b) => 1 + a.size() + b.size(),
        }
    }

    /// 按加减号拆成带符号的项：a - (b + c) 得到 [a, -b, -c]
    pub fn terms(&self) -> Vec<Expr> {
        let mut out = Vec::new();
        self.push_terms(false, &mut out);
        out
    }

    fn push_terms(&self, negate: bool, out: &mut Vec<Expr>) {
        match self {
            Expr::Add(a, b) => {
                a.push_terms(negate, out);
                b.push_terms(negate, out);
            }
            Expr::Sub(a, b) => {
                a.push_terms(negate, out);
                b.push_terms(!negate, out);
            }
            Expr::Neg(e) => e.push_terms(!negate, out),
            term if negate => out.push(Expr::Neg(Box::new(term.clone()))),
            term => out.push(term.clone()),
        }
    }

    /// 各项之和；空切片返回 None
    pub fn sum(terms: &[Expr]) -> Option<Expr> {
        terms
            .iter()
            .cloned()
            .reduce(|acc, term| Expr::Add(Box::new(acc), Box::new(term)))
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Num(_) => {}
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Neg(e) | Expr::Call(_, e) => e.collect_vars(out),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Pow(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }
}

/// 解析后的语句：单个表达式，或「左边 关系 右边」
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub lhs: Expr,
    pub relation: Option<(Relation, Expr)>,
}

impl Statement {
    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        self.lhs.collect_vars(&mut vars);
        if let Some((_, rhs)) = &self.relation {
            rhs.collect_vars(&mut vars);
        }
        vars
    }

    pub fn size(&self) -> usize {
        self.lhs.size() + self.relation.as_ref().map_or(0, |(_, rhs)| 1 + rhs.size())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64),
    Var(String),
    Func(Func),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Open(char),
    Close(char),
    Frac,
    Sqrt,
    Rel(Relation),
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '$' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ParseError::Unsupported(text.clone()))?;
                tokens.push(Token::Num(value));
            }
            'a'..='z' | 'A'..='Z' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if let Some(f) = Func::from_name(&word) {
                    tokens.push(Token::Func(f));
                } else {
                    // 多字母视为单字母变量的乘积（2xy = 2·x·y）
                    tokens.extend(word.chars().map(|ch| Token::Var(ch.to_string())));
                }
            }
            '\\' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let command: String = chars[start..i].iter().collect();
                if command.is_empty() {
                    // \, \; \! 等间距命令
                    if i < chars.len() && matches!(chars[i], ',' | ';' | '!' | ' ' | ':') {
                        i += 1;
                        continue;
                    }
                    return Err(ParseError::Unsupported("\\".to_string()));
                }
                match command.as_str() {
                    "frac" | "dfrac" | "tfrac" => tokens.push(Token::Frac),
                    "sqrt" => tokens.push(Token::Sqrt),
                    "cdot" | "times" | "ast" => tokens.push(Token::Star),
                    "div" => tokens.push(Token::Slash),
                    "left" | "right" => {}
                    "pi" => tokens.push(Token::Num(PI)),
                    "le" | "leq" | "leqslant" => tokens.push(Token::Rel(Relation::Le)),
                    "ge" | "geq" | "geqslant" => tokens.push(Token::Rel(Relation::Ge)),
                    "ne" | "neq" => tokens.push(Token::Rel(Relation::Ne)),
                    "lt" => tokens.push(Token::Rel(Relation::Lt)),
                    "gt" => tokens.push(Token::Rel(Relation::Gt)),
                    other => match Func::from_name(other) {
                        Some(f) => tokens.push(Token::Func(f)),
                        None => return Err(ParseError::Unsupported(format!("\\{other}"))),
                    },
                }
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' | '−' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' | '·' | '×' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' | '÷' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '²' | '³' => {
                tokens.push(Token::Caret);
                tokens.push(Token::Num(if c == '²' { 2.0 } else { 3.0 }));
                i += 1;
            }
            '(' | '{' | '[' => {
                tokens.push(Token::Open(c));
                i += 1;
            }
            ')' | '}' | ']' => {
                tokens.push(Token::Close(c));
                i += 1;
            }
            '=' => {
                tokens.push(Token::Rel(Relation::Eq));
                i += 1;
            }
            '<' | '>' => {
                let or_equal = chars.get(i + 1) == Some(&'=');
                let rel = match (c, or_equal) {
                    ('<', true) => Relation::Le,
                    ('<', false) => Relation::Lt,
                    (_, true) => Relation::Ge,
                    (_, false) => Relation::Gt,
                };
                tokens.push(Token::Rel(rel));
                i += if or_equal { 2 } else { 1 };
            }
            '≤' => {
                tokens.push(Token::Rel(Relation::Le));
                i += 1;
            }
            '≥' => {
                tokens.push(Token::Rel(Relation::Ge));
                i += 1;
            }
            '≠' => {
                tokens.push(Token::Rel(Relation::Ne));
                i += 1;
            }
            other => return Err(ParseError::Unsupported(other.to_string())),
        }
    }

    Ok(tokens)
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '{' => '}',
        _ => ']',
    }
}

/// 括号、一元负号、乘方的最大嵌套层数
const MAX_DEPTH: usize = 256;
/// 单条语句的最大记号数；左结合的长和式同样会形成很深的语法树
const MAX_TOKENS: usize = 1024;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, ParseError>) -> Result<T, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::Unsupported(format!("nesting deeper than {MAX_DEPTH}")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect_close(&mut self, open: char) -> Result<(), ParseError> {
        match self.next() {
            Some(Token::Close(c)) if c == closing_for(open) => Ok(()),
            Some(_) => Err(ParseError::Unexpected(self.pos - 1)),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn starts_primary(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Num(_))
                | Some(Token::Var(_))
                | Some(Token::Func(_))
                | Some(Token::Open(_))
                | Some(Token::Frac)
                | Some(Token::Sqrt)
        )
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        let lhs = self.expr()?;
        let relation = match self.peek() {
            Some(Token::Rel(rel)) => {
                let rel = *rel;
                self.pos += 1;
                Some((rel, self.expr()?))
            }
            _ => None,
        };
        match self.peek() {
            None => Ok(Statement { lhs, relation }),
            // 连续不等式、方程组等不在支持范围内
            Some(Token::Rel(_)) => Err(ParseError::Unsupported("chained relation".to_string())),
            Some(_) => Err(ParseError::Unexpected(self.pos)),
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::sum)
    }

    fn sum(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    left = Expr::Add(Box::new(left), Box::new(self.term()?));
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    left = Expr::Sub(Box::new(left), Box::new(self.term()?));
                }
                _ => return Ok(left),
            }
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    left = Expr::Mul(Box::new(left), Box::new(self.unary()?));
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    left = Expr::Div(Box::new(left), Box::new(self.unary()?));
                }
                _ if self.starts_primary() => {
                    left = Expr::Mul(Box::new(left), Box::new(self.power()?));
                }
                _ => return Ok(left),
            }
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::signed)
    }

    fn signed(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::base_and_exponent)
    }

    fn base_and_exponent(&mut self) -> Result<Expr, ParseError> {
        let base = self.primary()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.pos += 1;
            let exponent = self.exponent()?;
            return Ok(Expr::Pow(Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn exponent(&mut self) -> Result<Expr, ParseError> {
        self.nested(|p| {
            if matches!(p.peek(), Some(Token::Minus)) {
                p.pos += 1;
                return Ok(Expr::Neg(Box::new(p.exponent()?)));
            }
            p.power()
        })
    }

    /// \frac 与 \sqrt 的参数：花括号分组或单个原子
    fn group(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Open('{')) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect_close('{')?;
                Ok(inner)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Var(v)) => Ok(Expr::Var(v)),
            Some(Token::Open(open)) => {
                let inner = self.expr()?;
                self.expect_close(open)?;
                Ok(inner)
            }
            Some(Token::Frac) => {
                let num = self.group()?;
                let den = self.group()?;
                Ok(Expr::Div(Box::new(num), Box::new(den)))
            }
            Some(Token::Sqrt) => {
                if matches!(self.peek(), Some(Token::Open('['))) {
                    self.pos += 1;
                    let index = self.expr()?;
                    self.expect_close('[')?;
                    let radicand = self.group()?;
                    let inv = Expr::Div(Box::new(Expr::Num(1.0)), Box::new(index));
                    return Ok(Expr::Pow(Box::new(radicand), Box::new(inv)));
                }
                Ok(Expr::Call(Func::Sqrt, Box::new(self.group()?)))
            }
            Some(Token::Func(f)) => {
                // \sin^2 x = (\sin x)^2
                let exponent = if matches!(self.peek(), Some(Token::Caret)) {
                    self.pos += 1;
                    Some(self.exponent()?)
                } else {
                    None
                };
                let mut arg = self.power()?;
                if !matches!(self.tokens.get(self.pos - 1), Some(Token::Close(_))) {
                    while self.starts_primary() && !matches!(self.peek(), Some(Token::Func(_))) {
                        arg = Expr::Mul(Box::new(arg), Box::new(self.power()?));
                    }
                }
                let call = Expr::Call(f, Box::new(arg));
                Ok(match exponent {
                    Some(e) => Expr::Pow(Box::new(call), Box::new(e)),
                    None => call,
                })
            }
            Some(_) => Err(ParseError::Unexpected(self.pos - 1)),
            None => Err(ParseError::UnexpectedEnd),
        }
    }
}

/// 解析一条语句（表达式或关系式）
pub fn parse_statement(input: &str) -> Result<Statement, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::UnexpectedEnd);
    }
    if tokens.len() > MAX_TOKENS {
        return Err(ParseError::Unsupported(format!(
            "expression longer than {MAX_TOKENS} tokens"
        )));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    parser.statement()
}

/// 表达式复杂度：能解析时取语法树节点数，否则退化为非空白字符数
pub fn complexity(input: &str) -> usize {
    parse_statement(input)
        .map(|s| s.size())
        .unwrap_or_else(|_| input.chars().filter(|c| !c.is_whitespace()).count())
}

const FUNCTION_NAMES: [&str; 6] = ["sin", "cos", "tan", "ln", "log", "exp"];

/// 从题目文本中提取基础表达式
///
/// 优先取 `$...$` / `$$...$$` 内的内容；否则取最后一个冒号之后的部分，并跳过开头的纯文字单词
/// （如 "Solve"、"Решите уравнение"）。结果需括号平衡、非空、不以运算符结尾。
pub fn extract_base_expression(problem: &str) -> Result<String, String> {
    let trimmed = problem.trim();
    if trimmed.is_empty() {
        return Err("problem statement is empty".to_string());
    }

    let candidate = if let Some(start) = trimmed.find('$') {
        let rest = trimmed[start..].trim_start_matches('$');
        let end = rest.find('$').unwrap_or(rest.len());
        rest[..end].to_string()
    } else {
        let tail = trimmed.rsplit(':').next().unwrap_or(trimmed);
        let words: Vec<&str> = tail.split_whitespace().collect();
        let skip = words
            .iter()
            .take_while(|w| {
                let w = w.trim_end_matches(|c: char| matches!(c, ',' | '.' | '?' | '!'));
                w.chars().count() >= 2
                    && w.chars().all(char::is_alphabetic)
                    && !FUNCTION_NAMES.contains(&w.to_ascii_lowercase().as_str())
            })
            .count();
        words[skip..].join(" ")
    };

    let expression = candidate
        .trim()
        .trim_end_matches(|c: char| c == '.' || c == '?' || c == '!')
        .trim()
        .to_string();

    if expression.is_empty() {
        return Err(format!("no mathematical expression found in '{trimmed}'"));
    }
    if !brackets_balanced(&expression) {
        return Err(format!("unbalanced brackets in '{expression}'"));
    }
    if !expression.chars().any(|c| c.is_alphanumeric()) {
        return Err(format!("no operands in '{expression}'"));
    }
    let dangling = ['+', '-', '*', '/', '^', '=', '<', '>'];
    if expression.ends_with(dangling) || expression.starts_with(['=', '<', '>', '*', '/', '^']) {
        return Err(format!("dangling operator in '{expression}'"));
    }
    Ok(expression)
}

fn brackets_balanced(text: &str) -> bool {
    let mut stack = Vec::new();
    for c in text.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => match stack.pop() {
                Some(open) if closing_for(open) == c => {}
                _ => return false,
            },
            _ => {}
        }
    }
    stack.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_at(input: &str, x: f64) -> f64 {
        let stmt = parse_statement(input).unwrap();
        let vars = HashMap::from([("x".to_string(), x)]);
        stmt.lhs.eval(&vars)
    }

    #[test]
    fn test_implicit_multiplication_and_powers() {
        assert!((eval_at("2x^2 + 3x", 2.0) - 14.0).abs() < 1e-9);
        assert!((eval_at("2(x + 1)", 3.0) - 8.0).abs() < 1e-9);
        assert!((eval_at("x^{-1}", 4.0) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_latex_commands() {
        assert!((eval_at(r"\frac{x}{2} \cdot 4", 3.0) - 6.0).abs() < 1e-9);
        assert!((eval_at(r"\sqrt{x} + \sqrt[3]{8}", 9.0) - 5.0).abs() < 1e-9);
        assert!((eval_at(r"\left(x + 1\right)^2", 1.0) - 4.0).abs() < 1e-9);
        assert!((eval_at(r"\sin^2 x + \cos^2 x", 0.7) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_relations() {
        let stmt = parse_statement("2x + 4 = 10").unwrap();
        assert!(matches!(stmt.relation, Some((Relation::Eq, _))));
        let stmt = parse_statement(r"x \leq 3").unwrap();
        assert!(matches!(stmt.relation, Some((Relation::Le, _))));
        assert!(parse_statement("1 < x < 2").is_err());
    }

    #[test]
    fn test_unsupported_syntax() {
        assert!(matches!(
            parse_statement(r"\int x dx"),
            Err(ParseError::Unsupported(_))
        ));
        assert!(parse_statement("x = ").is_err());
    }

    #[test]
    fn test_terms_follow_signs() {
        let s = parse_statement("2x - (y + 3) + -4").unwrap();
        let terms = s.lhs.terms();
        assert_eq!(terms.len(), 4);
        let point: HashMap<String, f64> = [("x".to_string(), 1.0), ("y".to_string(), 2.0)].into();
        let values: Vec<f64> = terms.iter().map(|t| t.eval(&point)).collect();
        assert_eq!(values, vec![2.0, -2.0, -3.0, -4.0]);
        assert_eq!(Expr::sum(&terms).map(|e| e.eval(&point)), Some(-7.0));
        assert_eq!(Expr::sum(&[]), None);
    }

    #[test]
    fn test_deep_nesting_is_unsupported() {
        let deep = format!("{}x{} = 1", "(".repeat(200), ")".repeat(200));
        assert!(matches!(parse_statement(&deep), Err(ParseError::Unsupported(_))));

        let huge = format!("{}x{} = 1", "(".repeat(200_000), ")".repeat(200_000));
        assert!(matches!(parse_statement(&huge), Err(ParseError::Unsupported(_))));

        let long_sum = vec!["x"; 2000].join(" + ");
        assert!(matches!(parse_statement(&long_sum), Err(ParseError::Unsupported(_))));

        let moderate = format!("{}x{} = 1", "(".repeat(20), ")".repeat(20));
        assert!(parse_statement(&moderate).is_ok());
    }

    #[test]
    fn test_complexity_decreases_when_simplified() {
        assert!(complexity("2x + 4 = 10") > complexity("x = 3"));
    }

    #[test]
    fn test_extract_base_expression() {
        assert_eq!(extract_base_expression("2x + 4 = 10").unwrap(), "2x + 4 = 10");
        assert_eq!(
            extract_base_expression("Solve the equation: 2(x + 1) = 4").unwrap(),
            "2(x + 1) = 4"
        );
        assert_eq!(
            extract_base_expression("Решите уравнение $2x + 3 = 7$").unwrap(),
            "2x + 3 = 7"
        );
        assert_eq!(
            extract_base_expression("Simplify 3x + 2y - 5").unwrap(),
            "3x + 2y - 5"
        );
        assert_eq!(extract_base_expression("sin x = 0").unwrap(), "sin x = 0");
    }

    #[test]
    fn test_extract_base_expression_rejects_malformed() {
        assert!(extract_base_expression("").is_err());
        assert!(extract_base_expression("Привет, как дела?").is_err());
        assert!(extract_base_expression("2(x + 1 = 4").is_err());
        assert!(extract_base_expression("2x + 4 =").is_err());
    }
}
