//! MathIDE 控制台入口
//!
//! 初始化日志与配置，创建引擎后进入逐行交互：
//! - 数字：选择对应候选，带参数的候选写成 `3 k=4`
//! - `c <描述> | <结果>`：提交自定义变换
//! - `d <描述>`：只给描述，由 Oracle 计算结果
//! - `r <步骤ID>`：回退到该步骤
//! - `b` 分情况讨论，`h` 历史，`a` 进度分析，`s` 检查是否已解出，`w` 保存会话，`q` 退出

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use mathide::config::load_config;
use mathide::engine::{Choice, Proposal};
use mathide::history::StepId;
use mathide::store::JsonFileSessionStore;
use mathide::{observability, EngineBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let problem = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if problem.trim().is_empty() {
        anyhow::bail!("usage: mathide <problem>, e.g. mathide \"Solve: 2x + 4 = 10\"");
    }

    let config = load_config(None).context("Failed to load config")?;
    let engine = EngineBuilder::new(config)
        .with_store(Arc::new(JsonFileSessionStore::new("sessions")))
        .build();

    let id = engine
        .start_session(&problem)
        .await
        .context("Failed to start session")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut proposal: Option<Proposal> = None;

    loop {
        let history = engine.get_history(&id).await?;
        let current = history
            .steps
            .iter()
            .find(|s| s.id == history.cursor)
            .map(|s| s.expression.clone())
            .unwrap_or_default();
        println!("\n[{}] {}", history.cursor, current);

        if proposal.is_none() {
            match engine.propose(&id).await {
                Ok(p) => proposal = Some(p),
                Err(e) => println!("无法获取候选：{e}"),
            }
        }
        if let Some(p) = &proposal {
            for (i, c) in p.candidates.iter().enumerate() {
                println!("  {}. {} => {}", i + 1, c.description, c.expression);
                for param in &c.parameters {
                    let default = param.default_value.as_deref().unwrap_or("-");
                    println!("       {} = ? ({}, default {})", param.name, param.prompt, default);
                }
            }
        }

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        let choice = match line {
            "q" => break,
            "h" => {
                for step in &history.steps {
                    let marker = if history.current_path.contains(&step.id) { "*" } else { " " };
                    println!("{} {} (#{}) {}", marker, step.id, step.index, step.expression);
                }
                continue;
            }
            "a" => {
                match engine.assess(&id).await {
                    Ok(Some(rec)) => println!("建议：{} {:?}", rec.rationale, rec.target),
                    Ok(None) => println!("暂无建议"),
                    Err(e) => println!("分析失败：{e}"),
                }
                continue;
            }
            "s" => {
                match engine.check_solution(&id).await {
                    Ok(check) => println!("solved={} {}", check.is_solved, check.explanation),
                    Err(e) => println!("检查失败：{e}"),
                }
                continue;
            }
            "b" => {
                match engine.split_cases(&id).await {
                    Ok(Some(split)) => {
                        proposal = None;
                        println!("{:?}: {}", split.solution_type, split.explanation);
                        for step in &split.steps {
                            println!("  {} {}", step.id, step.expression);
                        }
                    }
                    Ok(None) => println!("无需分情况"),
                    Err(e) => println!("未分支：{e}"),
                }
                continue;
            }
            "w" => {
                let handle = engine.save_session(&id).await?;
                println!("已保存：{handle}");
                continue;
            }
            _ if line.starts_with("r ") => {
                match line[2..].trim().parse::<u32>() {
                    Ok(n) => match engine.rollback(&id, StepId(n)).await {
                        Ok(_) => proposal = None,
                        Err(e) => println!("{e}"),
                    },
                    Err(_) => println!("步骤 ID 应为数字"),
                }
                continue;
            }
            _ if line.starts_with("c ") => match line[2..].split_once('|') {
                Some((description, result)) => Choice::custom(description.trim(), result.trim()),
                None => {
                    println!("格式：c <描述> | <结果>");
                    continue;
                }
            },
            _ if line.starts_with("d ") => Choice::describe(line[2..].trim()),
            _ => match (parse_selection(line), &proposal) {
                (Some((n, values)), Some(p)) if n >= 1 => match p.choose_with(n - 1, values) {
                    Some(choice) => choice,
                    None => {
                        println!("没有第 {n} 个候选");
                        continue;
                    }
                },
                _ => {
                    println!("无法识别的输入");
                    continue;
                }
            },
        };

        match engine.apply(&id, choice).await {
            Ok(applied) => {
                proposal = None;
                if let Some(rec) = applied.recommendation {
                    println!("提示：{}", rec.rationale);
                    if let Some(s) = rec.suggestion {
                        println!("  {s}");
                    }
                }
            }
            Err(e) => println!("未提交：{e}"),
        }
    }

    engine.close_session(&id).await?;
    Ok(())
}

/// `3 k=4 m=x+1` -> (3, {k: 4, m: x+1})
fn parse_selection(line: &str) -> Option<(usize, BTreeMap<String, String>)> {
    let mut parts = line.split_whitespace();
    let index = parts.next()?.parse().ok()?;
    let mut values = BTreeMap::new();
    for part in parts {
        let (name, value) = part.split_once('=')?;
        values.insert(name.to_string(), value.to_string());
    }
    Some((index, values))
}
