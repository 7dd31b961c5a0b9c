//! 带参数候选的填写
//!
//! 候选的描述与表达式里用 `{name}` 占位。用户给出的取值按参数类型检查后整体替换；
//! 未给出的取默认值，没有默认值则拒绝。

use std::collections::BTreeMap;

use crate::core::EngineError;
use crate::oracle::{Candidate, ParameterDefinition, ParameterType};

fn checked_value(definition: &ParameterDefinition, value: &str) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::MalformedInput(format!(
            "parameter '{}' is empty",
            definition.name
        )));
    }
    match definition.param_type {
        ParameterType::Number => {
            let parsed: f64 = value.parse().map_err(|_| {
                EngineError::MalformedInput(format!(
                    "parameter '{}' must be a number, got '{value}'",
                    definition.name
                ))
            })?;
            if !parsed.is_finite() {
                return Err(EngineError::MalformedInput(format!(
                    "parameter '{}' must be finite",
                    definition.name
                )));
            }
        }
        ParameterType::Choice => {
            if !definition.options.iter().any(|o| o == value) {
                return Err(EngineError::MalformedInput(format!(
                    "parameter '{}' must be one of {:?}",
                    definition.name, definition.options
                )));
            }
        }
        ParameterType::Expression | ParameterType::Text => {}
    }
    Ok(value.to_string())
}

/// 返回代入后的 (描述, 表达式)
pub fn fill_parameters(
    candidate: &Candidate,
    values: &BTreeMap<String, String>,
) -> Result<(String, String), EngineError> {
    if let Some(unknown) = values
        .keys()
        .find(|name| !candidate.parameters.iter().any(|p| &p.name == *name))
    {
        return Err(EngineError::MalformedInput(format!(
            "candidate has no parameter '{unknown}'"
        )));
    }

    let mut description = candidate.description.clone();
    let mut expression = candidate.expression.clone();
    for definition in &candidate.parameters {
        let raw = values
            .get(&definition.name)
            .or(definition.default_value.as_ref())
            .ok_or_else(|| {
                EngineError::MalformedInput(format!(
                    "missing value for parameter '{}' ({})",
                    definition.name, definition.prompt
                ))
            })?;
        let value = checked_value(definition, raw)?;
        let placeholder = format!("{{{}}}", definition.name);
        description = description.replace(&placeholder, &value);
        expression = expression.replace(&placeholder, &value);
    }
    tracing::debug!("Filled parameters: '{}' -> '{}'", description, expression);
    Ok((description, expression))
}
