//! 步骤：历史树中不可变的节点

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validator::OperationKind;

/// 步骤 ID（即在历史树 arena 中的下标）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub u32);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 变换来源
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationSource {
    /// Oracle 提出的候选
    Oracle,
    /// 用户自己输入的变换
    UserCustom,
}

/// 产生某一步的变换描述
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformationDescriptor {
    pub description: String,
    pub kind: OperationKind,
    pub source: TransformationSource,
}

/// 历史中的一步；创建后不再修改
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    /// 根步骤为 None
    pub parent: Option<StepId>,
    /// 结果表达式（LaTeX 文本）
    pub expression: String,
    /// 根步骤为 None
    pub transformation: Option<TransformationDescriptor>,
    pub correct: bool,
    /// 沿所在分支的序号，根为 0
    pub index: u32,
    pub created_at: DateTime<Utc>,
}

impl Step {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
