//! 历史树
//!
//! 以 arena（Vec<Step>）存储所有步骤，每步只记录父 ID；当前路径由游标沿父指针回溯得到。
//! 只追加不删除：回退只移动游标，之后的步骤自然形成新分支。
//! 反序列化时重新检查结构（ID 与位置一致、父步骤先于子步骤、序号逐级加一），
//! 因此父指针不可能成环，root() 总能取到根。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::step::{Step, StepId, TransformationDescriptor};

/// 反序列化得到的历史不满足结构约束
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("history has no root step")]
    Empty,
    #[error("root step must have id 0, no parent, index 0 and no transformation")]
    BadRoot,
    #[error("step at position {position} has id {id}")]
    Misplaced { position: usize, id: StepId },
    #[error("step {0} must have a parent created before it")]
    BadParent(StepId),
    #[error("step {id} has index {index}, expected {expected}")]
    BadIndex { id: StepId, index: u32, expected: u32 },
    #[error("step {0} has no transformation")]
    MissingTransformation(StepId),
}

#[derive(Deserialize)]
struct RawHistoryTree {
    steps: Vec<Step>,
}

impl TryFrom<RawHistoryTree> for HistoryTree {
    type Error = TreeError;

    fn try_from(raw: RawHistoryTree) -> Result<Self, Self::Error> {
        Self::from_steps(raw.steps)
    }
}

/// 单个会话的分支历史
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "RawHistoryTree")]
pub struct HistoryTree {
    steps: Vec<Step>,
}

impl HistoryTree {
    /// 以题目的基础表达式创建根步骤
    pub fn new(root_expression: impl Into<String>) -> Self {
        let root = Step {
            id: StepId(0),
            parent: None,
            expression: root_expression.into(),
            transformation: None,
            correct: true,
            index: 0,
            created_at: Utc::now(),
        };
        Self { steps: vec![root] }
    }

    /// 由已有步骤重建，检查全部结构约束
    pub fn from_steps(steps: Vec<Step>) -> Result<Self, TreeError> {
        let root = steps.first().ok_or(TreeError::Empty)?;
        if root.id != StepId(0)
            || root.parent.is_some()
            || root.index != 0
            || root.transformation.is_some()
        {
            return Err(TreeError::BadRoot);
        }
        for (position, step) in steps.iter().enumerate().skip(1) {
            if step.id.0 as usize != position {
                return Err(TreeError::Misplaced {
                    position,
                    id: step.id,
                });
            }
            let parent = match step.parent {
                Some(p) if p.0 < step.id.0 => &steps[p.0 as usize],
                _ => return Err(TreeError::BadParent(step.id)),
            };
            if step.index != parent.index + 1 {
                return Err(TreeError::BadIndex {
                    id: step.id,
                    index: step.index,
                    expected: parent.index + 1,
                });
            }
            if step.transformation.is_none() {
                return Err(TreeError::MissingTransformation(step.id));
            }
        }
        Ok(Self { steps })
    }

    pub fn root(&self) -> &Step {
        &self.steps[0]
    }

    pub fn get(&self, id: StepId) -> Option<&Step> {
        self.steps.get(id.0 as usize)
    }

    pub fn contains(&self, id: StepId) -> bool {
        (id.0 as usize) < self.steps.len()
    }

    /// 所有步骤，按创建顺序
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// 在 parent 之下追加一步；parent 不存在时返回 None 且不修改历史
    pub fn append(
        &mut self,
        parent: StepId,
        expression: impl Into<String>,
        transformation: TransformationDescriptor,
        correct: bool,
    ) -> Option<StepId> {
        let parent_index = self.get(parent)?.index;
        let id = StepId(self.steps.len() as u32);
        self.steps.push(Step {
            id,
            parent: Some(parent),
            expression: expression.into(),
            transformation: Some(transformation),
            correct,
            index: parent_index + 1,
            created_at: Utc::now(),
        });
        Some(id)
    }

    /// 从根到 id 的路径（含两端）；id 不存在时为空
    pub fn path_to(&self, id: StepId) -> Vec<&Step> {
        let mut path = Vec::new();
        let mut current = self.get(id);
        while let Some(step) = current {
            path.push(step);
            current = step.parent.and_then(|p| self.get(p));
        }
        path.reverse();
        path
    }

    /// ancestor 是否为 descendant 的严格祖先
    pub fn is_ancestor(&self, ancestor: StepId, descendant: StepId) -> bool {
        let mut current = self.get(descendant).and_then(|s| s.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get(id).and_then(|s| s.parent);
        }
        false
    }

    pub fn children(&self, id: StepId) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(move |s| s.parent == Some(id))
    }

    /// 各分支末端（没有子节点的步骤）
    pub fn leaves(&self) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|s| self.children(s.id).next().is_none())
            .map(|s| s.id)
            .collect()
    }
}
