//! 引擎对前端暴露的输入输出类型

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analyzer::RollbackRecommendation;
use crate::history::{Step, StepId};
use crate::oracle::{BranchingType, Candidate};
use crate::validator::OperationKind;

use super::session::SessionId;

/// 一组候选，绑定产生它们的回合
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub session_id: SessionId,
    pub turn: u64,
    pub from_step: StepId,
    pub candidates: Vec<Candidate>,
}

impl Proposal {
    /// 选中第 index 个候选（从 0 开始）
    pub fn choose(&self, index: usize) -> Option<Choice> {
        self.choose_with(index, BTreeMap::new())
    }

    /// 选中带参数的候选并给出参数取值
    pub fn choose_with(&self, index: usize, values: BTreeMap<String, String>) -> Option<Choice> {
        self.candidates.get(index).map(|candidate| Choice::Candidate {
            turn: self.turn,
            candidate: candidate.clone(),
            values,
        })
    }
}

/// 用户自己写的变换
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomTransformation {
    pub description: String,
    pub result: String,
    pub kind: Option<OperationKind>,
}

/// 只有描述的变换，结果由 Oracle 计算
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribedTransformation {
    pub description: String,
    pub kind: Option<OperationKind>,
}

/// apply 的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    Candidate {
        turn: u64,
        candidate: Candidate,
        /// 参数名到取值
        #[serde(default)]
        values: BTreeMap<String, String>,
    },
    Custom(CustomTransformation),
    Describe(DescribedTransformation),
}

impl Choice {
    pub fn custom(description: impl Into<String>, result: impl Into<String>) -> Self {
        Choice::Custom(CustomTransformation {
            description: description.into(),
            result: result.into(),
            kind: None,
        })
    }

    pub fn describe(description: impl Into<String>) -> Self {
        Choice::Describe(DescribedTransformation {
            description: description.into(),
            kind: None,
        })
    }
}

/// apply 成功的结果
#[derive(Debug, Clone, Serialize)]
pub struct Applied {
    pub step: Step,
    pub recommendation: Option<RollbackRecommendation>,
}

/// split_cases 的结果：各分支都已作为当前步骤的子步骤提交，游标位于第一个分支
#[derive(Debug, Clone, Serialize)]
pub struct BranchSplit {
    pub solution_type: BranchingType,
    pub explanation: String,
    pub steps: Vec<Step>,
}
