//! Oracle 层：外部推理服务的能力抽象、线协议、网关（超时 / 重试 / 限流 / 协议校验）与两种实现

pub mod gateway;
pub mod llm;
pub mod protocol;
pub mod rate_limit;
pub mod scripted;
pub mod traits;

pub use gateway::{OracleGateway, RetryPolicy};
pub use llm::LlmOracle;
pub use protocol::{
    AppliedResult, Assessment, AssessStep, Branch, BranchAnalysis, BranchingType, Candidate,
    HistoryEntry, ParameterDefinition, ParameterType, ProgressAssessment, SolutionCheck,
    SolutionType, Usefulness, PROTOCOL_VERSION,
};
pub use rate_limit::TokenBucket;
pub use scripted::ScriptedOracle;
pub use traits::{Oracle, OracleError};
